pub mod codec;
pub mod error;
pub mod record;

pub use error::{RecordError, Result};
pub use record::{Message, RecordHeader, RECORD_HEADER_LEN};
