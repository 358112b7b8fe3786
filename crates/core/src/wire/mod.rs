//! AMQP 0-9-1 wire codec: frame envelopes, field tables, and the narrow
//! connection-class method set the proxy inspects.

pub mod constants;
pub mod field_table;
pub mod frame;
pub mod methods;

pub use field_table::FieldValue;
pub use frame::{Decoded, Frame, FrameError};
pub use methods::{Method, MethodError};
