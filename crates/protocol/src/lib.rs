pub mod codec;
pub mod compiler;
pub mod message;

pub use codec::{decode_from_node, decode_to_node, encode_from_node, encode_to_node, ProtocolError};
pub use message::{JobResult, JobStart, LogRecord, MessageFromNode, MessageToNode, StateSync};
