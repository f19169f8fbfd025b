// redpool-proto - RESP2 codec and reply values shared by the pool and its tests
//
// This crate does not know about connections or pooling; it only turns
// commands into bytes and bytes into replies.

pub mod resp;
pub mod value;

// Re-export for convenience
pub use resp::{decode, encode_command, Decoder, ProtocolError, RespValue};
pub use value::{ErrorReply, Value};
