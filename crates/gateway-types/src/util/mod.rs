//! Small, self-contained value types reused across the wire protocol.

pub mod b64;
pub mod oid;
pub mod timestamp;
