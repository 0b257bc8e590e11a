//! Low-level primitives shared by the node codec and hash encoding.

/// Byte-level utilities and encoding/decoding.
///
/// Varint encoders and a bounds-checked read cursor.
pub mod bytes;
