//! Low-level primitives shared by the encoding, storage and graph layers.

/// Byte-level encoders and a checked cursor.
///
/// Order-preserving numeric encodings, varints and counter values.
pub mod bytes;

/// Label lock registry.
///
/// Two-level reader/writer locks guarding schema labels.
pub mod concurrency;
