//! Image payload formats.
//!
//! Recorders deliver each image as a Generic Byte Data frame: a fixed
//! 32-byte big-endian header followed by the encoded picture. The header
//! layout is:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 2 | data type ([`DataType`]) |
//! | 2 | 4 | total length, header included |
//! | 6 | 2 | codec ([`Codec`]) |
//! | 8 | 2 | sequence number |
//! | 10 | 2 | flags |
//! | 12 | 8 | sync timestamp (ms since epoch) |
//! | 20 | 8 | timestamp (ms since epoch) |
//! | 28 | 4 | reserved |
//!
//! The streaming engine does not interpret payloads; [`GenericByteData`]
//! is offered to consumers that want the codec and timing without a
//! separate demuxer.

pub mod generic;

pub use generic::{Codec, DataType, GenericByteData, HEADER_LENGTH};
