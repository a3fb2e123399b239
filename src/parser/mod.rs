//! Message decoding: ranked charsets, header decoding, and MIME handling.

pub mod charset;
pub mod header;
pub mod mime;
