//! Spreadsheet attachments: filename recovery, upload, and skill extraction.

pub mod filename;
pub mod resolver;
pub mod spreadsheet;
pub mod storage;

pub use resolver::{AttachmentResolver, ResolvedAttachments};
pub use storage::{BlobStore, GcsStore};
