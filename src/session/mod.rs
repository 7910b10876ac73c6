//! Session-scoped file registry
//!
//! Sessions own uploaded files. The in-memory index is a cache over the
//! filesystem layout `{upload_root}/{session_id}/{file_id}_{filename}.pdf`;
//! the filename convention is the persistence format, and any entry can
//! be rebuilt from it after a restart.

mod registry;
mod types;

pub use registry::SessionRegistry;
pub use types::{FileRecord, SessionInfo, SessionRecord};
