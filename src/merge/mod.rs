//! Merge job registry
//!
//! Jobs consume ordered page selections and produce one merged artifact
//! under `{merged_root}/{session_id}/{job_id}_{output_filename}`. The
//! same dual-layer pattern as the session registry: job records live in
//! memory and are reconstructible from the artifact filename after a
//! restart.

mod registry;
mod types;

pub use registry::MergeJobRegistry;
pub use types::{JobRecord, JobStatus, PageSelection};
