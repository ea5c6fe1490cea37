//! Region-merge transaction: fuse two adjacent regions into one.
//!
//! The transaction choreographs three stores - the in-memory region
//! registry, the coordination-service node tree, and the shared filesystem
//! plus catalog table - through an ordered, journaled sequence of stages
//! with a point of no return. Call [`MergeTransaction::prepare`] to
//! validate the pair, [`MergeTransaction::execute`] to run, and
//! [`MergeTransaction::rollback`] to undo if execute fails. A rollback
//! that returns `Ok(false)` (or an error) means the host must be aborted;
//! the external controller finishes the merge from the coordination and
//! catalog state.

pub mod descriptor;
pub mod progress;
pub mod transaction;

pub use descriptor::{merged_region_descriptor, merged_region_descriptor_at};
pub use progress::LoggingProgress;
pub use transaction::{JournalEntry, MergeTransaction};
