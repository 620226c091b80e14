//! Checkpoints for a project working tree, kept on one linear timeline branch.
//!
//! Uses libgit2 directly; no `git` binary is required.

pub mod checkpoint;
pub mod error;
pub mod manager;

pub use checkpoint::{Checkpoint, TimelineState};
pub use error::CheckpointError;
pub use manager::{CheckpointManager, TimelineRepair};
