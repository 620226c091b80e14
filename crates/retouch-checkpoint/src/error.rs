use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("No git repository at {}", path.display())]
    NoRepository { path: PathBuf },

    #[error("Checkpoint message must not be empty")]
    EmptyMessage,

    #[error("Nothing to checkpoint: working tree matches the current checkpoint")]
    NothingToCheckpoint,

    #[error("Could not integrate branch '{branch}': fast-forward: {fast_forward}; merge: {merge}")]
    MergeFailed {
        branch: String,
        fast_forward: String,
        merge: String,
    },

    #[error("Unknown checkpoint: {0}")]
    InvalidCheckpoint(String),

    #[error("Could not switch to the timeline branch: {0}")]
    BranchRepair(String),

    #[error("Uncommitted edits are still in the git stash (stash@{{0}}): {0}")]
    EditsShelved(String),

    #[error("Post-condition check failed: {0}")]
    Verification(String),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
}

impl CheckpointError {
    pub fn code(&self) -> &'static str {
        match self {
            CheckpointError::NoRepository { .. } => "NO_REPOSITORY",
            CheckpointError::EmptyMessage => "EMPTY_MESSAGE",
            CheckpointError::NothingToCheckpoint => "NOTHING_TO_CHECKPOINT",
            CheckpointError::MergeFailed { .. } => "MERGE_FAILED",
            CheckpointError::InvalidCheckpoint(_) => "INVALID_CHECKPOINT",
            CheckpointError::BranchRepair(_) => "BRANCH_REPAIR_FAILED",
            CheckpointError::EditsShelved(_) => "EDITS_SHELVED",
            CheckpointError::Verification(_) => "VERIFICATION_FAILED",
            CheckpointError::Git(_) => "GIT_ERROR",
        }
    }

    /// Missing repository is a precondition failure, everything else happened mid-operation.
    pub fn is_precondition(&self) -> bool {
        matches!(self, CheckpointError::NoRepository { .. })
    }
}
