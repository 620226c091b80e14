//! Checkpoint manager: a small state machine over one git repository.
//!
//! Every mutating operation first runs [`CheckpointManager::ensure_timeline_branch`],
//! so after any successful call the working copy is on the timeline branch and
//! that branch points at either the newest checkpoint or one the user travelled to.
//!
//! Checkpoints (and the tip being left behind by time travel) are anchored under
//! `refs/retouch/checkpoints/`, which keeps them reachable after the timeline
//! branch moves backwards. Nothing is ever deleted or rewritten.

use crate::checkpoint::{Checkpoint, TimelineState};
use crate::error::CheckpointError;
use git2::build::CheckoutBuilder;
use git2::{
    AnnotatedCommit, BranchType, Commit, ErrorCode, IndexAddOption, Oid, Repository, ResetType,
    Signature, Sort, StashFlags,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{debug, info, warn};

pub const DEFAULT_TIMELINE_BRANCH: &str = "retouch-timeline";
pub const DEFAULT_AUTHOR_NAME: &str = "Retouch";
pub const DEFAULT_AUTHOR_EMAIL: &str = "checkpoints@retouch.dev";

const ANCHOR_PREFIX: &str = "refs/retouch/checkpoints/";

/// What `ensure_timeline_branch` had to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineRepair {
    AlreadyOnTimeline,
    /// Repository has no commits yet; HEAD now names the (unborn) timeline branch.
    Unborn,
    Switched {
        from: Option<String>,
        created: bool,
        integrated: bool,
    },
}

pub struct CheckpointManager {
    project_dir: PathBuf,
    timeline_branch: String,
    author_name: String,
    author_email: String,
    /// Shared by every manager on the same project: operations move HEAD and
    /// rewrite the working tree.
    write_lock: Arc<Mutex<()>>,
}

impl CheckpointManager {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        let write_lock = project_lock(&project_dir);
        Self {
            project_dir,
            timeline_branch: DEFAULT_TIMELINE_BRANCH.to_string(),
            author_name: DEFAULT_AUTHOR_NAME.to_string(),
            author_email: DEFAULT_AUTHOR_EMAIL.to_string(),
            write_lock,
        }
    }

    pub fn with_timeline_branch(mut self, branch: impl Into<String>) -> Self {
        self.timeline_branch = branch.into();
        self
    }

    pub fn with_author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.author_name = name.into();
        self.author_email = email.into();
        self
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn timeline_branch(&self) -> &str {
        &self.timeline_branch
    }

    pub fn is_repository(&self) -> bool {
        Repository::open(&self.project_dir).is_ok()
    }

    /// Name of the checked-out branch, `None` when HEAD is detached.
    pub fn current_branch(&self) -> Result<Option<String>, CheckpointError> {
        let _guard = self.lock();
        let repo = self.open()?;
        Ok(head_branch_ref(&repo)?.map(|name| short_branch_name(&name).to_string()))
    }

    /// Idempotent: a no-op when already on the timeline branch.
    ///
    /// Otherwise creates the branch from the current position if missing,
    /// switches to it, and folds the previously checked-out branch in
    /// (fast-forward first, full merge as fallback).
    pub fn ensure_timeline_branch(&self) -> Result<TimelineRepair, CheckpointError> {
        let _guard = self.lock();
        let mut repo = self.open()?;
        self.ensure_on_timeline(&mut repo)
    }

    /// Stages every change in the working tree and commits it as a checkpoint.
    ///
    /// Fails with [`CheckpointError::NothingToCheckpoint`] when the tree is unchanged.
    pub fn create_checkpoint(&self, message: &str) -> Result<Checkpoint, CheckpointError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(CheckpointError::EmptyMessage);
        }

        let _guard = self.lock();
        let mut repo = self.open()?;
        self.ensure_on_timeline(&mut repo)?;

        let mut index = repo.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"], None)?;
        index.write()?;
        let tree_id = index.write_tree()?;

        let parent = head_commit(&repo)?;
        let unchanged = match &parent {
            Some(parent) => parent.tree_id() == tree_id,
            None => index.is_empty(),
        };
        if unchanged {
            return Err(CheckpointError::NothingToCheckpoint);
        }

        let tree = repo.find_tree(tree_id)?;
        let signature = self.signature()?;
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let oid = repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &parents,
        )?;
        self.anchor(&repo, oid)?;
        self.verify_on_timeline(&repo, Some(oid))?;

        let commit = repo.find_commit(oid)?;
        let checkpoint = Checkpoint::from_commit(&commit).ok_or_else(|| {
            CheckpointError::Verification(format!("checkpoint {} is unreadable", oid))
        })?;
        info!(checkpoint = %checkpoint.short_id, subject = message, "Created checkpoint");
        Ok(checkpoint)
    }

    /// Up to `limit` checkpoints from every ref in the repository, newest first.
    /// Entries that cannot be read are skipped.
    pub fn list_checkpoints(&self, limit: usize) -> Result<Vec<Checkpoint>, CheckpointError> {
        let _guard = self.lock();
        let repo = self.open()?;

        let mut walk = repo.revwalk()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        walk.push_glob("*")?;
        if let Ok(head) = repo.head()
            && let Some(oid) = head.target()
        {
            walk.push(oid)?;
        }

        let mut checkpoints = Vec::new();
        for oid in walk {
            if checkpoints.len() >= limit {
                break;
            }
            let oid = match oid {
                Ok(oid) => oid,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable history entry");
                    continue;
                }
            };
            match repo.find_commit(oid).ok().and_then(|c| Checkpoint::from_commit(&c)) {
                Some(checkpoint) => checkpoints.push(checkpoint),
                None => debug!(commit = %oid, "Skipping malformed commit"),
            }
        }
        Ok(checkpoints)
    }

    /// Full id of the checked-out commit ("you are here"), `None` before the first commit.
    pub fn current_checkpoint(&self) -> Result<Option<String>, CheckpointError> {
        let _guard = self.lock();
        let repo = self.open()?;
        Ok(head_commit(&repo)?.map(|c| c.id().to_string()))
    }

    /// Newest checkpoint reachable from the timeline branch or any anchor.
    pub fn latest_checkpoint(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let _guard = self.lock();
        let repo = self.open()?;
        let Some(oid) = self.latest_oid(&repo)? else {
            return Ok(None);
        };
        Ok(Checkpoint::from_commit(&repo.find_commit(oid)?))
    }

    pub fn state(&self) -> Result<TimelineState, CheckpointError> {
        let _guard = self.lock();
        let repo = self.open()?;

        let on_timeline = head_branch_ref(&repo)?.as_deref() == Some(self.timeline_ref().as_str());
        if !on_timeline {
            return Ok(TimelineState::Detached);
        }
        let current = head_commit(&repo)?.map(|c| c.id());
        let latest = self.latest_oid(&repo)?;
        if current == latest {
            Ok(TimelineState::OnTimelineHead)
        } else {
            Ok(TimelineState::OnHistoricalCheckpoint)
        }
    }

    /// Moves the timeline branch and working tree to `checkpoint_id`.
    ///
    /// Uncommitted edits are discarded; that is the documented behavior of
    /// time travel. Untracked files are left alone. The tip being left is
    /// anchored first, so later checkpoints stay listed and reachable.
    pub fn travel_to(&self, checkpoint_id: &str) -> Result<Checkpoint, CheckpointError> {
        let checkpoint_id = checkpoint_id.trim();
        if checkpoint_id.is_empty() {
            return Err(CheckpointError::InvalidCheckpoint(checkpoint_id.to_string()));
        }

        let _guard = self.lock();
        let mut repo = self.open()?;
        self.ensure_on_timeline(&mut repo)?;

        let target = repo
            .revparse_single(checkpoint_id)
            .and_then(|obj| obj.peel_to_commit())
            .map_err(|_| CheckpointError::InvalidCheckpoint(checkpoint_id.to_string()))?;

        if let Some(tip) = head_commit(&repo)? {
            self.anchor(&repo, tip.id())?;
        }

        repo.reset(target.as_object(), ResetType::Hard, None)?;
        self.verify_on_timeline(&repo, Some(target.id()))?;

        let checkpoint = Checkpoint::from_commit(&target).ok_or_else(|| {
            CheckpointError::Verification(format!("checkpoint {} is unreadable", target.id()))
        })?;
        info!(checkpoint = %checkpoint.short_id, "Travelled to checkpoint");
        Ok(checkpoint)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self) -> Result<Repository, CheckpointError> {
        Repository::open(&self.project_dir).map_err(|e| {
            debug!(path = %self.project_dir.display(), error = %e, "Repository open failed");
            CheckpointError::NoRepository {
                path: self.project_dir.clone(),
            }
        })
    }

    fn timeline_ref(&self) -> String {
        format!("refs/heads/{}", self.timeline_branch)
    }

    fn signature(&self) -> Result<Signature<'static>, CheckpointError> {
        Ok(Signature::now(&self.author_name, &self.author_email)?)
    }

    fn ensure_on_timeline(
        &self,
        repo: &mut Repository,
    ) -> Result<TimelineRepair, CheckpointError> {
        let timeline_ref = self.timeline_ref();

        let head = match repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == ErrorCode::UnbornBranch => {
                if head_branch_ref(repo)?.as_deref() != Some(timeline_ref.as_str()) {
                    repo.set_head(&timeline_ref)?;
                    debug!(branch = %self.timeline_branch, "Pointed unborn HEAD at timeline");
                }
                return Ok(TimelineRepair::Unborn);
            }
            Err(e) => return Err(e.into()),
        };

        if head.is_branch() && head.name() == Some(timeline_ref.as_str()) {
            return Ok(TimelineRepair::AlreadyOnTimeline);
        }

        let previous = if head.is_branch() {
            head.shorthand().map(str::to_string)
        } else {
            None
        };
        let current = head.peel_to_commit()?;
        warn!(
            from = previous.as_deref().unwrap_or("(detached)"),
            branch = %self.timeline_branch,
            "Working copy is off the timeline, repairing"
        );

        if previous.is_none() {
            // Detached work must stay reachable once HEAD moves away.
            self.anchor(repo, current.id())?;
        }

        let created = match repo.find_branch(&self.timeline_branch, BranchType::Local) {
            Ok(_) => false,
            Err(e) if e.code() == ErrorCode::NotFound => {
                repo.branch(&self.timeline_branch, &current, false)?;
                true
            }
            Err(e) => return Err(e.into()),
        };
        drop(current);
        drop(head);

        self.switch_to_timeline(repo)?;

        let mut integrated = false;
        if let Some(branch) = previous.as_deref()
            && !created
            && self.needs_integration(repo, branch)?
        {
            // Edits carried over from the old branch must survive an aborted merge.
            let shelved = self.shelve_edits(repo)?;
            let outcome = self.integrate(repo, branch);
            if shelved {
                self.restore_edits(repo)?;
            }
            integrated = outcome?;
        }

        self.verify_on_timeline(repo, None)?;
        Ok(TimelineRepair::Switched {
            from: previous,
            created,
            integrated,
        })
    }

    fn switch_to_timeline(&self, repo: &Repository) -> Result<(), CheckpointError> {
        let target = repo
            .find_branch(&self.timeline_branch, BranchType::Local)?
            .get()
            .peel_to_commit()?;

        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        repo.checkout_tree(target.as_object(), Some(&mut checkout))
            .map_err(|e| CheckpointError::BranchRepair(e.message().to_string()))?;
        repo.set_head(&self.timeline_ref())
            .map_err(|e| CheckpointError::BranchRepair(e.message().to_string()))?;
        Ok(())
    }

    fn needs_integration(&self, repo: &Repository, branch: &str) -> Result<bool, CheckpointError> {
        let reference = repo.find_reference(&format!("refs/heads/{}", branch))?;
        let incoming = repo.reference_to_annotated_commit(&reference)?;
        let (analysis, _) = repo.merge_analysis(&[&incoming])?;
        Ok(!analysis.is_up_to_date())
    }

    /// Stashes uncommitted edits, untracked files included. Returns whether
    /// there was anything to stash.
    fn shelve_edits(&self, repo: &mut Repository) -> Result<bool, CheckpointError> {
        let signature = self.signature()?;
        match repo.stash_save(
            &signature,
            "retouch: edits held during timeline repair",
            Some(StashFlags::INCLUDE_UNTRACKED),
        ) {
            Ok(stash) => {
                debug!(stash = %stash, "Shelved uncommitted edits");
                Ok(true)
            }
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Pops the stash written by `shelve_edits`. On failure the stash entry is kept.
    fn restore_edits(&self, repo: &mut Repository) -> Result<(), CheckpointError> {
        repo.stash_pop(0, None).map_err(|e| {
            warn!(error = %e, "Could not restore shelved edits");
            CheckpointError::EditsShelved(e.message().to_string())
        })?;
        debug!("Restored shelved edits");
        Ok(())
    }

    /// Folds `branch` into the timeline. Returns whether anything moved.
    fn integrate(&self, repo: &Repository, branch: &str) -> Result<bool, CheckpointError> {
        let reference = repo.find_reference(&format!("refs/heads/{}", branch))?;
        let incoming = repo.reference_to_annotated_commit(&reference)?;
        let (analysis, _) = repo.merge_analysis(&[&incoming])?;

        if analysis.is_up_to_date() {
            return Ok(false);
        }

        let fast_forward = if analysis.is_fast_forward() {
            match self.fast_forward(repo, &incoming) {
                Ok(()) => {
                    info!(branch, "Fast-forwarded timeline");
                    return Ok(true);
                }
                Err(e) => e.message().to_string(),
            }
        } else {
            "histories have diverged".to_string()
        };

        match self.full_merge(repo, branch, &incoming) {
            Ok(()) => {
                info!(branch, "Merged branch into timeline");
                Ok(true)
            }
            Err(merge) => Err(CheckpointError::MergeFailed {
                branch: branch.to_string(),
                fast_forward,
                merge: merge.message().to_string(),
            }),
        }
    }

    fn fast_forward(
        &self,
        repo: &Repository,
        incoming: &AnnotatedCommit<'_>,
    ) -> Result<(), git2::Error> {
        let target = repo.find_commit(incoming.id())?;
        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        repo.checkout_tree(target.as_object(), Some(&mut checkout))?;
        repo.find_reference(&self.timeline_ref())?
            .set_target(target.id(), "retouch: fast-forward")?;
        Ok(())
    }

    fn full_merge(
        &self,
        repo: &Repository,
        branch: &str,
        incoming: &AnnotatedCommit<'_>,
    ) -> Result<(), git2::Error> {
        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        repo.merge(&[incoming], None, Some(&mut checkout))?;

        let mut index = repo.index()?;
        if index.has_conflicts() {
            self.abort_merge(repo)?;
            return Err(git2::Error::from_str("merge produced conflicts"));
        }

        let tree = repo.find_tree(index.write_tree()?)?;
        index.write()?;
        let ours = repo.head()?.peel_to_commit()?;
        let theirs = repo.find_commit(incoming.id())?;
        let signature = Signature::now(&self.author_name, &self.author_email)?;
        let message = format!("Merge branch '{}' into {}", branch, self.timeline_branch);
        repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            &message,
            &tree,
            &[&ours, &theirs],
        )?;
        repo.cleanup_state()?;
        Ok(())
    }

    /// Puts index and working tree back to the timeline tip. Only called with
    /// the caller's own edits shelved.
    fn abort_merge(&self, repo: &Repository) -> Result<(), git2::Error> {
        let tip = repo.head()?.peel_to_commit()?;
        repo.reset(tip.as_object(), ResetType::Hard, None)?;
        repo.cleanup_state()?;
        Ok(())
    }

    fn anchor(&self, repo: &Repository, oid: Oid) -> Result<(), CheckpointError> {
        repo.reference(
            &format!("{}{}", ANCHOR_PREFIX, oid),
            oid,
            true,
            "retouch: anchor checkpoint",
        )?;
        Ok(())
    }

    fn latest_oid(&self, repo: &Repository) -> Result<Option<Oid>, CheckpointError> {
        let mut candidates = Vec::new();
        if let Ok(branch) = repo.find_branch(&self.timeline_branch, BranchType::Local)
            && let Some(oid) = branch.get().target()
        {
            candidates.push(oid);
        }
        for reference in repo.references_glob(&format!("{}*", ANCHOR_PREFIX))? {
            if let Some(oid) = reference?.target() {
                candidates.push(oid);
            }
        }

        let mut latest: Option<Commit<'_>> = None;
        for oid in candidates {
            let Ok(commit) = repo.find_commit(oid) else {
                continue;
            };
            let newer = match &latest {
                None => true,
                Some(best) => {
                    commit.time().seconds() > best.time().seconds()
                        || (commit.time().seconds() == best.time().seconds()
                            && repo.graph_descendant_of(commit.id(), best.id())?)
                }
            };
            if newer {
                latest = Some(commit);
            }
        }
        Ok(latest.map(|c| c.id()))
    }

    fn verify_on_timeline(
        &self,
        repo: &Repository,
        expected: Option<Oid>,
    ) -> Result<(), CheckpointError> {
        let timeline_ref = self.timeline_ref();
        let branch = head_branch_ref(repo)?;
        if branch.as_deref() != Some(timeline_ref.as_str()) {
            return Err(CheckpointError::Verification(format!(
                "HEAD is on {} instead of {}",
                branch.as_deref().unwrap_or("a detached commit"),
                timeline_ref
            )));
        }
        if let Some(expected) = expected {
            let actual = head_commit(repo)?.map(|c| c.id());
            if actual != Some(expected) {
                return Err(CheckpointError::Verification(format!(
                    "timeline points at {:?}, expected {}",
                    actual, expected
                )));
            }
        }
        Ok(())
    }
}

/// One writer lock per project directory, handed to every manager opened on it.
fn project_lock(project_dir: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let key = project_dir
        .canonicalize()
        .unwrap_or_else(|_| project_dir.to_path_buf());
    let mut locks = LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    locks.entry(key).or_default().clone()
}

/// Full ref name HEAD points at (`refs/heads/...`), born or not. `None` when detached.
fn head_branch_ref(repo: &Repository) -> Result<Option<String>, CheckpointError> {
    let head = repo.find_reference("HEAD")?;
    Ok(head.symbolic_target().map(str::to_string))
}

/// The checked-out commit, `None` on an unborn branch.
fn head_commit(repo: &Repository) -> Result<Option<Commit<'_>>, CheckpointError> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?)),
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn short_branch_name(name: &str) -> &str {
    name.strip_prefix("refs/heads/").unwrap_or(name)
}
