use git2::build::CheckoutBuilder;
use git2::{Commit, Oid, Repository, RepositoryState, Signature};
use retouch_checkpoint::{CheckpointError, CheckpointManager, TimelineRepair, TimelineState};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const TIMELINE: &str = "retouch-timeline";

fn init_repo() -> (TempDir, Repository) {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    (dir, repo)
}

fn write(dir: &TempDir, file: &str, content: &str) {
    fs::write(dir.path().join(file), content).unwrap();
}

fn read(dir: &TempDir, file: &str) -> String {
    fs::read_to_string(dir.path().join(file)).unwrap()
}

/// A regular developer commit on whatever HEAD points at.
fn dev_commit(repo: &Repository, file: &str, content: &str, msg: &str) -> Oid {
    let workdir = repo.workdir().unwrap().to_path_buf();
    fs::write(workdir.join(file), content).unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(Path::new(file)).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("Dev", "dev@example.com").unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&Commit<'_>> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &parents)
        .unwrap()
}

fn default_branch(repo: &Repository) -> String {
    repo.head().unwrap().shorthand().unwrap().to_string()
}

fn checkout_branch(repo: &Repository, name: &str) {
    repo.set_head(&format!("refs/heads/{}", name)).unwrap();
    repo.checkout_head(Some(CheckoutBuilder::new().force()))
        .unwrap();
}

fn head_oid(repo: &Repository) -> Oid {
    repo.head().unwrap().target().unwrap()
}

#[test]
fn test_missing_repository_is_a_precondition_failure() {
    let dir = tempfile::tempdir().unwrap();
    let manager = CheckpointManager::new(dir.path());

    assert!(!manager.is_repository());
    let err = manager.create_checkpoint("x").unwrap_err();
    assert!(matches!(err, CheckpointError::NoRepository { .. }));
    assert!(err.is_precondition());
    assert_eq!(err.code(), "NO_REPOSITORY");
    assert!(manager.list_checkpoints(50).is_err());
    assert!(manager.travel_to("abc").unwrap_err().is_precondition());
}

#[test]
fn test_first_checkpoint_in_empty_repository() {
    let (dir, _repo) = init_repo();
    write(&dir, "index.html", "<h1>Hello</h1>\n");
    let manager = CheckpointManager::new(dir.path());

    let checkpoint = manager.create_checkpoint("initial").unwrap();

    assert_eq!(manager.current_branch().unwrap().as_deref(), Some(TIMELINE));
    assert_eq!(checkpoint.author, "Retouch");
    assert_eq!(checkpoint.message, "initial");
    assert!(checkpoint.id.starts_with(&checkpoint.short_id));
    assert_eq!(manager.current_checkpoint().unwrap(), Some(checkpoint.id.clone()));
    assert_eq!(manager.state().unwrap(), TimelineState::OnTimelineHead);
}

#[test]
fn test_empty_repository_has_nothing_to_checkpoint() {
    let (dir, _repo) = init_repo();
    let manager = CheckpointManager::new(dir.path());

    let err = manager.create_checkpoint("nothing here").unwrap_err();
    assert!(matches!(err, CheckpointError::NothingToCheckpoint));
    assert!(manager.list_checkpoints(50).unwrap().is_empty());
    assert_eq!(manager.current_checkpoint().unwrap(), None);
}

#[test]
fn test_fix_typo_becomes_newest_entry() {
    let (dir, repo) = init_repo();
    dev_commit(&repo, "README.md", "Helo\n", "docs");
    let manager = CheckpointManager::new(dir.path());

    write(&dir, "README.md", "Hello\n");
    let checkpoint = manager.create_checkpoint("fix typo").unwrap();

    let list = manager.list_checkpoints(50).unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].message, "fix typo");
    assert_eq!(list[0].id, checkpoint.id);
    assert_eq!(list[1].message, "docs");
    assert_eq!(list[1].author, "Dev");

    let err = manager.create_checkpoint("fix typo").unwrap_err();
    assert!(matches!(err, CheckpointError::NothingToCheckpoint));
    assert_eq!(err.code(), "NOTHING_TO_CHECKPOINT");
}

#[test]
fn test_empty_message_is_rejected() {
    let (dir, repo) = init_repo();
    dev_commit(&repo, "a.txt", "a", "a");
    write(&dir, "a.txt", "b");
    let manager = CheckpointManager::new(dir.path());

    assert!(matches!(
        manager.create_checkpoint("   ").unwrap_err(),
        CheckpointError::EmptyMessage
    ));
    // Still nothing committed or switched.
    assert_ne!(manager.current_branch().unwrap().as_deref(), Some(TIMELINE));
}

#[test]
fn test_checkpoint_records_deletions() {
    let (dir, repo) = init_repo();
    dev_commit(&repo, "keep.txt", "keep", "one");
    dev_commit(&repo, "drop.txt", "drop", "two");
    let manager = CheckpointManager::new(dir.path());

    fs::remove_file(dir.path().join("drop.txt")).unwrap();
    manager.create_checkpoint("remove drop.txt").unwrap();

    let tree = repo.head().unwrap().peel_to_tree().unwrap();
    assert!(tree.get_name("keep.txt").is_some());
    assert!(tree.get_name("drop.txt").is_none());
}

#[test]
fn test_ensure_timeline_branch_is_idempotent() {
    let (dir, repo) = init_repo();
    dev_commit(&repo, "a.txt", "a", "base");
    let original = default_branch(&repo);
    let manager = CheckpointManager::new(dir.path());

    let first = manager.ensure_timeline_branch().unwrap();
    assert_eq!(
        first,
        TimelineRepair::Switched {
            from: Some(original.clone()),
            created: true,
            integrated: false,
        }
    );
    let after_first = (manager.current_branch().unwrap(), head_oid(&repo));

    let second = manager.ensure_timeline_branch().unwrap();
    assert_eq!(second, TimelineRepair::AlreadyOnTimeline);
    assert_eq!((manager.current_branch().unwrap(), head_oid(&repo)), after_first);

    // The original branch is left where it was.
    let branch = repo
        .find_branch(&original, git2::BranchType::Local)
        .unwrap();
    assert_eq!(branch.get().target(), Some(after_first.1));
}

#[test]
fn test_travel_keeps_later_history() {
    let (dir, _repo) = init_repo();
    let manager = CheckpointManager::new(dir.path());

    write(&dir, "style.css", "color: red;\n");
    let one = manager.create_checkpoint("one").unwrap();
    write(&dir, "style.css", "color: green;\n");
    let two = manager.create_checkpoint("two").unwrap();
    write(&dir, "style.css", "color: purple;\n");
    let three = manager.create_checkpoint("three").unwrap();

    let arrived = manager.travel_to(&one.id).unwrap();
    assert_eq!(arrived.id, one.id);
    assert_eq!(manager.current_checkpoint().unwrap(), Some(one.id.clone()));
    assert_eq!(manager.current_branch().unwrap().as_deref(), Some(TIMELINE));
    assert_eq!(read(&dir, "style.css"), "color: red;\n");
    assert_eq!(manager.state().unwrap(), TimelineState::OnHistoricalCheckpoint);

    let ids: Vec<String> = manager
        .list_checkpoints(50)
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, vec![three.id.clone(), two.id.clone(), one.id.clone()]);

    assert_eq!(manager.latest_checkpoint().unwrap().unwrap().id, three.id);
    manager.travel_to(&three.id).unwrap();
    assert_eq!(read(&dir, "style.css"), "color: purple;\n");
    assert_eq!(manager.state().unwrap(), TimelineState::OnTimelineHead);
}

#[test]
fn test_travel_by_short_id_discards_uncommitted_edits() {
    let (dir, _repo) = init_repo();
    let manager = CheckpointManager::new(dir.path());

    write(&dir, "app.js", "v1\n");
    let one = manager.create_checkpoint("v1").unwrap();
    write(&dir, "app.js", "v2 with more\n");
    manager.create_checkpoint("v2").unwrap();

    write(&dir, "app.js", "scratch edit\n");
    manager.travel_to(&one.short_id).unwrap();

    assert_eq!(read(&dir, "app.js"), "v1\n");
    assert_eq!(manager.current_checkpoint().unwrap(), Some(one.id));
}

#[test]
fn test_travel_to_unknown_checkpoint_leaves_state_alone() {
    let (dir, _repo) = init_repo();
    let manager = CheckpointManager::new(dir.path());
    write(&dir, "a.txt", "a\n");
    let only = manager.create_checkpoint("only").unwrap();

    let err = manager.travel_to("0123456789abcdef0123456789abcdef01234567").unwrap_err();
    assert!(matches!(err, CheckpointError::InvalidCheckpoint(_)));
    assert!(!err.is_precondition());
    assert!(matches!(
        manager.travel_to("  ").unwrap_err(),
        CheckpointError::InvalidCheckpoint(_)
    ));
    assert_eq!(manager.current_checkpoint().unwrap(), Some(only.id));
}

#[test]
fn test_new_checkpoint_after_travel_keeps_old_future_listed() {
    let (dir, _repo) = init_repo();
    let manager = CheckpointManager::new(dir.path());

    write(&dir, "a.txt", "1\n");
    let one = manager.create_checkpoint("one").unwrap();
    write(&dir, "a.txt", "22\n");
    let two = manager.create_checkpoint("two").unwrap();

    manager.travel_to(&one.id).unwrap();
    write(&dir, "a.txt", "alternate\n");
    let alt = manager.create_checkpoint("alternate").unwrap();

    let ids: Vec<String> = manager
        .list_checkpoints(50)
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert!(ids.contains(&two.id));
    assert!(ids.contains(&alt.id));
    assert_eq!(manager.current_checkpoint().unwrap(), Some(alt.id));
}

#[test]
fn test_list_respects_limit() {
    let (dir, _repo) = init_repo();
    let manager = CheckpointManager::new(dir.path());
    for i in 0..5 {
        write(&dir, "n.txt", &"n".repeat(i + 1));
        manager.create_checkpoint(&format!("step {}", i)).unwrap();
    }

    let list = manager.list_checkpoints(3).unwrap();
    assert_eq!(list.len(), 3);
    assert_eq!(list[0].message, "step 4");
    assert!(manager.list_checkpoints(0).unwrap().is_empty());
}

#[test]
fn test_other_branch_is_fast_forwarded_into_timeline() {
    let (dir, repo) = init_repo();
    dev_commit(&repo, "a.txt", "a\n", "base");
    let original = default_branch(&repo);
    let manager = CheckpointManager::new(dir.path());
    manager.ensure_timeline_branch().unwrap();

    checkout_branch(&repo, &original);
    let ahead = dev_commit(&repo, "b.txt", "b\n", "feature work");
    assert_eq!(manager.state().unwrap(), TimelineState::Detached);

    let repair = manager.ensure_timeline_branch().unwrap();
    assert_eq!(
        repair,
        TimelineRepair::Switched {
            from: Some(original),
            created: false,
            integrated: true,
        }
    );
    assert_eq!(head_oid(&repo), ahead);
    assert_eq!(read(&dir, "b.txt"), "b\n");
    assert_eq!(manager.state().unwrap(), TimelineState::OnTimelineHead);
}

#[test]
fn test_diverged_branch_falls_back_to_merge() {
    let (dir, repo) = init_repo();
    dev_commit(&repo, "a.txt", "a\n", "base");
    let original = default_branch(&repo);
    let manager = CheckpointManager::new(dir.path());

    write(&dir, "a.txt", "a, edited on timeline\n");
    let checkpoint = manager.create_checkpoint("timeline edit").unwrap();

    checkout_branch(&repo, &original);
    let side = dev_commit(&repo, "b.txt", "b\n", "side work");

    manager.ensure_timeline_branch().unwrap();

    let head = repo.head().unwrap().peel_to_commit().unwrap();
    let parents: Vec<Oid> = head.parent_ids().collect();
    assert_eq!(parents.len(), 2);
    assert_eq!(parents[0].to_string(), checkpoint.id);
    assert_eq!(parents[1], side);
    assert_eq!(read(&dir, "a.txt"), "a, edited on timeline\n");
    assert_eq!(read(&dir, "b.txt"), "b\n");
    assert_eq!(repo.state(), RepositoryState::Clean);
}

#[test]
fn test_conflicting_branch_fails_and_stays_on_timeline() {
    let (dir, repo) = init_repo();
    dev_commit(&repo, "a.txt", "base\n", "base");
    let original = default_branch(&repo);
    let manager = CheckpointManager::new(dir.path());

    write(&dir, "a.txt", "timeline\n");
    let checkpoint = manager.create_checkpoint("timeline edit").unwrap();

    checkout_branch(&repo, &original);
    dev_commit(&repo, "a.txt", "branch\n", "conflicting edit");

    let err = manager.ensure_timeline_branch().unwrap_err();
    match &err {
        CheckpointError::MergeFailed { branch, .. } => assert_eq!(branch, &original),
        other => panic!("expected merge failure, got {:?}", other),
    }
    assert_eq!(err.code(), "MERGE_FAILED");

    assert_eq!(manager.current_branch().unwrap().as_deref(), Some(TIMELINE));
    assert_eq!(manager.current_checkpoint().unwrap(), Some(checkpoint.id));
    assert_eq!(read(&dir, "a.txt"), "timeline\n");
    assert_eq!(repo.state(), RepositoryState::Clean);
    assert!(!repo.index().unwrap().has_conflicts());
}

#[test]
fn test_failed_merge_keeps_uncommitted_edits() {
    let (dir, mut repo) = init_repo();
    dev_commit(&repo, "a.txt", "base\n", "base");
    dev_commit(&repo, "b.txt", "b\n", "second file");
    let original = default_branch(&repo);
    let manager = CheckpointManager::new(dir.path());

    write(&dir, "a.txt", "timeline\n");
    manager.create_checkpoint("timeline edit").unwrap();

    checkout_branch(&repo, &original);
    dev_commit(&repo, "a.txt", "branch\n", "conflicting edit");
    write(&dir, "b.txt", "agent edit\n");
    write(&dir, "notes.txt", "untracked\n");

    let err = manager.create_checkpoint("accept agent edit").unwrap_err();
    assert!(
        matches!(&err, CheckpointError::MergeFailed { branch, .. } if branch == &original),
        "expected merge failure, got {:?}",
        err
    );

    assert_eq!(manager.current_branch().unwrap().as_deref(), Some(TIMELINE));
    assert_eq!(read(&dir, "a.txt"), "timeline\n");
    assert_eq!(read(&dir, "b.txt"), "agent edit\n");
    assert_eq!(read(&dir, "notes.txt"), "untracked\n");
    assert_eq!(repo.state(), RepositoryState::Clean);

    let mut stashes = 0;
    repo.stash_foreach(|_, _, _| {
        stashes += 1;
        true
    })
    .unwrap();
    assert_eq!(stashes, 0);
}

#[test]
fn test_detached_head_is_repaired_before_checkpoint() {
    let (dir, repo) = init_repo();
    let first = dev_commit(&repo, "a.txt", "1\n", "first");
    let second = dev_commit(&repo, "a.txt", "2\n", "second");
    let original = default_branch(&repo);

    repo.set_head_detached(first).unwrap();
    repo.checkout_head(Some(CheckoutBuilder::new().force()))
        .unwrap();
    let manager = CheckpointManager::new(dir.path());
    assert_eq!(manager.state().unwrap(), TimelineState::Detached);
    assert_eq!(manager.current_branch().unwrap(), None);

    write(&dir, "new.txt", "new\n");
    let checkpoint = manager.create_checkpoint("from detached").unwrap();

    let commit = repo
        .find_commit(Oid::from_str(&checkpoint.id).unwrap())
        .unwrap();
    assert_eq!(commit.parent_id(0).unwrap(), first);
    assert_eq!(manager.current_branch().unwrap().as_deref(), Some(TIMELINE));

    let branch = repo.find_branch(&original, git2::BranchType::Local).unwrap();
    assert_eq!(branch.get().target(), Some(second));
}

#[test]
fn test_custom_branch_and_author() {
    let (dir, _repo) = init_repo();
    let manager = CheckpointManager::new(dir.path())
        .with_timeline_branch("edits")
        .with_author("Bot", "bot@example.com");

    write(&dir, "a.txt", "a\n");
    let checkpoint = manager.create_checkpoint("custom").unwrap();
    assert_eq!(checkpoint.author, "Bot");
    assert_eq!(manager.current_branch().unwrap().as_deref(), Some("edits"));
}

#[test]
fn test_checkpoint_json_shape() {
    let (dir, _repo) = init_repo();
    let manager = CheckpointManager::new(dir.path());
    write(&dir, "a.txt", "a\n");
    let checkpoint = manager.create_checkpoint("json").unwrap();

    let value = serde_json::to_value(&checkpoint).unwrap();
    assert_eq!(value["hash"], checkpoint.id);
    assert_eq!(value["shortHash"], checkpoint.short_id);
    assert_eq!(value["message"], "json");
    assert_eq!(value["author"], "Retouch");
    assert!(value["date"].as_str().unwrap().contains('T'));
}
