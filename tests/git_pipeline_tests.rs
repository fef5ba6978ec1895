//! Integration tests for the git analysis pipeline: snapshot clone plus
//! changed-file and authorship computation, run against throwaway local
//! repositories built with the real git binary.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

use reviewbot::review::selection::{authors_of_files, changed_files};
use reviewbot::scm::{CloneRequest, RepositorySnapshot};

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .current_dir(dir)
        .args(args)
        .status()
        .expect("run git");
    assert!(status.success(), "git {args:?} failed in {}", dir.display());
}

fn write_file(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).expect("write fixture file");
}

fn commit_as(dir: &Path, name: &str, email: &str, message: &str) {
    git(dir, &["add", "-A"]);
    let author = format!("user.name={name}");
    let address = format!("user.email={email}");
    git(
        dir,
        &["-c", &author, "-c", &address, "commit", "-q", "-m", message],
    );
}

/// Upstream history on `main`: Alice owns core.rs (two commits), Bob owns
/// docs.md (one commit).
fn upstream_fixture() -> TempDir {
    let upstream = TempDir::with_prefix("upstream-").expect("create upstream dir");
    git(upstream.path(), &["init", "-q"]);
    git(upstream.path(), &["checkout", "-q", "-b", "main"]);

    write_file(upstream.path(), "core.rs", "fn run() {}\n");
    commit_as(upstream.path(), "Alice", "alice@example.com", "add core");
    write_file(upstream.path(), "core.rs", "fn run() { start(); }\n");
    commit_as(upstream.path(), "Alice", "alice@example.com", "wire start");
    write_file(upstream.path(), "docs.md", "# service\n");
    commit_as(upstream.path(), "Bob", "bob@example.com", "add docs");

    upstream
}

/// Fork of the upstream with a `topic` branch: Carol modifies core.rs and
/// adds api.rs in a single commit.
fn fork_fixture(upstream: &TempDir) -> TempDir {
    let fork = TempDir::with_prefix("fork-").expect("create fork dir");
    let status = Command::new("git")
        .args([
            "clone",
            "-q",
            &upstream.path().to_string_lossy(),
            &fork.path().to_string_lossy(),
        ])
        .status()
        .expect("run git clone");
    assert!(status.success(), "fork clone failed");

    git(fork.path(), &["checkout", "-q", "-b", "topic"]);
    write_file(fork.path(), "core.rs", "fn run() { start(); stop(); }\n");
    write_file(fork.path(), "api.rs", "fn serve() {}\n");
    commit_as(fork.path(), "Carol", "carol@example.com", "add api surface");

    fork
}

async fn snapshot_of(upstream: &TempDir, fork: &TempDir) -> RepositorySnapshot {
    RepositorySnapshot::clone_with_remote(&CloneRequest {
        from_link: fork.path().to_string_lossy().into_owned(),
        to_link: upstream.path().to_string_lossy().into_owned(),
        base_branch: "main".to_string(),
        pull_request_branch: "topic".to_string(),
    })
    .await
    .expect("clone snapshot")
}

#[tokio::test]
async fn snapshot_diff_and_authorship_weights_reflect_branch_history() {
    let upstream = upstream_fixture();
    let fork = fork_fixture(&upstream);
    let snapshot = snapshot_of(&upstream, &fork).await;

    let files = changed_files(&snapshot.git_dir(), "topic", "main")
        .await
        .expect("compute changed files");
    let mut sorted = files.clone();
    sorted.sort();
    assert_eq!(sorted, ["api.rs".to_string(), "core.rs".to_string()]);

    let authors = authors_of_files(&snapshot.git_dir(), &files)
        .await
        .expect("compute authorship");
    let commits_of = |email: &str| {
        authors
            .iter()
            .find(|author| author.email == email)
            .map(|author| author.commits)
    };

    // Alice wrote the touched core.rs twice, Carol once on the branch; Bob
    // only touched docs.md and never shows up.
    assert_eq!(commits_of("alice@example.com"), Some(2));
    assert_eq!(commits_of("carol@example.com"), Some(1));
    assert_eq!(commits_of("bob@example.com"), None);
}

#[tokio::test]
async fn empty_file_set_falls_back_to_repository_wide_history() {
    let upstream = upstream_fixture();
    let fork = fork_fixture(&upstream);
    let snapshot = snapshot_of(&upstream, &fork).await;

    let authors = authors_of_files(&snapshot.git_dir(), &[])
        .await
        .expect("compute authorship");
    let commits_of = |email: &str| {
        authors
            .iter()
            .find(|author| author.email == email)
            .map(|author| author.commits)
    };

    assert_eq!(commits_of("alice@example.com"), Some(2));
    assert_eq!(commits_of("bob@example.com"), Some(1));
    assert_eq!(commits_of("carol@example.com"), Some(1));
}
