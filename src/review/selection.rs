//! # Reviewer selection engine
//!
//! Picks reviewers for a pull request with weighted random sampling without
//! replacement. Weights come from git authorship history restricted to the
//! files the pull request touches, so the people who wrote the changed code
//! are the most likely to be asked to review it. Every eligible user keeps a
//! floor weight of 1 so newcomers can still be drawn.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::normalization::normalize_email;
use crate::review::config::AllowedUser;

/// `git shortlog -sne` line: commit count, author name, author email.
static SHORTLOG_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\s+(.+)\s<(.*@.*)>$").unwrap());

/// Errors from the git analysis pipeline. Git failures carry the pipeline
/// step and the process exit code.
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("git {step} exited with code {code}")]
    ProcessExit { step: &'static str, code: i32 },
    #[error("git {step} was terminated by a signal")]
    Terminated { step: &'static str },
    #[error("failed to run git {step}: {source}")]
    Spawn {
        step: &'static str,
        source: std::io::Error,
    },
    #[error("git {step} produced output that is not valid UTF-8")]
    InvalidOutput { step: &'static str },
}

/// Aggregated commit count for one author, keyed by normalized email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorCommits {
    pub email: String,
    pub commits: u64,
}

/// One eligible reviewer with their selection weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub email: String,
    pub weight: u64,
}

/// File paths changed between the merge base of the pull-request branch and
/// the upstream base branch, and the pull-request branch tip. An empty diff
/// yields an empty set.
pub async fn changed_files(
    git_dir: &Path,
    pull_request_branch: &str,
    base_branch: &str,
) -> Result<Vec<String>, SelectionError> {
    let origin_ref = format!("origin/{pull_request_branch}");
    let upstream_ref = format!("upstream/{base_branch}");

    let merge_base = run_git(git_dir, "merge-base", &["merge-base", &origin_ref, &upstream_ref])
        .await?
        .trim()
        .to_string();

    let diff = run_git(
        git_dir,
        "diff",
        &["diff", &merge_base, &origin_ref, "--name-only"],
    )
    .await?;

    let files: Vec<String> = diff
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    debug!(count = files.len(), "Changed files computed");

    Ok(files)
}

/// Per-author commit counts restricted to the given files, or repository
/// wide when the file set is empty. Authors appearing under aliased emails
/// are aggregated after normalization.
pub async fn authors_of_files(
    git_dir: &Path,
    files: &[String],
) -> Result<Vec<AuthorCommits>, SelectionError> {
    let mut args = vec!["shortlog", "HEAD", "-sne"];
    if !files.is_empty() {
        args.push("--");
        args.extend(files.iter().map(String::as_str));
    }

    let output = run_git(git_dir, "shortlog", &args).await?;
    Ok(parse_shortlog(&output))
}

fn parse_shortlog(output: &str) -> Vec<AuthorCommits> {
    let mut by_email: HashMap<String, u64> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for line in output.lines() {
        let Some(captures) = SHORTLOG_LINE.captures(line) else {
            continue;
        };
        let Ok(commits) = captures[1].parse::<u64>() else {
            continue;
        };
        let email = normalize_email(&captures[3]);
        match by_email.get_mut(&email) {
            Some(total) => *total += commits,
            None => {
                by_email.insert(email.clone(), commits);
                order.push(email);
            }
        }
    }

    order
        .into_iter()
        .map(|email| {
            let commits = by_email[&email];
            AuthorCommits { email, commits }
        })
        .collect()
}

/// Weigh every allowed user except the pull-request author. The weight is
/// the author's attributed commit count, floored at 1.
pub fn weighted_candidates(
    allowed: &[AllowedUser],
    authors: &[AuthorCommits],
    pull_request_author: &str,
) -> Vec<Candidate> {
    let author_email = normalize_email(pull_request_author);
    let commits: HashMap<&str, u64> = authors
        .iter()
        .map(|author| (author.email.as_str(), author.commits))
        .collect();

    let mut seen = HashSet::new();
    allowed
        .iter()
        .map(|user| normalize_email(&user.email))
        .filter(|email| *email != author_email)
        .filter(|email| seen.insert(email.clone()))
        .map(|email| {
            let weight = commits.get(email.as_str()).copied().unwrap_or(0).max(1);
            Candidate { email, weight }
        })
        .collect()
}

/// Draw up to `count` distinct reviewers, each draw proportional to the
/// remaining weights, removing the chosen candidate before the next draw.
pub fn draw_reviewers<R: Rng + ?Sized>(
    mut candidates: Vec<Candidate>,
    count: usize,
    rng: &mut R,
) -> Vec<String> {
    let mut selected = Vec::with_capacity(count.min(candidates.len()));

    while selected.len() < count && !candidates.is_empty() {
        let total: u64 = candidates.iter().map(|candidate| candidate.weight).sum();
        let mut point = rng.gen_range(0..total);

        let mut index = candidates.len() - 1;
        for (position, candidate) in candidates.iter().enumerate() {
            if point < candidate.weight {
                index = position;
                break;
            }
            point -= candidate.weight;
        }

        selected.push(candidates.swap_remove(index).email);
    }

    selected
}

async fn run_git(
    git_dir: &Path,
    step: &'static str,
    args: &[&str],
) -> Result<String, SelectionError> {
    let output = Command::new("git")
        .arg("--git-dir")
        .arg(git_dir)
        .args(args)
        .output()
        .await
        .map_err(|source| SelectionError::Spawn { step, source })?;

    if !output.status.success() {
        return match output.status.code() {
            Some(code) => Err(SelectionError::ProcessExit { step, code }),
            None => Err(SelectionError::Terminated { step }),
        };
    }

    String::from_utf8(output.stdout).map_err(|_| SelectionError::InvalidOutput { step })
}
