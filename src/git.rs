use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum GitQueryError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for git: {0}")]
    Wait(#[source] io::Error),
    #[error("git did not finish within {0:?}")]
    Timeout(Duration),
    #[error("git exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
}

/// Read-only git queries the status line needs. Every method answers `None`
/// on any failure.
pub trait GitBackend {
    /// Path of the metadata directory, present only inside a working copy.
    fn git_dir(&self, workdir: &Path) -> Option<String>;
    fn last_commit_subject(&self, workdir: &Path) -> Option<String>;
    /// Committer time of `HEAD` in seconds since the epoch.
    fn last_commit_time(&self, workdir: &Path) -> Option<i64>;
}

#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
    probe_timeout: Duration,
    query_timeout: Duration,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT, DEFAULT_QUERY_TIMEOUT)
    }
}

impl GitCli {
    pub fn new(probe_timeout: Duration, query_timeout: Duration) -> Self {
        Self {
            program: PathBuf::from("git"),
            probe_timeout,
            query_timeout,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn query(&self, workdir: &Path, args: &[&str], timeout: Duration) -> Option<String> {
        match run_with_timeout(&self.program, workdir, args, timeout) {
            Ok(stdout) => Some(stdout.trim().to_string()),
            Err(err) => {
                debug!(workdir = %workdir.display(), ?args, error = %err, "git query failed");
                None
            }
        }
    }
}

impl GitBackend for GitCli {
    fn git_dir(&self, workdir: &Path) -> Option<String> {
        self.query(workdir, &["rev-parse", "--git-dir"], self.probe_timeout)
    }

    fn last_commit_subject(&self, workdir: &Path) -> Option<String> {
        self.query(
            workdir,
            &["log", "-1", "--pretty=format:%s"],
            self.query_timeout,
        )
    }

    fn last_commit_time(&self, workdir: &Path) -> Option<i64> {
        self.query(
            workdir,
            &["log", "-1", "--pretty=format:%ct"],
            self.query_timeout,
        )?
        .parse()
        .ok()
    }
}

fn run_with_timeout(
    program: &Path,
    workdir: &Path,
    args: &[&str],
    timeout: Duration,
) -> Result<String, GitQueryError> {
    let mut child = Command::new(program)
        .args(args)
        .current_dir(workdir)
        .env("GIT_OPTIONAL_LOCKS", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| GitQueryError::Spawn {
            program: program.display().to_string(),
            source,
        })?;

    let status = wait_with_deadline(&mut child, timeout)?;
    let stdout = read_pipe(child.stdout.take());
    if !status.success() {
        let stderr = read_pipe(child.stderr.take());
        return Err(GitQueryError::Failed {
            status,
            stderr: stderr.trim().to_string(),
        });
    }
    Ok(stdout)
}

// Output of these queries is a single short line, well under a pipe buffer,
// so polling before reading cannot deadlock.
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> Result<ExitStatus, GitQueryError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().map_err(GitQueryError::Wait)? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(GitQueryError::Timeout(timeout));
        }
        thread::sleep(WAIT_POLL_INTERVAL);
    }
}

fn read_pipe(pipe: Option<impl Read>) -> String {
    let mut bytes = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut bytes);
    }
    String::from_utf8_lossy(&bytes).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub message: String,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryStatus {
    NotRepository,
    NoCommits,
    Commit(CommitSummary),
}

/// A working directory queried through a [`GitBackend`]. Use `"."` for the
/// process's current directory.
#[derive(Debug, Clone)]
pub struct Repository<B = GitCli> {
    workdir: PathBuf,
    backend: B,
}

impl<B: GitBackend> Repository<B> {
    pub fn new(workdir: impl Into<PathBuf>, backend: B) -> Self {
        Self {
            workdir: workdir.into(),
            backend,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn is_repository(&self) -> bool {
        self.backend.git_dir(&self.workdir).is_some()
    }

    pub fn last_commit_summary(&self) -> Option<CommitSummary> {
        let message = self.backend.last_commit_subject(&self.workdir)?;
        let timestamp = self
            .backend
            .last_commit_time(&self.workdir)
            .and_then(|epoch| Utc.timestamp_opt(epoch, 0).single());
        Some(CommitSummary { message, timestamp })
    }

    pub fn status(&self) -> RepositoryStatus {
        if !self.is_repository() {
            return RepositoryStatus::NotRepository;
        }
        match self.last_commit_summary() {
            Some(commit) => RepositoryStatus::Commit(commit),
            None => RepositoryStatus::NoCommits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeGit {
        git_dir: Option<String>,
        subject: Option<String>,
        time: Option<i64>,
        subject_calls: Cell<usize>,
    }

    impl GitBackend for FakeGit {
        fn git_dir(&self, _workdir: &Path) -> Option<String> {
            self.git_dir.clone()
        }

        fn last_commit_subject(&self, _workdir: &Path) -> Option<String> {
            self.subject_calls.set(self.subject_calls.get() + 1);
            self.subject.clone()
        }

        fn last_commit_time(&self, _workdir: &Path) -> Option<i64> {
            self.time
        }
    }

    fn command_available(program: &str) -> bool {
        Command::new(program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[test]
    fn commit_summary_carries_message_and_time() {
        let repo = Repository::new(
            "/repo",
            FakeGit {
                git_dir: Some(".git".to_string()),
                subject: Some("Add feature X to improve performance".to_string()),
                time: Some(1_751_204_022),
                ..FakeGit::default()
            },
        );

        assert!(repo.is_repository());
        let commit = repo.last_commit_summary().expect("commit");
        assert_eq!(commit.message, "Add feature X to improve performance");
        assert_eq!(commit.timestamp.map(|ts| ts.timestamp()), Some(1_751_204_022));
    }

    #[test]
    fn missing_commit_time_keeps_message() {
        let repo = Repository::new(
            "/repo",
            FakeGit {
                git_dir: Some(".git".to_string()),
                subject: Some("Initial commit".to_string()),
                ..FakeGit::default()
            },
        );
        let commit = repo.last_commit_summary().expect("commit");
        assert_eq!(commit.message, "Initial commit");
        assert_eq!(commit.timestamp, None);
    }

    #[test]
    fn status_distinguishes_empty_repository() {
        let repo = Repository::new(
            "/repo",
            FakeGit {
                git_dir: Some(".git".to_string()),
                ..FakeGit::default()
            },
        );
        assert_eq!(repo.status(), RepositoryStatus::NoCommits);
    }

    #[test]
    fn status_skips_commit_query_outside_repository() {
        let repo = Repository::new("/not-a-repo", FakeGit::default());
        assert_eq!(repo.status(), RepositoryStatus::NotRepository);
        assert_eq!(repo.backend.subject_calls.get(), 0);
    }

    #[test]
    fn unavailable_git_reports_absence() {
        let tmp = TempDir::new().expect("temp dir");
        let backend = GitCli::default().with_program(tmp.path().join("no-such-git"));
        let repo = Repository::new(tmp.path(), backend);

        assert!(!repo.is_repository());
        assert_eq!(repo.last_commit_summary(), None);
        assert_eq!(repo.status(), RepositoryStatus::NotRepository);
    }

    #[test]
    fn missing_workdir_reports_absence() {
        let tmp = TempDir::new().expect("temp dir");
        let repo = Repository::new(tmp.path().join("gone"), GitCli::default());
        assert!(!repo.is_repository());
        assert_eq!(repo.last_commit_summary(), None);
    }

    #[cfg(unix)]
    #[test]
    fn slow_command_times_out() {
        let tmp = TempDir::new().expect("temp dir");
        let started = Instant::now();
        let result = run_with_timeout(
            Path::new("sleep"),
            tmp.path(),
            &["5"],
            Duration::from_millis(100),
        );
        assert!(matches!(result, Err(GitQueryError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn real_git_reads_latest_commit() {
        if !command_available("git") {
            return;
        }
        let tmp = TempDir::new().expect("temp dir");
        let git = |args: &[&str]| {
            let status = Command::new("git")
                .args([
                    "-c",
                    "user.name=Status Test",
                    "-c",
                    "user.email=status@example.com",
                    "-c",
                    "commit.gpgsign=false",
                ])
                .args(args)
                .current_dir(tmp.path())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .expect("run git");
            assert!(status.success(), "git {args:?} failed");
        };

        git(&["init", "-q"]);
        let repo = Repository::new(tmp.path(), GitCli::default());
        assert!(repo.is_repository());
        assert_eq!(repo.status(), RepositoryStatus::NoCommits);

        git(&["commit", "-q", "--allow-empty", "-m", "Add status line"]);
        let commit = repo.last_commit_summary().expect("commit");
        assert_eq!(commit.message, "Add status line");
        assert!(commit.timestamp.is_some());
    }
}
