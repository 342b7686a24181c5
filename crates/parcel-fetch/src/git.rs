use std::{
    io::Read,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
    time::Duration,
};

use parcel_utils::fs::ensure_dir_exists;
use tracing::debug;

use crate::{
    cancel::Cancellation,
    error::{FetchError, Result},
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Retrieves a git ref into a local working tree.
pub trait GitClient: Send + Sync {
    /// Checks out `git_ref` of `repo` into `dest` and returns the resolved commit.
    ///
    /// `dest` is created when missing. Implementations must stop promptly once `cancel` fires.
    fn checkout(&self, repo: &str, git_ref: &str, dest: &Path, cancel: &Cancellation)
        -> Result<String>;
}

/// [`GitClient`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: PathBuf,
    shallow: bool,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

struct GitOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

impl GitCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            shallow: true,
        }
    }

    /// Fetch only the requested commit instead of the full history.
    pub fn shallow(mut self, shallow: bool) -> Self {
        self.shallow = shallow;
        self
    }

    fn run(&self, dir: &Path, args: &[&str], cancel: &Cancellation) -> Result<GitOutput> {
        debug!("git {}", args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| FetchError::GitSpawn {
                binary: self.binary.clone(),
                source,
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            if let Err(err) = cancel.check() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    return Err(FetchError::Io {
                        action: "wait for",
                        path: self.binary.clone(),
                        source,
                    })
                }
            }
        };

        Ok(GitOutput {
            status,
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        })
    }

    fn run_checked(
        &self,
        dir: &Path,
        args: &[&str],
        repo: &str,
        git_ref: &str,
        cancel: &Cancellation,
    ) -> Result<String> {
        let output = self.run(dir, args, cancel)?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(failure(repo, git_ref, &output))
        }
    }
}

impl GitClient for GitCli {
    fn checkout(
        &self,
        repo: &str,
        git_ref: &str,
        dest: &Path,
        cancel: &Cancellation,
    ) -> Result<String> {
        ensure_dir_exists(dest)?;
        self.run_checked(dest, &["init", "--quiet"], repo, git_ref, cancel)?;

        let mut fetch = vec!["fetch", "--quiet", "--no-tags"];
        if self.shallow {
            fetch.extend(["--depth", "1"]);
        }
        fetch.extend([repo, git_ref]);

        let output = self.run(dest, &fetch, cancel)?;
        let target = if output.status.success() {
            "FETCH_HEAD"
        } else if is_commit_like(git_ref) {
            // Servers may refuse to serve an arbitrary commit directly; fetch every branch and
            // tag and look the commit up locally.
            debug!("direct fetch of {git_ref} failed, fetching all refs");
            self.run_checked(
                dest,
                &[
                    "fetch",
                    "--quiet",
                    repo,
                    "+refs/heads/*:refs/remotes/origin/*",
                    "+refs/tags/*:refs/tags/*",
                ],
                repo,
                git_ref,
                cancel,
            )?;
            git_ref
        } else {
            return Err(failure(repo, git_ref, &output));
        };

        self.run_checked(
            dest,
            &["reset", "--hard", "--quiet", target],
            repo,
            git_ref,
            cancel,
        )?;
        let commit = self.run_checked(dest, &["rev-parse", "HEAD"], repo, git_ref, cancel)?;
        Ok(commit.trim().to_string())
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn failure(repo: &str, git_ref: &str, output: &GitOutput) -> FetchError {
    FetchError::Git {
        repo: repo.to_string(),
        git_ref: git_ref.to_string(),
        status: status_text(output.status),
        stderr: output.stderr.trim().to_string(),
    }
}

fn status_text(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_string(),
    }
}

fn is_commit_like(git_ref: &str) -> bool {
    (7..=40).contains(&git_ref.len()) && git_ref.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    #[cfg(unix)]
    use crate::test_support::stalling_git;
    use crate::test_support::{commit_all, git_available, init_repo, tag};

    #[test]
    fn test_is_commit_like() {
        assert!(is_commit_like("deadbeef"));
        assert!(is_commit_like(&"a".repeat(40)));
        assert!(!is_commit_like("main"));
        assert!(!is_commit_like("abc"));
        assert!(!is_commit_like(&"a".repeat(41)));
    }

    #[test]
    fn test_checkout_branch_and_commit() {
        if !git_available() {
            return;
        }
        let upstream = tempdir().unwrap();
        init_repo(upstream.path());
        std::fs::write(upstream.path().join("a.txt"), "one").unwrap();
        let first = commit_all(upstream.path(), "first");
        std::fs::write(upstream.path().join("a.txt"), "two").unwrap();
        let second = commit_all(upstream.path(), "second");

        let repo = upstream.path().to_string_lossy().into_owned();
        let work = tempdir().unwrap();
        let cancel = Cancellation::new();

        let dest = work.path().join("main");
        let commit = GitCli::default()
            .checkout(&repo, "main", &dest, &cancel)
            .unwrap();
        assert_eq!(commit, second);
        assert_eq!(std::fs::read_to_string(dest.join("a.txt")).unwrap(), "two");

        let dest = work.path().join("pinned");
        let commit = GitCli::default()
            .shallow(false)
            .checkout(&repo, &first, &dest, &cancel)
            .unwrap();
        assert_eq!(commit, first);
        assert_eq!(std::fs::read_to_string(dest.join("a.txt")).unwrap(), "one");
    }

    #[test]
    fn test_checkout_tag() {
        if !git_available() {
            return;
        }
        let upstream = tempdir().unwrap();
        init_repo(upstream.path());
        std::fs::write(upstream.path().join("a.txt"), "v1").unwrap();
        let tagged = commit_all(upstream.path(), "release");
        tag(upstream.path(), "v1.0.0");
        std::fs::write(upstream.path().join("a.txt"), "next").unwrap();
        commit_all(upstream.path(), "next");

        let work = tempdir().unwrap();
        let dest = work.path().join("tagged");
        let commit = GitCli::default()
            .checkout(
                &upstream.path().to_string_lossy(),
                "v1.0.0",
                &dest,
                &Cancellation::new(),
            )
            .unwrap();
        assert_eq!(commit, tagged);
        assert_eq!(std::fs::read_to_string(dest.join("a.txt")).unwrap(), "v1");
    }

    #[test]
    fn test_checkout_unknown_ref() {
        if !git_available() {
            return;
        }
        let upstream = tempdir().unwrap();
        init_repo(upstream.path());
        std::fs::write(upstream.path().join("a.txt"), "one").unwrap();
        commit_all(upstream.path(), "first");

        let work = tempdir().unwrap();
        let err = GitCli::default()
            .checkout(
                &upstream.path().to_string_lossy(),
                "refs/heads/not-real",
                &work.path().join("x"),
                &Cancellation::new(),
            )
            .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("refs/heads/not-real"), "{msg}");
        assert!(msg.contains("exit status 128"), "{msg}");
    }

    #[test]
    fn test_checkout_cancelled_before_start() {
        if !git_available() {
            return;
        }
        let work = tempdir().unwrap();
        let cancel = Cancellation::new();
        cancel.cancel();

        let err = GitCli::default()
            .checkout("/nonexistent", "main", &work.path().join("x"), &cancel)
            .unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
    }

    #[cfg(unix)]
    #[test]
    fn test_checkout_killed_on_timeout() {
        let bin = tempdir().unwrap();
        let git = GitCli::new(stalling_git(bin.path()));
        let work = tempdir().unwrap();
        let cancel = Cancellation::new().with_timeout(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let err = git
            .checkout("/repo", "main", &work.path().join("x"), &cancel)
            .unwrap_err();
        assert!(matches!(err, FetchError::TimedOut), "{err}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_missing_binary() {
        let work = tempdir().unwrap();
        let err = GitCli::new("/nonexistent/git")
            .checkout("/repo", "main", work.path(), &Cancellation::new())
            .unwrap_err();
        assert!(matches!(err, FetchError::GitSpawn { .. }));
    }
}
