//! Helpers shared by the engine and git client tests.

use std::{
    collections::HashMap,
    io::{BufRead, BufReader, Write},
    net::TcpListener,
    path::{Path, PathBuf},
    process::Command,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use parcel_location::ImageReference;
use parcel_utils::fs::copy_dir;

use crate::{
    cancel::Cancellation,
    error::{FetchError, Result},
    git::GitClient,
    registry::{ImageClient, PullProgress},
};

pub fn tar_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap()
}

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args([
            "-c",
            "user.name=parcel",
            "-c",
            "user.email=parcel@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// Writes a stand-in git executable into `dir` that hangs instead of doing any work.
#[cfg(unix)]
pub fn stalling_git(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("stalling-git");
    std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn init_repo(dir: &Path) {
    git(dir, &["init", "--quiet"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
}

/// Commits everything in `dir` and returns the new commit id.
pub fn commit_all(dir: &Path, message: &str) -> String {
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "--quiet", "--allow-empty", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

pub fn tag(dir: &Path, name: &str) {
    git(dir, &["tag", name]);
}

/// Serves snapshot directories keyed by repository and ref.
#[derive(Default)]
pub struct FakeGit {
    snapshots: HashMap<(String, String), (PathBuf, String)>,
    pub calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl FakeGit {
    pub fn with(mut self, repo: &str, git_ref: &str, tree: &Path, commit: &str) -> Self {
        self.snapshots.insert(
            (repo.to_string(), git_ref.to_string()),
            (tree.to_path_buf(), commit.to_string()),
        );
        self
    }
}

impl GitClient for FakeGit {
    fn checkout(
        &self,
        repo: &str,
        git_ref: &str,
        dest: &Path,
        cancel: &Cancellation,
    ) -> Result<String> {
        cancel.check()?;
        self.calls
            .lock()
            .unwrap()
            .push((repo.to_string(), git_ref.to_string()));

        let Some((tree, commit)) = self.snapshots.get(&(repo.to_string(), git_ref.to_string()))
        else {
            return Err(FetchError::Git {
                repo: repo.to_string(),
                git_ref: git_ref.to_string(),
                status: "exit status 128".to_string(),
                stderr: format!("fatal: couldn't find remote ref {git_ref}"),
            });
        };
        copy_dir(tree, dest, &[])?;
        Ok(commit.clone())
    }
}

/// Serves image filesystems keyed by the canonical image reference.
#[derive(Default)]
pub struct FakeRegistry {
    images: HashMap<String, (PathBuf, String)>,
}

impl FakeRegistry {
    pub fn with(mut self, image: &str, rootfs: &Path, digest: &str) -> Self {
        let image = ImageReference::parse(image).unwrap().to_string();
        self.images
            .insert(image, (rootfs.to_path_buf(), digest.to_string()));
        self
    }
}

impl ImageClient for FakeRegistry {
    fn pull(
        &self,
        image: &ImageReference,
        dest: &Path,
        cancel: &Cancellation,
        _progress: &PullProgress,
    ) -> Result<String> {
        cancel.check()?;
        let Some((rootfs, digest)) = self.images.get(&image.to_string()) else {
            return Err(FetchError::Http {
                status: 404,
                url: image.to_string(),
            });
        };
        copy_dir(rootfs, dest, &[])?;
        Ok(digest.clone())
    }
}

/// Canned HTTP response for [`serve`].
pub struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    chunk_delay: Option<Duration>,
}

impl Reply {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body,
            chunk_delay: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            chunk_delay: None,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Sends the body in 1 KiB pieces with `delay` between them.
    pub fn trickle(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }
}

/// Starts a one-connection-at-a-time HTTP server on localhost and returns its `host:port`.
///
/// The handler receives the request path, the `Authorization` header and the server address.
pub fn serve<F>(handler: F) -> String
where
    F: Fn(&str, Option<&str>, &str) -> Reply + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server_addr = addr.clone();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let Ok(read_half) = stream.try_clone() else {
                continue;
            };
            let mut reader = BufReader::new(read_half);

            let mut request_line = String::new();
            if reader.read_line(&mut request_line).is_err() {
                continue;
            }
            let path = request_line
                .split_whitespace()
                .nth(1)
                .unwrap_or("/")
                .to_string();

            let mut auth = None;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    break;
                }
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("authorization") {
                        auth = Some(value.trim().to_string());
                    }
                }
            }

            let reply = handler(&path, auth.as_deref(), &server_addr);
            let mut head = format!(
                "HTTP/1.1 {} Reply\r\nContent-Length: {}\r\nConnection: close\r\n",
                reply.status,
                reply.body.len()
            );
            for (name, value) in &reply.headers {
                head.push_str(&format!("{name}: {value}\r\n"));
            }
            head.push_str("\r\n");
            let _ = stream.write_all(head.as_bytes());
            match reply.chunk_delay {
                Some(delay) => {
                    for chunk in reply.body.chunks(1024) {
                        if stream.write_all(chunk).and_then(|_| stream.flush()).is_err() {
                            break;
                        }
                        thread::sleep(delay);
                    }
                }
                None => {
                    let _ = stream.write_all(&reply.body);
                }
            }
            let _ = stream.flush();
        }
    });

    addr
}
