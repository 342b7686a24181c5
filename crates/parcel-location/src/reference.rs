use std::{
    fmt,
    io::{Read, Write},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use crate::image::ImageReference;

pub type SharedReader = Arc<Mutex<dyn Read + Send>>;
pub type SharedWriter = Arc<Mutex<dyn Write + Send>>;

/// A git repository at a ref, narrowed to a directory inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GitReference {
    pub repo: String,
    pub git_ref: String,
    pub directory: String,
    /// Resolved commit; only known after the engine has fetched `git_ref`.
    pub commit: Option<String>,
}

impl GitReference {
    pub fn new(
        repo: impl Into<String>,
        git_ref: impl Into<String>,
        directory: impl Into<String>,
    ) -> Self {
        Self {
            repo: repo.into(),
            git_ref: git_ref.into(),
            directory: directory.into(),
            commit: None,
        }
    }

    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }
}

/// An OCI image, narrowed to a directory inside its filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OciReference {
    pub image: ImageReference,
    pub directory: String,
}

#[derive(Clone)]
pub struct InputStream {
    reader: SharedReader,
}

impl InputStream {
    pub fn new<R: Read + Send + 'static>(reader: R) -> Self {
        Self {
            reader: Arc::new(Mutex::new(reader)),
        }
    }

    pub fn reader(&self) -> &SharedReader {
        &self.reader
    }
}

impl PartialEq for InputStream {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.reader), Arc::as_ptr(&other.reader))
    }
}

impl Eq for InputStream {}

impl fmt::Debug for InputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputStream").finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct OutputStream {
    writer: SharedWriter,
}

impl OutputStream {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn writer(&self) -> &SharedWriter {
        &self.writer
    }
}

impl PartialEq for OutputStream {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.writer), Arc::as_ptr(&other.writer))
    }
}

impl Eq for OutputStream {}

impl fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStream").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplexStream {
    pub input: InputStream,
    pub output: OutputStream,
}

/// Where a package lives.
///
/// Exactly one variant is produced per parsed location. Stream variants compare equal only
/// when they share the same underlying reader or writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Dir { directory: PathBuf },
    Git(GitReference),
    Oci(OciReference),
    InputStream(InputStream),
    OutputStream(OutputStream),
    DuplexStream(DuplexStream),
}

impl Reference {
    pub fn kind(&self) -> &'static str {
        match self {
            Reference::Dir { .. } => "dir",
            Reference::Git(_) => "git",
            Reference::Oci(_) => "oci",
            Reference::InputStream(_) => "stdin",
            Reference::OutputStream(_) => "stdout",
            Reference::DuplexStream(_) => "stdio",
        }
    }
}

impl From<GitReference> for Reference {
    fn from(value: GitReference) -> Self {
        Reference::Git(value)
    }
}

impl From<OciReference> for Reference {
    fn from(value: OciReference) -> Self {
        Reference::Oci(value)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Dir { directory } => write!(f, "{}", directory.display()),
            Reference::Git(git) => {
                write!(f, "{}.git", git.repo)?;
                let dir = git.directory.trim_matches('/');
                if !dir.is_empty() && dir != "." {
                    write!(f, "/{dir}")?;
                }
                write!(f, "@{}", git.git_ref)
            }
            Reference::Oci(oci) => {
                write!(f, "oci://{}", oci.image)?;
                if oci.directory != "." {
                    write!(f, "//{}", oci.directory)?;
                }
                Ok(())
            }
            Reference::InputStream(_) | Reference::OutputStream(_) | Reference::DuplexStream(_) => {
                write!(f, "-")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_stream_equality_is_identity() {
        let a = InputStream::new(Cursor::new(Vec::new()));
        let b = InputStream::new(Cursor::new(Vec::new()));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);

        let out = OutputStream::new(Vec::new());
        assert_eq!(out, out.clone());
        assert_eq!(format!("{a:?}"), "InputStream { .. }");
    }

    #[test]
    fn test_display_round_trips_git_shape() {
        let git = Reference::from(GitReference::new("https://host/repo", "main", "sub/dir"));
        assert_eq!(git.to_string(), "https://host/repo.git/sub/dir@main");

        let git = Reference::from(GitReference::new("https://host/repo", "v1", "."));
        assert_eq!(git.to_string(), "https://host/repo.git@v1");
        assert_eq!(git.kind(), "git");
    }

    #[test]
    fn test_display_oci_and_dir() {
        let oci = Reference::Oci(OciReference {
            image: ImageReference::parse("ghcr.io/org/pkg:v1").unwrap(),
            directory: "config".into(),
        });
        assert_eq!(oci.to_string(), "oci://ghcr.io/org/pkg:v1//config");

        let dir = Reference::Dir {
            directory: PathBuf::from("./local"),
        };
        assert_eq!(dir.to_string(), "./local");
    }

    #[test]
    fn test_with_commit() {
        let git = GitReference::new("/srv/repo", "main", "/").with_commit("abc123");
        assert_eq!(git.commit.as_deref(), Some("abc123"));
    }
}
