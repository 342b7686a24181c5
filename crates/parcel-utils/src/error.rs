use std::{error::Error, fmt, path::PathBuf};

#[derive(Debug)]
pub enum PathError {
    CurrentDir { source: std::io::Error },

    Empty,

    MissingEnvVar { var: String, input: String },

    UnclosedVariable { input: String },

    /// A relative path climbs above the directory it is meant to stay inside.
    EscapesRoot { path: PathBuf },

    /// An absolute path was given where only a relative one is allowed.
    NotRelative { path: PathBuf },
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::Empty => write!(f, "Path is empty"),
            PathError::CurrentDir { source } => {
                write!(f, "Failed to get current directory: {source}")
            }
            PathError::UnclosedVariable { input } => {
                write!(f, "Unclosed variable expression starting at `{input}`")
            }
            PathError::MissingEnvVar { var, input } => {
                write!(f, "Environment variable `{var}` not set in `{input}`")
            }
            PathError::EscapesRoot { path } => {
                write!(f, "Path `{}` escapes its parent directory", path.display())
            }
            PathError::NotRelative { path } => {
                write!(f, "Path `{}` must be relative", path.display())
            }
        }
    }
}

impl Error for PathError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PathError::CurrentDir { source } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum FileSystemError {
    File {
        path: PathBuf,
        action: &'static str,
        source: std::io::Error,
    },

    Directory {
        path: PathBuf,
        action: &'static str,
        source: std::io::Error,
    },

    NotADirectory {
        path: PathBuf,
    },

    /// Moving a staged tree into place failed; `restored` reports whether the
    /// previous content was put back.
    Swap {
        path: PathBuf,
        restored: bool,
        source: std::io::Error,
    },
}

impl fmt::Display for FileSystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSystemError::File {
                path,
                action,
                source,
            } => {
                write!(f, "Failed to {action} file `{}`: {source}", path.display())
            }
            FileSystemError::Directory {
                path,
                action,
                source,
            } => {
                write!(
                    f,
                    "Failed to {action} directory `{}`: {source}",
                    path.display()
                )
            }
            FileSystemError::NotADirectory { path } => {
                write!(f, "`{}` is not a directory", path.display())
            }
            FileSystemError::Swap {
                path,
                restored,
                source,
            } => {
                let state = if *restored {
                    "previous content restored"
                } else {
                    "previous content could not be restored"
                };
                write!(
                    f,
                    "Failed to move staged content into `{}` ({state}): {source}",
                    path.display()
                )
            }
        }
    }
}

impl Error for FileSystemError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FileSystemError::File { source, .. } => Some(source),
            FileSystemError::Directory { source, .. } => Some(source),
            FileSystemError::Swap { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum UtilsError {
    Path(PathError),
    FileSystem(FileSystemError),
}

impl fmt::Display for UtilsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UtilsError::Path(err) => write!(f, "{err}"),
            UtilsError::FileSystem(err) => write!(f, "{err}"),
        }
    }
}

impl Error for UtilsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            UtilsError::Path(err) => Some(err),
            UtilsError::FileSystem(err) => Some(err),
        }
    }
}

impl From<PathError> for UtilsError {
    fn from(err: PathError) -> Self {
        UtilsError::Path(err)
    }
}

impl From<FileSystemError> for UtilsError {
    fn from(err: FileSystemError) -> Self {
        UtilsError::FileSystem(err)
    }
}

pub type FileSystemResult<T> = std::result::Result<T, FileSystemError>;
pub type PathResult<T> = std::result::Result<T, PathError>;

pub type UtilsResult<T> = std::result::Result<T, UtilsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_path_error_display() {
        let err = PathError::EscapesRoot {
            path: PathBuf::from("../outside"),
        };
        assert_eq!(
            err.to_string(),
            "Path `../outside` escapes its parent directory"
        );
        assert!(err.source().is_none());

        let err = PathError::NotRelative {
            path: PathBuf::from("/abs"),
        };
        assert_eq!(err.to_string(), "Path `/abs` must be relative");

        let err = PathError::CurrentDir {
            source: io::Error::other("gone"),
        };
        assert_eq!(err.to_string(), "Failed to get current directory: gone");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_swap_error_reports_restore_state() {
        let err = FileSystemError::Swap {
            path: PathBuf::from("/pkg"),
            restored: true,
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to move staged content into `/pkg` (previous content restored): denied"
        );
        assert!(err.source().is_some());

        let err = FileSystemError::Swap {
            path: PathBuf::from("/pkg"),
            restored: false,
            source: io::Error::other("busy"),
        };
        assert!(err
            .to_string()
            .contains("previous content could not be restored"));
    }

    #[test]
    fn test_utils_error_wraps_sources() {
        let err = UtilsError::from(FileSystemError::NotADirectory {
            path: PathBuf::from("/file"),
        });
        assert_eq!(err.to_string(), "`/file` is not a directory");
        assert!(err.source().is_some());

        let err = UtilsError::from(PathError::Empty);
        assert_eq!(err.to_string(), "Path is empty");
        assert!(err.source().is_some());
    }
}
