use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::error::{FileSystemError, FileSystemResult};

pub trait FileSystemProvider {
    /// Removes the specified file or directory safely.
    ///
    /// Missing paths are not an error. Directories are removed recursively.
    ///
    /// # Errors
    ///
    /// Returns a [`FileSystemError::File`] if the removal fails for any reason other than
    /// the path not existing.
    fn safe_remove<P: AsRef<Path>>(&self, path: P) -> FileSystemResult<()>;

    /// Creates a directory structure if it doesn't exist.
    ///
    /// # Errors
    ///
    /// * [`FileSystemError::Directory`] if the directory could not be created.
    /// * [`FileSystemError::NotADirectory`] if the path exists but is not a directory.
    fn ensure_dir_exists<P: AsRef<Path>>(&self, path: P) -> FileSystemResult<()>;

    /// Recursively copies the contents of `src` into `dst`.
    ///
    /// `dst` is created when missing. Entries whose file name appears in `skip` are left out at
    /// every depth, which is how VCS metadata such as `.git` is kept out of a package tree.
    /// Symbolic links are recreated as links rather than followed.
    ///
    /// # Errors
    ///
    /// * [`FileSystemError::NotADirectory`] if `src` is not a directory.
    /// * [`FileSystemError::File`] / [`FileSystemError::Directory`] on I/O failures.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use parcel_utils::error::FileSystemResult;
    /// use parcel_utils::fs::{FileSystemProvider, StandardFileSystemProvider};
    ///
    /// fn main() -> FileSystemResult<()> {
    ///     let fs = StandardFileSystemProvider;
    ///     fs.copy_dir("/tmp/checkout/pkg", "/tmp/stage/pkg", &[".git"])?;
    ///     Ok(())
    /// }
    /// ```
    fn copy_dir<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        src: P,
        dst: Q,
        skip: &[&str],
    ) -> FileSystemResult<()>;

    /// Moves a fully prepared `staged` directory to `target`.
    ///
    /// When `target` already exists it is first renamed aside, and only removed once `staged`
    /// is in place. If the final rename fails the previous content is moved back, so `target`
    /// always holds either the old tree or the new one. Both paths must live on the same
    /// filesystem.
    ///
    /// # Errors
    ///
    /// * [`FileSystemError::Directory`] if the existing target cannot be moved aside.
    /// * [`FileSystemError::Swap`] if the staged tree cannot be moved into place.
    fn replace_dir<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        staged: P,
        target: Q,
    ) -> FileSystemResult<()>;
}

#[derive(Default, Clone)]
pub struct StandardFileSystemProvider;

impl FileSystemProvider for StandardFileSystemProvider {
    fn safe_remove<P: AsRef<Path>>(&self, path: P) -> FileSystemResult<()> {
        let path = path.as_ref();

        if fs::symlink_metadata(path).is_err() {
            return Ok(());
        }

        let result = if path.is_dir() && !path.is_symlink() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };

        result.map_err(|err| FileSystemError::File {
            path: path.to_path_buf(),
            action: "remove",
            source: err,
        })
    }

    fn ensure_dir_exists<P: AsRef<Path>>(&self, path: P) -> FileSystemResult<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path).map_err(|err| FileSystemError::Directory {
                path: path.to_path_buf(),
                action: "create",
                source: err,
            })?;
        } else if !path.is_dir() {
            return Err(FileSystemError::NotADirectory {
                path: path.to_path_buf(),
            });
        }

        Ok(())
    }

    fn copy_dir<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        src: P,
        dst: Q,
        skip: &[&str],
    ) -> FileSystemResult<()> {
        let src = src.as_ref();
        let dst = dst.as_ref();

        if !src.is_dir() {
            return Err(FileSystemError::NotADirectory {
                path: src.to_path_buf(),
            });
        }
        self.ensure_dir_exists(dst)?;

        let entries = fs::read_dir(src).map_err(|err| FileSystemError::Directory {
            path: src.to_path_buf(),
            action: "read",
            source: err,
        })?;

        for entry in entries {
            let entry = entry.map_err(|err| FileSystemError::Directory {
                path: src.to_path_buf(),
                action: "read",
                source: err,
            })?;
            let name = entry.file_name();
            if skip.iter().any(|s| name.as_os_str() == *s) {
                continue;
            }

            let from = entry.path();
            let to = dst.join(&name);
            let file_type = entry.file_type().map_err(|err| FileSystemError::File {
                path: from.clone(),
                action: "stat",
                source: err,
            })?;

            if file_type.is_symlink() {
                copy_symlink(&from, &to)?;
            } else if file_type.is_dir() {
                self.copy_dir(&from, &to, skip)?;
            } else {
                fs::copy(&from, &to).map_err(|err| FileSystemError::File {
                    path: from.clone(),
                    action: "copy",
                    source: err,
                })?;
            }
        }

        Ok(())
    }

    fn replace_dir<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        staged: P,
        target: Q,
    ) -> FileSystemResult<()> {
        let staged = staged.as_ref();
        let target = target.as_ref();

        if fs::symlink_metadata(target).is_err() {
            return fs::rename(staged, target).map_err(|err| FileSystemError::Swap {
                path: target.to_path_buf(),
                restored: true,
                source: err,
            });
        }

        let backup = backup_path(target);
        debug!(
            "moving {} aside to {}",
            target.display(),
            backup.display()
        );
        fs::rename(target, &backup).map_err(|err| FileSystemError::Directory {
            path: target.to_path_buf(),
            action: "move aside",
            source: err,
        })?;

        if let Err(err) = fs::rename(staged, target) {
            let restored = fs::rename(&backup, target).is_ok();
            return Err(FileSystemError::Swap {
                path: target.to_path_buf(),
                restored,
                source: err,
            });
        }

        if let Err(err) = self.safe_remove(&backup) {
            warn!("{err}");
        }

        Ok(())
    }
}

fn backup_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let pid = std::process::id();

    let mut attempt = 0u32;
    loop {
        let candidate = target.with_file_name(format!(".{name}.old-{pid}-{attempt}"));
        if fs::symlink_metadata(&candidate).is_err() {
            return candidate;
        }
        attempt += 1;
    }
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> FileSystemResult<()> {
    let link = fs::read_link(from).map_err(|err| FileSystemError::File {
        path: from.to_path_buf(),
        action: "read link",
        source: err,
    })?;
    std::os::unix::fs::symlink(&link, to).map_err(|err| FileSystemError::File {
        path: to.to_path_buf(),
        action: "create link",
        source: err,
    })
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> FileSystemResult<()> {
    fs::copy(from, to)
        .map(|_| ())
        .map_err(|err| FileSystemError::File {
            path: from.to_path_buf(),
            action: "copy",
            source: err,
        })
}

/// See [`FileSystemProvider::ensure_dir_exists`].
pub fn ensure_dir_exists<P: AsRef<Path>>(path: P) -> FileSystemResult<()> {
    StandardFileSystemProvider.ensure_dir_exists(path)
}

/// See [`FileSystemProvider::safe_remove`].
pub fn safe_remove<P: AsRef<Path>>(path: P) -> FileSystemResult<()> {
    StandardFileSystemProvider.safe_remove(path)
}

/// See [`FileSystemProvider::copy_dir`].
pub fn copy_dir<P: AsRef<Path>, Q: AsRef<Path>>(
    src: P,
    dst: Q,
    skip: &[&str],
) -> FileSystemResult<()> {
    StandardFileSystemProvider.copy_dir(src, dst, skip)
}

/// See [`FileSystemProvider::replace_dir`].
pub fn replace_dir<P: AsRef<Path>, Q: AsRef<Path>>(staged: P, target: Q) -> FileSystemResult<()> {
    StandardFileSystemProvider.replace_dir(staged, target)
}
