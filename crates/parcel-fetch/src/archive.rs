//! Tar archive unpacking for stream sources and image layers.

use std::{
    fs,
    io::{BufRead, BufReader, Read},
    path::{Component, Path, PathBuf},
};

use flate2::read::GzDecoder;
use parcel_utils::fs::{ensure_dir_exists, safe_remove};
use tracing::{debug, warn};

use crate::error::{FetchError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Unpacks a plain or gzip compressed tar stream into `dest`.
///
/// With `whiteouts` set, entries follow the OCI layer convention: `.wh.<name>` deletes `<name>`
/// from what earlier layers produced and `.wh..wh..opq` empties its directory.
pub fn unpack<R: Read>(reader: R, dest: &Path, whiteouts: bool) -> Result<()> {
    ensure_dir_exists(dest)?;

    let mut reader = BufReader::new(reader);
    let head = reader.fill_buf().map_err(|source| FetchError::Io {
        action: "read archive into",
        path: dest.to_path_buf(),
        source,
    })?;

    if head.starts_with(&GZIP_MAGIC) {
        unpack_tar(tar::Archive::new(GzDecoder::new(reader)), dest, whiteouts)
    } else {
        unpack_tar(tar::Archive::new(reader), dest, whiteouts)
    }
}

fn unpack_tar<R: Read>(mut archive: tar::Archive<R>, dest: &Path, whiteouts: bool) -> Result<()> {
    let io_err = |source| FetchError::Io {
        action: "unpack archive into",
        path: dest.to_path_buf(),
        source,
    };

    archive.set_preserve_permissions(true);
    for entry in archive.entries().map_err(io_err)? {
        let mut entry = entry.map_err(io_err)?;
        let path = entry.path().map_err(io_err)?.into_owned();

        let Some(relative) = contained(&path) else {
            warn!("skipping archive entry outside the package: {}", path.display());
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        if whiteouts {
            if let Some(name) = relative.file_name().and_then(|n| n.to_str()) {
                if name == OPAQUE_WHITEOUT {
                    let dir = dest.join(relative.parent().unwrap_or(Path::new("")));
                    clear_dir(&dir)?;
                    continue;
                }
                if let Some(hidden) = name.strip_prefix(WHITEOUT_PREFIX) {
                    let target = dest.join(relative.with_file_name(hidden));
                    debug!("whiteout {}", target.display());
                    safe_remove(&target)?;
                    continue;
                }
            }
        }

        entry.unpack_in(dest).map_err(io_err)?;
    }
    Ok(())
}

/// Normalizes an archive path, rejecting anything that would land outside the archive root.
fn contained(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

fn clear_dir(dir: &Path) -> Result<()> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Ok(());
    };
    for entry in entries.flatten() {
        safe_remove(entry.path())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use flate2::{write::GzEncoder, Compression};
    use tempfile::tempdir;

    use super::*;
    use crate::test_support::tar_bytes;

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        use std::io::Write;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_unpack_plain_and_gzip() {
        let data = tar_bytes(&[("pkg/a.txt", "a"), ("pkg/sub/b.txt", "b")]);

        let plain = tempdir().unwrap();
        unpack(Cursor::new(data.clone()), plain.path(), false).unwrap();
        assert_eq!(fs::read_to_string(plain.path().join("pkg/a.txt")).unwrap(), "a");

        let gz = tempdir().unwrap();
        unpack(Cursor::new(gzip(&data)), gz.path(), false).unwrap();
        assert_eq!(
            fs::read_to_string(gz.path().join("pkg/sub/b.txt")).unwrap(),
            "b"
        );
    }

    #[test]
    fn test_layer_whiteouts() {
        let dir = tempdir().unwrap();
        let base = tar_bytes(&[("etc/a", "1"), ("etc/b", "2"), ("data/x", "3"), ("data/y", "4")]);
        unpack(Cursor::new(base), dir.path(), true).unwrap();

        let upper = tar_bytes(&[("etc/.wh.a", ""), ("data/.wh..wh..opq", ""), ("data/z", "5")]);
        unpack(Cursor::new(upper), dir.path(), true).unwrap();

        assert!(!dir.path().join("etc/a").exists());
        assert!(dir.path().join("etc/b").exists());
        assert!(!dir.path().join("data/x").exists());
        assert!(!dir.path().join("data/y").exists());
        assert_eq!(fs::read_to_string(dir.path().join("data/z")).unwrap(), "5");
        assert!(!dir.path().join("data/.wh..wh..opq").exists());
    }

    #[test]
    fn test_whiteouts_are_plain_files_for_streams() {
        let dir = tempdir().unwrap();
        unpack(Cursor::new(tar_bytes(&[(".wh.keep", "k")])), dir.path(), false).unwrap();
        assert!(dir.path().join(".wh.keep").exists());
    }

    #[test]
    fn test_contained_rejects_escapes() {
        assert_eq!(contained(Path::new("./a/b")), Some(PathBuf::from("a/b")));
        assert_eq!(contained(Path::new("/abs/x")), Some(PathBuf::from("abs/x")));
        assert_eq!(contained(Path::new("a/../../x")), None);
        assert_eq!(contained(Path::new(".")), Some(PathBuf::new()));
    }
}
