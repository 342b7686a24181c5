use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    error::{ManifestError, Result},
    manifest::Manifest,
};

const SKIPPED_DIRS: &[&str] = &[".git"];

/// A package found while walking a directory tree.
#[derive(Debug, Clone)]
pub struct PackageNode {
    /// Location relative to the walked root; empty for the root itself.
    pub path: PathBuf,
    /// Number of enclosing packages.
    pub depth: usize,
    pub manifest: Manifest,
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|source| ManifestError::Io {
        action: "read directory",
        path: dir.to_path_buf(),
        source,
    })?;

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ManifestError::Io {
            action: "read directory",
            path: dir.to_path_buf(),
            source,
        })?;
        let file_type = entry.file_type().map_err(|source| ManifestError::Io {
            action: "stat",
            path: entry.path(),
            source,
        })?;
        if !file_type.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if SKIPPED_DIRS.iter().any(|skip| name == *skip) {
            continue;
        }
        dirs.push(entry.path());
    }
    dirs.sort();
    Ok(dirs)
}

/// Walks `root` depth-first and returns every package in it, parents before children.
pub fn find_packages(root: &Path) -> Result<Vec<PackageNode>> {
    let mut nodes = Vec::new();
    walk(root, root, 0, &mut nodes)?;
    Ok(nodes)
}

fn walk(root: &Path, dir: &Path, depth: usize, nodes: &mut Vec<PackageNode>) -> Result<()> {
    let child_depth = match Manifest::read(dir)? {
        Some(manifest) => {
            let path = dir.strip_prefix(root).unwrap_or(dir).to_path_buf();
            nodes.push(PackageNode {
                path,
                depth,
                manifest,
            });
            depth + 1
        }
        None => depth,
    };

    for sub in sorted_subdirs(dir)? {
        walk(root, &sub, child_depth, nodes)?;
    }
    Ok(())
}

/// Returns the nearest packages below `dir`, relative to it.
///
/// The search stops at each package found, so packages nested inside those are left to them.
/// Relative paths listed in `exclude` are neither returned nor descended into.
pub fn nested_packages(dir: &Path, exclude: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    collect_nested(dir, dir, exclude, &mut found)?;
    Ok(found)
}

fn collect_nested(
    root: &Path,
    dir: &Path,
    exclude: &[PathBuf],
    found: &mut Vec<PathBuf>,
) -> Result<()> {
    for sub in sorted_subdirs(dir)? {
        let relative = sub.strip_prefix(root).unwrap_or(&sub).to_path_buf();
        if exclude.contains(&relative) {
            continue;
        }
        if Manifest::exists_in(&sub) {
            found.push(relative);
        } else {
            collect_nested(root, &sub, exclude, found)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn package(root: &Path, relative: &str, name: &str) {
        let dir = root.join(relative);
        fs::create_dir_all(&dir).unwrap();
        Manifest::new(name).write(&dir).unwrap();
    }

    #[test]
    fn test_find_packages_orders_and_depths() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        package(root, "", "root");
        package(root, "b", "b");
        package(root, "a/inner", "inner");
        package(root, "a/inner/deeper", "deeper");
        fs::create_dir_all(root.join(".git/hooks")).unwrap();
        Manifest::new("hidden").write(&root.join(".git/hooks")).unwrap();

        let nodes = find_packages(root).unwrap();
        let summary: Vec<_> = nodes
            .iter()
            .map(|n| (n.path.clone(), n.depth, n.manifest.name().to_string()))
            .collect();

        assert_eq!(
            summary,
            vec![
                (PathBuf::new(), 0, "root".to_string()),
                (PathBuf::from("a/inner"), 1, "inner".to_string()),
                (PathBuf::from("a/inner/deeper"), 2, "deeper".to_string()),
                (PathBuf::from("b"), 1, "b".to_string()),
            ]
        );
    }

    #[test]
    fn test_find_packages_without_root_manifest() {
        let dir = tempdir().unwrap();
        package(dir.path(), "only", "only");

        let nodes = find_packages(dir.path()).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].depth, 0);
    }

    #[test]
    fn test_nested_packages_stops_at_first_package() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        package(root, "", "root");
        package(root, "x", "x");
        package(root, "x/y", "y");
        package(root, "deep/z", "z");
        package(root, "remote", "remote");

        let nested = nested_packages(root, &[PathBuf::from("remote")]).unwrap();
        assert_eq!(nested, vec![PathBuf::from("deep/z"), PathBuf::from("x")]);
    }
}
