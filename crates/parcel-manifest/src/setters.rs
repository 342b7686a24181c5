//! Setter annotations on TOML resource documents.
//!
//! A setter marks a field as parameterizable by attaching a trailing comment of the form
//! `{"$setter":"<name>"}` to the value. The value itself is never changed here.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use parcel_utils::path::{base_name, normalize_relative};
use toml_edit::{DocumentMut, Item};
use tracing::debug;

use crate::{
    error::{ManifestError, Result},
    manifest::{Manifest, SetterDefault},
};

const ANNOTATION_PREFIX: &str = "{\"$setter\":\"";
const ANNOTATION_SUFFIX: &str = "\"}";

/// Marks the value at `path` in `doc` as governed by setter `name`.
///
/// Path segments are table keys; a numeric segment indexes into an array of tables. The target
/// must be a plain value held directly by a table, since a trailing comment cannot follow a value
/// nested in an inline array or inline table.
pub fn annotate(doc: &mut DocumentMut, resource: &str, name: &str, path: &[String]) -> Result<()> {
    let fail = |reason: &str| ManifestError::SetterPath {
        setter: name.to_string(),
        resource: resource.to_string(),
        path: path.to_vec(),
        reason: reason.to_string(),
    };

    let Some((last, parents)) = path.split_last() else {
        return Err(fail("path is empty"));
    };

    let mut current: &mut Item = doc.as_item_mut();
    for segment in parents {
        current = step(current, segment).ok_or_else(|| fail(&format!("no field `{segment}`")))?;
    }

    if !current.is_table() {
        return Err(fail("parent is not a table"));
    }

    let target = step(current, last).ok_or_else(|| fail(&format!("no field `{last}`")))?;
    let Item::Value(value) = target else {
        return Err(fail("target is not a value"));
    };

    value
        .decor_mut()
        .set_suffix(format!(" # {ANNOTATION_PREFIX}{name}{ANNOTATION_SUFFIX}"));
    Ok(())
}

fn step<'a>(item: &'a mut Item, segment: &str) -> Option<&'a mut Item> {
    match segment.parse::<usize>() {
        Ok(index) if item.is_array_of_tables() => item.get_mut(index),
        _ => item.as_table_like_mut()?.get_mut(segment),
    }
}

/// Returns the setter name annotated on `item`, if any.
pub fn annotation(item: &Item) -> Option<String> {
    let suffix = item.as_value()?.decor().suffix()?.as_str()?;
    let comment = suffix.trim().strip_prefix('#')?.trim();
    comment
        .strip_prefix(ANNOTATION_PREFIX)?
        .strip_suffix(ANNOTATION_SUFFIX)
        .map(str::to_string)
}

fn read_resource(path: &Path) -> Result<DocumentMut> {
    let content = fs::read_to_string(path).map_err(|source| ManifestError::Io {
        action: "read",
        path: path.to_path_buf(),
        source,
    })?;
    content
        .parse::<DocumentMut>()
        .map_err(|source| ManifestError::Resource {
            path: path.to_path_buf(),
            source,
        })
}

/// Applies setter defaults to the package rooted at `package_dir`.
///
/// Every default is upserted into the package manifest without marking it set, and every
/// reference is annotated in its resource document. All annotations are resolved before anything
/// is written, so an invalid path leaves the package untouched.
///
/// Returns the names of the applied setters in declaration order.
pub fn apply_setter_defaults(package_dir: &Path, defaults: &[SetterDefault]) -> Result<Vec<String>> {
    if defaults.is_empty() {
        return Ok(Vec::new());
    }

    let mut documents: BTreeMap<PathBuf, DocumentMut> = BTreeMap::new();
    for default in defaults {
        for reference in &default.refs {
            let relative =
                normalize_relative(&reference.resource).map_err(|source| ManifestError::Path {
                    path: PathBuf::from(&reference.resource),
                    source,
                })?;
            let full = package_dir.join(&relative);
            let doc = match documents.entry(full) {
                std::collections::btree_map::Entry::Occupied(entry) => entry.into_mut(),
                std::collections::btree_map::Entry::Vacant(entry) => {
                    let doc = read_resource(entry.key())?;
                    entry.insert(doc)
                }
            };
            annotate(doc, &reference.resource, &default.name, &reference.path)?;
        }
    }

    for (path, doc) in &documents {
        fs::write(path, doc.to_string()).map_err(|source| ManifestError::Io {
            action: "write",
            path: path.clone(),
            source,
        })?;
        debug!("annotated {}", path.display());
    }

    let mut manifest = match Manifest::read(package_dir)? {
        Some(manifest) => manifest,
        None => {
            let dir = package_dir.to_string_lossy();
            Manifest::new(base_name(&dir).unwrap_or_default())
        }
    };

    let mut applied = Vec::with_capacity(defaults.len());
    for default in defaults {
        if !manifest.upsert_setter(&default.name, &default.value) {
            debug!("setter `{}` already set, keeping its value", default.name);
        }
        applied.push(default.name.clone());
    }
    manifest.write(package_dir)?;

    Ok(applied)
}
