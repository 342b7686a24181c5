use std::{fs, path::Path, str::FromStr};

use parcel_location::{GitReference, OciReference};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ManifestError, Result};

/// File name of the manifest that marks a directory as a package.
pub const MANIFEST_FILE: &str = "Parcelfile";

pub const DEFAULT_STRATEGY: &str = "fast-forward";

/// Package descriptor stored as `Parcelfile` at the root of every package.
///
/// Keys this model does not know about are kept in `extra` and written back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(flatten)]
    pub extra: toml::Table,

    #[serde(default)]
    pub metadata: Metadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<Upstream>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setters: Vec<Setter>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subpackages: Vec<Subpackage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
}

/// Where a fetched package came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Upstream {
    Git(GitUpstream),
    Oci(OciUpstream),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitUpstream {
    pub repo: String,
    pub directory: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciUpstream {
    pub image: String,
    pub directory: String,
    /// Manifest digest the image resolved to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl Upstream {
    pub fn git(reference: &GitReference) -> Self {
        Upstream::Git(GitUpstream {
            repo: reference.repo.clone(),
            directory: reference.directory.clone(),
            git_ref: reference.git_ref.clone(),
            commit: reference.commit.clone(),
        })
    }

    pub fn oci(reference: &OciReference, digest: impl Into<String>) -> Self {
        Upstream::Oci(OciUpstream {
            image: reference.image.to_string(),
            directory: reference.directory.clone(),
            digest: Some(digest.into()),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Upstream::Git(_) => "git",
            Upstream::Oci(_) => "oci",
        }
    }

    /// Repository URL or image name.
    pub fn source(&self) -> &str {
        match self {
            Upstream::Git(git) => &git.repo,
            Upstream::Oci(oci) => &oci.image,
        }
    }

    pub fn directory(&self) -> &str {
        match self {
            Upstream::Git(git) => &git.directory,
            Upstream::Oci(oci) => &oci.directory,
        }
    }

    /// Resolved commit (git) or manifest digest (oci).
    pub fn resolved(&self) -> Option<&str> {
        match self {
            Upstream::Git(git) => git.commit.as_deref(),
            Upstream::Oci(oci) => oci.digest.as_deref(),
        }
    }
}

/// A named parameter surfaced for downstream customization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setter {
    pub name: String,
    pub value: String,
    /// Whether the value was explicitly assigned rather than defaulted.
    #[serde(default)]
    pub is_set: bool,
}

/// A nested remote package to fetch into the declaring package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subpackage {
    /// Package name written into the fetched sub-package manifest.
    pub name: String,
    /// Placement relative to the declaring package.
    pub directory: String,
    #[serde(rename = "ref", default)]
    pub git_ref: String,
    /// Update policy, carried as metadata.
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Fetch from this repository instead of the declaring package's own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    /// Fetch from this OCI image instead of the declaring package's own source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Directory inside the source to fetch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setters: Vec<SetterDefault>,
}

fn default_strategy() -> String {
    DEFAULT_STRATEGY.to_string()
}

/// A setter default pushed into a fetched sub-package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetterDefault {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refs: Vec<SetterRef>,
}

/// A field inside a resource document governed by a setter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetterRef {
    /// Resource file, relative to the package root.
    pub resource: String,
    /// Keys (or array indices) leading to the field.
    pub path: Vec<String>,
}

impl Manifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: Metadata { name: name.into() },
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn has_explicit_name(&self) -> bool {
        !self.metadata.name.trim().is_empty()
    }

    /// Returns `true` when `dir` holds a manifest file.
    pub fn exists_in(dir: &Path) -> bool {
        dir.join(MANIFEST_FILE).is_file()
    }

    /// Reads the manifest in `dir`, returning `None` when the directory has none.
    pub fn read(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(ManifestError::Io {
                    action: "read",
                    path,
                    source: err,
                })
            }
        };

        toml::from_str(&content)
            .map(Some)
            .map_err(|source| ManifestError::Parse {
                origin: format!("`{}`", path.display()),
                source,
            })
    }

    /// Reads the manifest in `dir`, failing when there is none.
    pub fn load(dir: &Path) -> Result<Self> {
        Self::read(dir)?.ok_or_else(|| ManifestError::NotFound {
            path: dir.to_path_buf(),
        })
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MANIFEST_FILE);
        let content = self.to_toml_string()?;
        fs::write(&path, content).map_err(|source| ManifestError::Io {
            action: "write",
            path: path.clone(),
            source,
        })?;
        debug!("wrote {}", path.display());
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Adds a default-only setter, or refreshes the value of one that was never explicitly set.
    ///
    /// Returns `false` when an explicitly set value was left untouched.
    pub fn upsert_setter(&mut self, name: &str, value: &str) -> bool {
        match self.setters.iter_mut().find(|s| s.name == name) {
            Some(existing) if existing.is_set => false,
            Some(existing) => {
                existing.value = value.to_string();
                true
            }
            None => {
                self.setters.push(Setter {
                    name: name.to_string(),
                    value: value.to_string(),
                    is_set: false,
                });
                true
            }
        }
    }
}

impl FromStr for Manifest {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|source| ManifestError::Parse {
            origin: "buffer".to_string(),
            source,
        })
    }
}
