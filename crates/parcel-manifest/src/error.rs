use std::path::PathBuf;

use miette::Diagnostic;
use parcel_utils::error::{FileSystemError, PathError};
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ManifestError {
    #[error("Failed to {action} `{}`", path.display())]
    #[diagnostic(code(parcel_manifest::io))]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No manifest found in `{}`", path.display())]
    #[diagnostic(
        code(parcel_manifest::not_found),
        help("A package directory must contain a Parcelfile")
    )]
    NotFound { path: PathBuf },

    #[error("Invalid manifest {origin}: {source}")]
    #[diagnostic(
        code(parcel_manifest::parse),
        help("Check the Parcelfile syntax and structure")
    )]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize manifest: {0}")]
    #[diagnostic(code(parcel_manifest::serialize))]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid resource document `{}`: {source}", path.display())]
    #[diagnostic(code(parcel_manifest::resource))]
    Resource {
        path: PathBuf,
        #[source]
        source: toml_edit::TomlError,
    },

    #[error("Cannot mark `{}` in `{resource}` for setter `{setter}`: {reason}", path.join("."))]
    #[diagnostic(
        code(parcel_manifest::setter_path),
        help("Setter paths must name an existing value inside a table")
    )]
    SetterPath {
        setter: String,
        resource: String,
        path: Vec<String>,
        reason: String,
    },

    #[error("Invalid path `{}`: {source}", path.display())]
    #[diagnostic(code(parcel_manifest::path))]
    Path {
        path: PathBuf,
        #[source]
        source: PathError,
    },

    #[error(transparent)]
    #[diagnostic(code(parcel_manifest::fs))]
    FileSystem(#[from] FileSystemError),
}

pub type Result<T> = std::result::Result<T, ManifestError>;
