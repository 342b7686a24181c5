use std::path::PathBuf;

use miette::Diagnostic;
use parcel_location::LocationError;
use parcel_manifest::ManifestError;
use parcel_utils::error::{FileSystemError, PathError};
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum FetchError {
    #[error("must specify repo")]
    #[diagnostic(code(parcel_fetch::missing_repo))]
    MissingRepo,

    #[error("must specify ref")]
    #[diagnostic(
        code(parcel_fetch::missing_ref),
        help("Append `@<branch|tag|commit>` to the repository location")
    )]
    MissingRef,

    #[error("must specify remote subdirectory")]
    #[diagnostic(
        code(parcel_fetch::missing_directory),
        help("Use `/` to fetch the repository root")
    )]
    MissingDirectory,

    #[error("must specify destination")]
    #[diagnostic(code(parcel_fetch::missing_destination))]
    MissingDestination,

    #[error("destination directory {} already exists", path.display())]
    #[diagnostic(
        code(parcel_fetch::destination_exists),
        help("Pass --clean to replace the existing directory")
    )]
    DestinationExists { path: PathBuf },

    #[error("destination {} is already being fetched", path.display())]
    #[diagnostic(code(parcel_fetch::busy))]
    Busy { path: PathBuf },

    #[error("failed to fetch `{git_ref}` from {repo}: {status}: {stderr}")]
    #[diagnostic(
        code(parcel_fetch::git),
        help("Check that the repository is reachable and the ref exists")
    )]
    Git {
        repo: String,
        git_ref: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to run `{}`", binary.display())]
    #[diagnostic(
        code(parcel_fetch::git_spawn),
        help("Install git or set `git_binary` in the configuration")
    )]
    GitSpawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("directory `{directory}` not found in {source_name}")]
    #[diagnostic(code(parcel_fetch::missing_subdirectory))]
    MissingSubdirectory {
        source_name: String,
        directory: String,
    },

    #[error("source directory {} does not exist", path.display())]
    #[diagnostic(code(parcel_fetch::missing_source))]
    MissingSource { path: PathBuf },

    #[error("sub-package cycle detected: {}", chain.join(" -> "))]
    #[diagnostic(
        code(parcel_fetch::cycle),
        help("A sub-package declaration points back at one of its ancestors")
    )]
    Cycle { chain: Vec<String> },

    #[error("sub-package nesting exceeds the maximum depth of {max} at {}", path.display())]
    #[diagnostic(
        code(parcel_fetch::too_deep),
        help("Raise `max_depth` in the configuration if this nesting is intended")
    )]
    TooDeep { max: usize, path: PathBuf },

    #[error("sub-package `{name}` declares no source")]
    #[diagnostic(
        code(parcel_fetch::no_subpackage_source),
        help("Set `repo` or `image` on sub-packages of packages read from a stream")
    )]
    NoSubpackageSource { name: String },

    #[error("cannot fetch a package from {kind}")]
    #[diagnostic(code(parcel_fetch::unsupported_source))]
    UnsupportedSource { kind: &'static str },

    #[error("fetch cancelled")]
    #[diagnostic(code(parcel_fetch::cancelled))]
    Cancelled,

    #[error("fetch timed out")]
    #[diagnostic(
        code(parcel_fetch::timed_out),
        help("Increase the timeout with --timeout or the `timeout` setting")
    )]
    TimedOut,

    #[error(transparent)]
    #[diagnostic(
        code(parcel_fetch::network),
        help("Check your internet connection or try again later")
    )]
    Network(#[from] Box<ureq::Error>),

    #[error("HTTP {status}: {url}")]
    #[diagnostic(code(parcel_fetch::http))]
    Http { status: u16, url: String },

    #[error("Invalid response from {url}: {reason}")]
    #[diagnostic(code(parcel_fetch::invalid_response))]
    InvalidResponse { url: String, reason: String },

    #[error("digest mismatch: expected {expected}, got {actual}")]
    #[diagnostic(code(parcel_fetch::digest_mismatch))]
    DigestMismatch { expected: String, actual: String },

    #[error("Failed to {action} `{}`", path.display())]
    #[diagnostic(code(parcel_fetch::io))]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid sub-package directory `{directory}`: {source}")]
    #[diagnostic(code(parcel_fetch::path))]
    Path {
        directory: String,
        #[source]
        source: PathError,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Location(#[from] LocationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    #[diagnostic(code(parcel_fetch::fs))]
    FileSystem(#[from] FileSystemError),
}

impl From<ureq::Error> for FetchError {
    fn from(e: ureq::Error) -> Self {
        Self::Network(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
