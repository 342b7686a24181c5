use miette::Diagnostic;
use parcel_config::error::ConfigError;
use parcel_fetch::FetchError;
use parcel_location::LocationError;
use parcel_manifest::ManifestError;
use parcel_utils::error::{PathError, UtilsError};
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum CliError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Location(#[from] LocationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    #[diagnostic(code(parcel::utils))]
    Utils(#[from] UtilsError),

    #[error("Failed to {action}")]
    #[diagnostic(code(parcel::io))]
    Io {
        action: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(code(parcel::json))]
    Json(#[from] serde_json::Error),

    #[error("Invalid timeout `{0}`")]
    #[diagnostic(
        code(parcel::invalid_timeout),
        help("Use a duration such as 90s, 10m or 1h30m")
    )]
    InvalidTimeout(String),

    #[error("Cannot derive a destination from `{0}`")]
    #[diagnostic(
        code(parcel::no_destination),
        help("Pass a destination directory explicitly")
    )]
    NoDestination(String),

    #[error("Invalid proxy `{proxy}`")]
    #[diagnostic(code(parcel::proxy))]
    Proxy {
        proxy: String,
        #[source]
        source: ureq::Error,
    },

    #[error("{0}")]
    #[diagnostic(code(parcel::custom))]
    Custom(String),
}

impl From<PathError> for CliError {
    fn from(err: PathError) -> Self {
        CliError::Utils(err.into())
    }
}

pub type Result<T> = std::result::Result<T, CliError>;

pub trait ErrorContext<T> {
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: FnOnce() -> String;
}

impl<T> ErrorContext<T> for std::io::Result<T> {
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: FnOnce() -> String,
    {
        self.map_err(|err| CliError::Io {
            action: context(),
            source: err,
        })
    }
}
