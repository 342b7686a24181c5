use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("unsupported location: {location}")]
    #[diagnostic(
        code(parcel_location::unsupported),
        help("Use oci://<image>[//<dir>], <repo>.git[/<dir>]@<ref> or a local path")
    )]
    Unsupported { location: String },

    #[error("invalid image reference `{input}`: {reason}")]
    #[diagnostic(
        code(parcel_location::image_reference),
        help("Expected [registry/]repository[:tag|@sha256:<digest>]")
    )]
    InvalidImage { input: String, reason: String },
}

pub type Result<T> = std::result::Result<T, LocationError>;
