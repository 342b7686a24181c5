//! Typed package location references.
//!
//! A raw location string such as `oci://ghcr.io/org/pkg//config:v1`,
//! `https://github.com/org/repo.git/pkgs/app@main` or `./local/dir` is turned into a
//! [`Reference`] by [`parse`], which runs a fixed, ordered chain of scheme matchers.

pub mod error;
pub mod image;
pub mod parser;
pub mod reference;

pub use error::{LocationError, Result};
pub use image::{ImageIdentifier, ImageReference};
pub use parser::{parse, ParseOptions, Schemes};
pub use reference::{
    DuplexStream, GitReference, InputStream, OciReference, OutputStream, Reference,
};
