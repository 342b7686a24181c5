//! Package descriptors for parcel.
//!
//! Every package carries a `Parcelfile` at its root recording its name, where it was fetched
//! from, the setters it exposes and the remote sub-packages it declares.

pub mod error;
pub mod manifest;
pub mod setters;
pub mod tree;

pub use error::{ManifestError, Result};
pub use manifest::{
    GitUpstream, Manifest, Metadata, OciUpstream, Setter, SetterDefault, SetterRef, Subpackage,
    Upstream, DEFAULT_STRATEGY, MANIFEST_FILE,
};
pub use setters::{annotate, apply_setter_defaults};
pub use tree::{find_packages, nested_packages, PackageNode};
