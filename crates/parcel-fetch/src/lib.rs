pub mod archive;
pub mod cancel;
pub mod error;
pub mod fetcher;
pub mod git;
pub mod http_client;
pub mod registry;

#[cfg(test)]
mod test_support;

pub use cancel::Cancellation;
pub use error::{FetchError, Result};
pub use fetcher::{default_destination, validate, FetchOptions, FetchReport, Fetcher};
pub use git::{GitCli, GitClient};
pub use registry::{ImageClient, PullProgress, RegistryClient};
