use std::{fmt, str::FromStr, sync::LazyLock};

use regex::Regex;

use crate::error::{LocationError, Result};

pub const DEFAULT_REGISTRY: &str = "index.docker.io";
pub const DEFAULT_TAG: &str = "latest";

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").unwrap());

static DIGEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(sha256:[a-f0-9]{64}|sha512:[a-f0-9]{128})$").unwrap()
});

static REPO_COMPONENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").unwrap());

static REGISTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9.-]+(?::[0-9]+)?$").unwrap());

/// Tag or content digest selecting one manifest of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageIdentifier {
    Tag(String),
    Digest(String),
}

impl ImageIdentifier {
    pub fn as_str(&self) -> &str {
        match self {
            ImageIdentifier::Tag(tag) => tag,
            ImageIdentifier::Digest(digest) => digest,
        }
    }
}

/// A container image reference decomposed into registry, repository and tag or digest.
///
/// Parsing follows the usual registry naming rules: a missing registry means Docker Hub,
/// single component Docker Hub names live under `library/`, and a missing tag means `latest`.
///
/// ```
/// use parcel_location::image::{ImageIdentifier, ImageReference};
///
/// let image: ImageReference = "ubuntu".parse().unwrap();
/// assert_eq!(image.registry, "index.docker.io");
/// assert_eq!(image.repository, "library/ubuntu");
/// assert_eq!(image.identifier, ImageIdentifier::Tag("latest".into()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub identifier: ImageIdentifier,
}

impl ImageReference {
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| LocationError::InvalidImage {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        if input.is_empty() {
            return Err(invalid("reference is empty"));
        }

        let (name, identifier) = if let Some((name, digest)) = input.split_once('@') {
            if !DIGEST_RE.is_match(digest) {
                return Err(invalid("digest must be sha256:<64 hex> or sha512:<128 hex>"));
            }
            (name, ImageIdentifier::Digest(digest.to_string()))
        } else {
            let last_slash = input.rfind('/').map(|i| i + 1).unwrap_or(0);
            match input[last_slash..].rfind(':') {
                Some(colon) => {
                    let split = last_slash + colon;
                    let tag = &input[split + 1..];
                    if !TAG_RE.is_match(tag) {
                        return Err(invalid("tag contains invalid characters"));
                    }
                    (&input[..split], ImageIdentifier::Tag(tag.to_string()))
                }
                None => (input, ImageIdentifier::Tag(DEFAULT_TAG.to_string())),
            }
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };

        if !REGISTRY_RE.is_match(&registry) {
            return Err(invalid("registry is not a valid host[:port]"));
        }
        let registry = if registry == "docker.io" {
            DEFAULT_REGISTRY.to_string()
        } else {
            registry
        };

        if repository.is_empty() {
            return Err(invalid("repository is empty"));
        }
        if let Some(bad) = repository
            .split('/')
            .find(|component| !REPO_COMPONENT_RE.is_match(component))
        {
            let reason = if bad.chars().any(|c| c.is_ascii_uppercase()) {
                "repository must be lowercase".to_string()
            } else {
                format!("repository component `{bad}` is invalid")
            };
            return Err(invalid(&reason));
        }

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository
        };

        Ok(Self {
            registry,
            repository,
            identifier,
        })
    }

    pub fn is_docker_hub(&self) -> bool {
        self.registry == DEFAULT_REGISTRY
    }

    /// Last path segment of the repository, used to name a fetched package.
    pub fn base_name(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository)
    }
}

impl FromStr for ImageReference {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        match &self.identifier {
            ImageIdentifier::Tag(tag) => write!(f, ":{tag}"),
            ImageIdentifier::Digest(digest) => write!(f, "@{digest}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:9f6ca9562c5e7bd8bb53d736a2869adc27529eb202996dfefb804ec2c95237ba";

    #[test]
    fn test_docker_hub_defaults() {
        let image = ImageReference::parse("ubuntu").unwrap();
        assert_eq!(image.registry, "index.docker.io");
        assert_eq!(image.repository, "library/ubuntu");
        assert_eq!(image.identifier, ImageIdentifier::Tag("latest".into()));
        assert!(image.is_docker_hub());
        assert_eq!(image.to_string(), "index.docker.io/library/ubuntu:latest");

        let image = ImageReference::parse("docker.io/org/app:1.0").unwrap();
        assert_eq!(image.registry, "index.docker.io");
        assert_eq!(image.repository, "org/app");
    }

    #[test]
    fn test_custom_registry_with_tag_and_port() {
        let image = ImageReference::parse("my-registry.local/name:tag").unwrap();
        assert_eq!(image.registry, "my-registry.local");
        assert_eq!(image.repository, "name");
        assert_eq!(image.identifier, ImageIdentifier::Tag("tag".into()));

        let image = ImageReference::parse("localhost:5000/team/pkg").unwrap();
        assert_eq!(image.registry, "localhost:5000");
        assert_eq!(image.repository, "team/pkg");
        assert_eq!(image.identifier.as_str(), "latest");
    }

    #[test]
    fn test_digest_reference() {
        let image = ImageReference::parse(&format!("my-registry.local/name@{DIGEST}")).unwrap();
        assert_eq!(image.identifier, ImageIdentifier::Digest(DIGEST.into()));
        assert_eq!(
            image.to_string(),
            format!("my-registry.local/name@{DIGEST}")
        );
    }

    #[test]
    fn test_invalid_references() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("Upper/Case").is_err());
        assert!(ImageReference::parse("name@sha256:short").is_err());
        assert!(ImageReference::parse("name:bad tag").is_err());
        assert!(ImageReference::parse("host.io/").is_err());
        assert!(ImageReference::parse("host.io/a//b").is_err());

        let err = ImageReference::parse("ghcr.io/Org/App").unwrap_err();
        assert!(err.to_string().contains("lowercase"));
    }

    #[test]
    fn test_equality_is_structural() {
        assert_eq!(
            ImageReference::parse("ubuntu").unwrap(),
            ImageReference::parse("index.docker.io/library/ubuntu:latest").unwrap()
        );
    }

    #[test]
    fn test_base_name() {
        let image = ImageReference::parse("ghcr.io/org/tools/kit:v2").unwrap();
        assert_eq!(image.base_name(), "kit");
        assert_eq!(image.repository, "org/tools/kit");
    }
}
