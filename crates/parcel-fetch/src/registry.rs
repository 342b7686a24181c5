use std::{
    collections::HashMap,
    fs::File,
    io::{Read, Write},
    path::Path,
    sync::LazyLock,
};

use parcel_location::{ImageIdentifier, ImageReference};
use parcel_utils::fs::ensure_dir_exists;
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;
use ureq::{
    http::{
        header::{ACCEPT, AUTHORIZATION, WWW_AUTHENTICATE},
        Response,
    },
    Body,
};

use crate::{
    archive,
    cancel::Cancellation,
    error::{FetchError, Result},
    http_client::SHARED_AGENT,
};

const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
    application/vnd.docker.distribution.manifest.list.v2+json, \
    application/vnd.oci.image.manifest.v1+json, \
    application/vnd.oci.image.index.v1+json";

const DOCKER_HUB_API: &str = "registry-1.docker.io";
const ALWAYS_INSECURE: &[&str] = &["localhost", "127.0.0.1"];
const PREFERRED_OS: &str = "linux";
const PREFERRED_ARCH: &str = "amd64";

static CHALLENGE_PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)="([^"]*)""#).unwrap());

/// Progress callback receiving bytes downloaded so far and the expected total.
pub type PullProgress = dyn Fn(u64, u64) + Send + Sync;

/// Pulls container images.
pub trait ImageClient: Send + Sync {
    /// Unpacks the filesystem of `image` into `dest` and returns the digest of its manifest.
    fn pull(
        &self,
        image: &ImageReference,
        dest: &Path,
        cancel: &Cancellation,
        progress: &PullProgress,
    ) -> Result<String>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct OciDescriptor {
    #[serde(rename = "mediaType", default)]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub platform: Option<OciPlatform>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OciPlatform {
    pub os: String,
    pub architecture: String,
}

/// An image manifest or an index of per-platform manifests.
#[derive(Debug, Clone, Deserialize)]
pub struct OciManifest {
    #[serde(rename = "mediaType", default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub layers: Vec<OciDescriptor>,
    #[serde(default)]
    pub manifests: Vec<OciDescriptor>,
}

impl OciManifest {
    pub fn is_index(&self) -> bool {
        !self.manifests.is_empty()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// [`ImageClient`] speaking the OCI distribution API through the shared HTTP agent.
#[derive(Debug, Clone, Default)]
pub struct RegistryClient {
    insecure: Vec<String>,
}

impl RegistryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registries to reach over plain HTTP in addition to localhost.
    pub fn insecure_registries(mut self, registries: Vec<String>) -> Self {
        self.insecure = registries;
        self
    }

    fn is_insecure(&self, registry: &str) -> bool {
        let host = registry.split(':').next().unwrap_or(registry);
        ALWAYS_INSECURE.contains(&host)
            || self.insecure.iter().any(|r| r == registry || r == host)
    }

    /// Base URL of the repository API for `image`.
    pub fn repository_url(&self, image: &ImageReference) -> String {
        let scheme = if self.is_insecure(&image.registry) {
            "http"
        } else {
            "https"
        };
        let host = if image.is_docker_hub() {
            DOCKER_HUB_API
        } else {
            &image.registry
        };
        format!("{scheme}://{host}/v2/{}", image.repository)
    }
}

struct Session {
    base: String,
    repository: String,
    token: Option<String>,
}

impl Session {
    fn get(&mut self, url: &str, accept: Option<&str>) -> Result<Response<Body>> {
        let resp = self.send(url, accept)?;
        if resp.status().as_u16() != 401 || self.token.is_some() {
            return Ok(resp);
        }

        let challenge = resp
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_challenge)
            .ok_or_else(|| FetchError::Http {
                status: 401,
                url: url.to_string(),
            })?;
        self.token = Some(self.negotiate(&challenge)?);
        self.send(url, accept)
    }

    fn send(&self, url: &str, accept: Option<&str>) -> Result<Response<Body>> {
        let mut req = SHARED_AGENT.get(url);
        if let Some(accept) = accept {
            req = req.header(ACCEPT, accept);
        }
        if let Some(token) = &self.token {
            req = req.header(AUTHORIZATION, &format!("Bearer {token}"));
        }
        Ok(req.call()?)
    }

    fn negotiate(&self, challenge: &HashMap<String, String>) -> Result<String> {
        let realm = challenge.get("realm").ok_or_else(|| FetchError::InvalidResponse {
            url: self.base.clone(),
            reason: "authentication challenge has no realm".to_string(),
        })?;
        let scope = challenge
            .get("scope")
            .cloned()
            .unwrap_or_else(|| format!("repository:{}:pull", self.repository));

        let mut params = vec![("scope", scope.as_str())];
        if let Some(service) = challenge.get("service") {
            params.push(("service", service.as_str()));
        }
        let url = url::Url::parse_with_params(realm, &params).map_err(|err| {
            FetchError::InvalidResponse {
                url: realm.clone(),
                reason: err.to_string(),
            }
        })?;

        debug!("requesting registry token from {realm}");
        let mut resp = SHARED_AGENT.get(url.as_str()).call()?;
        if !resp.status().is_success() {
            return Err(FetchError::Http {
                status: resp.status().as_u16(),
                url: url.to_string(),
            });
        }

        let body: TokenResponse =
            resp.body_mut()
                .read_json()
                .map_err(|err| FetchError::InvalidResponse {
                    url: url.to_string(),
                    reason: err.to_string(),
                })?;
        body.token
            .or(body.access_token)
            .ok_or_else(|| FetchError::InvalidResponse {
                url: url.to_string(),
                reason: "token response carries no token".to_string(),
            })
    }

    fn manifest(&mut self, reference: &str) -> Result<(String, OciManifest)> {
        let url = format!("{}/manifests/{reference}", self.base);
        let mut resp = self.get(&url, Some(MANIFEST_ACCEPT))?;
        if !resp.status().is_success() {
            return Err(FetchError::Http {
                status: resp.status().as_u16(),
                url,
            });
        }

        let raw = resp
            .body_mut()
            .read_to_vec()
            .map_err(|err| FetchError::InvalidResponse {
                url: url.clone(),
                reason: err.to_string(),
            })?;
        let manifest = serde_json::from_slice(&raw).map_err(|err| FetchError::InvalidResponse {
            url,
            reason: err.to_string(),
        })?;
        Ok((sha256_digest(&raw), manifest))
    }

    /// Streams a blob into a temporary file next to `dir`, verifying its digest.
    fn blob(
        &mut self,
        layer: &OciDescriptor,
        dir: &Path,
        cancel: &Cancellation,
        on_chunk: &mut dyn FnMut(u64),
    ) -> Result<NamedTempFile> {
        let url = format!("{}/blobs/{}", self.base, layer.digest);
        let resp = self.get(&url, None)?;
        if !resp.status().is_success() {
            return Err(FetchError::Http {
                status: resp.status().as_u16(),
                url,
            });
        }

        let io_err = |source| FetchError::Io {
            action: "download blob into",
            path: dir.to_path_buf(),
            source,
        };
        let mut file = NamedTempFile::new_in(dir).map_err(io_err)?;
        let mut hasher = Sha256::new();
        let mut reader = resp.into_body().into_reader();
        let mut buffer = [0u8; 8192];

        loop {
            cancel.check()?;
            let n = reader.read(&mut buffer).map_err(io_err)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            file.write_all(&buffer[..n]).map_err(io_err)?;
            on_chunk(n as u64);
        }

        let actual = format!("sha256:{}", hex::encode(hasher.finalize()));
        if layer.digest.starts_with("sha256:") && actual != layer.digest {
            return Err(FetchError::DigestMismatch {
                expected: layer.digest.clone(),
                actual,
            });
        }
        Ok(file)
    }
}

impl ImageClient for RegistryClient {
    fn pull(
        &self,
        image: &ImageReference,
        dest: &Path,
        cancel: &Cancellation,
        progress: &PullProgress,
    ) -> Result<String> {
        cancel.check()?;
        let mut session = Session {
            base: self.repository_url(image),
            repository: image.repository.clone(),
            token: None,
        };

        let (digest, mut manifest) = session.manifest(image.identifier.as_str())?;
        if let ImageIdentifier::Digest(expected) = &image.identifier {
            verify_digest(expected, &digest)?;
        }

        if manifest.is_index() {
            let entry = select_platform(&manifest.manifests).ok_or_else(|| {
                FetchError::InvalidResponse {
                    url: session.base.clone(),
                    reason: "image index lists no manifests".to_string(),
                }
            })?;
            debug!("selected manifest {} from index", entry.digest);
            let (entry_digest, resolved) = session.manifest(&entry.digest)?;
            verify_digest(&entry.digest, &entry_digest)?;
            manifest = resolved;
        }

        if manifest.layers.is_empty() {
            return Err(FetchError::InvalidResponse {
                url: session.base.clone(),
                reason: "image has no layers".to_string(),
            });
        }

        ensure_dir_exists(dest)?;
        let scratch = dest.parent().unwrap_or(dest);
        let total: u64 = manifest.layers.iter().map(|l| l.size).sum();
        let mut done = 0u64;

        for layer in &manifest.layers {
            cancel.check()?;
            debug!("applying layer {}", layer.digest);
            let blob = session.blob(layer, scratch, cancel, &mut |n| {
                done += n;
                progress(done, total);
            })?;
            let file = File::open(blob.path()).map_err(|source| FetchError::Io {
                action: "open",
                path: blob.path().to_path_buf(),
                source,
            })?;
            archive::unpack(file, dest, true)?;
        }

        Ok(digest)
    }
}

fn sha256_digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

fn verify_digest(expected: &str, actual: &str) -> Result<()> {
    if expected.starts_with("sha256:") && expected != actual {
        return Err(FetchError::DigestMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Parses a `WWW-Authenticate: Bearer k="v",...` challenge into its parameters.
fn parse_challenge(header: &str) -> Option<HashMap<String, String>> {
    let (scheme, params) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(
        CHALLENGE_PARAM_RE
            .captures_iter(params)
            .map(|c| (c[1].to_string(), c[2].to_string()))
            .collect(),
    )
}

/// Picks the linux/amd64 entry of an index, falling back to the first one.
fn select_platform(entries: &[OciDescriptor]) -> Option<&OciDescriptor> {
    entries
        .iter()
        .find(|e| {
            e.platform
                .as_ref()
                .is_some_and(|p| p.os == PREFERRED_OS && p.architecture == PREFERRED_ARCH)
        })
        .or_else(|| entries.first())
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        fs,
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    };

    use tempfile::tempdir;

    use super::*;
    use crate::test_support::{serve, tar_bytes, Reply};

    fn descriptor(digest: &str, platform: Option<(&str, &str)>) -> OciDescriptor {
        OciDescriptor {
            media_type: String::new(),
            digest: digest.to_string(),
            size: 0,
            platform: platform.map(|(os, arch)| OciPlatform {
                os: os.to_string(),
                architecture: arch.to_string(),
            }),
        }
    }

    #[test]
    fn test_parse_challenge() {
        let params = parse_challenge(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/ubuntu:pull""#,
        )
        .unwrap();
        assert_eq!(params["realm"], "https://auth.docker.io/token");
        assert_eq!(params["service"], "registry.docker.io");
        assert_eq!(params["scope"], "repository:library/ubuntu:pull");

        assert!(parse_challenge("Basic realm=\"x\"").is_none());
    }

    #[test]
    fn test_select_platform() {
        let entries = vec![
            descriptor("sha256:arm", Some(("linux", "arm64"))),
            descriptor("sha256:amd", Some(("linux", "amd64"))),
        ];
        assert_eq!(select_platform(&entries).unwrap().digest, "sha256:amd");

        let entries = vec![descriptor("sha256:only", Some(("windows", "amd64")))];
        assert_eq!(select_platform(&entries).unwrap().digest, "sha256:only");
        assert!(select_platform(&[]).is_none());
    }

    #[test]
    fn test_repository_url() {
        let client = RegistryClient::new().insecure_registries(vec!["registry.lan".into()]);

        let hub = ImageReference::parse("ubuntu").unwrap();
        assert_eq!(
            client.repository_url(&hub),
            "https://registry-1.docker.io/v2/library/ubuntu"
        );

        let local = ImageReference::parse("localhost:5000/team/pkg").unwrap();
        assert_eq!(
            client.repository_url(&local),
            "http://localhost:5000/v2/team/pkg"
        );

        let lan = ImageReference::parse("registry.lan:8080/pkg").unwrap();
        assert!(client.repository_url(&lan).starts_with("http://"));
    }

    #[test]
    fn test_pull_with_token_and_whiteouts() {
        let base = tar_bytes(&[("pkg/a.txt", "a"), ("pkg/old.txt", "old")]);
        let upper = tar_bytes(&[("pkg/.wh.old.txt", ""), ("pkg/b.txt", "b")]);
        let base_digest = sha256_digest(&base);
        let upper_digest = sha256_digest(&upper);

        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "layers": [
                { "mediaType": "application/vnd.oci.image.layer.v1.tar", "digest": base_digest, "size": base.len() },
                { "mediaType": "application/vnd.oci.image.layer.v1.tar", "digest": upper_digest, "size": upper.len() },
            ]
        })
        .to_string()
        .into_bytes();
        let manifest_digest = sha256_digest(&manifest);

        let mut blobs = HashMap::new();
        blobs.insert(format!("/v2/team/pkg/blobs/{base_digest}"), base);
        blobs.insert(format!("/v2/team/pkg/blobs/{upper_digest}"), upper);
        blobs.insert("/v2/team/pkg/manifests/v1".to_string(), manifest);

        let addr = serve(move |path, auth, addr| {
            if path.starts_with("/token") {
                return Reply::ok(br#"{"token":"secret"}"#.to_vec());
            }
            if auth != Some("Bearer secret") {
                return Reply::status(401).header(
                    "WWW-Authenticate",
                    &format!(r#"Bearer realm="http://{addr}/token",service="test""#),
                );
            }
            match blobs.get(path) {
                Some(body) => Reply::ok(body.clone()),
                None => Reply::status(404),
            }
        });

        let image = ImageReference::parse(&format!("{addr}/team/pkg:v1")).unwrap();
        let work = tempdir().unwrap();
        let dest = work.path().join("rootfs");
        let seen = Arc::new(Mutex::new(0u64));
        let seen_cb = seen.clone();

        let digest = RegistryClient::new()
            .pull(&image, &dest, &Cancellation::new(), &move |done, _| {
                *seen_cb.lock().unwrap() = done;
            })
            .unwrap();

        assert_eq!(digest, manifest_digest);
        assert_eq!(fs::read_to_string(dest.join("pkg/a.txt")).unwrap(), "a");
        assert_eq!(fs::read_to_string(dest.join("pkg/b.txt")).unwrap(), "b");
        assert!(!dest.join("pkg/old.txt").exists());
        assert!(*seen.lock().unwrap() > 0);
    }

    #[test]
    fn test_pull_rejects_corrupt_blob() {
        let layer = tar_bytes(&[("a.txt", "a")]);
        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "layers": [{ "digest": format!("sha256:{}", "0".repeat(64)), "size": layer.len() }]
        })
        .to_string()
        .into_bytes();

        let addr = serve(move |path, _, _| {
            if path.contains("/manifests/") {
                Reply::ok(manifest.clone())
            } else {
                Reply::ok(layer.clone())
            }
        });

        let image = ImageReference::parse(&format!("{addr}/team/pkg")).unwrap();
        let work = tempdir().unwrap();
        let err = RegistryClient::new()
            .pull(&image, &work.path().join("rootfs"), &Cancellation::new(), &|_, _| {})
            .unwrap_err();
        assert!(matches!(err, FetchError::DigestMismatch { .. }));
    }

    #[test]
    fn test_pull_aborts_mid_blob() {
        let layer = vec![0u8; 128 * 1024];
        let layer_digest = sha256_digest(&layer);
        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "layers": [{ "digest": layer_digest, "size": layer.len() }]
        })
        .to_string()
        .into_bytes();

        let addr = serve(move |path, _, _| {
            if path.contains("/manifests/") {
                Reply::ok(manifest.clone())
            } else {
                Reply::ok(layer.clone()).trickle(Duration::from_millis(100))
            }
        });

        let image = ImageReference::parse(&format!("{addr}/team/slow:v1")).unwrap();
        let work = tempdir().unwrap();
        let cancel = Cancellation::new().with_timeout(Duration::from_millis(300));
        let received = Arc::new(Mutex::new(0u64));
        let received_cb = received.clone();

        let started = Instant::now();
        let err = RegistryClient::new()
            .pull(&image, &work.path().join("rootfs"), &cancel, &move |done, _| {
                *received_cb.lock().unwrap() = done;
            })
            .unwrap_err();

        assert!(matches!(err, FetchError::TimedOut), "{err}");
        assert!(started.elapsed() < Duration::from_secs(6));
        assert!(*received.lock().unwrap() < 128 * 1024);

        let entries: Vec<_> = fs::read_dir(work.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["rootfs".to_string()]);
    }

    #[test]
    fn test_pull_missing_manifest() {
        let addr = serve(|_, _, _| Reply::status(404));
        let image = ImageReference::parse(&format!("{addr}/team/missing:v9")).unwrap();
        let work = tempdir().unwrap();
        let err = RegistryClient::new()
            .pull(&image, work.path(), &Cancellation::new(), &|_, _| {})
            .unwrap_err();
        assert!(matches!(err, FetchError::Http { status: 404, .. }));
    }
}
