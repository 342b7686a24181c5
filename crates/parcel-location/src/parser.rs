use std::{
    io::{Read, Write},
    ops::BitOr,
    path::PathBuf,
    str::FromStr,
    sync::LazyLock,
};

use regex::Regex;

use crate::{
    error::{LocationError, Result},
    image::ImageReference,
    reference::{
        DuplexStream, GitReference, InputStream, OciReference, OutputStream, Reference,
    },
};

const OCI_PREFIX: &str = "oci://";

static GIT_HEAD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<repo>.+?)\.git(?P<dir>/.*)?$").unwrap());

static SCP_LIKE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+@[A-Za-z0-9_.-]+:").unwrap());

/// Set of location schemes the parser may recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schemes(u8);

impl Schemes {
    pub const NONE: Schemes = Schemes(0);
    pub const STREAM: Schemes = Schemes(1);
    pub const OCI: Schemes = Schemes(1 << 1);
    pub const GIT: Schemes = Schemes(1 << 2);
    pub const DIR: Schemes = Schemes(1 << 3);
    pub const ALL: Schemes = Schemes(0b1111);

    pub fn contains(self, other: Schemes) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn without(self, other: Schemes) -> Schemes {
        Schemes(self.0 & !other.0)
    }
}

impl Default for Schemes {
    fn default() -> Self {
        Schemes::ALL
    }
}

impl BitOr for Schemes {
    type Output = Schemes;

    fn bitor(self, rhs: Self) -> Self::Output {
        Schemes(self.0 | rhs.0)
    }
}

/// Per-invocation parser configuration.
///
/// Stream semantics for `-` are opt in: without a reader or writer attached, `-` is an
/// ordinary directory name.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    stdin: Option<InputStream>,
    stdout: Option<OutputStream>,
    schemes: Schemes,
}

impl ParseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdin<R: Read + Send + 'static>(mut self, reader: R) -> Self {
        self.stdin = Some(InputStream::new(reader));
        self
    }

    pub fn stdout<W: Write + Send + 'static>(mut self, writer: W) -> Self {
        self.stdout = Some(OutputStream::new(writer));
        self
    }

    pub fn input_stream(mut self, stream: InputStream) -> Self {
        self.stdin = Some(stream);
        self
    }

    pub fn output_stream(mut self, stream: OutputStream) -> Self {
        self.stdout = Some(stream);
        self
    }

    pub fn schemes(mut self, schemes: Schemes) -> Self {
        self.schemes = schemes;
        self
    }
}

type Matcher = fn(&str, &ParseOptions) -> Option<Result<Reference>>;

/// Matchers in precedence order; the first one that claims the input decides the result.
const MATCHERS: [(Schemes, Matcher); 4] = [
    (Schemes::STREAM, match_stream),
    (Schemes::OCI, match_oci),
    (Schemes::GIT, match_git),
    (Schemes::DIR, match_dir),
];

/// Parses a raw location string into a [`Reference`].
///
/// # Errors
///
/// * [`LocationError::InvalidImage`] for a malformed `oci://` image
/// * [`LocationError::Unsupported`] when no enabled matcher accepts the input
///
/// # Example
///
/// ```
/// use parcel_location::{parse, ParseOptions, Reference};
///
/// let reference = parse("https://github.com/org/repo.git/pkg@main", &ParseOptions::new()).unwrap();
/// match reference {
///     Reference::Git(git) => {
///         assert_eq!(git.repo, "https://github.com/org/repo");
///         assert_eq!(git.directory, "pkg");
///         assert_eq!(git.git_ref, "main");
///     }
///     _ => unreachable!(),
/// }
/// ```
pub fn parse(location: &str, options: &ParseOptions) -> Result<Reference> {
    for (scheme, matcher) in MATCHERS {
        if !options.schemes.contains(scheme) {
            continue;
        }
        if let Some(result) = matcher(location, options) {
            return result;
        }
    }

    Err(LocationError::Unsupported {
        location: location.to_string(),
    })
}

impl FromStr for Reference {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self> {
        parse(s, &ParseOptions::default())
    }
}

fn match_stream(location: &str, options: &ParseOptions) -> Option<Result<Reference>> {
    if location != "-" {
        return None;
    }

    let reference = match (&options.stdin, &options.stdout) {
        (Some(input), Some(output)) => Reference::DuplexStream(DuplexStream {
            input: input.clone(),
            output: output.clone(),
        }),
        (Some(input), None) => Reference::InputStream(input.clone()),
        (None, Some(output)) => Reference::OutputStream(output.clone()),
        (None, None) => return None,
    };

    Some(Ok(reference))
}

fn match_oci(location: &str, _: &ParseOptions) -> Option<Result<Reference>> {
    let rest = location.strip_prefix(OCI_PREFIX)?;
    Some(parse_oci(rest))
}

fn parse_oci(rest: &str) -> Result<Reference> {
    let (image, directory) = match rest.split_once("//") {
        Some((image, subpath)) => {
            let (subpath, identifier) = split_trailing_identifier(subpath);
            let image = match identifier {
                Some(identifier) => format!("{image}{identifier}"),
                None => image.to_string(),
            };
            (image, normalize_subpath(subpath))
        }
        None => (rest.to_string(), ".".to_string()),
    };

    Ok(Reference::Oci(OciReference {
        image: ImageReference::parse(&image)?,
        directory,
    }))
}

/// Splits a `@digest` or last-segment `:tag` off the end of an OCI subpath.
fn split_trailing_identifier(subpath: &str) -> (&str, Option<&str>) {
    if let Some(at) = subpath.rfind('@') {
        return (&subpath[..at], Some(&subpath[at..]));
    }

    let segment_start = subpath.rfind('/').map(|i| i + 1).unwrap_or(0);
    match subpath[segment_start..].find(':') {
        Some(colon) => {
            let split = segment_start + colon;
            (&subpath[..split], Some(&subpath[split..]))
        }
        None => (subpath, None),
    }
}

fn normalize_subpath(subpath: &str) -> String {
    let parts: Vec<&str> = subpath
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

fn match_git(location: &str, _: &ParseOptions) -> Option<Result<Reference>> {
    let (head, git_ref) = location.rsplit_once('@')?;
    if git_ref.is_empty() {
        return None;
    }

    let captures = GIT_HEAD_RE.captures(head)?;
    let repo = captures.name("repo")?.as_str();
    if !is_repo_shape(repo) {
        return None;
    }

    let directory = captures
        .name("dir")
        .map(|dir| dir.as_str().trim_matches('/'))
        .filter(|dir| !dir.is_empty())
        .unwrap_or(".");

    Some(Ok(Reference::Git(GitReference::new(
        repo, git_ref, directory,
    ))))
}

fn is_repo_shape(repo: &str) -> bool {
    if repo.starts_with('/') || SCP_LIKE_RE.is_match(repo) {
        return true;
    }

    match url::Url::parse(repo) {
        Ok(url) => url.scheme() == "file" || url.has_host(),
        Err(_) => false,
    }
}

fn match_dir(location: &str, _: &ParseOptions) -> Option<Result<Reference>> {
    Some(Ok(Reference::Dir {
        directory: PathBuf::from(location),
    }))
}
