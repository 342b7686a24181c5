use std::{
    collections::HashSet,
    fs,
    path::{Component, Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use parcel_events::{
    next_operation_id, EventSinkHandle, FetchEvent, NullSink, OperationId, RetrieveStage,
};
use parcel_location::{GitReference, ImageIdentifier, ImageReference, OciReference, Reference};
use parcel_manifest::{apply_setter_defaults, nested_packages, Manifest, Subpackage, Upstream};
use parcel_utils::{
    error::PathError,
    fs::{copy_dir, ensure_dir_exists, replace_dir, safe_remove},
    path::{base_name, normalize_relative, normalize_source_path},
};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::{
    archive,
    cancel::Cancellation,
    error::{FetchError, Result},
    git::GitClient,
    registry::ImageClient,
};

const STAGING_PREFIX: &str = ".parcel-";
const STAGED_PACKAGE: &str = "package";
const VCS_DIR: &str = ".git";
const DEFAULT_MAX_DEPTH: usize = 16;

/// Per-call fetch settings.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Replace an existing destination once the new content is fully fetched.
    pub clean: bool,
    /// Fetch sibling sub-packages concurrently.
    pub parallel: bool,
    pub max_depth: usize,
    pub cancel: Cancellation,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            clean: false,
            parallel: false,
            max_depth: DEFAULT_MAX_DEPTH,
            cancel: Cancellation::new(),
        }
    }
}

impl FetchOptions {
    pub fn clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn cancel(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Outcome of a successful top-level fetch.
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub destination: PathBuf,
    pub name: String,
    pub upstream: Option<Upstream>,
    /// Packages materialized, the root included.
    pub packages: usize,
}

/// Where a materialized package came from, used to derive its sub-package sources.
#[derive(Debug, Clone)]
enum Origin {
    Git(GitReference),
    Oci {
        reference: OciReference,
        digest: String,
    },
    Dir(PathBuf),
    Stream,
}

impl Origin {
    fn upstream(&self) -> Option<Upstream> {
        match self {
            Origin::Git(git) => Some(Upstream::git(git)),
            Origin::Oci { reference, digest } => Some(Upstream::oci(reference, digest.clone())),
            Origin::Dir(_) | Origin::Stream => None,
        }
    }

    /// The same source, narrowed to a directory below the package.
    fn narrow(&self, relative: &Path) -> Origin {
        let relative = relative.to_string_lossy();
        match self {
            Origin::Git(git) => {
                let mut git = git.clone();
                git.directory = join_directory(&git.directory, &relative);
                Origin::Git(git)
            }
            Origin::Oci { reference, digest } => {
                let mut reference = reference.clone();
                reference.directory = join_directory(&reference.directory, &relative);
                Origin::Oci {
                    reference,
                    digest: digest.clone(),
                }
            }
            Origin::Dir(path) => Origin::Dir(path.join(relative.as_ref())),
            Origin::Stream => Origin::Stream,
        }
    }

    fn subpackage(&self, sub: &Subpackage) -> Result<Reference> {
        if let Some(repo) = &sub.repo {
            let directory = sub.source_directory.as_deref().unwrap_or("/");
            return Ok(GitReference::new(repo, &sub.git_ref, directory).into());
        }
        if let Some(image) = &sub.image {
            return Ok(OciReference {
                image: ImageReference::parse(image)?,
                directory: sub.source_directory.clone().unwrap_or_else(|| ".".into()),
            }
            .into());
        }

        match self {
            Origin::Git(parent) => {
                let git_ref = if sub.git_ref.is_empty() {
                    parent.git_ref.clone()
                } else {
                    sub.git_ref.clone()
                };
                let directory = sub
                    .source_directory
                    .clone()
                    .unwrap_or_else(|| join_directory(&parent.directory, &sub.directory));
                Ok(GitReference::new(&parent.repo, git_ref, directory).into())
            }
            Origin::Oci { reference, .. } => {
                let mut image = reference.image.clone();
                if !sub.git_ref.is_empty() {
                    image.identifier = if sub.git_ref.contains(':') {
                        ImageIdentifier::Digest(sub.git_ref.clone())
                    } else {
                        ImageIdentifier::Tag(sub.git_ref.clone())
                    };
                }
                let directory = sub
                    .source_directory
                    .clone()
                    .unwrap_or_else(|| join_directory(&reference.directory, &sub.directory));
                Ok(OciReference { image, directory }.into())
            }
            Origin::Dir(path) => {
                let relative = sub.source_directory.as_deref().unwrap_or(&sub.directory);
                Ok(Reference::Dir {
                    directory: path.join(relative.trim_start_matches('/')),
                })
            }
            Origin::Stream => Err(FetchError::NoSubpackageSource {
                name: sub.name.clone(),
            }),
        }
    }
}

/// Joins a directory below `base` inside a source tree, where `/` is the source root.
fn join_directory(base: &str, relative: &str) -> String {
    let relative = relative.trim_matches('/');
    let relative = relative.strip_prefix("./").unwrap_or(relative);
    if relative.is_empty() || relative == "." {
        return base.to_string();
    }
    match base.trim_end_matches('/') {
        "" => format!("/{relative}"),
        "." => relative.to_string(),
        base => format!("{base}/{relative}"),
    }
}

/// Checks the required fields of `reference` and `destination` before anything touches disk.
pub fn validate(reference: &Reference, destination: &Path) -> Result<()> {
    match reference {
        Reference::Git(git) => {
            if git.repo.trim().is_empty() {
                return Err(FetchError::MissingRepo);
            }
            if git.git_ref.trim().is_empty() {
                return Err(FetchError::MissingRef);
            }
            if git.directory.trim().is_empty() {
                return Err(FetchError::MissingDirectory);
            }
        }
        Reference::Oci(oci) if oci.directory.trim().is_empty() => {
            return Err(FetchError::MissingDirectory);
        }
        _ => {}
    }
    if destination.as_os_str().is_empty() {
        return Err(FetchError::MissingDestination);
    }
    Ok(())
}

fn subdirectory_name(directory: &str) -> Option<&str> {
    let trimmed = directory.trim_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        None
    } else {
        base_name(trimmed)
    }
}

/// Name of the directory a package is fetched into when the caller gives none.
///
/// A non-root source directory names the package after its last segment; a root fetch is
/// named after the repository or image.
pub fn default_destination(reference: &Reference) -> Option<String> {
    match reference {
        Reference::Git(git) => subdirectory_name(&git.directory)
            .or_else(|| base_name(&git.repo))
            .map(str::to_string),
        Reference::Oci(oci) => Some(
            subdirectory_name(&oci.directory)
                .unwrap_or_else(|| oci.image.base_name())
                .to_string(),
        ),
        Reference::Dir { directory } => fs::canonicalize(directory)
            .ok()
            .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned())),
        Reference::InputStream(_) | Reference::OutputStream(_) | Reference::DuplexStream(_) => {
            None
        }
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn source_subdirectory(root: &Path, directory: &str, source_name: &str) -> Result<PathBuf> {
    let missing = || FetchError::MissingSubdirectory {
        source_name: source_name.to_string(),
        directory: directory.to_string(),
    };
    let relative = normalize_source_path(directory).map_err(|_| missing())?;
    let path = root.join(relative);
    if path.is_dir() {
        Ok(path)
    } else {
        Err(missing())
    }
}

/// Removes `.` and resolves `..` without touching the filesystem.
fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    cleaned.push(component);
                }
            }
            other => cleaned.push(other),
        }
    }
    cleaned
}

fn source_key(directory: &str) -> String {
    normalize_source_path(directory)
        .map(|path| {
            path.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_else(|_| directory.to_string())
}

/// Identifies the source of a package in the active chain, independent of how its location
/// was spelled.
fn cycle_key(reference: &Reference) -> String {
    match reference {
        Reference::Git(git) => {
            let repo = git.repo.trim_end_matches('/');
            let repo = repo.strip_suffix(".git").unwrap_or(repo);
            match source_key(&git.directory).as_str() {
                "" => format!("{repo}.git@{}", git.git_ref),
                dir => format!("{repo}.git/{dir}@{}", git.git_ref),
            }
        }
        Reference::Oci(oci) => match source_key(&oci.directory).as_str() {
            "" => format!("oci://{}", oci.image),
            dir => format!("oci://{}//{dir}", oci.image),
        },
        Reference::Dir { directory } => {
            let absolute = std::path::absolute(directory).unwrap_or_else(|_| directory.clone());
            clean_path(&absolute).display().to_string()
        }
        Reference::InputStream(_) | Reference::OutputStream(_) | Reference::DuplexStream(_) => {
            reference.to_string()
        }
    }
}

#[derive(Debug, Clone)]
struct Job {
    reference: Reference,
    destination: PathBuf,
    /// Declared sub-package name.
    name: Option<String>,
    chain: Vec<String>,
    depth: usize,
}

struct Fetched {
    op_id: OperationId,
    name: String,
    upstream: Option<Upstream>,
    count: usize,
}

struct Operation {
    id: OperationId,
    name: String,
}

struct DestinationGuard<'a> {
    active: &'a Mutex<HashSet<PathBuf>>,
    path: PathBuf,
}

impl Drop for DestinationGuard<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
    }
}

/// Fetches packages and their declared sub-packages into local directories.
///
/// Every package is assembled in a staging directory next to its destination and moved into
/// place only once it is complete, so a failed fetch leaves the destination as it was.
pub struct Fetcher {
    git: Arc<dyn GitClient>,
    images: Arc<dyn ImageClient>,
    events: EventSinkHandle,
    active: Mutex<HashSet<PathBuf>>,
}

impl Fetcher {
    pub fn new(git: impl GitClient + 'static, images: impl ImageClient + 'static) -> Self {
        Self {
            git: Arc::new(git),
            images: Arc::new(images),
            events: Arc::new(NullSink),
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_events(mut self, events: EventSinkHandle) -> Self {
        self.events = events;
        self
    }

    /// Fetches `reference` into `destination`, including every sub-package it declares.
    pub fn fetch(
        &self,
        reference: &Reference,
        destination: &Path,
        options: &FetchOptions,
    ) -> Result<FetchReport> {
        validate(reference, destination)?;

        let destination = std::path::absolute(destination).map_err(|source| FetchError::Io {
            action: "resolve",
            path: destination.to_path_buf(),
            source,
        })?;
        if fs::symlink_metadata(&destination).is_ok() && !options.clean {
            return Err(FetchError::DestinationExists { path: destination });
        }

        let _guard = self.claim(&destination)?;

        let fetched = self.fetch_package(
            Job {
                reference: reference.clone(),
                destination: destination.clone(),
                name: None,
                chain: Vec::new(),
                depth: 0,
            },
            options,
        )?;

        info!(
            package = %fetched.name,
            "fetched {} package{} into {}",
            fetched.count,
            if fetched.count == 1 { "" } else { "s" },
            destination.display()
        );

        Ok(FetchReport {
            destination,
            name: fetched.name,
            upstream: fetched.upstream,
            packages: fetched.count,
        })
    }

    fn claim(&self, path: &Path) -> Result<DestinationGuard<'_>> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active
            .iter()
            .any(|p| p.starts_with(path) || path.starts_with(p))
        {
            return Err(FetchError::Busy {
                path: path.to_path_buf(),
            });
        }
        active.insert(path.to_path_buf());
        Ok(DestinationGuard {
            active: &self.active,
            path: path.to_path_buf(),
        })
    }

    fn emit_stage(&self, op: &Operation, stage: RetrieveStage) {
        debug!(package = %op.name, "{}", stage.as_str());
        self.events.emit(FetchEvent::Retrieving {
            op_id: op.id,
            name: op.name.clone(),
            stage,
        });
    }

    fn fetch_package(&self, job: Job, options: &FetchOptions) -> Result<Fetched> {
        let op = Operation {
            id: next_operation_id(),
            name: job
                .name
                .clone()
                .or_else(|| file_name(&job.destination))
                .unwrap_or_default(),
        };
        self.events.emit(FetchEvent::PackageStarted {
            op_id: op.id,
            name: op.name.clone(),
            source: job.reference.to_string(),
            depth: job.depth,
        });

        let result = self.materialize(&job, &op, options);
        match &result {
            Ok(fetched) => self.events.emit(FetchEvent::Completed {
                op_id: op.id,
                name: fetched.name.clone(),
                destination: job.destination.display().to_string(),
            }),
            Err(err) => {
                debug!(package = %op.name, "failed at depth {}: {err}", job.depth);
                self.events.emit(FetchEvent::Failed {
                    op_id: op.id,
                    name: op.name.clone(),
                    error: err.to_string(),
                })
            }
        }
        result
    }

    fn materialize(&self, job: &Job, op: &Operation, options: &FetchOptions) -> Result<Fetched> {
        options.cancel.check()?;

        if job.depth > options.max_depth {
            return Err(FetchError::TooDeep {
                max: options.max_depth,
                path: job.destination.clone(),
            });
        }

        let key = cycle_key(&job.reference);
        let mut chain = job.chain.clone();
        let cyclic = chain.contains(&key);
        chain.push(key);
        if cyclic {
            return Err(FetchError::Cycle { chain });
        }

        let parent = job
            .destination
            .parent()
            .ok_or(FetchError::MissingDestination)?;
        ensure_dir_exists(parent)?;

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(parent)
            .map_err(|source| FetchError::Io {
                action: "create staging directory in",
                path: parent.to_path_buf(),
                source,
            })?;
        let staged = staging.path().join(STAGED_PACKAGE);

        let origin = self.retrieve(&job.reference, staging.path(), &staged, op, options)?;

        let mut manifest = Manifest::read(&staged)?.unwrap_or_default();
        let name = match &job.name {
            Some(name) => name.clone(),
            None if manifest.has_explicit_name() => manifest.metadata.name.clone(),
            None => file_name(&job.destination).unwrap_or_default(),
        };
        manifest.metadata.name = name.clone();
        manifest.upstream = origin.upstream();

        let children = self.resolve_children(
            &staged,
            &manifest.subpackages,
            &origin,
            &chain,
            job.depth,
            op,
            options,
        )?;

        self.emit_stage(op, RetrieveStage::WritingManifest);
        manifest.write(&staged)?;

        options.cancel.check()?;
        replace_dir(&staged, &job.destination)?;

        Ok(Fetched {
            op_id: op.id,
            name,
            upstream: manifest.upstream,
            count: 1 + children,
        })
    }

    fn retrieve(
        &self,
        reference: &Reference,
        staging: &Path,
        staged: &Path,
        op: &Operation,
        options: &FetchOptions,
    ) -> Result<Origin> {
        match reference {
            Reference::Git(git) => {
                self.emit_stage(op, RetrieveStage::Cloning);
                let checkout = staging.join("checkout");
                let commit = self
                    .git
                    .checkout(&git.repo, &git.git_ref, &checkout, &options.cancel)?;
                self.events.emit(FetchEvent::Resolved {
                    op_id: op.id,
                    name: op.name.clone(),
                    revision: commit.clone(),
                });

                let source_name = format!("{}@{}", git.repo, git.git_ref);
                let source = source_subdirectory(&checkout, &git.directory, &source_name)?;
                copy_dir(&source, staged, &[VCS_DIR])?;
                safe_remove(&checkout)?;

                Ok(Origin::Git(git.clone().with_commit(commit)))
            }
            Reference::Oci(oci) => {
                self.emit_stage(op, RetrieveStage::Pulling);
                let rootfs = staging.join("rootfs");
                let events = self.events.clone();
                let (op_id, name) = (op.id, op.name.clone());
                let digest = self.images.pull(
                    &oci.image,
                    &rootfs,
                    &options.cancel,
                    &move |current, total| {
                        events.emit(FetchEvent::BlobProgress {
                            op_id,
                            name: name.clone(),
                            current,
                            total,
                        })
                    },
                )?;
                self.events.emit(FetchEvent::Resolved {
                    op_id: op.id,
                    name: op.name.clone(),
                    revision: digest.clone(),
                });

                self.emit_stage(op, RetrieveStage::Extracting);
                let source = source_subdirectory(&rootfs, &oci.directory, &oci.image.to_string())?;
                copy_dir(&source, staged, &[VCS_DIR])?;
                safe_remove(&rootfs)?;

                Ok(Origin::Oci {
                    reference: oci.clone(),
                    digest,
                })
            }
            Reference::Dir { directory } => {
                if !directory.is_dir() {
                    return Err(FetchError::MissingSource {
                        path: directory.clone(),
                    });
                }
                self.emit_stage(op, RetrieveStage::Copying);

                // The staging directory may sit inside the source tree.
                let staging_name = staging
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                copy_dir(directory, staged, &[VCS_DIR, staging_name.as_str()])?;

                let source = std::path::absolute(directory).map_err(|source| FetchError::Io {
                    action: "resolve",
                    path: directory.clone(),
                    source,
                })?;
                Ok(Origin::Dir(source))
            }
            Reference::InputStream(input) => {
                self.emit_stage(op, RetrieveStage::Extracting);
                let mut reader = input
                    .reader()
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                archive::unpack(&mut *reader, staged, false)?;
                Ok(Origin::Stream)
            }
            Reference::OutputStream(_) | Reference::DuplexStream(_) => {
                Err(FetchError::UnsupportedSource {
                    kind: reference.kind(),
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_children(
        &self,
        package_dir: &Path,
        subpackages: &[Subpackage],
        origin: &Origin,
        chain: &[String],
        depth: usize,
        op: &Operation,
        options: &FetchOptions,
    ) -> Result<usize> {
        let mut placements: Vec<PathBuf> = Vec::with_capacity(subpackages.len());
        let mut jobs = Vec::with_capacity(subpackages.len());

        for sub in subpackages {
            let placement =
                normalize_relative(&sub.directory).map_err(|source| FetchError::Path {
                    directory: sub.directory.clone(),
                    source,
                })?;
            if placement.as_os_str().is_empty() {
                return Err(FetchError::Path {
                    directory: sub.directory.clone(),
                    source: PathError::Empty,
                });
            }
            if placements
                .iter()
                .any(|p| p.starts_with(&placement) || placement.starts_with(p))
            {
                return Err(FetchError::Busy {
                    path: package_dir.join(&placement),
                });
            }

            let reference = origin.subpackage(sub)?;
            validate(&reference, &placement)?;

            jobs.push((
                sub,
                Job {
                    reference,
                    destination: package_dir.join(&placement),
                    name: Some(sub.name.clone()).filter(|n| !n.trim().is_empty()),
                    chain: chain.to_vec(),
                    depth: depth + 1,
                },
            ));
            placements.push(placement);
        }

        if !jobs.is_empty() {
            self.events.emit(FetchEvent::Subpackages {
                op_id: op.id,
                name: op.name.clone(),
                count: jobs.len(),
            });
        }

        let fetch_one = |(sub, job): &(&Subpackage, Job)| -> Result<usize> {
            let fetched = self.fetch_package(job.clone(), options)?;
            if !sub.setters.is_empty() {
                let applied = apply_setter_defaults(&job.destination, &sub.setters)?;
                self.events.emit(FetchEvent::SettersApplied {
                    op_id: fetched.op_id,
                    name: fetched.name.clone(),
                    setters: applied,
                });
            }
            Ok(fetched.count)
        };

        let counts: Vec<usize> = if options.parallel {
            jobs.par_iter().map(fetch_one).collect::<Result<_>>()?
        } else {
            jobs.iter().map(fetch_one).collect::<Result<_>>()?
        };
        let mut total: usize = counts.iter().sum();

        for nested in nested_packages(package_dir, &placements)? {
            let nested_dir = package_dir.join(&nested);
            let manifest = Manifest::load(&nested_dir)?;
            total += self.resolve_children(
                &nested_dir,
                &manifest.subpackages,
                &origin.narrow(&nested),
                chain,
                depth,
                op,
                options,
            )?;
        }

        Ok(total)
    }
}
