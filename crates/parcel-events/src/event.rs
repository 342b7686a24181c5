use crate::OperationId;

/// Events emitted while packages are being fetched.
///
/// Every package in a fetch, sub-packages included, gets its own `op_id`.
#[derive(Debug, Clone)]
pub enum FetchEvent {
    /// A package fetch has begun.
    PackageStarted {
        op_id: OperationId,
        name: String,
        source: String,
        depth: usize,
    },
    /// Source content is being retrieved.
    Retrieving {
        op_id: OperationId,
        name: String,
        stage: RetrieveStage,
    },
    /// The source resolved to an immutable revision.
    Resolved {
        op_id: OperationId,
        name: String,
        revision: String,
    },
    /// Bytes received from a registry blob.
    BlobProgress {
        op_id: OperationId,
        name: String,
        current: u64,
        total: u64,
    },
    /// Declared sub-packages are being fetched.
    Subpackages {
        op_id: OperationId,
        name: String,
        count: usize,
    },
    /// Setter defaults were applied to the package.
    SettersApplied {
        op_id: OperationId,
        name: String,
        setters: Vec<String>,
    },
    /// The package was written to its destination.
    Completed {
        op_id: OperationId,
        name: String,
        destination: String,
    },
    /// The package fetch failed.
    Failed {
        op_id: OperationId,
        name: String,
        error: String,
    },
    /// Free-form log message.
    Log { level: LogLevel, message: String },
}

impl FetchEvent {
    pub fn op_id(&self) -> Option<OperationId> {
        match self {
            FetchEvent::PackageStarted { op_id, .. }
            | FetchEvent::Retrieving { op_id, .. }
            | FetchEvent::Resolved { op_id, .. }
            | FetchEvent::BlobProgress { op_id, .. }
            | FetchEvent::Subpackages { op_id, .. }
            | FetchEvent::SettersApplied { op_id, .. }
            | FetchEvent::Completed { op_id, .. }
            | FetchEvent::Failed { op_id, .. } => Some(*op_id),
            FetchEvent::Log { .. } => None,
        }
    }

    /// Returns `true` for events that end an operation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FetchEvent::Completed { .. } | FetchEvent::Failed { .. }
        )
    }
}

/// Steps of retrieving source content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrieveStage {
    /// Fetching a git ref.
    Cloning,
    /// Pulling an image manifest and its layers.
    Pulling,
    /// Unpacking an archive or image layers.
    Extracting,
    /// Copying a local directory.
    Copying,
    /// Writing the package descriptor.
    WritingManifest,
}

impl RetrieveStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrieveStage::Cloning => "cloning",
            RetrieveStage::Pulling => "pulling",
            RetrieveStage::Extracting => "extracting",
            RetrieveStage::Copying => "copying",
            RetrieveStage::WritingManifest => "writing manifest",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}
