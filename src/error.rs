use crate::executor::terraform::TerraformError;

#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    KubeError(#[from] kube::Error),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(&'static str),

    #[error("missing info: {0}")]
    MissingInfo(&'static str),

    #[error("destroy in progress")]
    DestroyInFlight,

    #[error(transparent)]
    JsonSerializationError(#[from] serde_json::Error),

    #[error(transparent)]
    YamlSerializationError(#[from] serde_yaml::Error),

    #[error(transparent)]
    HashError(#[from] HashError),

    #[error(transparent)]
    GitError(#[from] GitError),
}

#[derive(thiserror::Error, Debug)]
pub enum HashError {
    #[error("module {0} has no resolved content hash")]
    UnresolvedModule(String),
}

#[derive(thiserror::Error, Debug)]
pub enum GitError {
    #[error("failed to query remote refs for {url}: {source}")]
    RefQuery {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("branch {branch} not found at {url}")]
    BranchNotFound { url: String, branch: String },

    #[error("malformed smart-http ref advertisement from {0}")]
    MalformedAdvertisement(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ExecutorError {
    #[error(transparent)]
    KubeError(#[from] kube::Error),

    #[error("required environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("execution {0} has no var-file secret reference")]
    MissingSecretName(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Terraform(#[from] TerraformError),

    #[error("approval denied for execution {0}")]
    Denied(String),

    #[error("approval wait timed out")]
    ApprovalTimeout,
}

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error(transparent)]
    KubeError(#[from] kube::Error),

    #[error("workspace {0} not found")]
    WorkspaceNotFound(String),

    #[error("state for workspace {0} not found")]
    StateNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}
