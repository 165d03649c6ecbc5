/// Why issuing a generation request failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestFailure {
    #[error("generation service is not configured: {0} is not set")]
    NotConfigured(String),

    #[error("generation endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("generation service rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("generation service reported an error: {0}")]
    Remote(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MindmapError {
    #[error("malformed mindmap payload: {0}")]
    MalformedPayload(String),

    #[error("no nodes found")]
    EmptyGraph,

    #[error("failed to start mindmap generation: {0}")]
    GenerationRequestFailed(#[from] RequestFailure),

    #[error("mindmap generation timed out after {after_secs}s")]
    GenerationTimedOut { after_secs: u64 },

    #[error("mindmap generation failed: {0}")]
    GenerationFailedRemote(String),

    #[error("notebook_id is required")]
    MissingNotebookId,

    #[error("callback authorization did not match")]
    Unauthorized,

    #[error("status store error: {0}")]
    Store(String),

    #[error("no tokio runtime is running")]
    NoRuntime,
}

impl MindmapError {
    /// Text suitable for a user-facing notification.
    pub fn user_message(&self) -> String {
        match self {
            MindmapError::MalformedPayload(_) => "No mindmap data available.".to_string(),
            MindmapError::EmptyGraph => "No nodes found in the mindmap.".to_string(),
            MindmapError::GenerationRequestFailed(failure) => match failure {
                RequestFailure::NotConfigured(var) => format!(
                    "Mindmap generation is not configured. Set the {var} secret for the generation service."
                ),
                RequestFailure::EndpointNotFound(_) => {
                    "Generation endpoint not found. Please deploy the generation service.".to_string()
                }
                RequestFailure::Network(_) => {
                    "Network error. Please check your connection and try again.".to_string()
                }
                RequestFailure::Rejected { status, .. } => {
                    format!("The generation service rejected the request (HTTP {status}). Please try again.")
                }
                RequestFailure::Remote(message) => format!("Failed to start generation: {message}"),
            },
            MindmapError::GenerationTimedOut { .. } => {
                "Mindmap generation is taking longer than expected. Generate again to retry.".to_string()
            }
            MindmapError::GenerationFailedRemote(_) => {
                "Failed to generate mindmap. Please try again.".to_string()
            }
            MindmapError::MissingNotebookId => "Notebook ID is required.".to_string(),
            MindmapError::Unauthorized => "Callback rejected: invalid authorization.".to_string(),
            MindmapError::Store(_) => "Could not reach the notebook store. Please try again.".to_string(),
            MindmapError::NoRuntime => "Mindmap generation could not be started.".to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            MindmapError::MissingNotebookId
                | MindmapError::Unauthorized
                | MindmapError::NoRuntime
                | MindmapError::GenerationRequestFailed(RequestFailure::NotConfigured(_))
        )
    }
}
