use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::MindmapError;
use crate::normalize;
use crate::store::{GenerationStatus, StatusRecord, StatusStore};

/// Body the generator posts back once it has finished.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CallbackPayload {
    #[serde(default)]
    pub notebook_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub mindmap_data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl CallbackPayload {
    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
            && self.mindmap_data.as_ref().is_some_and(|d| !d.is_null())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Stored { nodes: usize, edges: usize, record: StatusRecord },
    MarkedFailed { reason: String, record: StatusRecord },
}

/// Writes generator results into the status store.
pub struct CallbackHandler<S> {
    store: S,
    expected_auth: Option<String>,
    enforce_auth: bool,
}

impl<S: StatusStore> CallbackHandler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            expected_auth: None,
            enforce_auth: false,
        }
    }

    /// Compare the `Authorization` header against `secret`. Mismatches are
    /// logged, and rejected only when `enforce` is set.
    pub fn with_auth(mut self, secret: impl Into<String>, enforce: bool) -> Self {
        self.expected_auth = Some(secret.into());
        self.enforce_auth = enforce;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn handle(
        &self,
        payload: &CallbackPayload,
        authorization: Option<&str>,
    ) -> Result<CallbackOutcome, MindmapError> {
        self.check_auth(authorization)?;

        let notebook_id = payload
            .notebook_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or(MindmapError::MissingNotebookId)?;

        if !payload.is_success() {
            let reason = payload
                .error
                .clone()
                .or_else(|| payload.status.clone())
                .unwrap_or_else(|| "no mindmap data".to_string());
            warn!(notebook_id, %reason, "generator reported failure");
            let record = self
                .store
                .update(notebook_id, GenerationStatus::Failed, None)
                .await?;
            return Ok(CallbackOutcome::MarkedFailed { reason, record });
        }

        let data = payload.mindmap_data.as_ref().unwrap_or(&Value::Null);
        let graph = normalize::normalize(data)?;
        if graph.is_empty() {
            return Err(MindmapError::EmptyGraph);
        }

        let record = self
            .store
            .update(
                notebook_id,
                GenerationStatus::Completed,
                Some(graph.to_canonical_json()),
            )
            .await?;
        info!(
            notebook_id,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "stored generated mindmap"
        );
        Ok(CallbackOutcome::Stored {
            nodes: graph.nodes.len(),
            edges: graph.edges.len(),
            record,
        })
    }

    /// Parse a raw request body and handle it.
    pub async fn handle_json(
        &self,
        body: &str,
        authorization: Option<&str>,
    ) -> Result<CallbackOutcome, MindmapError> {
        let payload: CallbackPayload = serde_json::from_str(body)
            .map_err(|e| MindmapError::MalformedPayload(format!("invalid callback body: {e}")))?;
        self.handle(&payload, authorization).await
    }

    fn check_auth(&self, authorization: Option<&str>) -> Result<(), MindmapError> {
        let Some(expected) = self.expected_auth.as_deref() else {
            return Ok(());
        };
        let matches = authorization.is_some_and(|given| {
            given == expected || given.strip_prefix("Bearer ") == Some(expected)
        });
        if matches {
            return Ok(());
        }
        warn!(has_header = authorization.is_some(), "callback authorization mismatch");
        if self.enforce_auth {
            Err(MindmapError::Unauthorized)
        } else {
            Ok(())
        }
    }
}
