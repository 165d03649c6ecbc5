use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::RequestFailure;

pub const WEBHOOK_URL_VAR: &str = "MINDMAP_GENERATION_WEBHOOK_URL";
pub const WEBHOOK_AUTH_VAR: &str = "NOTEBOOK_GENERATION_AUTH";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotebookInfo {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Everything the generator sees about a notebook. Messages, sources and
/// notes are passed through opaquely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationContext {
    pub notebook: NotebookInfo,
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub sources: Vec<Value>,
    #[serde(default)]
    pub notes: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub notebook_id: String,
    pub context: GenerationContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl GenerationRequest {
    pub fn new(notebook_id: impl Into<String>, context: GenerationContext) -> Self {
        Self {
            notebook_id: notebook_id.into(),
            context,
            callback_url: None,
        }
    }

    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }
}

/// External generator. Results normally arrive later through the status
/// store; `Ok(Some(_))` carries a payload the service answered with directly.
#[async_trait::async_trait]
pub trait GenerationService: Send + Sync {
    async fn request(&self, request: &GenerationRequest) -> Result<Option<Value>, RequestFailure>;
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    notebook_id: &'a str,
    context: &'a GenerationContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    callback_auth: &'a str,
}

/// Posts generation requests to an HTTP workflow endpoint.
#[derive(Debug, Clone)]
pub struct WebhookService {
    client: reqwest::Client,
    url: Option<String>,
    auth: Option<String>,
}

impl WebhookService {
    pub fn new(url: Option<String>, auth: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            auth,
        }
    }

    /// Configure from `MINDMAP_GENERATION_WEBHOOK_URL` and
    /// `NOTEBOOK_GENERATION_AUTH`. Missing values surface on the first request.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var(WEBHOOK_URL_VAR).ok(),
            std::env::var(WEBHOOK_AUTH_VAR).ok(),
        )
    }

    fn settings(&self) -> Result<(&str, &str), RequestFailure> {
        let url = self
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| RequestFailure::NotConfigured(WEBHOOK_URL_VAR.to_string()))?;
        let auth = self
            .auth
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| RequestFailure::NotConfigured(WEBHOOK_AUTH_VAR.to_string()))?;
        Ok((url, auth))
    }
}

#[async_trait::async_trait]
impl GenerationService for WebhookService {
    async fn request(&self, request: &GenerationRequest) -> Result<Option<Value>, RequestFailure> {
        let (url, auth) = self.settings()?;
        let body = WebhookBody {
            notebook_id: &request.notebook_id,
            context: &request.context,
            callback_url: request.callback_url.as_deref(),
            callback_auth: auth,
        };

        debug!(
            notebook_id = %request.notebook_id,
            messages = request.context.messages.len(),
            sources = request.context.sources.len(),
            notes = request.context.notes.len(),
            "calling generation webhook"
        );

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, auth)
            .json(&body)
            .send()
            .await
            .map_err(|e| RequestFailure::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RequestFailure::EndpointNotFound(url.to_string()));
        }
        let text = response
            .text()
            .await
            .map_err(|e| RequestFailure::Network(e.to_string()))?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "generation webhook rejected request");
            return Err(RequestFailure::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        interpret_body(&text)
    }
}

/// A JSON answer may already hold the mindmap; anything else means the
/// result will come back through the callback.
fn interpret_body(text: &str) -> Result<Option<Value>, RequestFailure> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) if map.contains_key("error") => {
            let message = match &map["error"] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Err(RequestFailure::Remote(message))
        }
        Ok(value) => Ok(Some(value)),
        Err(_) => {
            debug!(len = text.len(), "webhook answered with non-JSON body");
            Ok(None)
        }
    }
}
