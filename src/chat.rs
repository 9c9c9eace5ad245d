//! Chat turn execution: model resolution and outgoing payload shaping.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::cache::ModelCache;
use crate::llm::{
    ChatMessage, ChatOptions, ChatRequest, ChatResponse, ContentPart, LlmClient, LlmError,
    MessageContent, Role,
};
use crate::selection::{
    ModelRequirements, ModelSelector, Resolution, SelectionError, SelectionReason,
};
use crate::store::StoreError;

const PDF_DATA_PREFIX: &str = "data:application/pdf;base64,";

/// Models tried per turn when OpenRouter reports a model as unavailable.
const MAX_MODEL_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Invalid attachment: {0}")]
    InvalidAttachment(String),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error("Upstream error: {0}")]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A file attached to the user's turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Attachment {
    /// http(s) URL or `data:image/...` URI
    Image { url: String },
    /// `data:application/pdf;base64,...` URI or bare base64
    Pdf { filename: String, data: String },
}

impl Attachment {
    pub fn pdf_from_bytes(filename: impl Into<String>, bytes: &[u8]) -> Self {
        Attachment::Pdf {
            filename: filename.into(),
            data: format!("{}{}", PDF_DATA_PREFIX, BASE64.encode(bytes)),
        }
    }

    fn validate(&self) -> Result<(), ChatError> {
        match self {
            Attachment::Image { url } => {
                let ok = url.starts_with("https://")
                    || url.starts_with("http://")
                    || url.starts_with("data:image/");
                if !ok {
                    return Err(ChatError::InvalidAttachment(format!(
                        "unsupported image URL scheme: {}",
                        crate::util::truncate_for_log(url, 40)
                    )));
                }
            }
            Attachment::Pdf { data, .. } => {
                let payload = data.strip_prefix(PDF_DATA_PREFIX).unwrap_or(data);
                if payload.trim().is_empty() {
                    return Err(ChatError::InvalidAttachment("empty PDF".to_string()));
                }
                if data.starts_with("data:") && !data.starts_with(PDF_DATA_PREFIX) {
                    return Err(ChatError::InvalidAttachment(
                        "PDF data URI must be application/pdf base64".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn to_part(&self) -> ContentPart {
        match self {
            Attachment::Image { url } => ContentPart::image_url(url.as_str()),
            Attachment::Pdf { filename, data } => {
                let file_data = if data.starts_with(PDF_DATA_PREFIX) {
                    data.clone()
                } else {
                    format!("{}{}", PDF_DATA_PREFIX, data.trim())
                };
                let filename = if filename.trim().is_empty() {
                    "document.pdf".to_string()
                } else {
                    filename.clone()
                };
                ContentPart::file(filename, file_data)
            }
        }
    }
}

/// Capability requirements implied by a set of attachments.
pub fn requirements_for(
    attachments: &[Attachment],
    options: &ChatOptions,
    allow_paid: bool,
) -> ModelRequirements {
    ModelRequirements {
        needs_image: attachments
            .iter()
            .any(|a| matches!(a, Attachment::Image { .. })),
        needs_pdf: attachments
            .iter()
            .any(|a| matches!(a, Attachment::Pdf { .. })),
        needs_reasoning: options.include_reasoning,
        allow_paid,
    }
}

/// Build the OpenRouter request for one user turn.
///
/// The new turn is plain text without attachments; otherwise a parts array
/// with the text first, then images, then files.
pub fn build_chat_request(
    model: &str,
    history: &[ChatMessage],
    user_text: &str,
    attachments: &[Attachment],
    options: &ChatOptions,
) -> ChatRequest {
    let content = if attachments.is_empty() {
        MessageContent::Text(user_text.to_string())
    } else {
        let mut parts = Vec::with_capacity(attachments.len() + 1);
        parts.push(ContentPart::text(user_text));
        parts.extend(
            attachments
                .iter()
                .filter(|a| matches!(a, Attachment::Image { .. }))
                .map(Attachment::to_part),
        );
        parts.extend(
            attachments
                .iter()
                .filter(|a| matches!(a, Attachment::Pdf { .. }))
                .map(Attachment::to_part),
        );
        MessageContent::Parts(parts)
    };

    let mut messages = history.to_vec();
    messages.push(ChatMessage {
        role: Role::User,
        content,
    });

    ChatRequest {
        model: model.to_string(),
        messages,
        temperature: options.temperature,
        max_tokens: options.max_tokens,
        include_reasoning: options.include_reasoning.then_some(true),
    }
}

fn default_allow_paid() -> bool {
    true
}

/// One incoming chat turn.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatTurn {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub options: ChatOptions,
    /// False for users without credit; restricts selection to free models
    #[serde(default = "default_allow_paid")]
    pub allow_paid: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub resolution: Resolution,
    pub response: ChatResponse,
    /// Marked-up cost of the turn, when usage was reported
    pub cost_usd: Option<f64>,
}

/// Runs chat turns through model selection and the OpenRouter client.
#[derive(Clone)]
pub struct ChatService {
    selector: ModelSelector,
    cache: ModelCache,
    client: Arc<dyn LlmClient>,
}

impl ChatService {
    pub fn new(selector: ModelSelector, cache: ModelCache, client: Arc<dyn LlmClient>) -> Self {
        Self {
            selector,
            cache,
            client,
        }
    }

    /// Resolve a model, send the turn, and price it. A model OpenRouter
    /// cannot serve is replaced by the next suitable one.
    pub async fn complete(&self, turn: ChatTurn) -> Result<ChatOutcome, ChatError> {
        if turn.message.trim().is_empty() && turn.attachments.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        for attachment in &turn.attachments {
            attachment.validate()?;
        }

        let req = requirements_for(&turn.attachments, &turn.options, turn.allow_paid);
        let mut resolution = self.selector.resolve(turn.model.as_deref(), &req).await?;
        let mut failed: Vec<String> = Vec::new();

        let response = loop {
            let request = build_chat_request(
                &resolution.model_id,
                &turn.history,
                &turn.message,
                &turn.attachments,
                &turn.options,
            );
            let error = match self.client.chat_completion(&request).await {
                Ok(response) => break response,
                Err(error) => error,
            };
            if !error.should_fallback() || failed.len() + 1 >= MAX_MODEL_ATTEMPTS {
                return Err(error.into());
            }

            failed.push(resolution.model_id.clone());
            let next = match self
                .selector
                .resolve_excluding(turn.model.as_deref(), &req, &failed)
                .await
            {
                Ok(next) => next,
                // Report the upstream failure rather than the empty catalog
                Err(SelectionError::NoModelAvailable { .. }) => return Err(error.into()),
                Err(e) => return Err(e.into()),
            };
            tracing::warn!(
                failed_model = %resolution.model_id,
                model_id = %next.model_id,
                "Model unavailable upstream, retrying turn with another model"
            );
            resolution = Resolution {
                substituted: true,
                reason: SelectionReason::Unavailable,
                ..next
            };
        };

        let cost_usd = match &response.usage {
            Some(usage) => self
                .cache
                .get(&resolution.model_id)
                .await?
                .map(|m| m.estimate_cost(usage.prompt_tokens, usage.completion_tokens)),
            None => None,
        };

        tracing::info!(
            model_id = %resolution.model_id,
            substituted = resolution.substituted,
            images = req.needs_image,
            pdf = req.needs_pdf,
            cost_usd = cost_usd.unwrap_or(0.0),
            "Chat turn completed"
        );

        Ok(ChatOutcome {
            resolution,
            response,
            cost_usd,
        })
    }
}
