//! Chat-completions backed pipeline.
//!
//! The model is served by an external OpenAI-compatible endpoint (the
//! Hugging Face router, TGI, vLLM, ...). Loading checks that the hub grants
//! access to the model before any request is made.

use crate::{
    config::{Device, Dtype, SessionConfig},
    hub::{HubError, ModelHub, mentions_gating},
    pipeline::{ChatRequest, ChatResponse, ContentPart, Message, Pipeline, Role},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

/// Why a model could not be loaded. Each class has its own remediation.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("{model} is gated: {message}")]
    Gated { model: String, message: String },
    #[error("not enough memory to load the model: {0}")]
    OutOfMemory(String),
    #[error("{0}")]
    Other(String),
}

impl LoadError {
    /// Classifies a raw failure message the way the hub and backends word them.
    pub fn classify(model: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        if mentions_gating(&message) {
            LoadError::Gated {
                model: model.to_string(),
                message,
            }
        } else if message.to_lowercase().contains("memory") {
            LoadError::OutOfMemory(message)
        } else {
            LoadError::Other(message)
        }
    }

    pub fn remediation(&self) -> Vec<String> {
        match self {
            LoadError::Gated { model, .. } => vec![
                "GATED MODEL - REQUEST ACCESS:".to_string(),
                format!("1. Go to https://huggingface.co/{model}"),
                "2. Click 'Request access'".to_string(),
                "3. Fill in the form and wait for approval".to_string(),
            ],
            LoadError::OutOfMemory(_) => vec![
                "MEMORY ERROR - SOLUTIONS:".to_string(),
                "1. Close other applications".to_string(),
                "2. Set DEVICE=cpu in .env".to_string(),
                "3. Set TORCH_DTYPE=float16 in .env".to_string(),
            ],
            LoadError::Other(_) => Vec::new(),
        }
    }

    fn from_hub(model: &str, err: HubError) -> Self {
        match err {
            HubError::Gated { model, message } => LoadError::Gated { model, message },
            other => LoadError::classify(model, other.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("inference request failed: {0}")]
    Transport(String),
    #[error("inference endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected inference response: {0}")]
    Decode(String),
    #[error("inference endpoint returned no choices")]
    NoChoices,
}

/// Model placement the pipeline was loaded with.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSpec {
    pub model: String,
    pub dtype: Dtype,
    pub device: Device,
}

pub struct ChatCompletionsPipeline {
    client: Client,
    endpoint: String,
    token: String,
    spec: PipelineSpec,
}

impl ChatCompletionsPipeline {
    /// Resolves the model on the hub and binds a pipeline to it.
    pub fn load<H: ModelHub>(
        hub: &H,
        client: Client,
        config: &SessionConfig,
    ) -> Result<Self, LoadError> {
        let model_config = hub
            .fetch_model_config(&config.model_name, &config.hf_token)
            .map_err(|e| LoadError::from_hub(&config.model_name, e))?;

        if let Some(arch) = model_config
            .get("architectures")
            .and_then(|a| a.get(0))
            .and_then(|a| a.as_str())
        {
            log::debug!("{} architecture: {arch}", config.model_name);
        }

        Ok(Self {
            client,
            endpoint: config.inference_endpoint.clone(),
            token: config.hf_token.clone(),
            spec: PipelineSpec {
                model: config.model_name.clone(),
                dtype: config.dtype,
                device: config.device,
            },
        })
    }

    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: Vec<WirePart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: WireImageUrl },
}

#[derive(Serialize)]
struct WireImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireReply,
}

#[derive(Deserialize)]
struct WireReply {
    content: Option<String>,
}

fn to_wire(message: &Message) -> WireMessage<'_> {
    WireMessage {
        role: message.role.as_str(),
        content: message
            .content
            .iter()
            .map(|part| match part {
                ContentPart::Text(text) => WirePart::Text {
                    text: text.as_str(),
                },
                ContentPart::Image(image) => WirePart::ImageUrl {
                    image_url: WireImageUrl {
                        url: format!("data:{};base64,{}", image.mime_type, STANDARD.encode(&image.bytes)),
                    },
                },
            })
            .collect(),
    }
}

impl Pipeline for ChatCompletionsPipeline {
    type Error = BackendError;

    fn run(&mut self, request: ChatRequest) -> Result<ChatResponse, Self::Error> {
        // greedy decoding ignores the configured temperature
        let temperature = if request.params.do_sample {
            request.params.temperature
        } else {
            0.0
        };

        let body = WireRequest {
            model: &self.spec.model,
            messages: request.messages.iter().map(to_wire).collect(),
            max_tokens: request.params.max_new_tokens,
            temperature,
            stream: false,
        };

        log::debug!("POST {} ({} messages)", self.endpoint, body.messages.len());
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }

        let reply: WireResponse = response
            .json()
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        let answer = reply
            .choices
            .into_iter()
            .next()
            .ok_or(BackendError::NoChoices)?
            .message
            .content
            .unwrap_or_default();

        let mut conversation = request.messages;
        conversation.push(Message::text(Role::Assistant, answer));
        Ok(ChatResponse { conversation })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hub::{HubClient, http_client},
        image_source::AnalysisImage,
        pipeline::{GenerationParams, build_messages},
    };
    use httpmock::prelude::*;
    use serde_json::json;

    fn config_for(server: &MockServer) -> SessionConfig {
        let base = server.base_url();
        SessionConfig::from_lookup(move |key| match key {
            "HF_TOKEN" => Some("hf_good".to_string()),
            "MODEL_NAME" => Some("org/vision".to_string()),
            "HUB_ENDPOINT" => Some(base.clone()),
            "INFERENCE_ENDPOINT" => Some(format!("{base}/v1/chat/completions")),
            _ => None,
        })
        .unwrap()
    }

    fn serve_model_config(server: &MockServer) {
        server.mock(|when, then| {
            when.method(GET).path("/org/vision/resolve/main/config.json");
            then.status(200).json_body(json!({ "architectures": ["Gemma3"] }));
        });
    }

    #[test]
    fn classify_matches_known_failure_classes() {
        assert!(matches!(
            LoadError::classify("m", "Cannot access gated repo for url"),
            LoadError::Gated { .. }
        ));
        assert!(matches!(
            LoadError::classify("m", "CUDA out of memory. Tried to allocate 2 GiB"),
            LoadError::OutOfMemory(_)
        ));
        assert!(matches!(LoadError::classify("m", "connection reset"), LoadError::Other(_)));
    }

    #[test]
    fn restricted_access_is_classified_as_gated() {
        let err = LoadError::classify("google/medgemma-4b-it", "Access to this model is Restricted");
        assert!(matches!(&err, LoadError::Gated { model, .. } if model == "google/medgemma-4b-it"));
        assert_eq!(err.remediation()[0], "GATED MODEL - REQUEST ACCESS:");
    }

    #[test]
    fn gated_remediation_links_the_model_page() {
        let err = LoadError::classify("google/medgemma-4b-it", "gated");
        assert!(
            err.remediation()
                .iter()
                .any(|line| line.contains("https://huggingface.co/google/medgemma-4b-it"))
        );
        assert!(LoadError::Other("boom".into()).remediation().is_empty());
    }

    #[test]
    fn load_maps_gated_hub_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/org/vision/resolve/main/config.json");
            then.status(403).header("x-error-code", "GatedRepo");
        });
        let config = config_for(&server);
        let hub = HubClient::new(http_client(None).unwrap(), &config.hub_endpoint);

        let err = ChatCompletionsPipeline::load(&hub, http_client(None).unwrap(), &config)
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::Gated { .. }));
    }

    #[test]
    fn run_posts_image_and_returns_assistant_turn() {
        let server = MockServer::start();
        serve_model_config(&server);
        let completion = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer hf_good")
                .body_contains("\"model\":\"org/vision\"")
                .body_contains("data:image/png;base64,")
                .body_contains("\"temperature\":0.0")
                .body_contains("\"max_tokens\":64");
            then.status(200).json_body(json!({
                "choices": [{ "message": { "role": "assistant", "content": "Clear lung fields." } }]
            }));
        });

        let config = config_for(&server);
        let hub = HubClient::new(http_client(None).unwrap(), &config.hub_endpoint);
        let mut pipeline =
            ChatCompletionsPipeline::load(&hub, http_client(None).unwrap(), &config).unwrap();
        assert_eq!(pipeline.spec().model, "org/vision");

        let response = pipeline
            .run(ChatRequest {
                messages: build_messages("Describe", AnalysisImage::solid_for_tests(2, 2)),
                params: GenerationParams::deterministic(64, 0.3),
            })
            .unwrap();

        completion.assert();
        assert_eq!(response.conversation.len(), 3);
        assert_eq!(response.final_text().as_deref(), Some("Clear lung fields."));
    }

    #[test]
    fn run_surfaces_endpoint_errors() {
        let server = MockServer::start();
        serve_model_config(&server);
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(503).body("model is loading");
        });

        let config = config_for(&server);
        let hub = HubClient::new(http_client(None).unwrap(), &config.hub_endpoint);
        let mut pipeline =
            ChatCompletionsPipeline::load(&hub, http_client(None).unwrap(), &config).unwrap();

        let err = pipeline
            .run(ChatRequest {
                messages: build_messages("Describe", AnalysisImage::solid_for_tests(2, 2)),
                params: GenerationParams::deterministic(64, 0.1),
            })
            .unwrap_err();
        assert!(matches!(err, BackendError::Status { status: 503, .. }));
    }
}
