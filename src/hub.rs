use reqwest::{
    StatusCode,
    blocking::{Client, Response},
};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("request to the hub failed: {0}")]
    Transport(String),
    #[error("token rejected by the hub (HTTP {status}): {message}")]
    Unauthorized { status: u16, message: String },
    #[error("{model} is a gated model and access has not been granted: {message}")]
    Gated { model: String, message: String },
    #[error("{model} was not found on the hub")]
    NotFound { model: String },
    #[error("hub returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected hub response: {0}")]
    Decode(String),
}

/// The model hub the session authenticates against and loads models from.
pub trait ModelHub {
    /// Checks the token and returns the account name it belongs to.
    fn authenticate(&self, token: &str) -> Result<String, HubError>;

    /// Fetches the model's `config.json`, the first artifact any load needs.
    fn fetch_model_config(&self, model: &str, token: &str) -> Result<serde_json::Value, HubError>;
}

impl<H: ModelHub + ?Sized> ModelHub for &H {
    fn authenticate(&self, token: &str) -> Result<String, HubError> {
        (**self).authenticate(token)
    }

    fn fetch_model_config(&self, model: &str, token: &str) -> Result<serde_json::Value, HubError> {
        (**self).fetch_model_config(model, token)
    }
}

/// Builds the blocking HTTP client shared by the hub, downloads and inference.
///
/// `None` disables the request timeout entirely.
pub fn http_client(timeout: Option<Duration>) -> reqwest::Result<Client> {
    Client::builder().timeout(timeout).build()
}

#[derive(Deserialize)]
struct WhoAmI {
    name: String,
}

/// Hugging Face Hub over its HTTP API.
pub struct HubClient {
    client: Client,
    endpoint: String,
}

impl HubClient {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    fn get(&self, path: &str, token: &str) -> Result<Response, HubError> {
        let url = format!("{}/{}", self.endpoint, path.trim_start_matches('/'));
        log::debug!("GET {url}");
        self.client
            .get(&url)
            .bearer_auth(token)
            .send()
            .map_err(|e| HubError::Transport(e.to_string()))
    }
}

impl ModelHub for HubClient {
    fn authenticate(&self, token: &str) -> Result<String, HubError> {
        let response = self.get("api/whoami-v2", token)?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(HubError::Unauthorized {
                status: status.as_u16(),
                message: response.text().unwrap_or_default(),
            });
        }
        if !status.is_success() {
            return Err(HubError::Status {
                status: status.as_u16(),
                message: response.text().unwrap_or_default(),
            });
        }

        let whoami: WhoAmI = response
            .json()
            .map_err(|e| HubError::Decode(e.to_string()))?;
        Ok(whoami.name)
    }

    fn fetch_model_config(&self, model: &str, token: &str) -> Result<serde_json::Value, HubError> {
        let response = self.get(&format!("{model}/resolve/main/config.json"), token)?;
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .map_err(|e| HubError::Decode(e.to_string()));
        }

        let error_code = response
            .headers()
            .get("x-error-code")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let message = response.text().unwrap_or_default();

        if error_code.as_deref() == Some("GatedRepo") || mentions_gating(&message) {
            return Err(HubError::Gated {
                model: model.to_string(),
                message,
            });
        }
        if status == StatusCode::NOT_FOUND || error_code.as_deref() == Some("RepoNotFound") {
            return Err(HubError::NotFound {
                model: model.to_string(),
            });
        }
        Err(HubError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

/// Whether a hub or backend message reports restricted access to a model.
pub(crate) fn mentions_gating(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("gated") || lower.contains("restricted")
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn hub(server: &MockServer) -> HubClient {
        HubClient::new(http_client(None).unwrap(), server.base_url())
    }

    #[test]
    fn authenticate_returns_account_name() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/whoami-v2")
                .header("authorization", "Bearer hf_good");
            then.status(200)
                .json_body(serde_json::json!({ "name": "radiology-lab", "type": "user" }));
        });

        assert_eq!(hub(&server).authenticate("hf_good").unwrap(), "radiology-lab");
        mock.assert();
    }

    #[test]
    fn rejected_token_is_unauthorized() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/whoami-v2");
            then.status(401).body("Invalid credentials in Authorization header");
        });

        let err = hub(&server).authenticate("hf_bad").unwrap_err();
        assert!(matches!(err, HubError::Unauthorized { status: 401, .. }));
    }

    #[test]
    fn gated_repo_is_recognised_from_error_code() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/google/medgemma-4b-it/resolve/main/config.json");
            then.status(403)
                .header("x-error-code", "GatedRepo")
                .body("Access to model google/medgemma-4b-it is not allowed");
        });

        let err = hub(&server)
            .fetch_model_config("google/medgemma-4b-it", "hf_good")
            .unwrap_err();
        assert!(matches!(err, HubError::Gated { .. }));
    }

    #[test]
    fn gated_repo_is_recognised_from_message() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/org/model/resolve/main/config.json");
            then.status(401)
                .body("Access to model org/model is restricted. You must have access to it.");
        });

        let err = hub(&server).fetch_model_config("org/model", "hf_good").unwrap_err();
        assert!(matches!(err, HubError::Gated { .. }));
    }

    #[test]
    fn missing_repo_is_not_found() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/org/nope/resolve/main/config.json");
            then.status(404).header("x-error-code", "RepoNotFound");
        });

        let err = hub(&server).fetch_model_config("org/nope", "hf_good").unwrap_err();
        assert!(matches!(err, HubError::NotFound { .. }));
    }

    #[test]
    fn model_config_is_parsed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/org/model/resolve/main/config.json");
            then.status(200)
                .json_body(serde_json::json!({ "architectures": ["Gemma3ForConditionalGeneration"] }));
        });

        let config = hub(&server).fetch_model_config("org/model", "hf_good").unwrap();
        assert_eq!(config["architectures"][0], "Gemma3ForConditionalGeneration");
    }
}
