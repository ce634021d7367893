use crate::{
    backend::LoadError,
    config::{ConfigError, SessionConfig},
    hardware::HardwareReport,
    hub::{HubError, ModelHub},
    process::CommandRunner,
};

/// A failure that ends the session before the command loop starts.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("authentication failed: {0}")]
    Auth(#[source] HubError),
    #[error("could not reach the hub: {0}")]
    Connect(String),
    #[error("model loading failed: {0}")]
    Load(#[from] LoadError),
}

impl StartupError {
    pub fn remediation(&self) -> Vec<String> {
        match self {
            StartupError::Config(e) => e.remediation(),
            StartupError::Auth(_) => vec![
                "Check that HF_TOKEN in .env is a valid, unrevoked token".to_string(),
            ],
            StartupError::Connect(_) => vec!["Check your internet connection".to_string()],
            StartupError::Load(e) => e.remediation(),
        }
    }
}

/// Everything the command loop needs, in the order it was brought up.
pub struct Ready<P> {
    pub config: SessionConfig,
    pub account: String,
    pub pipeline: P,
}

/// Configuration, authentication, hardware probe, model load.
///
/// Each stage only runs when the previous one succeeded, so a session with
/// a bad credential never contacts the hub.
pub fn bring_up<F, H, C, R, P, L>(
    lookup: F,
    connect: C,
    runner: &R,
    load: L,
) -> Result<Ready<P>, StartupError>
where
    F: Fn(&str) -> Option<String>,
    H: ModelHub,
    C: FnOnce(&SessionConfig) -> Result<H, StartupError>,
    R: CommandRunner,
    L: FnOnce(&H, &SessionConfig) -> Result<P, LoadError>,
{
    let config = SessionConfig::from_lookup(lookup)?;
    if config.debug {
        log::info!("Model: {}", config.model_name);
        log::info!("Device: {}", config.device);
        log::info!("Dtype: {}", config.dtype);
    }

    let hub = connect(&config)?;

    log::info!("Authenticating with Hugging Face...");
    let account = hub
        .authenticate(&config.hf_token)
        .map_err(StartupError::Auth)?;
    log::info!("Authenticated as {account}");

    log::info!("Checking hardware...");
    for line in HardwareReport::probe(runner).summary() {
        if line.starts_with("WARNING") {
            log::warn!("{line}");
        } else {
            log::info!("{line}");
        }
    }

    log::info!("Loading {}...", config.model_name);
    log::info!("This can take a few minutes the first time...");
    let pipeline = load(&hub, &config)?;
    log::info!("Model loaded successfully!");

    Ok(Ready {
        config,
        account,
        pipeline,
    })
}
