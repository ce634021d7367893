//! Operator tooling for exercising a multimodal medical-image model.
//!
//! Two programs are built on this crate:
//!
//! - `medgemma-setup` prepares the local environment: runtime directory,
//!   dependencies, credential check, hardware probe, launcher scripts.
//! - `medgemma` loads the model behind a [`Pipeline`] and runs an
//!   interactive loop answering questions about images fetched from a URL
//!   or read from disk.
//!
//! All inference is delegated to an external model-serving endpoint; the
//! session only assembles the prompt, issues one call per command and
//! extracts the generated text.

pub mod backend;
pub mod config;
pub mod hardware;
pub mod hub;
pub mod image_source;
pub mod interrupt;
pub mod pipeline;
pub mod process;
pub mod repl;
pub mod session;
pub mod setup;
pub mod startup;

pub use backend::{BackendError, ChatCompletionsPipeline, LoadError, PipelineSpec};
pub use config::{ConfigError, Device, Dtype, SessionConfig};
pub use hub::{HubClient, HubError, ModelHub};
pub use image_source::{AcquireError, AnalysisImage};
pub use pipeline::{ChatRequest, ChatResponse, GenerationParams, Pipeline};
pub use session::{Analysis, AnalysisError, InferenceSession};
pub use startup::{Ready, StartupError};
