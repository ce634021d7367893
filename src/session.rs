use crate::{
    image_source::{self, AcquireError, AnalysisImage},
    pipeline::{ChatRequest, GenerationParams, Pipeline, build_messages},
};
use reqwest::blocking::Client;
use std::{
    path::Path,
    time::{Duration, Instant},
};

/// Per-request failure. The loop prints it and keeps going.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Acquire(#[from] AcquireError),
    #[error("Error during analysis: {0}")]
    Inference(String),
    #[error("Error during analysis: the model returned no text")]
    EmptyResponse,
}

/// Answer to one image question, with timing of the inference call.
#[derive(Clone, Debug)]
pub struct Analysis {
    pub response: String,
    pub image_size: (u32, u32),
    pub duration: Duration,
}

/// Owns the loaded pipeline and answers one request at a time.
pub struct InferenceSession<P: Pipeline> {
    pipeline: P,
    client: Client,
    params: GenerationParams,
}

impl<P: Pipeline> InferenceSession<P> {
    pub fn new(pipeline: P, client: Client, params: GenerationParams) -> Self {
        Self {
            pipeline,
            client,
            params,
        }
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    /// Downloads the image at `url` and analyzes it.
    pub fn analyze_url(&mut self, url: &str, question: &str) -> Result<Analysis, AnalysisError> {
        log::info!("Downloading image from: {url}");
        let image = image_source::fetch_url(&self.client, url)?;
        log::info!("Image loaded: {}x{}", image.width, image.height);
        self.analyze_image(image, question)
    }

    /// Reads the image at `path` and analyzes it.
    pub fn analyze_file(&mut self, path: &Path, question: &str) -> Result<Analysis, AnalysisError> {
        log::info!("Loading from: {}", path.display());
        let image = image_source::read_file(path)?;
        log::info!("Image loaded: {}x{}", image.width, image.height);
        self.analyze_image(image, question)
    }

    /// Runs exactly one pipeline call for the image and question.
    pub fn analyze_image(
        &mut self,
        image: AnalysisImage,
        question: &str,
    ) -> Result<Analysis, AnalysisError> {
        log::info!("Analysis in progress...");
        log::info!("Question: {question}");

        let image_size = (image.width, image.height);
        let request = ChatRequest {
            messages: build_messages(question, image),
            params: self.params,
        };

        let start_time = Instant::now();
        let response = self
            .pipeline
            .run(request)
            .map_err(|e| AnalysisError::Inference(e.to_string()))?;
        let duration = start_time.elapsed();

        let text = response.final_text().ok_or(AnalysisError::EmptyResponse)?;
        log::info!("Analysis completed in {:.1}s", duration.as_secs_f32());

        Ok(Analysis {
            response: text,
            image_size,
            duration,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::{testing::RecordingPipeline, *};
    use crate::{
        image_source::png_for_tests,
        pipeline::{ContentPart, Role},
    };
    use httpmock::prelude::*;

    fn session(pipeline: RecordingPipeline) -> InferenceSession<RecordingPipeline> {
        InferenceSession::new(
            pipeline,
            Client::new(),
            GenerationParams::deterministic(500, 0.1),
        )
    }

    fn answering(reply: &str) -> RecordingPipeline {
        RecordingPipeline {
            reply: Some(reply.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn url_failure_status_skips_inference() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/private.png");
            then.status(403);
        });

        let mut session = session(answering("unused"));
        let err = session
            .analyze_url(&server.url("/private.png"), "What is this?")
            .unwrap_err();

        assert!(matches!(err, AnalysisError::Acquire(AcquireError::Status { status: 403, .. })));
        assert!(session.pipeline().requests.is_empty());
    }

    #[test]
    fn url_success_runs_one_deterministic_request() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/xray.png");
            then.status(200).body(png_for_tests(8, 6));
        });

        let mut session = session(answering("No acute findings."));
        let analysis = session
            .analyze_url(&server.url("/xray.png"), "Any fracture?")
            .unwrap();

        assert_eq!(analysis.response, "No acute findings.");
        assert_eq!(analysis.image_size, (8, 6));

        let requests = &session.pipeline().requests;
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].params.do_sample);
        let roles: Vec<Role> = requests[0].messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User]);
        assert!(matches!(&requests[0].messages[1].content[0], ContentPart::Text(q) if q == "Any fracture?"));
        assert!(matches!(&requests[0].messages[1].content[1], ContentPart::Image(_)));
    }

    #[test]
    fn missing_file_skips_inference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nowhere.jpg");

        let mut session = session(answering("unused"));
        let err = session.analyze_file(&path, "q").unwrap_err();

        assert!(err.to_string().contains(&path.display().to_string()));
        assert!(session.pipeline().requests.is_empty());
    }

    #[test]
    fn pipeline_failure_becomes_analysis_error() {
        let mut session = session(RecordingPipeline {
            fail_with: Some("CUDA error".to_string()),
            ..Default::default()
        });
        let err = session
            .analyze_image(AnalysisImage::solid_for_tests(2, 2), "q")
            .unwrap_err();

        assert!(matches!(err, AnalysisError::Inference(_)));
        assert!(err.to_string().contains("CUDA error"));
    }

    #[test]
    fn empty_conversation_is_empty_response() {
        let mut session = session(RecordingPipeline {
            empty_conversation: true,
            ..Default::default()
        });
        let err = session
            .analyze_image(AnalysisImage::solid_for_tests(2, 2), "q")
            .unwrap_err();
        assert!(matches!(err, AnalysisError::EmptyResponse));
    }
}
