use crate::image_source::AnalysisImage;

/// Fixed instruction establishing the assistant role and its safety caveats.
pub const SYSTEM_INSTRUCTION: &str = "You are an expert medical AI assistant. Provide detailed, \
accurate analysis of medical images. Always mention limitations and recommend professional \
consultation.";

/// Trait for the image-text-to-text pipelines a session can drive.
///
/// Implementors wrap an external model-serving collaborator: they receive a
/// structured conversation and return it extended with the generated turn.
pub trait Pipeline {
    /// The error type that can be returned during inference.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Runs one generation over the request and returns the resulting conversation.
    fn run(&mut self, request: ChatRequest) -> Result<ChatResponse, Self::Error>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug)]
pub enum ContentPart {
    Text(String),
    Image(AnalysisImage),
}

#[derive(Clone, Debug)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::Text(text.into())],
        }
    }

    /// Concatenated text parts, `None` when the turn carries no text.
    pub fn joined_text(&self) -> Option<String> {
        let texts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                ContentPart::Image(_) => None,
            })
            .collect();
        (!texts.is_empty()).then(|| texts.join(""))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub do_sample: bool,
}

impl GenerationParams {
    /// Deterministic decoding: sampling is always off for medical use.
    pub fn deterministic(max_new_tokens: u32, temperature: f32) -> Self {
        Self {
            max_new_tokens,
            temperature,
            do_sample: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub params: GenerationParams,
}

/// The conversation as returned by the pipeline, generated turn last.
#[derive(Clone, Debug)]
pub struct ChatResponse {
    pub conversation: Vec<Message>,
}

impl ChatResponse {
    /// Text of the final turn, the pipeline's answer.
    pub fn final_text(&self) -> Option<String> {
        self.conversation.last().and_then(Message::joined_text)
    }
}

/// Assembles the two-turn prompt for a single image question.
pub fn build_messages(question: &str, image: AnalysisImage) -> Vec<Message> {
    vec![
        Message::text(Role::System, SYSTEM_INSTRUCTION),
        Message {
            role: Role::User,
            content: vec![
                ContentPart::Text(question.to_string()),
                ContentPart::Image(image),
            ],
        },
    ]
}
