//! Language-model classification of messages and spreadsheet attachments.

pub mod classifier;
pub mod gemini;
pub mod prompt;

pub use classifier::{Classifier, Sleep, ThreadSleep};

use crate::config::InferenceConfig;
use crate::error::InferenceError;

/// Sampling and length settings sent with every request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl From<&InferenceConfig> for GenerationSettings {
    fn from(cfg: &InferenceConfig) -> Self {
        Self {
            temperature: cfg.temperature,
            top_p: cfg.top_p,
            top_k: cfg.top_k,
            max_output_tokens: cfg.max_output_tokens,
        }
    }
}

/// A black-box text generator asked for JSON-only output.
pub trait InferenceService {
    /// Run `prompt` against `model` and return the raw answer text.
    fn generate(
        &self,
        model: &str,
        prompt: &str,
        settings: &GenerationSettings,
    ) -> Result<String, InferenceError>;
}
