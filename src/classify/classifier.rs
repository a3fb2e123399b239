//! Message classification with per-model retry and exponential backoff.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::prompt::{classification_prompt, skill_prompt};
use super::{GenerationSettings, InferenceService};
use crate::config::InferenceConfig;
use crate::error::InferenceError;
use crate::model::classification::{
    parse_classification, parse_skill_sheet, Classification, SkillSheet,
};

/// Suspends the caller between retries.
pub trait Sleep {
    fn sleep(&self, duration: Duration);
}

/// Blocks the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleep;

impl Sleep for ThreadSleep {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Turns message text into a [`Classification`].
pub struct Classifier<'a> {
    service: &'a dyn InferenceService,
    sleeper: Box<dyn Sleep + 'a>,
    models: Vec<String>,
    max_attempts: u32,
    base_delay: Duration,
    settings: GenerationSettings,
}

impl<'a> Classifier<'a> {
    pub fn new(service: &'a dyn InferenceService, config: &InferenceConfig) -> Self {
        Self {
            service,
            sleeper: Box::new(ThreadSleep),
            models: config.models.clone(),
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            settings: GenerationSettings::from(config),
        }
    }

    /// Replace the backoff sleeper.
    pub fn with_sleeper(mut self, sleeper: impl Sleep + 'a) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    /// Backoff before retry number `attempt + 1`: `base * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Classify one message. Returns `None` once every model is exhausted.
    ///
    /// A rate-limited attempt is retried against the same model after a
    /// backoff, up to `max_attempts` per model. Any other failure, including
    /// an unparseable answer, moves on to the next model.
    pub fn classify(&self, body: &str, subject: &str) -> Option<Classification> {
        let prompt = classification_prompt(subject, body);

        for model in &self.models {
            for attempt in 0..self.max_attempts {
                let result = self
                    .service
                    .generate(model, &prompt, &self.settings)
                    .and_then(|text| parse_classification(&text, body));

                match result {
                    Ok(classification) => {
                        info!(model = %model, kind = classification.kind(), "Classified message");
                        return Some(classification);
                    }
                    Err(e) if e.is_rate_limited() => {
                        let delay = self.backoff(attempt);
                        warn!(
                            model = %model,
                            attempt = attempt + 1,
                            delay_secs = delay.as_secs(),
                            error = %e,
                            "Rate limited, backing off"
                        );
                        self.sleeper.sleep(delay);
                    }
                    Err(e) => {
                        warn!(model = %model, error = %e, "Giving up on model");
                        break;
                    }
                }
            }
        }

        warn!(subject, "Classification failed on every model");
        None
    }

    /// Ask for the skills listed in a rendered spreadsheet.
    ///
    /// Single attempt per model; any failure yields `None`.
    pub fn extract_skills(&self, sheet_text: &str) -> Option<SkillSheet> {
        let prompt = skill_prompt(sheet_text);
        for model in &self.models {
            let result: Result<SkillSheet, InferenceError> = self
                .service
                .generate(model, &prompt, &self.settings)
                .and_then(|text| parse_skill_sheet(&text));
            match result {
                Ok(sheet) => {
                    debug!(model = %model, skills = sheet.excel_skills.len(), "Extracted skills");
                    return Some(sheet);
                }
                Err(e) => warn!(model = %model, error = %e, "Skill extraction failed"),
            }
        }
        None
    }
}
