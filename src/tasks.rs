//! Quiz-specific prompt tasks built on the coordinator.
//!
//! Each task renders a prompt, fingerprints its semantic inputs and resolves
//! through [`RequestCoordinator`], so every helper is cached, rate limited and
//! single-flighted. Metadata helpers (`tags`, `classify_topic`,
//! `estimate_confidence`) degrade to a fixed fallback instead of failing.

use crate::cache::{FingerprintInputs, TaskKind};
use crate::coordinator::{RequestCoordinator, ResolveOptions, Resolved};
use crate::{Error, ErrorContext, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Words of scraped content kept in a content-based quiz prompt.
pub const MAX_CONTENT_WORDS: usize = 1500;
/// Characters of content sent for topic classification.
pub const MAX_CLASSIFY_CHARS: usize = 1000;

pub const FALLBACK_TOPIC: &str = "General Knowledge";
pub const FALLBACK_FEEDBACK: &str = "Feedback unavailable.";
pub const FALLBACK_CONFIDENCE: f64 = 0.8;

const MCQ_TEMPLATE: &str = "Create 5 {difficulty} multiple-choice questions about {topic}.\n\
Each question must have four options labelled A-D and exactly one correct answer.\n\
Format:\nQ1. <question>\nA) ...\nB) ...\nC) ...\nD) ...\nAnswer: <letter>";

const TF_TEMPLATE: &str = "Create 5 {difficulty} true/false statements about {topic}.\n\
Format:\nQ1. <statement>\nAnswer: True|False";

const IMAGE_TEMPLATE: &str = "Create 3 {difficulty} image-based questions about {topic}.\n\
For each question describe the image to show, then give four options labelled A-D.\n\
Format:\nQ1. Image: <description>\n<question>\nA) ...\nB) ...\nC) ...\nD) ...\nAnswer: <letter>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuizType {
    #[serde(rename = "MCQ")]
    Mcq,
    #[serde(rename = "TF")]
    TrueFalse,
    #[serde(rename = "IMAGE")]
    Image,
}

impl QuizType {
    pub const ALL: [QuizType; 3] = [QuizType::Mcq, QuizType::TrueFalse, QuizType::Image];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuizType::Mcq => "MCQ",
            QuizType::TrueFalse => "TF",
            QuizType::Image => "IMAGE",
        }
    }

    fn builtin_template(&self) -> &'static str {
        match self {
            QuizType::Mcq => MCQ_TEMPLATE,
            QuizType::TrueFalse => TF_TEMPLATE,
            QuizType::Image => IMAGE_TEMPLATE,
        }
    }
}

impl fmt::Display for QuizType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuizType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MCQ" => Ok(QuizType::Mcq),
            "TF" => Ok(QuizType::TrueFalse),
            "IMAGE" => Ok(QuizType::Image),
            other => Err(Error::configuration_with_context(
                format!("unknown quiz type '{}'", other),
                ErrorContext::new()
                    .with_field_path("quiz_type")
                    .with_details("expected MCQ, TF or IMAGE"),
            )),
        }
    }
}

/// Prompt templates by quiz type name, with `{topic}` and `{difficulty}` slots.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    templates: HashMap<String, String>,
}

impl PromptTemplates {
    /// Templates for the built-in quiz types.
    pub fn builtin() -> Self {
        let templates = QuizType::ALL
            .iter()
            .map(|t| (t.as_str().to_string(), t.builtin_template().to_string()))
            .collect();
        Self { templates }
    }

    /// Add or replace a template. Names are case-insensitive.
    pub fn register(&mut self, name: &str, template: impl Into<String>) {
        self.templates
            .insert(name.trim().to_ascii_uppercase(), template.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(&name.trim().to_ascii_uppercase())
    }

    pub fn render(&self, name: &str, topic: &str, difficulty: &str) -> Result<String> {
        let key = name.trim().to_ascii_uppercase();
        let template = self.templates.get(&key).ok_or_else(|| {
            Error::configuration_with_context(
                format!("prompt template for '{}' not found", key),
                ErrorContext::new()
                    .with_field_path(format!("templates.{}", key))
                    .with_source("prompt_templates"),
            )
        })?;
        Ok(template
            .replace("{topic}", topic)
            .replace("{difficulty}", difficulty))
    }
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self::builtin()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grade {
    pub is_correct: bool,
    pub feedback: String,
}

/// Metadata attached to a stored question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotations {
    pub tags: Vec<String>,
    pub confidence: f64,
}

/// Keep the first `max_words` words, marking the cut with `...`.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() > max_words {
        format!("{}...", words[..max_words].join(" "))
    } else {
        text.to_string()
    }
}

pub struct QuizTasks {
    coordinator: RequestCoordinator,
    templates: PromptTemplates,
}

impl QuizTasks {
    pub fn new(coordinator: RequestCoordinator) -> Self {
        Self {
            coordinator,
            templates: PromptTemplates::builtin(),
        }
    }

    pub fn with_template(mut self, name: &str, template: impl Into<String>) -> Self {
        self.templates.register(name, template);
        self
    }

    pub fn templates(&self) -> &PromptTemplates {
        &self.templates
    }

    pub fn coordinator(&self) -> &RequestCoordinator {
        &self.coordinator
    }

    /// Quiz from a prompt template.
    pub async fn generate_quiz(
        &self,
        identity: &str,
        topic: &str,
        difficulty: &str,
        quiz_type: &str,
    ) -> Result<Resolved> {
        let prompt = self.templates.render(quiz_type, topic, difficulty)?;
        let inputs = FingerprintInputs::quiz(topic, difficulty, quiz_type);
        self.coordinator.resolve(identity, &inputs, &prompt).await
    }

    /// Quiz grounded in already-extracted article text. Cached per source URL,
    /// quiz type and difficulty.
    ///
    /// Topic classification runs only for admitted callers whose URL is not
    /// cached yet.
    pub async fn quiz_from_content(
        &self,
        identity: &str,
        source_url: &str,
        content: &str,
        difficulty: &str,
        quiz_type: &str,
    ) -> Result<Resolved> {
        let inputs = FingerprintInputs::from_url(source_url, quiz_type).with_difficulty(difficulty);
        let prompt = move || async move {
            let topic = self.classify_topic(content).await;
            format!(
                "Generate a {} quiz for this topic: {}, difficulty: {}. Use this content:\n{}",
                quiz_type.trim().to_ascii_uppercase(),
                topic,
                difficulty,
                truncate_words(content, MAX_CONTENT_WORDS)
            )
        };
        self.coordinator
            .resolve_deferred(identity, &inputs, &ResolveOptions::default(), prompt)
            .await
    }

    /// One or two beginner-friendly sentences per correct answer.
    pub async fn explain(&self, identity: &str, quiz_text: &str) -> Result<String> {
        let inputs = FingerprintInputs::new(TaskKind::Explanation).with_param("quiz", quiz_text);
        let prompt = format!(
            "Explain each correct answer in the following quiz in 1-2 beginner-friendly sentences:\n\n{}",
            quiz_text
        );
        Ok(self
            .coordinator
            .resolve(identity, &inputs, &prompt)
            .await?
            .into_text())
    }

    /// Up to three tags; empty on failure.
    pub async fn tags(&self, question: &str) -> Vec<String> {
        let inputs = FingerprintInputs::new(TaskKind::Tags).with_param("question", question);
        let prompt = format!(
            "Give 3 relevant tags (comma-separated) for this question:\n{}",
            question
        );
        match self.unlimited(&inputs, &prompt).await {
            Ok(text) => text
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect(),
            Err(e) => {
                warn!(error = %e, "tag generation failed");
                Vec::new()
            }
        }
    }

    pub async fn classify_topic(&self, content: &str) -> String {
        let excerpt: String = content.chars().take(MAX_CLASSIFY_CHARS).collect();
        let inputs =
            FingerprintInputs::new(TaskKind::TopicClassification).with_param("content", &excerpt);
        let prompt = format!(
            "Classify the following content into a topic (e.g., Science, History, Tech, etc):\n\n{}",
            excerpt
        );
        match self.unlimited(&inputs, &prompt).await {
            Ok(topic) if !topic.trim().is_empty() => topic.trim().to_string(),
            Ok(_) => FALLBACK_TOPIC.to_string(),
            Err(e) => {
                warn!(error = %e, "topic classification failed");
                FALLBACK_TOPIC.to_string()
            }
        }
    }

    /// Exact-match grading plus generated feedback.
    ///
    /// Correctness never depends on the upstream. Only a rate-limit denial is
    /// returned as an error; other failures yield [`FALLBACK_FEEDBACK`].
    pub async fn grade_feedback(
        &self,
        identity: &str,
        user_answer: &str,
        correct_option: &str,
    ) -> Result<Grade> {
        let is_correct = user_answer.trim().to_uppercase() == correct_option.trim().to_uppercase();
        let inputs = FingerprintInputs::new(TaskKind::Grading)
            .with_param("correct", &correct_option.trim().to_uppercase())
            .with_param("answer", &user_answer.trim().to_uppercase());
        let prompt = format!(
            "The correct answer is {}. The user selected {}. Is it correct? Justify with explanation.",
            correct_option, user_answer
        );
        let feedback = match self.coordinator.resolve(identity, &inputs, &prompt).await {
            Ok(resolved) => resolved.into_text(),
            Err(e) if e.kind() == ErrorKind::RateLimited => return Err(e),
            Err(e) => {
                warn!(identity, error = %e, "grading feedback failed");
                FALLBACK_FEEDBACK.to_string()
            }
        };
        Ok(Grade { is_correct, feedback })
    }

    /// Model-rated confidence in `[0, 1]`; [`FALLBACK_CONFIDENCE`] when the
    /// call fails or the reply is not a number.
    pub async fn estimate_confidence(&self, quiz_block: &str) -> f64 {
        let inputs = FingerprintInputs::new(TaskKind::Confidence).with_param("quiz", quiz_block);
        let prompt = format!(
            "Rate the confidence in this quiz block on a scale from 0.0 to 1.0:\n{}",
            quiz_block
        );
        let reply = match self.unlimited(&inputs, &prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "confidence estimation failed");
                return FALLBACK_CONFIDENCE;
            }
        };
        match reply.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => v.clamp(0.0, 1.0),
            _ => {
                warn!(reply = %reply, "confidence reply is not a number");
                FALLBACK_CONFIDENCE
            }
        }
    }

    /// Tags and confidence for one question, requested concurrently.
    pub async fn annotate(&self, question: &str) -> Annotations {
        let (tags, confidence) =
            futures::join!(self.tags(question), self.estimate_confidence(question));
        Annotations { tags, confidence }
    }

    async fn unlimited(&self, inputs: &FingerprintInputs, prompt: &str) -> Result<String> {
        Ok(self
            .coordinator
            .resolve_unlimited(inputs, prompt, &ResolveOptions::default())
            .await?
            .into_text())
    }
}
