//! Fingerprint generation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Content address of a logical generation request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub hash: String,
}

impl Fingerprint {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }
    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// The kind of prompt a request renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Quiz,
    QuizFromUrl,
    Explanation,
    Tags,
    TopicClassification,
    Grading,
    Confidence,
    Custom,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Quiz => "quiz",
            TaskKind::QuizFromUrl => "quiz_from_url",
            TaskKind::Explanation => "explanation",
            TaskKind::Tags => "tags",
            TaskKind::TopicClassification => "topic_classification",
            TaskKind::Grading => "grading",
            TaskKind::Confidence => "confidence",
            TaskKind::Custom => "custom",
        }
    }
}

/// Request parameters that decide whether two requests are the same.
///
/// Values are normalized at construction, so `" Rust  Basics "` and
/// `"rust basics"` describe the same quiz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintInputs {
    pub task: TaskKind,
    pub topic: Option<String>,
    pub difficulty: Option<String>,
    pub quiz_type: Option<String>,
    pub source_url: Option<String>,
    pub params: BTreeMap<String, String>,
}

impl FingerprintInputs {
    pub fn new(task: TaskKind) -> Self {
        Self {
            task,
            topic: None,
            difficulty: None,
            quiz_type: None,
            source_url: None,
            params: BTreeMap::new(),
        }
    }

    pub fn quiz(topic: &str, difficulty: &str, quiz_type: &str) -> Self {
        Self::new(TaskKind::Quiz)
            .with_topic(topic)
            .with_difficulty(difficulty)
            .with_quiz_type(quiz_type)
    }

    pub fn from_url(url: &str, quiz_type: &str) -> Self {
        Self::new(TaskKind::QuizFromUrl)
            .with_source_url(url)
            .with_quiz_type(quiz_type)
    }

    pub fn with_topic(mut self, topic: &str) -> Self {
        self.topic = Some(normalize_label(topic));
        self
    }

    pub fn with_difficulty(mut self, difficulty: &str) -> Self {
        self.difficulty = Some(normalize_label(difficulty));
        self
    }

    pub fn with_quiz_type(mut self, quiz_type: &str) -> Self {
        self.quiz_type = Some(normalize_label(quiz_type));
        self
    }

    pub fn with_source_url(mut self, url: &str) -> Self {
        self.source_url = Some(normalize_url(url));
        self
    }

    /// Free-form parameter; whitespace is collapsed but case is kept.
    pub fn with_param(mut self, key: impl Into<String>, value: &str) -> Self {
        self.params.insert(key.into(), collapse_whitespace(value));
        self
    }

    fn canonical_parts(&self) -> BTreeMap<String, String> {
        let mut parts: BTreeMap<String, String> = BTreeMap::new();
        parts.insert("task".into(), self.task.as_str().into());
        if let Some(ref t) = self.topic {
            parts.insert("topic".into(), t.clone());
        }
        if let Some(ref d) = self.difficulty {
            parts.insert("difficulty".into(), d.clone());
        }
        if let Some(ref q) = self.quiz_type {
            parts.insert("quiz_type".into(), q.clone());
        }
        if let Some(ref u) = self.source_url {
            parts.insert("source_url".into(), u.clone());
        }
        for (k, v) in &self.params {
            parts.insert(format!("param.{}", k), v.clone());
        }
        parts
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_label(s: &str) -> String {
    collapse_whitespace(s).to_lowercase()
}

/// Parse and re-serialize so scheme/host case and fragments don't split the cache.
/// Unparseable input is kept as trimmed text.
fn normalize_url(raw: &str) -> String {
    match url::Url::parse(raw.trim()) {
        Ok(mut u) => {
            u.set_fragment(None);
            u.to_string()
        }
        Err(_) => raw.trim().to_string(),
    }
}

pub struct FingerprintGenerator {
    include_model: bool,
    salt: Option<String>,
}

impl FingerprintGenerator {
    pub fn new() -> Self {
        Self {
            include_model: true,
            salt: None,
        }
    }
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }
    pub fn with_include_model(mut self, include: bool) -> Self {
        self.include_model = include;
        self
    }

    pub fn generate(&self, inputs: &FingerprintInputs, model: Option<&str>) -> Fingerprint {
        let mut parts = inputs.canonical_parts();
        if self.include_model {
            if let Some(m) = model {
                parts.insert("model".into(), m.trim().to_lowercase());
            }
        }
        if let Some(ref s) = self.salt {
            parts.insert("salt".into(), s.clone());
        }
        let canonical = serde_json::to_string(&parts).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        Fingerprint::new(hash)
    }
}

impl Default for FingerprintGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalent_requests_share_fingerprint() {
        let gen = FingerprintGenerator::new();
        let a = gen.generate(&FingerprintInputs::quiz(" Rust  Basics", "Medium", "mcq"), None);
        let b = gen.generate(&FingerprintInputs::quiz("rust basics", "medium ", "MCQ"), None);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_distinct_parameters_differ() {
        let gen = FingerprintGenerator::new();
        let easy = gen.generate(&FingerprintInputs::quiz("rust", "easy", "mcq"), None);
        let hard = gen.generate(&FingerprintInputs::quiz("rust", "hard", "mcq"), None);
        let tf = gen.generate(&FingerprintInputs::quiz("rust", "easy", "tf"), None);
        assert_ne!(easy, hard);
        assert_ne!(easy, tf);
    }

    #[test]
    fn test_url_normalization() {
        let gen = FingerprintGenerator::new();
        let a = gen.generate(
            &FingerprintInputs::from_url("HTTPS://Example.com/article#intro", "MCQ"),
            None,
        );
        let b = gen.generate(
            &FingerprintInputs::from_url("https://example.com/article", "mcq"),
            None,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_task_kind_separates_same_params() {
        let gen = FingerprintGenerator::new();
        let explain = FingerprintInputs::new(TaskKind::Explanation).with_param("text", "Q1");
        let tags = FingerprintInputs::new(TaskKind::Tags).with_param("text", "Q1");
        assert_ne!(gen.generate(&explain, None), gen.generate(&tags, None));
    }

    #[test]
    fn test_model_and_salt_participate() {
        let inputs = FingerprintInputs::quiz("rust", "easy", "mcq");
        let gen = FingerprintGenerator::new();
        assert_ne!(
            gen.generate(&inputs, Some("gpt-3.5-turbo")),
            gen.generate(&inputs, Some("gpt-4o"))
        );

        let no_model = FingerprintGenerator::new().with_include_model(false);
        assert_eq!(
            no_model.generate(&inputs, Some("gpt-3.5-turbo")),
            no_model.generate(&inputs, Some("gpt-4o"))
        );

        let salted = FingerprintGenerator::new().with_salt("v2");
        assert_ne!(gen.generate(&inputs, None), salted.generate(&inputs, None));
    }
}
