//! Classification boundary with circuit-breaker fallback.
//!
//! The concrete ML models are out of scope — what matters to the engine is
//! the contract: category, urgency in `[0, 1]`, an embedding, and the
//! wall-clock latency of the call. Two [`ClassifierModel`] paths are wired
//! in: a primary scorer and a cheaper fallback, selected per call through the
//! shared [`FallbackFlag`] the circuit breaker owns. Unrecognized output is
//! coerced to a safe default category at this boundary, never propagated.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;
use std::time::Instant;

use dispatch::{Category, FallbackFlag};
use regex::Regex;

/// Keyword table routing ticket text to a category.
const CATEGORY_KEYWORDS: &[(Category, &[&str])] = &[
    (
        Category::Billing,
        &["refund", "invoice", "payment", "subscription", "billing", "charged"],
    ),
    (
        Category::Technical,
        &["error", "crash", "server", "bug", "down", "not working", "login"],
    ),
    (
        Category::Legal,
        &["policy", "gdpr", "contract", "legal", "compliance"],
    ),
];

/// Urgency cue patterns for the fallback scorer, word-boundary anchored.
static URGENCY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\burgent\b",
        r"\basap\b",
        r"\bimmediately\b",
        r"\bcritical\b",
        r"\bbroken\b",
        r"\bnot working\b",
        r"\boutage\b",
        r"\bdown\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("urgency pattern should compile"))
    .collect()
});

/// Embedding dimensionality for the feature-hashed bag-of-words vectors.
const EMBED_DIM: usize = 64;

/// One classification path.
pub trait ClassifierModel: Send + Sync {
    fn classify(&self, text: &str) -> Category;
    fn urgency(&self, text: &str) -> f32;
    /// Identifier recorded on outputs, for diagnostics.
    fn name(&self) -> &str;
}

/// Result of one classification call.
#[derive(Debug, Clone)]
pub struct ClassifierOutput {
    pub category: Category,
    pub urgency: f32,
    pub embedding: Vec<f32>,
    pub latency_ms: f64,
    /// Which model path produced this output.
    pub served_by: String,
}

impl ClassifierOutput {
    /// Output used when the classification call failed or timed out: safe
    /// default category, zero urgency, no embedding, and an infinite latency
    /// sample so the breaker still sees the failure.
    pub fn degraded_default() -> Self {
        Self {
            category: Category::Technical,
            urgency: 0.0,
            embedding: Vec::new(),
            latency_ms: f64::INFINITY,
            served_by: "none".to_string(),
        }
    }
}

/// Primary path: scores every category by keyword hits and picks the best,
/// with a cue-weighted urgency estimate.
pub struct KeywordRoutingModel;

impl ClassifierModel for KeywordRoutingModel {
    fn classify(&self, text: &str) -> Category {
        let lower = text.to_lowercase();
        let mut best: Option<(Category, usize)> = None;
        for (category, keywords) in CATEGORY_KEYWORDS {
            let hits = keywords.iter().filter(|k| lower.contains(*k)).count();
            if hits > 0 && best.map_or(true, |(_, b)| hits > b) {
                best = Some((*category, hits));
            }
        }
        best.map(|(c, _)| c).unwrap_or(Category::Technical)
    }

    fn urgency(&self, text: &str) -> f32 {
        if text.trim().is_empty() {
            return 0.0;
        }
        let lower = text.to_lowercase();
        let mut score = 0.0f32;
        for cue in ["urgent", "asap", "immediately", "critical", "outage"] {
            if lower.contains(cue) {
                score += 0.3;
            }
        }
        for cue in ["broken", "down", "crash", "not working", "failed", "unreachable"] {
            if lower.contains(cue) {
                score += 0.15;
            }
        }
        score += 0.05 * text.matches('!').count().min(2) as f32;
        score.min(1.0)
    }

    fn name(&self) -> &str {
        "keyword-routing"
    }
}

/// Fallback path: first-hit keyword routing and the regex cue counter.
/// Deliberately cheaper and coarser than the primary.
pub struct BaselineModel;

impl ClassifierModel for BaselineModel {
    fn classify(&self, text: &str) -> Category {
        let lower = text.to_lowercase();
        for (category, keywords) in CATEGORY_KEYWORDS {
            if keywords.iter().any(|k| lower.contains(*k)) {
                return *category;
            }
        }
        Category::Technical
    }

    fn urgency(&self, text: &str) -> f32 {
        if text.trim().is_empty() {
            return 0.0;
        }
        let lower = text.to_lowercase();
        let matches = URGENCY_PATTERNS
            .iter()
            .filter(|p| p.is_match(&lower))
            .count();
        (matches as f32 / 5.0).min(1.0)
    }

    fn name(&self) -> &str {
        "baseline"
    }
}

/// Deterministic feature-hashed bag-of-words embedding, L2-normalized.
///
/// Not a semantic model — it has exactly the property storm detection needs:
/// near-identical texts share tokens and land close in cosine space, while
/// unrelated texts do not. Empty text embeds to an empty vector.
pub fn embed(text: &str) -> Vec<f32> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let mut vector = vec![0.0f32; EMBED_DIM];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        vector[(hasher.finish() % EMBED_DIM as u64) as usize] += 1.0;
    }
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

/// The classification collaborator: primary/fallback selection, latency
/// measurement, embedding.
pub struct Classifier {
    primary: Box<dyn ClassifierModel>,
    fallback: Box<dyn ClassifierModel>,
    flag: FallbackFlag,
}

impl Classifier {
    /// Standard model pair behind the given breaker flag.
    pub fn new(flag: FallbackFlag) -> Self {
        Self {
            primary: Box::new(KeywordRoutingModel),
            fallback: Box::new(BaselineModel),
            flag,
        }
    }

    /// Inject custom model paths (tests use this to simulate slow primaries).
    pub fn with_models(
        primary: Box<dyn ClassifierModel>,
        fallback: Box<dyn ClassifierModel>,
        flag: FallbackFlag,
    ) -> Self {
        Self {
            primary,
            fallback,
            flag,
        }
    }

    /// Classify, score, and embed one ticket text, reporting the wall-clock
    /// latency of the call. The model path is chosen by the breaker flag at
    /// call time.
    pub fn process(&self, text: &str) -> ClassifierOutput {
        let start = Instant::now();
        let model: &dyn ClassifierModel = if self.flag.is_open() {
            self.fallback.as_ref()
        } else {
            self.primary.as_ref()
        };

        let category = model.classify(text);
        let urgency = model.urgency(text).clamp(0.0, 1.0);
        let embedding = embed(text);

        ClassifierOutput {
            category,
            urgency,
            embedding,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            served_by: model.name().to_string(),
        }
    }

    /// Embed without classifying (used by the storm leader on batch members
    /// that skipped classification).
    pub fn embedding(&self, text: &str) -> Vec<f32> {
        embed(text)
    }
}
