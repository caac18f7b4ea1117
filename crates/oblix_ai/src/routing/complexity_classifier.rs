//! Complexity Classifier
//!
//! Cheap heuristic that sorts a prompt into simple or complex. Complex
//! prompts are routed to the most capable handle on the winning tier,
//! simple ones to the cheapest.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cost::estimate_tokens;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Complex,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple => f.write_str("simple"),
            Self::Complex => f.write_str("complex"),
        }
    }
}

/// Outcome of classifying one prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityResult {
    pub complexity: Complexity,
    pub estimated_tokens: u32,
    /// Names of the signals that fired, in a fixed order.
    pub signals: Vec<String>,
    pub reasoning: String,
}

impl ComplexityResult {
    pub fn is_complex(&self) -> bool {
        self.complexity == Complexity::Complex
    }
}

// ---------------------------------------------------------------------------
// Compiled regex patterns (Lazy statics)
// ---------------------------------------------------------------------------

/// Keyword groups that mark a prompt as complex. Each entry is
/// (signal name, patterns).
static COMPLEX_PATTERNS: Lazy<Vec<(&'static str, Vec<Regex>)>> = Lazy::new(|| {
    vec![
        (
            "analysis",
            compile_patterns(&[
                r"(?i)\b(analy[sz]e|analysis|evaluate|assess|critique)\b",
                r"(?i)\b(compare|contrast|trade-?offs?|pros and cons)\b",
            ]),
        ),
        (
            "reasoning",
            compile_patterns(&[
                r"(?i)\bstep[- ]by[- ]step\b",
                r"(?i)\b(prove|derive|reason about|explain why)\b",
            ]),
        ),
        (
            "design",
            compile_patterns(&[
                r"(?i)\b(architect\w*|design|system design)\b",
                r"(?i)\b(distributed|concurren\w*|scalab\w*)\b",
            ]),
        ),
        (
            "code",
            compile_patterns(&[
                r"(?i)\b(implement|refactor|debug|optimi[sz]e)\b",
                r"(?i)\b(write|generate) (a |an |the )?(function|class|module|program|script)\b",
                r"(?i)stack trace|traceback|segfault",
            ]),
        ),
        (
            "long_form",
            compile_patterns(&[
                r"(?i)\b(essay|report|detailed|comprehensive|in-depth|thorough)\b",
            ]),
        ),
    ]
});

/// Phrasings typical of quick lookups. Only used to explain a simple verdict.
static SIMPLE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_patterns(&[
        r"(?i)^\s*(what|who|when|where) (is|are|was|were)\b",
        r"(?i)\b(define|translate|spell|convert)\b",
        r"(?i)\b(quick question|briefly|in one (word|sentence))\b",
    ])
});

static CODE_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```[\s\S]*?```").expect("code block regex"));

// ---------------------------------------------------------------------------
// Helper
// ---------------------------------------------------------------------------

fn compile_patterns(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("Bad regex pattern `{p}`: {e}")))
        .collect()
}

fn any_match(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|re| re.is_match(text))
}

// ---------------------------------------------------------------------------
// ComplexityClassifier
// ---------------------------------------------------------------------------

pub const DEFAULT_TOKEN_THRESHOLD: usize = 200;

/// Classifies prompts by estimated token count, keyword groups and the
/// presence of fenced code.
#[derive(Debug, Clone)]
pub struct ComplexityClassifier {
    token_threshold: usize,
}

impl Default for ComplexityClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_THRESHOLD)
    }
}

impl ComplexityClassifier {
    /// Prompts estimated at or above `token_threshold` tokens count as
    /// complex regardless of wording.
    pub fn new(token_threshold: usize) -> Self {
        let _ = &*COMPLEX_PATTERNS;
        let _ = &*SIMPLE_PATTERNS;
        let _ = &*CODE_BLOCK_RE;
        Self { token_threshold }
    }

    pub fn token_threshold(&self) -> usize {
        self.token_threshold
    }

    pub fn classify(&self, prompt: &str) -> ComplexityResult {
        let estimated_tokens = estimate_tokens(prompt);
        let mut signals = Vec::new();

        if estimated_tokens as usize >= self.token_threshold {
            signals.push("length".to_string());
        }
        if CODE_BLOCK_RE.is_match(prompt) {
            signals.push("code_block".to_string());
        }
        for (name, patterns) in COMPLEX_PATTERNS.iter() {
            if any_match(patterns, prompt) {
                signals.push((*name).to_string());
            }
        }

        let complexity = if signals.is_empty() {
            Complexity::Simple
        } else {
            Complexity::Complex
        };

        let reasoning = match complexity {
            Complexity::Complex => format!(
                "complex (~{estimated_tokens} tokens; signals: {})",
                signals.join(", ")
            ),
            Complexity::Simple if any_match(&SIMPLE_PATTERNS, prompt) => {
                format!("simple (~{estimated_tokens} tokens; lookup phrasing)")
            }
            Complexity::Simple => format!("simple (~{estimated_tokens} tokens)"),
        };

        ComplexityResult {
            complexity,
            estimated_tokens,
            signals,
            reasoning,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
