//! Evaluation results and response parsing
//!
//! Evaluator responses are free-form text. Two shapes are understood:
//! a JSON object with `score`, `feedback`, `improved_output` and `summary`
//! keys, or line-oriented text using the case-sensitive prefixes
//! `Score:`, `Feedback:`, `Improved Output:` and `Summary:`.
//!
//! Parsing never fails. Missing fields keep their defaults and an
//! unreadable score becomes [`FALLBACK_SCORE`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Mid-scale score used whenever no usable score was produced
pub const FALLBACK_SCORE: f64 = 3.0;

pub const DEFAULT_FEEDBACK: &str = "No feedback provided.";
pub const DEFAULT_IMPROVED_OUTPUT: &str = "No improved output provided.";
pub const DEFAULT_SUMMARY: &str = "No summary provided.";

pub const ERROR_IMPROVED_OUTPUT: &str = "Error: no improved output available.";
pub const ERROR_SUMMARY: &str = "Error: evaluation could not be completed.";
const FALLBACK_FEEDBACK_PREFIX: &str = "Error: evaluation failed: ";

static SCORE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\**\s*(-?\d+(?:\.\d+)?)").expect("score pattern is valid"));

/// Outcome of scoring one piece of generated content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Numeric fitness, typically 0.0 - 5.0
    pub score: f64,
    /// Critique used as the optimization signal
    pub feedback: String,
    /// Evaluator's rewrite of the content
    pub improved_output: String,
    /// One-line verdict
    pub summary: String,
}

impl Default for EvaluationResult {
    fn default() -> Self {
        Self {
            score: FALLBACK_SCORE,
            feedback: DEFAULT_FEEDBACK.to_string(),
            improved_output: DEFAULT_IMPROVED_OUTPUT.to_string(),
            summary: DEFAULT_SUMMARY.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonEvaluation {
    score: Option<serde_json::Value>,
    feedback: Option<String>,
    improved_output: Option<String>,
    summary: Option<String>,
}

#[derive(Clone, Copy)]
enum Field {
    Feedback,
    ImprovedOutput,
    Summary,
}

impl EvaluationResult {
    /// Result substituted when the evaluation call itself failed
    pub fn fallback(reason: &str) -> Self {
        Self {
            score: FALLBACK_SCORE,
            feedback: format!("{}{}", FALLBACK_FEEDBACK_PREFIX, reason),
            improved_output: ERROR_IMPROVED_OUTPUT.to_string(),
            summary: ERROR_SUMMARY.to_string(),
        }
    }

    /// Whether this result came from [`EvaluationResult::fallback`]
    pub fn is_fallback(&self) -> bool {
        self.improved_output == ERROR_IMPROVED_OUTPUT
            && self.summary == ERROR_SUMMARY
            && self.feedback.starts_with(FALLBACK_FEEDBACK_PREFIX)
    }

    /// Parse an evaluator response of either supported shape.
    ///
    /// Blank responses are structurally incomplete and yield the fallback.
    pub fn from_response(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Self::fallback("empty response");
        }
        if trimmed.starts_with('{') {
            if let Some(result) = Self::parse_json(trimmed) {
                return result;
            }
        }
        Self::parse_lines(trimmed)
    }

    /// Parse a JSON object response; `None` if the text is not a JSON object
    pub fn parse_json(text: &str) -> Option<Self> {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        if end < start {
            return None;
        }
        let parsed: JsonEvaluation = serde_json::from_str(&text[start..=end]).ok()?;
        let defaults = Self::default();

        let score = match parsed.score {
            Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(FALLBACK_SCORE),
            Some(serde_json::Value::String(s)) => parse_score(&s).unwrap_or(FALLBACK_SCORE),
            _ => FALLBACK_SCORE,
        };

        Some(Self {
            score,
            feedback: non_empty(parsed.feedback).unwrap_or(defaults.feedback),
            improved_output: non_empty(parsed.improved_output).unwrap_or(defaults.improved_output),
            summary: non_empty(parsed.summary).unwrap_or(defaults.summary),
        })
    }

    /// Parse line-oriented `Prefix: value` text.
    ///
    /// A line without a known prefix continues the last free-text field.
    pub fn parse_lines(text: &str) -> Self {
        let mut result = Self::default();
        let mut feedback: Option<String> = None;
        let mut improved: Option<String> = None;
        let mut summary: Option<String> = None;
        let mut current: Option<Field> = None;

        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("Score:") {
                result.score = parse_score(rest).unwrap_or(FALLBACK_SCORE);
                current = None;
            } else if let Some(rest) = line.strip_prefix("Feedback:") {
                feedback = Some(rest.trim().to_string());
                current = Some(Field::Feedback);
            } else if let Some(rest) = line.strip_prefix("Improved Output:") {
                improved = Some(rest.trim().to_string());
                current = Some(Field::ImprovedOutput);
            } else if let Some(rest) = line.strip_prefix("Summary:") {
                summary = Some(rest.trim().to_string());
                current = Some(Field::Summary);
            } else if let Some(field) = current {
                let slot = match field {
                    Field::Feedback => &mut feedback,
                    Field::ImprovedOutput => &mut improved,
                    Field::Summary => &mut summary,
                };
                if let Some(value) = slot.as_mut() {
                    if !value.is_empty() {
                        value.push('\n');
                    }
                    value.push_str(line.trim_end());
                }
            }
        }

        if let Some(value) = non_empty(feedback.map(|v| v.trim().to_string())) {
            result.feedback = value;
        }
        if let Some(value) = non_empty(improved.map(|v| v.trim().to_string())) {
            result.improved_output = value;
        }
        if let Some(value) = non_empty(summary.map(|v| v.trim().to_string())) {
            result.summary = value;
        }
        result
    }
}

/// Leading number of a score field (`"4"`, `"4.5/5"`, `"**3** out of 5"`)
fn parse_score(text: &str) -> Option<f64> {
    SCORE_PATTERN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|score| score.is_finite())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_fields() {
        let text = "Score: 4.5\nFeedback: Clear but terse.\nImproved Output: A longer answer.\nSummary: Good.";
        let result = EvaluationResult::from_response(text);
        assert_eq!(result.score, 4.5);
        assert_eq!(result.feedback, "Clear but terse.");
        assert_eq!(result.improved_output, "A longer answer.");
        assert_eq!(result.summary, "Good.");
        assert!(!result.is_fallback());
    }

    #[test]
    fn test_missing_fields_keep_defaults() {
        let result = EvaluationResult::from_response("Score: 2\nSome unrelated chatter");
        assert_eq!(result.score, 2.0);
        assert_eq!(result.feedback, DEFAULT_FEEDBACK);
        assert_eq!(result.improved_output, DEFAULT_IMPROVED_OUTPUT);
        assert_eq!(result.summary, DEFAULT_SUMMARY);
    }

    #[test]
    fn test_unparsable_score_uses_fallback() {
        let result = EvaluationResult::from_response("Score: excellent\nFeedback: fine");
        assert_eq!(result.score, FALLBACK_SCORE);
        assert_eq!(result.feedback, "fine");
    }

    #[test]
    fn test_score_variants() {
        assert_eq!(parse_score(" 4/5"), Some(4.0));
        assert_eq!(parse_score(" **3.5** out of 5"), Some(3.5));
        assert_eq!(parse_score(" n/a"), None);
    }

    #[test]
    fn test_prefixes_are_case_sensitive() {
        let result = EvaluationResult::from_response("score: 5\nfeedback: lower case");
        assert_eq!(result.score, FALLBACK_SCORE);
        assert_eq!(result.feedback, DEFAULT_FEEDBACK);
    }

    #[test]
    fn test_multiline_fields() {
        let text = "Score: 3\nFeedback: First point.\nSecond point.\nImproved Output: line one\nline two\nSummary: done";
        let result = EvaluationResult::from_response(text);
        assert_eq!(result.feedback, "First point.\nSecond point.");
        assert_eq!(result.improved_output, "line one\nline two");
        assert_eq!(result.summary, "done");
    }

    #[test]
    fn test_json_response() {
        let text = r#"{"score": 4, "feedback": "Tighten the intro", "summary": "Solid"}"#;
        let result = EvaluationResult::from_response(text);
        assert_eq!(result.score, 4.0);
        assert_eq!(result.feedback, "Tighten the intro");
        assert_eq!(result.improved_output, DEFAULT_IMPROVED_OUTPUT);
        assert_eq!(result.summary, "Solid");
    }

    #[test]
    fn test_json_string_score() {
        let result = EvaluationResult::parse_json(r#"{"score": "2.5/5"}"#).unwrap();
        assert_eq!(result.score, 2.5);
    }

    #[test]
    fn test_empty_response_is_fallback() {
        let result = EvaluationResult::from_response("   \n ");
        assert_eq!(result.score, FALLBACK_SCORE);
        assert!(result.is_fallback());
        assert!(result.summary.contains("Error"));
        assert!(result.improved_output.contains("Error"));
    }

    #[test]
    fn test_feedback_starting_with_error_is_not_fallback() {
        let result = EvaluationResult::from_response(
            "Score: 4.5\nFeedback: Error handling is thorough.\nSummary: Great.",
        );
        assert_eq!(result.score, 4.5);
        assert_eq!(result.feedback, "Error handling is thorough.");
        assert!(!result.is_fallback());
    }

    #[test]
    fn test_fallback_mentions_reason() {
        let result = EvaluationResult::fallback("timeout");
        assert!(result.feedback.contains("timeout"));
        assert_eq!(result.score, 3.0);
    }
}
