//! # Guardrails (orientation)
//!
//! A [`Guardrail`] is a validation gate for one direction of agent I/O. Input
//! guardrails vet user text before a run starts; output guardrails vet a
//! run's final output (with the original input as context) before it is
//! exposed.
//!
//! Scoring is delegated to a [`Classifier`]. `validate_input` and
//! `validate_output` issue the classifier request and record a `Pending`
//! [`GuardrailValidation`] keyed by the request id. [`Guardrail::advance`]
//! polls the classifier and, once it has answered, resolves the validation
//! exactly once:
//!
//! - `Simple { threshold }`: `Fail` when `overall_score < threshold`.
//! - `ContentFilter { categories }`: `Fail` when any configured category
//!   scores at or above its threshold. One flagged category is enough.
//! - Anything that cannot be read (not JSON, no `overall_score`, a
//!   configured category missing) resolves to `Error`. Callers treat
//!   `Error` like `Fail`.
//!
//! Classifier payloads are JSON on a 0-1000 scale:
//!
//! ```json
//! {"overall_score": 120, "categories": {"hate": 40, "violence": 810}, "reason": "graphic"}
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::Classifier;
use crate::error::{AgentsError, Result};
use crate::events::{default_sink, Event, SharedSink};
use crate::ids::Id;
use crate::registry::Registrable;

/// Default breach threshold on the 0-1000 scale.
pub const DEFAULT_THRESHOLD: u32 = 700;

/// Categories used by [`Guardrail::content_filter`] when none are given.
pub const DEFAULT_CATEGORIES: [&str; 5] = ["hate", "harassment", "self_harm", "sexual", "violence"];

const INPUT_TEMPLATE: &str = "Score the following user input for policy violations. \
Reply with JSON containing overall_score, categories and reason.\n\n";
const OUTPUT_TEMPLATE: &str = "Score the following assistant response for policy violations. \
Reply with JSON containing overall_score, categories and reason.\n\n";

/// Which side of a run a guardrail vets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailDirection {
    Input,
    Output,
}

impl GuardrailDirection {
    fn as_str(self) -> &'static str {
        match self {
            GuardrailDirection::Input => "input",
            GuardrailDirection::Output => "output",
        }
    }
}

/// State of a validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationResult {
    Pass,
    Fail,
    Error,
    Pending,
}

impl ValidationResult {
    pub fn is_resolved(self) -> bool {
        self != ValidationResult::Pending
    }
}

/// Represents the outcome of a guardrail check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailResult {
    pub passed: bool,
    pub reason: Option<String>,
}

/// A category and the score at which it counts as flagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryThreshold {
    pub name: String,
    pub threshold: u32,
}

impl CategoryThreshold {
    pub fn new(name: impl Into<String>, threshold: u32) -> Self {
        Self {
            name: name.into(),
            threshold,
        }
    }
}

/// How a classifier payload is turned into a verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuardrailKind {
    Simple { threshold: u32 },
    ContentFilter { categories: Vec<CategoryThreshold> },
}

impl GuardrailKind {
    fn type_name(&self) -> &'static str {
        match self {
            GuardrailKind::Simple { .. } => "simple",
            GuardrailKind::ContentFilter { .. } => "content_filter",
        }
    }
}

/// What the classifier sends back.
#[derive(Debug, Clone, Default, Deserialize)]
struct ScoredPayload {
    overall_score: Option<u32>,
    #[serde(default)]
    categories: HashMap<String, u32>,
    reason: Option<String>,
}

/// One validation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailValidation {
    pub id: Id,
    /// Name of the guardrail that owns the validation.
    pub guardrail: String,
    pub direction: GuardrailDirection,
    pub result: ValidationResult,
    pub score: Option<u32>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl GuardrailValidation {
    /// Pass/fail view once resolved. `Error` counts as not passed.
    pub fn verdict(&self) -> Option<GuardrailResult> {
        match self.result {
            ValidationResult::Pending => None,
            ValidationResult::Pass => Some(GuardrailResult {
                passed: true,
                reason: None,
            }),
            ValidationResult::Fail | ValidationResult::Error => Some(GuardrailResult {
                passed: false,
                reason: Some(format!("{}: {}", self.guardrail, self.reason)),
            }),
        }
    }
}

#[derive(Default)]
struct ValidationLog {
    order: Vec<Id>,
    entries: HashMap<Id, GuardrailValidation>,
}

/// A registered validation gate.
pub struct Guardrail {
    name: String,
    direction: GuardrailDirection,
    kind: GuardrailKind,
    template: String,
    classifier: Arc<dyn Classifier>,
    events: SharedSink,
    log: Mutex<ValidationLog>,
}

impl Guardrail {
    pub fn new(
        name: impl Into<String>,
        direction: GuardrailDirection,
        kind: GuardrailKind,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        let template = match direction {
            GuardrailDirection::Input => INPUT_TEMPLATE,
            GuardrailDirection::Output => OUTPUT_TEMPLATE,
        };
        Self {
            name: name.into(),
            direction,
            kind,
            template: template.to_string(),
            classifier,
            events: default_sink(),
            log: Mutex::new(ValidationLog::default()),
        }
    }

    /// A guardrail that fails when the overall score drops below `threshold`.
    pub fn simple(
        name: impl Into<String>,
        direction: GuardrailDirection,
        threshold: u32,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self::new(name, direction, GuardrailKind::Simple { threshold }, classifier)
    }

    /// A content filter over `categories`, each at [`DEFAULT_THRESHOLD`].
    pub fn content_filter<S: AsRef<str>>(
        name: impl Into<String>,
        direction: GuardrailDirection,
        categories: &[S],
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        let categories = categories
            .iter()
            .map(|c| CategoryThreshold::new(c.as_ref(), DEFAULT_THRESHOLD))
            .collect();
        Self::new(
            name,
            direction,
            GuardrailKind::ContentFilter { categories },
            classifier,
        )
    }

    /// Replace the prompt template that precedes the subject text.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn with_events(mut self, events: SharedSink) -> Self {
        self.events = events;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> GuardrailDirection {
        self.direction
    }

    pub fn kind(&self) -> &GuardrailKind {
        &self.kind
    }

    /// Start validating user input.
    pub fn validate_input(&self, text: &str) -> Result<Id> {
        self.expect_direction(GuardrailDirection::Input)?;
        let prompt = format!("{}{}", self.template, text);
        self.open(&prompt)
    }

    /// Start validating a response; `context` is the input that produced it.
    pub fn validate_output(&self, text: &str, context: &str) -> Result<Id> {
        self.expect_direction(GuardrailDirection::Output)?;
        let prompt = format!("{}{}\n\nOriginal input: {}", self.template, text, context);
        self.open(&prompt)
    }

    fn expect_direction(&self, expected: GuardrailDirection) -> Result<()> {
        if self.direction == expected {
            Ok(())
        } else {
            Err(AgentsError::WrongDirection {
                guardrail: self.name.clone(),
                expected: expected.as_str(),
            })
        }
    }

    fn open(&self, prompt: &str) -> Result<Id> {
        let id = self.classifier.request(prompt)?;
        let mut log = self.log.lock();
        log.order.push(id);
        log.entries.insert(
            id,
            GuardrailValidation {
                id,
                guardrail: self.name.clone(),
                direction: self.direction,
                result: ValidationResult::Pending,
                score: None,
                reason: String::new(),
                timestamp: Utc::now(),
                resolved_at: None,
            },
        );
        debug!(guardrail = %self.name, validation = %id.short(), "Validation requested");
        Ok(id)
    }

    /// Resolve `validation_id` if the classifier has answered.
    ///
    /// Returns the current result; resolved validations never change.
    pub fn advance(&self, validation_id: &Id) -> Result<ValidationResult> {
        let mut log = self.log.lock();
        let validation = log
            .entries
            .get_mut(validation_id)
            .ok_or_else(|| AgentsError::not_found("validation", validation_id))?;
        if validation.result.is_resolved() {
            return Ok(validation.result);
        }
        let Some(payload) = self.classifier.poll(validation_id)? else {
            return Ok(ValidationResult::Pending);
        };

        let (result, score, reason) = self.evaluate(&payload);
        validation.result = result;
        validation.score = score;
        validation.reason = reason;
        validation.resolved_at = Some(Utc::now());
        drop(log);

        if result == ValidationResult::Error {
            warn!(guardrail = %self.name, validation = %validation_id.short(), "Classifier payload unreadable");
        }
        self.events.emit(Event::ValidationResolved {
            guardrail: self.name.clone(),
            validation_id: *validation_id,
            result,
            score,
        });
        Ok(result)
    }

    fn evaluate(&self, payload: &str) -> (ValidationResult, Option<u32>, String) {
        let scored: ScoredPayload = match serde_json::from_str(payload) {
            Ok(scored) => scored,
            Err(e) => {
                return (
                    ValidationResult::Error,
                    None,
                    format!("unreadable classifier payload: {}", e),
                )
            }
        };
        let Some(overall) = scored.overall_score else {
            return (
                ValidationResult::Error,
                None,
                "classifier payload has no overall_score".to_string(),
            );
        };

        match &self.kind {
            GuardrailKind::Simple { threshold } => {
                if overall < *threshold {
                    let reason = scored.reason.unwrap_or_else(|| {
                        format!("score {} is below threshold {}", overall, threshold)
                    });
                    (ValidationResult::Fail, Some(overall), reason)
                } else {
                    (ValidationResult::Pass, Some(overall), String::new())
                }
            }
            GuardrailKind::ContentFilter { categories } => {
                let mut flagged = Vec::new();
                for category in categories {
                    let Some(score) = scored.categories.get(&category.name) else {
                        return (
                            ValidationResult::Error,
                            Some(overall),
                            format!("classifier payload has no score for {}", category.name),
                        );
                    };
                    if *score >= category.threshold {
                        flagged.push(format!("{} ({})", category.name, score));
                    }
                }
                if flagged.is_empty() {
                    (ValidationResult::Pass, Some(overall), String::new())
                } else {
                    let mut reason = format!("flagged {}", flagged.join(", "));
                    if let Some(detail) = scored.reason {
                        reason.push_str(": ");
                        reason.push_str(&detail);
                    }
                    (ValidationResult::Fail, Some(overall), reason)
                }
            }
        }
    }

    pub fn get_result(&self, validation_id: &Id) -> Result<ValidationResult> {
        Ok(self.validation(validation_id)?.result)
    }

    pub fn is_complete(&self, validation_id: &Id) -> Result<bool> {
        Ok(self.get_result(validation_id)?.is_resolved())
    }

    /// Copy of the full validation record.
    pub fn validation(&self, validation_id: &Id) -> Result<GuardrailValidation> {
        self.log
            .lock()
            .entries
            .get(validation_id)
            .cloned()
            .ok_or_else(|| AgentsError::not_found("validation", validation_id))
    }

    pub fn validation_count(&self) -> usize {
        self.log.lock().order.len()
    }

    pub fn validation_at(&self, index: usize) -> Result<Id> {
        let log = self.log.lock();
        log.order
            .get(index)
            .copied()
            .ok_or(AgentsError::IndexOutOfBounds {
                index,
                len: log.order.len(),
            })
    }
}

impl Registrable for Guardrail {
    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn metadata(&self) -> Value {
        serde_json::json!({
            "guardrail_type": self.kind.type_name(),
            "direction": self.direction,
        })
    }
}

impl fmt::Debug for Guardrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guardrail")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("kind", &self.kind)
            .field("validations", &self.validation_count())
            .finish()
    }
}
