//! Keyword-driven request classifier.
//!
//! Maps an inbound request to a primary expert id. Deterministic for a given
//! context and registry; no side effects. Tiers are evaluated top to bottom
//! and the first match wins — tier order IS the tie-break rule:
//!
//! 1. Explicit model override (validated against the registry)
//! 2. Image content → vision-thinking expert when reasoning/math cues are
//!    also present, else the plain vision expert
//! 3. Code keywords → code expert (cost-effective code expert for
//!    simple-task cues)
//! 4. Math / tool-use keywords
//! 5. Aggregation / synthesis keywords
//! 6. Deep-reasoning keywords
//! 7. Default expert
//!
//! The keyword tiers are held as an ordered rule table rather than scattered
//! string matching, so the priority order is explicit and testable.

use std::sync::Arc;

use tracing::debug;

use crate::config::ExpertIdConfig;
use crate::error::RouterError;
use crate::registry::ExpertRegistry;
use crate::types::RequestContext;

const CODE_KEYWORDS: &[&str] = &[
    "code", "class", "programming", "debug", "implement", "script", "bug", "error", "compile",
    "syntax", "refactor", "test",
];

const SIMPLE_CODE_KEYWORDS: &[&str] = &["simple", "basic", "quick", "small"];

const MATH_TOOL_KEYWORDS: &[&str] = &[
    "math",
    "calculate",
    "equation",
    "solve",
    "tool",
    "function call",
    "agent",
    "autonomous",
    "workflow",
    "integrate",
    "api",
    "invoke",
];

const REASONING_KEYWORDS: &[&str] = &[
    "analyze",
    "reasoning",
    "why",
    "complex",
    "detailed",
    "explain in depth",
    "comprehensive",
    "thorough",
    "trace",
    "step-by-step",
    "think",
];

const AGGREGATION_KEYWORDS: &[&str] = &[
    "summarize",
    "combine",
    "aggregate",
    "synthesize",
    "merge",
    "consolidate",
];

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| text.contains(kw))
}

/// One keyword tier: label for logging, keyword list, target expert id.
struct KeywordRule {
    label: &'static str,
    keywords: &'static [&'static str],
    target: String,
}

/// Deterministic classifier over the expert registry.
pub struct Classifier {
    registry: Arc<ExpertRegistry>,
    /// Ordered keyword tiers 4–6 (math/tool, aggregation, deep reasoning).
    rules: Vec<KeywordRule>,
    code: String,
    cost_code: String,
    vision: String,
    vision_thinking: String,
    default: String,
}

impl Classifier {
    pub fn new(registry: Arc<ExpertRegistry>, ids: &ExpertIdConfig) -> Self {
        let rules = vec![
            KeywordRule {
                label: "math_tool",
                keywords: MATH_TOOL_KEYWORDS,
                target: ids.math_tool.clone(),
            },
            KeywordRule {
                label: "aggregation",
                keywords: AGGREGATION_KEYWORDS,
                target: ids.aggregator.clone(),
            },
            KeywordRule {
                label: "reasoning",
                keywords: REASONING_KEYWORDS,
                target: ids.reasoning.clone(),
            },
        ];
        Self {
            registry,
            rules,
            code: ids.code.clone(),
            cost_code: ids.cost_code.clone(),
            vision: ids.vision.clone(),
            vision_thinking: ids.vision_thinking.clone(),
            default: ids.default.clone(),
        }
    }

    /// Classify the request to a primary expert id.
    ///
    /// Fails only with [`RouterError::UnknownExpert`] when an explicit
    /// override names an id absent from the registry.
    pub fn classify(&self, ctx: &RequestContext) -> Result<String, RouterError> {
        // Tier 1: explicit override. "auto" means no override, matching the
        // API convention of the surrounding service.
        if let Some(wanted) = ctx.model_override.as_deref() {
            if wanted != "auto" {
                if !self.registry.contains(wanted) {
                    return Err(RouterError::UnknownExpert(wanted.to_string()));
                }
                debug!(request_id = %ctx.request_id, expert = wanted, "explicit override");
                return Ok(wanted.to_string());
            }
        }

        let (text, has_images) = ctx.routing_features();
        let text = text.to_lowercase();

        // Tier 2: multimodal content routes to a vision expert; reasoning or
        // math cues upgrade to the vision-thinking variant.
        if has_images {
            let target = if contains_any(&text, REASONING_KEYWORDS)
                || contains_any(&text, MATH_TOOL_KEYWORDS)
            {
                &self.vision_thinking
            } else {
                &self.vision
            };
            debug!(request_id = %ctx.request_id, expert = %target, "vision routing");
            return Ok(target.clone());
        }

        // Tier 3: code, with a cost-effective refinement for simple tasks.
        if contains_any(&text, CODE_KEYWORDS) {
            let target = if contains_any(&text, SIMPLE_CODE_KEYWORDS) {
                &self.cost_code
            } else {
                &self.code
            };
            debug!(request_id = %ctx.request_id, expert = %target, "code routing");
            return Ok(target.clone());
        }

        // Tiers 4–6: ordered keyword rules.
        for rule in &self.rules {
            if contains_any(&text, rule.keywords) {
                debug!(
                    request_id = %ctx.request_id,
                    tier = rule.label,
                    expert = %rule.target,
                    "keyword routing"
                );
                return Ok(rule.target.clone());
            }
        }

        // Tier 7: default expert.
        debug!(request_id = %ctx.request_id, expert = %self.default, "default routing");
        Ok(self.default.clone())
    }
}
