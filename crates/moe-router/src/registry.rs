//! Static expert registry and backup-chain resolution.
//!
//! The registry is an immutable table built once from configuration: each
//! expert has a modality, a set of capability tags, and an ordered backup
//! chain of at most two entries. Configured chains are acyclic by
//! construction, so `resolve_chain` needs no cycle detection; the
//! orchestrator's seen-set still deduplicates ids that reappear across
//! nested backup lists.
//!
//! Quarantine state is deliberately NOT consulted here — it changes between
//! requests, so filtering happens at attempt time in the orchestrator.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::ExpertIdConfig;
use crate::error::RouterError;

/// Input modality an expert can accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Vision,
}

/// A single backend expert: identity, modality, capabilities, backups.
///
/// Immutable after load; owned by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expert {
    pub id: String,
    pub modality: Modality,
    /// Capability tags, e.g. `reasoning`, `code`, `tool-use`.
    pub capabilities: BTreeSet<String>,
    /// Ordered backup chain (0–2 entries in practice).
    pub backups: Vec<String>,
}

/// Immutable table of experts keyed by id.
pub struct ExpertRegistry {
    experts: HashMap<String, Expert>,
}

fn tags(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|t| t.to_string()).collect()
}

impl ExpertRegistry {
    /// Build the registry from the configured expert roster.
    ///
    /// Backup chains follow the production mapping: every primary falls back
    /// toward the enterprise and low-latency fallback experts, vision experts
    /// fall back to each other before dropping to text.
    pub fn from_config(ids: &ExpertIdConfig) -> Self {
        let roster = [
            Expert {
                id: ids.reasoning.clone(),
                modality: Modality::Text,
                capabilities: tags(&["reasoning"]),
                backups: vec![ids.enterprise.clone(), ids.fallback.clone()],
            },
            Expert {
                id: ids.fallback.clone(),
                modality: Modality::Text,
                capabilities: tags(&["general"]),
                backups: vec![ids.enterprise.clone()],
            },
            Expert {
                id: ids.enterprise.clone(),
                modality: Modality::Text,
                capabilities: tags(&["reasoning", "enterprise"]),
                backups: vec![ids.reasoning.clone(), ids.fallback.clone()],
            },
            Expert {
                id: ids.math_tool.clone(),
                modality: Modality::Text,
                capabilities: tags(&["math", "tool-use"]),
                backups: vec![ids.aggregator.clone(), ids.enterprise.clone()],
            },
            Expert {
                id: ids.code.clone(),
                modality: Modality::Text,
                capabilities: tags(&["code"]),
                backups: vec![ids.cost_code.clone(), ids.fallback.clone()],
            },
            Expert {
                id: ids.aggregator.clone(),
                modality: Modality::Text,
                capabilities: tags(&["aggregation"]),
                backups: vec![ids.reasoning.clone(), ids.enterprise.clone()],
            },
            Expert {
                id: ids.cost_code.clone(),
                modality: Modality::Text,
                capabilities: tags(&["code"]),
                backups: vec![ids.fallback.clone()],
            },
            Expert {
                id: ids.vision.clone(),
                modality: Modality::Vision,
                capabilities: tags(&["vision"]),
                backups: vec![ids.vision_thinking.clone(), ids.fallback.clone()],
            },
            Expert {
                id: ids.vision_thinking.clone(),
                modality: Modality::Vision,
                capabilities: tags(&["vision", "reasoning"]),
                backups: vec![ids.vision.clone(), ids.fallback.clone()],
            },
            Expert {
                id: ids.default.clone(),
                modality: Modality::Text,
                capabilities: tags(&["general"]),
                backups: vec![ids.enterprise.clone()],
            },
        ];

        let mut experts: HashMap<String, Expert> = HashMap::new();
        for expert in roster {
            // The default role commonly aliases the fallback id; merge tags
            // instead of clobbering the earlier entry.
            experts
                .entry(expert.id.clone())
                .and_modify(|existing| {
                    existing.capabilities.extend(expert.capabilities.clone());
                })
                .or_insert(expert);
        }

        Self { experts }
    }

    pub fn get(&self, id: &str) -> Option<&Expert> {
        self.experts.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.experts.contains_key(id)
    }

    /// All registered expert ids, sorted for deterministic output.
    pub fn expert_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.experts.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.experts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experts.is_empty()
    }

    /// Resolve the ordered attempt chain for a primary expert:
    /// `[primary] + configured_backups(primary)`.
    ///
    /// Deterministic and idempotent for a fixed registry. Unknown ids fail
    /// with [`RouterError::UnknownExpert`]; backup entries are assumed valid
    /// by construction.
    pub fn resolve_chain(&self, expert_id: &str) -> Result<Vec<String>, RouterError> {
        let expert = self
            .experts
            .get(expert_id)
            .ok_or_else(|| RouterError::UnknownExpert(expert_id.to_string()))?;

        let mut chain = Vec::with_capacity(1 + expert.backups.len());
        chain.push(expert.id.clone());
        chain.extend(expert.backups.iter().cloned());
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ExpertRegistry {
        ExpertRegistry::from_config(&ExpertIdConfig::default())
    }

    #[test]
    fn reasoning_chain_matches_configured_backups() {
        let chain = registry().resolve_chain("deepseek-v3.1:671b-cloud").unwrap();
        assert_eq!(
            chain,
            vec![
                "deepseek-v3.1:671b-cloud",
                "gpt-oss:120b-cloud",
                "gpt-oss:20b-cloud"
            ]
        );
    }

    #[test]
    fn code_chain_falls_back_to_cost_code_then_fallback() {
        let chain = registry().resolve_chain("qwen3-coder:480b-cloud").unwrap();
        assert_eq!(
            chain,
            vec!["qwen3-coder:480b-cloud", "minimax-m2:cloud", "gpt-oss:20b-cloud"]
        );
    }

    #[test]
    fn vision_chain_prefers_vision_thinking_before_text() {
        let chain = registry().resolve_chain("qwen3-vl:235b-cloud").unwrap();
        assert_eq!(
            chain,
            vec![
                "qwen3-vl:235b-cloud",
                "qwen3-vl:235b-instruct-cloud",
                "gpt-oss:20b-cloud"
            ]
        );
    }

    #[test]
    fn fallback_chain_has_single_backup() {
        let chain = registry().resolve_chain("gpt-oss:20b-cloud").unwrap();
        assert_eq!(chain, vec!["gpt-oss:20b-cloud", "gpt-oss:120b-cloud"]);
    }

    #[test]
    fn resolve_chain_is_idempotent() {
        let reg = registry();
        let first = reg.resolve_chain("kimi-k2:1t-cloud").unwrap();
        let second = reg.resolve_chain("kimi-k2:1t-cloud").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_id_is_rejected() {
        let err = registry().resolve_chain("no-such-model").unwrap_err();
        assert!(matches!(err, RouterError::UnknownExpert(id) if id == "no-such-model"));
    }

    #[test]
    fn default_alias_merges_capabilities() {
        let reg = registry();
        // default and fallback share an id; the entry must exist once with
        // the merged tag set.
        let expert = reg.get("gpt-oss:20b-cloud").unwrap();
        assert!(expert.capabilities.contains("general"));
        assert_eq!(reg.len(), 9);
    }

    #[test]
    fn vision_experts_carry_vision_modality() {
        let reg = registry();
        assert_eq!(
            reg.get("qwen3-vl:235b-cloud").unwrap().modality,
            Modality::Vision
        );
        assert_eq!(
            reg.get("qwen3-vl:235b-instruct-cloud").unwrap().modality,
            Modality::Vision
        );
        assert_eq!(reg.get("gpt-oss:20b-cloud").unwrap().modality, Modality::Text);
    }
}
