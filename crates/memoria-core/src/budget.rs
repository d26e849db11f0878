//! Context Budget Manager (§3, §4.F): per-layer token accounting for what
//! gets assembled into a prompt context. Token counts are estimated from
//! character length, not a real tokenizer — consistent within this crate is
//! what matters, not exact parity with any particular model's tokenizer.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::model::Layer;

const CHARS_PER_TOKEN: usize = 4;
const PER_ITEM_OVERHEAD_TOKENS: u32 = 20;

#[derive(Debug, Clone, Copy)]
pub struct BudgetConfig {
    pub identity_schema: u32,
    pub active_context: u32,
    pub event_log: u32,
    pub verified_fact: u32,
    pub operational_knowledge: u32,
    pub total: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            identity_schema: 500,
            active_context: 200,
            event_log: 500,
            verified_fact: 2000,
            operational_knowledge: 300,
            total: 4000,
        }
    }
}

impl BudgetConfig {
    fn limit_for(&self, layer: Layer) -> u32 {
        match layer {
            Layer::IdentitySchema => self.identity_schema,
            Layer::ActiveContext => self.active_context,
            Layer::EventLog => self.event_log,
            Layer::VerifiedFact => self.verified_fact,
            Layer::OperationalKnowledge => self.operational_knowledge,
        }
    }
}

/// Estimate the token cost of one piece of text plus its bookkeeping
/// overhead: `max(1, floor(chars / 4)) + 20`.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    let body = std::cmp::max(1, chars / CHARS_PER_TOKEN);
    body as u32 + PER_ITEM_OVERHEAD_TOKENS
}

#[derive(Debug, Clone, Default)]
struct BudgetState {
    per_layer: HashMap<Layer, u32>,
    total_used: u32,
}

pub struct ContextBudgetManager {
    config: BudgetConfig,
    state: Mutex<BudgetState>,
}

#[derive(Debug, Clone)]
pub struct LayerUsage {
    pub layer: Layer,
    pub used: u32,
    pub limit: u32,
}

#[derive(Debug, Clone)]
pub struct BudgetReport {
    pub layers: Vec<LayerUsage>,
    pub total_used: u32,
    pub total_limit: u32,
}

impl BudgetReport {
    /// A plain-text bar-chart rendering, for tool responses and logs that
    /// want a human-scannable summary rather than raw numbers.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Context budget: {}/{} tokens\n",
            self.total_used, self.total_limit
        ));
        for usage in &self.layers {
            let pct = if usage.limit == 0 { 0 } else { (usage.used * 100 / usage.limit).min(100) };
            let filled = (pct / 5) as usize;
            let bar: String = "#".repeat(filled) + &"-".repeat(20 - filled);
            out.push_str(&format!(
                "  {:<22} [{bar}] {:>5}/{:<5} ({pct:>3}%)\n",
                usage.layer.as_str(),
                usage.used,
                usage.limit,
            ));
        }
        out
    }
}

impl Default for ContextBudgetManager {
    fn default() -> Self {
        Self::new(BudgetConfig::default())
    }
}

impl ContextBudgetManager {
    pub fn new(config: BudgetConfig) -> Self {
        Self { config, state: Mutex::new(BudgetState::default()) }
    }

    pub fn can_allocate(&self, layer: Layer, tokens: u32) -> bool {
        let state = self.state.lock().unwrap();
        let used = state.per_layer.get(&layer).copied().unwrap_or(0);
        let layer_limit = self.config.limit_for(layer);
        used + tokens <= layer_limit && state.total_used + tokens <= self.config.total
    }

    /// Reserves `tokens` against `layer` and the overall total. Returns
    /// `false` (no partial allocation) if either budget would be exceeded.
    pub fn allocate(&self, layer: Layer, tokens: u32) -> bool {
        let mut state = self.state.lock().unwrap();
        let used = state.per_layer.get(&layer).copied().unwrap_or(0);
        let layer_limit = self.config.limit_for(layer);
        if used + tokens > layer_limit || state.total_used + tokens > self.config.total {
            return false;
        }
        *state.per_layer.entry(layer).or_insert(0) += tokens;
        state.total_used += tokens;
        true
    }

    /// Greedily admits items into the budget in score-descending order, but
    /// the highest-scoring item is preserved unconditionally once sorted —
    /// callers rely on this to guarantee the single best item (e.g. the
    /// identity layer's lead entry) always survives truncation regardless of
    /// the budget.
    pub fn truncate_to_fit<'a>(
        &self,
        items: &'a [(Layer, String, f32)],
        preserve_first: bool,
    ) -> Vec<&'a (Layer, String, f32)> {
        if items.is_empty() {
            return Vec::new();
        }

        let mut sorted: Vec<&(Layer, String, f32)> = items.iter().collect();
        sorted.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

        let mut kept = Vec::new();
        let mut rest = sorted.into_iter();

        if preserve_first {
            if let Some(first) = rest.next() {
                let tokens = estimate_tokens(&first.1);
                self.allocate(first.0, tokens);
                kept.push(first);
            }
        }

        for item in rest {
            let tokens = estimate_tokens(&item.1);
            if self.allocate(item.0, tokens) {
                kept.push(item);
            }
        }
        kept
    }

    pub fn get_report(&self) -> BudgetReport {
        let state = self.state.lock().unwrap();
        let layers = [
            Layer::IdentitySchema,
            Layer::ActiveContext,
            Layer::EventLog,
            Layer::VerifiedFact,
            Layer::OperationalKnowledge,
        ]
        .into_iter()
        .map(|layer| LayerUsage {
            layer,
            used: state.per_layer.get(&layer).copied().unwrap_or(0),
            limit: self.config.limit_for(layer),
        })
        .collect();
        BudgetReport { layers, total_used: state.total_used, total_limit: self.config.total }
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.per_layer.clear();
        state.total_used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_matches_formula() {
        assert_eq!(estimate_tokens("x"), 1 + 20);
        assert_eq!(estimate_tokens(&"a".repeat(40)), 10 + 20);
    }

    #[test]
    fn allocate_respects_layer_and_total_limits() {
        let manager = ContextBudgetManager::new(BudgetConfig { identity_schema: 50, total: 4000, ..Default::default() });
        assert!(manager.allocate(Layer::IdentitySchema, 40));
        assert!(!manager.allocate(Layer::IdentitySchema, 20));
    }

    #[test]
    fn truncate_preserves_highest_scoring_item_unconditionally() {
        let manager = ContextBudgetManager::new(BudgetConfig { verified_fact: 1, total: 1, ..Default::default() });
        let items = vec![
            (Layer::VerifiedFact, "low score item".to_string(), 0.1),
            (Layer::VerifiedFact, "this will not fit the tiny budget at all".to_string(), 0.9),
        ];
        let kept = manager.truncate_to_fit(&items, true);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].2, 0.9);
    }

    #[test]
    fn truncate_without_preserve_first_drops_everything_over_budget() {
        let manager = ContextBudgetManager::new(BudgetConfig { verified_fact: 1, total: 1, ..Default::default() });
        let items = vec![(Layer::VerifiedFact, "this will not fit the tiny budget at all".to_string(), 0.9)];
        let kept = manager.truncate_to_fit(&items, false);
        assert!(kept.is_empty());
    }

    #[test]
    fn reset_clears_all_usage() {
        let manager = ContextBudgetManager::default();
        manager.allocate(Layer::VerifiedFact, 100);
        manager.reset();
        assert_eq!(manager.get_report().total_used, 0);
    }
}
