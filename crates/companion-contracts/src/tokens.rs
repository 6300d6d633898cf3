use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runs::storage::SessionStorage;

pub const TOKEN_SETTINGS_KEY: &str = "tokenManagerSettings";

const MIN_OUTPUT: i64 = 256;
const MIN_DYNAMIC_OUTPUT: i64 = 128;
const SYSTEM_PROMPT_OVERHEAD: u64 = 128;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenSettings {
    pub output: u64,
    pub knowledge: u64,
    pub history: u64,
    pub recent_turns: u64,
    pub system_reserve: u64,
    pub output_percentage: Option<f64>,
    pub knowledge_percentage: Option<f64>,
    pub history_percentage: Option<f64>,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            output: 0,
            knowledge: 2048,
            history: 2048,
            recent_turns: 5,
            system_reserve: 512,
            output_percentage: Some(0.1),
            knowledge_percentage: Some(0.5),
            history_percentage: Some(0.5),
        }
    }
}

impl TokenSettings {
    /// Restores saved settings over the defaults. A saved explicit output
    /// turns the output percentage off.
    pub fn from_saved(raw: Value) -> Option<Self> {
        let mut settings: TokenSettings = serde_json::from_value(raw).ok()?;
        if settings.output != 0 && settings.output != Self::default().output {
            settings.output_percentage = None;
        }
        Some(settings)
    }
}

/// Context window and output ceiling of the selected text model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelWindow {
    pub context_window: u64,
    pub max_output: u64,
}

/// Allocation of a model's context window between knowledge, history, the
/// output reservation and the system prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBudget {
    settings: TokenSettings,
    window: Option<ModelWindow>,
    persona_limit: u64,
}

impl TokenBudget {
    pub fn new(settings: TokenSettings) -> Self {
        Self {
            settings,
            window: None,
            persona_limit: 0,
        }
    }

    /// Loads persisted settings; unreadable ones are dropped and defaults used.
    pub fn load(storage: &mut SessionStorage) -> anyhow::Result<Self> {
        let settings = match storage.get(TOKEN_SETTINGS_KEY) {
            None => TokenSettings::default(),
            Some(raw) => match TokenSettings::from_saved(raw) {
                Some(settings) => settings,
                None => {
                    storage.remove(TOKEN_SETTINGS_KEY)?;
                    TokenSettings::default()
                }
            },
        };
        Ok(Self::new(settings))
    }

    pub fn save(&self, storage: &mut SessionStorage) -> anyhow::Result<()> {
        storage.set(TOKEN_SETTINGS_KEY, serde_json::to_value(&self.settings)?)
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    pub fn window(&self) -> Option<ModelWindow> {
        self.window
    }

    pub fn set_model(&mut self, window: ModelWindow, persona_limit: u64) {
        self.window = Some(window);
        self.persona_limit = persona_limit;
        self.rebalance();
    }

    pub fn set_output(&mut self, output: u64) {
        self.settings.output = output;
        self.settings.output_percentage = None;
        self.rebalance();
    }

    pub fn set_knowledge(&mut self, knowledge: u64) {
        self.settings.knowledge = knowledge;
        self.rebalance();
    }

    pub fn set_history(&mut self, history: u64) {
        self.settings.history = history;
        self.rebalance();
    }

    /// Reserves room for a system prompt of the given token count.
    pub fn reserve_for_system_prompt(&mut self, prompt_tokens: u64) {
        self.settings.system_reserve = prompt_tokens + SYSTEM_PROMPT_OVERHEAD;
        self.rebalance();
    }

    /// Tokens left for the user's own message after all reservations.
    pub fn user_budget(&self) -> u64 {
        let Some(window) = self.window else {
            return 0;
        };
        let used = self.settings.output
            + self.settings.system_reserve
            + self.persona_limit
            + self.settings.knowledge
            + self.settings.history;
        window.context_window.saturating_sub(used)
    }

    pub fn rebalance(&mut self) {
        let Some(window) = self.window else {
            return;
        };
        let ctx = window.context_window as i64;
        let persona = self.persona_limit as i64;
        let reserve = (self.settings.system_reserve as i64).min(ctx);
        self.settings.system_reserve = reserve as u64;

        let knowledge = self.settings.knowledge as i64;
        let history = self.settings.history as i64;

        let dynamic_output_max =
            MIN_DYNAMIC_OUTPUT.max(ctx - (knowledge + history) - reserve - persona);
        let effective_max_output = (window.max_output as i64).min(dynamic_output_max);

        let mut output = self.settings.output as i64;
        if let Some(percentage) = self.settings.output_percentage {
            output = (effective_max_output as f64 * percentage).floor() as i64;
        }
        output = MIN_OUTPUT.max(output.min(effective_max_output));
        output = output.min((ctx - reserve - persona).max(0)).max(0);

        let available = ctx - output - reserve - persona;
        let knowledge_max = available - history;
        let history_max = available - knowledge;
        let knowledge = knowledge.min(knowledge_max).max(0);
        let history = history.min(history_max).max(0);

        self.settings.output = output as u64;
        self.settings.knowledge = knowledge as u64;
        self.settings.history = history as u64;
    }
}

/// Rough token count used when no tokenizer is available.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SendCost {
    pub input_tokens: u64,
    pub input_usd: f64,
    pub output_usd: f64,
}

impl SendCost {
    pub fn total_usd(&self) -> f64 {
        self.input_usd + self.output_usd
    }
}

/// Per-million-token pricing applied to the pending message.
pub fn estimate_send_cost(
    user_tokens: u64,
    attachment_tokens: u64,
    canvas_tokens: u64,
    output_reservation: u64,
    cost_input: f64,
    cost_output: f64,
) -> SendCost {
    let input_tokens = user_tokens + attachment_tokens + canvas_tokens;
    SendCost {
        input_tokens,
        input_usd: input_tokens as f64 * cost_input / 1_000_000.0,
        output_usd: output_reservation as f64 * cost_output / 1_000_000.0,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn holds(budget: &TokenBudget) -> bool {
        let settings = budget.settings();
        let ctx = budget.window().map(|w| w.context_window).unwrap_or(0);
        settings.knowledge + settings.history + settings.output + settings.system_reserve <= ctx
    }

    #[test]
    fn default_rebalance_uses_output_percentage() {
        let mut budget = TokenBudget::new(TokenSettings::default());
        assert_eq!(budget.user_budget(), 0);
        budget.set_model(
            ModelWindow {
                context_window: 128000,
                max_output: 16384,
            },
            0,
        );
        assert_eq!(budget.settings().output, 1638);
        assert_eq!(budget.settings().knowledge, 2048);
        assert_eq!(budget.settings().history, 2048);
        assert!(holds(&budget));
        assert_eq!(budget.user_budget(), 128000 - 1638 - 512 - 2048 - 2048);
    }

    #[test]
    fn small_window_clamps_every_allocation() {
        let mut budget = TokenBudget::new(TokenSettings::default());
        budget.set_model(
            ModelWindow {
                context_window: 4096,
                max_output: 4096,
            },
            300,
        );
        assert!(holds(&budget));
        assert!(budget.settings().output >= 128);

        budget.set_knowledge(100_000);
        assert!(holds(&budget));
        budget.set_history(100_000);
        assert!(holds(&budget));
        budget.reserve_for_system_prompt(900);
        assert_eq!(budget.settings().system_reserve, 1028);
        assert!(holds(&budget));
    }

    #[test]
    fn explicit_output_disables_percentage() {
        let mut budget = TokenBudget::new(TokenSettings::default());
        budget.set_model(
            ModelWindow {
                context_window: 32000,
                max_output: 8192,
            },
            0,
        );
        budget.set_output(4000);
        assert_eq!(budget.settings().output, 4000);
        assert_eq!(budget.settings().output_percentage, None);

        budget.set_output(10);
        assert_eq!(budget.settings().output, 256);
        assert!(holds(&budget));
    }

    #[test]
    fn saved_output_turns_off_percentage_and_bad_settings_reset() -> anyhow::Result<()> {
        let mut storage = SessionStorage::in_memory();
        storage.set(TOKEN_SETTINGS_KEY, json!({"output": 3000, "history": 1024}))?;
        let budget = TokenBudget::load(&mut storage)?;
        assert_eq!(budget.settings().output_percentage, None);
        assert_eq!(budget.settings().history, 1024);
        assert_eq!(budget.settings().knowledge, 2048);

        storage.set(TOKEN_SETTINGS_KEY, json!("garbage"))?;
        let budget = TokenBudget::load(&mut storage)?;
        assert_eq!(budget.settings(), &TokenSettings::default());
        assert_eq!(storage.get(TOKEN_SETTINGS_KEY), None);
        Ok(())
    }

    #[test]
    fn send_cost_is_priced_per_million_tokens() {
        let cost = estimate_send_cost(100, 50, 850, 2000, 2.0, 8.0);
        assert_eq!(cost.input_tokens, 1000);
        assert!((cost.input_usd - 0.002).abs() < 1e-12);
        assert!((cost.output_usd - 0.016).abs() < 1e-12);
        assert!((cost.total_usd() - 0.018).abs() < 1e-12);
    }

    #[test]
    fn estimate_rounds_up_quarter_chars() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcdefghi"), 3);
    }
}
