//! Mode Registry (spec §4.B) — the extension surface for adding new bet
//! modes without modifying the core. Modes are registered, never branched
//! on, inside the pipeline (spec §9 "Dynamic mode dispatch").

pub mod choose_their_fate;
pub mod either_or;
pub mod types;
pub mod u2pick;

pub use types::{LiveInfoField, SupportedLeagues, ValidationOutcome, ValidatorOutcome, WizardChoice, WizardStep};

use crate::db::models::BetProposal;
use crate::error::{AppError, AppResult};
use crate::live_data::LiveDataStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub const NO_ENTRY_CHOICE: &str = "No Entry";

#[async_trait]
pub trait ModeModule: Send + Sync {
    fn key(&self) -> &'static str;
    fn supported_leagues(&self) -> SupportedLeagues;
    fn label(&self) -> &'static str;
    fn overview(&self) -> &'static str;

    /// The choice set participants pick from. Must always include
    /// [`NO_ENTRY_CHOICE`].
    fn compute_options(&self, config: &serde_json::Value) -> Vec<String>;

    fn compute_winning_condition(&self, config: &serde_json::Value) -> String;

    /// Produces the ordered wizard steps the proposer works through. Takes
    /// the Live Data Store so modes that need to project live state into
    /// step choices (e.g. a team's current roster) can do so.
    async fn build_user_config(
        &self,
        live_data: &LiveDataStore,
        league: &str,
        league_game_id: Option<&str>,
    ) -> Vec<WizardStep>;

    /// Maps completed wizard steps onto this mode's `mode_config` field
    /// names (spec §4.C). The default treats every step key as a config
    /// field holding the selected choice id verbatim; modes whose config
    /// shape differs from their step/choice ids (multi-field records,
    /// choices that encode something other than a plain string) override
    /// this.
    fn config_from_steps(&self, steps: &[WizardStep]) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for step in steps {
            if let Some(choice_id) = &step.selected_choice_id {
                map.insert(step.key.clone(), serde_json::Value::String(choice_id.clone()));
            }
        }
        serde_json::Value::Object(map)
    }

    fn validate_proposal(&self, config: &serde_json::Value) -> ValidationOutcome;

    /// Does this mode require the game to already be `STATUS_IN_PROGRESS`
    /// at proposal time (spec §4.E step 5)?
    fn requires_in_progress(&self) -> bool {
        false
    }

    /// Enriches `config` with data captured from the Live Data Store at
    /// commit time; the result is persisted as the `mode_config` history
    /// event (spec §4.E step 9).
    async fn prepare_config(
        &self,
        live_data: &LiveDataStore,
        bet: &BetProposal,
        config: &serde_json::Value,
    ) -> anyhow::Result<serde_json::Value>;

    /// Builds this mode's baseline snapshot, stored separately in Redis
    /// with a 6-hour TTL (spec §3 Baseline).
    async fn capture_baseline(
        &self,
        live_data: &LiveDataStore,
        bet: &BetProposal,
        config: &serde_json::Value,
    ) -> anyhow::Result<serde_json::Value>;

    /// Projects current game state against the bet's baseline for the
    /// active-bet UI.
    async fn get_live_info(
        &self,
        live_data: &LiveDataStore,
        bet: &BetProposal,
        config: &serde_json::Value,
        baseline: &serde_json::Value,
    ) -> Vec<LiveInfoField>;

    /// §4.H — absent (always `StillRunning`) for modes resolved only by
    /// manual validation, e.g. U2Pick.
    async fn validate_bet(
        &self,
        _live_data: &LiveDataStore,
        _bet: &BetProposal,
        _config: &serde_json::Value,
        _baseline: &serde_json::Value,
    ) -> ValidatorOutcome {
        ValidatorOutcome::StillRunning
    }

    fn has_automatic_validator(&self) -> bool {
        true
    }
}

pub struct ModeRegistry {
    modules: HashMap<&'static str, Arc<dyn ModeModule>>,
}

impl ModeRegistry {
    /// Idempotent registration at process start (spec §4.B
    /// "Initialisation").
    pub fn new() -> Self {
        let mut registry = Self { modules: HashMap::new() };
        registry.register(Arc::new(either_or::EitherOrMode));
        registry.register(Arc::new(choose_their_fate::ChooseTheirFateMode));
        registry.register(Arc::new(u2pick::U2PickMode));
        registry
    }

    fn register(&mut self, module: Arc<dyn ModeModule>) {
        self.modules.insert(module.key(), module);
    }

    /// Gates any public call per spec §4.B "`ensureInitialized()` gates any
    /// public call".
    pub fn ensure_initialized(&self) -> AppResult<()> {
        if self.modules.is_empty() {
            Err(AppError::Internal(anyhow::anyhow!("mode registry has no registered modules")))
        } else {
            Ok(())
        }
    }

    pub fn lookup(&self, league: &str, mode_key: &str) -> AppResult<Arc<dyn ModeModule>> {
        self.ensure_initialized()?;
        let module = self.modules.get(mode_key).ok_or(AppError::ModeNotFound)?;
        if !module.supported_leagues().allows(league) {
            return Err(AppError::ModeUnavailableForLeague);
        }
        Ok(Arc::clone(module))
    }

    pub fn list(&self) -> Vec<Arc<dyn ModeModule>> {
        let mut modules: Vec<_> = self.modules.values().cloned().collect();
        modules.sort_by_key(|m| m.key());
        modules
    }
}

impl Default for ModeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_rejects_unknown_mode() {
        let registry = ModeRegistry::new();
        assert!(matches!(registry.lookup("NFL", "not_a_mode"), Err(AppError::ModeNotFound)));
    }

    #[test]
    fn lookup_rejects_unsupported_league() {
        let registry = ModeRegistry::new();
        let result = registry.lookup("NHL", "choose_their_fate");
        assert!(matches!(result, Err(AppError::ModeUnavailableForLeague)));
    }

    #[test]
    fn lookup_allows_wildcard_modes_on_any_league() {
        let registry = ModeRegistry::new();
        assert!(registry.lookup("NFL", "u2pick").is_ok());
        assert!(registry.lookup("NBA", "u2pick").is_ok());
    }
}
