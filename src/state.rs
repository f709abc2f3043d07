//! Application state: the single user session this process serves.
//!
//! This module owns:
//!   - the key-value store (one writer: this process)
//!   - the credit ledger, generation orchestrator and draft autosave
//!   - the interactive test runner and preferences
//!   - the AI capability (OpenAI, or a disabled stand-in without a key)
//!
//! Everything is constructed here once and handed to the handlers; there is
//! no module-level mutable state.

use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument};

use crate::ai::{DisabledAi, LessonAi};
use crate::autosave::DraftAutosave;
use crate::clock::{Clock, SystemClock};
use crate::config::{load_agent_config_from_env, AgentConfig, Settings, TimingCfg};
use crate::credits::CreditLedger;
use crate::domain::LessonRequest;
use crate::generation::GenerationOrchestrator;
use crate::history::HistoryStore;
use crate::openai::OpenAI;
use crate::preferences::Preferences;
use crate::store::{FileStore, KvStore, StoreError};
use crate::test_runner::TestRunner;

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub timing: TimingCfg,
    pub store: Arc<dyn KvStore>,
    pub clock: Arc<dyn Clock>,
    pub ai: Arc<dyn LessonAi>,
    pub ai_enabled: bool,
    pub ledger: Arc<Mutex<CreditLedger>>,
    pub autosave: Arc<DraftAutosave>,
    pub generation: Arc<GenerationOrchestrator>,
    pub runner: Arc<Mutex<TestRunner>>,
    pub preferences: Arc<RwLock<Preferences>>,
    /// Last form state the client reported.
    pub form: Arc<RwLock<LessonRequest>>,
}

impl AppState {
    /// Build state from env: load config, open the store, init OpenAI.
    #[instrument(level = "info", skip_all)]
    pub fn from_env() -> Result<Self, StoreError> {
        // Load TOML config if provided; otherwise defaults everywhere.
        let cfg = load_agent_config_from_env().unwrap_or_default();
        let settings = Settings::from_env(&cfg);
        let store: Arc<dyn KvStore> = Arc::new(FileStore::open(&settings.data_dir)?);

        // Build optional OpenAI client (if API key present).
        let openai = OpenAI::from_env(cfg.prompts.clone(), cfg.timing.ai_timeout());
        let ai: Arc<dyn LessonAi> = match openai {
            Some(oa) => {
                info!(target: "fled_backend", base_url = %oa.base_url, fast_model = %oa.fast_model, strong_model = %oa.strong_model, "OpenAI enabled.");
                Arc::new(oa)
            }
            None => {
                info!(target: "fled_backend", "OpenAI disabled (no OPENAI_API_KEY). Generation will fail; topics come from seeds.");
                Arc::new(DisabledAi)
            }
        };
        if settings.dev_mode {
            info!(target: "credits", "Developer mode enabled for this process; credits are not enforced.");
        }
        info!(target: "fled_backend", data_dir = %settings.data_dir.display(), "Key-value store opened");

        Ok(Self::assemble(cfg, settings, store, Arc::new(SystemClock), ai))
    }

    /// Wire the components from explicit parts.
    pub fn assemble(
        cfg: AgentConfig,
        settings: Settings,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        ai: Arc<dyn LessonAi>,
    ) -> Self {
        let ai_enabled = ai.is_enabled();
        let preferences = Preferences::load(store.as_ref());
        let ledger = Arc::new(Mutex::new(CreditLedger::new(
            store.clone(),
            clock.clone(),
            cfg.credits.clone(),
            preferences.credit_mode,
            settings.dev_mode,
        )));
        let autosave = Arc::new(DraftAutosave::new(store.clone(), cfg.timing.autosave_debounce()));
        let generation = Arc::new(GenerationOrchestrator::new(
            ai.clone(),
            ledger.clone(),
            Arc::new(RwLock::new(HistoryStore::new())),
            autosave.clone(),
            store.clone(),
            clock.clone(),
            cfg.timing.clone(),
        ));
        let runner = Arc::new(Mutex::new(TestRunner::new(clock.clone())));

        Self {
            settings,
            timing: cfg.timing,
            store,
            clock,
            ai,
            ai_enabled,
            ledger,
            autosave,
            generation,
            runner,
            preferences: Arc::new(RwLock::new(preferences)),
            form: Arc::new(RwLock::new(LessonRequest::default())),
        }
    }
}
