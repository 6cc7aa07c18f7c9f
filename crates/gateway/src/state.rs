//! Shared application state passed to all API handlers.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Semaphore;

use cf_bitable::{BitableClient, SchemaCache};
use cf_cache::{IdempotencyStore, SystemClock};
use cf_cards::{CardRenderer, TemplateEngine};
use cf_domain::config::Config;
use cf_llm::LlmFacade;
use cf_skills::action::{ActionExecutor, CreateSkill, DeleteSkill, UpdateSkill};
use cf_skills::chitchat::ChitchatSkill;
use cf_skills::intent::{IntentResolver, L0RuleEngine};
use cf_skills::query::QuerySkill;
use cf_skills::{Skill, SkillDeps, SkillRegistry};
use cf_state::{InMemoryStateStore, MemoryManager, StateManager, SystemTime, TranscriptStore};

use crate::runtime::cost_guard::CostGuard;
use crate::runtime::dedupe::CallbackDedupe;
use crate::runtime::usage_log::UsageLog;
use crate::runtime::user_lock::UserLockMap;

/// Everything a request handler needs, grouped by concern:
/// - **Core services** — config, backend client, schema cache, LLM
/// - **Conversation state** — state manager, transcripts, memory
/// - **Routing** — skill registry, intent resolver (swappable on reload)
/// - **Runtime guards** — user locks, cost guard, dedup stores
/// - **Rendering & accounting** — card renderer, usage log
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub client: Arc<dyn BitableClient>,
    pub schema: Arc<SchemaCache>,
    pub llm: Arc<dyn LlmFacade>,

    // ── Conversation state ────────────────────────────────────────────
    pub states: Arc<StateManager>,
    pub transcripts: Arc<TranscriptStore>,
    pub memory: Arc<MemoryManager>,

    // ── Routing ───────────────────────────────────────────────────────
    pub registry: Arc<SkillRegistry>,
    pub resolver: Arc<RwLock<Arc<IntentResolver>>>,

    // ── Mutation commit path ──────────────────────────────────────────
    pub executor: Arc<ActionExecutor>,

    // ── Runtime guards ────────────────────────────────────────────────
    pub user_locks: Arc<UserLockMap>,
    pub cost_guard: Arc<CostGuard>,
    /// Inbound event-id idempotency.
    pub event_dedupe: Arc<IdempotencyStore>,
    /// Callback semantic dedup + in-flight guard.
    pub callback_dedupe: Arc<CallbackDedupe>,
    /// Backpressure bound on concurrently-processed requests.
    pub in_flight: Arc<Semaphore>,

    // ── Rendering & accounting ────────────────────────────────────────
    pub renderer: Arc<CardRenderer>,
    pub usage_log: Arc<UsageLog>,
    /// HMAC secret for adapter signature verification (dev mode: none).
    pub signing_secret: Option<Vec<u8>>,
}

impl AppState {
    /// Wire the full state graph from config plus the two external
    /// client seams.
    pub fn build(
        config: Arc<Config>,
        client: Arc<dyn BitableClient>,
        llm: Arc<dyn LlmFacade>,
    ) -> Self {
        let clock = Arc::new(SystemClock);
        let time = Arc::new(SystemTime);

        let schema = Arc::new(SchemaCache::new(
            config.bitable.schema_cache_ttl_secs,
            clock.clone(),
        ));
        let states = Arc::new(StateManager::new(
            Arc::new(InMemoryStateStore::new()),
            time.clone(),
            config.state.clone(),
        ));
        let transcripts = Arc::new(TranscriptStore::new(config.state.transcript_token_budget));
        let memory = Arc::new(MemoryManager::new(config.state.memory_snapshot_events));

        let deps = SkillDeps {
            client: client.clone(),
            schema: schema.clone(),
            llm: llm.clone(),
            tables: Arc::new(config.tables.clone()),
            skills: Arc::new(config.skills.clone()),
            pending_ttl_secs: config.state.pending_action_ttl_secs,
        };
        let registry = Arc::new(SkillRegistry::new());
        registry.replace_all(build_skills(&deps, &config));

        let resolver = Arc::new(RwLock::new(Arc::new(build_resolver(&config, llm.clone()))));

        let executor = Arc::new(ActionExecutor::new(
            client.clone(),
            schema.clone(),
            Arc::new(config.tables.clone()),
            config.state.pending_action_ttl_secs,
        ));

        let engine = TemplateEngine::new(
            config.cards.templates_root.clone(),
            config.cards.template_cache_size,
        );
        let renderer = Arc::new(CardRenderer::new(
            engine,
            &config.skills.assistant_name,
            &config.cards.query_list_style,
        ));

        let signing_secret = std::env::var(&config.server.signing_secret_env)
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| s.into_bytes());

        Self {
            client,
            schema,
            llm,
            states,
            transcripts,
            memory,
            registry,
            resolver,
            executor,
            user_locks: Arc::new(UserLockMap::new()),
            cost_guard: Arc::new(CostGuard::new(config.cost.clone(), time)),
            event_dedupe: Arc::new(IdempotencyStore::new(
                8192,
                Duration::from_secs(600),
                clock.clone(),
            )),
            callback_dedupe: Arc::new(CallbackDedupe::new(Duration::from_secs(600), clock)),
            in_flight: Arc::new(Semaphore::new(config.server.max_in_flight)),
            renderer,
            usage_log: Arc::new(UsageLog::new(Some("data/usage.jsonl".into()))),
            signing_secret,
            config,
        }
    }

    /// Rebuild the intent parser and the skill router from a freshly
    /// loaded config. In-flight requests keep the old instances (they
    /// hold `Arc`s); new requests see the new ones.
    pub fn reload_routing(&self, config: &Config) {
        let deps = SkillDeps {
            client: self.client.clone(),
            schema: self.schema.clone(),
            llm: self.llm.clone(),
            tables: Arc::new(config.tables.clone()),
            skills: Arc::new(config.skills.clone()),
            pending_ttl_secs: config.state.pending_action_ttl_secs,
        };
        self.registry.replace_all(build_skills(&deps, config));
        *self.resolver.write() = Arc::new(build_resolver(config, self.llm.clone()));
        tracing::info!("routing reloaded from config");
    }

    pub fn current_resolver(&self) -> Arc<IntentResolver> {
        self.resolver.read().clone()
    }
}

fn build_skills(deps: &SkillDeps, config: &Config) -> Vec<Arc<dyn Skill>> {
    vec![
        Arc::new(
            QuerySkill::new(
                deps.clone(),
                config.bitable.local_scan_max_pages,
                config.bitable.page_size,
            )
            .with_display_limit(config.cards.list_page_size),
        ),
        Arc::new(CreateSkill::new(deps.clone())),
        Arc::new(UpdateSkill::new(deps.clone())),
        Arc::new(DeleteSkill::new(deps.clone())),
        Arc::new(ChitchatSkill::new(deps.clone())),
    ]
}

fn build_resolver(config: &Config, llm: Arc<dyn LlmFacade>) -> IntentResolver {
    IntentResolver::new(
        L0RuleEngine::new(&config.skills.l0_rules),
        llm,
        config.skills.planner_confidence_threshold,
        config.llm.default_timeout_ms,
    )
}
