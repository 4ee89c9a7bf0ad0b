//! Application state: proxy upstream, content client, identity provider,
//! document database, planner config, and the live session registry.
//!
//! Sessions are held in memory and evicted when idle. Guest records live on
//! disk under `DATA_DIR/local/<session id>.json`, so an evicted or pre-restart
//! session id is reopened from its record on next use.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::auth::IdentityProvider;
use crate::config::{load_planner_config_from_env, PlannerConfig, Settings};
use crate::content::ContentClient;
use crate::relay::{ChatUpstream, HttpUpstream, RelayError};
use crate::session::SessionController;
use crate::store::{DocumentDb, LocalStore, MemoryDocumentDb, StoreError};

pub type SharedSession = Arc<Mutex<SessionController>>;

struct SessionSlot {
    session: SharedSession,
    last_seen: Instant,
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub config: Arc<PlannerConfig>,
    /// Where `/api/grok-proxy` forwards to.
    pub upstream: Arc<dyn ChatUpstream>,
    pub content: ContentClient,
    pub identity: Arc<IdentityProvider>,
    pub db: Arc<dyn DocumentDb>,
    sessions: Arc<RwLock<HashMap<Uuid, SessionSlot>>>,
}

impl AppState {
    /// Build state from env: settings, TOML config, upstream client(s).
    #[instrument(level = "info", skip_all)]
    pub fn from_env() -> Result<Self, RelayError> {
        let settings = Settings::from_env();
        let config = Arc::new(load_planner_config_from_env());

        let upstream = HttpUpstream::new(settings.grok_api_url.clone(), settings.grok_api_key.clone())?;
        if upstream.has_credential() {
            info!(target: "ssc_planner", url = %upstream.url(), "Content proxy enabled.");
        } else {
            warn!(target: "ssc_planner", url = %upstream.url(), "GROK_API_KEY not set; proxied requests go out unauthenticated.");
        }
        let upstream: Arc<dyn ChatUpstream> = Arc::new(upstream);

        // Daily/quiz generation reuses the proxy's upstream unless a remote proxy is configured.
        let content_upstream: Arc<dyn ChatUpstream> = match &settings.content_proxy_url {
            Some(url) => {
                info!(target: "ssc_planner", %url, "Content generation routed through remote proxy.");
                Arc::new(HttpUpstream::new(url.clone(), None)?)
            }
            None => upstream.clone(),
        };

        let content = ContentClient::new(content_upstream, config.prompts.clone(), &config.content);
        info!(target: "ssc_planner", topics = config.topics.len(), model = %config.content.model, cache = ?config.content.cache_policy, "Planner configured");

        Ok(Self::new(settings, config, upstream, content, Arc::new(MemoryDocumentDb::default())))
    }

    pub fn new(
        settings: Settings,
        config: Arc<PlannerConfig>,
        upstream: Arc<dyn ChatUpstream>,
        content: ContentClient,
        db: Arc<dyn DocumentDb>,
    ) -> Self {
        Self {
            settings,
            config,
            upstream,
            content,
            identity: Arc::new(IdentityProvider::new()),
            db,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn controller(&self, id: Uuid, local: LocalStore) -> SharedSession {
        let controller = SessionController::new(
            id,
            self.identity.client(),
            Arc::new(local),
            self.db.clone(),
            self.config.clone(),
            self.content.clone(),
        );
        Arc::new(Mutex::new(controller))
    }

    fn record_path(&self, id: &Uuid) -> PathBuf {
        self.settings.local_dir().join(format!("{id}.json"))
    }

    /// Open a new signed-out session with its own device-local record.
    #[instrument(level = "info", skip(self))]
    pub async fn create_session(&self) -> Result<(Uuid, SharedSession), StoreError> {
        let id = Uuid::new_v4();
        let local = LocalStore::open(self.record_path(&id)).await?;
        let shared = self.controller(id, local);
        let slot = SessionSlot { session: shared.clone(), last_seen: Instant::now() };
        self.sessions.write().await.insert(id, slot);
        info!(target: "session", session = %id, "Session created");
        Ok((id, shared))
    }

    /// Live session for `id`. A session that is no longer in memory (restart or
    /// idle eviction) is rebuilt, signed out, from its device-local record if one exists.
    pub async fn session(&self, id: &Uuid) -> Option<SharedSession> {
        let mut sessions = self.sessions.write().await;
        if let Some(slot) = sessions.get_mut(id) {
            slot.last_seen = Instant::now();
            return Some(slot.session.clone());
        }

        let local = match LocalStore::open_existing(self.record_path(id)).await {
            Ok(Some(local)) => local,
            Ok(None) => return None,
            Err(e) => {
                error!(target: "session", session = %id, error = %e, "Could not reopen local record");
                return None;
            }
        };
        let shared = self.controller(*id, local);
        sessions.insert(*id, SessionSlot { session: shared.clone(), last_seen: Instant::now() });
        info!(target: "session", session = %id, "Session restored from local record");
        Some(shared)
    }

    /// Drop a session from memory. Its device-local record stays on disk.
    pub async fn close_session(&self, id: &Uuid) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            info!(target: "session", session = %id, "Session closed");
        }
        removed
    }

    /// Drop sessions not touched within `max_idle`; returns how many went.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, slot| slot.last_seen.elapsed() < max_idle);
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(target: "session", evicted, live = sessions.len(), "Evicted idle sessions");
        }
        evicted
    }

    /// Periodically evict sessions idle for longer than `settings.session_idle`.
    /// The task ends once the state is dropped.
    pub fn spawn_idle_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let state = Arc::downgrade(self);
        let max_idle = self.settings.session_idle;
        let period = (max_idle / 4).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(state) = state.upgrade() else { break };
                state.evict_idle(max_idle).await;
            }
        })
    }

    #[cfg(test)]
    pub async fn live_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }
}
