use std::{
    collections::HashMap,
    fmt::Display,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use domain::{AggregateOutcome, Balances, DeFiPosition, Transaction, WalletContext};
use serde::Serialize;
use tokio::{sync::RwLock, time::Instant};
use uuid::Uuid;

/// What a dashboard is looking at. Changing it invalidates everything in flight.
pub type Selection = WalletContext;

/// Per-component display state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Resource<T> {
    Idle,
    Loading,
    Error(String),
    Data(T),
}

impl<T> Resource<T> {
    /// Collapses a resolution into display state. The cause is logged where it happened; the
    /// component only gets `message`.
    pub fn from_result<E: Display>(result: Result<T, E>, message: &str) -> Self {
        match result {
            Ok(value) => Resource::Data(value),
            Err(_) => Resource::Error(message.to_string()),
        }
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Resource::Data(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Resource::Loading)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub id: Uuid,
    pub generation: u64,
    pub selection: Selection,
    pub portfolio: Resource<AggregateOutcome>,
    pub balances: Resource<Balances>,
    pub positions: Resource<Vec<DeFiPosition>>,
    pub transactions: Resource<Vec<Transaction>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Results of one refresh, applied all at once.
#[derive(Debug, Clone)]
pub struct DashboardUpdate {
    pub portfolio: Resource<AggregateOutcome>,
    pub balances: Resource<Balances>,
    pub positions: Resource<Vec<DeFiPosition>>,
    pub transactions: Resource<Vec<Transaction>>,
}

impl DashboardUpdate {
    pub fn idle() -> Self {
        Self {
            portfolio: Resource::Idle,
            balances: Resource::Idle,
            positions: Resource::Idle,
            transactions: Resource::Idle,
        }
    }

    fn loading() -> Self {
        Self {
            portfolio: Resource::Loading,
            balances: Resource::Loading,
            positions: Resource::Loading,
            transactions: Resource::Loading,
        }
    }

    fn pending_for(selection: &Selection) -> Self {
        if selection.is_connected() {
            Self::loading()
        } else {
            Self::idle()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied,
    /// The selection changed while resolving; results were dropped.
    Stale,
    /// A refresh started later already landed; results were dropped.
    Superseded,
}

/// What one refresh runs against. `request` orders refreshes within a generation.
#[derive(Debug, Clone)]
pub struct RefreshTicket {
    pub selection: Selection,
    pub generation: u64,
    pub request: u64,
}

struct SessionState {
    view: DashboardView,
    applied_request: u64,
    last_seen: Instant,
}

/// One viewer's dashboard. Results are applied only while the generation they started under is
/// current and no later refresh has been applied yet.
pub struct DashboardSession {
    id: Uuid,
    requests: AtomicU64,
    state: RwLock<SessionState>,
}

impl DashboardSession {
    pub fn new(selection: Selection) -> Self {
        let id = Uuid::new_v4();
        let pending = DashboardUpdate::pending_for(&selection);
        Self {
            id,
            requests: AtomicU64::new(0),
            state: RwLock::new(SessionState {
                view: DashboardView {
                    id,
                    generation: 1,
                    selection,
                    portfolio: pending.portfolio,
                    balances: pending.balances,
                    positions: pending.positions,
                    transactions: pending.transactions,
                    updated_at: None,
                },
                applied_request: 0,
                last_seen: Instant::now(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current view. Counts as client activity for idle expiry.
    pub async fn view(&self) -> DashboardView {
        let mut state = self.state.write().await;
        state.last_seen = Instant::now();
        state.view.clone()
    }

    /// Time since a client last read or changed this session.
    pub async fn idle_for(&self) -> Duration {
        self.state.read().await.last_seen.elapsed()
    }

    /// Switches selection and returns the new generation.
    pub async fn select(&self, selection: Selection) -> u64 {
        let mut state = self.state.write().await;
        let pending = DashboardUpdate::pending_for(&selection);
        state.last_seen = Instant::now();
        let view = &mut state.view;
        view.generation += 1;
        view.selection = selection;
        view.portfolio = pending.portfolio;
        view.balances = pending.balances;
        view.positions = pending.positions;
        view.transactions = pending.transactions;
        view.generation
    }

    pub async fn begin(&self) -> RefreshTicket {
        let state = self.state.read().await;
        RefreshTicket {
            selection: state.view.selection.clone(),
            generation: state.view.generation,
            request: self.requests.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    pub async fn apply(&self, ticket: &RefreshTicket, update: DashboardUpdate) -> RefreshOutcome {
        let mut state = self.state.write().await;
        if state.view.generation != ticket.generation {
            return RefreshOutcome::Stale;
        }
        if ticket.request < state.applied_request {
            return RefreshOutcome::Superseded;
        }
        state.applied_request = ticket.request;
        let view = &mut state.view;
        view.portfolio = update.portfolio;
        view.balances = update.balances;
        view.positions = update.positions;
        view.transactions = update.transactions;
        view.updated_at = Some(Utc::now());
        RefreshOutcome::Applied
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<DashboardSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, selection: Selection) -> Arc<DashboardSession> {
        let session = Arc::new(DashboardSession::new(selection));
        self.sessions
            .write()
            .await
            .insert(session.id(), session.clone());
        session
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<DashboardSession>> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn all(&self) -> Vec<Arc<DashboardSession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    /// Drops sessions nobody has looked at for `ttl`; returns how many went.
    pub async fn expire_idle(&self, ttl: Duration) -> usize {
        let mut idle = Vec::new();
        for session in self.all().await {
            if session.idle_for().await >= ttl {
                idle.push(session.id());
            }
        }
        let mut sessions = self.sessions.write().await;
        idle.iter().filter(|id| sessions.remove(*id).is_some()).count()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use domain::Account;

    use super::*;

    fn connected() -> Selection {
        WalletContext::connected(
            Account::parse("0x00000000000000000000000000000000000000aa").unwrap(),
            vec![1],
        )
    }

    fn data_update() -> DashboardUpdate {
        DashboardUpdate {
            portfolio: Resource::Idle,
            balances: Resource::Data(Balances::new()),
            positions: Resource::Data(Vec::new()),
            transactions: Resource::Data(Vec::new()),
        }
    }

    #[tokio::test]
    async fn new_session_is_loading_when_connected_and_idle_otherwise() {
        let view = DashboardSession::new(connected()).view().await;
        assert!(view.balances.is_loading());
        assert_eq!(view.generation, 1);

        let view = DashboardSession::new(Selection::default()).view().await;
        assert_eq!(view.positions, Resource::Idle);
    }

    #[tokio::test]
    async fn results_from_an_old_generation_are_dropped() {
        let session = DashboardSession::new(connected());
        let old = session.begin().await;
        let next = session.select(Selection::default()).await;
        assert_eq!(next, old.generation + 1);

        assert_eq!(
            session.apply(&old, data_update()).await,
            RefreshOutcome::Stale
        );
        let view = session.view().await;
        assert_eq!(view.balances, Resource::Idle);
        assert!(view.updated_at.is_none());

        let current = session.begin().await;
        assert_eq!(current.generation, next);
        assert_eq!(
            session.apply(&current, data_update()).await,
            RefreshOutcome::Applied
        );
        assert!(session.view().await.balances.data().is_some());
    }

    #[test]
    fn resource_serializes_with_state_tag() {
        let error: Resource<Vec<DeFiPosition>> =
            Resource::from_result(Err::<Vec<DeFiPosition>, _>("boom"), "positions unavailable");
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["state"], "error");
        assert_eq!(json["value"], "positions unavailable");

        let empty: Resource<Vec<DeFiPosition>> = Resource::Data(Vec::new());
        let json = serde_json::to_value(&empty).unwrap();
        assert_eq!(json["state"], "data");
        assert!(json["value"].as_array().unwrap().is_empty());

        let idle = serde_json::to_value(&Resource::<u8>::Idle).unwrap();
        assert_eq!(idle, serde_json::json!({ "state": "idle" }));
    }

    #[tokio::test]
    async fn earlier_refresh_cannot_overwrite_a_later_one() {
        let session = DashboardSession::new(connected());
        let first = session.begin().await;
        let second = session.begin().await;
        assert!(second.request > first.request);

        assert_eq!(
            session.apply(&second, data_update()).await,
            RefreshOutcome::Applied
        );
        assert_eq!(
            session.apply(&first, DashboardUpdate::idle()).await,
            RefreshOutcome::Superseded
        );
        assert!(session.view().await.balances.data().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_expire_and_read_ones_stay() {
        let registry = SessionRegistry::new();
        let idle = registry.create(connected()).await;
        let watched = registry.create(connected()).await;

        tokio::time::advance(Duration::from_secs(600)).await;
        watched.view().await;
        assert_eq!(registry.expire_idle(Duration::from_secs(300)).await, 1);
        assert!(registry.get(idle.id()).await.is_none());
        assert!(registry.get(watched.id()).await.is_some());
    }

    #[tokio::test]
    async fn removed_sessions_are_gone() {
        let registry = SessionRegistry::new();
        let session = registry.create(connected()).await;
        assert!(registry.remove(session.id()).await);
        assert!(!registry.remove(session.id()).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn registry_finds_sessions_by_id() {
        let registry = SessionRegistry::new();
        let session = registry.create(connected()).await;
        assert!(registry.get(session.id()).await.is_some());
        assert!(registry.get(Uuid::new_v4()).await.is_none());
        assert_eq!(registry.len().await, 1);
    }
}
