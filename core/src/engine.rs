//! The DFS engine: one store connection, the loaded config and a clock,
//! handed out to the services that operate on them.
//!
//! RULES:
//!   - Services borrow the engine's parts; none of them own a connection.
//!   - Every timestamp comes from the engine's clock.
//!   - One engine per thread. Use `reopen()` for another connection to the
//!     same database file.

use chrono::{TimeZone, Utc};
use std::sync::Arc;

use crate::{
    agency_gateway::AgencyGateway,
    agent_manager::AgentManager,
    authorization_queue::AuthorizationQueue,
    clock::{Clock, ManualClock, SystemClock},
    config::DfsConfig,
    error::DfsResult,
    event::EventLogEntry,
    ledger::Ledger,
    store::BankStore,
};

pub struct DfsEngine {
    pub config:  DfsConfig,
    store:       BankStore,
    clock:       Arc<dyn Clock>,
    test_clock:  Option<Arc<ManualClock>>,
}

impl DfsEngine {
    /// Wire an engine over an already-migrated store.
    pub fn build(store: BankStore, config: DfsConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
            test_clock: None,
        }
    }

    /// Open (and migrate) a database file with the system clock.
    pub fn open(db_path: &str, config: DfsConfig) -> DfsResult<Self> {
        let store = BankStore::open(db_path)?;
        store.migrate()?;
        Ok(Self::build(store, config, Arc::new(SystemClock)))
    }

    /// In-memory database, default config, and a manual clock starting at
    /// 2026-01-05 09:00 UTC.
    pub fn build_test() -> DfsResult<Self> {
        let store = BankStore::in_memory()?;
        store.migrate()?;
        Self::build_test_with(store)
    }

    /// Test engine over a file database, for multi-connection tests.
    pub fn build_test_at(db_path: &str) -> DfsResult<Self> {
        let store = BankStore::open(db_path)?;
        store.migrate()?;
        Self::build_test_with(store)
    }

    fn build_test_with(store: BankStore) -> DfsResult<Self> {
        let start = Utc
            .with_ymd_and_hms(2026, 1, 5, 9, 0, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("invalid test clock start"))?;
        let clock = Arc::new(ManualClock::new(start));
        let mut engine = Self::build(store, DfsConfig::default(), clock.clone());
        engine.test_clock = Some(clock);
        Ok(engine)
    }

    /// A second engine on a new connection to the same database, sharing
    /// this engine's clock and config.
    pub fn reopen(&self) -> DfsResult<Self> {
        Ok(Self {
            config:     self.config.clone(),
            store:      self.store.reopen()?,
            clock:      self.clock.clone(),
            test_clock: self.test_clock.clone(),
        })
    }

    pub fn ledger(&self) -> Ledger<'_> {
        Ledger::new(&self.store, self.clock.as_ref())
    }

    pub fn agents(&self) -> AgentManager<'_> {
        AgentManager::new(&self.store, &self.config, self.clock.as_ref())
    }

    pub fn gateway(&self) -> AgencyGateway<'_> {
        AgencyGateway::new(&self.store, &self.config, self.clock.as_ref())
    }

    pub fn queue(&self) -> AuthorizationQueue<'_> {
        AuthorizationQueue::new(&self.store, &self.config, self.clock.as_ref())
    }

    /// Direct store access for reads and test assertions.
    pub fn store(&self) -> &BankStore {
        &self.store
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// The manual clock of a test engine; None for engines built with `build`/`open`.
    pub fn test_clock(&self) -> Option<&ManualClock> {
        self.test_clock.as_deref()
    }

    pub fn events_for_entity(&self, entity_id: &str) -> DfsResult<Vec<EventLogEntry>> {
        self.store.events_for_entity(entity_id)
    }
}
