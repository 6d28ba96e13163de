//! In-memory version store.
//!
//! Lock layout:
//! ```text
//! IdempotencyGuard (Mutex) ── claim the request id, then release the lock
//!
//! applications map (RwLock) ──► ApplicationState (Mutex, one per app)
//!                                   │
//!                     hosts (RwLock) ┤
//!                                   ▼
//!                        IdempotencyGuard (Mutex) ── commit receipt
//! ```
//! The per-application mutex serializes version allocation for that
//! application only; different applications commit in parallel. A request
//! id is claimed before any application lock is taken, so two calls sharing
//! an id never both apply, even when they target different applications.

use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::{
    validate_id, validate_name, Committed, PropertyMutation, Rejection, StoreError, VersionStore,
};
use crate::idempotency::{Claim, IdempotencyGuard};
use crate::model::{
    Application, Host, MutationReceipt, PropertyId, PropertyRecord, RequestId, Version,
};

/// Application row plus its current-state property table.
struct ApplicationState {
    application: Application,
    /// (host, property) → record
    properties: BTreeMap<(String, String), PropertyRecord>,
}

impl ApplicationState {
    fn new(application: Application) -> Self {
        Self {
            application,
            properties: BTreeMap::new(),
        }
    }

    fn key(id: &PropertyId) -> (String, String) {
        (id.host.clone(), id.property.clone())
    }
}

/// Version store backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    applications: RwLock<HashMap<String, Arc<Mutex<ApplicationState>>>>,
    hosts: RwLock<HashMap<String, Host>>,
    guard: Mutex<IdempotencyGuard>,
    /// Signalled whenever a claim is committed or released
    settled: Condvar,
}

enum Begin<'a> {
    Replay(Committed),
    Fresh(Reservation<'a>),
}

/// A claimed request id; released on drop unless committed.
struct Reservation<'a> {
    store: &'a MemoryStore,
    request_id: RequestId,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self, receipt: MutationReceipt) -> Committed {
        self.store.guard.lock().record(self.request_id, receipt.clone());
        self.committed = true;
        self.store.settled.notify_all();
        Committed::fresh(receipt)
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.store.guard.lock().release(&self.request_id);
            self.store.settled.notify_all();
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay a committed request, or claim its id, waiting out a
    /// concurrent call holding the same id.
    fn begin(&self, request_id: RequestId) -> Begin<'_> {
        let mut guard = self.guard.lock();
        loop {
            match guard.claim(request_id) {
                Claim::Replay(receipt) => return Begin::Replay(Committed::replayed(receipt)),
                Claim::Claimed => {
                    return Begin::Fresh(Reservation {
                        store: self,
                        request_id,
                        committed: false,
                    })
                }
                Claim::InFlight => self.settled.wait(&mut guard),
            }
        }
    }

    fn application_state(&self, name: &str) -> Result<Arc<Mutex<ApplicationState>>, Rejection> {
        self.applications
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Rejection::ApplicationNotFound {
                application: name.into(),
            })
    }

    /// Shared body of update/delete: validate, claim the id, lock the
    /// application, check, allocate a version and commit record + receipt.
    fn mutate_property(
        &self,
        request_id: RequestId,
        id: &PropertyId,
        mutation: PropertyMutation,
    ) -> Result<Committed, StoreError> {
        validate_id(id)?;
        let reservation = match self.begin(request_id) {
            Begin::Replay(done) => return Ok(done),
            Begin::Fresh(reservation) => reservation,
        };

        let state = self.application_state(&id.application)?;
        let mut state = state.lock();

        if !self.hosts.read().contains_key(&id.host) {
            return Err(Rejection::HostNotFound {
                host: id.host.clone(),
            }
            .into());
        }

        let key = ApplicationState::key(id);
        mutation.check(id, state.properties.get(&key))?;

        let version = state.application.allocate_version();
        let record = mutation.into_record(id.clone(), version);
        state.properties.insert(key, record.clone());

        let committed = reservation.commit(MutationReceipt::PropertyChanged { record });
        log::debug!("Committed {id} at version {version}");
        Ok(committed)
    }
}

impl VersionStore for MemoryStore {
    fn create_application(
        &self,
        request_id: RequestId,
        name: &str,
    ) -> Result<Committed, StoreError> {
        validate_name(name)?;
        let reservation = match self.begin(request_id) {
            Begin::Replay(done) => return Ok(done),
            Begin::Fresh(reservation) => reservation,
        };

        let mut applications = self.applications.write();
        if applications.contains_key(name) {
            return Err(Rejection::ApplicationAlreadyExists {
                application: name.into(),
            }
            .into());
        }

        applications.insert(
            name.to_owned(),
            Arc::new(Mutex::new(ApplicationState::new(Application::new(name)))),
        );
        let committed = reservation.commit(MutationReceipt::ApplicationCreated {
            application: name.into(),
        });

        log::info!("Created application {name}");
        Ok(committed)
    }

    fn create_host(&self, request_id: RequestId, name: &str) -> Result<Committed, StoreError> {
        validate_name(name)?;
        let reservation = match self.begin(request_id) {
            Begin::Replay(done) => return Ok(done),
            Begin::Fresh(reservation) => reservation,
        };

        let mut hosts = self.hosts.write();
        if hosts.contains_key(name) {
            return Err(Rejection::HostAlreadyExists { host: name.into() }.into());
        }

        hosts.insert(name.to_owned(), Host::new(name));
        let committed = reservation.commit(MutationReceipt::HostCreated { host: name.into() });

        log::info!("Created host {name}");
        Ok(committed)
    }

    fn update_property(
        &self,
        request_id: RequestId,
        id: &PropertyId,
        value: &str,
        expected: Option<Version>,
    ) -> Result<Committed, StoreError> {
        let mutation = PropertyMutation::Update {
            value: value.to_owned(),
            expected,
        };
        self.mutate_property(request_id, id, mutation)
    }

    fn delete_property(
        &self,
        request_id: RequestId,
        id: &PropertyId,
        expected: Version,
    ) -> Result<Committed, StoreError> {
        self.mutate_property(request_id, id, PropertyMutation::Delete { expected })
    }

    fn read_property(&self, id: &PropertyId) -> Result<Option<PropertyRecord>, StoreError> {
        let state = match self.applications.read().get(&id.application) {
            Some(state) => state.clone(),
            None => return Ok(None),
        };
        let state = state.lock();
        Ok(state.properties.get(&ApplicationState::key(id)).cloned())
    }

    fn application(&self, name: &str) -> Result<Option<Application>, StoreError> {
        let state = match self.applications.read().get(name) {
            Some(state) => state.clone(),
            None => return Ok(None),
        };
        let application = state.lock().application.clone();
        Ok(Some(application))
    }

    fn list_applications(&self) -> Result<Vec<Application>, StoreError> {
        let states: Vec<_> = self.applications.read().values().cloned().collect();
        let mut applications: Vec<Application> = states
            .iter()
            .map(|s| s.lock().application.clone())
            .collect();
        applications.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(applications)
    }

    fn list_hosts(&self) -> Result<Vec<Host>, StoreError> {
        let mut hosts: Vec<Host> = self.hosts.read().values().cloned().collect();
        hosts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(hosts)
    }

    fn list_properties(&self, application: &str) -> Result<Vec<PropertyRecord>, StoreError> {
        let state = self.application_state(application)?;
        let state = state.lock();
        Ok(state
            .properties
            .values()
            .filter(|r| r.is_live())
            .cloned()
            .collect())
    }
}
