//! Mutation and read operations: store first, then fan-out.
//!
//! A commit is published to the notifier only when it was freshly applied;
//! a replayed request id returns the stored receipt and publishes nothing.

use std::sync::Arc;

use crate::model::{
    Application, Host, MutationReceipt, PropertiesChanges, PropertyId, PropertyRecord,
    RequestId, SearchQuery, SubscriberId, Version,
};
use crate::notifier::{ChangeNotifier, Feed, FeedError, Subscription};
use crate::protocol::{Request, Response};
use crate::store::{Committed, StoreError, VersionStore};

/// The configuration service: an authoritative store plus its notifier.
#[derive(Clone)]
pub struct PropertyService {
    store: Arc<dyn VersionStore>,
    notifier: Arc<ChangeNotifier>,
}

impl PropertyService {
    pub fn new(store: Arc<dyn VersionStore>, broadcast_capacity: usize) -> Self {
        let notifier = Arc::new(ChangeNotifier::new(store.clone(), broadcast_capacity));
        Self { store, notifier }
    }

    pub fn store(&self) -> &Arc<dyn VersionStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    // ─── Mutations ────────────────────────────────────────────────────

    pub fn create_application(
        &self,
        request_id: RequestId,
        name: &str,
    ) -> Result<MutationReceipt, StoreError> {
        Ok(self.store.create_application(request_id, name)?.receipt)
    }

    pub fn create_host(
        &self,
        request_id: RequestId,
        name: &str,
    ) -> Result<MutationReceipt, StoreError> {
        Ok(self.store.create_host(request_id, name)?.receipt)
    }

    pub fn update_property(
        &self,
        request_id: RequestId,
        id: &PropertyId,
        value: &str,
        expected: Option<Version>,
    ) -> Result<MutationReceipt, StoreError> {
        let committed = self.store.update_property(request_id, id, value, expected)?;
        Ok(self.publish(committed))
    }

    pub fn delete_property(
        &self,
        request_id: RequestId,
        id: &PropertyId,
        expected: Version,
    ) -> Result<MutationReceipt, StoreError> {
        let committed = self.store.delete_property(request_id, id, expected)?;
        Ok(self.publish(committed))
    }

    fn publish(&self, committed: Committed) -> MutationReceipt {
        if !committed.replayed {
            if let MutationReceipt::PropertyChanged { record } = &committed.receipt {
                let delivered = self
                    .notifier
                    .publish(PropertiesChanges::from_record(record));
                log::trace!("Published {} to {delivered} feeds", record.id());
            }
        }
        committed.receipt
    }

    // ─── Reads ────────────────────────────────────────────────────────

    pub fn read_property(&self, id: &PropertyId) -> Result<Option<PropertyRecord>, StoreError> {
        self.store.read_property(id)
    }

    pub fn list_applications(&self) -> Result<Vec<Application>, StoreError> {
        self.store.list_applications()
    }

    pub fn list_hosts(&self) -> Result<Vec<Host>, StoreError> {
        self.store.list_hosts()
    }

    pub fn list_properties(&self, application: &str) -> Result<Vec<PropertyRecord>, StoreError> {
        self.store.list_properties(application)
    }

    pub fn search_properties(&self, query: &SearchQuery) -> Result<Vec<PropertyRecord>, StoreError> {
        self.store.search_properties(query)
    }

    pub fn configuration_snapshot_list(&self) -> Result<Vec<PropertyRecord>, StoreError> {
        self.store.configuration_snapshot_list()
    }

    // ─── Watch ────────────────────────────────────────────────────────

    pub fn subscribe(
        &self,
        application: &str,
        host_filter: Option<String>,
        subscriber_id: SubscriberId,
    ) -> Result<Subscription, StoreError> {
        self.notifier.subscribe(application, host_filter, subscriber_id)
    }

    pub fn open_feed(&self, subscriber_id: SubscriberId) -> Result<Feed, FeedError> {
        self.notifier.open_feed(subscriber_id)
    }

    /// Answer a connection-independent request.
    ///
    /// `OpenFeed` and `CloseFeed` need a push channel and are served by the
    /// connection that owns it; here they fail.
    pub fn handle(&self, request: Request) -> Response {
        let result = match request {
            Request::CreateApplication {
                request_id,
                application_name,
            } => self
                .create_application(request_id, &application_name)
                .map(Response::Committed),
            Request::CreateHost {
                request_id,
                host_name,
            } => self
                .create_host(request_id, &host_name)
                .map(Response::Committed),
            Request::UpdateProperty {
                request_id,
                application_name,
                host_name,
                property_name,
                value,
                version,
            } => {
                let id = PropertyId::new(application_name, host_name, property_name);
                self.update_property(request_id, &id, &value, version)
                    .map(Response::Committed)
            }
            Request::DeleteProperty {
                request_id,
                application_name,
                host_name,
                property_name,
                version,
            } => {
                let id = PropertyId::new(application_name, host_name, property_name);
                self.delete_property(request_id, &id, version)
                    .map(Response::Committed)
            }
            Request::ListApplications => self.list_applications().map(Response::Applications),
            Request::ListHosts => self.list_hosts().map(Response::Hosts),
            Request::ListProperties { application_name } => self
                .list_properties(&application_name)
                .map(Response::Properties),
            Request::ReadProperty {
                application_name,
                host_name,
                property_name,
            } => self
                .read_property(&PropertyId::new(application_name, host_name, property_name))
                .map(Response::Property),
            Request::SearchProperties(query) => {
                self.search_properties(&query).map(Response::Properties)
            }
            Request::SubscribeApplication {
                application_name,
                host_name,
                subscriber_id,
            } => self
                .subscribe(&application_name, host_name, subscriber_id)
                .map(|s| Response::Subscribed {
                    subscriber_id: s.subscriber_id,
                    snapshot: s.snapshot,
                    last_version: s.last_delivered_version,
                }),
            Request::OpenFeed { .. } | Request::CloseFeed { .. } => Ok(Response::Failed {
                message: "Feeds are only served over a connection".into(),
            }),
            Request::Ping => Ok(Response::Pong),
        };

        result.unwrap_or_else(into_response)
    }
}

/// Map a store failure to its wire outcome.
pub fn into_response(err: StoreError) -> Response {
    match err {
        StoreError::Rejected(rejection) => Response::Rejected(rejection),
        other => {
            log::error!("Request failed: {other}");
            Response::Failed {
                message: other.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Rejection};
    use uuid::Uuid;

    fn service() -> PropertyService {
        let service = PropertyService::new(Arc::new(MemoryStore::new()), 16);
        service
            .create_application(Uuid::new_v4(), "billing")
            .unwrap();
        service.create_host(Uuid::new_v4(), "host1").unwrap();
        service
    }

    fn price() -> PropertyId {
        PropertyId::new("billing", "host1", "price")
    }

    #[test]
    fn test_billing_scenario_through_handle() {
        let service = service();

        let first = service.handle(Request::update_property(Uuid::new_v4(), &price(), "10", None));
        assert!(matches!(&first, Response::Committed(r) if r.version() == Some(1)));

        let second =
            service.handle(Request::update_property(Uuid::new_v4(), &price(), "12", Some(1)));
        assert!(matches!(&second, Response::Committed(r) if r.version() == Some(2)));

        let third =
            service.handle(Request::update_property(Uuid::new_v4(), &price(), "13", Some(1)));
        assert!(matches!(
            third,
            Response::Rejected(Rejection::UpdateConflict { .. })
        ));

        match service.handle(Request::read_property(&price())) {
            Response::Property(Some(record)) => {
                assert_eq!(record.version(), 2);
                assert_eq!(record.value(), Some("12"));
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_commit_is_published_once() {
        let service = service();
        let sub = service.subscribe("billing", None, Uuid::new_v4()).unwrap();
        let mut feed = service.open_feed(sub.subscriber_id).unwrap();

        let request_id = Uuid::new_v4();
        let first = service
            .update_property(request_id, &price(), "10", None)
            .unwrap();
        let replay = service
            .update_property(request_id, &price(), "10", None)
            .unwrap();
        assert_eq!(first, replay);

        let batch = feed.recv().await.unwrap().unwrap();
        assert_eq!(batch.last_version, 1);
        assert_eq!(service.notifier().stats().batches_published, 1);
    }

    #[test]
    fn test_subscribe_response() {
        let service = service();
        service
            .update_property(Uuid::new_v4(), &price(), "10", None)
            .unwrap();

        let subscriber_id = Uuid::new_v4();
        match service.handle(Request::SubscribeApplication {
            application_name: "billing".into(),
            host_name: None,
            subscriber_id,
        }) {
            Response::Subscribed {
                subscriber_id: id,
                snapshot,
                last_version,
            } => {
                assert_eq!(id, subscriber_id);
                assert_eq!(snapshot.len(), 1);
                assert_eq!(last_version, 1);
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn test_rejections_map_to_wire() {
        let service = service();
        let response = service.handle(Request::CreateApplication {
            request_id: Uuid::new_v4(),
            application_name: "billing".into(),
        });
        assert_eq!(
            response,
            Response::Rejected(Rejection::ApplicationAlreadyExists {
                application: "billing".into()
            })
        );
        assert_eq!(
            service.handle(Request::ListProperties {
                application_name: "nope".into()
            }),
            Response::Rejected(Rejection::ApplicationNotFound {
                application: "nope".into()
            })
        );
    }

    #[test]
    fn test_feed_requests_need_a_connection() {
        let service = service();
        assert!(matches!(
            service.handle(Request::OpenFeed {
                subscriber_id: Uuid::new_v4()
            }),
            Response::Failed { .. }
        ));
        assert_eq!(service.handle(Request::Ping), Response::Pong);
    }
}
