//! Binary request/response and push protocol.
//!
//! Wire format: one bincode-encoded message per WebSocket binary frame.
//! ```text
//!  client ── ClientMessage::Request { correlation_id, auth_token, request } ──► server
//!  client ◄── ServerMessage::Response { correlation_id, response } ────────── server
//!  client ◄── ServerMessage::Changes { subscriber_id, changes } ───────────── server (push)
//!  client ◄── ServerMessage::FeedEnded { subscriber_id, reason } ──────────── server (push)
//! ```
//!
//! Mutations carry a caller-generated `request_id`; resending the same
//! request is always safe.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    Application, FeedEnd, Host, MutationReceipt, PropertiesChanges, PropertyId, PropertyItem,
    PropertyRecord, RequestId, SearchQuery, SubscriberId, Version,
};
use crate::store::Rejection;

/// A single request to the configuration server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    CreateApplication {
        request_id: RequestId,
        application_name: String,
    },
    CreateHost {
        request_id: RequestId,
        host_name: String,
    },
    UpdateProperty {
        request_id: RequestId,
        application_name: String,
        host_name: String,
        property_name: String,
        value: String,
        /// `None` only when the property has no live record
        version: Option<Version>,
    },
    DeleteProperty {
        request_id: RequestId,
        application_name: String,
        host_name: String,
        property_name: String,
        version: Version,
    },
    ListApplications,
    ListHosts,
    ListProperties {
        application_name: String,
    },
    ReadProperty {
        application_name: String,
        host_name: String,
        property_name: String,
    },
    SearchProperties(SearchQuery),
    SubscribeApplication {
        application_name: String,
        host_name: Option<String>,
        subscriber_id: SubscriberId,
    },
    OpenFeed {
        subscriber_id: SubscriberId,
    },
    CloseFeed {
        subscriber_id: SubscriberId,
    },
    Ping,
}

impl Request {
    /// Whether the request changes server state (and so needs an owner role).
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Request::CreateApplication { .. }
                | Request::CreateHost { .. }
                | Request::UpdateProperty { .. }
                | Request::DeleteProperty { .. }
        )
    }

    /// Safe to resend automatically after a timeout.
    ///
    /// Mutations are idempotent under their request id too, but they are
    /// never retried on the caller's behalf.
    pub fn is_idempotent_read(&self) -> bool {
        matches!(
            self,
            Request::ListApplications
                | Request::ListHosts
                | Request::ListProperties { .. }
                | Request::ReadProperty { .. }
                | Request::SearchProperties(_)
                | Request::SubscribeApplication { .. }
                | Request::Ping
        )
    }

    pub fn update_property(
        request_id: RequestId,
        id: &PropertyId,
        value: impl Into<String>,
        version: Option<Version>,
    ) -> Self {
        Request::UpdateProperty {
            request_id,
            application_name: id.application.clone(),
            host_name: id.host.clone(),
            property_name: id.property.clone(),
            value: value.into(),
            version,
        }
    }

    pub fn delete_property(request_id: RequestId, id: &PropertyId, version: Version) -> Self {
        Request::DeleteProperty {
            request_id,
            application_name: id.application.clone(),
            host_name: id.host.clone(),
            property_name: id.property.clone(),
            version,
        }
    }

    pub fn read_property(id: &PropertyId) -> Self {
        Request::ReadProperty {
            application_name: id.application.clone(),
            host_name: id.host.clone(),
            property_name: id.property.clone(),
        }
    }
}

/// Outcome of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Mutation committed (or replayed from the idempotency records)
    Committed(MutationReceipt),
    /// Typed, recoverable rejection
    Rejected(Rejection),
    /// Infrastructure failure on the server
    Failed { message: String },
    Unauthorized { message: String },
    Applications(Vec<Application>),
    Hosts(Vec<Host>),
    Properties(Vec<PropertyRecord>),
    Property(Option<PropertyRecord>),
    Subscribed {
        subscriber_id: SubscriberId,
        snapshot: Vec<PropertyItem>,
        last_version: Version,
    },
    FeedOpened { subscriber_id: SubscriberId },
    FeedClosed { subscriber_id: SubscriberId },
    Pong,
}

/// Client → server frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    Request {
        correlation_id: u64,
        auth_token: Option<String>,
        request: Request,
    },
}

/// Server → client frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    Response {
        correlation_id: u64,
        response: Response,
    },
    Changes {
        subscriber_id: SubscriberId,
        changes: PropertiesChanges,
    },
    FeedEnded {
        subscriber_id: SubscriberId,
        reason: FeedEnd,
    },
}

impl ClientMessage {
    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

impl ServerMessage {
    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(msg, bincode::config::standard())
        .map_err(|e| ProtocolError::Serialization(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
    Ok(msg)
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Frame too large: {size} bytes (limit {limit})")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_update_request_carries_identity() {
        let id = PropertyId::new("billing", "host1", "price");
        let request_id = Uuid::new_v4();
        let msg = ClientMessage::Request {
            correlation_id: 7,
            auth_token: Some("token".into()),
            request: Request::update_property(request_id, &id, "12", Some(1)),
        };

        let decoded = ClientMessage::decode(&msg.encode().unwrap()).unwrap();
        let ClientMessage::Request {
            correlation_id,
            request,
            ..
        } = decoded;
        assert_eq!(correlation_id, 7);
        match request {
            Request::UpdateProperty {
                request_id: r,
                application_name,
                host_name,
                property_name,
                value,
                version,
            } => {
                assert_eq!(r, request_id);
                assert_eq!(application_name, "billing");
                assert_eq!(host_name, "host1");
                assert_eq!(property_name, "price");
                assert_eq!(value, "12");
                assert_eq!(version, Some(1));
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_rejection_survives_the_wire() {
        let msg = ServerMessage::Response {
            correlation_id: 1,
            response: Response::Rejected(Rejection::UpdateConflict {
                id: PropertyId::new("billing", "host1", "price"),
                expected: Some(1),
                current: Some(2),
            }),
        };
        assert_eq!(ServerMessage::decode(&msg.encode().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_tombstone_item_on_the_wire() {
        let msg = ServerMessage::Changes {
            subscriber_id: Uuid::new_v4(),
            changes: PropertiesChanges {
                application: "billing".into(),
                last_version: 4,
                items: vec![PropertyItem {
                    host: "host1".into(),
                    property: "price".into(),
                    version: 4,
                    value: None,
                }],
            },
        };
        match ServerMessage::decode(&msg.encode().unwrap()).unwrap() {
            ServerMessage::Changes { changes, .. } => assert!(changes.items[0].is_tombstone()),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_request_classification() {
        let id = PropertyId::new("a", "h", "p");
        assert!(Request::update_property(Uuid::new_v4(), &id, "v", None).is_mutation());
        assert!(Request::delete_property(Uuid::new_v4(), &id, 1).is_mutation());
        assert!(!Request::read_property(&id).is_mutation());
        assert!(Request::read_property(&id).is_idempotent_read());
        assert!(Request::ListHosts.is_idempotent_read());
        assert!(!Request::OpenFeed {
            subscriber_id: Uuid::new_v4()
        }
        .is_idempotent_read());
        assert!(!Request::CreateHost {
            request_id: Uuid::new_v4(),
            host_name: "h".into()
        }
        .is_idempotent_read());
    }

    #[test]
    fn test_decode_invalid_bytes() {
        assert!(matches!(
            ServerMessage::decode(&[0xFF, 0xFF, 0xFF]),
            Err(ProtocolError::Deserialization(_))
        ));
    }

    #[test]
    fn test_feed_ended_reason() {
        let msg = ServerMessage::FeedEnded {
            subscriber_id: Uuid::new_v4(),
            reason: FeedEnd::Failed {
                reason: "lagged".into(),
            },
        };
        match ServerMessage::decode(&msg.encode().unwrap()).unwrap() {
            ServerMessage::FeedEnded { reason, .. } => assert!(reason.is_failure()),
            other => panic!("unexpected message {other:?}"),
        }
    }
}
