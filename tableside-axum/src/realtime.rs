//! WebSocket fan-out of engine events.
//!
//! A connection picks its rooms once, at upgrade time: staff by bearer credential (header or
//! `access_token` query parameter), customer devices by a valid `session` token. Staff get every
//! event routed to their rooms. A customer device only gets the order events of its own session
//! and that session's expiry, after which the socket is closed. It is also closed once the
//! session's `expires_at` passes.

use std::time::Duration;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tableside::{ConnectionIdentity, Error, Event, StaffIdentity, Subscription, TableSession};
use tableside_core::repositories::RepositoryProvider;

use crate::{
    error::{ApiError, Result},
    extractors::OptionalStaffUser,
    middleware::{AppState, verify_optional},
};

#[derive(Debug, Default, Deserialize)]
pub struct ConnectQuery {
    pub access_token: Option<String>,
    pub session: Option<String>,
}

/// Frames a client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ClientCommand {
    Ping,
}

/// Who sits on the other end of a real-time connection.
#[derive(Debug, Clone)]
pub enum Peer {
    Staff(StaffIdentity),
    Customer(TableSession),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relay {
    Forward,
    Skip,
    ForwardAndClose,
}

impl Peer {
    pub fn identity(&self) -> ConnectionIdentity {
        match self {
            Peer::Staff(staff) => ConnectionIdentity::Staff(staff.clone()),
            Peer::Customer(session) => ConnectionIdentity::Table(session.table_number),
        }
    }

    /// How long a customer connection may stay open. `None` for staff.
    fn lifetime(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Peer::Staff(_) => None,
            Peer::Customer(session) => {
                Some((session.expires_at - now).to_std().unwrap_or(Duration::ZERO))
            }
        }
    }

    fn relay(&self, event: &Event) -> Relay {
        let Peer::Customer(own) = self else {
            return Relay::Forward;
        };

        match event {
            Event::SessionExpired(session) if session.id == own.id => Relay::ForwardAndClose,
            Event::OrderCreated(order)
            | Event::OrderStatusUpdated(order)
            | Event::OrderCancelled(order)
                if order.session_token == own.token =>
            {
                Relay::Forward
            }
            _ => Relay::Skip,
        }
    }
}

/// Work out who is connecting. A valid staff credential wins over a `session` token; the token
/// is checked without counting a scan, and a malformed one is refused like an expired one.
pub async fn resolve_peer<R>(
    state: &AppState<R>,
    staff: Option<StaffIdentity>,
    query: &ConnectQuery,
) -> Result<Peer>
where
    R: RepositoryProvider,
{
    let staff = staff.or_else(|| verify_optional(&state.authenticator, query.access_token.as_deref()));

    match (staff, query.session.as_deref()) {
        (Some(staff), _) => Ok(Peer::Staff(staff)),
        (None, Some(token)) => match state.tableside.check_session(token).await {
            Ok(session) => Ok(Peer::Customer(session)),
            Err(Error::Validation(_)) => Err(ApiError::InvalidSession),
            Err(e) => Err(e.into()),
        },
        (None, None) => Err(ApiError::Unauthorized),
    }
}

pub async fn ws_handler<R>(
    State(state): State<AppState<R>>,
    OptionalStaffUser(staff): OptionalStaffUser,
    Query(query): Query<ConnectQuery>,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response>
where
    R: RepositoryProvider + 'static,
{
    let peer = resolve_peer(&state, staff, &query).await?;
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Refusing real-time connection");
            return Ok(rejection.into_response());
        }
    };

    let subscription = state.tableside.subscribe(&peer.identity());
    let lifetime = peer.lifetime(state.tableside.clock().now());
    tracing::info!(
        connection = subscription.id(),
        rooms = ?subscription.rooms().iter().map(ToString::to_string).collect::<Vec<_>>(),
        "Real-time client connected"
    );

    Ok(ws.on_upgrade(move |socket| forward_events(socket, subscription, peer, lifetime)))
}

async fn forward_events(
    mut socket: WebSocket,
    mut subscription: Subscription,
    peer: Peer,
    lifetime: Option<Duration>,
) {
    let deadline = tokio::time::sleep(lifetime.unwrap_or_default());
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline, if lifetime.is_some() => {
                tracing::debug!(connection = subscription.id(), "Session ran out");
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let relay = peer.relay(&event);
                if relay == Relay::Skip {
                    continue;
                }
                let frame = match serde_json::to_string(event.as_ref()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!(error = %e, event = event.name(), "Failed to encode event");
                        continue;
                    }
                };
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
                if relay == Relay::ForwardAndClose {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            }
            frame = socket.recv() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientCommand>(text.as_str()) {
                        Ok(ClientCommand::Ping) => {
                            let pong = json!({ "event": "pong" }).to_string();
                            if socket.send(Message::Text(pong.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::debug!(connection = subscription.id(), error = %e, "Ignoring client frame");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::info!(connection = subscription.id(), "Real-time client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Duration as ChronoDuration;
    use tableside::{
        LineItem, ManualClock, Order, Role, Room, SessionToken, StaffAuthenticator, StaffId,
        TablesideBuilder,
    };

    fn session(table: u32) -> TableSession {
        TableSession::new(
            SessionToken::new_random().unwrap(),
            table,
            StaffId::new("w1"),
            Utc::now(),
            ChronoDuration::minutes(30),
            ChronoDuration::days(7),
        )
    }

    fn order_for(session: &TableSession) -> Order {
        Order::new(
            session.token.clone(),
            session.table_number,
            vec![LineItem {
                menu_item_id: "soup".to_string(),
                name: "Soup".to_string(),
                unit_price_cents: 700,
                quantity: 1,
            }],
            None,
            Utc::now(),
        )
    }

    async fn state() -> AppState<tableside::InMemoryRepositoryProvider> {
        let tableside = TablesideBuilder::new()
            .with_in_memory()
            .with_clock(Arc::new(ManualClock::new(Utc::now())))
            .build()
            .await
            .unwrap();
        AppState {
            tableside: Arc::new(tableside),
            authenticator: Arc::new(StaffAuthenticator::new_hs256(b"secret")),
        }
    }

    #[test]
    fn test_client_commands() {
        assert!(matches!(
            serde_json::from_str::<ClientCommand>(r#"{"type":"ping"}"#),
            Ok(ClientCommand::Ping)
        ));
        assert!(serde_json::from_str::<ClientCommand>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn test_customer_only_hears_its_own_session() {
        let own = session(5);
        let neighbour = session(5);
        let peer = Peer::Customer(own.clone());

        assert_eq!(peer.relay(&Event::OrderCreated(order_for(&own))), Relay::Forward);
        assert_eq!(peer.relay(&Event::OrderCancelled(order_for(&own))), Relay::Forward);
        assert_eq!(peer.relay(&Event::OrderCreated(order_for(&neighbour))), Relay::Skip);
        assert_eq!(peer.relay(&Event::SessionCreated(neighbour.clone())), Relay::Skip);
        assert_eq!(peer.relay(&Event::SessionUpdated(own.clone())), Relay::Skip);
        assert_eq!(peer.relay(&Event::SessionExpired(neighbour)), Relay::Skip);
        assert_eq!(peer.relay(&Event::SessionExpired(own)), Relay::ForwardAndClose);
    }

    #[test]
    fn test_staff_hear_everything_routed_to_them() {
        let peer = Peer::Staff(StaffIdentity::new("k1", Role::Kitchen));
        let s = session(2);

        assert_eq!(peer.relay(&Event::SessionCreated(s.clone())), Relay::Forward);
        assert_eq!(peer.relay(&Event::SessionExpired(s.clone())), Relay::Forward);
        assert_eq!(peer.relay(&Event::OrderCreated(order_for(&s))), Relay::Forward);
        assert_eq!(peer.lifetime(Utc::now()), None);
    }

    #[test]
    fn test_customer_lifetime_ends_at_expiry() {
        let s = session(3);
        let peer = Peer::Customer(s.clone());

        let left = peer.lifetime(s.created_at).unwrap();
        assert_eq!(left, Duration::from_secs(30 * 60));
        assert_eq!(
            peer.lifetime(s.expires_at + ChronoDuration::minutes(1)),
            Some(Duration::ZERO)
        );
    }

    #[tokio::test]
    async fn test_staff_join_role_and_user_rooms() {
        let state = state().await;
        let credential = state
            .authenticator
            .mint(&StaffIdentity::new("w1", Role::Waiter), ChronoDuration::hours(1))
            .unwrap();
        let query = ConnectQuery {
            access_token: Some(credential),
            session: None,
        };

        let peer = resolve_peer(&state, None, &query).await.unwrap();

        assert_eq!(
            peer.identity().rooms(),
            vec![Room::Role(Role::Waiter), Room::User(StaffId::new("w1"))]
        );
    }

    #[tokio::test]
    async fn test_customer_joins_table_room_without_a_scan() {
        let state = state().await;
        let issued = state
            .tableside
            .issue_session(9, &StaffId::new("w1"))
            .await
            .unwrap();
        let query = ConnectQuery {
            access_token: None,
            session: Some(issued.session.token.as_str().to_string()),
        };

        let peer = resolve_peer(&state, None, &query).await.unwrap();

        assert_eq!(peer.identity().rooms(), vec![Room::Table(9)]);
        let stored = state.tableside.get_session(&issued.session.id).await.unwrap();
        assert_eq!(stored.usage_count, 0);
        assert!(!stored.was_used);
    }

    #[tokio::test]
    async fn test_staff_credential_wins_over_session() {
        let state = state().await;
        let query = ConnectQuery {
            access_token: None,
            session: Some("garbage".to_string()),
        };

        let peer = resolve_peer(&state, Some(StaffIdentity::new("a1", Role::Admin)), &query)
            .await
            .unwrap();

        assert!(matches!(peer, Peer::Staff(ref staff) if staff.role == Role::Admin));
    }

    #[tokio::test]
    async fn test_bad_session_is_refused() {
        let state = state().await;

        let missing = resolve_peer(&state, None, &ConnectQuery::default()).await;
        assert!(matches!(missing, Err(ApiError::Unauthorized)));

        let query = ConnectQuery {
            access_token: Some("not-a-credential".to_string()),
            session: Some("not-a-token".to_string()),
        };
        assert!(matches!(
            resolve_peer(&state, None, &query).await,
            Err(ApiError::InvalidSession)
        ));
    }
}
