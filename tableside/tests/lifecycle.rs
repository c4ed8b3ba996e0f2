mod common;

use std::sync::Arc;

use chrono::Duration;
use tableside::{
    ConnectionIdentity, Error, Event, ManualClock, OrderStatus, Role, SessionFilter,
    SessionState, StaffId, StaffIdentity, Tableside, TimeRange,
};
use tableside_core::{error::OrderError, repositories::RepositoryProvider};

/// Runs a scenario against the in-memory and the SQLite backend.
macro_rules! on_every_backend {
    ($scenario:ident) => {
        mod $scenario {
            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn in_memory() {
                let (tableside, clock) = crate::common::in_memory().await;
                super::$scenario(std::sync::Arc::new(tableside), clock).await;
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn sqlite() {
                let (tableside, clock) = crate::common::sqlite().await;
                super::$scenario(std::sync::Arc::new(tableside), clock).await;
            }
        }
    };
}

fn admin_feed<R: RepositoryProvider>(tableside: &Tableside<R>) -> tableside::Subscription {
    tableside.subscribe(&ConnectionIdentity::Staff(StaffIdentity::new(
        "admin-1",
        Role::Admin,
    )))
}

fn names(events: &[Arc<Event>]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}

on_every_backend!(issue_scan_order_and_report);
async fn issue_scan_order_and_report<R: RepositoryProvider>(
    tableside: Arc<Tableside<R>>,
    _clock: Arc<ManualClock>,
) {
    let qr = tableside
        .issue_session(5, &StaffId::new("waiter-1"))
        .await
        .unwrap();
    let token = qr.session.token.as_str().to_string();

    let scanned = tableside.validate_session(&token).await.unwrap();
    assert_eq!(scanned.table_number, 5);
    assert_eq!(scanned.usage_count, 1);

    let order = tableside
        .place_order(&token, common::items(1250, 1), None)
        .await
        .unwrap();
    assert_eq!(order.total_cents, 1250);
    assert_eq!(order.table_number, 5);
    assert_eq!(order.status, OrderStatus::Pending);

    let rollup = tableside.analytics(TimeRange::Today).await.unwrap();
    assert_eq!(rollup.orders.total_orders, 1);
    assert_eq!(rollup.orders.total_revenue_cents, 1250);
    assert_eq!(rollup.orders.total_revenue, 12.5);
    assert_eq!(rollup.sessions.usage_rate, 1.0);
    assert_eq!(rollup.sessions.total, 1);
    assert_eq!(rollup.sessions.used, 1);
}

on_every_backend!(reissue_leaves_one_active_session);
async fn reissue_leaves_one_active_session<R: RepositoryProvider>(
    tableside: Arc<Tableside<R>>,
    _clock: Arc<ManualClock>,
) {
    let mut feed = admin_feed(&tableside);
    let waiter = StaffId::new("waiter-1");

    let first = tableside.issue_session(7, &waiter).await.unwrap();
    let second = tableside.issue_session(7, &waiter).await.unwrap();

    let active = tableside
        .list_sessions(
            &SessionFilter::new()
                .with_table_number(7)
                .with_state(SessionState::Active),
        )
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, second.session.id);

    let superseded = tableside.get_session(&first.session.id).await.unwrap();
    assert_eq!(superseded.state, SessionState::Expired);
    assert!(
        tableside
            .validate_session(first.session.token.as_str())
            .await
            .unwrap_err()
            .is_invalid_session()
    );

    assert_eq!(
        names(&feed.drain()),
        vec!["session:created", "session:expired", "session:created"]
    );
}

on_every_backend!(table_devices_never_receive_new_tokens);
async fn table_devices_never_receive_new_tokens<R: RepositoryProvider>(
    tableside: Arc<Tableside<R>>,
    clock: Arc<ManualClock>,
) {
    let waiter = StaffId::new("waiter-1");
    let first = tableside.issue_session(5, &waiter).await.unwrap();
    let mut table = tableside.subscribe(&ConnectionIdentity::Table(5));

    clock.advance(Duration::hours(2));
    let second = tableside.issue_session(5, &waiter).await.unwrap();
    let fresh = second.session.token.as_str();

    let seen = table.drain();
    for event in &seen {
        let frame = serde_json::to_string(event.as_ref()).unwrap();
        assert!(!frame.contains(fresh), "{} leaked a live token", event.name());
    }
    assert!(names(&seen).iter().all(|name| *name == "session:expired"));

    assert!(
        tableside
            .check_session(first.session.token.as_str())
            .await
            .unwrap_err()
            .is_invalid_session()
    );
}

on_every_backend!(expired_session_rejects_scans_and_orders);
async fn expired_session_rejects_scans_and_orders<R: RepositoryProvider>(
    tableside: Arc<Tableside<R>>,
    clock: Arc<ManualClock>,
) {
    let qr = tableside
        .issue_session(2, &StaffId::new("waiter-1"))
        .await
        .unwrap();
    let token = qr.session.token.as_str();

    clock.advance(Duration::minutes(31));

    let err = tableside.validate_session(token).await.unwrap_err();
    assert!(err.is_invalid_session());

    let err = tableside
        .place_order(token, common::items(500, 2), None)
        .await
        .unwrap_err();
    assert!(err.is_invalid_session());
    assert!(tableside.list_orders(&Default::default()).await.unwrap().is_empty());
}

on_every_backend!(concurrent_issuance_keeps_one_active);
async fn concurrent_issuance_keeps_one_active<R: RepositoryProvider>(
    tableside: Arc<Tableside<R>>,
    _clock: Arc<ManualClock>,
) {
    let mut handles = Vec::new();
    for _ in 0..10 {
        let tableside = tableside.clone();
        handles.push(tokio::spawn(async move {
            tableside.issue_session(9, &StaffId::new("waiter-2")).await
        }));
    }

    let mut issued = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => issued += 1,
            Err(e) => panic!("issuance failed: {e}"),
        }
    }
    assert_eq!(issued, 10);

    let active = tableside
        .list_sessions(
            &SessionFilter::new()
                .with_table_number(9)
                .with_state(SessionState::Active),
        )
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
}

on_every_backend!(validity_ends_exactly_at_expiry);
async fn validity_ends_exactly_at_expiry<R: RepositoryProvider>(
    tableside: Arc<Tableside<R>>,
    clock: Arc<ManualClock>,
) {
    let qr = tableside
        .issue_session(3, &StaffId::new("waiter-1"))
        .await
        .unwrap();
    let token = qr.session.token.as_str();

    clock.set(qr.session.expires_at - Duration::seconds(1));
    assert!(tableside.validate_session(token).await.is_ok());

    clock.set(qr.session.expires_at + Duration::seconds(1));
    assert!(tableside.validate_session(token).await.unwrap_err().is_invalid_session());

    // once expired, moving the clock back does not revive it
    clock.set(qr.session.expires_at - Duration::seconds(1));
    assert!(tableside.validate_session(token).await.unwrap_err().is_invalid_session());
}

on_every_backend!(racing_expiry_announces_once);
async fn racing_expiry_announces_once<R: RepositoryProvider>(
    tableside: Arc<Tableside<R>>,
    clock: Arc<ManualClock>,
) {
    let qr = tableside
        .issue_session(4, &StaffId::new("waiter-1"))
        .await
        .unwrap();
    let mut feed = admin_feed(&tableside);
    clock.advance(Duration::minutes(45));

    let mut handles = Vec::new();
    for i in 0..12 {
        let tableside = tableside.clone();
        let token = qr.session.token.as_str().to_string();
        handles.push(tokio::spawn(async move {
            if i % 3 == 0 {
                tableside.sweep().await.map(|_| ())
            } else {
                tableside.validate_session(&token).await.map(|_| ())
            }
        }));
    }
    for handle in handles {
        let _ = handle.await.unwrap();
    }
    tableside.expire_session(&qr.session.id).await.unwrap();

    let expired = feed
        .drain()
        .into_iter()
        .filter(|e| matches!(e.as_ref(), Event::SessionExpired(_)))
        .count();
    assert_eq!(expired, 1);
}

on_every_backend!(concurrent_scans_are_all_counted);
async fn concurrent_scans_are_all_counted<R: RepositoryProvider>(
    tableside: Arc<Tableside<R>>,
    _clock: Arc<ManualClock>,
) {
    let qr = tableside
        .issue_session(6, &StaffId::new("waiter-1"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..25 {
        let tableside = tableside.clone();
        let token = qr.session.token.as_str().to_string();
        handles.push(tokio::spawn(async move {
            tableside.validate_session(&token).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let session = tableside.get_session(&qr.session.id).await.unwrap();
    assert_eq!(session.usage_count, 25);
    assert!(session.was_used);
}

on_every_backend!(manual_expiry_blocks_orders);
async fn manual_expiry_blocks_orders<R: RepositoryProvider>(
    tableside: Arc<Tableside<R>>,
    _clock: Arc<ManualClock>,
) {
    let qr = tableside
        .issue_session(11, &StaffId::new("waiter-1"))
        .await
        .unwrap();
    let token = qr.session.token.as_str();
    tableside
        .place_order(token, common::items(800, 1), None)
        .await
        .unwrap();

    tableside.expire_session(&qr.session.id).await.unwrap();
    // expiring twice is not an error
    tableside.expire_session(&qr.session.id).await.unwrap();

    let err = tableside
        .place_order(token, common::items(800, 1), None)
        .await
        .unwrap_err();
    assert!(err.is_invalid_session());
    assert_eq!(tableside.list_orders(&Default::default()).await.unwrap().len(), 1);
}

on_every_backend!(only_legal_status_transitions_apply);
async fn only_legal_status_transitions_apply<R: RepositoryProvider>(
    tableside: Arc<Tableside<R>>,
    _clock: Arc<ManualClock>,
) {
    let all = [
        OrderStatus::Pending,
        OrderStatus::Preparing,
        OrderStatus::Served,
        OrderStatus::Cancelled,
    ];
    // Cancelled orders are deleted, so only these can be a stored status.
    let reachable = [OrderStatus::Pending, OrderStatus::Preparing, OrderStatus::Served];

    let qr = tableside
        .issue_session(12, &StaffId::new("waiter-1"))
        .await
        .unwrap();
    let token = qr.session.token.as_str();

    for from in reachable {
        for to in all {
            let order = tableside
                .place_order(token, common::items(100, 1), None)
                .await
                .unwrap();
            let path: &[OrderStatus] = match from {
                OrderStatus::Preparing => &[OrderStatus::Preparing],
                OrderStatus::Served => &[OrderStatus::Preparing, OrderStatus::Served],
                _ => &[],
            };
            for step in path {
                tableside.update_order_status(&order.id, *step).await.unwrap();
            }

            let result = tableside.update_order_status(&order.id, to).await;
            if to == OrderStatus::Cancelled && from.can_transition_to(to) {
                result.unwrap();
                assert!(tableside.get_order(&order.id).await.unwrap_err().is_not_found());
            } else if from.can_transition_to(to) {
                let moved = result.unwrap();
                assert_eq!(moved.status, to, "{from} -> {to}");
            } else {
                match result.unwrap_err() {
                    Error::Order(OrderError::IllegalStatusTransition { current, attempted }) => {
                        assert_eq!((current, attempted), (from, to));
                    }
                    other => panic!("{from} -> {to}: unexpected error {other}"),
                }
            }
        }
    }
}
