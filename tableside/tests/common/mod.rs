#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tableside::{
    EngineConfig, InMemoryRepositoryProvider, LineItem, ManualClock, SqliteRepositoryProvider,
    Tableside, TablesideBuilder,
};

pub fn setup_test() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn noon() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-06-10T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub async fn in_memory() -> (Tableside<InMemoryRepositoryProvider>, Arc<ManualClock>) {
    setup_test();
    let clock = Arc::new(ManualClock::new(noon()));
    let tableside = TablesideBuilder::new()
        .with_in_memory()
        .with_clock(clock.clone())
        .with_config(EngineConfig::default())
        .build()
        .await
        .unwrap();
    (tableside, clock)
}

pub async fn sqlite() -> (Tableside<SqliteRepositoryProvider>, Arc<ManualClock>) {
    setup_test();
    let clock = Arc::new(ManualClock::new(noon()));
    let tableside = TablesideBuilder::new()
        .with_sqlite("sqlite::memory:")
        .await
        .unwrap()
        .with_clock(clock.clone())
        .apply_migrations(true)
        .build()
        .await
        .unwrap();
    (tableside, clock)
}

pub fn items(unit_price_cents: i64, quantity: u32) -> Vec<LineItem> {
    vec![LineItem {
        menu_item_id: "burger".to_string(),
        name: "Burger".to_string(),
        unit_price_cents,
        quantity,
    }]
}
