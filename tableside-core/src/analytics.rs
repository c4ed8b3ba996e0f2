//! Read-only rollups over sessions and orders
//!
//! Everything here is a pure function of the records passed in. Ranges are calendar aligned in a
//! fixed UTC offset and half open: a record belongs to `[start, end)` when its `created_at` does.
//!
//! Growth compares a window with the window of equal length immediately before it and is
//! `None` when the earlier value is zero.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::{
    error::ValidationError,
    order::Order,
    session::{SessionToken, TableSession},
    staff::StaffId,
};

/// Longest custom range accepted, in days
pub const MAX_RANGE_DAYS: i64 = 366 * 5;

/// Custom range dates must fall in these years.
pub const MIN_YEAR: i32 = 1970;
pub const MAX_YEAR: i32 = 9999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRange {
    Today,
    /// The last seven days, today included
    Week,
    /// From the first of the current month
    Month,
    /// From January 1st of the current year
    Year,
    /// Inclusive calendar dates
    Custom { start: NaiveDate, end: NaiveDate },
}

impl TimeRange {
    /// Parse the `range`, `startDate` and `endDate` query parameters.
    pub fn from_query(
        range: Option<&str>,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Option<Self>, ValidationError> {
        let Some(range) = range.filter(|r| !r.is_empty()) else {
            return Ok(None);
        };

        let parse_date = |name: &str, value: Option<&str>| -> Result<NaiveDate, ValidationError> {
            let value =
                value.ok_or_else(|| ValidationError::MissingField(format!("{name} is required")))?;
            let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
                ValidationError::InvalidRange(format!("{name} must be a YYYY-MM-DD date"))
            })?;
            if !(MIN_YEAR..=MAX_YEAR).contains(&date.year()) {
                return Err(ValidationError::InvalidRange(format!(
                    "{name} must be between {MIN_YEAR} and {MAX_YEAR}"
                )));
            }
            Ok(date)
        };

        let parsed = match range {
            "today" => TimeRange::Today,
            "week" => TimeRange::Week,
            "month" => TimeRange::Month,
            "year" => TimeRange::Year,
            "custom" => TimeRange::Custom {
                start: parse_date("startDate", start)?,
                end: parse_date("endDate", end)?,
            },
            other => {
                return Err(ValidationError::InvalidRange(format!(
                    "unknown range '{other}', expected today, week, month, year or custom"
                )));
            }
        };
        Ok(Some(parsed))
    }

    /// Resolve to concrete instants as seen from `now` in `offset`.
    pub fn window(&self, now: DateTime<Utc>, offset: FixedOffset) -> Result<Window, ValidationError> {
        let today = now.with_timezone(&offset).date_naive();
        let tomorrow = today + Duration::days(1);

        let (first, after_last) = match *self {
            TimeRange::Today => (today, tomorrow),
            TimeRange::Week => (today - Duration::days(6), tomorrow),
            TimeRange::Month => (today.with_day(1).unwrap_or(today), tomorrow),
            TimeRange::Year => (
                NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today),
                tomorrow,
            ),
            TimeRange::Custom { start, end } => {
                if end < start {
                    return Err(ValidationError::InvalidRange(
                        "endDate is before startDate".to_string(),
                    ));
                }
                if start.year() < MIN_YEAR || end.year() > MAX_YEAR {
                    return Err(ValidationError::InvalidRange(format!(
                        "dates must be between {MIN_YEAR} and {MAX_YEAR}"
                    )));
                }
                if (end - start).num_days() >= MAX_RANGE_DAYS {
                    return Err(ValidationError::InvalidRange(format!(
                        "ranges are limited to {MAX_RANGE_DAYS} days"
                    )));
                }
                let after_last = end.succ_opt().ok_or_else(|| {
                    ValidationError::InvalidRange("endDate is out of range".to_string())
                })?;
                (start, after_last)
            }
        };

        Ok(Window {
            start: local_midnight(first, offset),
            end: local_midnight(after_last, offset),
            offset,
        })
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeRange::Today => f.write_str("today"),
            TimeRange::Week => f.write_str("week"),
            TimeRange::Month => f.write_str("month"),
            TimeRange::Year => f.write_str("year"),
            TimeRange::Custom { start, end } => write!(f, "{start}..{end}"),
        }
    }
}

fn local_midnight(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let local = date.and_time(NaiveTime::MIN);
    let utc = local - Duration::seconds(i64::from(offset.local_minus_utc()));
    DateTime::from_naive_utc_and_offset(utc, Utc)
}

/// A concrete half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub offset: FixedOffset,
}

impl Window {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }

    /// The window of equal length ending where this one starts.
    pub fn previous(&self) -> Window {
        let len = self.end - self.start;
        Window {
            start: self.start - len,
            end: self.start,
            offset: self.offset,
        }
    }

    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    /// Local calendar days covered by the window.
    pub fn days(&self) -> Vec<NaiveDate> {
        let first = self.local_date(self.start);
        let last = self.local_date(self.end - Duration::seconds(1));
        first.iter_days().take_while(|d| *d <= last).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCounts {
    pub total: u64,
    /// Still usable at the time of the query
    pub active: u64,
    pub expired: u64,
    pub used: u64,
    pub unused: u64,
    /// Share of sessions scanned at least once, `used / total`
    pub usage_rate: f64,
}

impl SessionCounts {
    pub fn from_sessions<'a>(
        sessions: impl IntoIterator<Item = &'a TableSession>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut counts = SessionCounts::default();
        for session in sessions {
            counts.total += 1;
            if session.is_valid_at(now) {
                counts.active += 1;
            } else {
                counts.expired += 1;
            }
            if session.was_used {
                counts.used += 1;
            } else {
                counts.unused += 1;
            }
        }
        counts.usage_rate = ratio(counts.used, counts.total);
        counts
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFigures {
    pub total_orders: u64,
    /// Revenue in currency units, e.g. `12.5`
    pub total_revenue: f64,
    pub total_revenue_cents: i64,
    pub items_sold: u64,
    pub average_order_value: f64,
    pub average_order_value_cents: i64,
}

impl OrderFigures {
    pub fn from_orders<'a>(orders: impl IntoIterator<Item = &'a Order>) -> Self {
        let mut figures = OrderFigures::default();
        for order in orders {
            figures.total_orders += 1;
            figures.total_revenue_cents += order.total_cents;
            figures.items_sold += order.item_count();
        }
        if figures.total_orders > 0 {
            figures.average_order_value_cents =
                figures.total_revenue_cents / figures.total_orders as i64;
        }
        figures.total_revenue = cents_to_units(figures.total_revenue_cents);
        figures.average_order_value = cents_to_units(figures.average_order_value_cents);
        figures
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableBreakdown {
    pub table_number: u32,
    pub sessions: u64,
    pub used_sessions: u64,
    /// Total successful validations across the table's sessions
    pub scans: u64,
    pub orders: u64,
    pub revenue_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerBreakdown {
    pub issued_by: StaffId,
    pub sessions: u64,
    pub used_sessions: u64,
    pub usage_rate: f64,
    pub orders: u64,
    pub revenue_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyBucket {
    pub date: NaiveDate,
    pub sessions: u64,
    pub used_sessions: u64,
    pub orders: u64,
    pub revenue_cents: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Growth {
    pub sessions: Option<f64>,
    pub used_sessions: Option<f64>,
    pub orders: Option<f64>,
    pub revenue: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollup {
    pub range: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub sessions: SessionCounts,
    pub orders: OrderFigures,
    pub top_tables: Vec<TableBreakdown>,
    pub top_issuers: Vec<IssuerBreakdown>,
    pub daily: Vec<DailyBucket>,
    pub growth: Growth,
}

/// All-time figures plus the live active count.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub sessions: SessionCounts,
    pub orders: OrderFigures,
    pub tables_served: u64,
    pub average_scans_per_session: f64,
    pub generated_at: DateTime<Utc>,
}

/// Records for one window, as fetched from the store.
pub struct Snapshot<'a> {
    pub window: Window,
    /// Sessions created inside the window
    pub sessions: &'a [TableSession],
    /// Orders created inside the window
    pub orders: &'a [Order],
    /// Issuer of every session an order in `orders` may reference
    pub issuers: &'a HashMap<SessionToken, StaffId>,
}

pub fn growth_rate(current: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 {
        None
    } else {
        Some((current - previous) / previous * 100.0)
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Minor units to major currency units, for display.
pub fn cents_to_units(cents: i64) -> f64 {
    cents as f64 / 100.0
}

pub fn top_tables(snapshot: &Snapshot<'_>, limit: usize) -> Vec<TableBreakdown> {
    let mut tables: BTreeMap<u32, TableBreakdown> = BTreeMap::new();
    let blank = |table_number: u32| TableBreakdown {
        table_number,
        sessions: 0,
        used_sessions: 0,
        scans: 0,
        orders: 0,
        revenue_cents: 0,
    };

    for session in snapshot.sessions {
        let row = tables
            .entry(session.table_number)
            .or_insert_with(|| blank(session.table_number));
        row.sessions += 1;
        row.used_sessions += u64::from(session.was_used);
        row.scans += session.usage_count;
    }
    for order in snapshot.orders {
        let row = tables
            .entry(order.table_number)
            .or_insert_with(|| blank(order.table_number));
        row.orders += 1;
        row.revenue_cents += order.total_cents;
    }

    let mut ranked: Vec<TableBreakdown> = tables.into_values().collect();
    ranked.sort_by(|a, b| {
        b.sessions
            .cmp(&a.sessions)
            .then(b.revenue_cents.cmp(&a.revenue_cents))
            .then(a.table_number.cmp(&b.table_number))
    });
    ranked.truncate(limit);
    ranked
}

pub fn issuer_performance(snapshot: &Snapshot<'_>, limit: usize) -> Vec<IssuerBreakdown> {
    let mut issuers: BTreeMap<StaffId, IssuerBreakdown> = BTreeMap::new();
    let blank = |id: &StaffId| IssuerBreakdown {
        issued_by: id.clone(),
        sessions: 0,
        used_sessions: 0,
        usage_rate: 0.0,
        orders: 0,
        revenue_cents: 0,
    };

    for session in snapshot.sessions {
        let row = issuers
            .entry(session.issued_by.clone())
            .or_insert_with(|| blank(&session.issued_by));
        row.sessions += 1;
        row.used_sessions += u64::from(session.was_used);
    }
    for order in snapshot.orders {
        if let Some(issuer) = snapshot.issuers.get(&order.session_token) {
            let row = issuers
                .entry(issuer.clone())
                .or_insert_with(|| blank(issuer));
            row.orders += 1;
            row.revenue_cents += order.total_cents;
        }
    }

    let mut ranked: Vec<IssuerBreakdown> = issuers
        .into_values()
        .map(|mut row| {
            row.usage_rate = ratio(row.used_sessions, row.sessions);
            row
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.sessions
            .cmp(&a.sessions)
            .then(b.revenue_cents.cmp(&a.revenue_cents))
            .then(a.issued_by.cmp(&b.issued_by))
    });
    ranked.truncate(limit);
    ranked
}

pub fn daily_buckets(snapshot: &Snapshot<'_>) -> Vec<DailyBucket> {
    let mut days: BTreeMap<NaiveDate, DailyBucket> = snapshot
        .window
        .days()
        .into_iter()
        .map(|date| {
            (
                date,
                DailyBucket {
                    date,
                    sessions: 0,
                    used_sessions: 0,
                    orders: 0,
                    revenue_cents: 0,
                },
            )
        })
        .collect();

    for session in snapshot.sessions {
        if let Some(day) = days.get_mut(&snapshot.window.local_date(session.created_at)) {
            day.sessions += 1;
            day.used_sessions += u64::from(session.was_used);
        }
    }
    for order in snapshot.orders {
        if let Some(day) = days.get_mut(&snapshot.window.local_date(order.created_at)) {
            day.orders += 1;
            day.revenue_cents += order.total_cents;
        }
    }

    days.into_values().collect()
}

/// Build the full rollup for `current`, comparing against `previous`.
pub fn rollup(
    range: &TimeRange,
    current: &Snapshot<'_>,
    previous: &Snapshot<'_>,
    now: DateTime<Utc>,
    top_limit: usize,
) -> Rollup {
    let sessions = SessionCounts::from_sessions(current.sessions, now);
    let orders = OrderFigures::from_orders(current.orders);
    let prev_sessions = SessionCounts::from_sessions(previous.sessions, now);
    let prev_orders = OrderFigures::from_orders(previous.orders);

    let growth = Growth {
        sessions: growth_rate(sessions.total as f64, prev_sessions.total as f64),
        used_sessions: growth_rate(sessions.used as f64, prev_sessions.used as f64),
        orders: growth_rate(orders.total_orders as f64, prev_orders.total_orders as f64),
        revenue: growth_rate(
            orders.total_revenue_cents as f64,
            prev_orders.total_revenue_cents as f64,
        ),
    };

    Rollup {
        range: range.to_string(),
        start: current.window.start,
        end: current.window.end,
        top_tables: top_tables(current, top_limit),
        top_issuers: issuer_performance(current, top_limit),
        daily: daily_buckets(current),
        sessions,
        orders,
        growth,
    }
}

pub fn stats(sessions: &[TableSession], orders: &[Order], now: DateTime<Utc>) -> Stats {
    let counts = SessionCounts::from_sessions(sessions, now);
    let scans: u64 = sessions.iter().map(|s| s.usage_count).sum();
    let mut tables: Vec<u32> = sessions.iter().map(|s| s.table_number).collect();
    tables.sort_unstable();
    tables.dedup();

    Stats {
        average_scans_per_session: if counts.total == 0 {
            0.0
        } else {
            scans as f64 / counts.total as f64
        },
        sessions: counts,
        orders: OrderFigures::from_orders(orders),
        tables_served: tables.len() as u64,
        generated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::LineItem;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn session(table: u32, issuer: &str, created: DateTime<Utc>, scans: u64) -> TableSession {
        let mut s = TableSession::new(
            SessionToken::new_random().unwrap(),
            table,
            StaffId::new(issuer),
            created,
            Duration::minutes(30),
            Duration::days(7),
        );
        s.usage_count = scans;
        s.was_used = scans > 0;
        s
    }

    fn order(session: &TableSession, cents: i64, qty: u32, created: DateTime<Utc>) -> Order {
        Order::new(
            session.token.clone(),
            session.table_number,
            vec![LineItem {
                menu_item_id: "m".into(),
                name: "Dish".into(),
                unit_price_cents: cents,
                quantity: qty,
            }],
            None,
            created,
        )
    }

    #[test]
    fn test_windows_are_calendar_aligned() {
        let now = at("2025-03-15T10:30:00Z");

        let today = TimeRange::Today.window(now, utc()).unwrap();
        assert_eq!(today.start, at("2025-03-15T00:00:00Z"));
        assert_eq!(today.end, at("2025-03-16T00:00:00Z"));

        let week = TimeRange::Week.window(now, utc()).unwrap();
        assert_eq!(week.start, at("2025-03-09T00:00:00Z"));
        assert_eq!(week.days().len(), 7);

        let month = TimeRange::Month.window(now, utc()).unwrap();
        assert_eq!(month.start, at("2025-03-01T00:00:00Z"));

        let year = TimeRange::Year.window(now, utc()).unwrap();
        assert_eq!(year.start, at("2025-01-01T00:00:00Z"));
    }

    #[test]
    fn test_window_respects_offset() {
        // 23:30 UTC is already the next day at UTC+2
        let now = at("2025-03-15T23:30:00Z");
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let today = TimeRange::Today.window(now, plus_two).unwrap();
        assert_eq!(today.start, at("2025-03-15T22:00:00Z"));
        assert_eq!(today.end, at("2025-03-16T22:00:00Z"));
    }

    #[test]
    fn test_custom_range_is_inclusive_and_checked() {
        let now = at("2025-03-15T10:30:00Z");
        let range = TimeRange::from_query(Some("custom"), Some("2025-02-01"), Some("2025-02-03"))
            .unwrap()
            .unwrap();
        let window = range.window(now, utc()).unwrap();
        assert_eq!(window.start, at("2025-02-01T00:00:00Z"));
        assert_eq!(window.end, at("2025-02-04T00:00:00Z"));
        assert_eq!(window.previous().start, at("2025-01-29T00:00:00Z"));

        let backwards = TimeRange::Custom {
            start: NaiveDate::from_ymd_opt(2025, 2, 3).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
        };
        assert!(backwards.window(now, utc()).is_err());
        assert!(TimeRange::from_query(Some("custom"), Some("2025-02-01"), None).is_err());
        assert!(TimeRange::from_query(Some("fortnight"), None, None).is_err());
        assert_eq!(TimeRange::from_query(None, None, None).unwrap(), None);
    }

    #[test]
    fn test_extreme_custom_dates_are_rejected() {
        let now = at("2025-03-15T10:30:00Z");

        let far_future =
            TimeRange::from_query(Some("custom"), Some("+262142-12-31"), Some("+262142-12-31"));
        assert!(matches!(far_future, Err(ValidationError::InvalidRange(_))));

        let far_past = TimeRange::from_query(Some("custom"), Some("0001-01-01"), Some("0001-01-02"));
        assert!(matches!(far_past, Err(ValidationError::InvalidRange(_))));

        let at_the_edge = TimeRange::Custom {
            start: NaiveDate::MAX,
            end: NaiveDate::MAX,
        };
        assert!(matches!(
            at_the_edge.window(now, utc()),
            Err(ValidationError::InvalidRange(_))
        ));

        let before_epoch = TimeRange::Custom {
            start: NaiveDate::MIN,
            end: NaiveDate::MIN,
        };
        assert!(before_epoch.window(now, utc()).is_err());

        let last_day = TimeRange::from_query(Some("custom"), Some("9999-12-30"), Some("9999-12-31"))
            .unwrap()
            .unwrap();
        let window = last_day.window(now, utc()).unwrap();
        assert_eq!(window.days().len(), 2);
        assert!(window.previous().start < window.start);
    }

    #[test]
    fn test_growth_convention() {
        assert_eq!(growth_rate(15.0, 10.0), Some(50.0));
        assert_eq!(growth_rate(5.0, 10.0), Some(-50.0));
        assert_eq!(growth_rate(3.0, 0.0), None);
    }

    #[test]
    fn test_rollup_counts_and_breakdowns() {
        let now = at("2025-03-15T12:00:00Z");
        let window = TimeRange::Today.window(now, utc()).unwrap();

        let a = session(1, "w1", at("2025-03-15T11:50:00Z"), 2);
        let b = session(1, "w2", at("2025-03-15T09:00:00Z"), 0);
        let c = session(4, "w1", at("2025-03-15T08:00:00Z"), 1);
        let sessions = vec![a.clone(), b, c.clone()];
        let orders = vec![
            order(&a, 1250, 1, at("2025-03-15T11:55:00Z")),
            order(&c, 400, 3, at("2025-03-15T08:10:00Z")),
        ];
        let issuers: HashMap<SessionToken, StaffId> = sessions
            .iter()
            .map(|s| (s.token.clone(), s.issued_by.clone()))
            .collect();

        let previous_sessions = vec![session(2, "w1", at("2025-03-14T10:00:00Z"), 1)];
        let current = Snapshot {
            window,
            sessions: &sessions,
            orders: &orders,
            issuers: &issuers,
        };
        let previous = Snapshot {
            window: window.previous(),
            sessions: &previous_sessions,
            orders: &[],
            issuers: &issuers,
        };

        let rollup = rollup(&TimeRange::Today, &current, &previous, now, 10);

        assert_eq!(rollup.sessions.total, 3);
        assert_eq!(rollup.sessions.active, 1);
        assert_eq!(rollup.sessions.expired, 2);
        assert_eq!(rollup.sessions.used, 2);
        assert_eq!(rollup.orders.total_orders, 2);
        assert_eq!(rollup.orders.total_revenue_cents, 2450);
        assert_eq!(rollup.orders.items_sold, 4);
        assert_eq!(rollup.orders.average_order_value_cents, 1225);
        assert_eq!(rollup.orders.total_revenue, 24.5);
        assert_eq!(rollup.orders.average_order_value, 12.25);
        assert!((rollup.sessions.usage_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(rollup.growth.sessions, Some(200.0));
        assert_eq!(rollup.growth.orders, None);

        assert_eq!(rollup.top_tables[0].table_number, 1);
        assert_eq!(rollup.top_tables[0].scans, 2);
        assert_eq!(rollup.top_issuers[0].issued_by, StaffId::new("w1"));
        assert_eq!(rollup.top_issuers[0].revenue_cents, 2450);
        assert_eq!(rollup.top_issuers[0].usage_rate, 1.0);

        assert_eq!(rollup.daily.len(), 1);
        assert_eq!(rollup.daily[0].orders, 2);
    }

    #[test]
    fn test_empty_stats() {
        let stats = stats(&[], &[], Utc::now());
        assert_eq!(stats.sessions.total, 0);
        assert_eq!(stats.sessions.usage_rate, 0.0);
        assert_eq!(stats.orders.average_order_value_cents, 0);
        assert_eq!(stats.average_scans_per_session, 0.0);
    }
}
