//! Per-channel playout queue
//!
//! An ordered window of scheduled items, populated by external scheduling
//! logic and consumed by the channel supervisor. Answers three questions:
//! what plays now (and with what seek offset), what comes next, and marks
//! completed items consumed for later pruning.

use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;

use crate::db::models::PlayoutItemRow;
use crate::db::schema::playout_items;
use crate::db::DbPool;
use crate::resolver::MediaRef;

/// Timestamp format shared with SQLite's datetime(); lexicographically
/// sortable, so string comparison in queries is sound.
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_ts(t: DateTime<Utc>) -> String {
    t.format(TS_FORMAT).to_string()
}

pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TS_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// One scheduled slot in a channel's timeline
#[derive(Debug, Clone)]
pub struct PlayoutItem {
    pub id: i32,
    pub channel_id: i32,
    pub media: MediaRef,
    pub scheduled_start: DateTime<Utc>,
    pub duration_secs: f64,
    pub is_filler: bool,
}

impl PlayoutItem {
    pub fn scheduled_end(&self) -> DateTime<Utc> {
        self.scheduled_start + chrono::Duration::milliseconds((self.duration_secs * 1000.0) as i64)
    }

    /// Whether wall-clock `t` falls inside this item's window
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.scheduled_start && t < self.scheduled_end()
    }

    /// Seek offset for joining this item at wall-clock `t`
    pub fn seek_offset_at(&self, t: DateTime<Utc>) -> f64 {
        ((t - self.scheduled_start).num_milliseconds() as f64 / 1000.0).max(0.0)
    }

    fn from_row(row: PlayoutItemRow) -> Option<Self> {
        let media: MediaRef = serde_json::from_str(&row.media_ref).ok()?;
        let scheduled_start = parse_ts(&row.scheduled_start)?;
        Some(Self {
            id: row.id?,
            channel_id: row.channel_id,
            media,
            scheduled_start,
            duration_secs: row.duration_secs,
            is_filler: row.is_filler != 0,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

/// DB-backed playout queue shared by supervisors and the guide surface.
pub struct PlayoutQueue {
    pool: DbPool,
}

impl PlayoutQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// The unconsumed item whose scheduled window contains `t`, with the
    /// seek offset for joining it now.
    pub fn current(&self, channel_id: i32, t: DateTime<Utc>) -> Result<Option<(PlayoutItem, f64)>, QueueError> {
        let mut conn = self.pool.get()?;

        let row: Option<PlayoutItemRow> = playout_items::table
            .filter(playout_items::channel_id.eq(channel_id))
            .filter(playout_items::consumed.eq(0))
            .filter(playout_items::scheduled_start.le(format_ts(t)))
            .order(playout_items::scheduled_start.desc())
            .first(&mut conn)
            .optional()?;

        Ok(row
            .and_then(PlayoutItem::from_row)
            .filter(|item| item.contains(t))
            .map(|item| {
                let seek = item.seek_offset_at(t);
                (item, seek)
            }))
    }

    /// The successor of `item`, or None when the window ends.
    pub fn next_after(&self, item: &PlayoutItem) -> Result<Option<PlayoutItem>, QueueError> {
        let mut conn = self.pool.get()?;

        let row: Option<PlayoutItemRow> = playout_items::table
            .filter(playout_items::channel_id.eq(item.channel_id))
            .filter(playout_items::consumed.eq(0))
            .filter(playout_items::scheduled_start.gt(format_ts(item.scheduled_start)))
            .order(playout_items::scheduled_start.asc())
            .first(&mut conn)
            .optional()?;

        Ok(row.and_then(PlayoutItem::from_row))
    }

    /// The earliest unconsumed item scheduled strictly after `t`.
    pub fn upcoming(&self, channel_id: i32, t: DateTime<Utc>) -> Result<Option<PlayoutItem>, QueueError> {
        let mut conn = self.pool.get()?;

        let row: Option<PlayoutItemRow> = playout_items::table
            .filter(playout_items::channel_id.eq(channel_id))
            .filter(playout_items::consumed.eq(0))
            .filter(playout_items::scheduled_start.gt(format_ts(t)))
            .order(playout_items::scheduled_start.asc())
            .first(&mut conn)
            .optional()?;

        Ok(row.and_then(PlayoutItem::from_row))
    }

    /// Mark an item consumed. The only durable write on the playout path.
    pub fn advance(&self, item: &PlayoutItem) -> Result<(), QueueError> {
        let mut conn = self.pool.get()?;
        diesel::update(playout_items::table.filter(playout_items::id.eq(item.id)))
            .set(playout_items::consumed.eq(1))
            .execute(&mut conn)?;
        Ok(())
    }

    /// All items (consumed included) in `[from, to)` for guide rendering.
    pub fn window(
        &self,
        channel_id: i32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PlayoutItem>, QueueError> {
        let mut conn = self.pool.get()?;

        let rows: Vec<PlayoutItemRow> = playout_items::table
            .filter(playout_items::channel_id.eq(channel_id))
            .filter(playout_items::scheduled_start.lt(format_ts(to)))
            .order(playout_items::scheduled_start.asc())
            .load(&mut conn)?;

        Ok(rows
            .into_iter()
            .filter_map(PlayoutItem::from_row)
            .filter(|item| item.scheduled_end() > from)
            .collect())
    }

    /// Delete consumed items that ended before `cutoff`. Returns rows pruned.
    pub fn prune_consumed_before(&self, cutoff: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut conn = self.pool.get()?;
        let pruned = diesel::delete(
            playout_items::table
                .filter(playout_items::consumed.eq(1))
                .filter(playout_items::scheduled_start.lt(format_ts(cutoff))),
        )
        .execute(&mut conn)?;
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewPlayoutItem;
    use chrono::Duration;

    fn ensure_channel(pool: &DbPool, channel_id: i32) {
        let mut conn = pool.get().unwrap();
        diesel::sql_query(
            "INSERT OR IGNORE INTO channels (id, number, name, always_on, filler_refs) \
             VALUES (?, ?, ?, 0, '[]')",
        )
        .bind::<diesel::sql_types::Integer, _>(channel_id)
        .bind::<diesel::sql_types::Integer, _>(channel_id)
        .bind::<diesel::sql_types::Text, _>(format!("Channel {channel_id}"))
        .execute(&mut conn)
        .unwrap();
    }

    fn test_pool() -> DbPool {
        let manager = diesel::r2d2::ConnectionManager::<diesel::SqliteConnection>::new(":memory:");
        let pool = diesel::r2d2::Pool::builder()
            .max_size(1)
            .build(manager)
            .expect("test pool");
        let mut conn = pool.get().unwrap();
        crate::db::run_migrations(&mut conn).expect("migrations");
        pool
    }

    fn insert_item(
        pool: &DbPool,
        channel_id: i32,
        start: DateTime<Utc>,
        duration_secs: f64,
        is_filler: bool,
    ) {
        ensure_channel(pool, channel_id);
        let media = MediaRef::from_url(1, "/media/test.mkv");
        let row = NewPlayoutItem {
            channel_id,
            media_ref: serde_json::to_string(&media).unwrap(),
            scheduled_start: format_ts(start),
            duration_secs,
            is_filler: is_filler as i32,
        };
        let mut conn = pool.get().unwrap();
        diesel::insert_into(playout_items::table)
            .values(&row)
            .execute(&mut conn)
            .unwrap();
    }

    #[test]
    fn test_ts_roundtrip() {
        let now = Utc::now();
        let parsed = parse_ts(&format_ts(now)).unwrap();
        // Sub-second precision is dropped by the storage format
        assert_eq!(parsed.timestamp(), now.timestamp());
    }

    // =========================================================================
    // current / seek offset
    // =========================================================================

    #[test]
    fn test_current_returns_item_and_seek_offset() {
        let pool = test_pool();
        let queue = PlayoutQueue::new(pool.clone());
        let start = Utc::now() - Duration::seconds(90);
        insert_item(&pool, 1, start, 600.0, false);

        let (item, seek) = queue.current(1, Utc::now()).unwrap().expect("item playing now");
        assert_eq!(item.channel_id, 1);
        // Joined 90 seconds in, within a second of slack
        assert!((seek - 90.0).abs() < 1.5, "seek was {}", seek);
    }

    #[test]
    fn test_current_none_outside_any_window() {
        let pool = test_pool();
        let queue = PlayoutQueue::new(pool.clone());
        // Ended an hour ago
        insert_item(&pool, 1, Utc::now() - Duration::hours(2), 600.0, false);

        assert!(queue.current(1, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_current_skips_consumed_items() {
        let pool = test_pool();
        let queue = PlayoutQueue::new(pool.clone());
        let start = Utc::now() - Duration::seconds(30);
        insert_item(&pool, 1, start, 600.0, false);

        let (item, _) = queue.current(1, Utc::now()).unwrap().unwrap();
        queue.advance(&item).unwrap();
        assert!(queue.current(1, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_current_ignores_other_channels() {
        let pool = test_pool();
        let queue = PlayoutQueue::new(pool.clone());
        insert_item(&pool, 2, Utc::now() - Duration::seconds(10), 600.0, false);

        assert!(queue.current(1, Utc::now()).unwrap().is_none());
    }

    // =========================================================================
    // next / advance
    // =========================================================================

    #[test]
    fn test_next_after_returns_successor_in_order() {
        let pool = test_pool();
        let queue = PlayoutQueue::new(pool.clone());
        let base = Utc::now() - Duration::seconds(30);
        insert_item(&pool, 1, base, 120.0, false);
        insert_item(&pool, 1, base + Duration::seconds(120), 120.0, false);
        insert_item(&pool, 1, base + Duration::seconds(240), 120.0, true);

        let (current, _) = queue.current(1, Utc::now()).unwrap().unwrap();
        let next = queue.next_after(&current).unwrap().expect("successor");
        assert_eq!(next.scheduled_start, current.scheduled_end());

        let third = queue.next_after(&next).unwrap().expect("third item");
        assert!(third.is_filler);
        assert!(queue.next_after(&third).unwrap().is_none());
    }

    #[test]
    fn test_advance_then_current_equals_next() {
        let pool = test_pool();
        let queue = PlayoutQueue::new(pool.clone());
        let now = Utc::now();
        // First item's window is ending; the second tiles right after it
        let base = now - Duration::seconds(110);
        insert_item(&pool, 1, base, 100.0, false);
        insert_item(&pool, 1, base + Duration::seconds(100), 300.0, false);

        // Inside the first item's window
        let during_first = now - Duration::seconds(30);
        let (current, _) = queue.current(1, during_first).unwrap().unwrap();
        assert_eq!(current.scheduled_start, base);
        let next = queue.next_after(&current).unwrap().unwrap();

        // Advancing at the boundary hands the successor to current()
        queue.advance(&current).unwrap();
        let (after_advance, _) = queue.current(1, now).unwrap().unwrap();
        assert_eq!(after_advance.id, next.id);
    }

    // =========================================================================
    // window / pruning
    // =========================================================================

    #[test]
    fn test_window_includes_overlapping_items() {
        let pool = test_pool();
        let queue = PlayoutQueue::new(pool.clone());
        let now = Utc::now();
        // Started before the window but still running inside it
        insert_item(&pool, 1, now - Duration::seconds(300), 600.0, false);
        insert_item(&pool, 1, now + Duration::seconds(300), 600.0, false);
        // Entirely past
        insert_item(&pool, 1, now - Duration::hours(3), 600.0, false);

        let window = queue.window(1, now, now + Duration::hours(1)).unwrap();
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_prune_removes_only_old_consumed_items() {
        let pool = test_pool();
        let queue = PlayoutQueue::new(pool.clone());
        let old = Utc::now() - Duration::days(2);
        insert_item(&pool, 1, old, 600.0, false);
        insert_item(&pool, 1, Utc::now() - Duration::seconds(30), 600.0, false);

        // Consume the old one
        let window = queue
            .window(1, old - Duration::seconds(1), Utc::now() + Duration::hours(1))
            .unwrap();
        let old_item = window.iter().find(|i| i.scheduled_start < Utc::now() - Duration::days(1)).unwrap();
        queue.advance(old_item).unwrap();

        let pruned = queue.prune_consumed_before(Utc::now() - Duration::days(1)).unwrap();
        assert_eq!(pruned, 1);

        // The current item survives
        assert!(queue.current(1, Utc::now()).unwrap().is_some());
    }
}
