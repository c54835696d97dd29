use diesel::prelude::*;

use crate::db::schema::{channels, event_log, playout_items, settings};

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = settings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Setting {
    pub key: String,
    pub value: String,
}

impl Setting {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Channel registry row
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = channels)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Channel {
    pub id: Option<i32>,
    pub number: i32,
    pub name: String,
    pub always_on: i32,
    pub offline_image: Option<String>,
    /// JSON array of media refs cycled through when nothing is scheduled
    pub filler_refs: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = channels)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct NewChannel {
    pub number: i32,
    pub name: String,
    pub always_on: i32,
    pub offline_image: Option<String>,
    pub filler_refs: String,
}

impl NewChannel {
    pub fn new(number: i32, name: impl Into<String>) -> Self {
        Self {
            number,
            name: name.into(),
            always_on: 0,
            offline_image: None,
            filler_refs: "[]".to_string(),
        }
    }
}

/// Scheduled playout slot as stored; the media ref is a JSON blob
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = playout_items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PlayoutItemRow {
    pub id: Option<i32>,
    pub channel_id: i32,
    pub media_ref: String,
    /// RFC 3339 UTC timestamp
    pub scheduled_start: String,
    pub duration_secs: f64,
    pub is_filler: i32,
    pub consumed: i32,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = playout_items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct NewPlayoutItem {
    pub channel_id: i32,
    pub media_ref: String,
    pub scheduled_start: String,
    pub duration_secs: f64,
    pub is_filler: i32,
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = event_log)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EventLogEntry {
    pub id: Option<i32>,
    pub level: String,
    pub category: String,
    pub message: String,
    pub details: Option<String>,
    pub created_at: String,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = event_log)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct NewEventLog {
    pub level: String,
    pub category: String,
    pub message: String,
    pub details: Option<String>,
}

impl NewEventLog {
    pub fn new(
        level: impl Into<String>,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level: level.into(),
            category: category.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}
