use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;

use crate::schema::{events, registrations};

pub mod image;
pub mod public;

#[derive(Queryable, Selectable, Serialize, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = events)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Event {
    pub id: String,
    pub title: String,
    pub description: String,
    pub date: String,
    pub time: String,
    pub registration_open: bool,
    pub team_event: bool,
    pub team_size: i64,
    pub audio: bool,
    pub video: bool,
    pub created_at: NaiveDateTime,
}

/// The columns shown to students.
#[derive(Queryable, Selectable, Serialize, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = events)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PublicEvent {
    pub id: String,
    pub title: String,
    pub description: String,
    pub date: String,
    pub time: String,
    pub registration_open: bool,
    pub team_event: bool,
}

impl PublicEvent {
    pub fn register_url(&self, student_id: &str) -> String {
        register_url(student_id, &self.id, self.team_event)
    }
}

pub fn register_url(student_id: &str, event_id: &str, team_event: bool) -> String {
    let flow = if team_event { "register_team" } else { "register" };
    format!("/dashboard/{student_id}/{flow}/{event_id}")
}

impl Event {
    #[tracing::instrument(skip(conn))]
    pub fn fetch(id: &str, conn: &mut SqliteConnection) -> QueryResult<Event> {
        events::table
            .filter(events::id.eq(id))
            .select(Event::as_select())
            .first(conn)
    }

    pub fn list_all(conn: &mut SqliteConnection) -> QueryResult<Vec<Event>> {
        events::table
            .order_by(events::created_at.desc())
            .select(Event::as_select())
            .load(conn)
    }

    pub fn list_public(
        conn: &mut SqliteConnection,
    ) -> QueryResult<Vec<PublicEvent>> {
        events::table
            .order_by((events::time.asc(), events::title.asc()))
            .select(PublicEvent::as_select())
            .load(conn)
    }

    /// Removes the event and every registration for it, atomically.
    #[tracing::instrument(skip(conn))]
    pub fn delete(id: &str, conn: &mut SqliteConnection) -> QueryResult<usize> {
        Self::delete_with(id, conn, |_| Ok(()))
    }

    /// `between` runs after the registrations are gone and before the event
    /// row is deleted; an error from it rolls everything back.
    pub(crate) fn delete_with(
        id: &str,
        conn: &mut SqliteConnection,
        between: impl FnOnce(&mut SqliteConnection) -> QueryResult<()>,
    ) -> QueryResult<usize> {
        conn.transaction(|conn| {
            let removed = diesel::delete(
                registrations::table.filter(registrations::event_id.eq(id)),
            )
            .execute(conn)?;

            between(conn)?;

            let n = diesel::delete(events::table.filter(events::id.eq(id)))
                .execute(conn)?;
            if n == 0 {
                return Err(diesel::result::Error::NotFound);
            }

            tracing::info!("deleted event {id} and {removed} registration(s)");
            Ok(removed)
        })
    }
}

/// Events whose title contains `query`, ignoring case. An empty query
/// matches everything.
pub fn filter_by_title<'a>(events: &'a [Event], query: &str) -> Vec<&'a Event> {
    let query = query.trim().to_lowercase();
    events
        .iter()
        .filter(|event| {
            query.is_empty() || event.title.to_lowercase().contains(&query)
        })
        .collect()
}
