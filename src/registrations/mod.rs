use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;

use crate::{
    events::Event,
    schema::{events, registrations},
};

pub mod ledger;
pub mod overview;
pub mod public;

#[derive(Queryable, Selectable, Serialize, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = registrations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Registration {
    pub id: String,
    pub event_id: String,
    pub student_id: String,
    pub token: i64,
    /// The participant's name, or the team roster joined with `", "`.
    pub name: String,
    pub email: String,
    pub team_name: Option<String>,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Registration {
    /// The roster of a team registration.
    pub fn members(&self) -> Vec<&str> {
        self.name
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .collect()
    }

    pub fn for_event(
        event_id: &str,
        conn: &mut SqliteConnection,
    ) -> QueryResult<Vec<Registration>> {
        registrations::table
            .filter(registrations::event_id.eq(event_id))
            .order_by(registrations::token.asc())
            .select(Registration::as_select())
            .load(conn)
    }

    pub fn by_identity(
        event_id: &str,
        email: &str,
        conn: &mut SqliteConnection,
    ) -> QueryResult<Option<Registration>> {
        registrations::table
            .filter(registrations::event_id.eq(event_id))
            .filter(registrations::email.eq(email))
            .select(Registration::as_select())
            .first(conn)
            .optional()
    }

    pub fn by_team_name(
        event_id: &str,
        team_name: &str,
        conn: &mut SqliteConnection,
    ) -> QueryResult<Option<Registration>> {
        registrations::table
            .filter(registrations::event_id.eq(event_id))
            .filter(registrations::team_name.eq(team_name))
            .select(Registration::as_select())
            .first(conn)
            .optional()
    }

    pub fn by_student(
        student_id: &str,
        event_id: &str,
        conn: &mut SqliteConnection,
    ) -> QueryResult<Registration> {
        registrations::table
            .filter(registrations::student_id.eq(student_id))
            .filter(registrations::event_id.eq(event_id))
            .select(Registration::as_select())
            .first(conn)
    }

    /// Every registration the student holds, with its event, in the order
    /// they were made.
    #[tracing::instrument(skip(conn))]
    pub fn list_for_student(
        student_id: &str,
        conn: &mut SqliteConnection,
    ) -> QueryResult<Vec<(Registration, Event)>> {
        registrations::table
            .inner_join(events::table)
            .filter(registrations::student_id.eq(student_id))
            .order_by(registrations::created_at.asc())
            .select((Registration::as_select(), Event::as_select()))
            .load(conn)
    }

    /// Deletes the student's registration for the event. Other tokens are
    /// left as they are.
    #[tracing::instrument(skip(conn))]
    pub fn withdraw(
        student_id: &str,
        event_id: &str,
        conn: &mut SqliteConnection,
    ) -> QueryResult<usize> {
        diesel::delete(
            registrations::table
                .filter(registrations::student_id.eq(student_id))
                .filter(registrations::event_id.eq(event_id)),
        )
        .execute(conn)
    }
}
