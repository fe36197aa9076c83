//! The freshers events page. The list is re-fetched by htmx on the public
//! poll interval, so closing registrations (or reopening them) shows up
//! without a reload.

use std::sync::Arc;

use axum::extract::{Path, State};
use hypertext::prelude::*;

use crate::{
    config::AppConfig,
    events::{Event, PublicEvent},
    gate::{FireStatus, Gates, GateState},
    state::Conn,
    students::Student,
    template::Page,
    util_resp::{StandardResponse, success},
};

struct EventList<'a> {
    student_id: &'a str,
    gate: GateState,
    events: &'a [PublicEvent],
}

impl Renderable for EventList<'_> {
    fn render_to(
        &self,
        buffer: &mut hypertext::Buffer<hypertext::context::Node>,
    ) {
        maud! {
            @match self.gate.fire {
                Some(FireStatus::Closed) => {
                    div class="text-center my-5" {
                        h2 class="text-danger" { "Registrations are closed" }
                        p class="text-muted small" { "Checking for reopening..." }
                    }
                }
                None => {
                    div class="text-center my-5" {
                        p class="fs-5" { "Loading events..." }
                        p class="text-muted small" { "Fetching latest information..." }
                    }
                }
                Some(FireStatus::Open) => {
                    @if self.events.is_empty() {
                        p class="text-muted" { "No events have been announced yet." }
                    }
                    div class="list-group" {
                        @for event in self.events {
                            div class="list-group-item" {
                                div class="d-flex w-100 justify-content-between" {
                                    h5 class="mb-1" { (event.title) }
                                    small class="text-muted" {
                                        (event.date) " " (event.time)
                                    }
                                }
                                p class="mb-1" { (event.description) }
                                p class="small text-muted mb-2" {
                                    @if event.team_event { "Team Event" } @else { "Individual Event" }
                                }
                                @if event.registration_open {
                                    a class="btn btn-warning btn-sm"
                                        href=(event.register_url(self.student_id)) {
                                        "Register Now"
                                    }
                                } @else {
                                    span class="text-danger fw-bold" { "Registration Closed" }
                                }
                            }
                        }
                    }
                }
            }
        }
        .render_to(buffer)
    }
}

fn load_events(
    gate: &GateState,
    conn: &mut diesel::SqliteConnection,
) -> diesel::QueryResult<Vec<PublicEvent>> {
    if gate.registrations_open() {
        Event::list_public(conn)
    } else {
        Ok(Vec::new())
    }
}

#[tracing::instrument(skip(conn, gates, config))]
pub async fn freshers_page(
    Path(sid): Path<String>,
    mut conn: Conn<true>,
    State(gates): State<Gates>,
    State(config): State<Arc<AppConfig>>,
) -> StandardResponse {
    let student = Student::fetch(&sid, &mut conn)?;
    let gate = gates.public.current();
    let events = load_events(&gate, &mut conn)?;

    success(
        Page::new()
            .title("Freshers events")
            .student(&student.id)
            .body(maud! {
                h1 class="mb-4" { "Freshers events" }
                div id="freshers-events"
                    hx-get=(format!("/dashboard/{}/freshers/events", student.id))
                    hx-trigger=(format!("every {}ms", config.public_poll_ms))
                    hx-swap="innerHTML" {
                    EventList student_id=(student.id.as_str()) gate=(gate) events=(events.as_slice());
                }
            })
            .render(),
    )
}

pub async fn freshers_events_fragment(
    Path(sid): Path<String>,
    mut conn: Conn<true>,
    State(gates): State<Gates>,
) -> StandardResponse {
    let student = Student::fetch(&sid, &mut conn)?;
    let gate = gates.public.current();
    let events = load_events(&gate, &mut conn)?;

    success(
        maud! {
            EventList student_id=(student.id.as_str()) gate=(gate) events=(events.as_slice());
        }
        .render(),
    )
}
