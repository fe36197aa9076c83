//! The admin control plane.
//!
//! Every handler in here takes an [`AdminAccess`] first, so that a locked
//! dashboard is rejected before any database work happens.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Query, State},
    http::request::Parts,
    response::Redirect,
};
use hypertext::{Rendered, prelude::*};
use serde::Deserialize;

use crate::{
    admin::events::{EventDetails, EventForm},
    config::AppConfig,
    events::{Event, filter_by_title},
    gate::{AdminStatus, FireStatus, GateState, GateWatcher, Gates},
    state::Conn,
    template::Page,
    util_resp::{FailureResponse, StandardResponse, see_other_ok, success},
    validation::MAX_TEAM_SIZE,
    widgets::switch::Switch,
};

pub mod events;
pub mod export;
pub mod roster;

/// Proof that the admin gate currently allows access. Carries the gate state
/// the page is rendered against.
pub struct AdminAccess {
    pub gate: GateState,
}

fn locked_page(gate: GateState, every_ms: u64) -> Rendered<String> {
    Page::new()
        .title("Access locked")
        .admin()
        .body(maud! {
            div class="text-center mt-5" {
                h1 class="text-danger" {
                    "Admin Access has been locked by the Creator"
                }
                p { "You do not have permission to access this page." }
                p class="text-muted small" {
                    "Checking for access restoration..."
                }
                GateWatcher
                    path="/gate/admin"
                    version=(gate.version)
                    every_ms=(every_ms);
            }
        })
        .render()
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminAccess
where
    S: Send + Sync,
    Gates: FromRef<S>,
    Arc<AppConfig>: FromRef<S>,
{
    type Rejection = FailureResponse;

    async fn from_request_parts(
        _parts: &mut Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let gate = Gates::from_ref(state).admin.current();
        if gate.admin_access {
            return Ok(AdminAccess { gate });
        }

        tracing::debug!("admin dashboard is locked (version {})", gate.version);
        let config = Arc::<AppConfig>::from_ref(state);
        Err(FailureResponse::Forbidden(locked_page(
            gate,
            config.admin_poll_ms,
        )))
    }
}

struct EventCard<'a> {
    event: &'a Event,
}

impl Renderable for EventCard<'_> {
    fn render_to(
        &self,
        buffer: &mut hypertext::Buffer<hypertext::context::Node>,
    ) {
        let event = self.event;
        let base = format!("/admin/events/{}", event.id);
        let toggle = |field: &str| format!("{base}/toggle/{field}");
        let (open, team, audio, video) = (
            toggle("registration_open"),
            toggle("team_event"),
            toggle("audio"),
            toggle("video"),
        );

        maud! {
            div class="card mb-3" id=(format!("event-{}", event.id)) {
                div class="card-body" {
                    div class="d-flex justify-content-between align-items-start" {
                        div {
                            h5 class="card-title mb-1" { (event.title) }
                            p class="card-subtitle text-muted mb-2" {
                                (event.date) " " (event.time)
                            }
                        }
                        div class="d-flex gap-2" {
                            a class="btn btn-sm btn-outline-primary"
                                href=(format!("{base}/edit")) { "Edit" }
                            form method="post" action=(format!("{base}/delete"))
                                class="d-inline" {
                                button type="submit" class="btn btn-sm btn-outline-danger" {
                                    "Delete"
                                }
                            }
                        }
                    }
                    p class="card-text" { (event.description) }
                    div class="d-flex flex-wrap gap-2 mb-2" {
                        Switch action=(open.as_str()) label="Registration" on=(event.registration_open);
                        Switch action=(team.as_str()) label="Team event" on=(event.team_event);
                        Switch action=(audio.as_str()) label="Audio" on=(event.audio);
                        Switch action=(video.as_str()) label="Video" on=(event.video);
                    }
                    @if event.team_event {
                        form method="post" action=(format!("{base}/team_size"))
                            class="row g-2 align-items-center mb-2" {
                            div class="col-auto" {
                                label class="col-form-label" for=(format!("team-size-{}", event.id)) {
                                    "Current team size: " (event.team_size)
                                }
                            }
                            div class="col-auto" {
                                input type="number" min="1" max=(MAX_TEAM_SIZE) class="form-control form-control-sm"
                                    id=(format!("team-size-{}", event.id))
                                    name="team_size" value=(event.team_size);
                            }
                            div class="col-auto" {
                                button type="submit" class="btn btn-sm btn-secondary" {
                                    "Set team size"
                                }
                            }
                        }
                    }
                    div class="mb-2" {
                        a class="btn btn-sm btn-outline-success me-2"
                            href=(format!("{base}/export.pdf")) { "Download PDF" }
                        a class="btn btn-sm btn-outline-success"
                            href=(format!("{base}/export.csv")) { "Download CSV" }
                    }
                    details
                        hx-get=(format!("{base}/participants"))
                        hx-trigger="toggle once"
                        hx-target="find .roster" {
                        summary { "Participants" }
                        div class="roster mt-2" {
                            p class="text-muted small" { "Loading participants..." }
                        }
                    }
                }
            }
        }
        .render_to(buffer)
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct SearchQuery {
    #[serde(default)]
    q: String,
}

#[tracing::instrument(skip(access, conn, config))]
pub async fn admin_dashboard(
    access: AdminAccess,
    mut conn: Conn<true>,
    State(config): State<Arc<AppConfig>>,
    Query(query): Query<SearchQuery>,
) -> StandardResponse {
    let all = Event::list_all(&mut conn)?;
    let shown = filter_by_title(&all, &query.q);
    let no_events = all.is_empty();
    let gate = access.gate;
    let blank = EventDetails::new_event();

    success(
        Page::new()
            .title("Admin")
            .admin()
            .body(maud! {
                GateWatcher
                    path="/gate/admin"
                    version=(gate.version)
                    every_ms=(config.admin_poll_ms);
                div class="d-flex justify-content-between align-items-center mb-3" {
                    h1 { "Events" }
                    div class="text-end" {
                        p class="mb-1" {
                            "Registrations are "
                            @if gate.registrations_open() {
                                strong class="text-success" { "open" }
                            } @else {
                                strong class="text-danger" { "closed" }
                            }
                        }
                        Switch action="/admin/fire" label="Fire" on=(gate.registrations_open());
                    }
                }
                form method="get" action="/admin" class="mb-3" {
                    input type="search" class="form-control" name="q"
                        placeholder="Search events by title" value=(query.q);
                }
                @if shown.is_empty() {
                    p class="text-muted" {
                        @if no_events {
                            "No events yet."
                        } @else {
                            "No events match your search."
                        }
                    }
                }
                @for event in &shown {
                    EventCard event=(event);
                }
                h2 class="mt-5" { "Create event" }
                EventForm
                    action="/admin/events"
                    details=(&blank)
                    with_image=(true)
                    error=(None);
            })
            .render(),
    )
}

/// Flips the fire status and pushes the result into both gates straight
/// away. The write commits before the gates are updated, so a poll can never
/// observe the old row after the mirror. When the write fails the gates are
/// still told about the intended state until the next poll.
#[tracing::instrument(skip(access, conn, gates))]
pub async fn toggle_fire(
    access: AdminAccess,
    mut conn: Conn<false>,
    State(gates): State<Gates>,
) -> StandardResponse {
    let current = match AdminStatus::fetch(&mut conn) {
        Ok(Some(status)) => status.gate_state(),
        Ok(None) => access.gate,
        Err(e) => {
            tracing::warn!("could not read admin status, using gate view: {e}");
            access.gate
        }
    };
    let next = current.fire.unwrap_or(FireStatus::Open).toggled();

    match AdminStatus::set_fire(&mut conn, next) {
        Ok(state) => gates.mirror(state),
        Err(e) => {
            tracing::error!("failed to persist fire status {next:?}: {e}");
            gates.mirror(GateState {
                fire: Some(next),
                version: current.version + 1,
                ..current
            });
        }
    }

    see_other_ok(Redirect::to("/admin"))
}
