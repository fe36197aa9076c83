//! A student's own registrations: listing, editing and withdrawing.

use axum::{extract::Path, response::Redirect};
use axum_extra::extract::Form;
use hypertext::prelude::*;
use serde::Deserialize;

use crate::{
    events::Event,
    registrations::{
        Registration,
        ledger::{DetailsUpdate, LedgerError, update_details},
    },
    state::Conn,
    students::Student,
    template::Page,
    util_resp::{
        FailureResponse, StandardResponse, bad_request, err_not_found,
        see_other_ok, success,
    },
    widgets::{actions::Actions, alert::ErrorAlert},
};

struct RegistrationCard<'a> {
    student_id: &'a str,
    registration: &'a Registration,
    event: &'a Event,
}

impl Renderable for RegistrationCard<'_> {
    fn render_to(
        &self,
        buffer: &mut hypertext::Buffer<hypertext::context::Node>,
    ) {
        let r = self.registration;
        let base = format!(
            "/dashboard/{}/registrations/{}",
            self.student_id, self.event.id
        );
        maud! {
            div class="card mb-3" {
                div class="card-body" {
                    div class="d-flex justify-content-between" {
                        h5 class="card-title" { (self.event.title) }
                        span class="badge bg-warning text-dark fs-6" {
                            "Token #" (r.token)
                        }
                    }
                    p class="card-subtitle text-muted mb-2" {
                        (self.event.date) " " (self.event.time)
                    }
                    @if let Some(team_name) = &r.team_name {
                        p class="mb-1" { strong { "Team: " } (team_name) }
                        ul class="mb-2" {
                            @for member in r.members() {
                                li { (member) }
                            }
                        }
                    }
                    @if let Some(description) = &r.description {
                        p class="card-text" { (description) }
                    }
                    a class="btn btn-sm btn-outline-primary me-2"
                        href=(format!("{base}/edit")) { "Edit" }
                    form method="post" action=(format!("{base}/delete"))
                        class="d-inline" {
                        button type="submit" class="btn btn-sm btn-outline-danger" {
                            "Delete registration"
                        }
                    }
                }
            }
        }
        .render_to(buffer)
    }
}

#[tracing::instrument(skip(conn))]
pub async fn overview_page(
    Path(sid): Path<String>,
    mut conn: Conn<true>,
) -> StandardResponse {
    let student = Student::fetch(&sid, &mut conn)?;
    let registrations = Registration::list_for_student(&student.id, &mut conn)?;
    let (team, individual): (Vec<_>, Vec<_>) = registrations
        .iter()
        .partition(|(_, event)| event.team_event);
    let none_yet = registrations.is_empty();

    let events_link = format!("/dashboard/{}/freshers", student.id);
    let actions = [(events_link.as_str(), "Browse events")];

    success(
        Page::new()
            .title("My registrations")
            .student(&student.id)
            .body(maud! {
                h1 { "Hello, " (student.name) }
                Actions options=(&actions);
                @if none_yet {
                    p class="text-muted" {
                        "You have not registered for any events yet."
                    }
                }
                @if !individual.is_empty() {
                    h2 class="fs-4 mt-4" { "Individual events" }
                    @for (registration, event) in &individual {
                        RegistrationCard
                            student_id=(student.id.as_str())
                            registration=(registration)
                            event=(event);
                    }
                }
                @if !team.is_empty() {
                    h2 class="fs-4 mt-4" { "Team events" }
                    @for (registration, event) in &team {
                        RegistrationCard
                            student_id=(student.id.as_str())
                            registration=(registration)
                            event=(event);
                    }
                }
            })
            .render(),
    )
}

struct EditForm<'a> {
    registration: &'a Registration,
    event: &'a Event,
    error: Option<&'a str>,
}

impl Renderable for EditForm<'_> {
    fn render_to(
        &self,
        buffer: &mut hypertext::Buffer<hypertext::context::Node>,
    ) {
        let r = self.registration;
        let members = r.members();
        maud! {
            h1 { "Edit registration" }
            p class="text-muted" {
                (self.event.title) " · token #" (r.token)
            }
            @if let Some(error) = self.error {
                ErrorAlert msg=(error);
            }
            form method="post" {
                @if self.event.team_event {
                    div class="mb-3" {
                        label for="team_name" class="form-label" { "Team name" }
                        input type="text" class="form-control" id="team_name"
                            name="team_name"
                            value=(r.team_name.as_deref().unwrap_or_default())
                            required;
                    }
                    fieldset class="mb-3" {
                        legend class="fs-6" {
                            "Team members (2 to " (self.event.team_size) ")"
                        }
                        @for i in 0..(self.event.team_size as usize) {
                            input type="text" class="form-control mb-2"
                                name="members"
                                value=(members.get(i).copied().unwrap_or_default())
                                placeholder=(format!("Member {}", i + 1));
                        }
                    }
                }
                div class="mb-3" {
                    label for="description" class="form-label" { "Description" }
                    textarea class="form-control" id="description"
                        name="description" rows="3" {
                        (r.description.as_deref().unwrap_or_default())
                    }
                }
                button type="submit" class="btn btn-primary" { "Save" }
            }
        }
        .render_to(buffer)
    }
}

pub async fn edit_registration_page(
    Path((sid, eid)): Path<(String, String)>,
    mut conn: Conn<true>,
) -> StandardResponse {
    let student = Student::fetch(&sid, &mut conn)?;
    let event = Event::fetch(&eid, &mut conn)?;
    let registration = Registration::by_student(&student.id, &event.id, &mut conn)?;

    success(
        Page::new()
            .title("Edit registration")
            .student(&student.id)
            .body(EditForm {
                registration: &registration,
                event: &event,
                error: None,
            })
            .render(),
    )
}

#[derive(Deserialize, Debug)]
pub struct EditDetails {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    team_name: Option<String>,
    #[serde(default)]
    members: Vec<String>,
}

#[tracing::instrument(skip(conn))]
pub async fn do_edit_registration(
    Path((sid, eid)): Path<(String, String)>,
    mut conn: Conn<true>,
    Form(form): Form<EditDetails>,
) -> StandardResponse {
    let student = Student::fetch(&sid, &mut conn)?;
    let event = Event::fetch(&eid, &mut conn)?;

    let update = DetailsUpdate {
        description: form.description,
        team: event
            .team_event
            .then(|| (form.team_name.unwrap_or_default(), form.members)),
    };

    match update_details(&mut conn, &event, &student.id, update) {
        Ok(_) => see_other_ok(Redirect::to(&format!(
            "/dashboard/{}/overview",
            student.id
        ))),
        Err(LedgerError::Database(e)) => Err(FailureResponse::from(e)),
        Err(e) => {
            let msg = e.to_string();
            let registration =
                Registration::by_student(&student.id, &event.id, &mut conn)?;
            bad_request(
                Page::new()
                    .title("Edit registration")
                    .student(&student.id)
                    .body(EditForm {
                        registration: &registration,
                        event: &event,
                        error: Some(&msg),
                    })
                    .render(),
            )
        }
    }
}

pub async fn withdraw_registration(
    Path((sid, eid)): Path<(String, String)>,
    mut conn: Conn<true>,
) -> StandardResponse {
    let student = Student::fetch(&sid, &mut conn)?;
    if Registration::withdraw(&student.id, &eid, &mut conn)? == 0 {
        return err_not_found();
    }
    tracing::info!("student {} withdrew from event {eid}", student.id);
    see_other_ok(Redirect::to(&format!(
        "/dashboard/{}/overview",
        student.id
    )))
}
