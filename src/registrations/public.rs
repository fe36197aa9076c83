use axum::{
    extract::{Multipart, Path, State},
    response::Redirect,
};
use hypertext::prelude::*;
use url::Url;

use crate::{
    events::{Event, image::find_image, register_url},
    gate::{GateState, Gates},
    media::{MAX_MEDIA_BYTES, MediaKind},
    multipart::MultipartForm,
    registrations::{
        Registration,
        ledger::{Entry, LedgerError, Registered, RegistrationForm, register},
    },
    state::Conn,
    storage::Bucket,
    students::Student,
    template::Page,
    util_resp::{
        FailureResponse, StandardResponse, bad_request, see_other_ok,
        server_error, success,
    },
    widgets::alert::{ErrorAlert, WarningAlert},
};

struct TokenCard<'a> {
    event: &'a Event,
    registered: Registered,
}

impl Renderable for TokenCard<'_> {
    fn render_to(
        &self,
        buffer: &mut hypertext::Buffer<hypertext::context::Node>,
    ) {
        maud! {
            div class="card text-center mx-auto" style="max-width: 32rem;" {
                div class="card-body" {
                    @if !self.registered.fresh {
                        p class="text-muted" { "You are already registered for this event." }
                    }
                    p { "Your token for " strong { (self.event.title) } " is:" }
                    p class="display-3 fw-bold" {
                        span id="token" { (self.registered.token) }
                    }
                    p class="small text-muted" {
                        "Please save this token or show it during check-in."
                    }
                }
            }
        }
        .render_to(buffer)
    }
}

struct RegisterForm<'a> {
    event: &'a Event,
    student: &'a Student,
    image: Option<&'a Url>,
    gate: GateState,
    error: Option<&'a str>,
}

struct MediaInput {
    kind: MediaKind,
}

impl Renderable for MediaInput {
    fn render_to(
        &self,
        buffer: &mut hypertext::Buffer<hypertext::context::Node>,
    ) {
        let kind = self.kind;
        let accept = match kind {
            MediaKind::Audio => "audio/*",
            MediaKind::Video => "video/*",
        };
        maud! {
            div class="mb-3" {
                label for=(kind.dir()) class="form-label" {
                    (kind.label()) " file (required)"
                }
                input type="file" class="form-control" id=(kind.dir())
                    name=(kind.dir()) accept=(accept) required;
                div class="form-text" {
                    "At most " (MAX_MEDIA_BYTES / (1024 * 1024)) "MB. "
                    "Uploaded files cannot be deleted, only replaced by registering again."
                }
            }
        }
        .render_to(buffer)
    }
}

impl Renderable for RegisterForm<'_> {
    fn render_to(
        &self,
        buffer: &mut hypertext::Buffer<hypertext::context::Node>,
    ) {
        let event = self.event;
        let open = self.gate.registrations_open() && event.registration_open;
        maud! {
            h1 { (event.title) }
            p class="text-muted" {
                (event.date) " " (event.time)
                @if event.team_event {
                    " · team event (up to " (event.team_size) " members)"
                }
            }
            @if let Some(image) = self.image {
                img src=(image.as_str()) class="img-fluid rounded mb-3"
                    style="max-height: 20rem;" alt=(event.title);
            }
            p { (event.description) }
            @if let Some(error) = self.error {
                ErrorAlert msg=(error);
            }
            @if !open {
                WarningAlert msg="Registrations for this event are closed.";
            } @else {
                form method="post" enctype="multipart/form-data" {
                    div class="mb-3" {
                        label class="form-label" { "Registering as" }
                        input type="text" class="form-control"
                            value=(format!("{} <{}>", self.student.name, self.student.email))
                            disabled;
                    }
                    @if event.team_event {
                        div class="mb-3" {
                            label for="team_name" class="form-label" { "Team name" }
                            input type="text" class="form-control" id="team_name"
                                name="team_name" required;
                        }
                        fieldset class="mb-3" {
                            legend class="fs-6" {
                                "Team members (2 to " (event.team_size) ")"
                            }
                            @for i in 0..event.team_size {
                                input type="text" class="form-control mb-2"
                                    name="members"
                                    placeholder=(format!("Member {}", i + 1))
                                    required[i < 2];
                            }
                        }
                    }
                    div class="mb-3" {
                        label for="description" class="form-label" { "Description (optional)" }
                        textarea class="form-control" id="description"
                            name="description" rows="3" {}
                    }
                    @if event.audio {
                        MediaInput kind=(MediaKind::Audio);
                    }
                    @if event.video {
                        MediaInput kind=(MediaKind::Video);
                    }
                    button type="submit" class="btn btn-primary" { "Register" }
                }
            }
        }
        .render_to(buffer)
    }
}

async fn event_image(bucket: &Bucket, event_id: &str) -> Option<Url> {
    match find_image(bucket.as_ref(), event_id).await {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!("could not look up image for event {event_id}: {e}");
            None
        }
    }
}

fn token_page(
    student: &Student,
    event: &Event,
    registered: Registered,
) -> StandardResponse {
    success(
        Page::new()
            .title(event.title.clone())
            .student(&student.id)
            .body(TokenCard { event, registered })
            .render(),
    )
}

async fn registration_page(
    sid: String,
    eid: String,
    team: bool,
    mut conn: Conn<true>,
    bucket: Bucket,
    gates: Gates,
) -> StandardResponse {
    let student = Student::fetch(&sid, &mut conn)?;
    let event = Event::fetch(&eid, &mut conn)?;

    if event.team_event != team {
        return see_other_ok(Redirect::to(&register_url(
            &student.id,
            &event.id,
            event.team_event,
        )));
    }

    if let Some(existing) =
        Registration::by_identity(&event.id, &student.email, &mut conn)?
    {
        return token_page(&student, &event, Registered {
            token: existing.token,
            fresh: false,
        });
    }

    let image = event_image(&bucket, &event.id).await;

    success(
        Page::new()
            .title(event.title.clone())
            .student(&student.id)
            .body(RegisterForm {
                event: &event,
                student: &student,
                image: image.as_ref(),
                gate: gates.public.current(),
                error: None,
            })
            .render(),
    )
}

pub async fn register_individual_page(
    Path((sid, eid)): Path<(String, String)>,
    conn: Conn<true>,
    State(bucket): State<Bucket>,
    State(gates): State<Gates>,
) -> StandardResponse {
    registration_page(sid, eid, false, conn, bucket, gates).await
}

pub async fn register_team_page(
    Path((sid, eid)): Path<(String, String)>,
    conn: Conn<true>,
    State(bucket): State<Bucket>,
    State(gates): State<Gates>,
) -> StandardResponse {
    registration_page(sid, eid, true, conn, bucket, gates).await
}

fn read_entry(form: &MultipartForm, team: bool) -> Entry {
    if team {
        Entry::Team {
            team_name: form.text("team_name").unwrap_or_default().to_string(),
            members: form.texts("members").to_vec(),
        }
    } else {
        Entry::Individual
    }
}

/// The registration POST holds a plain connection: token allocation opens
/// its own immediate transaction, which cannot nest inside a request
/// transaction.
async fn submit_registration(
    sid: String,
    eid: String,
    team: bool,
    mut conn: Conn<false>,
    bucket: Bucket,
    gates: Gates,
    multipart: Multipart,
) -> StandardResponse {
    let student = Student::fetch(&sid, &mut conn)?;
    let event = Event::fetch(&eid, &mut conn)?;

    let mut form = match MultipartForm::read(multipart).await {
        Ok(form) => form,
        Err(e) => {
            tracing::debug!("malformed registration form: {e}");
            return bad_request(
                maud! { ErrorAlert msg=(e.body_text()); }.render(),
            );
        }
    };

    let registration = RegistrationForm {
        entry: read_entry(&form, team),
        description: form.text("description").map(ToString::to_string),
        audio: form.take_file(MediaKind::Audio.dir()),
        video: form.take_file(MediaKind::Video.dir()),
    };

    let gate = gates.public.current();
    match register(
        &mut conn,
        bucket.as_ref(),
        gate,
        &event,
        &student,
        registration,
    )
    .await
    {
        Ok(registered) => token_page(&student, &event, registered),
        Err(LedgerError::Database(e)) => Err(FailureResponse::from(e)),
        Err(e) if e.is_user_error() => {
            let msg = e.to_string();
            let image = event_image(&bucket, &event.id).await;
            bad_request(
                Page::new()
                    .title(event.title.clone())
                    .student(&student.id)
                    .body(RegisterForm {
                        event: &event,
                        student: &student,
                        image: image.as_ref(),
                        gate,
                        error: Some(&msg),
                    })
                    .render(),
            )
        }
        Err(e) => {
            tracing::error!("registration failed: {e}");
            server_error()
        }
    }
}

pub async fn do_register_individual(
    Path((sid, eid)): Path<(String, String)>,
    conn: Conn<false>,
    State(bucket): State<Bucket>,
    State(gates): State<Gates>,
    multipart: Multipart,
) -> StandardResponse {
    submit_registration(sid, eid, false, conn, bucket, gates, multipart).await
}

pub async fn do_register_team(
    Path((sid, eid)): Path<(String, String)>,
    conn: Conn<false>,
    State(bucket): State<Bucket>,
    State(gates): State<Gates>,
    multipart: Multipart,
) -> StandardResponse {
    submit_registration(sid, eid, true, conn, bucket, gates, multipart).await
}
