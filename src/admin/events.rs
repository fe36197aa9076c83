//! Creating, editing, toggling and deleting events.

use axum::{
    extract::{Multipart, Path, State},
    response::Redirect,
};
use axum_extra::extract::Form;
use chrono::Utc;
use diesel::prelude::*;
use hypertext::{Rendered, prelude::*};
use serde::Deserialize;

use crate::{
    admin::AdminAccess,
    events::{Event, image::attach_image},
    multipart::MultipartForm,
    schema::events,
    state::Conn,
    storage::Bucket,
    template::Page,
    util_resp::{
        StandardResponse, bad_request, err_not_found, see_other_ok, success,
    },
    validation::{MAX_TEAM_SIZE, max_chars, parse_team_size, required},
    widgets::alert::{ErrorAlert, WarningAlert},
};

pub const MAX_TITLE_CHARS: usize = 200;

/// The event form as submitted. Checkboxes are present only when ticked.
#[derive(Deserialize, Debug, Default, Clone)]
pub struct EventDetails {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    time: String,
    #[serde(default)]
    registration_open: Option<String>,
    #[serde(default)]
    team_event: Option<String>,
    #[serde(default)]
    team_size: String,
    #[serde(default)]
    audio: Option<String>,
    #[serde(default)]
    video: Option<String>,
}

fn ticked(value: &Option<String>) -> bool {
    value
        .as_deref()
        .is_some_and(|v| v != "false" && v != "off")
}

fn tick(on: bool) -> Option<String> {
    on.then(|| "on".to_string())
}

/// A validated event form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFields {
    pub title: String,
    pub description: String,
    pub date: String,
    pub time: String,
    pub registration_open: bool,
    pub team_event: bool,
    pub team_size: i64,
    pub audio: bool,
    pub video: bool,
}

impl EventDetails {
    /// What the create form starts out with.
    pub fn new_event() -> Self {
        Self {
            registration_open: tick(true),
            team_size: "1".to_string(),
            ..Default::default()
        }
    }

    fn from_multipart(form: &MultipartForm) -> Self {
        let text = |name: &str| form.text(name).unwrap_or_default().to_string();
        Self {
            title: text("title"),
            description: text("description"),
            date: text("date"),
            time: text("time"),
            registration_open: tick(form.checked("registration_open")),
            team_event: tick(form.checked("team_event")),
            team_size: text("team_size"),
            audio: tick(form.checked("audio")),
            video: tick(form.checked("video")),
        }
    }

    /// Title and description are required. Events which are not team events
    /// always have a team size of one; a blank size means one.
    pub fn validate(&self) -> Result<EventFields, String> {
        let title = required("Title", &self.title)?;
        max_chars("Title", title, MAX_TITLE_CHARS)?;
        let description = required("Description", &self.description)?;

        let team_event = ticked(&self.team_event);
        let team_size = match (team_event, self.team_size.trim()) {
            (false, _) | (true, "") => 1,
            (true, size) => parse_team_size(size)?,
        };

        Ok(EventFields {
            title: title.to_string(),
            description: description.to_string(),
            date: self.date.trim().to_string(),
            time: self.time.trim().to_string(),
            registration_open: ticked(&self.registration_open),
            team_event,
            team_size,
            audio: ticked(&self.audio),
            video: ticked(&self.video),
        })
    }
}

impl From<&Event> for EventDetails {
    fn from(event: &Event) -> Self {
        Self {
            title: event.title.clone(),
            description: event.description.clone(),
            date: event.date.clone(),
            time: event.time.clone(),
            registration_open: tick(event.registration_open),
            team_event: tick(event.team_event),
            team_size: event.team_size.to_string(),
            audio: tick(event.audio),
            video: tick(event.video),
        }
    }
}

impl EventFields {
    pub fn insert(
        &self,
        conn: &mut SqliteConnection,
    ) -> QueryResult<Event> {
        let id = uuid::Uuid::now_v7().to_string();
        diesel::insert_into(events::table)
            .values((
                events::id.eq(&id),
                events::title.eq(&self.title),
                events::description.eq(&self.description),
                events::date.eq(&self.date),
                events::time.eq(&self.time),
                events::registration_open.eq(self.registration_open),
                events::team_event.eq(self.team_event),
                events::team_size.eq(self.team_size),
                events::audio.eq(self.audio),
                events::video.eq(self.video),
                events::created_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;
        tracing::info!("created event {id} ({})", self.title);
        Event::fetch(&id, conn)
    }

    /// Overwrites everything but the id and creation time.
    pub fn update(
        &self,
        id: &str,
        conn: &mut SqliteConnection,
    ) -> QueryResult<()> {
        let n = diesel::update(events::table.filter(events::id.eq(id)))
            .set((
                events::title.eq(&self.title),
                events::description.eq(&self.description),
                events::date.eq(&self.date),
                events::time.eq(&self.time),
                events::registration_open.eq(self.registration_open),
                events::team_event.eq(self.team_event),
                events::team_size.eq(self.team_size),
                events::audio.eq(self.audio),
                events::video.eq(self.video),
            ))
            .execute(conn)?;
        match n {
            0 => Err(diesel::result::Error::NotFound),
            _ => Ok(()),
        }
    }
}

/// Shared by the create and edit pages. Only creation accepts an image.
pub struct EventForm<'a> {
    pub action: &'a str,
    pub details: &'a EventDetails,
    pub with_image: bool,
    pub error: Option<&'a str>,
}

impl Renderable for EventForm<'_> {
    fn render_to(
        &self,
        buffer: &mut hypertext::Buffer<hypertext::context::Node>,
    ) {
        let d = self.details;
        let enctype = if self.with_image {
            "multipart/form-data"
        } else {
            "application/x-www-form-urlencoded"
        };
        maud! {
            @if let Some(error) = self.error {
                ErrorAlert msg=(error);
            }
            form method="post" action=(self.action) enctype=(enctype) {
                div class="mb-3" {
                    label for="title" class="form-label" { "Title" }
                    input type="text" class="form-control" id="title" name="title"
                        value=(d.title) required;
                }
                div class="mb-3" {
                    label for="description" class="form-label" { "Description" }
                    textarea class="form-control" id="description" name="description"
                        rows="3" required { (d.description) }
                }
                div class="row mb-3" {
                    div class="col" {
                        label for="date" class="form-label" { "Date" }
                        input type="text" class="form-control" id="date" name="date"
                            value=(d.date) placeholder="e.g. 20 August";
                    }
                    div class="col" {
                        label for="time" class="form-label" { "Time" }
                        input type="text" class="form-control" id="time" name="time"
                            value=(d.time) placeholder="e.g. 10:00";
                    }
                }
                div class="mb-3" {
                    div class="form-check form-check-inline" {
                        input class="form-check-input" type="checkbox" id="registration_open"
                            name="registration_open" checked[ticked(&d.registration_open)];
                        label class="form-check-label" for="registration_open" { "Registration open" }
                    }
                    div class="form-check form-check-inline" {
                        input class="form-check-input" type="checkbox" id="team_event"
                            name="team_event" checked[ticked(&d.team_event)];
                        label class="form-check-label" for="team_event" { "Team event" }
                    }
                    div class="form-check form-check-inline" {
                        input class="form-check-input" type="checkbox" id="audio"
                            name="audio" checked[ticked(&d.audio)];
                        label class="form-check-label" for="audio" { "Audio required" }
                    }
                    div class="form-check form-check-inline" {
                        input class="form-check-input" type="checkbox" id="video"
                            name="video" checked[ticked(&d.video)];
                        label class="form-check-label" for="video" { "Video required" }
                    }
                }
                div class="mb-3" {
                    label for="team_size" class="form-label" { "Team size (team events only)" }
                    input type="number" min="1" max=(MAX_TEAM_SIZE) class="form-control" id="team_size"
                        name="team_size" value=(d.team_size);
                }
                @if self.with_image {
                    div class="mb-3" {
                        label for="image" class="form-label" { "Image (optional)" }
                        input type="file" class="form-control" id="image" name="image"
                            accept="image/*";
                        div class="form-text" {
                            "Once added, an image cannot be changed from the edit page."
                        }
                    }
                } @else {
                    p class="form-text" {
                        "Image modifications are not available in edit mode."
                    }
                }
                button type="submit" class="btn btn-primary" {
                    @if self.with_image { "Create event" } @else { "Save changes" }
                }
            }
        }
        .render_to(buffer)
    }
}

fn form_page(
    title: &str,
    action: &str,
    details: &EventDetails,
    with_image: bool,
    error: Option<&str>,
) -> Rendered<String> {
    Page::new()
        .title(title.to_string())
        .admin()
        .body(maud! {
            h1 { (title) }
            EventForm
                action=(action)
                details=(details)
                with_image=(with_image)
                error=(error);
        })
        .render()
}

#[tracing::instrument(skip_all)]
pub async fn do_create_event(
    _access: AdminAccess,
    mut conn: Conn<true>,
    State(bucket): State<Bucket>,
    multipart: Multipart,
) -> StandardResponse {
    let mut form = match MultipartForm::read(multipart).await {
        Ok(form) => form,
        Err(e) => {
            tracing::debug!("malformed event form: {e}");
            return bad_request(
                maud! { ErrorAlert msg=(e.body_text()); }.render(),
            );
        }
    };

    let details = EventDetails::from_multipart(&form);
    let fields = match details.validate() {
        Ok(fields) => fields,
        Err(msg) => {
            return bad_request(form_page(
                "Create event",
                "/admin/events",
                &details,
                true,
                Some(&msg),
            ));
        }
    };

    let event = fields.insert(&mut conn)?;

    if let Some(image) = form.take_file("image") {
        if let Err(e) = attach_image(bucket.as_ref(), &event.id, &image).await {
            tracing::warn!("image upload for event {} failed: {e}", event.id);
            return success(
                Page::new()
                    .title("Event created")
                    .admin()
                    .body(maud! {
                        WarningAlert
                            msg="Event created successfully, but image upload failed";
                        a class="btn btn-primary" href="/admin" { "Back to events" }
                    })
                    .render(),
            );
        }
    }

    see_other_ok(Redirect::to("/admin"))
}

pub async fn edit_event_page(
    _access: AdminAccess,
    Path(id): Path<String>,
    mut conn: Conn<true>,
) -> StandardResponse {
    let event = Event::fetch(&id, &mut conn)?;
    success(form_page(
        &format!("Edit {}", event.title),
        &format!("/admin/events/{}/edit", event.id),
        &EventDetails::from(&event),
        false,
        None,
    ))
}

#[tracing::instrument(skip(_access, conn))]
pub async fn do_edit_event(
    _access: AdminAccess,
    Path(id): Path<String>,
    mut conn: Conn<true>,
    Form(details): Form<EventDetails>,
) -> StandardResponse {
    let event = Event::fetch(&id, &mut conn)?;
    match details.validate() {
        Ok(fields) => {
            fields.update(&event.id, &mut conn)?;
            tracing::info!("updated event {}", event.id);
            see_other_ok(Redirect::to("/admin"))
        }
        Err(msg) => bad_request(form_page(
            &format!("Edit {}", event.title),
            &format!("/admin/events/{}/edit", event.id),
            &details,
            false,
            Some(&msg),
        )),
    }
}

pub async fn delete_event(
    _access: AdminAccess,
    Path(id): Path<String>,
    mut conn: Conn<true>,
) -> StandardResponse {
    Event::delete(&id, &mut conn)?;
    see_other_ok(Redirect::to("/admin"))
}

/// Flips one boolean column. Turning `team_event` either way resets the
/// team size to one.
#[tracing::instrument(skip(_access, conn))]
pub async fn toggle_event_field(
    _access: AdminAccess,
    Path((id, field)): Path<(String, String)>,
    mut conn: Conn<true>,
) -> StandardResponse {
    let event = Event::fetch(&id, &mut conn)?;
    let target = events::table.filter(events::id.eq(&event.id));

    match field.as_str() {
        "registration_open" => {
            diesel::update(target)
                .set(events::registration_open.eq(!event.registration_open))
                .execute(&mut *conn)?;
        }
        "team_event" => {
            diesel::update(target)
                .set((
                    events::team_event.eq(!event.team_event),
                    events::team_size.eq(1),
                ))
                .execute(&mut *conn)?;
        }
        "audio" => {
            diesel::update(target)
                .set(events::audio.eq(!event.audio))
                .execute(&mut *conn)?;
        }
        "video" => {
            diesel::update(target)
                .set(events::video.eq(!event.video))
                .execute(&mut *conn)?;
        }
        _ => return err_not_found(),
    }

    tracing::info!("toggled {field} on event {}", event.id);
    see_other_ok(Redirect::to("/admin"))
}

#[derive(Deserialize, Debug)]
pub struct TeamSizeForm {
    #[serde(default)]
    team_size: String,
}

#[tracing::instrument(skip(_access, conn))]
pub async fn set_team_size(
    _access: AdminAccess,
    Path(id): Path<String>,
    mut conn: Conn<true>,
    Form(form): Form<TeamSizeForm>,
) -> StandardResponse {
    let event = Event::fetch(&id, &mut conn)?;

    let size = match (event.team_event, parse_team_size(&form.team_size)) {
        (true, Ok(size)) => Ok(size),
        (false, _) => Err("Only team events have a team size.".to_string()),
        (true, Err(msg)) => Err(msg),
    }
    .map_err(|msg| {
        Page::new()
            .title("Team size")
            .admin()
            .body(maud! {
                ErrorAlert msg=(&msg);
                a class="btn btn-primary" href="/admin" { "Back to events" }
            })
            .render()
    });

    match size {
        Ok(size) => {
            diesel::update(events::table.filter(events::id.eq(&event.id)))
                .set(events::team_size.eq(size))
                .execute(&mut *conn)?;
            see_other_ok(Redirect::to("/admin"))
        }
        Err(page) => bad_request(page),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(title: &str, description: &str) -> EventDetails {
        EventDetails {
            title: title.to_string(),
            description: description.to_string(),
            ..EventDetails::new_event()
        }
    }

    #[test]
    fn new_event_defaults() {
        let fields = details("Quiz", "Pub quiz").validate().unwrap();
        assert!(fields.registration_open);
        assert!(!fields.team_event);
        assert!(!fields.audio);
        assert!(!fields.video);
        assert_eq!(fields.team_size, 1);
    }

    #[test]
    fn title_and_description_required() {
        assert!(details("  ", "x").validate().is_err());
        assert!(details("Quiz", "").validate().is_err());
        assert!(details(&"a".repeat(MAX_TITLE_CHARS + 1), "x").validate().is_err());
    }

    #[test]
    fn team_size_forced_for_individual_events() {
        let mut d = details("Quiz", "x");
        d.team_size = "5".to_string();
        assert_eq!(d.validate().unwrap().team_size, 1);

        d.team_event = tick(true);
        assert_eq!(d.validate().unwrap().team_size, 5);

        d.team_size = "".to_string();
        assert_eq!(d.validate().unwrap().team_size, 1);

        d.team_size = "0".to_string();
        assert!(d.validate().is_err());
    }

    #[test]
    fn unticked_checkbox_reads_false() {
        let mut d = details("Quiz", "x");
        d.registration_open = None;
        d.audio = Some("on".to_string());
        let fields = d.validate().unwrap();
        assert!(!fields.registration_open);
        assert!(fields.audio);
    }
}
