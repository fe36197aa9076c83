//! Request-level tests. Each test drives the full router against an
//! in-memory database and object store.

use std::{sync::Arc, time::Duration};

use axum::http::StatusCode;
use axum_test::{
    TestResponse, TestServer,
    multipart::{MultipartForm, Part},
};
use diesel::prelude::*;
use diesel_migrations::MigrationHarness;

use crate::{
    MIGRATIONS,
    admin::events::EventFields,
    config::{AppConfig, create_app},
    gate::{
        AdminStatus, DbStatusSource, FireStatus, GatePoller, GateState, Gates,
        PollConfig,
    },
    schema::{events, registrations},
    state::{AppState, DbPool, make_pool},
    storage::MemoryStore,
};

// A macro so that the panic points at the call site.
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status_code(),
            $status,
            "body = {}",
            $response.text()
        );
    };
}

struct Harness {
    server: TestServer,
    pool: DbPool,
    store: Arc<MemoryStore>,
    gates: Gates,
}

fn open() -> GateState {
    GateState {
        admin_access: true,
        fire: Some(FireStatus::Open),
        version: 1,
    }
}

fn harness() -> Harness {
    let pool = make_pool(":memory:").unwrap();
    {
        let mut conn = pool.get().unwrap();
        conn.run_pending_migrations(MIGRATIONS).unwrap();
        // the stored record has to agree with the gates, or the first
        // mirrored write would lock the dashboard
        assert_eq!(AdminStatus::set_admin_access(&mut conn, true).unwrap(), open());
    }

    let store = Arc::new(MemoryStore::new());
    let gates = Gates::new(open());
    let state = AppState {
        pool: pool.clone(),
        bucket: store.clone(),
        gates: gates.clone(),
        config: Arc::new(AppConfig::default()),
    };
    let server = TestServer::new(create_app(state, None)).unwrap();

    Harness {
        server,
        pool,
        store,
        gates,
    }
}

fn location(response: &TestResponse) -> String {
    response
        .header("location")
        .to_str()
        .unwrap()
        .to_string()
}

/// The number inside `<span id="token">`.
fn token(body: &str) -> i64 {
    let start = body.find(r#"<span id="token">"#).expect("no token on page")
        + r#"<span id="token">"#.len();
    let end = start + body[start..].find("</span>").unwrap();
    body[start..end].trim().parse().unwrap()
}

fn description() -> MultipartForm {
    MultipartForm::new().add_text("description", "")
}

fn team_form(name: &str, members: &[&str]) -> MultipartForm {
    members.iter().fold(
        MultipartForm::new().add_text("team_name", name),
        |form, member| form.add_text("members", *member),
    )
}

impl Harness {
    async fn sign_in(&self, name: &str, email: &str) -> String {
        let response = self
            .server
            .post("/")
            .form(&[("name", name), ("email", email)])
            .await;
        assert_status!(response, StatusCode::SEE_OTHER);
        location(&response)
            .strip_prefix("/dashboard/")
            .and_then(|rest| rest.strip_suffix("/overview"))
            .unwrap()
            .to_string()
    }

    fn event(&self, title: &str, fields: impl FnOnce(&mut EventFields)) -> String {
        let mut event = EventFields {
            title: title.to_string(),
            description: format!("All about {title}"),
            date: "20 August".to_string(),
            time: "10:00".to_string(),
            registration_open: true,
            team_event: false,
            team_size: 1,
            audio: false,
            video: false,
        };
        fields(&mut event);
        event.insert(&mut self.pool.get().unwrap()).unwrap().id
    }

    async fn register(
        &self,
        sid: &str,
        eid: &str,
        form: MultipartForm,
    ) -> TestResponse {
        self.server
            .post(&format!("/dashboard/{sid}/register/{eid}"))
            .multipart(form)
            .await
    }

    async fn register_team(
        &self,
        sid: &str,
        eid: &str,
        form: MultipartForm,
    ) -> TestResponse {
        self.server
            .post(&format!("/dashboard/{sid}/register_team/{eid}"))
            .multipart(form)
            .await
    }

    fn registrations(&self) -> i64 {
        registrations::table
            .count()
            .get_result(&mut self.pool.get().unwrap())
            .unwrap()
    }
}

#[tokio::test]
async fn sign_in_resolves_by_email() {
    let h = harness();
    let first = h.sign_in("Ada", "ada@uni.ac.uk").await;
    let again = h.sign_in("Ada L.", "ada@uni.ac.uk").await;
    assert_eq!(first, again);

    let other = h.sign_in("Bo", "bo@uni.ac.uk").await;
    assert_ne!(first, other);

    let response = h
        .server
        .post("/")
        .form(&[("name", "Ada"), ("email", "  ")])
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);

    let response = h.server.get("/dashboard/nobody/overview").await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn individual_tokens_count_up_and_repeat() {
    let h = harness();
    let eid = h.event("Quiz", |_| {});
    let a = h.sign_in("A", "a@x.com").await;
    let b = h.sign_in("B", "b@x.com").await;

    let response = h.register(&a, &eid, description()).await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(token(&response.text()), 1);

    let response = h.register(&b, &eid, description()).await;
    assert_eq!(token(&response.text()), 2);

    let response = h.register(&a, &eid, description()).await;
    assert_status!(response, StatusCode::OK);
    let body = response.text();
    assert_eq!(token(&body), 1);
    assert!(body.contains("You are already registered for this event."));
    assert_eq!(h.registrations(), 2);

    // the registration page shows the token instead of the form
    let response = h
        .server
        .get(&format!("/dashboard/{a}/register/{eid}"))
        .await;
    assert_eq!(token(&response.text()), 1);
}

#[tokio::test]
async fn wrong_flow_redirects_to_the_right_one() {
    let h = harness();
    let eid = h.event("Quiz", |_| {});
    let sid = h.sign_in("A", "a@x.com").await;

    let response = h
        .server
        .get(&format!("/dashboard/{sid}/register_team/{eid}"))
        .await;
    assert_status!(response, StatusCode::SEE_OTHER);
    assert_eq!(location(&response), format!("/dashboard/{sid}/register/{eid}"));

    let response =
        h.register_team(&sid, &eid, team_form("Larks", &["A", "B"])).await;
    assert_status!(response, StatusCode::BAD_REQUEST);
    assert!(response.text().contains("individual event"));
    assert_eq!(h.registrations(), 0);
}

#[tokio::test]
async fn team_rules_are_enforced() {
    let h = harness();
    let eid = h.event("Band night", |e| {
        e.team_event = true;
        e.team_size = 3;
    });
    let a = h.sign_in("A", "a@x.com").await;
    let b = h.sign_in("B", "b@x.com").await;

    let response = h
        .register_team(&a, &eid, team_form("Larks", &["A", "B", "C", "D"]))
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
    assert!(response.text().contains("Maximum team size is 3."));

    let response = h.register_team(&a, &eid, team_form("Larks", &["A"])).await;
    assert_status!(response, StatusCode::BAD_REQUEST);
    assert!(response.text().contains("Minimum 2 team members are required."));

    let response = h.register_team(&a, &eid, team_form("", &["A", "B"])).await;
    assert_status!(response, StatusCode::BAD_REQUEST);

    let response = h
        .register_team(&a, &eid, team_form("Larks", &["A", "", "B"]))
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(token(&response.text()), 1);

    let response = h
        .register_team(&b, &eid, team_form("Larks", &["C", "D"]))
        .await;
    assert_status!(response, StatusCode::OK);
    let body = response.text();
    assert_eq!(token(&body), 1);
    assert!(body.contains("You are already registered for this event."));
    assert_eq!(h.registrations(), 1);
}

#[tokio::test]
async fn required_media_is_checked_before_any_write() {
    let h = harness();
    let eid = h.event("Open mic", |e| e.audio = true);
    let sid = h.sign_in("A", "a@x.com").await;

    let response = h.register(&sid, &eid, description()).await;
    assert_status!(response, StatusCode::BAD_REQUEST);
    assert!(response.text().contains("Audio file is required"));
    assert_eq!(h.registrations(), 0);
    assert!(h.store.paths().is_empty());

    let form = description().add_part(
        "audio",
        Part::bytes(b"ID3 fake".to_vec())
            .file_name("song.mp3")
            .mime_type("audio/mpeg"),
    );
    let response = h.register(&sid, &eid, form).await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(token(&response.text()), 1);
    assert_eq!(h.store.paths(), vec![format!("audio/{eid}_{sid}.mp3")]);

    // the roster links the submission
    let response = h
        .server
        .get(&format!("/admin/events/{eid}/participants"))
        .await;
    assert_status!(response, StatusCode::OK);
    let body = response.text();
    assert!(body.contains("#1"));
    assert!(body.contains(&format!("audio/{eid}_{sid}.mp3")));
}

#[tokio::test]
async fn failed_media_upload_leaves_no_registration() {
    let h = harness();
    let eid = h.event("Open mic", |e| e.audio = true);
    let sid = h.sign_in("A", "a@x.com").await;
    h.store.set_fail_uploads(true);

    let form = description().add_part(
        "audio",
        Part::bytes(b"ID3 fake".to_vec()).file_name("song.mp3"),
    );
    let response = h.register(&sid, &eid, form).await;
    assert_status!(response, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(h.registrations(), 0);
}

#[tokio::test]
async fn fire_toggle_closes_registrations_everywhere() {
    let h = harness();
    let eid = h.event("Quiz", |_| {});
    let a = h.sign_in("A", "a@x.com").await;
    let b = h.sign_in("B", "b@x.com").await;
    let response = h.register(&a, &eid, description()).await;
    assert_eq!(token(&response.text()), 1);

    let response = h.server.post("/admin/fire").await;
    assert_status!(response, StatusCode::SEE_OTHER);
    assert_eq!(h.gates.public.current().fire, Some(FireStatus::Closed));
    assert_eq!(h.gates.admin.current().fire, Some(FireStatus::Closed));
    let stored = AdminStatus::fetch(&mut h.pool.get().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(stored.fire_status, 400);

    let body = h.server.get(&format!("/dashboard/{b}/freshers")).await.text();
    assert!(body.contains("Registrations are closed"));
    assert!(!body.contains("Register Now"));

    let response = h.register(&b, &eid, description()).await;
    assert_status!(response, StatusCode::BAD_REQUEST);
    assert!(response.text().contains("closed"));

    // an existing registration still shows its token
    let response = h.register(&a, &eid, description()).await;
    assert_eq!(token(&response.text()), 1);

    let response = h.server.post("/admin/fire").await;
    assert_status!(response, StatusCode::SEE_OTHER);
    assert!(h.gates.public.current().registrations_open());
    let body = h.server.get(&format!("/dashboard/{b}/freshers")).await.text();
    assert!(body.contains("Register Now"));
}

#[tokio::test]
async fn polling_after_fire_toggle_sees_the_committed_status() {
    let h = harness();
    let _poller = GatePoller::spawn(
        DbStatusSource::new(h.pool.clone()),
        h.gates.public.clone(),
        PollConfig::every(Duration::from_millis(5)),
    );

    let response = h.server.post("/admin/fire").await;
    assert_status!(response, StatusCode::SEE_OTHER);
    let mirrored = h.gates.public.current();
    assert_eq!(mirrored.fire, Some(FireStatus::Closed));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let polled = h.gates.public.current();
    assert_eq!(polled.fire, Some(FireStatus::Closed));
    assert_eq!(polled.admin_access, mirrored.admin_access);
}

#[tokio::test]
async fn locked_admin_is_forbidden() {
    let h = harness();
    let eid = h.event("Quiz", |_| {});
    h.gates.admin.publish(GateState {
        admin_access: false,
        ..open()
    });

    let response = h.server.get("/admin").await;
    assert_status!(response, StatusCode::FORBIDDEN);
    let body = response.text();
    assert!(body.contains("Admin Access has been locked by the Creator"));
    assert!(body.contains("/gate/admin?seen="));

    let response = h.server.post("/admin/fire").await;
    assert_status!(response, StatusCode::FORBIDDEN);
    let response = h
        .server
        .post(&format!("/admin/events/{eid}/delete"))
        .await;
    assert_status!(response, StatusCode::FORBIDDEN);
    assert_eq!(h.gates.public.current().fire, Some(FireStatus::Open));
}

#[tokio::test]
async fn deleting_an_event_removes_its_registrations() {
    let h = harness();
    let quiz = h.event("Quiz", |_| {});
    let hunt = h.event("Treasure hunt", |_| {});
    let sid = h.sign_in("A", "a@x.com").await;
    h.register(&sid, &quiz, description()).await;
    h.register(&sid, &hunt, description()).await;
    assert_eq!(h.registrations(), 2);

    let response = h.server.post(&format!("/admin/events/{quiz}/delete")).await;
    assert_status!(response, StatusCode::SEE_OTHER);
    assert_eq!(h.registrations(), 1);
    let remaining: i64 = events::table
        .count()
        .get_result(&mut h.pool.get().unwrap())
        .unwrap();
    assert_eq!(remaining, 1);

    let response = h.server.post(&format!("/admin/events/{quiz}/delete")).await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_creates_events_with_images() {
    let h = harness();

    let form = MultipartForm::new()
        .add_text("title", "Quiz Night")
        .add_text("description", "Pub quiz")
        .add_text("registration_open", "on")
        .add_text("team_size", "4")
        .add_part(
            "image",
            Part::bytes(b"\x89PNG".to_vec())
                .file_name("poster.png")
                .mime_type("image/png"),
        );
    let response = h.server.post("/admin/events").multipart(form).await;
    assert_status!(response, StatusCode::SEE_OTHER);

    let (id, team_size): (String, i64) = events::table
        .select((events::id, events::team_size))
        .first(&mut h.pool.get().unwrap())
        .unwrap();
    assert_eq!(team_size, 1);
    assert_eq!(h.store.paths(), vec![format!("{id}.png")]);

    let body = h.server.get("/admin?q=quiz").await.text();
    assert!(body.contains("Quiz Night"));
    let body = h.server.get("/admin?q=hunt").await.text();
    assert!(!body.contains("Quiz Night"));

    let response = h
        .server
        .post("/admin/events")
        .multipart(MultipartForm::new().add_text("title", "No description"))
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
    assert!(response.text().contains("Description is required."));
}

#[tokio::test]
async fn image_failure_still_creates_the_event() {
    let h = harness();
    h.store.set_fail_uploads(true);

    let form = MultipartForm::new()
        .add_text("title", "Quiz")
        .add_text("description", "Pub quiz")
        .add_part("image", Part::bytes(b"GIF89a".to_vec()).file_name("a.gif"));
    let response = h.server.post("/admin/events").multipart(form).await;
    assert_status!(response, StatusCode::OK);
    assert!(
        response
            .text()
            .contains("Event created successfully, but image upload failed")
    );

    let n: i64 = events::table
        .count()
        .get_result(&mut h.pool.get().unwrap())
        .unwrap();
    assert_eq!(n, 1);
}

#[tokio::test]
async fn admin_toggles_and_team_size() {
    let h = harness();
    let eid = h.event("Band night", |e| {
        e.team_event = true;
        e.team_size = 4;
    });
    let fetch = || -> (bool, bool, i64) {
        events::table
            .filter(events::id.eq(&eid))
            .select((events::registration_open, events::team_event, events::team_size))
            .first(&mut h.pool.get().unwrap())
            .unwrap()
    };

    let response = h
        .server
        .post(&format!("/admin/events/{eid}/toggle/registration_open"))
        .await;
    assert_status!(response, StatusCode::SEE_OTHER);
    assert_eq!(fetch(), (false, true, 4));

    let response = h
        .server
        .post(&format!("/admin/events/{eid}/team_size"))
        .form(&[("team_size", "0")])
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);

    let response = h
        .server
        .post(&format!("/admin/events/{eid}/team_size"))
        .form(&[("team_size", "9223372036854775807")])
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
    assert!(response.text().contains("Team size must be at most 50."));
    assert_eq!(fetch(), (false, true, 4));

    let response = h
        .server
        .post(&format!("/admin/events/{eid}/team_size"))
        .form(&[("team_size", "6")])
        .await;
    assert_status!(response, StatusCode::SEE_OTHER);
    assert_eq!(fetch(), (false, true, 6));

    let response = h
        .server
        .post(&format!("/admin/events/{eid}/toggle/team_event"))
        .await;
    assert_status!(response, StatusCode::SEE_OTHER);
    assert_eq!(fetch(), (false, false, 1));

    let response = h
        .server
        .post(&format!("/admin/events/{eid}/toggle/title"))
        .await;
    assert_status!(response, StatusCode::NOT_FOUND);

    let response = h
        .server
        .post(&format!("/admin/events/{eid}/edit"))
        .form(&[
            ("title", "Battle of the bands"),
            ("description", "Loud"),
            ("team_event", "on"),
            ("team_size", "5"),
        ])
        .await;
    assert_status!(response, StatusCode::SEE_OTHER);
    assert_eq!(fetch(), (false, true, 5));
}

#[tokio::test]
async fn exports_are_downloads() {
    let h = harness();
    let eid = h.event("Quiz  Night", |_| {});
    for (name, email) in [("A", "a@x.com"), ("B", "b@x.com")] {
        let sid = h.sign_in(name, email).await;
        h.register(&sid, &eid, description()).await;
    }

    let response = h.server.get(&format!("/admin/events/{eid}/export.pdf")).await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.header("content-type"), "application/pdf");
    assert!(
        response
            .header("content-disposition")
            .to_str()
            .unwrap()
            .contains("Quiz_Night_participant_list.pdf")
    );
    assert!(response.as_bytes().starts_with(b"%PDF"));

    let response = h.server.get(&format!("/admin/events/{eid}/export.csv")).await;
    assert_status!(response, StatusCode::OK);
    let body = response.text();
    assert!(body.starts_with("Token,Name,Team Name,Email,Description"));
    assert!(body.contains("1,A,,a@x.com,"));
    assert!(body.contains("2,B,,b@x.com,"));

    let response = h.server.get("/admin/events/missing/export.pdf").await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn gate_fragments_ask_for_reload_on_change() {
    let h = harness();

    let response = h.server.get("/gate/public?seen=1").await;
    assert_status!(response, StatusCode::NO_CONTENT);
    let response = h.server.get("/gate/public").await;
    assert_status!(response, StatusCode::NO_CONTENT);

    h.gates.mirror(GateState {
        fire: Some(FireStatus::Closed),
        version: 2,
        ..open()
    });

    let response = h.server.get("/gate/public?seen=1").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.header("hx-refresh"), "true");
    let response = h.server.get("/gate/admin?seen=2").await;
    assert_status!(response, StatusCode::NO_CONTENT);

    let status: serde_json::Value = h.server.get("/api/status").await.json();
    assert_eq!(status["fire_status"], 400);
    assert_eq!(status["registrations_open"], false);
    assert_eq!(status["version"], 2);
}

#[tokio::test]
async fn students_edit_and_withdraw_their_registrations() {
    let h = harness();
    let eid = h.event("Band night", |e| {
        e.team_event = true;
        e.team_size = 3;
    });
    let quiz = h.event("Quiz", |_| {});
    let sid = h.sign_in("A", "a@x.com").await;
    h.register_team(&sid, &eid, team_form("Larks", &["A", "B"])).await;
    h.register(&sid, &quiz, description()).await;

    let body = h.server.get(&format!("/dashboard/{sid}/overview")).await.text();
    assert!(body.contains("Larks"));
    assert!(body.contains("Team events"));
    assert!(body.contains("Individual events"));

    let edit = format!("/dashboard/{sid}/registrations/{eid}/edit");
    let response = h
        .server
        .post(&edit)
        .form(&[
            ("team_name", "Nightingales"),
            ("members", "A"),
            ("members", "B"),
            ("members", "C"),
            ("description", "we sing"),
        ])
        .await;
    assert_status!(response, StatusCode::SEE_OTHER);
    let body = h.server.get(&format!("/dashboard/{sid}/overview")).await.text();
    assert!(body.contains("Nightingales"));
    assert!(body.contains("we sing"));

    let response = h
        .server
        .post(&edit)
        .form(&[("team_name", "Nightingales"), ("members", "A")])
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);

    let withdraw = format!("/dashboard/{sid}/registrations/{eid}/delete");
    let response = h.server.post(&withdraw).await;
    assert_status!(response, StatusCode::SEE_OTHER);
    assert_eq!(h.registrations(), 1);
    let response = h.server.post(&withdraw).await;
    assert_status!(response, StatusCode::NOT_FOUND);
}
