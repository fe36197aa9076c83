use std::{path::PathBuf, time::Duration};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::{services::ServeDir, trace::TraceLayer};
use url::Url;

use crate::{
    admin::{
        admin_dashboard,
        events::{
            delete_event, do_create_event, do_edit_event, edit_event_page,
            set_team_size, toggle_event_field,
        },
        roster::{export_csv, export_pdf, participants_fragment},
        toggle_fire,
    },
    events::public::{freshers_events_fragment, freshers_page},
    gate::{PollConfig, admin_gate_fragment, public_gate_fragment, status_json},
    registrations::{
        overview::{
            do_edit_registration, edit_registration_page, overview_page,
            withdraw_registration,
        },
        public::{
            do_register_individual, do_register_team,
            register_individual_page, register_team_page,
        },
    },
    state::{AppState, tx_commit},
    students::{do_sign_in, sign_in_page},
};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {var}: {reason}")]
    Env { var: &'static str, reason: String },
}

/// Runtime configuration. Every field has a default so an empty (or absent)
/// config file is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub database_url: String,
    pub bind: String,
    /// Root directory of the `event-image` bucket.
    pub storage_dir: PathBuf,
    /// Base URL under which stored objects are served.
    pub public_url: Url,
    pub public_poll_ms: u64,
    pub admin_poll_ms: u64,
    pub poll_backoff_factor: f64,
    pub poll_max_interval_ms: u64,
    pub max_upload_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "freshers.db".to_string(),
            bind: "127.0.0.1:8000".to_string(),
            storage_dir: PathBuf::from("storage"),
            public_url: default_public_url(),
            public_poll_ms: 2_000,
            admin_poll_ms: 5_000,
            poll_backoff_factor: 1.0,
            poll_max_interval_ms: 60_000,
            // two 50 MiB media files, plus some room for the text fields
            max_upload_bytes: 2 * crate::media::MAX_MEDIA_BYTES + 1024 * 1024,
        }
    }
}

fn default_public_url() -> Url {
    Url::parse("http://127.0.0.1:8000/storage/event-image/")
        .expect("hard-coded url is valid")
}

impl AppConfig {
    /// Reads the config file (when given) and then applies environment
    /// overrides.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| {
                    ConfigError::Read {
                        path: path.to_path_buf(),
                        source,
                    }
                })?;
                Self::from_toml(&text).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => AppConfig::default(),
        };

        config.with_env(|var| std::env::var(var).ok())
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Applies overrides from `lookup`, which is `std::env::var` outside of
    /// tests.
    pub fn with_env(
        mut self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(bind) = lookup("FRESHERS_BIND") {
            self.bind = bind;
        }
        if let Some(dir) = lookup("FRESHERS_STORAGE_DIR") {
            self.storage_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("FRESHERS_PUBLIC_URL") {
            self.public_url =
                Url::parse(&url).map_err(|e| ConfigError::Env {
                    var: "FRESHERS_PUBLIC_URL",
                    reason: e.to_string(),
                })?;
        }
        Ok(self)
    }

    pub fn public_poll(&self) -> PollConfig {
        self.poll_config(self.public_poll_ms)
    }

    pub fn admin_poll(&self) -> PollConfig {
        self.poll_config(self.admin_poll_ms)
    }

    fn poll_config(&self, interval_ms: u64) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(interval_ms),
            backoff_factor: self.poll_backoff_factor,
            max_interval: Duration::from_millis(
                self.poll_max_interval_ms.max(interval_ms),
            ),
        }
    }
}

/// Builds the application router.
///
/// Stored objects are only served from disk when `storage_dir` is given
/// (tests use the in-memory store and pass `None`).
pub fn create_app(state: AppState, storage_dir: Option<PathBuf>) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.config.max_upload_bytes);

    let router = Router::new()
        .route("/", get(sign_in_page).post(do_sign_in))
        .route("/dashboard/:sid/overview", get(overview_page))
        .route(
            "/dashboard/:sid/registrations/:eid/edit",
            get(edit_registration_page).post(do_edit_registration),
        )
        .route(
            "/dashboard/:sid/registrations/:eid/delete",
            post(withdraw_registration),
        )
        .route("/dashboard/:sid/freshers", get(freshers_page))
        .route(
            "/dashboard/:sid/freshers/events",
            get(freshers_events_fragment),
        )
        .route(
            "/dashboard/:sid/register/:eid",
            get(register_individual_page)
                .post(do_register_individual)
                .layer(upload_limit.clone()),
        )
        .route(
            "/dashboard/:sid/register_team/:eid",
            get(register_team_page)
                .post(do_register_team)
                .layer(upload_limit.clone()),
        )
        .route("/admin", get(admin_dashboard))
        .route(
            "/admin/events",
            post(do_create_event).layer(upload_limit),
        )
        .route(
            "/admin/events/:id/edit",
            get(edit_event_page).post(do_edit_event),
        )
        .route("/admin/events/:id/delete", post(delete_event))
        .route("/admin/events/:id/toggle/:field", post(toggle_event_field))
        .route("/admin/events/:id/team_size", post(set_team_size))
        .route(
            "/admin/events/:id/participants",
            get(participants_fragment),
        )
        .route("/admin/events/:id/export.pdf", get(export_pdf))
        .route("/admin/events/:id/export.csv", get(export_csv))
        .route("/admin/fire", post(toggle_fire))
        .route("/gate/public", get(public_gate_fragment))
        .route("/gate/admin", get(admin_gate_fragment))
        .route("/api/status", get(status_json));

    let router = match storage_dir {
        Some(dir) => {
            router.nest_service("/storage/event-image", ServeDir::new(dir))
        }
        None => router,
    };

    router
        .layer(middleware::from_fn(tx_commit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
