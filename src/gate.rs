//! The admin status record and the in-process gates which follow it.
//!
//! A [`GatePoller`] reads the record through a [`StatusSource`] on a fixed
//! interval and publishes into a [`GateHandle`] only when something changed.
//! Pages embed a [`GateWatcher`], which asks `/gate/{public,admin}` whether
//! the version they were rendered with is still current.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, async_trait,
    extract::{Query, State},
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use hypertext::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Notify, watch},
    task::JoinHandle,
};

use crate::{
    schema::admin_status,
    state::DbPool,
    util_resp::{StandardResponse, SuccessResponse},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FireStatus {
    Open,
    Closed,
}

impl FireStatus {
    pub fn code(self) -> i64 {
        match self {
            FireStatus::Open => 200,
            FireStatus::Closed => 400,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            200 => Some(FireStatus::Open),
            400 => Some(FireStatus::Closed),
            _ => None,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            FireStatus::Open => FireStatus::Closed,
            FireStatus::Closed => FireStatus::Open,
        }
    }
}

/// What a gate currently believes about the admin status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateState {
    pub admin_access: bool,
    /// `None` until the record has been read successfully.
    pub fire: Option<FireStatus>,
    pub version: i64,
}

impl GateState {
    /// The state before anything has been read: access denied, fire unknown.
    pub fn unknown() -> Self {
        Self {
            admin_access: false,
            fire: None,
            version: -1,
        }
    }

    pub fn registrations_open(&self) -> bool {
        self.fire == Some(FireStatus::Open)
    }

    fn same_flags(&self, other: &GateState) -> bool {
        self.admin_access == other.admin_access && self.fire == other.fire
    }
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = admin_status)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AdminStatus {
    pub id: i64,
    pub admin_access: bool,
    pub fire_status: i64,
    pub version: i64,
    pub updated_at: NaiveDateTime,
}

impl AdminStatus {
    pub fn fetch(conn: &mut SqliteConnection) -> QueryResult<Option<Self>> {
        admin_status::table
            .filter(admin_status::id.eq(1))
            .select(AdminStatus::as_select())
            .first(conn)
            .optional()
    }

    pub fn gate_state(&self) -> GateState {
        GateState {
            admin_access: self.admin_access,
            fire: FireStatus::from_code(self.fire_status),
            version: self.version,
        }
    }

    pub fn set_fire(
        conn: &mut SqliteConnection,
        fire: FireStatus,
    ) -> QueryResult<GateState> {
        Self::write(conn, None, Some(fire))
    }

    pub fn set_admin_access(
        conn: &mut SqliteConnection,
        access: bool,
    ) -> QueryResult<GateState> {
        Self::write(conn, Some(access), None)
    }

    /// Every write bumps `version`. A missing row is recreated with the
    /// defaults of the initial migration.
    fn write(
        conn: &mut SqliteConnection,
        access: Option<bool>,
        fire: Option<FireStatus>,
    ) -> QueryResult<GateState> {
        conn.transaction(|conn| {
            let now = Utc::now().naive_utc();
            let current = Self::fetch(conn)?;

            let next = match current {
                Some(current) => AdminStatus {
                    admin_access: access.unwrap_or(current.admin_access),
                    fire_status: fire
                        .map(FireStatus::code)
                        .unwrap_or(current.fire_status),
                    version: current.version + 1,
                    updated_at: now,
                    ..current
                },
                None => AdminStatus {
                    id: 1,
                    admin_access: access.unwrap_or(false),
                    fire_status: fire.unwrap_or(FireStatus::Open).code(),
                    version: 1,
                    updated_at: now,
                },
            };

            diesel::insert_into(admin_status::table)
                .values((
                    admin_status::id.eq(next.id),
                    admin_status::admin_access.eq(next.admin_access),
                    admin_status::fire_status.eq(next.fire_status),
                    admin_status::version.eq(next.version),
                    admin_status::updated_at.eq(next.updated_at),
                ))
                .on_conflict(admin_status::id)
                .do_update()
                .set((
                    admin_status::admin_access.eq(next.admin_access),
                    admin_status::fire_status.eq(next.fire_status),
                    admin_status::version.eq(next.version),
                    admin_status::updated_at.eq(next.updated_at),
                ))
                .execute(conn)?;

            tracing::info!(
                "admin status is now access={} fire={} (version {})",
                next.admin_access,
                next.fire_status,
                next.version
            );

            Ok(next.gate_state())
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum GateError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("could not check out a connection: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("status read was cancelled: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait StatusSource: Send + Sync + 'static {
    async fn read(&self) -> Result<GateState, GateError>;
}

pub struct DbStatusSource {
    pool: DbPool,
}

impl DbStatusSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusSource for DbStatusSource {
    async fn read(&self) -> Result<GateState, GateError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let status = AdminStatus::fetch(&mut conn)?;
            Ok(status
                .map(|s| s.gate_state())
                .unwrap_or_else(GateState::unknown))
        })
        .await?
    }
}

struct GateInner {
    tx: watch::Sender<GateState>,
    shutdown: Notify,
    stopped: AtomicBool,
}

/// Shared view of one gate.
#[derive(Clone)]
pub struct GateHandle {
    inner: Arc<GateInner>,
}

impl GateHandle {
    pub fn new(initial: GateState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self {
            inner: Arc::new(GateInner {
                tx,
                shutdown: Notify::new(),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn current(&self) -> GateState {
        *self.inner.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.inner.tx.subscribe()
    }

    /// Replaces the state if either flag differs, returning whether it did.
    /// A version bump alone is not a change.
    pub fn publish(&self, next: GateState) -> bool {
        self.inner.tx.send_if_modified(|state| {
            if state.same_flags(&next) {
                false
            } else {
                *state = next;
                true
            }
        })
    }

    /// Stops every poller feeding this gate.
    pub fn shutdown(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.shutdown.notify_waiters();
    }

    fn is_shut_down(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollConfig {
    pub interval: Duration,
    /// Multiplier applied to the delay after each consecutive failed read.
    /// `1.0` disables backoff.
    pub backoff_factor: f64,
    pub max_interval: Duration,
}

impl PollConfig {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            backoff_factor: 1.0,
            max_interval: interval,
        }
    }

    pub fn next_delay(&self, current: Duration, failed: bool) -> Duration {
        if !failed || self.backoff_factor <= 1.0 {
            return self.interval;
        }
        current
            .mul_f64(self.backoff_factor)
            .min(self.max_interval)
            .max(self.interval)
    }
}

/// A background task polling a [`StatusSource`]. Dropping it stops polling.
pub struct GatePoller {
    task: JoinHandle<()>,
}

impl GatePoller {
    pub fn spawn(
        source: impl StatusSource,
        gate: GateHandle,
        config: PollConfig,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut delay = config.interval;
            loop {
                // Registered before the flag check so a shutdown during the
                // read below still wakes the sleep.
                let shutdown = gate.inner.shutdown.notified();
                tokio::pin!(shutdown);
                shutdown.as_mut().enable();
                if gate.is_shut_down() {
                    break;
                }

                let failed = match source.read().await {
                    Ok(state) => {
                        if gate.publish(state) {
                            tracing::info!(
                                "gate changed: access={} fire={:?}",
                                state.admin_access,
                                state.fire
                            );
                        } else {
                            tracing::trace!("gate unchanged");
                        }
                        false
                    }
                    Err(e) => {
                        tracing::warn!("failed to read admin status: {e}");
                        true
                    }
                };
                delay = config.next_delay(delay, failed);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = &mut shutdown => break,
                }
            }
            tracing::debug!("gate poller stopped");
        });
        Self { task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for GatePoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// The two gates: the public one drives the freshers pages and the
/// registration flow, the admin one drives the admin dashboard.
#[derive(Clone)]
pub struct Gates {
    pub public: GateHandle,
    pub admin: GateHandle,
}

impl Gates {
    pub fn new(initial: GateState) -> Self {
        Self {
            public: GateHandle::new(initial),
            admin: GateHandle::new(initial),
        }
    }

    /// Pushes a locally made change into both gates without waiting for the
    /// next poll.
    pub fn mirror(&self, state: GateState) {
        self.public.publish(state);
        self.admin.publish(state);
    }

    pub fn shutdown(&self) {
        self.public.shutdown();
        self.admin.shutdown();
    }
}

/// Polls the gate endpoint and reloads the page when the version differs
/// from the one it was rendered with.
pub struct GateWatcher {
    pub path: &'static str,
    pub version: i64,
    pub every_ms: u64,
}

impl Renderable for GateWatcher {
    fn render_to(
        &self,
        buffer: &mut hypertext::Buffer<hypertext::context::Node>,
    ) {
        maud! {
            div
                hx-get=(format!("{}?seen={}", self.path, self.version))
                hx-trigger=(format!("every {}ms", self.every_ms))
                hx-swap="none" {}
        }
        .render_to(buffer)
    }
}

#[derive(Deserialize)]
pub struct SeenQuery {
    seen: Option<i64>,
}

fn compare(gate: &GateHandle, seen: Option<i64>) -> StandardResponse {
    match seen {
        Some(seen) if seen != gate.current().version => {
            Ok(SuccessResponse::Refresh)
        }
        _ => Ok(SuccessResponse::NoContent),
    }
}

pub async fn public_gate_fragment(
    State(gates): State<Gates>,
    Query(query): Query<SeenQuery>,
) -> StandardResponse {
    compare(&gates.public, query.seen)
}

pub async fn admin_gate_fragment(
    State(gates): State<Gates>,
    Query(query): Query<SeenQuery>,
) -> StandardResponse {
    compare(&gates.admin, query.seen)
}

#[derive(Serialize)]
pub struct StatusBody {
    admin_access: bool,
    fire_status: Option<i64>,
    registrations_open: bool,
    version: i64,
}

pub async fn status_json(State(gates): State<Gates>) -> Json<StatusBody> {
    let state = gates.public.current();
    Json(StatusBody {
        admin_access: state.admin_access,
        fire_status: state.fire.map(FireStatus::code),
        registrations_open: state.registrations_open(),
        version: state.version,
    })
}
