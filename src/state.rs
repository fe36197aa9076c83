use std::{
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use diesel::{
    Connection, SqliteConnection,
    connection::{SimpleConnection, TransactionManager},
    r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection},
};

use crate::{
    config::AppConfig, gate::Gates, storage::Bucket,
    util_resp::FailureResponse,
};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

type PooledConn = PooledConnection<ConnectionManager<SqliteConnection>>;

type SqliteTransactionManager =
    <SqliteConnection as Connection>::TransactionManager;

/// Everything a handler can extract with [`axum::extract::State`].
#[derive(Clone, FromRef)]
pub struct AppState {
    pub pool: DbPool,
    pub bucket: Bucket,
    pub gates: Gates,
    pub config: Arc<AppConfig>,
}

#[derive(Debug)]
struct ConnectionOptions {
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error>
    for ConnectionOptions
{
    fn on_acquire(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.busy_timeout.as_millis()
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Builds the connection pool. An in-memory database only exists for as long
/// as its single connection does, so the pool is capped at one connection in
/// that case.
pub fn make_pool(db_url: &str) -> Result<DbPool, diesel::r2d2::PoolError> {
    Pool::builder()
        .max_size(if db_url == ":memory:" { 1 } else { 10 })
        .connection_customizer(Box::new(ConnectionOptions {
            busy_timeout: Duration::from_secs(5),
        }))
        .build(ConnectionManager::<SqliteConnection>::new(db_url))
}

/// Where `Conn<true>` parks its connection so that [`tx_commit`] can finish
/// the transaction once the handler has produced a response.
#[derive(Clone, Default)]
struct TxSlot(Arc<Mutex<Option<ThreadSafeConn<true>>>>);

/// Commits the request's transaction (if one was opened) when the response
/// is a success or a redirect, and rolls it back otherwise.
pub async fn tx_commit(mut req: Request, next: Next) -> Response {
    let slot = TxSlot::default();
    req.extensions_mut().insert(slot.clone());

    let response = next.run(req).await;

    let conn = slot.0.lock().ok().and_then(|mut slot| slot.take());
    if let Some(conn) = conn {
        let mut conn = conn.inner.lock().await;
        let status = response.status();
        let ret = if status.is_success()
            || status.is_redirection()
            || status.is_informational()
        {
            SqliteTransactionManager::commit_transaction(&mut **conn)
        } else {
            tracing::debug!("rolling back request transaction ({status})");
            SqliteTransactionManager::rollback_transaction(&mut **conn)
        };
        if let Err(e) = ret {
            tracing::error!("failed to finish request transaction: {e}");
            return FailureResponse::ServerError(()).into_response();
        }
    }

    response
}

/// A pooled connection shared between the extractors of a single request.
#[derive(Clone)]
pub struct ThreadSafeConn<const TX: bool> {
    pub inner: Arc<tokio::sync::Mutex<PooledConn>>,
}

#[async_trait]
impl<S, const TX: bool> FromRequestParts<S> for ThreadSafeConn<TX>
where
    S: Send + Sync,
    DbPool: FromRef<S>,
{
    type Rejection = FailureResponse;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        if let Some(conn) = parts.extensions.get::<ThreadSafeConn<TX>>() {
            return Ok(conn.clone());
        }

        let pool = DbPool::from_ref(state);
        let mut conn = tokio::task::spawn_blocking(move || pool.get())
            .await
            .map_err(|e| {
                tracing::error!("connection checkout task failed: {e}");
                FailureResponse::ServerError(())
            })??;

        if TX {
            SqliteTransactionManager::begin_transaction(&mut *conn)?;
        }

        let conn = ThreadSafeConn::<TX> {
            inner: Arc::new(tokio::sync::Mutex::new(conn)),
        };

        if TX {
            let slot = parts.extensions.get::<TxSlot>().cloned();
            match slot {
                Some(slot) => {
                    if let Ok(mut slot) = slot.0.lock() {
                        *slot = Some(ThreadSafeConn {
                            inner: conn.inner.clone(),
                        });
                    }
                }
                None => {
                    tracing::warn!(
                        "transactional connection requested outside of `tx_commit`"
                    );
                }
            }
        }

        parts.extensions.insert(conn.clone());

        Ok(conn)
    }
}

/// A locked database connection for the duration of a handler. With
/// `TX = true` everything done through it belongs to one transaction, which
/// is committed or rolled back by [`tx_commit`].
pub struct Conn<const TX: bool> {
    inner: tokio::sync::OwnedMutexGuard<PooledConn>,
}

impl<const TX: bool> Deref for Conn<TX> {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<const TX: bool> DerefMut for Conn<TX> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

#[async_trait]
impl<S, const TX: bool> FromRequestParts<S> for Conn<TX>
where
    S: Send + Sync,
    DbPool: FromRef<S>,
{
    type Rejection = FailureResponse;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let conn = ThreadSafeConn::<TX>::from_request_parts(parts, state).await?;
        Ok(Conn {
            inner: conn.inner.lock_owned().await,
        })
    }
}
