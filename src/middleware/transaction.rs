//! Per-request database transaction
//!
//! The transaction is opened before authentication and shared with the
//! handler through request extensions. A 2xx or 3xx response commits it;
//! anything else rolls it back.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use sqlx::{Sqlite, SqliteConnection, Transaction};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::warn;

use crate::utils::{AppError, AppResult};
use crate::AppState;

/// Handle on the request's transaction
#[derive(Clone)]
pub struct RequestTx(Arc<Mutex<Option<Transaction<'static, Sqlite>>>>);

impl RequestTx {
    pub fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self(Arc::new(Mutex::new(Some(tx))))
    }

    /// Borrow the connection; fails once the transaction is closed
    pub async fn conn(&self) -> AppResult<MappedMutexGuard<'_, SqliteConnection>> {
        let guard = self.0.lock().await;
        MutexGuard::try_map(guard, |slot| slot.as_deref_mut())
            .map_err(|_| AppError::Internal("request transaction already closed".to_string()))
    }

    /// Commit; a transaction that is already closed is left alone
    pub async fn commit(&self) -> Result<(), sqlx::Error> {
        let tx = self.0.lock().await.take();
        match tx {
            Some(tx) => tx.commit().await,
            None => Ok(()),
        }
    }

    /// Roll back; a transaction that is already closed is left alone
    pub async fn rollback(&self) -> Result<(), sqlx::Error> {
        let tx = self.0.lock().await.take();
        match tx {
            Some(tx) => tx.rollback().await,
            None => Ok(()),
        }
    }
}

impl<S> FromRequestParts<S> for RequestTx
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestTx>()
            .cloned()
            .ok_or_else(|| AppError::Internal("no request transaction".to_string()))
    }
}

pub async fn transaction_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let tx = RequestTx::new(state.db.begin().await?);
    request.extensions_mut().insert(tx.clone());

    let response = next.run(request).await;
    let status = response.status();

    if status.is_success() || status.is_redirection() {
        tx.commit().await?;
    } else if let Err(e) = tx.rollback().await {
        warn!(error = %e, status = %status, "Failed to roll back request transaction");
    }

    Ok(response)
}
