//! Remote share endpoint client.
//!
//! [`ShareTransport`] is the seam between the sync machinery and the
//! network; [`HttpShareClient`] implements it against the share HTTP API:
//!
//! | Call                            | Body                 | Response            |
//! |---------------------------------|----------------------|---------------------|
//! | `POST /api/share`               | `{sessionID}`        | `{id, secret, url}` |
//! | `POST /api/share/{id}/sync`     | `{secret, data}`     | `{}`                |
//! | `DELETE /api/share/{id}`        | `{secret}`           | `{}`                |
//! | `GET /api/share/{id}/data`      | none                 | `Data[]`            |

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::data::Data;
use super::record::ShareRecord;
use crate::{AppError, Result};

/// Boxed future returned by [`ShareTransport`] methods.
pub type ShareFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Operations against the remote share service.
pub trait ShareTransport: Send + Sync {
    /// Create a share for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Share`] on transport or HTTP failure.
    fn create(&self, session_id: &str) -> ShareFuture<'_, ShareRecord>;

    /// Push a batch of items to `share`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Share`] on transport or HTTP failure.
    fn sync(&self, share: &ShareRecord, data: Vec<Data>) -> ShareFuture<'_, ()>;

    /// Delete `share` remotely.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Share`] on transport or HTTP failure.
    fn remove(&self, share: &ShareRecord) -> ShareFuture<'_, ()>;

    /// Fetch the remote state of share `share_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Share`] on transport or HTTP failure.
    fn fetch(&self, share_id: &str) -> ShareFuture<'_, Vec<Data>>;
}

#[derive(Serialize)]
struct CreateBody<'a> {
    #[serde(rename = "sessionID")]
    session_id: &'a str,
}

#[derive(Serialize)]
struct SyncBody<'a> {
    secret: &'a str,
    data: &'a [Data],
}

#[derive(Serialize)]
struct SecretBody<'a> {
    secret: &'a str,
}

/// `reqwest`-backed share client.
#[derive(Debug, Clone)]
pub struct HttpShareClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpShareClient {
    /// Client for the service at `base_url` (for example `https://opncd.ai`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Share` if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Share(format!("failed to build http client: {err}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/share{path}", self.base_url)
    }
}

fn http_error(action: &str, err: &reqwest::Error) -> AppError {
    match err.status() {
        Some(status) => AppError::Share(format!("{action} failed with status {status}")),
        None => AppError::Share(format!("{action} failed: {err}")),
    }
}

impl ShareTransport for HttpShareClient {
    fn create(&self, session_id: &str) -> ShareFuture<'_, ShareRecord> {
        let session_id = session_id.to_owned();
        Box::pin(async move {
            let record = self
                .http
                .post(self.endpoint(""))
                .json(&CreateBody {
                    session_id: &session_id,
                })
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| http_error("create share", &e))?
                .json::<ShareRecord>()
                .await
                .map_err(|e| AppError::Share(format!("invalid create response: {e}")))?;
            debug!(session_id, share_id = record.id, "share created remotely");
            Ok(record)
        })
    }

    fn sync(&self, share: &ShareRecord, data: Vec<Data>) -> ShareFuture<'_, ()> {
        let share = share.clone();
        Box::pin(async move {
            self.http
                .post(self.endpoint(&format!("/{}/sync", share.id)))
                .json(&SyncBody {
                    secret: &share.secret,
                    data: &data,
                })
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| http_error("sync", &e))?;
            Ok(())
        })
    }

    fn remove(&self, share: &ShareRecord) -> ShareFuture<'_, ()> {
        let share = share.clone();
        Box::pin(async move {
            self.http
                .delete(self.endpoint(&format!("/{}", share.id)))
                .json(&SecretBody {
                    secret: &share.secret,
                })
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| http_error("remove share", &e))?;
            Ok(())
        })
    }

    fn fetch(&self, share_id: &str) -> ShareFuture<'_, Vec<Data>> {
        let share_id = share_id.to_owned();
        Box::pin(async move {
            self.http
                .get(self.endpoint(&format!("/{share_id}/data")))
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| http_error("fetch share", &e))?
                .json::<Vec<Data>>()
                .await
                .map_err(|e| AppError::Share(format!("invalid share data: {e}")))
        })
    }
}
