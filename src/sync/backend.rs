//! Remote session backend client.
//!
//! All operations are idempotent from the queue's perspective: the server
//! keys creates on the client-generated session UUID and updates on
//! server-assigned ids, so redelivery after an ambiguous failure is safe.

use crate::session::types::{SessionStatus, WeightUnit};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// HTTP request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from remote backend calls.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The addressed entity does not exist remotely (already deleted)
    #[error("Entity not found on server")]
    NotFound,

    /// Server rejected the request
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Transport-level failure (offline, timeout, DNS)
    #[error("Network error: {0}")]
    Network(String),

    /// Response body could not be decoded
    #[error("Response decode error: {0}")]
    Decode(String),
}

/// Payload for creating a session remotely.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionRequest {
    pub user_id: i64,
    pub client_uuid: String,
    pub routine_id: i64,
    pub routine_name: String,
    pub date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub exercises: Vec<CreateSessionExercise>,
}

/// One exercise in a session-create payload.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionExercise {
    pub exercise_id: i64,
    pub name: String,
    pub order: u32,
    pub sets: Vec<CreateSessionSet>,
}

/// One planned set in a session-create payload.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionSet {
    pub set_number: u32,
    pub target_reps: u32,
    pub unit: WeightUnit,
}

/// Server-assigned ids returned from session creation, used to reconcile
/// the local record.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSessionIds {
    pub session_id: i64,
    pub exercises: Vec<RemoteExerciseIds>,
}

/// Server-assigned ids for one exercise.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteExerciseIds {
    pub order: u32,
    pub exercise_id: i64,
    pub sets: Vec<RemoteSetIds>,
}

/// Server-assigned id for one set.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSetIds {
    pub set_number: u32,
    pub set_id: i64,
}

/// Partial update for a logged set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SetUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// The remote session API seam.
pub trait RemoteBackend: Send + Sync {
    /// Create a session with its exercises and planned sets; returns the
    /// server-assigned id mapping.
    fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> impl Future<Output = Result<RemoteSessionIds, BackendError>> + Send;

    /// Update a logged set.
    fn update_set(
        &self,
        remote_set_id: i64,
        update: &SetUpdate,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Append an extra set to an exercise; returns the new remote set id.
    fn add_set(
        &self,
        remote_exercise_id: i64,
        set_number: u32,
        unit: WeightUnit,
    ) -> impl Future<Output = Result<i64, BackendError>> + Send;

    /// Write a personal note on an exercise, addressed by display order.
    fn update_exercise_note(
        &self,
        remote_session_id: i64,
        exercise_order: u32,
        note: &str,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Finalize a session as completed or abandoned.
    fn finalize_session(
        &self,
        remote_session_id: i64,
        ended_at: DateTime<Utc>,
        status: SessionStatus,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;
}

impl<T: RemoteBackend> RemoteBackend for std::sync::Arc<T> {
    fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> impl Future<Output = Result<RemoteSessionIds, BackendError>> + Send {
        (**self).create_session(request)
    }

    fn update_set(
        &self,
        remote_set_id: i64,
        update: &SetUpdate,
    ) -> impl Future<Output = Result<(), BackendError>> + Send {
        (**self).update_set(remote_set_id, update)
    }

    fn add_set(
        &self,
        remote_exercise_id: i64,
        set_number: u32,
        unit: WeightUnit,
    ) -> impl Future<Output = Result<i64, BackendError>> + Send {
        (**self).add_set(remote_exercise_id, set_number, unit)
    }

    fn update_exercise_note(
        &self,
        remote_session_id: i64,
        exercise_order: u32,
        note: &str,
    ) -> impl Future<Output = Result<(), BackendError>> + Send {
        (**self).update_exercise_note(remote_session_id, exercise_order, note)
    }

    fn finalize_session(
        &self,
        remote_session_id: i64,
        ended_at: DateTime<Utc>,
        status: SessionStatus,
    ) -> impl Future<Output = Result<(), BackendError>> + Send {
        (**self).finalize_session(remote_session_id, ended_at, status)
    }
}

/// reqwest-based implementation of the session API.
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct AddSetRequest {
    set_number: u32,
    unit: WeightUnit,
}

#[derive(Deserialize)]
struct AddSetResponse {
    set_id: i64,
}

#[derive(Serialize)]
struct NoteRequest<'a> {
    exercise_order: u32,
    note: &'a str,
}

#[derive(Serialize)]
struct FinalizeRequest {
    ended_at: DateTime<Utc>,
    status: SessionStatus,
}

impl HttpBackend {
    /// Create a new backend client.
    pub fn new(base_url: String, api_key: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url,
            api_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: Serialize>(
        &self,
        builder: reqwest::RequestBuilder,
        body: &T,
    ) -> Result<reqwest::Response, BackendError> {
        let response = builder
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status.as_u16() == 404 {
            return Err(BackendError::NotFound);
        }

        let message = response.text().await.unwrap_or_default();
        Err(BackendError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

impl RemoteBackend for HttpBackend {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<RemoteSessionIds, BackendError> {
        let response = self
            .send(self.http.post(self.url("/sessions")), request)
            .await?;
        response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn update_set(
        &self,
        remote_set_id: i64,
        update: &SetUpdate,
    ) -> Result<(), BackendError> {
        self.send(
            self.http
                .patch(self.url(&format!("/sets/{remote_set_id}"))),
            update,
        )
        .await?;
        Ok(())
    }

    async fn add_set(
        &self,
        remote_exercise_id: i64,
        set_number: u32,
        unit: WeightUnit,
    ) -> Result<i64, BackendError> {
        let response = self
            .send(
                self.http
                    .post(self.url(&format!("/exercises/{remote_exercise_id}/sets"))),
                &AddSetRequest { set_number, unit },
            )
            .await?;
        let body: AddSetResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(body.set_id)
    }

    async fn update_exercise_note(
        &self,
        remote_session_id: i64,
        exercise_order: u32,
        note: &str,
    ) -> Result<(), BackendError> {
        self.send(
            self.http
                .patch(self.url(&format!("/sessions/{remote_session_id}/note"))),
            &NoteRequest {
                exercise_order,
                note,
            },
        )
        .await?;
        Ok(())
    }

    async fn finalize_session(
        &self,
        remote_session_id: i64,
        ended_at: DateTime<Utc>,
        status: SessionStatus,
    ) -> Result<(), BackendError> {
        self.send(
            self.http
                .post(self.url(&format!("/sessions/{remote_session_id}/finalize"))),
            &FinalizeRequest { ended_at, status },
        )
        .await?;
        Ok(())
    }
}
