use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::{self, Stream};
use netraven_dispatcher::SchedulerCommand;
use netraven_domain::{DeviceId, JobDefinitionId, JobRunId};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn ready(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.store.list_active_job_definitions().await?;
    Ok(StatusCode::OK)
}

// ── Job definitions (read-only; CRUD belongs to the REST surface this
// crate does not implement — spec §1 "Out of scope") ─────────────────────────

pub async fn list_job_definitions(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let defs = state.store.list_active_job_definitions().await?;
    Ok(Json(json!(defs)))
}

pub async fn get_job_definition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let def = state
        .store
        .get_job_definition(JobDefinitionId::from_uuid(id))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job definition '{id}' not found")))?;
    Ok(Json(json!(def)))
}

// ── Handler registry metadata (spec §4.C: "so the UI can render forms
// dynamically") ───────────────────────────────────────────────────────────────

pub async fn list_handlers(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.handler_registry.metadata()))
}

// ── Job runs ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TriggerBody {
    pub job_definition_id: Uuid,
    /// Restricts the run to this device subset (the "retry-failed" shape);
    /// omitted or empty means resolve the full target set.
    #[serde(default)]
    pub device_ids: Vec<Uuid>,
}

pub async fn trigger_job_run(
    State(state): State<AppState>,
    Json(body): Json<TriggerBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let def_id = JobDefinitionId::from_uuid(body.job_definition_id);
    state
        .store
        .get_job_definition(def_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job definition '{}' not found", body.job_definition_id)))?;

    let subset = if body.device_ids.is_empty() {
        None
    } else {
        Some(body.device_ids.into_iter().map(DeviceId::from_uuid).collect())
    };

    let run = state.store.create_job_run(def_id, subset).await?;

    let dispatcher = state.dispatcher.clone();
    let run_id = run.id;
    tokio::spawn(async move {
        if let Err(e) = dispatcher.dispatch(run_id).await {
            tracing::error!(job_run_id = %run_id, error = %e, "manually triggered dispatch failed");
        }
    });

    Ok((StatusCode::CREATED, Json(json!(run))))
}

pub async fn get_job_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let run = state
        .store
        .get_job_run(JobRunId::from_uuid(id))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job run '{id}' not found")))?;
    Ok(Json(json!(run)))
}

pub async fn list_in_flight_job_runs(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let runs = state.store.list_pending_or_running_job_runs().await?;
    Ok(Json(json!(runs)))
}

pub async fn list_device_results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let results = state.store.list_device_results(JobRunId::from_uuid(id)).await?;
    Ok(Json(json!(results)))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub device_id: Option<Uuid>,
}

pub async fn list_job_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<LogsQuery>,
) -> Result<Json<Value>, ApiError> {
    let entries = state
        .store
        .list_job_logs(JobRunId::from_uuid(id), q.device_id.map(DeviceId::from_uuid))
        .await?;
    Ok(Json(json!(entries)))
}

/// Live log stream (spec §6 "Log stream", §9 "live log stream
/// multiplexing"): a thin SSE wrapper around the shared `LogHub`, filtered
/// to this job run. Best-effort — a client that falls behind the hub's
/// broadcast buffer silently misses messages; it can always fall back to
/// [`list_job_logs`] for the durable row set.
pub async fn stream_job_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let job_run_id = JobRunId::from_uuid(id);
    let rx = state.log_hub.subscribe();

    let events = stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(entry) if entry.job_run_id == job_run_id => {
                    let event = Event::default().json_data(&entry).unwrap_or_else(|_| Event::default());
                    return Some((Ok(event), rx));
                }
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

pub async fn cancel_job_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let run_id = JobRunId::from_uuid(id);
    state
        .store
        .get_job_run(run_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job run '{id}' not found")))?;

    state
        .scheduler_commands
        .send(SchedulerCommand::Cancel(run_id))
        .await
        .map_err(|e| ApiError::internal(format!("scheduler command channel closed: {e}")))?;

    Ok(StatusCode::ACCEPTED)
}

/// Retry-failed (spec §4.D): a new job run restricted to the FAILED
/// devices of a terminal run.
pub async fn retry_failed(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let run_id = JobRunId::from_uuid(id);
    let run = state
        .store
        .get_job_run(run_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job run '{id}' not found")))?;

    if !run.status.is_terminal() {
        return Err(ApiError::conflict(format!("job run '{id}' has not reached a terminal state yet")));
    }

    let results = state.store.list_device_results(run_id).await?;
    let failed: Vec<DeviceId> = results
        .into_iter()
        .filter(|r| r.status == netraven_domain::DeviceResultStatus::Failed)
        .map(|r| r.device_id)
        .collect();

    if failed.is_empty() {
        return Err(ApiError::bad_request(format!("job run '{id}' has no failed devices to retry")));
    }

    let new_run = state.store.create_job_run(run.job_definition_id, Some(failed)).await?;

    let dispatcher = state.dispatcher.clone();
    let new_run_id = new_run.id;
    tokio::spawn(async move {
        if let Err(e) = dispatcher.dispatch(new_run_id).await {
            tracing::error!(job_run_id = %new_run_id, error = %e, "retry-failed dispatch failed");
        }
    });

    Ok((StatusCode::CREATED, Json(json!(new_run))))
}

// ── Status ────────────────────────────────────────────────────────────────────

pub async fn status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let defs = state.store.list_active_job_definitions().await?;
    let in_flight = state.store.list_pending_or_running_job_runs().await?;

    Ok(Json(json!({
        "active_job_definitions": defs.len(),
        "in_flight_job_runs": in_flight.len(),
        "handlers": state.handler_registry.metadata(),
    })))
}
