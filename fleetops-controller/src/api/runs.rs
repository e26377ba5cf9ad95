//! Run API Handlers
//!
//! POST on the taskruns or pipelineruns collection starts a run.
//! `?wait=true` holds the request until the run finishes; running past the
//! wait timeout answers 504 while the run carries on.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use fleetops_core::domain::{DynObject, Kind, Resource};
use fleetops_core::dto::{CreatePipelineRun, CreateTaskRun};
use serde::Deserialize;
use serde_json::Value;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::api::objects::parse_kind;

#[derive(Debug, Default, Deserialize)]
pub struct RunQuery {
    #[serde(default)]
    pub wait: bool,
}

/// POST /api/v1/namespaces/{namespace}/{kind}
pub async fn create_run(
    State(state): State<AppState>,
    Path((namespace, kind)): Path<(String, String)>,
    Query(query): Query<RunQuery>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<DynObject>)> {
    match parse_kind(&kind)? {
        Kind::TaskRun => {
            let req: CreateTaskRun = serde_json::from_value(body)
                .map_err(|e| ApiError::BadRequest(format!("invalid request: {}", e)))?;
            tracing::info!("Starting TaskRun of {} in {}", req.task_ref, namespace);

            let mut run = state.runs.create_task_run(&namespace, req).await?;
            if query.wait {
                run = state.runs.wait_for_task_run(&run.key()).await?;
            }
            Ok((StatusCode::CREATED, Json(run.to_dyn()?)))
        }
        Kind::PipelineRun => {
            let req: CreatePipelineRun = serde_json::from_value(body)
                .map_err(|e| ApiError::BadRequest(format!("invalid request: {}", e)))?;
            tracing::info!("Starting PipelineRun of {} in {}", req.pipeline_ref, namespace);

            let mut run = state.runs.create_pipeline_run(&namespace, req).await?;
            if query.wait {
                run = state.runs.wait_for_pipeline_run(&run.key()).await?;
            }
            Ok((StatusCode::CREATED, Json(run.to_dyn()?)))
        }
        other => Err(ApiError::BadRequest(format!(
            "{} cannot be started, use PUT to store it",
            other.plural()
        ))),
    }
}
