//! Object API Handlers
//!
//! Apply, read, list and delete objects of any kind. Bodies are validated by
//! decoding them into the typed resource before they are stored.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use fleetops_core::domain::pipeline::Pipeline;
use fleetops_core::domain::pipelinerun::PipelineRun;
use fleetops_core::domain::target::{Cluster, Host};
use fleetops_core::domain::task::Task;
use fleetops_core::domain::taskrun::TaskRun;
use fleetops_core::domain::{DynObject, Kind, NamespacedName, ObjectMeta, Resource};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::store::ListFilter;

/// Body of a PUT
#[derive(Debug, Deserialize)]
pub struct ApplyObject {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub spec: Value,
}

pub fn parse_kind(plural: &str) -> ApiResult<Kind> {
    Kind::from_plural(plural).ok_or_else(|| ApiError::BadRequest(format!("unknown kind {}", plural)))
}

/// Rejects objects whose spec does not decode into their kind
///
/// Pipelines are also checked for incomplete or repeated task slots.
pub fn validate_shape(obj: &DynObject) -> ApiResult<()> {
    let obj = obj.clone();
    let result = match obj.kind {
        Kind::Task => Task::from_dyn(obj).map(drop),
        Kind::TaskRun => TaskRun::from_dyn(obj).map(drop),
        Kind::Pipeline => {
            let pipeline = Pipeline::from_dyn(obj)
                .map_err(|e| ApiError::BadRequest(format!("invalid object: {}", e)))?;
            return pipeline
                .spec
                .validate()
                .map_err(|e| ApiError::BadRequest(format!("invalid pipeline: {}", e)));
        }
        Kind::PipelineRun => PipelineRun::from_dyn(obj).map(drop),
        Kind::Host => Host::from_dyn(obj).map(drop),
        Kind::Cluster => Cluster::from_dyn(obj).map(drop),
    };
    result.map_err(|e| ApiError::BadRequest(format!("invalid object: {}", e)))
}

/// GET /api/v1/namespaces/{namespace}/{kind}
pub async fn list_objects(
    State(state): State<AppState>,
    Path((namespace, kind)): Path<(String, String)>,
) -> ApiResult<Json<Vec<DynObject>>> {
    let kind = parse_kind(&kind)?;
    tracing::debug!("Listing {} in {}", kind, namespace);

    let objects = state
        .store
        .list(kind, &ListFilter::namespace(namespace))
        .await?;
    Ok(Json(objects))
}

/// GET /api/v1/namespaces/{namespace}/{kind}/{name}
pub async fn get_object(
    State(state): State<AppState>,
    Path((namespace, kind, name)): Path<(String, String, String)>,
) -> ApiResult<Json<DynObject>> {
    let kind = parse_kind(&kind)?;
    let obj = state
        .store
        .get(kind, &NamespacedName::new(namespace, name))
        .await?;
    Ok(Json(obj))
}

/// PUT /api/v1/namespaces/{namespace}/{kind}/{name}
/// Create or replace the spec of an object
pub async fn apply_object(
    State(state): State<AppState>,
    Path((namespace, kind, name)): Path<(String, String, String)>,
    Json(req): Json<ApplyObject>,
) -> ApiResult<(StatusCode, Json<DynObject>)> {
    let kind = parse_kind(&kind)?;
    let key = NamespacedName::new(&namespace, &name);

    let mut metadata = ObjectMeta::new(namespace, name);
    metadata.labels = req.labels;
    let mut obj = DynObject {
        kind,
        metadata,
        spec: req.spec,
        status: Value::Null,
    };
    validate_shape(&obj)?;

    match state.store.get(kind, &key).await {
        Ok(existing) => {
            tracing::info!("Updating {} {}", kind, key);
            obj.metadata.owner = existing.metadata.owner;
            obj.metadata.resource_version = existing.metadata.resource_version;
            let updated = state.store.update(obj).await?;
            Ok((StatusCode::OK, Json(updated)))
        }
        Err(e) if e.is_not_found() => {
            tracing::info!("Creating {} {}", kind, key);
            let created = state.store.create(obj).await?;
            Ok((StatusCode::CREATED, Json(created)))
        }
        Err(e) => Err(e.into()),
    }
}

/// DELETE /api/v1/namespaces/{namespace}/{kind}/{name}
pub async fn delete_object(
    State(state): State<AppState>,
    Path((namespace, kind, name)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let kind = parse_kind(&kind)?;
    let key = NamespacedName::new(namespace, name);
    tracing::info!("Deleting {} {}", kind, key);

    state.store.delete(kind, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(kind: Kind, spec: Value) -> DynObject {
        DynObject {
            kind,
            metadata: ObjectMeta::new("default", "x"),
            spec,
            status: Value::Null,
        }
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("tasks").unwrap(), Kind::Task);
        assert!(parse_kind("widgets").is_err());
    }

    #[test]
    fn test_validate_shape() {
        let task = object(
            Kind::Task,
            json!({"typeRef": "host", "nameRef": "web-1", "steps": [{"name": "s", "content": "uptime"}]}),
        );
        assert!(validate_shape(&task).is_ok());

        let bad_step = object(Kind::Task, json!({"steps": [{"name": "s"}]}));
        assert!(validate_shape(&bad_step).is_err());

        let bad_host = object(Kind::Host, json!({"port": "twenty-two"}));
        assert!(validate_shape(&bad_host).is_err());
    }

    #[test]
    fn test_validate_shape_rejects_repeated_pipeline_slot() {
        let repeated = object(
            Kind::Pipeline,
            json!({"tasks": [
                {"name": "deploy", "taskRef": "a"},
                {"name": "deploy", "taskRef": "a"}
            ]}),
        );
        assert!(matches!(validate_shape(&repeated), Err(ApiError::BadRequest(_))));

        let distinct = object(
            Kind::Pipeline,
            json!({"tasks": [
                {"name": "deploy", "taskRef": "a"},
                {"name": "deploy", "taskRef": "b"}
            ]}),
        );
        assert!(validate_shape(&distinct).is_ok());
    }
}
