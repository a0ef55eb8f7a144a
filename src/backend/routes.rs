//! HTTP surface presenting this cluster as a Terraform-Cloud-compatible remote backend.
//! Response bodies are hand-built JSON:API documents; there is no JSON:API crate in the corpus to
//! reach for, so the `{"data": {"type", "id", "attributes"}}` envelope is assembled directly.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use k8s_openapi::api::coordination::v1::Lease;
use kube::Api;
use serde_json::{Value, json};

use crate::backend::context::BackendContext;
use crate::backend::{lock, store};
use crate::error::BackendError;
use crate::labels;

const JSONAPI_MEDIA_TYPE: &str = "application/vnd.api+json";
const LOCK_HOLDER: &str = "fake-tfe";

pub fn router(context: BackendContext) -> Router {
    Router::new()
        .route("/api/v2/ping", get(ping))
        .route("/.well-known/terraform.json", get(discovery))
        .route("/api/v2/organizations/:org/entitlement-set", get(entitlement_set))
        .route("/api/v2/organizations/:org/workspaces/:workspace", get(show_workspace))
        .route("/api/v2/workspaces/:workspace/current-state-version", get(current_state_version))
        .route("/api/v2/download/:workspace/state", get(download_state))
        .route("/api/v2/workspaces/:workspace/state-versions", post(create_state_version))
        .route("/api/v2/workspaces/:workspace/actions/lock", post(lock_workspace))
        .route("/api/v2/workspaces/:workspace/actions/unlock", post(unlock_workspace))
        .with_state(context)
}

async fn ping() -> &'static str {
    "pong"
}

async fn discovery() -> impl IntoResponse {
    axum::Json(json!({
        "modules.v1": "/api/v2/",
        "state.v2": "/api/v2/",
        "tfe.v2": "/api/v2/",
        "tfe.v2.1": "/api/v2/",
        "tfe.v2.2": "/api/v2/",
    }))
}

async fn entitlement_set(Path(org): Path<String>) -> impl IntoResponse {
    jsonapi_response(json!({
        "data": {
            "type": "entitlement-sets",
            "id": org,
            "attributes": { "operations": true },
        }
    }))
}

async fn show_workspace(
    State(context): State<BackendContext>,
    Path((_, workspace)): Path<(String, String)>,
) -> Result<Response, BackendApiError> {
    workspace_payload(&context, &workspace).await.map(jsonapi_response)
}

async fn current_state_version(
    State(_context): State<BackendContext>,
    Path(workspace): Path<String>,
) -> impl IntoResponse {
    jsonapi_response(state_version_payload(&workspace, None))
}

async fn download_state(
    State(context): State<BackendContext>,
    Path(workspace): Path<String>,
) -> Result<Response, BackendApiError> {
    let raw = store::get_state(&context.client, &context.namespace, &workspace).await?;
    let body = raw.unwrap_or_default();
    Ok((StatusCode::OK, body).into_response())
}

async fn create_state_version(
    State(context): State<BackendContext>,
    Path(workspace): Path<String>,
    body: axum::body::Bytes,
) -> Result<Response, BackendApiError> {
    let payload: Value = serde_json::from_slice(&body).map_err(BackendError::from)?;
    let attributes = payload
        .get("data")
        .and_then(|d| d.get("attributes"))
        .ok_or_else(|| BackendError::WorkspaceNotFound(workspace.clone()))?;

    let encoded = attributes
        .get("state")
        .and_then(Value::as_str)
        .ok_or_else(|| BackendError::StateNotFound(workspace.clone()))?;
    let serial = attributes.get("serial").and_then(Value::as_i64);

    let decoded = {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(BackendError::from)?
    };

    store::put_state(&context.client, &context.namespace, &workspace, &decoded).await?;

    Ok(jsonapi_response(state_version_payload(&workspace, serial)))
}

async fn lock_workspace(
    State(context): State<BackendContext>,
    Path((_, workspace)): Path<(String, String)>,
) -> Result<Response, BackendApiError> {
    lock::lock(&context.client, &context.namespace, &workspace, LOCK_HOLDER).await?;
    workspace_payload(&context, &workspace).await.map(jsonapi_response)
}

async fn unlock_workspace(
    State(context): State<BackendContext>,
    Path((_, workspace)): Path<(String, String)>,
) -> Result<Response, BackendApiError> {
    lock::unlock(&context.client, &context.namespace, &workspace).await?;
    workspace_payload(&context, &workspace).await.map(jsonapi_response)
}

async fn workspace_payload(context: &BackendContext, workspace: &str) -> Result<Value, BackendApiError> {
    let leases_api = Api::<Lease>::namespaced(context.client.clone(), &context.namespace);
    let lease_name = labels::lock_name(&context.namespace, workspace);
    let locked = leases_api
        .get_opt(&lease_name)
        .await
        .map_err(BackendError::from)?
        .and_then(|l| l.spec.and_then(|s| s.holder_identity))
        .is_some_and(|holder| !holder.is_empty());

    Ok(json!({
        "data": {
            "type": "workspaces",
            "id": workspace,
            "attributes": {
                "name": workspace,
                "locked": locked,
            },
        }
    }))
}

fn state_version_payload(workspace: &str, serial: Option<i64>) -> Value {
    json!({
        "data": {
            "type": "state-versions",
            "id": workspace,
            "attributes": {
                "serial": serial,
                "hosted-state-download-url": format!("/api/v2/download/{workspace}/state"),
            }
        }
    })
}

fn jsonapi_response(body: Value) -> Response {
    let mut response = axum::Json(body).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, JSONAPI_MEDIA_TYPE.parse().unwrap());
    response
}

struct BackendApiError(BackendError);

impl From<BackendError> for BackendApiError {
    fn from(value: BackendError) -> Self {
        Self(value)
    }
}

impl IntoResponse for BackendApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BackendError::WorkspaceNotFound(_) | BackendError::StateNotFound(_) => StatusCode::NOT_FOUND,
            BackendError::Base64(_) | BackendError::Json(_) => StatusCode::BAD_REQUEST,
            BackendError::KubeError(_) | BackendError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_version_payload_points_at_download_route() {
        // Given / When
        let payload = state_version_payload("network", Some(3));

        // Then
        assert_eq!(
            payload["data"]["attributes"]["hosted-state-download-url"],
            "/api/v2/download/network/state"
        );
        assert_eq!(payload["data"]["attributes"]["serial"], 3);
    }
}
