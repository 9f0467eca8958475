use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::BAD_REQUEST, message: msg.into() }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::NOT_FOUND, message: msg.into() }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::CONFLICT, message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::INTERNAL_SERVER_ERROR, message: msg.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<netraven_dispatcher::DispatchError> for ApiError {
    fn from(e: netraven_dispatcher::DispatchError) -> Self {
        use netraven_dispatcher::DispatchError::*;
        match e {
            JobRunNotFound(_) | JobDefinitionNotFound(_) => ApiError::not_found(e.to_string()),
            NotPending(_) => ApiError::conflict(e.to_string()),
            NoCandidates => ApiError::bad_request(e.to_string()),
            Store(_) | Internal(_) => ApiError::internal(e.to_string()),
        }
    }
}

impl From<netraven_store::StoreError> for ApiError {
    fn from(e: netraven_store::StoreError) -> Self {
        use netraven_store::StoreError::*;
        match e {
            JobDefinitionNotFound(_) | JobRunNotFound(_) | DeviceNotFound(_) | CredentialNotFound(_) => {
                ApiError::not_found(e.to_string())
            }
            Overlapping(_) => ApiError::conflict(e.to_string()),
            Serialization(_) | Decrypt(_) | Internal(_) => ApiError::internal(e.to_string()),
        }
    }
}
