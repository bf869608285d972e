use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use heraut_federation::FederationError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Federation(#[from] FederationError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Federation(e) => match e {
                FederationError::InvalidItem(_) => StatusCode::BAD_REQUEST,
                FederationError::ItemNotFound(_) => StatusCode::NOT_FOUND,
                FederationError::ItemAlreadyExists(_) => StatusCode::CONFLICT,
                FederationError::ActorUnresolvable { .. } | FederationError::Transport(_) => {
                    StatusCode::BAD_GATEWAY
                }
                FederationError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                FederationError::UnknownType(_)
                | FederationError::Registry(_)
                | FederationError::Store(_)
                | FederationError::LockPoisoned => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
