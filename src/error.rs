use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::store::StoreError;

/// Every error a public or internal request can surface, mapped onto the
/// HTTP taxonomy: validation → 400, authentication → 401, not-found → 404,
/// conflict → 409, upgrade → 426, storage → 500.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("player id is required")]
    PlayerIdRequired,
    #[error("API key is required")]
    AuthRequired,
    #[error("API key must start with wt_")]
    InvalidKeyFormat,
    #[error("unknown API key")]
    InvalidKey,
    #[error("invalid internal secret")]
    InvalidInternalSecret,
    #[error("API key is empty or missing the wt_ prefix")]
    BadFormat,
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("request body is not valid JSON")]
    BadJson,
    #[error("room not found")]
    RoomNotFound,
    #[error("save not found")]
    SaveNotFound,
    #[error("room already exists")]
    RoomAlreadyExists,
    #[error("websocket upgrade required")]
    UpgradeRequired,
    #[error("storage failure")]
    Storage(#[from] StoreError),
    #[error("internal error")]
    Internal,
}

impl From<crate::room::RoomError> for ApiError {
    fn from(err: crate::room::RoomError) -> Self {
        match err {
            crate::room::RoomError::NotFound => Self::RoomNotFound,
            crate::room::RoomError::AlreadyExists => Self::RoomAlreadyExists,
            crate::room::RoomError::Unavailable => Self::Internal,
        }
    }
}

impl ApiError {
    /// Stable machine-readable code returned in the `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PlayerIdRequired => "PlayerIdRequired",
            Self::AuthRequired => "AuthRequired",
            Self::InvalidKeyFormat => "InvalidKeyFormat",
            Self::InvalidKey => "InvalidKey",
            Self::InvalidInternalSecret => "InvalidInternalSecret",
            Self::BadFormat => "BadFormat",
            Self::MissingField(_) => "MissingField",
            Self::BadJson => "BadJSON",
            Self::RoomNotFound => "RoomNotFound",
            Self::SaveNotFound => "SaveNotFound",
            Self::RoomAlreadyExists => "RoomAlreadyExists",
            Self::UpgradeRequired => "UpgradeRequired",
            Self::Storage(_) | Self::Internal => "Internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::PlayerIdRequired
            | Self::BadFormat
            | Self::MissingField(_)
            | Self::BadJson => StatusCode::BAD_REQUEST,
            Self::AuthRequired
            | Self::InvalidKeyFormat
            | Self::InvalidKey
            | Self::InvalidInternalSecret => StatusCode::UNAUTHORIZED,
            Self::RoomNotFound | Self::SaveNotFound => StatusCode::NOT_FOUND,
            Self::RoomAlreadyExists => StatusCode::CONFLICT,
            Self::UpgradeRequired => StatusCode::UPGRADE_REQUIRED,
            Self::Storage(_) | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Storage(err) = &self {
            tracing::error!(error = %err, "storage failure");
        }
        let body = serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}
