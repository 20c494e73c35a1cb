pub mod auth;
pub mod datasets;
pub mod jobs;
pub mod logs;
pub mod nodes;
pub mod templates;
pub mod updates;

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};

use reef_core::Error;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/auth", web::post().to(auth::authenticate))
        .route("/api/templates", web::get().to(templates::list))
        .route("/api/jobs", web::get().to(jobs::list))
        .route("/api/job/result/{job_id}", web::get().to(jobs::result))
        .route("/api/job/{job_id}", web::get().to(jobs::get))
        .route("/api/jobs/submit", web::post().to(jobs::submit))
        .route("/api/job/abort", web::delete().to(jobs::abort))
        .route("/api/nodes", web::get().to(nodes::list))
        .route("/api/node/connect", web::get().to(nodes::connect))
        .route("/api/datasets", web::get().to(datasets::list))
        .route("/api/datasets/upload", web::post().to(datasets::upload))
        .route("/api/datasets/delete", web::delete().to(datasets::delete))
        .route("/api/dataset/{id}", web::get().to(datasets::load))
        .route("/api/logs", web::get().to(logs::list))
        .route("/api/updates", web::get().to(updates::connect));
}

/// Body carrying just an id, both ways.
#[derive(Debug, Serialize, Deserialize)]
pub struct IdBody {
    pub id: String,
}

/// Uniform status envelope for non-data responses.
#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub success: bool,
    pub message: String,
    pub error: String,
}

pub fn respond_ok(message: &str) -> HttpResponse {
    HttpResponse::Ok().json(StatusBody {
        success: true,
        message: message.to_string(),
        error: String::new(),
    })
}

pub fn respond_err(status: StatusCode, message: &str, error: &str) -> HttpResponse {
    HttpResponse::build(status).json(StatusBody {
        success: false,
        message: message.to_string(),
        error: error.to_string(),
    })
}

/// Adapter mapping the core error taxonomy onto HTTP statuses.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::BadRequest(_) | Error::Protocol(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::Invariant(_) | Error::Io(_) | Error::Store(_) | Error::System(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();

        // Internal detail stays in the logs, not in the response body.
        let error = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("internal server error: {}", self.0);
            "backend error".to_string()
        } else {
            self.0.to_string()
        };

        respond_err(status, status_message(status), &error)
    }
}

fn status_message(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "bad request",
        StatusCode::UNAUTHORIZED => "unauthorized",
        StatusCode::FORBIDDEN => "forbidden",
        StatusCode::NOT_FOUND => "not found",
        _ => "internal server error",
    }
}
