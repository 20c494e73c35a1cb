use actix_web::{web, HttpResponse};
use serde::Deserialize;

use super::auth::Session;
use super::ApiError;
use crate::manager::Manager;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub amount: u32,
    pub jobid: String,
}

/// `GET /api/logs?amount=N&jobid=ID`: the N most recent persisted log rows
/// for a job, oldest first.
pub async fn list(
    _session: Session,
    manager: web::Data<Manager>,
    query: web::Query<LogsQuery>,
) -> Result<HttpResponse, ApiError> {
    let logs = manager.store.last_logs(query.amount, &query.jobid)?;
    Ok(HttpResponse::Ok().json(logs))
}
