use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};

use reef_core::Error;

use super::auth::Session;
use super::{respond_err, respond_ok, ApiError, IdBody};
use crate::jobs::{JobSubmission, SubmitOutcome};
use crate::manager::Manager;

pub async fn list(
    _session: Session,
    manager: web::Data<Manager>,
) -> Result<HttpResponse, ApiError> {
    let jobs = manager.list_api_jobs().await?;
    Ok(HttpResponse::Ok().json(jobs))
}

pub async fn get(
    _session: Session,
    manager: web::Data<Manager>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let job_id = path.into_inner();
    let job = manager
        .get_api_job(&job_id, true)
        .await?
        .ok_or_else(|| Error::NotFound(format!("job `{job_id}` does not exist")))?;
    Ok(HttpResponse::Ok().json(job))
}

pub async fn result(
    _session: Session,
    manager: web::Data<Manager>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let job_id = path.into_inner();
    match manager.store.get_result(&job_id)? {
        Some(result) => Ok(HttpResponse::Ok().json(result)),
        None => Ok(respond_err(
            StatusCode::UNPROCESSABLE_ENTITY,
            "could not get result",
            "result does not exist yet",
        )),
    }
}

pub async fn submit(
    session: Session,
    manager: web::Data<Manager>,
    body: web::Json<JobSubmission>,
) -> Result<HttpResponse, ApiError> {
    match manager.submit_job(body.into_inner(), &session.id).await? {
        SubmitOutcome::Submitted(id) => Ok(HttpResponse::Ok().json(IdBody { id })),
        SubmitOutcome::CompileError(text) => Ok(respond_err(
            StatusCode::UNPROCESSABLE_ENTITY,
            "compilation error",
            &text,
        )),
    }
}

/// Aborting requires ownership; admins bypass that check.
pub async fn abort(
    session: Session,
    manager: web::Data<Manager>,
    body: web::Json<IdBody>,
) -> Result<HttpResponse, ApiError> {
    let job_id = body.into_inner().id;

    let job = manager
        .store
        .get_job(&job_id)?
        .ok_or_else(|| Error::NotFound(format!("job `{job_id}` does not exist")))?;
    if !session.is_admin && job.job.owner != session.id {
        return Err(ApiError(Error::Forbidden));
    }

    if manager.abort_job(&job_id).await? {
        Ok(respond_ok("aborted job"))
    } else {
        Ok(respond_err(
            StatusCode::UNPROCESSABLE_ENTITY,
            "could not abort job",
            "job does not exist or already finished",
        ))
    }
}
