use actix_multipart::Multipart;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt;

use reef_core::Error;

use super::auth::Session;
use super::{respond_err, respond_ok, ApiError, IdBody};
use crate::manager::Manager;

/// Form field carrying the dataset blob.
const DATASET_FIELD: &str = "dataset";
/// Uploads beyond this size are rejected.
const MAX_DATASET_BYTES: usize = 256 * 1024 * 1024;

pub async fn list(
    _session: Session,
    manager: web::Data<Manager>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(manager.store.list_datasets()?))
}

/// `POST /api/datasets/upload`: multipart form with a `dataset` file field.
/// The file name becomes the dataset name.
pub async fn upload(
    _session: Session,
    manager: web::Data<Manager>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| Error::BadRequest(format!("malformed multipart body: {e}")))?
    {
        if field.name() != DATASET_FIELD {
            continue;
        }

        let name = field
            .content_disposition()
            .get_filename()
            .ok_or_else(|| Error::BadRequest("dataset field carries no file name".to_string()))?
            .to_string();

        let mut data = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| Error::BadRequest(format!("upload interrupted: {e}")))?
        {
            if data.len() + chunk.len() > MAX_DATASET_BYTES {
                return Err(ApiError(Error::BadRequest(format!(
                    "dataset exceeds the {MAX_DATASET_BYTES} byte limit"
                ))));
            }
            data.extend_from_slice(&chunk);
        }

        let id = manager.datasets.add(&name, &data)?;
        return Ok(HttpResponse::Ok().json(IdBody { id }));
    }

    Err(ApiError(Error::BadRequest(format!(
        "multipart body has no `{DATASET_FIELD}` file field"
    ))))
}

pub async fn delete(
    _session: Session,
    manager: web::Data<Manager>,
    body: web::Json<IdBody>,
) -> Result<HttpResponse, ApiError> {
    if manager.datasets.delete(&body.id)? {
        Ok(respond_ok("deleted dataset"))
    } else {
        Ok(respond_err(
            StatusCode::UNPROCESSABLE_ENTITY,
            "could not delete dataset",
            "dataset does not exist",
        ))
    }
}

/// `GET /api/dataset/{id}`: raw dataset bytes. Open to nodes, so outside
/// the session wall.
pub async fn load(
    manager: web::Data<Manager>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let data = manager
        .datasets
        .load(&id)?
        .ok_or_else(|| Error::NotFound(format!("dataset `{id}` does not exist")))?;

    Ok(HttpResponse::Ok()
        .content_type("application/octet-stream")
        .body(data))
}
