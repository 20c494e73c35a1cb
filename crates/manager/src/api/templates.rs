use actix_web::{web, HttpResponse};

use super::auth::Session;
use super::ApiError;
use crate::manager::Manager;

pub async fn list(
    _session: Session,
    manager: web::Data<Manager>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(&manager.templates))
}
