use std::future::{ready, Ready};

use actix_web::cookie::{Cookie, SameSite};
use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest, HttpResponse};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;
use uuid::Uuid;

use reef_core::Error;

use super::ApiError;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "reef_session";

/// Issues and verifies signed session cookies. The cookie value is
/// `id.admin.mac` with an HMAC-SHA256 over the first two parts, so a client
/// cannot forge a session or flip its admin bit.
pub struct AuthService {
    admin_token: String,
    secret: String,
}

/// The caller's identity, recovered from the session cookie.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub is_admin: bool,
}

impl AuthService {
    pub fn new(admin_token: String, secret: String) -> Self {
        Self { admin_token, secret }
    }

    /// Constant-time comparison against the configured admin token.
    pub fn token_grants_admin(&self, token: &str) -> bool {
        token.as_bytes().ct_eq(self.admin_token.as_bytes()).into()
    }

    pub fn sign(&self, session: &Session) -> Result<String, Error> {
        let payload = format!("{}.{}", session.id, session.is_admin as u8);
        let mac = self.mac()?.chain_update(payload.as_bytes()).finalize();
        Ok(format!("{payload}.{}", hex::encode(mac.into_bytes())))
    }

    pub fn verify(&self, cookie_value: &str) -> Option<Session> {
        let (payload, signature) = cookie_value.rsplit_once('.')?;
        let signature = hex::decode(signature).ok()?;

        self.mac()
            .ok()?
            .chain_update(payload.as_bytes())
            .verify_slice(&signature)
            .ok()?;

        let (id, admin) = payload.split_once('.')?;
        let is_admin = match admin {
            "0" => false,
            "1" => true,
            _ => return None,
        };
        Some(Session {
            id: id.to_string(),
            is_admin,
        })
    }

    fn mac(&self) -> Result<HmacSha256, Error> {
        HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| Error::System(format!("session secret unusable: {e}")))
    }
}

impl FromRequest for Session {
    type Error = ApiError;
    type Future = Ready<Result<Self, ApiError>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let session = req
            .app_data::<web::Data<AuthService>>()
            .and_then(|auth| {
                req.cookie(SESSION_COOKIE)
                    .and_then(|cookie| auth.verify(cookie.value()))
            });

        ready(session.ok_or(ApiError(Error::Unauthorized)))
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    pub token: Option<String>,
}

/// `POST /api/auth`: create (or return) the caller's session. Presenting the
/// admin token upgrades the new session; a wrong token is a hard 401.
pub async fn authenticate(
    req: HttpRequest,
    auth: web::Data<AuthService>,
    body: web::Json<AuthRequest>,
) -> Result<HttpResponse, ApiError> {
    let is_admin = match &body.token {
        Some(token) => {
            if !auth.token_grants_admin(token) {
                return Err(ApiError(Error::Unauthorized));
            }
            true
        }
        None => false,
    };

    // An existing valid session is reused instead of minting a new identity.
    if let Some(existing) = req
        .cookie(SESSION_COOKIE)
        .and_then(|cookie| auth.verify(cookie.value()))
    {
        if existing.is_admin || !is_admin {
            debug!(session = %existing.id, "reusing existing session");
            return Ok(HttpResponse::Ok().json(existing));
        }
    }

    let session = Session {
        id: Uuid::new_v4().to_string(),
        is_admin,
    };

    let cookie = Cookie::build(SESSION_COOKIE, auth.sign(&session)?)
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .finish();

    debug!(session = %session.id, admin = session.is_admin, "session created");
    Ok(HttpResponse::Ok().cookie(cookie).json(session))
}
