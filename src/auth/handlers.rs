use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::middleware::{Authenticate, Identity, RoleGate};
use crate::auth::token::{TokenPair, TokenService};
use crate::db::models::Role;
use crate::error::{AppError, AuthError};
use crate::AppState;

pub const REFRESH_COOKIE: &str = "refresh_token";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetRolesRequest {
    pub roles: Vec<Role>,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub subject: Uuid,
    pub roles: Vec<Role>,
    pub email: Option<String>,
}

/// Mounts the public and protected routes. Auth middleware is built per worker.
pub fn configure_routes(cfg: &mut web::ServiceConfig, tokens: Arc<TokenService>) {
    cfg.route("/register", web::post().to(register))
        .route("/login", web::post().to(login))
        .route("/refresh", web::post().to(refresh))
        .service(
            web::resource("/logout")
                .wrap(Authenticate::new(tokens.clone()))
                .route(web::post().to(logout)),
        )
        .service(
            web::resource("/me")
                .wrap(Authenticate::new(tokens.clone()))
                .route(web::get().to(me)),
        )
        .service(
            web::scope("/admin")
                .wrap(RoleGate::new([Role::Admin]))
                .wrap(Authenticate::new(tokens))
                .route("/users/{id}/roles", web::put().to(set_roles)),
        );
}

fn refresh_cookie(state: &AppState, token: &str) -> Cookie<'static> {
    let max_age = state.auth_service.tokens().refresh_ttl().num_seconds();
    Cookie::build(REFRESH_COOKIE, token.to_string())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(state.config.auth.refresh_cookie_secure)
        .max_age(CookieDuration::seconds(max_age))
        .finish()
}

fn token_response(state: &AppState, pair: TokenPair) -> HttpResponse {
    HttpResponse::Ok()
        .cookie(refresh_cookie(state, &pair.refresh_token))
        .json(pair)
}

pub async fn register(
    req: web::Json<RegisterRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user = state
        .auth_service
        .register(&req.email, &req.password, req.display_name.as_deref())
        .await?;

    Ok(HttpResponse::Created().json(user))
}

pub async fn login(
    req: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let pair = state.auth_service.login(&req.email, &req.password).await?;
    Ok(token_response(&state, pair))
}

/// Takes the refresh token from the JSON body, falling back to the cookie.
pub async fn refresh(
    http: HttpRequest,
    body: Option<web::Json<RefreshRequest>>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let raw = body
        .and_then(|b| b.into_inner().refresh_token)
        .or_else(|| http.cookie(REFRESH_COOKIE).map(|c| c.value().to_string()))
        .ok_or_else(|| {
            warn!("Refresh attempted without a token");
            AppError::AuthError(AuthError::InvalidToken)
        })?;

    let pair = state.auth_service.refresh(&raw).await?;
    Ok(token_response(&state, pair))
}

pub async fn logout(
    identity: Identity,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state.auth_service.logout(identity.subject).await?;

    let mut removal = Cookie::build(REFRESH_COOKIE, "").path("/").finish();
    removal.make_removal();
    Ok(HttpResponse::NoContent().cookie(removal).finish())
}

pub async fn me(identity: Identity) -> HttpResponse {
    HttpResponse::Ok().json(MeResponse {
        subject: identity.subject,
        roles: identity.roles,
        email: identity.email,
    })
}

pub async fn set_roles(
    path: web::Path<Uuid>,
    req: web::Json<SetRolesRequest>,
    identity: Identity,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    let user = state
        .auth_service
        .set_roles(user_id, req.into_inner().roles)
        .await?;

    info!(admin = %identity.subject, user_id = %user_id, "Admin changed roles");
    Ok(HttpResponse::Ok().json(user))
}
