//! Request-boundary gates.
//!
//! `Authenticate` verifies the bearer access token and attaches an [`Identity`]
//! to the request extensions. `RoleGate` reads that identity and rejects
//! requests whose roles miss the allowed set. Wrap order is up to the caller:
//! actix runs the last `.wrap()` first, so register `RoleGate` before
//! `Authenticate`.

use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::AUTHORIZATION;
use actix_web::{FromRequest, HttpMessage, HttpRequest};
use futures::future::{ready, LocalBoxFuture, Ready};
use serde::Serialize;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::auth::token::TokenService;
use crate::db::models::Role;
use crate::error::{AppError, AuthError};

/// Identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub subject: Uuid,
    pub roles: Vec<Role>,
    pub email: Option<String>,
}

impl Identity {
    pub fn has_any_role(&self, allowed: &[Role]) -> bool {
        self.roles.iter().any(|r| allowed.contains(r))
    }
}

/// Pulls the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Any failure, missing header or bad/expired token alike, is `Unauthorized`.
pub fn authenticate(req: &HttpRequest, tokens: &TokenService) -> crate::Result<Identity> {
    let token = bearer_token(req).ok_or(AuthError::Unauthorized)?;
    let payload = tokens.verify_access_token(token).map_err(|e| {
        debug!("Access token rejected: {}", e);
        AppError::AuthError(AuthError::Unauthorized)
    })?;

    Ok(Identity {
        subject: payload.subject,
        roles: payload.roles,
        email: payload.email,
    })
}

/// Precondition: `Authenticate` already ran for this request.
pub fn authorize(identity: Option<&Identity>, allowed: &[Role]) -> crate::Result<()> {
    match identity {
        None => Err(AuthError::Unauthorized.into()),
        Some(identity) if identity.has_any_role(allowed) => Ok(()),
        Some(_) => Err(AuthError::Forbidden.into()),
    }
}

impl FromRequest for Identity {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<Identity>()
                .cloned()
                .ok_or(AppError::AuthError(AuthError::Unauthorized)),
        )
    }
}

#[derive(Clone)]
pub struct Authenticate {
    tokens: Arc<TokenService>,
}

impl Authenticate {
    pub fn new(tokens: Arc<TokenService>) -> Self {
        Self { tokens }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authenticate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Transform = AuthenticateMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthenticateMiddleware {
            service: Rc::new(service),
            tokens: self.tokens.clone(),
        }))
    }
}

pub struct AuthenticateMiddleware<S> {
    service: Rc<S>,
    tokens: Arc<TokenService>,
}

impl<S, B> Service<ServiceRequest> for AuthenticateMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        match authenticate(req.request(), &self.tokens) {
            Ok(identity) => {
                req.extensions_mut().insert(identity);
                let service = self.service.clone();
                Box::pin(async move {
                    service
                        .call(req)
                        .await
                        .map(|res| res.map_into_left_body())
                })
            }
            Err(e) => {
                let response = req.error_response(e).map_into_right_body();
                Box::pin(async move { Ok(response) })
            }
        }
    }
}

#[derive(Clone)]
pub struct RoleGate {
    allowed: Rc<Vec<Role>>,
}

impl RoleGate {
    pub fn new(allowed: impl IntoIterator<Item = Role>) -> Self {
        Self {
            allowed: Rc::new(allowed.into_iter().collect()),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RoleGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Transform = RoleGateMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RoleGateMiddleware {
            service: Rc::new(service),
            allowed: self.allowed.clone(),
        }))
    }
}

pub struct RoleGateMiddleware<S> {
    service: Rc<S>,
    allowed: Rc<Vec<Role>>,
}

impl<S, B> Service<ServiceRequest> for RoleGateMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let decision = authorize(req.extensions().get::<Identity>(), &self.allowed);

        match decision {
            Ok(()) => {
                let service = self.service.clone();
                Box::pin(async move {
                    service
                        .call(req)
                        .await
                        .map(|res| res.map_into_left_body())
                })
            }
            Err(e) => {
                let response = req.error_response(e).map_into_right_body();
                Box::pin(async move { Ok(response) })
            }
        }
    }
}
