//! Project-scoped authentication.
//!
//! The [`AuthController`] is initialized before any project builder and
//! wraps the project route subtree with its guard, so every `/nc/{id}/...`
//! request is authenticated before a project router sees it.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use switchyard_core::config::PlatformConfig;
use switchyard_db::{MetaError, MetaScope, MetaStore, MetaTable};

use crate::auth::jwt::{validate_token, JwtConfig};
use crate::error::error_body;
use crate::orchestrator::secret::JWT_SECRET_KEY;

/// Header carrying the token (a `Bearer` authorization header also works).
pub const AUTH_HEADER: &str = "xc-auth";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication is required but no signing secret is available")]
    MissingSecret,

    #[error("Missing auth token")]
    MissingToken,

    #[error("Invalid or expired auth token")]
    InvalidToken,

    #[error("Failed to read signing secret: {0}")]
    Meta(#[from] MetaError),
}

/// Whether project-scoped requests must carry a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPolicy {
    /// Tokens are checked when present.
    Optional,
    /// Every project-scoped request needs a valid token.
    Required,
}

/// Authenticated caller, inserted into request extensions by the guard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthUser {
    pub sub: String,
    pub roles: Vec<String>,
}

#[async_trait]
pub trait AuthController: Send + Sync {
    /// Resolve signing material against the active metadata store and config.
    async fn init(
        &self,
        meta: Arc<dyn MetaStore>,
        config: Arc<PlatformConfig>,
    ) -> Result<(), AuthError>;

    /// Authentication endpoints mounted at the frame root.
    fn routes(&self) -> Router;

    /// Wrap `router` so every request through it is authenticated first.
    fn guard(&self, router: Router) -> Router;
}

struct AuthInner {
    policy: AuthPolicy,
    jwt: RwLock<Option<JwtConfig>>,
}

impl AuthInner {
    fn token(headers: &HeaderMap) -> Option<&str> {
        if let Some(token) = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok()) {
            return Some(token.trim());
        }
        headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
    }

    fn authenticate(&self, headers: &HeaderMap) -> Result<Option<AuthUser>, AuthError> {
        let token = Self::token(headers).filter(|t| !t.is_empty());
        let jwt = self.jwt.read().unwrap_or_else(PoisonError::into_inner).clone();

        let (token, jwt) = match (token, jwt, self.policy) {
            (Some(token), Some(jwt), _) => (token, jwt),
            (None, _, AuthPolicy::Required) => return Err(AuthError::MissingToken),
            (Some(_), None, AuthPolicy::Required) => return Err(AuthError::MissingSecret),
            _ => return Ok(None),
        };

        let claims = validate_token(token, &jwt).map_err(|_| AuthError::InvalidToken)?;
        Ok(Some(AuthUser {
            sub: claims.sub,
            roles: claims
                .roles
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect(),
        }))
    }
}

/// JWT-based [`AuthController`].
#[derive(Clone)]
pub struct JwtAuthController {
    inner: Arc<AuthInner>,
}

impl JwtAuthController {
    pub fn new(policy: AuthPolicy) -> Self {
        Self {
            inner: Arc::new(AuthInner {
                policy,
                jwt: RwLock::new(None),
            }),
        }
    }

    pub fn policy(&self) -> AuthPolicy {
        self.inner.policy
    }
}

async fn persisted_secret(meta: &dyn MetaStore) -> Result<Option<String>, MetaError> {
    let filter = switchyard_db::meta::record([("key", JWT_SECRET_KEY.into())]);
    let found = meta
        .get_record(&MetaScope::global(), MetaTable::Store, &filter)
        .await?;
    Ok(found
        .and_then(|r| r.get("value").and_then(|v| v.as_str()).map(str::to_string))
        .filter(|s| !s.is_empty()))
}

#[async_trait]
impl AuthController for JwtAuthController {
    async fn init(
        &self,
        meta: Arc<dyn MetaStore>,
        config: Arc<PlatformConfig>,
    ) -> Result<(), AuthError> {
        let secret = match config.jwt_secret() {
            Some(secret) => Some(secret.to_string()),
            None => persisted_secret(meta.as_ref()).await?,
        };

        if secret.is_none() && self.inner.policy == AuthPolicy::Required {
            return Err(AuthError::MissingSecret);
        }

        tracing::info!(policy = ?self.inner.policy, has_secret = secret.is_some(), "Auth controller initialized");
        *self.inner.jwt.write().unwrap_or_else(PoisonError::into_inner) = secret.map(JwtConfig::new);
        Ok(())
    }

    fn routes(&self) -> Router {
        Router::new()
            .route("/auth/user/me", get(me))
            .with_state(Arc::clone(&self.inner))
    }

    fn guard(&self, router: Router) -> Router {
        router.layer(from_fn_with_state(Arc::clone(&self.inner), authenticate))
    }
}

async fn authenticate(State(inner): State<Arc<AuthInner>>, mut req: Request, next: Next) -> Response {
    match inner.authenticate(req.headers()) {
        Ok(Some(user)) => {
            req.extensions_mut().insert(user);
        }
        Ok(None) => {}
        Err(e) => {
            tracing::debug!(error = %e, path = %req.uri().path(), "Rejected project request");
            return error_body(StatusCode::UNAUTHORIZED, e.to_string());
        }
    }
    next.run(req).await
}

/// GET /auth/user/me -- the caller's claims, or `{}` when anonymous.
async fn me(State(inner): State<Arc<AuthInner>>, headers: HeaderMap) -> Response {
    match inner.authenticate(&headers) {
        Ok(Some(user)) => Json(user).into_response(),
        Ok(None) => Json(serde_json::json!({})).into_response(),
        Err(e) => error_body(StatusCode::UNAUTHORIZED, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::http::HeaderValue;
    use switchyard_core::config::{AuthConfig, JwtAuthConfig};
    use switchyard_db::InMemoryMetaStore;

    use super::*;
    use crate::auth::jwt::generate_token;

    fn config_with_secret(secret: Option<&str>) -> Arc<PlatformConfig> {
        Arc::new(PlatformConfig {
            auth: Some(AuthConfig {
                jwt: Some(JwtAuthConfig {
                    secret: secret.map(str::to_string),
                }),
            }),
            ..PlatformConfig::default()
        })
    }

    fn headers_with(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[tokio::test]
    async fn optional_policy_allows_anonymous_requests() {
        let controller = JwtAuthController::new(AuthPolicy::Optional);
        controller
            .init(Arc::new(InMemoryMetaStore::new()), config_with_secret(Some("s3cret")))
            .await
            .unwrap();
        assert_matches!(controller.inner.authenticate(&HeaderMap::new()), Ok(None));
    }

    #[tokio::test]
    async fn required_policy_rejects_missing_token() {
        let controller = JwtAuthController::new(AuthPolicy::Required);
        controller
            .init(Arc::new(InMemoryMetaStore::new()), config_with_secret(Some("s3cret")))
            .await
            .unwrap();
        assert_matches!(
            controller.inner.authenticate(&HeaderMap::new()),
            Err(AuthError::MissingToken)
        );
    }

    #[tokio::test]
    async fn valid_token_yields_user_via_either_header() {
        let controller = JwtAuthController::new(AuthPolicy::Required);
        controller
            .init(Arc::new(InMemoryMetaStore::new()), config_with_secret(Some("s3cret")))
            .await
            .unwrap();
        let token = generate_token("ops@example.com", "owner, editor", &JwtConfig::new("s3cret")).unwrap();

        let user = controller
            .inner
            .authenticate(&headers_with(AUTH_HEADER, &token))
            .unwrap()
            .unwrap();
        assert_eq!(user.sub, "ops@example.com");
        assert_eq!(user.roles, vec!["owner", "editor"]);

        let bearer = headers_with("authorization", &format!("Bearer {token}"));
        assert!(controller.inner.authenticate(&bearer).unwrap().is_some());

        assert_matches!(
            controller.inner.authenticate(&headers_with(AUTH_HEADER, "garbage")),
            Err(AuthError::InvalidToken)
        );
    }

    #[tokio::test]
    async fn required_policy_without_any_secret_fails_init() {
        let controller = JwtAuthController::new(AuthPolicy::Required);
        let result = controller
            .init(Arc::new(InMemoryMetaStore::new()), config_with_secret(None))
            .await;
        assert_matches!(result, Err(AuthError::MissingSecret));
    }

    #[tokio::test]
    async fn persisted_secret_is_used_when_config_has_none() {
        let meta = Arc::new(InMemoryMetaStore::new());
        meta.insert_record(
            &MetaScope::global(),
            MetaTable::Store,
            switchyard_db::meta::record([
                ("key", JWT_SECRET_KEY.into()),
                ("value", "persisted".into()),
            ]),
        )
        .await
        .unwrap();

        let controller = JwtAuthController::new(AuthPolicy::Required);
        controller.init(meta, config_with_secret(None)).await.unwrap();

        let token = generate_token("u", "", &JwtConfig::new("persisted")).unwrap();
        assert!(controller
            .inner
            .authenticate(&headers_with(AUTH_HEADER, &token))
            .unwrap()
            .is_some());
    }
}
