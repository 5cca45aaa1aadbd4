use crate::core::{Actor, AppError, Permission, Role};
use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    Error, FromRequest, HttpMessage, HttpRequest,
};
use async_trait::async_trait;
use futures_util::future::LocalBoxFuture;
use sha2::{Digest, Sha256};
use sqlx::MySqlPool;
use std::collections::HashMap;
use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Paths served without credentials
const PUBLIC_PATHS: [&str; 3] = ["/", "/health", "/ready"];

/// Resolves a hashed API key to the actor it was issued to
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn resolve(&self, key_hash: &str) -> crate::core::Result<Option<Actor>>;
}

/// SHA-256 of the raw key, hex encoded; only the hash is ever stored
pub fn hash_api_key(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

/// Row of `api_keys`; `permissions` is a comma-separated list
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKeyRow {
    pub id: i64,
    pub company_id: i64,
    pub user_id: i64,
    pub role: String,
    pub permissions: String,
    pub is_active: bool,
}

impl TryFrom<ApiKeyRow> for Actor {
    type Error = AppError;

    fn try_from(row: ApiKeyRow) -> Result<Self, Self::Error> {
        let role: Role = row.role.parse().map_err(AppError::internal)?;
        let permissions = row
            .permissions
            .split(',')
            .filter(|p| !p.trim().is_empty())
            .map(|p| p.parse::<Permission>().map_err(AppError::internal))
            .collect::<Result<Vec<_>, _>>()?;

        let mut actor = Actor::new(row.user_id, row.company_id, role, permissions);
        actor.active = row.is_active;
        Ok(actor)
    }
}

/// API keys in the `api_keys` table
pub struct MySqlApiKeyStore {
    pool: MySqlPool,
}

impl MySqlApiKeyStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyStore for MySqlApiKeyStore {
    async fn resolve(&self, key_hash: &str) -> crate::core::Result<Option<Actor>> {
        let row = sqlx::query_as::<_, ApiKeyRow>(
            r#"
            SELECT id, company_id, user_id, role, permissions, is_active
            FROM api_keys
            WHERE key_hash = ? AND is_active = TRUE
            LIMIT 1
            "#,
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        // Best effort; a failed timestamp update must not reject the request
        if let Err(e) = sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE id = ?")
            .bind(row.id)
            .execute(&self.pool)
            .await
        {
            tracing::warn!(api_key_id = row.id, error = %e, "Failed to record API key usage");
        }

        Actor::try_from(row).map(Some)
    }
}

/// Fixed key set, for tests and local development
#[derive(Default)]
pub struct StaticApiKeyStore {
    keys: HashMap<String, Actor>,
}

impl StaticApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw key; it is hashed like a stored one
    pub fn with_key(mut self, api_key: &str, actor: Actor) -> Self {
        self.keys.insert(hash_api_key(api_key), actor);
        self
    }
}

#[async_trait]
impl ApiKeyStore for StaticApiKeyStore {
    async fn resolve(&self, key_hash: &str) -> crate::core::Result<Option<Actor>> {
        Ok(self.keys.get(key_hash).cloned())
    }
}

/// API Key authentication middleware; stores the resolved [`Actor`] in the
/// request extensions
pub struct ApiKeyAuth {
    store: Arc<dyn ApiKeyStore>,
}

impl ApiKeyAuth {
    pub fn new(store: Arc<dyn ApiKeyStore>) -> Self {
        Self { store }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ApiKeyAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = ApiKeyAuthMiddleware<S>;
    type Future = Ready<std::result::Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ApiKeyAuthMiddleware {
            service: Rc::new(service),
            store: self.store.clone(),
        }))
    }
}

pub struct ApiKeyAuthMiddleware<S> {
    service: Rc<S>,
    store: Arc<dyn ApiKeyStore>,
}

impl<S, B> Service<ServiceRequest> for ApiKeyAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let svc = self.service.clone();
        let store = self.store.clone();

        Box::pin(async move {
            if PUBLIC_PATHS.contains(&req.path()) {
                return svc.call(req).await;
            }

            let api_key = req
                .headers()
                .get(API_KEY_HEADER)
                .and_then(|h| h.to_str().ok())
                .ok_or_else(|| Error::from(AppError::unauthorized("Missing X-API-Key header")))?;

            let actor = store
                .resolve(&hash_api_key(api_key))
                .await
                .map_err(Error::from)?
                .ok_or_else(|| Error::from(AppError::unauthorized("Invalid API key")))?;

            tracing::debug!(
                user_id = actor.user_id,
                company_id = actor.company_id,
                role = %actor.role,
                "Request authenticated"
            );

            req.extensions_mut().insert(actor);
            svc.call(req).await
        })
    }
}

impl FromRequest for Actor {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<Actor>()
                .cloned()
                .ok_or_else(|| AppError::unauthorized("Request is not authenticated")),
        )
    }
}
