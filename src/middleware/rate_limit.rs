use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    Error, ResponseError,
};
use futures_util::future::LocalBoxFuture;
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter as GovernorRateLimiter,
};
use std::future::{ready, Ready};
use std::num::NonZeroU32;
use std::rc::Rc;
use std::sync::Arc;

use super::auth::API_KEY_HEADER;
use crate::core::AppError;

type KeyedLimiter = GovernorRateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Rate limiting middleware using governor, one bucket per API key
/// (or per client address when no key is sent)
pub struct RateLimiter {
    limiter: Arc<KeyedLimiter>,
    requests_per_minute: u32,
}

impl RateLimiter {
    /// Create a new rate limiter with specified requests per minute
    pub fn new(requests_per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(GovernorRateLimiter::keyed(Quota::per_minute(per_minute)));

        Self {
            limiter,
            requests_per_minute: per_minute.get(),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimiter
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<actix_web::body::BoxBody, B>>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimiterMiddleware<S>;
    type Future = Ready<std::result::Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimiterMiddleware {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
            requests_per_minute: self.requests_per_minute,
        }))
    }
}

pub struct RateLimiterMiddleware<S> {
    service: Rc<S>,
    limiter: Arc<KeyedLimiter>,
    requests_per_minute: u32,
}

fn client_key(req: &ServiceRequest) -> String {
    match req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
    {
        Some(api_key) => format!("key:{}", super::auth::hash_api_key(api_key)),
        None => format!(
            "addr:{}",
            req.connection_info()
                .realip_remote_addr()
                .unwrap_or("unknown")
        ),
    }
}

impl<S, B> Service<ServiceRequest> for RateLimiterMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<actix_web::body::BoxBody, B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let svc = self.service.clone();
        let limiter = self.limiter.clone();
        let requests_per_minute = self.requests_per_minute;

        Box::pin(async move {
            // Skip rate limiting for probes
            if matches!(req.path(), "/" | "/health" | "/ready") {
                return svc.call(req).await.map(|res| res.map_into_right_body());
            }

            let key = client_key(&req);
            match limiter.check_key(&key) {
                Ok(_) => svc.call(req).await.map(|res| res.map_into_right_body()),
                Err(not_until) => {
                    let wait = not_until.wait_time_from(DefaultClock::default().now());
                    let retry_after = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);

                    tracing::warn!(
                        path = %req.path(),
                        retry_after_secs = retry_after,
                        "Rate limit exceeded"
                    );

                    let error = AppError::RateLimitExceeded(format!(
                        "Maximum {} requests per minute",
                        requests_per_minute
                    ));
                    let mut response = error.error_response();
                    response.headers_mut().insert(
                        header::RETRY_AFTER,
                        header::HeaderValue::from(retry_after.max(1)),
                    );
                    Ok(req.into_response(response).map_into_left_body())
                }
            }
        })
    }
}
