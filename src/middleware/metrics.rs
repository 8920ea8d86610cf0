//! Metrics collection middleware. Counts requests and records per-endpoint
//! latency into the shared application state.

use std::future::{ready, Ready};
use std::sync::RwLock;
use std::time::Instant;

use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{web, Error};
use futures_util::future::LocalBoxFuture;

use crate::state::AppState;

pub struct MetricsCollector;

impl<S, B> Transform<S, ServiceRequest> for MetricsCollector
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsCollectorMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsCollectorMiddleware { service }))
    }
}

pub struct MetricsCollectorMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for MetricsCollectorMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let path = req.path().to_string();
        let state = req.app_data::<web::Data<RwLock<AppState>>>().cloned();
        let start = Instant::now();

        let fut = self.service.call(req);

        Box::pin(async move {
            let res = fut.await?;

            if let Some(state) = state {
                let mut state = state.write().unwrap();
                state.metrics.total_requests += 1;
                if res.status().is_success() {
                    state.metrics.successful_requests += 1;
                } else {
                    state.metrics.failed_requests += 1;
                }
                state.record_endpoint(&path, start.elapsed().as_millis() as u64);
            }

            Ok(res)
        })
    }
}
