pub mod builder;

use crate::config::RateLimitConfig;
use crate::engine::{Gatekeeper, ResponseMetadata};
use crate::key::KeyDeriver;
use crate::store::CounterStore;
use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::HttpResponse;
use builder::{insert_headers, GatekeeperMiddlewareBuilder};
use futures::future::{ok, LocalBoxFuture, Ready};
use std::rc::Rc;
use std::time::SystemTime;

type DeniedResponse = dyn Fn(&ResponseMetadata) -> HttpResponse;
type DeniedError = dyn Fn(&ResponseMetadata) -> actix_web::Error;

/// What to do with a request once it has been denied.
#[derive(Clone)]
enum Denial {
    Respond(Rc<DeniedResponse>),
    Fail(Rc<DeniedError>),
}

/// Rate limit middleware.
pub struct GatekeeperMiddleware<ST, K> {
    gatekeeper: Gatekeeper<ST>,
    key_deriver: Rc<K>,
    config: Option<RateLimitConfig>,
    fail_open: bool,
    add_headers: bool,
    denial: Denial,
}

impl<ST, K> Clone for GatekeeperMiddleware<ST, K>
where
    ST: CounterStore + Clone,
{
    fn clone(&self) -> Self {
        Self {
            gatekeeper: self.gatekeeper.clone(),
            key_deriver: self.key_deriver.clone(),
            config: self.config,
            fail_open: self.fail_open,
            add_headers: self.add_headers,
            denial: self.denial.clone(),
        }
    }
}

impl<ST, K> GatekeeperMiddleware<ST, K>
where
    ST: CounterStore + Clone + 'static,
    K: KeyDeriver<ServiceRequest> + 'static,
{
    /// # Arguments
    ///
    /// * `gatekeeper`: The rate limiting engine, with the store and default config to use.
    /// * `key_deriver`: Produces the rate limit key for an incoming request.
    pub fn builder(gatekeeper: Gatekeeper<ST>, key_deriver: K) -> GatekeeperMiddlewareBuilder<ST, K> {
        GatekeeperMiddlewareBuilder::new(gatekeeper, key_deriver)
    }
}

impl<S, B, ST, K> Transform<S, ServiceRequest> for GatekeeperMiddleware<ST, K>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
    ST: CounterStore + Clone + 'static,
    K: KeyDeriver<ServiceRequest> + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Transform = GatekeeperService<S, ST, K>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(GatekeeperService {
            service: Rc::new(service),
            gatekeeper: self.gatekeeper.clone(),
            key_deriver: Rc::clone(&self.key_deriver),
            config: self.config,
            fail_open: self.fail_open,
            add_headers: self.add_headers,
            denial: self.denial.clone(),
        })
    }
}

pub struct GatekeeperService<S, ST, K> {
    service: Rc<S>,
    gatekeeper: Gatekeeper<ST>,
    key_deriver: Rc<K>,
    config: Option<RateLimitConfig>,
    fail_open: bool,
    add_headers: bool,
    denial: Denial,
}

impl<S, B, ST, K> Service<ServiceRequest> for GatekeeperService<S, ST, K>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
    ST: CounterStore + Clone + 'static,
    K: KeyDeriver<ServiceRequest> + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let gatekeeper = self.gatekeeper.clone();
        let key = self.key_deriver.derive(&req);
        let config = self.config.unwrap_or(*gatekeeper.config());
        let fail_open = self.fail_open;
        let add_headers = self.add_headers;
        let denial = self.denial.clone();

        Box::pin(async move {
            let now = SystemTime::now();
            let metadata = match gatekeeper.check_and_consume(&key, &config, now).await {
                // Able to successfully query the counter store
                Ok(decision) => {
                    let metadata = decision.metadata(&config, now);
                    if decision.is_denied() {
                        return match denial {
                            Denial::Respond(denied_response) => {
                                let mut response = (denied_response)(&metadata);
                                if add_headers {
                                    insert_headers(response.headers_mut(), &metadata, true);
                                }
                                Ok(req.into_response(response).map_into_right_body())
                            }
                            Denial::Fail(denied_error) => Err((denied_error)(&metadata)),
                        };
                    }
                    Some(metadata)
                }
                // Unable to query the counter store
                Err(e) => {
                    if fail_open {
                        log::warn!("Rate limiter failed: {}, allowing the request anyway", e);
                        None
                    } else {
                        log::error!("Rate limiter failed: {}", e);
                        return Err(e.into());
                    }
                }
            };

            let mut service_response = service.call(req).await?;

            if add_headers {
                if let Some(metadata) = metadata {
                    insert_headers(service_response.headers_mut(), &metadata, false);
                }
            }

            Ok(service_response.map_into_left_body())
        })
    }
}
