use crate::config::RateLimitConfig;
use crate::engine::{Gatekeeper, ResponseMetadata};
use crate::key::KeyDeriver;
use crate::middleware::{Denial, GatekeeperMiddleware};
use crate::store::CounterStore;
use actix_web::dev::ServiceRequest;
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use std::rc::Rc;

pub static RATE_LIMIT_LIMIT: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("rate-limit-limit"));

pub static RATE_LIMIT_REMAINING: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("rate-limit-remaining"));

pub static RATE_LIMIT_RESET: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("rate-limit-reset"));

pub(crate) fn insert_headers(map: &mut HeaderMap, metadata: &ResponseMetadata, denied: bool) {
    map.insert(RATE_LIMIT_LIMIT.clone(), HeaderValue::from(metadata.limit));
    map.insert(
        RATE_LIMIT_REMAINING.clone(),
        HeaderValue::from(metadata.remaining),
    );
    map.insert(RATE_LIMIT_RESET.clone(), HeaderValue::from(metadata.reset));
    if denied {
        map.insert(RETRY_AFTER, HeaderValue::from(metadata.reset));
    }
}

pub struct GatekeeperMiddlewareBuilder<ST, K> {
    gatekeeper: Gatekeeper<ST>,
    key_deriver: K,
    config: Option<RateLimitConfig>,
    fail_open: bool,
    add_headers: bool,
    denial: Denial,
}

impl<ST, K> GatekeeperMiddlewareBuilder<ST, K>
where
    ST: CounterStore + Clone + 'static,
    K: KeyDeriver<ServiceRequest> + 'static,
{
    pub(super) fn new(gatekeeper: Gatekeeper<ST>, key_deriver: K) -> Self {
        Self {
            gatekeeper,
            key_deriver,
            config: None,
            fail_open: false,
            add_headers: false,
            denial: Denial::Respond(Rc::new(|_| HttpResponse::TooManyRequests().finish())),
        }
    }

    /// Use a different policy for the routes this middleware wraps.
    ///
    /// Defaults to the config of the [Gatekeeper]. Keys are shared with every other middleware
    /// using the same store, so scope them accordingly.
    pub fn config(mut self, config: RateLimitConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Choose whether to allow a request if the counter store returns a failure.
    ///
    /// Default is false, in which case the store error is returned to the client.
    pub fn fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    /// Set the following headers on the allowed and denied responses:
    ///
    /// - `rate-limit-limit`\
    /// - `rate-limit-remaining`\
    /// - `rate-limit-reset` (seconds until the reset)
    /// - `retry-after` (denied only, seconds until the reset)
    ///
    /// No headers are set if the store failed and [GatekeeperMiddlewareBuilder::fail_open] is
    /// enabled, or if the denial is turned into an error with
    /// [GatekeeperMiddlewareBuilder::request_denied_error].
    pub fn add_headers(mut self) -> Self {
        self.add_headers = true;
        self
    }

    /// In the event that the request is denied, configure the [HttpResponse] returned.
    ///
    /// Defaults to an empty body with status 429.
    pub fn request_denied_response<R>(mut self, denied_response: R) -> Self
    where
        R: Fn(&ResponseMetadata) -> HttpResponse + 'static,
    {
        self.denial = Denial::Respond(Rc::new(denied_response));
        self
    }

    /// In the event that the request is denied, fail the request with an error instead of
    /// responding directly, so that it is rendered by the application's error handling.
    pub fn request_denied_error<E>(mut self, denied_error: E) -> Self
    where
        E: Fn(&ResponseMetadata) -> actix_web::Error + 'static,
    {
        self.denial = Denial::Fail(Rc::new(denied_error));
        self
    }

    pub fn build(self) -> GatekeeperMiddleware<ST, K> {
        GatekeeperMiddleware {
            gatekeeper: self.gatekeeper,
            key_deriver: Rc::new(self.key_deriver),
            config: self.config,
            fail_open: self.fail_open,
            add_headers: self.add_headers,
            denial: self.denial,
        }
    }
}
