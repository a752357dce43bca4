use actix_web::dev::ServiceRequest;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

/// Key used when a request carries no identifying attribute.
pub const DEFAULT_FALLBACK_KEY: &str = "unknown";

type CustomFn = Box<dyn Fn(&ServiceRequest) -> Option<String>>;

/// Maps a request to the key its requests are counted against.
///
/// Derivation must be total: when the request has nothing to identify the caller by, return a
/// fallback key rather than failing. You should take care to ensure that you are producing unique
/// keys per store, e.g. by scoping keys by route.
pub trait KeyDeriver<R: ?Sized> {
    fn derive(&self, request: &R) -> String;
}

impl<R: ?Sized, F> KeyDeriver<R> for F
where
    F: Fn(&R) -> String,
{
    fn derive(&self, request: &R) -> String {
        self(request)
    }
}

/// Utility to derive a rate limit key from the attributes of an actix request.
///
/// Components are joined with `-` in a fixed order: scope, real IP, peer IP, path, custom.
/// A component that cannot be determined contributes the fallback key instead, and a builder
/// with no components derives the fallback key for every request.
pub struct KeyBuilder {
    scope: Option<String>,
    real_ip_key: bool,
    peer_ip_key: bool,
    path_key: bool,
    custom_fn: Option<CustomFn>,
    fallback: String,
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyBuilder {
    pub fn new() -> Self {
        Self {
            scope: None,
            real_ip_key: false,
            peer_ip_key: false,
            path_key: false,
            custom_fn: None,
            fallback: DEFAULT_FALLBACK_KEY.to_owned(),
        }
    }

    /// Prefix every key with a static component, e.g. the name of the route group.
    pub fn scope(mut self, scope: &str) -> Self {
        self.scope = Some(scope.to_owned());
        self
    }

    /// Adds the client's real IP to the rate limiting key.
    ///
    /// # Security
    ///
    /// This calls
    /// [ConnectionInfo::realip_remote_addr()](actix_web::dev::ConnectionInfo::realip_remote_addr)
    /// internally which is only suitable for Actix applications deployed behind a proxy that you
    /// control.
    ///
    /// # IPv6
    ///
    /// IPv6 addresses will be grouped into a single key per /64
    pub fn real_ip_key(mut self) -> Self {
        self.real_ip_key = true;
        self
    }

    /// Adds the connection peer IP to the rate limiting key.
    ///
    /// This is suitable when clients connect directly to the Actix application.
    ///
    /// # IPv6
    ///
    /// IPv6 addresses will be grouped into a single key per /64
    pub fn peer_ip_key(mut self) -> Self {
        self.peer_ip_key = true;
        self
    }

    /// Add the request path to the rate limiting key
    pub fn path_key(mut self) -> Self {
        self.path_key = true;
        self
    }

    /// Dynamically add a custom component to the rate limiting key, e.g. an authenticated user.
    ///
    /// Returning [None] contributes the fallback key.
    pub fn custom_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&ServiceRequest) -> Option<String> + 'static,
    {
        self.custom_fn = Some(Box::new(f));
        self
    }

    /// Override the key used for missing attributes, defaults to [DEFAULT_FALLBACK_KEY].
    pub fn fallback(mut self, fallback: &str) -> Self {
        self.fallback = fallback.to_owned();
        self
    }

    fn or_fallback(&self, component: Option<String>) -> String {
        component.unwrap_or_else(|| self.fallback.clone())
    }
}

impl KeyDeriver<ServiceRequest> for KeyBuilder {
    fn derive(&self, req: &ServiceRequest) -> String {
        let mut components = Vec::new();
        let info = req.connection_info();
        if let Some(scope) = &self.scope {
            components.push(scope.clone());
        }
        if self.real_ip_key {
            components.push(self.or_fallback(info.realip_remote_addr().and_then(ip_key)));
        }
        if self.peer_ip_key {
            components.push(self.or_fallback(info.peer_addr().and_then(ip_key)));
        }
        if self.path_key {
            components.push(req.path().to_owned());
        }
        if let Some(f) = &self.custom_fn {
            components.push(self.or_fallback(f(req)));
        }
        if components.is_empty() {
            return self.fallback.clone();
        }
        components.join("-")
    }
}

// Groups IPv6 addresses together, see:
// https://adam-p.ca/blog/2022/02/ipv6-rate-limiting/
// https://support.cloudflare.com/hc/en-us/articles/115001635128-Configuring-Cloudflare-Rate-Limiting
fn ip_key(addr: &str) -> Option<String> {
    let ip = addr
        .parse::<IpAddr>()
        .or_else(|_| addr.parse::<SocketAddr>().map(|socket| socket.ip()))
        .ok()?;
    Some(match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return Some(v4.to_string());
            }
            let s = v6.segments();
            let subnet = Ipv6Addr::new(s[0], s[1], s[2], s[3], 0, 0, 0, 0);
            format!("{}/64", subnet)
        }
    })
}
