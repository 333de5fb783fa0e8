//! Sliding-window admission control.
//!
//! Every request is counted against its client (network origin) and, for
//! tracked routes, against a counter shared by all clients. A request is
//! admitted only if neither counter is at its ceiling for the trailing window;
//! it is then recorded in both.
//!
//! ## Response Headers
//!
//! Rejected requests get `429 Too Many Requests` with a `Retry-After` header.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderValue, Method, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::error::AppError;

type Window = Arc<Mutex<VecDeque<Instant>>>;

/// Method plus exact path, e.g. `POST /api/v1/executions`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub method: Method,
    pub path: String,
}

impl RouteKey {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Which counter rejected a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitScope {
    Client,
    Route(RouteKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected {
        scope: LimitScope,
        limit: usize,
        retry_after: Duration,
    },
}

/// Per-process admission controller. Construct once and share via `Arc`.
pub struct AdmissionController {
    enabled: bool,
    window: Duration,
    client_limit: usize,
    route_limits: HashMap<RouteKey, usize>,
    clients: StdMutex<HashMap<String, Window>>,
    routes: StdMutex<HashMap<RouteKey, Window>>,
    last_sweep: StdMutex<Instant>,
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("enabled", &self.enabled)
            .field("window", &self.window)
            .field("client_limit", &self.client_limit)
            .field("route_limits", &self.route_limits)
            .finish()
    }
}

impl AdmissionController {
    pub fn new(enabled: bool, window: Duration, client_limit: usize) -> Self {
        Self {
            enabled,
            window,
            client_limit,
            route_limits: HashMap::new(),
            clients: StdMutex::new(HashMap::new()),
            routes: StdMutex::new(HashMap::new()),
            last_sweep: StdMutex::new(Instant::now()),
        }
    }

    /// Controller with the execution-creation route tracked.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.enabled, config.window(), config.client_limit).with_route_limit(
            RouteKey::new(Method::POST, "/api/v1/executions"),
            config.executions_limit,
        )
    }

    pub fn with_route_limit(mut self, route: RouteKey, limit: usize) -> Self {
        self.route_limits.insert(route, limit);
        self
    }

    fn window_for<K>(map: &StdMutex<HashMap<K, Window>>, key: &K) -> Window
    where
        K: Clone + Eq + std::hash::Hash,
    {
        let mut map = map.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(key.clone()).or_default().clone()
    }

    /// Drop windows of clients and routes that went quiet, at most once per window.
    fn sweep_idle(&self, now: Instant) {
        {
            let mut last = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
            if now.duration_since(*last) < self.window {
                return;
            }
            *last = now;
        }
        let clients = evict_idle(&self.clients, now, self.window);
        let routes = evict_idle(&self.routes, now, self.window);
        if clients + routes > 0 {
            tracing::debug!(clients, routes, "Evicted idle rate limit windows");
        }
    }

    /// Number of clients that currently hold a window.
    pub fn tracked_clients(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check and, if admitted, record one request.
    pub async fn check(&self, client: &str, method: &Method, path: &str) -> Admission {
        if !self.enabled {
            return Admission::Allowed;
        }

        self.sweep_idle(Instant::now());

        let route = RouteKey::new(method.clone(), path.trim_end_matches('/'));
        let route_limit = self.route_limits.get(&route).copied();

        // Lock order: client, then route.
        let client_window = Self::window_for(&self.clients, &client.to_string());
        let mut client_hits = client_window.lock().await;
        let route_window = route_limit.map(|_| Self::window_for(&self.routes, &route));
        let mut route_hits = match &route_window {
            Some(window) => Some(window.lock().await),
            None => None,
        };

        let now = Instant::now();
        prune(&mut client_hits, now, self.window);
        if let Some(hits) = route_hits.as_deref_mut() {
            prune(hits, now, self.window);
        }

        if client_hits.len() >= self.client_limit {
            return Admission::Rejected {
                scope: LimitScope::Client,
                limit: self.client_limit,
                retry_after: retry_after(&client_hits, now, self.window),
            };
        }
        if let (Some(hits), Some(limit)) = (route_hits.as_deref(), route_limit) {
            if hits.len() >= limit {
                return Admission::Rejected {
                    scope: LimitScope::Route(route),
                    limit,
                    retry_after: retry_after(hits, now, self.window),
                };
            }
        }

        client_hits.push_back(now);
        if let Some(hits) = route_hits.as_deref_mut() {
            hits.push_back(now);
        }
        Admission::Allowed
    }
}

fn prune(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while hits
        .front()
        .is_some_and(|oldest| now.duration_since(*oldest) >= window)
    {
        hits.pop_front();
    }
}

/// Remove empty windows nobody else holds.
///
/// Runs under the map lock; a window another request already cloned out of
/// the map is kept so its hit is never recorded in an orphan.
fn evict_idle<K>(map: &StdMutex<HashMap<K, Window>>, now: Instant, window: Duration) -> usize
where
    K: Eq + std::hash::Hash,
{
    let mut map = map.lock().unwrap_or_else(PoisonError::into_inner);
    let before = map.len();
    map.retain(|_, hits| {
        if Arc::strong_count(hits) > 1 {
            return true;
        }
        match hits.try_lock() {
            Ok(mut hits) => {
                prune(&mut hits, now, window);
                !hits.is_empty()
            }
            Err(_) => true,
        }
    });
    before - map.len()
}

fn retry_after(hits: &VecDeque<Instant>, now: Instant, window: Duration) -> Duration {
    hits.front()
        .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
        .unwrap_or(window)
}

/// Client key for a request: peer IP when the server exposes it.
fn client_key(req: &Request<Body>) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Admission middleware for Axum.
pub async fn admission_middleware(
    State(controller): State<Arc<AdmissionController>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let client = client_key(&req);
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match controller.check(&client, &method, &path).await {
        Admission::Allowed => next.run(req).await,
        Admission::Rejected {
            scope,
            limit,
            retry_after,
        } => {
            let message = match &scope {
                LimitScope::Client => format!(
                    "Rate limit exceeded: {} requests per {}s for this client",
                    limit,
                    controller.window.as_secs()
                ),
                LimitScope::Route(route) => format!(
                    "Rate limit exceeded: {} requests per {}s for {}",
                    limit,
                    controller.window.as_secs(),
                    route
                ),
            };
            tracing::warn!(
                client = %client,
                method = %method,
                path = %path,
                scope = ?scope,
                limit,
                retry_after_secs = retry_after.as_secs(),
                "Rate limit exceeded"
            );

            let mut response = AppError::RateLimited(message).into_response();
            let seconds = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
    }
}
