use std::{
    collections::{HashMap, HashSet},
    net::{IpAddr, SocketAddr},
    path::Path,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use axum::{
    Json,
    body::HttpBody,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Local;
use redis::aio::ConnectionManager;
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex as AsyncMutex,
};

/// Local counters are pruned once this many addresses are tracked.
const PRUNE_THRESHOLD: usize = 10_000;

fn socket_ip(request: &Request) -> Option<IpAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Address for the access log: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the socket peer.
fn forwarded_ip(headers: &HeaderMap, socket: Option<IpAddr>) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };
    if let Some(forwarded) = header_value("x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            return first.trim().to_owned();
        }
    }
    if let Some(real_ip) = header_value("x-real-ip") {
        return real_ip.to_owned();
    }
    socket.map_or_else(|| "-".to_owned(), |ip| ip.to_string())
}

#[derive(Clone)]
enum Counters {
    Local(Arc<Mutex<HashMap<IpAddr, (Instant, u64)>>>),
    Redis(ConnectionManager),
}

/// Fixed-window request counter per client address.
#[derive(Clone)]
pub struct RateLimiter {
    max: u64,
    window: Duration,
    counters: Counters,
}

impl RateLimiter {
    #[must_use]
    pub fn local(max: u64, window: Duration) -> Self {
        Self {
            max,
            window,
            counters: Counters::Local(Arc::default()),
        }
    }

    /// Shares counters between instances through Redis.
    #[must_use]
    pub fn redis(max: u64, window: Duration, connection: ConnectionManager) -> Self {
        Self {
            max,
            window,
            counters: Counters::Redis(connection),
        }
    }

    /// Counts one request from `ip` and reports whether it is within the limit.
    pub async fn check(&self, ip: IpAddr) -> bool {
        match &self.counters {
            Counters::Local(counters) => {
                let now = Instant::now();
                let mut counters = match counters.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if counters.len() > PRUNE_THRESHOLD {
                    counters.retain(|_, (start, _)| now.duration_since(*start) < self.window);
                }
                let entry = counters.entry(ip).or_insert((now, 0));
                if now.duration_since(entry.0) >= self.window {
                    *entry = (now, 0);
                }
                entry.1 += 1;
                entry.1 <= self.max
            }
            Counters::Redis(connection) => {
                let mut connection = connection.clone();
                let pipeline = window_counter(&format!("rate_limit:{ip}"), self.window);
                let (count,): (u64,) = match pipeline.query_async(&mut connection).await {
                    Ok(count) => count,
                    Err(err) => {
                        tracing::error!(err = ?err);
                        return true;
                    }
                };
                count <= self.max
            }
        }
    }
}

/// Creates the key with its expiry before counting, in one transaction, so a
/// counter never outlives its window.
fn window_counter(key: &str, window: Duration) -> redis::Pipeline {
    let mut pipeline = redis::pipe();
    pipeline
        .atomic()
        .cmd("SET")
        .arg(key)
        .arg(0)
        .arg("EX")
        .arg(window.as_secs().max(1))
        .arg("NX")
        .ignore()
        .incr(key, 1u64);
    pipeline
}

pub async fn rate_limit(State(limiter): State<RateLimiter>, request: Request, next: Next) -> Response {
    if let Some(ip) = socket_ip(&request) {
        if !limiter.check(ip).await {
            tracing::warn!(%ip, "rate limit exceeded");
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({ "error": "Too many requests, please try again later." })),
            )
                .into_response();
        }
    }
    next.run(request).await
}

pub async fn block_ips(
    State(blocked): State<Arc<HashSet<IpAddr>>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(ip) = socket_ip(&request) {
        if blocked.contains(&ip) {
            tracing::info!(%ip, "blocked address");
            return (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({ "error": "Access forbidden" })),
            )
                .into_response();
        }
    }
    next.run(request).await
}

/// Appends one combined-log-format line per request.
#[derive(Clone)]
pub struct AccessLog {
    file: Arc<AsyncMutex<File>>,
}

impl AccessLog {
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        Ok(Self {
            file: Arc::new(AsyncMutex::new(file)),
        })
    }

    async fn write(&self, line: String) {
        let mut file = self.file.lock().await;
        let written = match file.write_all(line.as_bytes()).await {
            Ok(()) => file.flush().await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            tracing::error!(err = ?err, "writing access log");
        }
    }
}

pub async fn access_log(State(log): State<AccessLog>, request: Request, next: Next) -> Response {
    let headers = request.headers();
    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("-")
            .to_owned()
    };
    let remote = forwarded_ip(headers, socket_ip(&request));
    let referrer = header_value(header::REFERER);
    let user_agent = header_value(header::USER_AGENT);
    let request_line = format!(
        "{} {} {:?}",
        request.method(),
        request.uri(),
        request.version()
    );
    let date = Local::now().format("%d/%b/%Y:%H:%M:%S %z").to_string();

    let response = next.run(request).await;

    let length = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .or_else(|| response.body().size_hint().exact().map(|len| len.to_string()))
        .unwrap_or_else(|| "-".to_owned());
    let line = format!(
        "{remote} - - [{date}] \"{request_line}\" {} {length} \"{referrer}\" \"{user_agent}\"\n",
        response.status().as_u16(),
    );
    log.write(line).await;

    response
}
