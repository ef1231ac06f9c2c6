use crate::vars::{ContextVar, INVALID, LogVars};
use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Inbound request metadata a [`RequestContext`] is built from.
///
/// Fields left as `None` are logged as `-`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub method: String,
    /// Mount prefix the application is served under (may be empty).
    pub script_name: String,
    pub path: String,
    pub query: Option<String>,
    /// Full request URI as provided by the server; wins over reconstruction.
    pub request_uri: Option<String>,
    pub host: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub remote_user: Option<String>,
    pub remote_addr: Option<String>,
    pub protocol: String,
}

impl RequestMeta {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            protocol: "HTTP/1.1".to_string(),
            ..Self::default()
        }
    }

    pub fn script_name(mut self, script_name: impl Into<String>) -> Self {
        self.script_name = script_name.into();
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Returns the request URI, reconstructing it when the server did not
    /// provide one: `script_name + path`, then `?query` for a non-empty query.
    pub fn uri(&self) -> String {
        if let Some(uri) = &self.request_uri {
            return uri.clone();
        }
        let mut uri = String::with_capacity(self.script_name.len() + self.path.len());
        uri.push_str(&self.script_name);
        uri.push_str(&self.path);
        if let Some(query) = self.query.as_deref().filter(|q| !q.is_empty()) {
            uri.push('?');
            uri.push_str(query);
        }
        uri
    }
}

#[derive(Debug, Default)]
struct ResponseVars {
    status: Option<String>,
    rsize: Option<String>,
}

#[derive(Debug)]
struct ContextInner {
    start: Instant,
    vars: LogVars,
    response: Mutex<ResponseVars>,
}

/// Holds information about one request and its response.
///
/// Built from the request metadata when processing starts and later updated
/// from the response head. Clones share state; equality is identity.
#[derive(Debug, Clone)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

impl PartialEq for RequestContext {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for RequestContext {}

impl RequestContext {
    pub fn new(meta: RequestMeta) -> Self {
        let started_at = SystemTime::now();
        let epoch = started_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let mut vars = LogVars::default();
        vars.set(ContextVar::Uri, meta.uri());
        vars.set(ContextVar::Method, meta.method);
        vars.set(ContextVar::Proto, meta.protocol);
        let optional = [
            (ContextVar::User, meta.remote_user),
            (ContextVar::Addr, meta.remote_addr),
            (ContextVar::Host, meta.host),
            (ContextVar::Uagent, meta.user_agent),
            (ContextVar::Referer, meta.referer),
        ];
        for (var, value) in optional {
            if let Some(value) = value {
                vars.set(var, value);
            }
        }
        vars.set(ContextVar::Time, epoch.to_string());
        vars.set(
            ContextVar::Ctime,
            DateTime::<Local>::from(started_at)
                .format("%a %b %e %H:%M:%S %Y")
                .to_string(),
        );

        Self {
            inner: Arc::new(ContextInner {
                start: Instant::now(),
                vars,
                response: Mutex::new(ResponseVars::default()),
            }),
        }
    }

    /// Returns a snapshot of every variable.
    ///
    /// `micros` and `msecs` are computed on each call from the elapsed time.
    pub fn log_vars(&self) -> LogVars {
        let elapsed = self.inner.start.elapsed();
        let mut vars = self.inner.vars.clone();
        vars.set(ContextVar::Micros, elapsed.as_micros().to_string());
        vars.set(ContextVar::Msecs, elapsed.as_millis().to_string());

        let response = self.response();
        if let Some(status) = &response.status {
            vars.set(ContextVar::Status, status.as_str());
        }
        if let Some(rsize) = &response.rsize {
            vars.set(ContextVar::Rsize, rsize.as_str());
        }
        vars
    }

    /// Records the response status from a status line such as `200 OK`.
    pub fn set_status(&self, status_line: &str) {
        let code = status_line.split(' ').next().unwrap_or_default();
        self.response().status = Some(parse_int(code));
    }

    /// Records the response body size from a `Content-Length` value.
    pub fn set_response_size(&self, value: &str) {
        self.response().rsize = Some(parse_int(value));
    }

    /// Records the response head as passed to a response-start callback.
    ///
    /// Only the first header named `content-length` (any case) is used.
    pub fn start_response<'a, I>(&self, status_line: &str, headers: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.set_status(status_line);
        if let Some((_, value)) = headers
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        {
            self.set_response_size(value);
        }
    }

    fn response(&self) -> std::sync::MutexGuard<'_, ResponseVars> {
        self.inner
            .response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Normalizes a decimal integer of any length, or returns `???`.
fn parse_int(raw: &str) -> String {
    let raw = raw.trim();
    let (negative, digits) = match raw.as_bytes().first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return INVALID.to_string();
    }
    let digits = digits.trim_start_matches('0');
    match (digits.is_empty(), negative) {
        (true, _) => "0".to_string(),
        (false, true) => format!("-{digits}"),
        (false, false) => digits.to_string(),
    }
}
