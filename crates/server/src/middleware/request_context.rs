use axum::extract::{ConnectInfo, OriginalUri};
use axum::http::{HeaderName, Request, Response, header};
use pin_project::pin_project;
use reqscope_core::vars::INVALID;
use reqscope_core::{ContextError, ContextFuture, RequestContext, RequestMeta};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, ready};
use tower::{BoxError, Layer, Service};

/// Prefix the application is mounted under, inserted by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptName(pub String);

/// Authenticated user name, inserted by an authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUser(pub String);

/// Collects the metadata a [`RequestContext`] is built from.
pub fn request_meta<B>(request: &Request<B>) -> RequestMeta {
    let extensions = request.extensions();
    let header_value = |name: HeaderName| {
        request.headers().get(name).map(|value| {
            value
                .to_str()
                .map_or_else(|_| INVALID.to_string(), str::to_string)
        })
    };

    RequestMeta {
        method: request.method().as_str().to_string(),
        script_name: extensions
            .get::<ScriptName>()
            .map(|s| s.0.clone())
            .unwrap_or_default(),
        path: request.uri().path().to_string(),
        query: request.uri().query().map(str::to_string),
        request_uri: extensions
            .get::<OriginalUri>()
            .and_then(|uri| uri.0.path_and_query())
            .map(|pq| pq.to_string()),
        host: header_value(header::HOST).or_else(|| request.uri().host().map(str::to_string)),
        user_agent: header_value(header::USER_AGENT),
        referer: header_value(header::REFERER),
        remote_user: extensions.get::<RemoteUser>().map(|user| user.0.clone()),
        remote_addr: extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string()),
        protocol: format!("{:?}", request.version()),
    }
}

/// Response-start hook for one request.
///
/// Forwards the response head into the request's [`RequestContext`]. Only the
/// first call has an effect; later calls (another layer seeing the same
/// response) are ignored.
#[derive(Debug, Clone)]
pub struct StartResponse {
    context: RequestContext,
    started: Arc<AtomicBool>,
}

impl StartResponse {
    pub fn new(context: RequestContext) -> Self {
        Self {
            context,
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Records `response`'s status and `Content-Length`. Returns `false` if
    /// the response head was already recorded.
    pub fn call<B>(&self, response: &Response<B>) -> bool {
        if self.started.swap(true, Ordering::AcqRel) {
            return false;
        }
        let status = response.status();
        let status_line = match status.canonical_reason() {
            Some(reason) => format!("{} {reason}", status.as_str()),
            None => status.as_str().to_string(),
        };
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str(), value.to_str().unwrap_or_default()));
        self.context.start_response(&status_line, headers);
        true
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

/// Layer creating a [`RequestContext`] for every request.
///
/// The context is attached to the request extensions together with its
/// [`StartResponse`] hook, and is current on the calling execution unit while
/// the inner service runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextScopeLayer;

impl ContextScopeLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for ContextScopeLayer {
    type Service = ContextScope<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ContextScope { inner }
    }
}

/// Service created by [`ContextScopeLayer`].
#[derive(Debug, Clone)]
pub struct ContextScope<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ContextScope<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
{
    type Response = Response<ResBody>;
    type Error = BoxError;
    type Future = ContextScopeFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        if request.extensions().get::<RequestContext>().is_some() {
            return ContextScopeFuture::Failed {
                error: Some(ContextError::AlreadyAttached),
            };
        }

        let context = RequestContext::new(request_meta(&request));
        let start_response = StartResponse::new(context.clone());
        request.extensions_mut().insert(context.clone());
        request.extensions_mut().insert(start_response.clone());

        let future = context.scope(|| self.inner.call(request));
        ContextScopeFuture::Scoped {
            future: context.instrument(future),
            start_response,
        }
    }
}

/// Response future of [`ContextScope`].
#[pin_project(project = ContextScopeProj)]
pub enum ContextScopeFuture<F> {
    Scoped {
        #[pin]
        future: ContextFuture<F>,
        start_response: StartResponse,
    },
    Failed {
        error: Option<ContextError>,
    },
}

impl<F, ResBody, E> Future for ContextScopeFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
    E: Into<BoxError>,
{
    type Output = Result<Response<ResBody>, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            ContextScopeProj::Scoped {
                future,
                start_response,
            } => {
                let response = match ready!(future.poll(cx)) {
                    Ok(response) => response,
                    Err(error) => return Poll::Ready(Err(error.into())),
                };
                start_response.call(&response);
                Poll::Ready(Ok(response))
            }
            ContextScopeProj::Failed { error } => Poll::Ready(Err(error.take().map_or_else(
                || BoxError::from("ContextScopeFuture polled after completion"),
                BoxError::from,
            ))),
        }
    }
}
