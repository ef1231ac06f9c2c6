use super::request_context::StartResponse;
use axum::http::{Request, Response};
use pin_project::pin_project;
use reqscope_core::augment::error_chain;
use reqscope_core::template::{EXCEPTION_FORMAT, REQUEST_FORMAT, RESPONSE_FORMAT};
use reqscope_core::{ContextError, RequestContext, Template};
use std::any::Any;
use std::borrow::Cow;
use std::error::Error;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, LazyLock};
use std::task::{Context, Poll};
use tower::{BoxError, Layer, Service};
use tracing::Level;

/// Logger name used when none is given.
pub const DEFAULT_LOGGER: &str = "wsgi";

/// Destination of access log records.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: &str, error: Option<&(dyn Error + 'static)>);
}

/// Emits records as `tracing` events carrying a `logger` field.
///
/// The name is a field, not the event target: every record has this
/// module's target, so `EnvFilter` directives cannot set levels or route
/// output per logger name. Only formatters reading the `logger` field (such as
/// `ContextFormat`'s `{name}`) see it. Supply your own [`LogSink`] when names
/// must select destinations.
#[derive(Debug, Clone)]
pub struct TracingSink {
    name: Cow<'static, str>,
}

impl TracingSink {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for TracingSink {
    fn default() -> Self {
        Self::new(DEFAULT_LOGGER)
    }
}

macro_rules! event_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            Level::ERROR => tracing::error!($($arg)+),
            Level::WARN => tracing::warn!($($arg)+),
            Level::INFO => tracing::info!($($arg)+),
            Level::DEBUG => tracing::debug!($($arg)+),
            _ => tracing::trace!($($arg)+),
        }
    };
}

impl LogSink for TracingSink {
    fn log(&self, level: Level, message: &str, error: Option<&(dyn Error + 'static)>) {
        let logger = self.name();
        match error {
            Some(error) => {
                let error = error_chain(error);
                event_at!(level, logger, error = %error, "{}", message);
            }
            None => event_at!(level, logger, "{}", message),
        }
    }
}

/// The three access log templates.
#[derive(Debug, Clone)]
pub struct AccessFormats {
    pub request: Template,
    pub response: Template,
    pub exception: Template,
}

static DEFAULT_FORMATS: LazyLock<AccessFormats> = LazyLock::new(AccessFormats::default);

impl Default for AccessFormats {
    fn default() -> Self {
        let parse = |source: &str| Template::parse(source).expect("built-in access format is valid");
        Self {
            request: parse(REQUEST_FORMAT),
            response: parse(RESPONSE_FORMAT),
            exception: parse(EXCEPTION_FORMAT),
        }
    }
}

/// Emission steps of [`LoggingLayer`].
///
/// Every step has a default implementation rendering [`formats`](Self::formats)
/// into [`sink`](Self::sink); implement the trait to replace any of them.
pub trait RequestLogger: Send + Sync + 'static {
    fn sink(&self) -> &dyn LogSink;

    fn formats(&self) -> &AccessFormats {
        &DEFAULT_FORMATS
    }

    /// Logs the request line before the inner service runs.
    fn log_request(&self, context: &RequestContext) {
        let message = self.formats().request.render(&context.log_vars());
        self.sink().log(Level::INFO, &message, None);
    }

    /// Logs the completed response.
    fn log_response(&self, context: &RequestContext) {
        let message = self.formats().response.render(&context.log_vars());
        self.sink().log(Level::INFO, &message, None);
    }

    /// Logs a failure of the inner service.
    fn log_exception(&self, context: &RequestContext, error: &(dyn Error + 'static)) {
        let message = self.formats().exception.render(&context.log_vars());
        self.sink().log(Level::ERROR, &message, Some(error));
    }
}

/// Default [`RequestLogger`].
#[derive(Clone)]
pub struct AccessLogger {
    sink: Arc<dyn LogSink>,
    formats: AccessFormats,
}

impl AccessLogger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            formats: DEFAULT_FORMATS.clone(),
        }
    }

    /// Logs through `tracing` under the logger `name`.
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Arc::new(TracingSink::new(name)))
    }

    pub fn with_request_format(mut self, template: Template) -> Self {
        self.formats.request = template;
        self
    }

    pub fn with_response_format(mut self, template: Template) -> Self {
        self.formats.response = template;
        self
    }

    pub fn with_exception_format(mut self, template: Template) -> Self {
        self.formats.exception = template;
        self
    }
}

impl Default for AccessLogger {
    fn default() -> Self {
        Self::named(DEFAULT_LOGGER)
    }
}

impl RequestLogger for AccessLogger {
    fn sink(&self) -> &dyn LogSink {
        self.sink.as_ref()
    }

    fn formats(&self) -> &AccessFormats {
        &self.formats
    }
}

/// A panic raised by the inner service, as seen by [`RequestLogger::log_exception`].
#[derive(Debug, thiserror::Error)]
#[error("handler panicked: {0}")]
pub struct HandlerPanic(pub String);

impl HandlerPanic {
    fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self(message)
    }
}

/// Layer logging every request and its outcome.
///
/// Requires [`ContextScopeLayer`](super::request_context::ContextScopeLayer)
/// outside of it: `ContextScopeLayer` → `LoggingLayer` → service.
pub struct LoggingLayer<L = AccessLogger> {
    logger: Arc<L>,
}

impl<L> Clone for LoggingLayer<L> {
    fn clone(&self) -> Self {
        Self {
            logger: self.logger.clone(),
        }
    }
}

impl LoggingLayer {
    /// Logs under the default `wsgi` logger.
    pub fn new() -> Self {
        Self::with_logger(AccessLogger::default())
    }

    /// Logs under `name`; see [`TracingSink`] for how far the name reaches.
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self::with_logger(AccessLogger::named(name))
    }

    pub fn with_sink(sink: Arc<dyn LogSink>) -> Self {
        Self::with_logger(AccessLogger::new(sink))
    }
}

impl Default for LoggingLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: RequestLogger> LoggingLayer<L> {
    pub fn with_logger(logger: L) -> Self {
        Self {
            logger: Arc::new(logger),
        }
    }

    pub fn logger(&self) -> &L {
        &self.logger
    }
}

impl<S, L> Layer<S> for LoggingLayer<L> {
    type Service = LoggingService<S, L>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingService {
            inner,
            logger: self.logger.clone(),
        }
    }
}

/// Service created by [`LoggingLayer`].
pub struct LoggingService<S, L = AccessLogger> {
    inner: S,
    logger: Arc<L>,
}

impl<S: Clone, L> Clone for LoggingService<S, L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            logger: self.logger.clone(),
        }
    }
}

impl<S, L, ReqBody, ResBody> Service<Request<ReqBody>> for LoggingService<S, L>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
    L: RequestLogger,
{
    type Response = Response<ResBody>;
    type Error = BoxError;
    type Future = LoggingFuture<S::Future, L>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let Some(context) = request.extensions().get::<RequestContext>().cloned() else {
            return LoggingFuture::Failed {
                error: Some(ContextError::MissingContext),
            };
        };
        let start_response = request.extensions().get::<StartResponse>().cloned();

        self.logger.log_request(&context);
        let future = match panic::catch_unwind(AssertUnwindSafe(|| self.inner.call(request))) {
            Ok(future) => future,
            Err(payload) => {
                self.logger
                    .log_exception(&context, &HandlerPanic::from_payload(payload.as_ref()));
                panic::resume_unwind(payload);
            }
        };

        LoggingFuture::Logging {
            future,
            context,
            start_response,
            logger: self.logger.clone(),
        }
    }
}

/// Response future of [`LoggingService`].
#[pin_project(project = LoggingProj)]
pub enum LoggingFuture<F, L> {
    Logging {
        #[pin]
        future: F,
        context: RequestContext,
        start_response: Option<StartResponse>,
        logger: Arc<L>,
    },
    Failed {
        error: Option<ContextError>,
    },
}

impl<F, L, ResBody, E> Future for LoggingFuture<F, L>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
    E: Into<BoxError>,
    L: RequestLogger,
{
    type Output = Result<Response<ResBody>, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            LoggingProj::Logging {
                future,
                context,
                start_response,
                logger,
            } => {
                let result = match panic::catch_unwind(AssertUnwindSafe(|| future.poll(cx))) {
                    Ok(Poll::Pending) => return Poll::Pending,
                    Ok(Poll::Ready(result)) => result,
                    Err(payload) => {
                        logger.log_exception(context, &HandlerPanic::from_payload(payload.as_ref()));
                        panic::resume_unwind(payload);
                    }
                };
                match result {
                    Ok(response) => {
                        if let Some(start_response) = start_response {
                            start_response.call(&response);
                        }
                        logger.log_response(context);
                        Poll::Ready(Ok(response))
                    }
                    Err(error) => {
                        let error: BoxError = error.into();
                        logger.log_exception(context, &*error);
                        Poll::Ready(Err(error))
                    }
                }
            }
            LoggingProj::Failed { error } => Poll::Ready(Err(error.take().map_or_else(
                || BoxError::from("LoggingFuture polled after completion"),
                BoxError::from,
            ))),
        }
    }
}
