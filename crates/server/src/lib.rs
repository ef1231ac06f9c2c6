pub mod handler;
pub mod middleware;

use axum::body::Body;
use axum::error_handling::HandleErrorLayer;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use middleware::{ContextScopeLayer, LoggingLayer, ScriptName};
use reqscope_core::ContextError;
use reqscope_core::config::Config;
use std::convert::Infallible;
use tower::{BoxError, Service, ServiceBuilder};
use tower_http::add_extension::AddExtensionLayer;

/// Builds the example application wrapped in the request-context and access
/// logging middleware (outer → inner).
pub fn build_app(
    config: &Config,
) -> impl Service<Request<Body>, Response = Response, Error = Infallible, Future: Send>
+ Clone
+ Send
+ 'static {
    ServiceBuilder::new()
        .layer(HandleErrorLayer::new(handle_error))
        .layer(AddExtensionLayer::new(ScriptName(config.script_name.clone())))
        .layer(ContextScopeLayer::new())
        .layer(LoggingLayer::named(config.access_logger.clone()))
        .service_fn(handler::example::example_app)
}

/// Turns errors escaping the middleware into `500` responses.
///
/// Handler failures were already logged by the access logger; misuse of the
/// middleware is logged here.
pub async fn handle_error(error: BoxError) -> (StatusCode, &'static str) {
    if let Some(misuse) = error.downcast_ref::<ContextError>() {
        tracing::error!("request middleware misconfigured: {misuse}");
    }
    (StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error")
}
