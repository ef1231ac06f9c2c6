use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use futures::FutureExt;
use reqscope_core::{ContextError, ContextVar, RequestContext, Template};
use reqscope_server::middleware::{
    AccessLogger, ContextScopeLayer, LogSink, LoggingLayer, RemoteUser, StartResponse,
};
use std::convert::Infallible;
use std::error::Error;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tower::{BoxError, Service, ServiceBuilder, ServiceExt, service_fn};
use tracing::Level;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct Record {
    level: Level,
    message: String,
    error: Option<String>,
}

/// Sink which saves all logged records.
#[derive(Default)]
struct RecordingSink(Mutex<Vec<Record>>);

impl RecordingSink {
    fn records(&self) -> Vec<Record> {
        self.0.lock().unwrap().clone()
    }

    fn messages(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.message).collect()
    }
}

impl LogSink for RecordingSink {
    fn log(&self, level: Level, message: &str, error: Option<&(dyn Error + 'static)>) {
        self.0.lock().unwrap().push(Record {
            level,
            message: message.to_string(),
            error: error.map(|e| e.to_string()),
        });
    }
}

#[derive(Debug, thiserror::Error)]
#[error("division by zero")]
struct DivisionByZero;

const REQUEST_LINE: &str = r#"Request "GET HTTP/1.1 /" from -, user agent "-", referer -"#;

async fn simple_app(_request: Request<Body>) -> Result<Response<Body>, Infallible> {
    let data = "Hello world!\n";
    Ok(Response::builder()
        .header("Content-type", "text/plain")
        .header("Content-length", data.len())
        .body(Body::from(data))
        .unwrap())
}

async fn error_app(_request: Request<Body>) -> Result<Response<Body>, DivisionByZero> {
    Err(DivisionByZero)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Access logger with the elapsed time fixed to 7 ms.
fn fixed_time_logger(sink: Arc<RecordingSink>) -> AccessLogger {
    AccessLogger::new(sink)
        .with_response_format(
            Template::parse("Response status {status} in 7 ms, size {rsize} bytes").unwrap(),
        )
        .with_exception_format(Template::parse("Exception in 7 ms.").unwrap())
}

fn error_is<E: Error + 'static>(error: &BoxError) -> bool {
    error.downcast_ref::<E>().is_some()
}

// ---------------------------------------------------------------------------
// ContextScopeLayer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_context_is_none_after_request() {
    RequestContext::reset();
    let app = ServiceBuilder::new()
        .layer(ContextScopeLayer::new())
        .service_fn(simple_app);
    assert_eq!(RequestContext::current(), None);
    let response = app.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(RequestContext::current(), None);
}

#[tokio::test]
async fn test_context_is_none_after_error() {
    RequestContext::reset();
    let app = ServiceBuilder::new()
        .layer(ContextScopeLayer::new())
        .service_fn(error_app);
    let error = app.oneshot(get("/")).await.unwrap_err();
    assert!(error_is::<DivisionByZero>(&error));
    assert_eq!(RequestContext::current(), None);
}

#[tokio::test]
async fn test_context_is_set_during_request() {
    RequestContext::reset();
    let app = ServiceBuilder::new()
        .layer(ContextScopeLayer::new())
        .service_fn(|request: Request<Body>| async move {
            let context = RequestContext::current().expect("context is active");
            assert_eq!(request.extensions().get::<RequestContext>(), Some(&context));
            assert_eq!(context.log_vars().get(ContextVar::Uri), "/");
            simple_app(request).await
        });
    let response = app.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_context_is_current_when_inner_service_is_called() {
    RequestContext::reset();
    let seen = Arc::new(Mutex::new(None));
    let seen_in_call = seen.clone();
    let app = ServiceBuilder::new()
        .layer(ContextScopeLayer::new())
        .service_fn(move |request: Request<Body>| {
            // Runs synchronously inside `ContextScope::call`.
            *seen_in_call.lock().unwrap() = RequestContext::current();
            simple_app(request)
        });
    app.oneshot(get("/")).await.unwrap();
    let seen = seen.lock().unwrap().clone().expect("context was current");
    assert_eq!(seen.log_vars().get(ContextVar::Status), "200");
}

#[tokio::test]
async fn test_duplicate_context_scope_raises() {
    RequestContext::reset();
    let called = Arc::new(AtomicBool::new(false));
    let called_in_app = called.clone();
    let app = ServiceBuilder::new()
        .layer(ContextScopeLayer::new())
        .layer(ContextScopeLayer::new())
        .service_fn(move |request| {
            called_in_app.store(true, Ordering::SeqCst);
            simple_app(request)
        });
    let error = app.oneshot(get("/")).await.unwrap_err();
    assert_eq!(
        error.downcast_ref::<ContextError>(),
        Some(&ContextError::AlreadyAttached)
    );
    assert!(!called.load(Ordering::SeqCst));
    assert_eq!(RequestContext::current(), None);
}

#[tokio::test]
async fn test_response_head_is_recorded() {
    RequestContext::reset();
    let captured = Arc::new(Mutex::new(None));
    let captured_in_app = captured.clone();
    let app = ServiceBuilder::new()
        .layer(ContextScopeLayer::new())
        .service_fn(move |request: Request<Body>| {
            *captured_in_app.lock().unwrap() = request.extensions().get::<RequestContext>().cloned();
            simple_app(request)
        });
    app.oneshot(get("/")).await.unwrap();

    let context = captured.lock().unwrap().clone().unwrap();
    let vars = context.log_vars();
    assert_eq!(vars.get(ContextVar::Status), "200");
    assert_eq!(vars.get(ContextVar::Rsize), "13");
}

#[tokio::test]
async fn test_handler_may_start_response_itself() {
    RequestContext::reset();
    let captured = Arc::new(Mutex::new(None));
    let captured_in_app = captured.clone();
    let app = ServiceBuilder::new()
        .layer(ContextScopeLayer::new())
        .service_fn(move |request: Request<Body>| {
            let captured = captured_in_app.clone();
            async move {
                let start_response = request.extensions().get::<StartResponse>().cloned().unwrap();
                let head = Response::builder()
                    .status(StatusCode::ACCEPTED)
                    .header("content-length", "XXX")
                    .body(())
                    .unwrap();
                assert!(start_response.call(&head));
                *captured.lock().unwrap() = request.extensions().get::<RequestContext>().cloned();
                simple_app(request).await
            }
        });
    app.oneshot(get("/")).await.unwrap();

    let vars = captured.lock().unwrap().clone().unwrap().log_vars();
    assert_eq!(vars.get(ContextVar::Status), "202");
    assert_eq!(vars.get(ContextVar::Rsize), "???");
}

#[tokio::test]
async fn test_nested_sub_request_pushes_second_context() {
    RequestContext::reset();
    let inner_app = ServiceBuilder::new()
        .layer(ContextScopeLayer::new())
        .service_fn(|request: Request<Body>| async move {
            let current = RequestContext::current().unwrap();
            assert_eq!(current.log_vars().get(ContextVar::Uri), "/inner");
            simple_app(request).await
        });
    let app = ServiceBuilder::new()
        .layer(ContextScopeLayer::new())
        .service_fn(move |request: Request<Body>| {
            let inner_app = inner_app.clone();
            async move {
                let outer = RequestContext::current().unwrap();
                assert_eq!(outer.log_vars().get(ContextVar::Uri), "/outer");

                let response = inner_app.oneshot(get("/inner")).await?;
                assert_eq!(response.status(), StatusCode::OK);

                assert_eq!(RequestContext::current(), Some(outer));
                let _ = request;
                Ok::<_, BoxError>(response)
            }
        });

    app.oneshot(get("/outer")).await.unwrap();
    assert_eq!(RequestContext::current(), None);
}

#[tokio::test]
async fn test_concurrent_requests_are_isolated() {
    RequestContext::reset();
    let app = ServiceBuilder::new()
        .layer(ContextScopeLayer::new())
        .service_fn(|request: Request<Body>| async move {
            let own = request.extensions().get::<RequestContext>().cloned().unwrap();
            for _ in 0..5 {
                assert_eq!(RequestContext::current(), Some(own.clone()));
                tokio::task::yield_now().await;
            }
            simple_app(request).await
        });

    let (a, b) = tokio::join!(
        app.clone().oneshot(get("/a")),
        app.clone().oneshot(get("/b"))
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(RequestContext::current(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_spawned_tasks_do_not_observe_request_context() {
    let app = ServiceBuilder::new()
        .layer(ContextScopeLayer::new())
        .service_fn(|request: Request<Body>| async move {
            let background = tokio::spawn(async { RequestContext::current() });
            assert_eq!(background.await.unwrap(), None);
            simple_app(request).await
        });
    app.oneshot(get("/")).await.unwrap();
}

// ---------------------------------------------------------------------------
// LoggingLayer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_request_and_response_are_logged() {
    RequestContext::reset();
    let sink = Arc::new(RecordingSink::default());
    let app = ServiceBuilder::new()
        .layer(ContextScopeLayer::new())
        .layer(LoggingLayer::with_logger(fixed_time_logger(sink.clone())))
        .service_fn(simple_app);

    let response = app.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        sink.records(),
        vec![
            Record {
                level: Level::INFO,
                message: REQUEST_LINE.to_string(),
                error: None,
            },
            Record {
                level: Level::INFO,
                message: "Response status 200 in 7 ms, size 13 bytes".to_string(),
                error: None,
            },
        ]
    );
}

#[tokio::test]
async fn test_default_response_format_reports_elapsed_time() {
    RequestContext::reset();
    let sink = Arc::new(RecordingSink::default());
    let app = ServiceBuilder::new()
        .layer(ContextScopeLayer::new())
        .layer(LoggingLayer::with_sink(sink.clone()))
        .service_fn(simple_app);
    app.oneshot(get("/")).await.unwrap();

    let messages = sink.messages();
    assert_eq!(messages.len(), 2);
    let rest = messages[1].strip_prefix("Response status 200 in ").unwrap();
    let (msecs, tail) = rest.split_once(' ').unwrap();
    assert!(msecs.parse::<u64>().is_ok());
    assert_eq!(tail, "ms, size 13 bytes");
}

#[tokio::test]
async fn test_default_exception_format_reports_elapsed_time() {
    RequestContext::reset();
    let sink = Arc::new(RecordingSink::default());
    let app = ServiceBuilder::new()
        .layer(ContextScopeLayer::new())
        .layer(LoggingLayer::with_sink(sink.clone()))
        .service_fn(error_app);
    app.oneshot(get("/")).await.unwrap_err();

    let records = sink.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].level, Level::ERROR);
    let msecs = records[1]
        .message
        .strip_prefix("Exception in ")
        .and_then(|rest| rest.strip_suffix(" ms."))
        .unwrap();
    assert!(msecs.parse::<u64>().is_ok());
}

#[tokio::test]
async fn test_exception_is_logged() {
    RequestContext::reset();
    let sink = Arc::new(RecordingSink::default());
    let app = ServiceBuilder::new()
        .layer(ContextScopeLayer::new())
        .layer(LoggingLayer::with_logger(fixed_time_logger(sink.clone())))
        .service_fn(error_app);

    let error = app.oneshot(get("/")).await.unwrap_err();
    assert!(error_is::<DivisionByZero>(&error));
    assert_eq!(
        sink.records(),
        vec![
            Record {
                level: Level::INFO,
                message: REQUEST_LINE.to_string(),
                error: None,
            },
            Record {
                level: Level::ERROR,
                message: "Exception in 7 ms.".to_string(),
                error: Some("division by zero".to_string()),
            },
        ]
    );
    assert_eq!(RequestContext::current(), None);
}

#[tokio::test]
async fn test_panic_is_logged_and_resumed() {
    RequestContext::reset();
    let sink = Arc::new(RecordingSink::default());
    let app = ServiceBuilder::new()
        .layer(ContextScopeLayer::new())
        .layer(LoggingLayer::with_logger(fixed_time_logger(sink.clone())))
        .service_fn(|_request: Request<Body>| async move {
            if true {
                panic!("boom");
            }
            Ok::<Response<Body>, Infallible>(Response::new(Body::empty()))
        });

    let outcome = AssertUnwindSafe(app.oneshot(get("/"))).catch_unwind().await;
    let payload = outcome.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));

    let records = sink.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].message, "Exception in 7 ms.");
    assert_eq!(records[1].error.as_deref(), Some("handler panicked: boom"));
    assert_eq!(RequestContext::current(), None);
}

#[tokio::test]
async fn test_missing_request_context_raises() {
    RequestContext::reset();
    let sink = Arc::new(RecordingSink::default());
    let called = Arc::new(AtomicBool::new(false));
    let called_in_app = called.clone();
    let app = ServiceBuilder::new()
        .layer(LoggingLayer::with_sink(sink.clone()))
        .service_fn(move |request| {
            called_in_app.store(true, Ordering::SeqCst);
            simple_app(request)
        });

    let error = app.oneshot(get("/")).await.unwrap_err();
    assert_eq!(
        error.downcast_ref::<ContextError>(),
        Some(&ContextError::MissingContext)
    );
    assert!(!called.load(Ordering::SeqCst));
    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn test_request_details_are_logged() {
    RequestContext::reset();
    let sink = Arc::new(RecordingSink::default());
    let mut app = ServiceBuilder::new()
        .layer(ContextScopeLayer::new())
        .layer(LoggingLayer::with_sink(sink.clone()))
        .service_fn(simple_app);

    let mut request = Request::builder()
        .method("POST")
        .uri("/submit?draft=1")
        .header("user-agent", "curl/8.0")
        .header("referer", "http://example.com/")
        .body(Body::empty())
        .unwrap();
    request
        .extensions_mut()
        .insert(axum::extract::ConnectInfo(std::net::SocketAddr::from((
            [192, 168, 1, 20],
            40000,
        ))));
    request
        .extensions_mut()
        .insert(RemoteUser("alice".to_string()));

    let response = app.ready().await.unwrap().call(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        sink.messages()[0],
        r#"Request "POST HTTP/1.1 /submit?draft=1" from 192.168.1.20, user agent "curl/8.0", referer http://example.com/"#
    );
}

#[tokio::test]
async fn test_application_records_share_request_context() {
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Clone, Default)]
    struct Lines(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Lines {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    RequestContext::reset();
    let lines = Lines::default();
    let writer = lines.clone();
    let subscriber = tracing_subscriber::registry().with(
        reqscope_core::augment_layer("[{uri}] {level}:{name}:{message}")
            .unwrap()
            .with_writer(move || writer.clone()),
    );
    let _default = tracing::subscriber::set_default(subscriber);

    let app = ServiceBuilder::new()
        .layer(ContextScopeLayer::new())
        .layer(LoggingLayer::new())
        .service_fn(|request: Request<Body>| async move {
            tracing::info!(target: "app", "handling");
            simple_app(request).await
        });
    app.oneshot(get("/hello?x=1")).await.unwrap();
    tracing::info!(target: "app", "idle");

    let output = String::from_utf8(lines.0.lock().unwrap().clone()).unwrap();
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(
        lines[0],
        r#"[/hello?x=1] INFO:wsgi:Request "GET HTTP/1.1 /hello?x=1" from -, user agent "-", referer -"#
    );
    assert_eq!(lines[1], "[/hello?x=1] INFO:app:handling");
    assert!(lines[2].starts_with("[/hello?x=1] INFO:wsgi:Response status 200 in "));
    assert_eq!(lines[3], "[-] INFO:app:idle");
}
