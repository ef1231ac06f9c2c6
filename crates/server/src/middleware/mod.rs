pub mod request_context;
pub mod request_logging;

pub use request_context::{
    ContextScope, ContextScopeLayer, RemoteUser, ScriptName, StartResponse, request_meta,
};
pub use request_logging::{
    AccessFormats, AccessLogger, HandlerPanic, LogSink, LoggingLayer, LoggingService,
    RequestLogger, TracingSink,
};
