//! Per-request context for logging in HTTP services.
//!
//! A [`RequestContext`] is created for each request and pushed onto a stack
//! local to the current execution unit. Any code running on behalf of that
//! request, including third-party logging call sites, can find it through
//! [`RequestContext::current`] and the [`ContextFormat`] event formatter.

pub mod augment;
pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod stack;
pub mod template;
pub mod vars;

pub use augment::{ContextFormat, ContextLogAugmenter, augment_layer};
pub use context::{RequestContext, RequestMeta};
pub use error::{ContextError, TemplateError};
pub use stack::{ContextFuture, ContextGuard, ContextStack};
pub use template::Template;
pub use vars::{ContextVar, LogVars};
