//! Execution-unit-local stack of active [`RequestContext`]s.
//!
//! Each thread owns its own stack. Async code gets one stack per task by
//! wrapping the task's future in [`ContextFuture`], which pushes its context
//! before every poll and restores the previous depth afterwards, so tasks
//! interleaved on one thread never see each other's contexts.
//!
//! Nesting is supported: a request handled inside another (an internal
//! sub-request) pushes a second context which stays current until popped.

use crate::context::RequestContext;
use crate::error::ContextError;
use pin_project::pin_project;
use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<RequestContext>> = const { RefCell::new(Vec::new()) };
}

/// Read-only view of the calling thread's stack.
pub struct ContextStack;

impl ContextStack {
    /// Number of contexts on the calling thread's stack.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }
}

impl RequestContext {
    /// Returns the context at the top of the calling thread's stack.
    pub fn current() -> Option<RequestContext> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Clears the calling thread's stack.
    ///
    /// Prefer [`pop`](Self::pop); this exists to restore state in tests.
    pub fn reset() {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().clear());
    }

    /// Makes this context current for the calling thread.
    pub fn push(&self) {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(self.clone()));
    }

    /// Removes this context from the top of the calling thread's stack.
    ///
    /// Fails without touching the stack if it is empty or another context is
    /// on top.
    pub fn pop(&self) -> Result<(), ContextError> {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            match stack.last() {
                None => Err(ContextError::EmptyStack),
                Some(top) if top != self => Err(ContextError::NotOnTop),
                Some(_) => {
                    stack.pop();
                    Ok(())
                }
            }
        })
    }

    /// Pushes this context and returns a guard that pops it when dropped.
    ///
    /// The guard must not be held across an `.await`: the task may resume on
    /// another thread, and other tasks polled in between would see this
    /// context. Use [`instrument`](Self::instrument) for async code.
    pub fn enter(&self) -> ContextGuard {
        self.push();
        ContextGuard {
            context: Some(self.clone()),
            _not_send: PhantomData,
        }
    }

    /// Runs `f` with this context current.
    pub fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter();
        f()
    }

    /// Wraps `future` so that this context is current while it is polled.
    pub fn instrument<F: Future>(&self, future: F) -> ContextFuture<F> {
        ContextFuture {
            inner: future,
            context: self.clone(),
        }
    }
}

/// Scoped acquisition of a [`RequestContext`]; see [`RequestContext::enter`].
#[must_use = "the context is popped as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ContextGuard {
    context: Option<RequestContext>,
    // Bound to the thread whose stack it pushed onto.
    _not_send: PhantomData<*const ()>,
}

impl ContextGuard {
    /// Pops the context now, reporting misuse instead of panicking.
    pub fn exit(mut self) -> Result<(), ContextError> {
        match self.context.take() {
            Some(context) => context.pop(),
            None => Ok(()),
        }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let Some(context) = self.context.take() else {
            return;
        };
        if let Err(e) = context.pop()
            && !std::thread::panicking()
        {
            panic!("{e}");
        }
    }
}

/// Future returned by [`RequestContext::instrument`].
#[pin_project]
#[derive(Debug)]
pub struct ContextFuture<F> {
    #[pin]
    inner: F,
    context: RequestContext,
}

impl<F: Future> Future for ContextFuture<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _restore = RestoreDepth::push(this.context);
        this.inner.poll(cx)
    }
}

/// Pushes a context for one poll and afterwards truncates the stack back to
/// its previous depth, dropping anything the poll left behind.
struct RestoreDepth {
    depth: usize,
}

impl RestoreDepth {
    fn push(context: &RequestContext) -> Self {
        let depth = ContextStack::depth();
        context.push();
        Self { depth }
    }
}

impl Drop for RestoreDepth {
    fn drop(&mut self) {
        let found = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let found = stack.len();
            stack.truncate(self.depth);
            found
        });
        // Logged after the borrow ends; formatters read the stack.
        if found != self.depth + 1 && !std::thread::panicking() {
            tracing::error!(
                expected = self.depth + 1,
                found,
                "request context stack unbalanced after poll, restoring"
            );
        }
    }
}
