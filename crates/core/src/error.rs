/// Misuse of the request-context machinery.
///
/// These signal wiring bugs in the host application, never bad request data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error(
        "RequestContext is already present in request extensions. \
         ContextScopeLayer must be applied only once."
    )]
    AlreadyAttached,

    #[error(
        "RequestContext is not present in request extensions. \
         LoggingLayer requires ContextScopeLayer."
    )]
    MissingContext,

    #[error("RequestContext stack is empty.")]
    EmptyStack,

    #[error("Wrong RequestContext at top of stack.")]
    NotOnTop,
}

/// Failure to parse a `{placeholder}` template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unknown placeholder {{{name}}} at offset {offset}")]
    UnknownPlaceholder { name: String, offset: usize },

    #[error("unclosed placeholder starting at offset {0}")]
    Unclosed(usize),

    #[error("unmatched '}}' at offset {0}")]
    UnmatchedClose(usize),
}
