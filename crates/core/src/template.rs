//! `{placeholder}` templates rendered from [`LogVars`].
//!
//! Placeholders name either a [`ContextVar`] (`{addr}`, `{msecs}`, ...) or a
//! field of the log record itself (`{message}`, `{level}`, `{name}`). Literal
//! braces are written as `{{` and `}}`.

use crate::error::TemplateError;
use crate::vars::{ContextVar, LogVars, MISSING};
use std::fmt::{self, Write};
use std::str::FromStr;

/// Request-line template of the access logger.
pub const REQUEST_FORMAT: &str =
    r#"Request "{method} {proto} {uri}" from {addr}, user agent "{uagent}", referer {referer}"#;

/// Response template of the access logger.
pub const RESPONSE_FORMAT: &str = "Response status {status} in {msecs} ms, size {rsize} bytes";

/// Exception template of the access logger.
pub const EXCEPTION_FORMAT: &str = "Exception in {msecs} ms.";

/// Default format for log lines augmented with request variables.
pub const BASIC_FORMAT: &str = "[{addr}] {level}:{name}:{message}";

/// Field of a log record that a template can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordField {
    Message,
    Level,
    /// Logger name, or the event target when no logger is named.
    Name,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Context(ContextVar),
    Record(RecordField),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl FromStr for Template {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Template::parse(s)
    }
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((offset, c)) = chars.next() {
            match c {
                '{' if chars.next_if(|&(_, c)| c == '{').is_some() => literal.push('{'),
                '}' if chars.next_if(|&(_, c)| c == '}').is_some() => literal.push('}'),
                '}' => return Err(TemplateError::UnmatchedClose(offset)),
                '{' => {
                    let rest = &source[offset + 1..];
                    let end = rest.find('}').ok_or(TemplateError::Unclosed(offset))?;
                    let name = &rest[..end];
                    let placeholder = parse_placeholder(name).ok_or_else(|| {
                        TemplateError::UnknownPlaceholder {
                            name: name.to_string(),
                            offset,
                        }
                    })?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(placeholder));
                    // Skip the name and the closing brace.
                    for _ in 0..=name.chars().count() {
                        chars.next();
                    }
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }

    /// Context variables referenced by this template, in order of first use.
    pub fn context_vars(&self) -> Vec<ContextVar> {
        let mut vars = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder(Placeholder::Context(var)) = segment
                && !vars.contains(var)
            {
                vars.push(*var);
            }
        }
        vars
    }

    /// Renders the template, resolving each placeholder through `resolve`.
    pub fn render_with<W, F>(&self, out: &mut W, mut resolve: F) -> fmt::Result
    where
        W: Write,
        F: FnMut(&mut W, Placeholder) -> fmt::Result,
    {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.write_str(text)?,
                Segment::Placeholder(placeholder) => resolve(out, *placeholder)?,
            }
        }
        Ok(())
    }

    /// Renders context variables from `vars`; record fields render as `-`.
    pub fn render(&self, vars: &LogVars) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.render_with(&mut out, |out, placeholder| match placeholder {
            Placeholder::Context(var) => out.write_str(vars.get(var)),
            Placeholder::Record(_) => out.write_str(MISSING),
        });
        out
    }
}

fn parse_placeholder(name: &str) -> Option<Placeholder> {
    match name {
        "message" => Some(Placeholder::Record(RecordField::Message)),
        "level" | "levelname" => Some(Placeholder::Record(RecordField::Level)),
        "name" => Some(Placeholder::Record(RecordField::Name)),
        other => other.parse().ok().map(Placeholder::Context),
    }
}
