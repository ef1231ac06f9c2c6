//! Enrichment of log records with variables of the current request.
//!
//! [`ContextLogAugmenter`] reads the context at the top of the calling
//! execution unit's stack. [`ContextFormat`] pairs it with a [`Template`] and
//! plugs into `tracing-subscriber` as an event formatter, so every record
//! written through that sink carries the request variables, whichever code
//! emitted it.
//!
//! Attach the formatter to an output layer, not to a per-target filter; it
//! must run once per written record.

use crate::context::RequestContext;
use crate::error::TemplateError;
use crate::template::{Placeholder, RecordField, Template};
use crate::vars::{ContextVar, MISSING};
use std::fmt::{self, Write};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::{DefaultFields, Writer};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Injects selected context variables into log records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextLogAugmenter {
    keys: Vec<ContextVar>,
}

/// Values produced by [`ContextLogAugmenter::augment`] for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AugmentedVars {
    values: Vec<(ContextVar, String)>,
}

impl AugmentedVars {
    /// Value of `var`, or `-` if the augmenter was not configured for it.
    pub fn get(&self, var: ContextVar) -> &str {
        self.values
            .iter()
            .find(|(key, _)| *key == var)
            .map_or(MISSING, |(_, value)| value.as_str())
    }
}

impl ContextLogAugmenter {
    pub fn new(keys: impl IntoIterator<Item = ContextVar>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    /// Builds an augmenter for exactly the variables `template` references.
    pub fn from_template(template: &Template) -> Self {
        Self::new(template.context_vars())
    }

    pub fn keys(&self) -> &[ContextVar] {
        &self.keys
    }

    /// Reads the configured keys from the current context.
    ///
    /// Every key gets a value; with no active context all are `-`. Records
    /// are never rejected.
    pub fn augment(&self) -> AugmentedVars {
        let vars = RequestContext::current().map(|context| context.log_vars());
        let values = self
            .keys
            .iter()
            .map(|&key| {
                let value = vars.as_ref().map_or(MISSING, |vars| vars.get(key));
                (key, value.to_string())
            })
            .collect();
        AugmentedVars { values }
    }
}

/// Event formatter rendering records through a template with request variables.
#[derive(Debug, Clone)]
pub struct ContextFormat {
    template: Template,
    augmenter: ContextLogAugmenter,
}

impl ContextFormat {
    pub fn new(format: &str) -> Result<Self, TemplateError> {
        Ok(Self::from_template(Template::parse(format)?))
    }

    pub fn from_template(template: Template) -> Self {
        let augmenter = ContextLogAugmenter::from_template(&template);
        Self {
            template,
            augmenter,
        }
    }

    pub fn augmenter(&self) -> &ContextLogAugmenter {
        &self.augmenter
    }
}

impl<S, N> FormatEvent<S, N> for ContextFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let augmented = self.augmenter.augment();
        let mut record = RecordVisitor::default();
        event.record(&mut record);
        let metadata = event.metadata();
        let name = record.logger.as_deref().unwrap_or(metadata.target());

        self.template
            .render_with(&mut writer, |out, placeholder| match placeholder {
                Placeholder::Context(var) => out.write_str(augmented.get(var)),
                Placeholder::Record(RecordField::Level) => write!(out, "{}", metadata.level()),
                Placeholder::Record(RecordField::Name) => out.write_str(name),
                Placeholder::Record(RecordField::Message) => {
                    out.write_str(&record.message)?;
                    out.write_str(&record.fields)
                }
            })?;
        if let Some(error) = &record.error {
            write!(writer, "\n{error}")?;
        }
        writeln!(writer)
    }
}

/// Collects the message, logger name, error and remaining fields of an event.
#[derive(Default)]
struct RecordVisitor {
    message: String,
    logger: Option<String>,
    error: Option<String>,
    fields: String,
}

impl RecordVisitor {
    fn record_value(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = value,
            "logger" => self.logger = Some(value),
            "error" => self.error = Some(value),
            name => {
                let _ = write!(self.fields, " {name}={value}");
            }
        }
    }
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_value(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.record_value(field, error_chain(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_value(field, format!("{value:?}"));
    }
}

/// Formats an error followed by its sources, one `Caused by:` line each.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(out, "\nCaused by: {cause}");
        source = cause.source();
    }
    out
}

/// Builds an output layer writing records through `format`.
pub fn augment_layer<S>(
    format: &str,
) -> Result<tracing_subscriber::fmt::Layer<S, DefaultFields, ContextFormat>, TemplateError>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    Ok(tracing_subscriber::fmt::layer().event_format(ContextFormat::new(format)?))
}
