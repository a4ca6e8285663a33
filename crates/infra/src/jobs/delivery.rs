//! Rendering and transport seams used by workers.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use super::types::TemplateData;

/// Delivery error. Every variant counts as a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("template error: {0}")]
    Template(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// A rendered message ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Turns a template reference plus data into a message body.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, data: &TemplateData) -> Result<String, DeliveryError>;
}

/// Sends a rendered message; succeeds or fails, nothing in between.
pub trait MessageTransport: Send + Sync {
    fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError>;
}

impl<R: TemplateRenderer + ?Sized> TemplateRenderer for Arc<R> {
    fn render(&self, template: &str, data: &TemplateData) -> Result<String, DeliveryError> {
        (**self).render(template, data)
    }
}

impl<T: MessageTransport + ?Sized> MessageTransport for Arc<T> {
    fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        (**self).send(message)
    }
}

/// Replace `{{.Key}}` placeholders with values from `data`.
///
/// Unknown keys render as an empty string. String values are inserted raw;
/// other JSON values use their JSON text.
pub fn fill_placeholders(source: &str, data: &TemplateData) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        out.push_str(&rest[..start]);

        let inner = rest[start + 2..start + 2 + len].trim();
        match inner.strip_prefix('.') {
            Some(key) => match data.get(key) {
                Some(Value::String(s)) => out.push_str(s),
                Some(Value::Null) | None => {}
                Some(other) => out.push_str(&other.to_string()),
            },
            // Not a field reference; keep it verbatim.
            None => out.push_str(&rest[start..start + 4 + len]),
        }
        rest = &rest[start + 4 + len..];
    }

    out.push_str(rest);
    out
}

/// Renders templates read from files under one directory.
#[derive(Debug, Clone)]
pub struct FileTemplateRenderer {
    dir: PathBuf,
}

impl FileTemplateRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn resolve(&self, template: &str) -> Result<PathBuf, DeliveryError> {
        let relative = Path::new(template);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(DeliveryError::Template(format!(
                "template path not allowed: {template}"
            )));
        }
        Ok(self.dir.join(relative))
    }
}

impl TemplateRenderer for FileTemplateRenderer {
    fn render(&self, template: &str, data: &TemplateData) -> Result<String, DeliveryError> {
        let path = self.resolve(template)?;
        let source = std::fs::read_to_string(&path)
            .map_err(|e| DeliveryError::Template(format!("{}: {e}", path.display())))?;
        Ok(fill_placeholders(&source, data))
    }
}

/// Renders templates registered in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTemplateRenderer {
    templates: HashMap<String, String>,
}

impl MemoryTemplateRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.templates.insert(name.into(), source.into());
        self
    }
}

impl TemplateRenderer for MemoryTemplateRenderer {
    fn render(&self, template: &str, data: &TemplateData) -> Result<String, DeliveryError> {
        self.templates
            .get(template)
            .map(|source| fill_placeholders(source, data))
            .ok_or_else(|| DeliveryError::Template(format!("unknown template: {template}")))
    }
}

/// Transport that only logs. For development and dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

impl MessageTransport for LogTransport {
    fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        info!(
            to = %message.to,
            subject = %message.subject,
            body_bytes = message.body.len(),
            "message delivered to log transport"
        );
        Ok(())
    }
}
