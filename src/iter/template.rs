//! Destination-name templates
//!
//! Names are rendered with [`tera`] from a [`NameContext`]. Available fields:
//! `dialog_id`, `message_id`, `message_date`, `file_name`, `file_size`,
//! `download_date` and `author_id`.

use super::{IterError, SessionError};
use serde::Serialize;
use tera::{Context, Tera};

/// Template used when the caller does not provide one
pub const DEFAULT_TEMPLATE: &str = "{{ dialog_id }}_{{ message_id }}_{{ file_name }}";

const TEMPLATE_NAME: &str = "name";

/// Values a destination name can be built from
#[derive(Debug, Clone, Serialize)]
pub struct NameContext {
    /// Conversation id
    pub dialog_id: i64,
    /// Message id
    pub message_id: i32,
    /// Message send time (Unix seconds)
    pub message_date: i64,
    /// Original file name
    pub file_name: String,
    /// Human-readable size, e.g. `1.5 MiB`
    pub file_size: String,
    /// Time the name was rendered (Unix seconds)
    pub download_date: i64,
    /// Author id, 0 when unknown
    pub author_id: i64,
}

/// Parsed destination-name template
#[derive(Debug, Clone)]
pub struct NameTemplate {
    tera: Tera,
}

impl NameTemplate {
    /// Parse `source`; a syntax error is a setup failure
    pub fn parse(source: &str) -> Result<Self, SessionError> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, source)
            .map_err(|e| SessionError::Template(error_chain(&e)))?;
        Ok(Self { tera })
    }

    /// Render a name for `ctx`
    pub fn render(&self, ctx: &NameContext) -> Result<String, IterError> {
        let context =
            Context::from_serialize(ctx).map_err(|e| IterError::TemplateError(error_chain(&e)))?;
        self.tera
            .render(TEMPLATE_NAME, &context)
            .map_err(|e| IterError::TemplateError(error_chain(&e)))
    }
}

/// Tera reports the useful detail in the error's source chain
fn error_chain(e: &tera::Error) -> String {
    let mut msg = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(inner) = source {
        msg.push_str(": ");
        msg.push_str(&inner.to_string());
        source = inner.source();
    }
    msg
}

/// Format `bytes` with binary units (`512 B`, `1.5 KiB`, `42 MiB`)
pub fn format_binary_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if value < 10.0 {
        format!("{value:.1} {}", UNITS[unit])
    } else {
        format!("{value:.0} {}", UNITS[unit])
    }
}
