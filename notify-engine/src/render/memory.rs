//! In-memory template renderer with `${name}` placeholders.

use std::collections::HashMap;
use std::sync::LazyLock;

use notify_params::Params;
use parking_lot::RwLock;
use regex::Regex;

use super::{RenderError, TemplateRenderer};
use crate::model::{Message, MessageKind, Version};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z0-9_.\-]+)\}").unwrap());

#[derive(Debug, Clone)]
struct Template {
    kind: MessageKind,
    source: String,
}

/// Templates registered per key and version.
///
/// A missing `Short` template falls back to the `Long` one.
#[derive(Default)]
pub struct MemoryTemplateRenderer {
    templates: RwLock<HashMap<(String, Version), Template>>,
}

impl MemoryTemplateRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        key: impl Into<String>,
        version: Version,
        kind: MessageKind,
        source: impl Into<String>,
    ) {
        self.templates.write().insert(
            (key.into(), version),
            Template {
                kind,
                source: source.into(),
            },
        );
    }

    fn lookup(&self, key: &str, version: Version) -> Option<Template> {
        let templates = self.templates.read();
        templates
            .get(&(key.to_string(), version))
            .or_else(|| templates.get(&(key.to_string(), Version::Long)))
            .cloned()
    }
}

/// Replace every `${name}` with the named param.
fn substitute(source: &str, params: &Params) -> Result<String, RenderError> {
    let mut out = String::with_capacity(source.len());
    let mut last = 0;
    for caps in PLACEHOLDER_RE.captures_iter(source) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = params
            .get_value(name.as_str())
            .ok_or_else(|| RenderError::MissingParam(name.as_str().to_string()))?;
        out.push_str(&source[last..whole.start()]);
        out.push_str(&value.to_string());
        last = whole.end();
    }
    out.push_str(&source[last..]);
    Ok(out)
}

impl TemplateRenderer for MemoryTemplateRenderer {
    fn render(
        &self,
        template_key: &str,
        version: Version,
        params: &Params,
    ) -> Result<Message, RenderError> {
        let template = self
            .lookup(template_key, version)
            .ok_or_else(|| RenderError::TemplateNotFound(template_key.to_string()))?;
        let raw = substitute(&template.source, params)?;
        Message::parse(&raw, template.kind)
    }
}
