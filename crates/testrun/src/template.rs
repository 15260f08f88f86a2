//! Rendering of the resource template submitted by `create`

use std::collections::BTreeMap;
use std::path::Path;

use handlebars::Handlebars;
use kube::api::DynamicObject;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Values available to a template
#[derive(Debug, Clone, Default, Serialize)]
pub struct TemplateContext {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub build_number: String,
    pub env: BTreeMap<String, String>,
}

pub trait TemplateRenderer: Send + Sync {
    /// Render the template at `path` into a resource record
    fn render(&self, path: &Path, context: &TemplateContext) -> Result<DynamicObject>;
}

/// Handlebars renderer; templates without expressions are passed through unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct HandlebarsRenderer;

impl HandlebarsRenderer {
    pub fn render_str(&self, name: &str, text: &str, context: &TemplateContext) -> Result<DynamicObject> {
        let template_error = |message: String| Error::Template {
            path: name.to_string(),
            message,
        };

        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars
            .register_template_string(name, text)
            .map_err(|e| template_error(format!("invalid template: {e}")))?;
        let rendered = handlebars
            .render(name, context)
            .map_err(|e| template_error(e.to_string()))?;

        let value: Value = serde_yaml::from_str(&rendered)
            .map_err(|e| template_error(format!("rendered output is not valid YAML: {e}")))?;
        if value.get("apiVersion").is_none() || value.get("kind").is_none() {
            return Err(template_error(
                "rendered resource has no apiVersion or kind".to_string(),
            ));
        }
        serde_json::from_value(value).map_err(|e| template_error(e.to_string()))
    }
}

impl TemplateRenderer for HandlebarsRenderer {
    fn render(&self, path: &Path, context: &TemplateContext) -> Result<DynamicObject> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Template {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        self.render_str(&path.display().to_string(), &text, context)
    }
}
