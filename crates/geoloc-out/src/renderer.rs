//! Template rendering for narrative prompts.
//!
//! Uses Handlebars with escaping turned off (output is plain text for a
//! language model, not HTML) and a few helpers:
//! - percent: 0.85 -> "85%"
//! - meters: 35.4 -> "35m"
//! - inc: zero-based index -> one-based

use handlebars::{handlebars_helper, no_escape, Handlebars};
use serde_json::Value;

use crate::templates::TemplatesFile;

handlebars_helper!(percent: |v: f64| format!("{}%", (v * 100.0).round() as i64));
handlebars_helper!(meters: |v: f64| format!("{:.0}m", v));
handlebars_helper!(inc: |v: u64| v + 1);

/// Compiled renderer with registered helpers
pub struct TemplateRenderer<'a> {
    handlebars: Handlebars<'a>,
}

impl<'a> TemplateRenderer<'a> {
    /// Compile every template of the file.
    pub fn new(templates: TemplatesFile) -> Result<Self, String> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_escape_fn(no_escape);

        handlebars.register_helper("percent", Box::new(percent));
        handlebars.register_helper("meters", Box::new(meters));
        handlebars.register_helper("inc", Box::new(inc));

        for (name, template) in &templates.templates {
            handlebars
                .register_template_string(name, &template.template)
                .map_err(|e| format!("Template '{}' failed to compile: {}", name, e))?;
        }

        Ok(TemplateRenderer { handlebars })
    }

    /// Render a named template with data
    pub fn render(&self, template_name: &str, data: &Value) -> Result<String, String> {
        self.handlebars
            .render(template_name, data)
            .map_err(|e| format!("Render error: {}", e))
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.handlebars.has_template(name)
    }
}
