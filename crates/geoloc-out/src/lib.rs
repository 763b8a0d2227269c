//! GEOLOC-OUT: Structured Location Results to Natural Language
//!
//! Renders ranked locations and detected objects into the prompt sent to the
//! text generator, renders the local fallback narrative, and normalizes
//! whatever text comes back.
//!
//! # Example
//!
//! ```ignore
//! use geoloc_out::{default_renderer, names};
//! use serde_json::json;
//!
//! let renderer = default_renderer().unwrap();
//! let text = renderer
//!     .render(names::OBJECTS_SUMMARY, &json!({ "objects": [{ "label": "塔", "confidence": 0.9 }] }))
//!     .unwrap();
//! assert!(text.contains("塔 (confidence: 90%)"));
//! ```

pub mod normalize;
pub mod renderer;
pub mod templates;

pub use normalize::{is_near_duplicate, normalize_narrative};
pub use renderer::TemplateRenderer;
pub use templates::TemplatesFile;

use thiserror::Error;

/// Template names the narrative stage relies on
pub mod names {
    pub const NO_RESULT: &str = "no_result";
    pub const OBJECTS_SUMMARY: &str = "objects_summary";
    pub const SYSTEM_PROMPT: &str = "system_prompt";
    pub const NARRATIVE_REQUEST: &str = "narrative_request";
    pub const FALLBACK_NARRATIVE: &str = "fallback_narrative";

    pub const REQUIRED: [&str; 5] = [
        NO_RESULT,
        OBJECTS_SUMMARY,
        SYSTEM_PROMPT,
        NARRATIVE_REQUEST,
        FALLBACK_NARRATIVE,
    ];
}

/// Errors that can occur during rendering
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Template load failed: {0}")]
    Template(String),
    #[error("Render failed: {0}")]
    Render(String),
}

/// Templates shipped with the workspace
pub const DEFAULT_TEMPLATES: &str = include_str!("../../../grammars/narrative-templates.yaml");

/// Renderer over the shipped templates
pub fn default_renderer() -> Result<TemplateRenderer<'static>, RenderError> {
    let templates = TemplatesFile::from_yaml(DEFAULT_TEMPLATES).map_err(RenderError::Template)?;
    checked_renderer(templates)
}

/// Renderer over a templates file on disk; it must define every name in
/// [`names::REQUIRED`].
pub fn renderer_from_path(path: &str) -> Result<TemplateRenderer<'static>, RenderError> {
    let templates = TemplatesFile::load(path).map_err(RenderError::Template)?;
    checked_renderer(templates)
}

fn checked_renderer(templates: TemplatesFile) -> Result<TemplateRenderer<'static>, RenderError> {
    let missing = templates.missing(&names::REQUIRED);
    if !missing.is_empty() {
        return Err(RenderError::Template(format!(
            "missing templates: {}",
            missing.join(", ")
        )));
    }
    TemplateRenderer::new(templates).map_err(RenderError::Template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_templates_compile() {
        let renderer = default_renderer().unwrap();
        for name in names::REQUIRED {
            assert!(renderer.has_template(name), "missing {}", name);
        }
    }

    #[test]
    fn test_objects_summary() {
        let renderer = default_renderer().unwrap();
        let text = renderer
            .render(
                names::OBJECTS_SUMMARY,
                &json!({ "objects": [
                    { "label": "塔", "confidence": 0.9 },
                    { "label": "桥", "confidence": 0.85 }
                ] }),
            )
            .unwrap();
        assert_eq!(
            text,
            "Key objects detected in the image:\n1. 塔 (confidence: 90%)\n2. 桥 (confidence: 85%)\n"
        );
    }

    #[test]
    fn test_incomplete_file_is_rejected() {
        let file = TemplatesFile::from_yaml(
            r#"
version: "1.0"
templates:
  no_result:
    description: Nothing found
    template: "None."
"#,
        )
        .unwrap();
        assert!(matches!(checked_renderer(file), Err(RenderError::Template(_))));
    }
}
