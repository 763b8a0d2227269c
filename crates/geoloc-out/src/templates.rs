//! Template loading for narrative rendering.
//!
//! Templates live in a YAML file of named Handlebars templates
//! (`grammars/narrative-templates.yaml`).

use serde::Deserialize;
use std::collections::HashMap;

/// Top-level templates file structure
#[derive(Debug, Clone, Deserialize)]
pub struct TemplatesFile {
    pub version: String,
    pub templates: HashMap<String, Template>,
}

/// A single template definition
#[derive(Debug, Clone, Deserialize)]
pub struct Template {
    pub description: String,
    pub template: String,
    #[serde(default)]
    pub example: Option<serde_json::Value>,
    #[serde(default)]
    pub output: Option<String>,
}

impl TemplatesFile {
    /// Load templates from a YAML file
    pub fn load(path: &str) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read templates file: {}", e))?;
        Self::from_yaml(&content)
    }

    /// Parse templates from YAML content
    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        serde_yaml::from_str::<TemplatesFile>(yaml)
            .map_err(|e| format!("Failed to parse templates YAML: {}", e))
    }

    /// Get a template by name
    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    /// List all template names
    pub fn list_templates(&self) -> Vec<&str> {
        self.templates.keys().map(|s| s.as_str()).collect()
    }

    /// Names from `required` that the file does not define.
    pub fn missing(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|name| !self.templates.contains_key(**name))
            .map(|name| name.to_string())
            .collect()
    }
}
