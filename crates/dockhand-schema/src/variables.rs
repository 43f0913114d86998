use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A key/value variable overlay.
///
/// Keys are kept sorted so every consumer (conductor environment, extra-vars
/// payload, rendered manifests) sees the same order for the same input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables(BTreeMap<String, String>);

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key=value` assignments as given on the command line.
    pub fn parse_assignments<S: AsRef<str>>(assignments: &[S]) -> Result<Self, SchemaError> {
        let mut vars = Self::new();
        for raw in assignments {
            let raw = raw.as_ref();
            let Some((key, value)) = raw.split_once('=') else {
                return Err(SchemaError::InvalidAssignment(raw.to_owned()));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(SchemaError::InvalidAssignment(raw.to_owned()));
            }
            vars.insert(key, value);
        }
        Ok(vars)
    }

    /// Load a variable file: a YAML (or JSON) mapping of scalar values.
    pub fn from_file(path: &Path) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_str(&content).map_err(|reason| SchemaError::InvalidVariableFile {
            path: path.display().to_string(),
            reason,
        })
    }

    fn parse_str(content: &str) -> Result<Self, String> {
        let value: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
        let mapping = match value {
            serde_yaml::Value::Mapping(m) => m,
            serde_yaml::Value::Null => return Ok(Self::new()),
            _ => return Err("expected a mapping of variables".to_owned()),
        };
        let mut vars = Self::new();
        for (key, value) in mapping {
            let key = scalar_to_string(&key).ok_or("variable names must be scalars")?;
            let value = scalar_to_string(&value)
                .ok_or_else(|| format!("variable '{key}' must have a scalar value"))?;
            vars.insert(key, value);
        }
        Ok(vars)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge `other` over `self`; `other` wins on conflicting keys.
    #[must_use]
    pub fn overlay(&self, other: &Variables) -> Variables {
        let mut merged = self.0.clone();
        for (k, v) in &other.0 {
            merged.insert(k.clone(), v.clone());
        }
        Variables(merged)
    }

    /// `key=value` strings suitable for a container environment.
    pub fn to_env(&self) -> Vec<String> {
        self.0.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }

    pub fn to_json(&self) -> String {
        // A BTreeMap<String, String> always serializes.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_owned())
    }
}

pub(crate) fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Null => Some(String::new()),
        _ => None,
    }
}

/// Substitute `{{ name }}` placeholders in `text` with values from `vars`.
///
/// Only bare identifiers are supported inside a placeholder. A placeholder
/// naming a variable absent from `vars` is an error rather than an empty string.
pub fn render_template(text: &str, vars: &Variables) -> Result<String, SchemaError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(SchemaError::InvalidTemplate(rest[start..].to_owned()));
        };
        let expr = after[..end].trim();
        if !is_identifier(expr) {
            return Err(SchemaError::InvalidTemplate(format!("{{{{ {expr} }}}}")));
        }
        let value = vars
            .get(expr)
            .ok_or_else(|| SchemaError::UndefinedVariable(expr.to_owned()))?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
