use std::{collections::BTreeMap, fs, iter::FromIterator, path::Path};

use anyhow::{Context, Result};

const ACTIVATE: &str = include_str!("../templates/activate");

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template `{template}` references unknown variable `{name}`")]
    MissingVariable { template: String, name: String },
    #[error("template `{template}` has an unterminated placeholder at byte {offset}")]
    Unterminated { template: String, offset: usize },
}

/// Values substituted into a template, keyed by variable name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderContext(BTreeMap<String, String>);

impl RenderContext {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    #[cfg(test)]
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RenderContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Text with `{{ name }}` placeholders.
#[derive(Clone, Debug)]
pub struct Template {
    name: String,
    source: String,
}

impl Template {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    /// The built-in activation script.
    pub fn activate() -> Self {
        Self::new("activate", ACTIVATE)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source =
            fs::read_to_string(path).with_context(|| format!("cannot read template {:?}", path))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(name, source))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn render(&self, context: &RenderContext) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        let mut rest = self.source.as_str();
        let mut offset = 0;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| TemplateError::Unterminated {
                template: self.name.clone(),
                offset: offset + start,
            })?;
            let name = after[..end].trim();
            let value = context
                .get(name)
                .ok_or_else(|| TemplateError::MissingVariable {
                    template: self.name.clone(),
                    name: name.to_owned(),
                })?;
            out.push_str(value);
            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        out.push_str(rest);
        Ok(out)
    }
}
