use std::fmt;
use std::io;
use std::path::Path;
use std::str::FromStr;

use hashbrown::HashMap;
use log::{debug, trace};

use crate::err::{AdmxError, Result};
use crate::source::TemplateSource;
use crate::xml::{XmlElement, parse_bytes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    String,
    Presentation,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::String => f.write_str("string"),
            ResourceKind::Presentation => f.write_str("presentation"),
        }
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "string" => Ok(ResourceKind::String),
            "presentation" => Ok(ResourceKind::Presentation),
            other => Err(format!("unknown resource kind `{}`", other)),
        }
    }
}

/// Localized resources of a single ADML file.
///
/// `<string>` entries map to their literal text; `<presentation>` entries map to the empty string,
/// they only need to exist for a `$(presentation.id)` reference to resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringTable {
    strings: HashMap<String, String>,
    presentations: HashMap<String, String>,
}

impl StringTable {
    pub fn new() -> Self {
        StringTable::default()
    }

    fn entries(&self, kind: ResourceKind) -> &HashMap<String, String> {
        match kind {
            ResourceKind::String => &self.strings,
            ResourceKind::Presentation => &self.presentations,
        }
    }

    pub fn insert(&mut self, kind: ResourceKind, id: impl Into<String>, value: impl Into<String>) {
        let entries = match kind {
            ResourceKind::String => &mut self.strings,
            ResourceKind::Presentation => &mut self.presentations,
        };
        entries.insert(id.into(), value.into());
    }

    pub fn get(&self, kind: ResourceKind, id: &str) -> Option<&str> {
        self.entries(kind).get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strings.len() + self.presentations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty() && self.presentations.is_empty()
    }

    /// Builds a table from a parsed `<policyDefinitionResources>` root element.
    pub fn from_document(root: &XmlElement) -> Self {
        let mut table = StringTable::new();

        let Some(resources) = root.child("resources") else {
            return table;
        };

        if let Some(strings) = resources.child("stringTable") {
            for entry in strings.children_named("string") {
                if let Some(id) = entry.attribute("id") {
                    table.insert(ResourceKind::String, id, entry.text.as_str());
                }
            }
        }

        if let Some(presentations) = resources.child("presentationTable") {
            for entry in presentations.children_named("presentation") {
                if let Some(id) = entry.attribute("id") {
                    table.insert(ResourceKind::Presentation, id, "");
                }
            }
        }

        trace!("loaded {} resource entries", table.len());
        table
    }

    /// Parses raw ADML bytes; `path` is only used to attribute failures.
    pub fn parse(bytes: &[u8], path: &Path) -> Result<Self> {
        let root = parse_bytes(bytes).map_err(|e| AdmxError::ResourceLoadFailure {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        if root.name != "policyDefinitionResources" {
            return Err(AdmxError::ResourceLoadFailure {
                path: path.to_path_buf(),
                message: format!(
                    "unexpected root element <{}>, expected <policyDefinitionResources>",
                    root.name
                ),
            });
        }

        Ok(StringTable::from_document(&root))
    }

    /// Loads the companion resource file of `definition` for `locale`.
    ///
    /// When the resource for `locale` does not exist and a `fallback` locale is given, the fallback
    /// resource is loaded instead.
    pub fn load<S: TemplateSource + ?Sized>(
        source: &S,
        definition: &Path,
        locale: &str,
        fallback: Option<&str>,
    ) -> Result<Self> {
        let path = source.resource_path(definition, locale);

        match source.read(&path) {
            Ok(bytes) => StringTable::parse(&bytes, &path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => match fallback {
                Some(fallback) if fallback != locale => {
                    debug!(
                        "no `{}` resources for {}, falling back to `{}`",
                        locale,
                        definition.display(),
                        fallback
                    );
                    StringTable::load(source, definition, fallback, None)
                }
                _ => Err(AdmxError::ResourceLoadFailure {
                    path,
                    message: "resource file not found".to_string(),
                }),
            },
            Err(e) => Err(AdmxError::ResourceLoadFailure {
                path,
                message: e.to_string(),
            }),
        }
    }
}
