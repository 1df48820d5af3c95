use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use log::{trace, warn};

use crate::err::{AdmxError, Result};
use crate::xml::XmlElement;

/// Prefix → namespace mapping declared by a single definition file in `<policyNamespaces>`.
///
/// Both the `<target>` declaration (the file's own namespace) and every `<using>` declaration
/// contribute a prefix. The empty prefix always maps to the target namespace, so `:name` and
/// `name` qualify identically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceContext {
    source: PathBuf,
    target: String,
    prefixes: HashMap<String, String>,
}

impl NamespaceContext {
    /// Reads `<policyNamespaces>` from a parsed `<policyDefinitions>` root element.
    pub fn from_document(root: &XmlElement, source: &Path) -> Result<Self> {
        let declarations = root
            .child("policyNamespaces")
            .ok_or_else(|| AdmxError::malformed(source, "missing <policyNamespaces> section"))?;

        let mut target = None;
        let mut prefixes = HashMap::new();

        for declaration in &declarations.children {
            let is_target = match declaration.name.as_str() {
                "target" => true,
                "using" => false,
                other => {
                    trace!("ignoring <{}> in policyNamespaces of {}", other, source.display());
                    continue;
                }
            };

            let Some(namespace) = declaration.attribute("namespace") else {
                if is_target {
                    return Err(AdmxError::malformed(
                        source,
                        "<target> declaration has no `namespace` attribute",
                    ));
                }
                warn!(
                    "skipping <using> without a namespace in {}",
                    source.display()
                );
                continue;
            };

            if is_target {
                target = Some(namespace.to_string());
            }

            if let Some(prefix) = declaration.attribute("prefix") {
                // Last declaration of a prefix wins.
                prefixes.insert(prefix.to_string(), namespace.to_string());
            }
        }

        let target = target
            .ok_or_else(|| AdmxError::malformed(source, "no target namespace declared"))?;
        prefixes.insert(String::new(), target.clone());

        Ok(NamespaceContext {
            source: source.to_path_buf(),
            target,
            prefixes,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn namespace_for(&self, prefix: &str) -> Option<&str> {
        self.prefixes.get(prefix).map(String::as_str)
    }

    /// Qualifies a name declared by this file itself.
    pub fn qualify_local(&self, name: &str) -> String {
        format!("{}.{}", self.target, name)
    }

    /// Qualifies a (possibly prefixed) reference such as `windows:System` or `Cat1`.
    pub fn qualify(&self, reference: &str) -> Result<String> {
        match reference.split_once(':') {
            Some((prefix, name)) => {
                let namespace =
                    self.namespace_for(prefix)
                        .ok_or_else(|| AdmxError::UnknownNamespacePrefix {
                            prefix: prefix.to_string(),
                            path: self.source.clone(),
                        })?;
                Ok(format!("{}.{}", namespace, name))
            }
            None => Ok(self.qualify_local(reference)),
        }
    }
}
