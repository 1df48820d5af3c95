use std::path::{Path, PathBuf};

use log::trace;

use crate::err::{AdmxError, Result};
use crate::namespace::NamespaceContext;
use crate::source::TemplateSource;
use crate::string_table::StringTable;
use crate::xml::{XmlElement, parse_bytes};

/// Records extracted from one or more files, together with everything that was skipped on the way.
#[derive(Debug)]
pub struct Extraction<T> {
    pub records: Vec<T>,
    pub problems: Vec<AdmxError>,
}

impl<T> Default for Extraction<T> {
    fn default() -> Self {
        Extraction {
            records: Vec::new(),
            problems: Vec::new(),
        }
    }
}

impl<T> Extraction<T> {
    pub fn append(&mut self, other: Extraction<T>) {
        self.records.extend(other.records);
        self.problems.extend(other.problems);
    }
}

/// A definition file after the per-file parse: its document tree, namespace context and
/// localized resources. Nothing here depends on other files of the store.
#[derive(Debug, Clone)]
pub struct TemplateFile {
    pub path: PathBuf,
    pub namespaces: NamespaceContext,
    pub strings: StringTable,
    pub document: XmlElement,
}

impl TemplateFile {
    /// Reads and parses `path` and loads its resources for `locale`.
    pub fn load<S: TemplateSource + ?Sized>(
        source: &S,
        path: &Path,
        locale: &str,
        fallback_locale: Option<&str>,
    ) -> Result<Self> {
        let bytes = source
            .read(path)
            .map_err(|e| AdmxError::FailedToReadTemplate {
                path: path.to_path_buf(),
                source: e,
            })?;

        let document =
            parse_bytes(&bytes).map_err(|e| AdmxError::malformed(path, e.to_string()))?;
        let strings = StringTable::load(source, path, locale, fallback_locale)?;

        TemplateFile::from_parts(path, document, strings)
    }

    pub fn from_parts(path: &Path, document: XmlElement, strings: StringTable) -> Result<Self> {
        if document.name != "policyDefinitions" {
            return Err(AdmxError::malformed(
                path,
                format!(
                    "unexpected root element <{}>, expected <policyDefinitions>",
                    document.name
                ),
            ));
        }

        let namespaces = NamespaceContext::from_document(&document, path)?;
        trace!(
            "{} declares target namespace `{}`",
            path.display(),
            namespaces.target()
        );

        Ok(TemplateFile {
            path: path.to_path_buf(),
            namespaces,
            strings,
            document,
        })
    }
}
