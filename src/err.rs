use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AdmxError>;

#[derive(Debug, Error)]
pub enum AdmxError {
    #[error("template store `{}` does not exist or is not a directory", path.display())]
    StoreNotFound { path: PathBuf },

    #[error("failed to read template `{}`: {source}", path.display())]
    FailedToReadTemplate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed template `{}`: {message}", path.display())]
    MalformedTemplate { path: PathBuf, message: String },

    #[error("unknown namespace prefix `{prefix}` referenced in `{}`", path.display())]
    UnknownNamespacePrefix { prefix: String, path: PathBuf },

    #[error("failed to load resource file `{}`: {message}", path.display())]
    ResourceLoadFailure { path: PathBuf, message: String },

    #[error(
        "element `{element}` in `{}` references unknown resource `{reference}`",
        path.display()
    )]
    UnresolvedStringReference {
        path: PathBuf,
        element: String,
        reference: String,
    },

    #[error("element `{element}` in `{}` is invalid: {message}", path.display())]
    InvalidElement {
        path: PathBuf,
        element: String,
        message: String,
    },

    #[error(
        "category `{id}` defined in `{}` is redefined by `{}`",
        first.display(),
        second.display()
    )]
    DuplicateCategory {
        id: String,
        first: PathBuf,
        second: PathBuf,
    },
}

impl AdmxError {
    /// Only a missing store aborts a scan, everything else is reported alongside the results.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AdmxError::StoreNotFound { .. })
    }

    /// The file this error is attributed to.
    pub fn path(&self) -> &std::path::Path {
        match self {
            AdmxError::StoreNotFound { path }
            | AdmxError::FailedToReadTemplate { path, .. }
            | AdmxError::MalformedTemplate { path, .. }
            | AdmxError::UnknownNamespacePrefix { path, .. }
            | AdmxError::ResourceLoadFailure { path, .. }
            | AdmxError::UnresolvedStringReference { path, .. }
            | AdmxError::InvalidElement { path, .. } => path,
            AdmxError::DuplicateCategory { second, .. } => second,
        }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        AdmxError::MalformedTemplate {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_element(
        path: impl Into<PathBuf>,
        element: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        AdmxError::InvalidElement {
            path: path.into(),
            element: element.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_only_missing_store_is_fatal() {
        let missing = AdmxError::StoreNotFound {
            path: PathBuf::from("C:\\Windows\\PolicyDefinitions"),
        };
        let malformed = AdmxError::malformed("a.admx", "no target namespace");

        assert!(missing.is_fatal());
        assert!(!malformed.is_fatal());
    }

    #[test]
    fn test_unresolved_reference_names_file_element_and_string() {
        let err = AdmxError::UnresolvedStringReference {
            path: PathBuf::from("vendor.admx"),
            element: "Vendor.App.Cat1".to_string(),
            reference: "string.missing".to_string(),
        };

        assert_eq!(
            err.to_string(),
            "element `Vendor.App.Cat1` in `vendor.admx` references unknown resource `string.missing`"
        );
        assert_eq!(err.path(), std::path::Path::new("vendor.admx"));
    }
}
