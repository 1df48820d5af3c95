//! Where template files come from.
//!
//! The resolution engine never touches the filesystem directly: it asks a [`TemplateSource`] for
//! the definition files of a store and for the bytes behind a path. This keeps directory layout
//! and store location concerns out of the parser, and lets tests run against in-memory stores.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, glob_with};
use log::{debug, warn};

use crate::err::{AdmxError, Result};

pub const DEFINITION_EXTENSION: &str = "admx";
pub const RESOURCE_EXTENSION: &str = "adml";

pub trait TemplateSource: Sync {
    /// Paths of all definition (ADMX) files in the store, in a stable lexicographic order.
    ///
    /// Fails with [`AdmxError::StoreNotFound`] when the store itself does not exist.
    fn definition_paths(&self) -> Result<Vec<PathBuf>>;

    /// Reads the raw bytes of a definition or resource file.
    ///
    /// A missing file must be reported with [`io::ErrorKind::NotFound`].
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Expected location of the resource (ADML) file for `definition` in `locale`.
    ///
    /// Stores lay out resources as `<store>/<locale>/<definition stem>.adml`.
    fn resource_path(&self, definition: &Path, locale: &str) -> PathBuf {
        let stem = definition.file_stem().unwrap_or_else(|| OsStr::new(""));
        let mut file_name = stem.to_os_string();
        file_name.push(".");
        file_name.push(RESOURCE_EXTENSION);

        definition
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(locale)
            .join(file_name)
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

/// A template store on disk (a `PolicyDefinitions` directory).
#[derive(Debug, Clone)]
pub struct FsTemplateSource {
    root: PathBuf,
}

impl FsTemplateSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsTemplateSource { root: root.into() }
    }

    /// The machine-local store, `%SystemRoot%\PolicyDefinitions`.
    pub fn local() -> Self {
        FsTemplateSource::new(local_store_path())
    }

    /// The central store replicated to every domain controller of `domain`.
    pub fn central(domain: &str) -> Self {
        FsTemplateSource::new(central_store_path(domain))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TemplateSource for FsTemplateSource {
    fn definition_paths(&self) -> Result<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Err(AdmxError::StoreNotFound {
                path: self.root.clone(),
            });
        }

        let root = glob::Pattern::escape(&self.root.to_string_lossy());
        let pattern = format!("{}/*.{}", root, DEFINITION_EXTENSION);
        let options = MatchOptions {
            case_sensitive: false,
            ..MatchOptions::new()
        };

        let entries = glob_with(&pattern, options).map_err(|e| {
            warn!("invalid store pattern `{}`: {}", pattern, e);
            AdmxError::StoreNotFound {
                path: self.root.clone(),
            }
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => paths.push(path),
                Ok(_) => {}
                Err(e) => warn!("skipping unreadable store entry: {}", e),
            }
        }

        paths.sort();
        debug!(
            "found {} definition files in {}",
            paths.len(),
            self.root.display()
        );
        Ok(paths)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }
}

/// An in-memory store, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct MemoryTemplateSource {
    files: BTreeMap<PathBuf, Vec<u8>>,
}

impl MemoryTemplateSource {
    pub fn new() -> Self {
        MemoryTemplateSource::default()
    }

    /// Adds (or replaces) a file.
    pub fn insert(&mut self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn remove(&mut self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.files.remove(path.as_ref())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl TemplateSource for MemoryTemplateSource {
    fn definition_paths(&self) -> Result<Vec<PathBuf>> {
        // `BTreeMap` keys are already sorted.
        Ok(self
            .files
            .keys()
            .filter(|path| has_extension(path, DEFINITION_EXTENSION))
            .cloned()
            .collect())
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not in the store", path.display()),
            )
        })
    }
}

/// `%SystemRoot%\PolicyDefinitions`, with `SystemRoot` defaulting to `C:\Windows`.
pub fn local_store_path() -> PathBuf {
    let system_root = env::var_os("SystemRoot").unwrap_or_else(|| r"C:\Windows".into());
    let mut path = system_root;
    path.push(r"\PolicyDefinitions");
    PathBuf::from(path)
}

/// `\\<domain>\SYSVOL\<domain>\Policies\PolicyDefinitions`.
pub fn central_store_path(domain: &str) -> PathBuf {
    PathBuf::from(format!(
        r"\\{domain}\SYSVOL\{domain}\Policies\PolicyDefinitions"
    ))
}
