use std::path::{Path, PathBuf};

use log::{debug, info, warn};

#[cfg(feature = "multithreading")]
use rayon::prelude::*;

use crate::category::{Category, CategoryGraph, CategoryGraphBuilder, extract_categories};
use crate::display_path::DEFAULT_SEPARATOR;
use crate::err::{AdmxError, Result};
use crate::policy::{ClassFilter, PolicyDefinition, extract_policies};
use crate::source::TemplateSource;
use crate::template::{Extraction, TemplateFile};

pub const DEFAULT_LOCALE: &str = "en-US";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    locale: String,
    fallback_locale: Option<String>,
    num_threads: usize,
    separator: String,
    report_category_collisions: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        ScanSettings {
            locale: DEFAULT_LOCALE.to_string(),
            fallback_locale: None,
            num_threads: 0,
            separator: DEFAULT_SEPARATOR.to_string(),
            report_category_collisions: false,
        }
    }
}

impl ScanSettings {
    pub fn new() -> Self {
        ScanSettings::default()
    }

    /// Locale of the resource files to load, e.g. `en-US`.
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Locale to load when a file has no resources for the primary locale.
    pub fn fallback_locale(mut self, locale: Option<String>) -> Self {
        self.fallback_locale = locale;
        self
    }

    /// Sets the number of worker threads.
    /// `0` will let the implementation decide (one per core), `1` parses on the calling thread.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Separator placed between category names in display paths.
    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Report categories redefined by another file instead of silently replacing them.
    pub fn report_category_collisions(mut self, report: bool) -> Self {
        self.report_category_collisions = report;
        self
    }

    pub fn get_locale(&self) -> &str {
        &self.locale
    }

    pub fn get_fallback_locale(&self) -> Option<&str> {
        self.fallback_locale.as_deref()
    }

    pub fn get_num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn get_separator(&self) -> &str {
        &self.separator
    }

    pub fn should_report_category_collisions(&self) -> bool {
        self.report_category_collisions
    }
}

/// Where per-file stages run.
///
/// Built once per store, so repeated policy queries reuse the same pool.
#[derive(Debug)]
enum Workers {
    Sequential,
    /// Rayon's global pool, one thread per core.
    #[cfg(feature = "multithreading")]
    Global,
    #[cfg(feature = "multithreading")]
    Pool(rayon::ThreadPool),
}

impl Workers {
    fn new(num_threads: usize) -> Self {
        #[cfg(feature = "multithreading")]
        {
            match num_threads {
                0 => return Workers::Global,
                1 => return Workers::Sequential,
                n => match rayon::ThreadPoolBuilder::new().num_threads(n).build() {
                    Ok(pool) => return Workers::Pool(pool),
                    Err(e) => warn!("failed to build thread pool, parsing sequentially: {}", e),
                },
            }
        }

        #[cfg(not(feature = "multithreading"))]
        let _ = num_threads;

        Workers::Sequential
    }

    /// Runs `f` over `items`. Results are returned in the order of `items`.
    fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        match self {
            #[cfg(feature = "multithreading")]
            Workers::Global if items.len() > 1 => items.par_iter().map(&f).collect(),
            #[cfg(feature = "multithreading")]
            Workers::Pool(pool) if items.len() > 1 => {
                pool.install(|| items.par_iter().map(&f).collect())
            }
            _ => items.iter().map(f).collect(),
        }
    }
}

/// A fully scanned template store.
///
/// Loading parses every definition file, merges all categories and links them. Policy queries
/// run against the parsed files afterwards, so they always see the complete category graph.
#[derive(Debug)]
pub struct TemplateStore {
    settings: ScanSettings,
    workers: Workers,
    files: Vec<TemplateFile>,
    categories: CategoryGraph,
    problems: Vec<AdmxError>,
}

impl TemplateStore {
    /// Scans `source`. Only a missing store is an error; every file- or element-level failure
    /// is available from [`TemplateStore::problems`].
    pub fn load<S: TemplateSource + ?Sized>(source: &S, settings: ScanSettings) -> Result<Self> {
        let paths = source.definition_paths()?;
        info!("scanning {} definition files", paths.len());

        let workers = Workers::new(settings.num_threads);
        let mut problems = Vec::new();
        let mut files = Vec::with_capacity(paths.len());

        let loaded = workers.map(&paths, |path: &PathBuf| {
            TemplateFile::load(
                source,
                path,
                &settings.locale,
                settings.fallback_locale.as_deref(),
            )
        });

        for result in loaded {
            match result {
                Ok(file) => files.push(file),
                Err(e) => {
                    warn!("skipping template: {}", e);
                    problems.push(e);
                }
            }
        }

        // Pass 1: extraction may run per file in parallel, merging happens in path order.
        let extracted = workers.map(&files, extract_categories);
        let mut builder =
            CategoryGraphBuilder::new().report_collisions(settings.report_category_collisions);
        for extraction in extracted {
            builder.extend(extraction.records);
            problems.extend(extraction.problems);
        }

        // Pass 2: every file is merged, parent links can be resolved.
        let (categories, collisions) = builder.finish();
        problems.extend(collisions);

        debug!(
            "loaded {} files, {} categories, {} problems",
            files.len(),
            categories.len(),
            problems.len()
        );

        Ok(TemplateStore {
            settings,
            workers,
            files,
            categories,
            problems,
        })
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Definition files that were parsed successfully, in path order.
    pub fn files(&self) -> &[TemplateFile] {
        &self.files
    }

    /// Failures collected while loading files and categories.
    pub fn problems(&self) -> &[AdmxError] {
        &self.problems
    }

    pub fn category_graph(&self) -> &CategoryGraph {
        &self.categories
    }

    /// All categories ordered by identifier.
    pub fn categories(&self) -> Vec<&Category> {
        self.categories.categories()
    }

    pub fn category(&self, id: &str) -> Option<&Category> {
        self.categories.get(id)
    }

    pub fn parent(&self, id: &str) -> Option<&Category> {
        self.categories.parent(id)
    }

    /// Breadcrumb of the category `id` using the configured separator.
    pub fn display_path(&self, id: &str) -> Option<String> {
        self.categories.display_path(id, &self.settings.separator)
    }

    /// Policies of every file matching `filter`, in file order and then document order.
    pub fn policies(&self, filter: impl Into<ClassFilter>) -> Extraction<PolicyDefinition> {
        let filter = filter.into();

        let per_file = self.workers.map(&self.files, |file| {
            extract_policies(file, &self.categories, filter)
        });

        let mut extraction = Extraction::default();
        for file in per_file {
            extraction.append(file);
        }
        extraction
    }

    /// The path a policy is shown under in the policy editor: its category breadcrumb followed by
    /// its display name.
    pub fn policy_display_path(&self, policy: &PolicyDefinition) -> String {
        match policy
            .category
            .as_deref()
            .and_then(|id| self.display_path(id))
        {
            Some(path) => format!("{}{}{}", path, self.settings.separator, policy.display_name),
            None => policy.display_name.clone(),
        }
    }

    /// Policies whose display name, or full display path, equals `name` (ignoring case).
    ///
    /// Display names are localized, so case is folded with Unicode lowercasing.
    pub fn find_policies(&self, name: &str) -> Extraction<PolicyDefinition> {
        let needle = name.to_lowercase();

        let mut extraction = self.policies(ClassFilter::all());
        extraction.records.retain(|policy| {
            policy.display_name.to_lowercase() == needle
                || self.policy_display_path(policy).to_lowercase() == needle
        });
        extraction
    }

    /// The parsed definition file at `path`, if it loaded successfully.
    pub fn file(&self, path: &Path) -> Option<&TemplateFile> {
        self.files.iter().find(|f| f.path == path)
    }
}
