use std::path::PathBuf;

use hashbrown::HashMap;
use log::{debug, trace, warn};
use serde::Serialize;

use crate::err::{AdmxError, Result};
use crate::expand::expand;
use crate::template::{Extraction, TemplateFile};
use crate::xml::XmlElement;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Category {
    /// Globally unique `<namespace>.<name>`.
    pub id: String,
    pub name: String,
    pub display_name: String,
    /// Qualified identifier of the parent category as referenced, resolved or not.
    pub parent: Option<String>,
    pub source: PathBuf,
}

impl Category {
    pub fn from_element(element: &XmlElement, file: &TemplateFile) -> Result<Self> {
        let name = element.attribute("name").ok_or_else(|| {
            AdmxError::invalid_element(&file.path, "<category>", "missing `name` attribute")
        })?;
        let id = file.namespaces.qualify_local(name);

        let parent = match element
            .child("parentCategory")
            .and_then(|p| p.attribute("ref"))
            .filter(|reference| !reference.trim().is_empty())
        {
            Some(reference) => Some(file.namespaces.qualify(reference)?),
            None => None,
        };

        let template = element.attribute("displayName").ok_or_else(|| {
            AdmxError::invalid_element(&file.path, id.as_str(), "missing `displayName` attribute")
        })?;
        let display_name =
            expand(template, &file.strings).map_err(|e| AdmxError::UnresolvedStringReference {
                path: file.path.clone(),
                element: id.clone(),
                reference: e.reference,
            })?;

        Ok(Category {
            id,
            name: name.to_string(),
            display_name,
            parent,
            source: file.path.clone(),
        })
    }
}

/// Extracts every `<category>` of a single file. Elements that fail are reported and skipped.
pub fn extract_categories(file: &TemplateFile) -> Extraction<Category> {
    let mut extraction = Extraction::default();

    let Some(section) = file.document.child("categories") else {
        return extraction;
    };

    for element in section.children_named("category") {
        match Category::from_element(element, file) {
            Ok(category) => {
                trace!("category {} => {:?}", category.id, category.display_name);
                extraction.records.push(category)
            }
            Err(e) => {
                warn!("skipping category: {}", e);
                extraction.problems.push(e)
            }
        }
    }

    extraction
}

/// Merges categories of all files of a store (pass 1).
///
/// Insertion order matters: a category redefined by a later file replaces the earlier one.
#[derive(Debug, Default)]
pub struct CategoryGraphBuilder {
    categories: HashMap<String, Category>,
    report_collisions: bool,
    problems: Vec<AdmxError>,
}

impl CategoryGraphBuilder {
    pub fn new() -> Self {
        CategoryGraphBuilder::default()
    }

    /// Report a [`AdmxError::DuplicateCategory`] whenever a file redefines a category of another
    /// file. The later definition still wins.
    pub fn report_collisions(mut self, report: bool) -> Self {
        self.report_collisions = report;
        self
    }

    pub fn insert(&mut self, category: Category) {
        if let Some(previous) = self.categories.get(&category.id) {
            if previous.source == category.source {
                debug!("category {} is declared twice in {}", category.id, category.source.display());
            } else {
                warn!(
                    "category {} from {} replaces definition from {}",
                    category.id,
                    category.source.display(),
                    previous.source.display()
                );

                if self.report_collisions {
                    self.problems.push(AdmxError::DuplicateCategory {
                        id: category.id.clone(),
                        first: previous.source.clone(),
                        second: category.source.clone(),
                    });
                }
            }
        }

        self.categories.insert(category.id.clone(), category);
    }

    pub fn extend(&mut self, categories: impl IntoIterator<Item = Category>) {
        for category in categories {
            self.insert(category);
        }
    }

    /// Links every category to its parent (pass 2). Must only be called once every file of the
    /// store has been inserted.
    pub fn finish(self) -> (CategoryGraph, Vec<AdmxError>) {
        let mut parents = HashMap::new();

        for category in self.categories.values() {
            let Some(parent) = category.parent.as_deref() else {
                continue;
            };

            if self.categories.contains_key(parent) {
                parents.insert(category.id.clone(), parent.to_string());
            } else {
                debug!(
                    "category {} references unknown parent {}",
                    category.id, parent
                );
            }
        }

        let graph = CategoryGraph {
            categories: self.categories,
            parents,
        };

        (graph, self.problems)
    }
}

/// The merged, linked category hierarchy of a store.
///
/// Records are immutable; parent links are kept in a separate table keyed by child identifier,
/// so following a parent is a lookup and never a re-parse.
#[derive(Debug, Default, Clone)]
pub struct CategoryGraph {
    categories: HashMap<String, Category>,
    parents: HashMap<String, String>,
}

impl CategoryGraph {
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Category> {
        self.categories.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.categories.contains_key(id)
    }

    /// Identifier of the resolved parent, if the category has one and it exists in the store.
    pub fn parent_id(&self, id: &str) -> Option<&str> {
        self.parents.get(id).map(String::as_str)
    }

    pub fn parent(&self, id: &str) -> Option<&Category> {
        self.parent_id(id).and_then(|parent| self.get(parent))
    }

    /// All categories, ordered by identifier.
    pub fn categories(&self) -> Vec<&Category> {
        let mut categories: Vec<&Category> = self.categories.values().collect();
        categories.sort_by(|a, b| a.id.cmp(&b.id));
        categories
    }

    /// Categories whose parent reference points at a category missing from the store.
    pub fn dangling(&self) -> Vec<&Category> {
        let mut dangling: Vec<&Category> = self
            .categories
            .values()
            .filter(|c| c.parent.is_some() && !self.parents.contains_key(&c.id))
            .collect();
        dangling.sort_by(|a, b| a.id.cmp(&b.id));
        dangling
    }
}
