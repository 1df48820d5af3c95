use hashbrown::HashSet;
use log::warn;

use crate::category::{Category, CategoryGraph};

/// Separator used by the Group Policy editor between category names.
pub const DEFAULT_SEPARATOR: &str = "\\";

/// Walks from a category up to its root, following resolved parent links.
///
/// The walk stops at the first category without a resolved parent. Parent links come from
/// identifiers that several files may redefine, so a cycle is still guarded against: a category
/// is never yielded twice.
pub struct Ancestors<'g> {
    graph: &'g CategoryGraph,
    next: Option<&'g Category>,
    seen: HashSet<&'g str>,
}

impl<'g> Iterator for Ancestors<'g> {
    type Item = &'g Category;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.seen.insert(current.id.as_str());

        self.next = match self.graph.parent(&current.id) {
            Some(parent) if self.seen.contains(parent.id.as_str()) => {
                warn!(
                    "category {} closes a parent cycle at {}",
                    current.id, parent.id
                );
                None
            }
            parent => parent,
        };

        Some(current)
    }
}

impl CategoryGraph {
    /// The category itself followed by its parents, closest first.
    pub fn ancestors(&self, id: &str) -> Ancestors<'_> {
        Ancestors {
            graph: self,
            next: self.get(id),
            seen: HashSet::new(),
        }
    }

    /// Breadcrumb of display names from the root down to `id`, e.g. `System\Logon`.
    ///
    /// Returns `None` if `id` is not in the graph.
    pub fn display_path(&self, id: &str, separator: &str) -> Option<String> {
        let mut names: Vec<&str> = self
            .ancestors(id)
            .map(|c| c.display_name.as_str())
            .collect();

        if names.is_empty() {
            return None;
        }

        names.reverse();
        Some(names.join(separator))
    }
}
