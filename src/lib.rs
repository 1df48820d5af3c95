#![forbid(unsafe_code)]

//! Parsing and resolution of Windows Administrative Templates.
//!
//! A template store (a `PolicyDefinitions` directory) holds ADMX definition files and, per locale,
//! ADML resource files. [`TemplateStore::load`] parses every definition file, merges the category
//! hierarchy declared across all of them, and exposes the policies with their localized display
//! names and the registry key and value they control.
//!
//! ```no_run
//! use admx::{FsTemplateSource, PolicyClass, ScanSettings, TemplateStore};
//!
//! let source = FsTemplateSource::new(r"C:\Windows\PolicyDefinitions");
//! let store = TemplateStore::load(&source, ScanSettings::new().locale("en-US")).unwrap();
//!
//! for policy in store.policies(PolicyClass::Machine).records {
//!     println!("{} => {:?}", store.policy_display_path(&policy), policy.registry_paths());
//! }
//! ```

pub use category::{Category, CategoryGraph, CategoryGraphBuilder, extract_categories};
pub use display_path::{Ancestors, DEFAULT_SEPARATOR};
pub use err::{AdmxError, Result};
pub use expand::{UnresolvedReference, expand};
pub use namespace::NamespaceContext;
pub use policy::{ClassFilter, PolicyClass, PolicyDefinition, extract_policies};
pub use source::{
    FsTemplateSource, MemoryTemplateSource, TemplateSource, central_store_path, local_store_path,
};
pub use store::{DEFAULT_LOCALE, ScanSettings, TemplateStore};
pub use string_table::{ResourceKind, StringTable};
pub use template::{Extraction, TemplateFile};

pub mod category;
pub mod display_path;
pub mod err;
pub mod expand;
pub mod namespace;
pub mod policy;
pub mod source;
pub mod store;
pub mod string_table;
pub mod template;
pub mod xml;

// For tests, we only initialize logging once.
#[cfg(test)]
use std::sync::Once;

#[cfg(test)]
static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
#[cfg(test)]
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .init();
    });
}
