use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use log::{trace, warn};
use serde::Serialize;

use crate::category::CategoryGraph;
use crate::err::{AdmxError, Result};
use crate::expand::expand;
use crate::template::{Extraction, TemplateFile};
use crate::xml::XmlElement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PolicyClass {
    Machine,
    User,
    Both,
}

impl PolicyClass {
    /// Registry hives the policy writes to.
    pub fn hives(self) -> &'static [&'static str] {
        match self {
            PolicyClass::Machine => &["HKLM"],
            PolicyClass::User => &["HKCU"],
            PolicyClass::Both => &["HKLM", "HKCU"],
        }
    }
}

impl fmt::Display for PolicyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyClass::Machine => f.write_str("Machine"),
            PolicyClass::User => f.write_str("User"),
            PolicyClass::Both => f.write_str("Both"),
        }
    }
}

impl FromStr for PolicyClass {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("machine") {
            Ok(PolicyClass::Machine)
        } else if s.eq_ignore_ascii_case("user") {
            Ok(PolicyClass::User)
        } else if s.eq_ignore_ascii_case("both") {
            Ok(PolicyClass::Both)
        } else {
            Err(format!("unknown policy class `{}`", s))
        }
    }
}

/// Selects policies by class.
///
/// `Machine` and `User` also select policies of class `Both`, since those apply to either side.
/// `Both` selects only policies declared as `Both`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassFilter(Option<PolicyClass>);

impl ClassFilter {
    pub fn all() -> Self {
        ClassFilter(None)
    }

    pub fn only(class: PolicyClass) -> Self {
        ClassFilter(Some(class))
    }

    pub fn class(&self) -> Option<PolicyClass> {
        self.0
    }

    pub fn matches(&self, class: PolicyClass) -> bool {
        match self.0 {
            None => true,
            Some(PolicyClass::Both) => class == PolicyClass::Both,
            Some(wanted) => class == wanted || class == PolicyClass::Both,
        }
    }
}

impl From<Option<PolicyClass>> for ClassFilter {
    fn from(class: Option<PolicyClass>) -> Self {
        ClassFilter(class)
    }
}

impl From<PolicyClass> for ClassFilter {
    fn from(class: PolicyClass) -> Self {
        ClassFilter::only(class)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDefinition {
    pub source: PathBuf,
    /// Policy name, unique only within its source file.
    pub name: String,
    pub class: PolicyClass,
    pub display_name: String,
    /// Identifier of the resolved category, `None` when the reference is missing or dangling.
    pub category: Option<String>,
    pub key: String,
    pub value_name: Option<String>,
}

impl PolicyDefinition {
    /// Full registry key for every hive the policy applies to, e.g.
    /// `HKLM\Software\Policies\Vendor\App`.
    pub fn registry_paths(&self) -> Vec<String> {
        self.class
            .hives()
            .iter()
            .map(|hive| format!("{}\\{}", hive, self.key))
            .collect()
    }

    fn from_element(
        element: &XmlElement,
        class: PolicyClass,
        file: &TemplateFile,
        categories: &CategoryGraph,
    ) -> Result<Self> {
        let name = element.attribute("name").ok_or_else(|| {
            AdmxError::invalid_element(&file.path, "<policy>", "missing `name` attribute")
        })?;

        let key = element.attribute("key").ok_or_else(|| {
            AdmxError::invalid_element(&file.path, name, "missing `key` attribute")
        })?;

        let template = element.attribute("displayName").ok_or_else(|| {
            AdmxError::invalid_element(&file.path, name, "missing `displayName` attribute")
        })?;
        let display_name =
            expand(template, &file.strings).map_err(|e| AdmxError::UnresolvedStringReference {
                path: file.path.clone(),
                element: name.to_string(),
                reference: e.reference,
            })?;

        let category = match element
            .child("parentCategory")
            .and_then(|p| p.attribute("ref"))
            .filter(|reference| !reference.trim().is_empty())
        {
            Some(reference) => {
                let id = file.namespaces.qualify(reference)?;
                if categories.contains(&id) {
                    Some(id)
                } else {
                    trace!("policy {} references unknown category {}", name, id);
                    None
                }
            }
            None => None,
        };

        Ok(PolicyDefinition {
            source: file.path.clone(),
            name: name.to_string(),
            class,
            display_name,
            category,
            key: key.to_string(),
            value_name: value_name(element).map(str::to_string),
        })
    }
}

/// The policy's own `valueName`, or else the first nested element (in document order) that
/// carries one. List-valued policies have neither.
fn value_name(element: &XmlElement) -> Option<&str> {
    element
        .attribute("valueName")
        .or_else(|| element.descendants().find_map(|e| e.attribute("valueName")))
}

/// Extracts the `<policy>` elements of one file that match `filter`.
///
/// `categories` must be the fully merged graph of the whole store.
pub fn extract_policies(
    file: &TemplateFile,
    categories: &CategoryGraph,
    filter: ClassFilter,
) -> Extraction<PolicyDefinition> {
    let mut extraction = Extraction::default();

    let Some(section) = file.document.child("policies") else {
        return extraction;
    };

    for element in section.children_named("policy") {
        let class = match policy_class(element, file) {
            Ok(class) => class,
            Err(e) => {
                warn!("skipping policy: {}", e);
                extraction.problems.push(e);
                continue;
            }
        };

        if !filter.matches(class) {
            continue;
        }

        match PolicyDefinition::from_element(element, class, file, categories) {
            Ok(policy) => extraction.records.push(policy),
            Err(e) => {
                warn!("skipping policy: {}", e);
                extraction.problems.push(e)
            }
        }
    }

    extraction
}

fn policy_class(element: &XmlElement, file: &TemplateFile) -> Result<PolicyClass> {
    let name = element.attribute("name").unwrap_or("<policy>");
    let class = element.attribute("class").ok_or_else(|| {
        AdmxError::invalid_element(&file.path, name, "missing `class` attribute")
    })?;

    class
        .parse()
        .map_err(|message: String| AdmxError::invalid_element(&file.path, name, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::CategoryGraphBuilder;
    use crate::string_table::{ResourceKind, StringTable};
    use crate::xml::parse_document;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn template_file(policies: &str) -> TemplateFile {
        let xml = format!(
            r#"<policyDefinitions>
                 <policyNamespaces>
                   <target prefix="app" namespace="Vendor.App"/>
                   <using prefix="windows" namespace="Microsoft.Policies.Windows"/>
                 </policyNamespaces>
                 <policies>{}</policies>
               </policyDefinitions>"#,
            policies
        );

        let mut strings = StringTable::new();
        strings.insert(ResourceKind::String, "p", "Some Policy");

        TemplateFile::from_parts(
            Path::new("vendor.admx"),
            parse_document(&xml).unwrap(),
            strings,
        )
        .unwrap()
    }

    fn categories(ids: &[&str]) -> CategoryGraph {
        let mut builder = CategoryGraphBuilder::new();
        for id in ids {
            builder.insert(crate::category::Category {
                id: id.to_string(),
                name: id.to_string(),
                display_name: id.to_string(),
                parent: None,
                source: PathBuf::from("other.admx"),
            });
        }
        builder.finish().0
    }

    #[test]
    fn test_class_filter() {
        let machine = ClassFilter::only(PolicyClass::Machine);
        assert!(machine.matches(PolicyClass::Machine));
        assert!(machine.matches(PolicyClass::Both));
        assert!(!machine.matches(PolicyClass::User));

        let both = ClassFilter::only(PolicyClass::Both);
        assert!(both.matches(PolicyClass::Both));
        assert!(!both.matches(PolicyClass::User));

        assert!(ClassFilter::all().matches(PolicyClass::User));
    }

    #[test]
    fn test_parses_class_case_insensitively() {
        assert_eq!("machine".parse::<PolicyClass>(), Ok(PolicyClass::Machine));
        assert_eq!("User".parse::<PolicyClass>(), Ok(PolicyClass::User));
        assert!("Computer".parse::<PolicyClass>().is_err());
    }

    #[test]
    fn test_direct_value_name() {
        let file = template_file(
            r#"<policy name="P" class="Machine" displayName="$(string.p)"
                       key="Software\Policies\Vendor" valueName="Direct">
                 <elements><decimal id="D" valueName="Nested"/></elements>
               </policy>"#,
        );

        let extraction = extract_policies(&file, &categories(&[]), ClassFilter::all());
        assert!(extraction.problems.is_empty());
        assert_eq!(
            extraction.records[0].value_name.as_deref(),
            Some("Direct")
        );
    }

    #[test]
    fn test_nested_value_name_first_in_document_order() {
        let file = template_file(
            r#"<policy name="P" class="User" displayName="$(string.p)" key="Software\Policies\Vendor\App">
                 <parentCategory ref="windows:System"/>
                 <elements>
                   <boolean id="B" valueName="Enabled"/>
                   <text id="T" valueName="Second"/>
                 </elements>
               </policy>"#,
        );

        let extraction = extract_policies(
            &file,
            &categories(&["Microsoft.Policies.Windows.System"]),
            ClassFilter::all(),
        );
        let policy = &extraction.records[0];

        assert_eq!(policy.value_name.as_deref(), Some("Enabled"));
        assert_eq!(
            policy.category.as_deref(),
            Some("Microsoft.Policies.Windows.System")
        );
        assert_eq!(policy.display_name, "Some Policy");
        assert_eq!(policy.key, r"Software\Policies\Vendor\App");
    }

    #[test]
    fn test_list_policy_has_no_value_name() {
        let file = template_file(
            r#"<policy name="L" class="Machine" displayName="$(string.p)" key="Software\Policies\Vendor\List">
                 <elements><list id="Items" key="Software\Policies\Vendor\List\Items"/></elements>
               </policy>"#,
        );

        let extraction = extract_policies(&file, &categories(&[]), ClassFilter::all());
        assert_eq!(extraction.records[0].value_name, None);
    }

    #[test]
    fn test_dangling_category_is_empty() {
        let file = template_file(
            r#"<policy name="P" class="Both" displayName="$(string.p)" key="K">
                 <parentCategory ref="NotThere"/>
               </policy>"#,
        );

        let extraction = extract_policies(&file, &categories(&[]), ClassFilter::all());
        assert!(extraction.problems.is_empty());
        assert_eq!(extraction.records[0].category, None);
    }

    #[test]
    fn test_empty_category_reference_is_absent() {
        let file = template_file(
            r#"<policy name="P" class="Machine" displayName="$(string.p)" key="K">
                 <parentCategory ref=""/>
               </policy>"#,
        );

        let extraction = extract_policies(&file, &categories(&[]), ClassFilter::all());
        assert!(extraction.problems.is_empty());
        assert_eq!(extraction.records[0].category, None);
    }

    #[test]
    fn test_filter_skips_excluded_classes() {
        let file = template_file(
            r#"<policy name="M" class="Machine" displayName="$(string.p)" key="K"/>
               <policy name="U" class="User" displayName="$(string.p)" key="K"/>
               <policy name="B" class="Both" displayName="$(string.p)" key="K"/>"#,
        );

        let names = |filter: ClassFilter| -> Vec<String> {
            extract_policies(&file, &categories(&[]), filter)
                .records
                .into_iter()
                .map(|p| p.name)
                .collect()
        };

        assert_eq!(names(PolicyClass::Machine.into()), vec!["M", "B"]);
        assert_eq!(names(PolicyClass::User.into()), vec!["U", "B"]);
        assert_eq!(names(PolicyClass::Both.into()), vec!["B"]);
        assert_eq!(names(ClassFilter::all()), vec!["M", "U", "B"]);
    }

    #[test]
    fn test_element_failures_do_not_stop_siblings() {
        let file = template_file(
            r#"<policy name="Bad" class="Machine" displayName="$(string.missing)" key="K"/>
               <policy name="Prefix" class="Machine" displayName="$(string.p)" key="K">
                 <parentCategory ref="nope:Cat"/>
               </policy>
               <policy name="Class" class="Computer" displayName="$(string.p)" key="K"/>
               <policy name="Good" class="Machine" displayName="$(string.p)" key="K"/>"#,
        );

        let extraction = extract_policies(&file, &categories(&[]), ClassFilter::all());

        assert_eq!(extraction.records.len(), 1);
        assert_eq!(extraction.records[0].name, "Good");
        assert_eq!(extraction.problems.len(), 3);
        assert!(matches!(
            &extraction.problems[0],
            AdmxError::UnresolvedStringReference { element, reference, .. }
                if element == "Bad" && reference == "string.missing"
        ));
        assert!(matches!(
            &extraction.problems[1],
            AdmxError::UnknownNamespacePrefix { prefix, .. } if prefix == "nope"
        ));
        assert!(matches!(
            &extraction.problems[2],
            AdmxError::InvalidElement { element, .. } if element == "Class"
        ));
    }

    #[test]
    fn test_registry_paths_follow_class() {
        let policy = PolicyDefinition {
            source: PathBuf::from("vendor.admx"),
            name: "P".to_string(),
            class: PolicyClass::Both,
            display_name: "P".to_string(),
            category: None,
            key: r"Software\Policies\Vendor".to_string(),
            value_name: None,
        };

        assert_eq!(
            policy.registry_paths(),
            vec![
                r"HKLM\Software\Policies\Vendor".to_string(),
                r"HKCU\Software\Policies\Vendor".to_string()
            ]
        );
    }
}
