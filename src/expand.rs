//! Expansion of `$(kind.id)` placeholders in display-name templates.
//!
//! The scanner is a two-state machine: outside a token everything is copied verbatim, and a
//! `$(` switches to the inside state, which collects characters up to the closing `)`. The
//! collected reference (`string.title`, `presentation.Foo`) is looked up in the file's
//! [`StringTable`] and its value substituted. Values are never re-scanned.

use thiserror::Error;

use crate::string_table::{ResourceKind, StringTable};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unresolved resource reference `{reference}`")]
pub struct UnresolvedReference {
    /// The reference as written inside the placeholder, e.g. `string.title`.
    pub reference: String,
}

#[derive(Clone, Copy)]
enum State {
    Outside,
    Inside { start: usize },
}

/// Substitutes every `$(kind.id)` token in `template` with its value from `table`.
///
/// A `$` that does not open a token is kept as literal text. A `$(` that is never closed is an
/// [`UnresolvedReference`] carrying everything after the `$(`.
pub fn expand(template: &str, table: &StringTable) -> Result<String, UnresolvedReference> {
    let mut out = String::with_capacity(template.len());
    let mut state = State::Outside;
    let mut literal_from = 0;

    let mut chars = template.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match state {
            State::Outside => {
                if c == '$' && matches!(chars.peek(), Some((_, '('))) {
                    out.push_str(&template[literal_from..i]);
                    literal_from = i;
                    chars.next();
                    state = State::Inside { start: i + 2 };
                }
            }
            State::Inside { start } => {
                if c == ')' {
                    let reference = &template[start..i];
                    out.push_str(resolve(reference, table)?);
                    literal_from = i + 1;
                    state = State::Outside;
                }
            }
        }
    }

    // An unterminated token would leave placeholder syntax in the display name.
    if let State::Inside { start } = state {
        return Err(UnresolvedReference {
            reference: template[start..].to_string(),
        });
    }

    out.push_str(&template[literal_from..]);
    Ok(out)
}

fn resolve<'t>(reference: &str, table: &'t StringTable) -> Result<&'t str, UnresolvedReference> {
    let unresolved = || UnresolvedReference {
        reference: reference.to_string(),
    };

    let (kind, id) = reference.split_once('.').ok_or_else(unresolved)?;
    let kind: ResourceKind = kind.parse().map_err(|_| unresolved())?;

    table.get(kind, id).ok_or_else(unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table() -> StringTable {
        let mut table = StringTable::new();
        table.insert(ResourceKind::String, "title", "Top");
        table.insert(ResourceKind::String, "self", "$(string.title)");
        table.insert(ResourceKind::Presentation, "Pres", "");
        table
    }

    #[test]
    fn test_expands_whole_template() {
        assert_eq!(expand("$(string.title)", &table()).unwrap(), "Top");
    }

    #[test]
    fn test_expands_embedded_tokens() {
        assert_eq!(
            expand("[$(string.title)] and $(string.title)!", &table()).unwrap(),
            "[Top] and Top!"
        );
    }

    #[test]
    fn test_presentation_expands_to_empty() {
        assert_eq!(expand("a$(presentation.Pres)b", &table()).unwrap(), "ab");
    }

    #[test]
    fn test_values_are_not_rescanned() {
        assert_eq!(expand("$(string.self)", &table()).unwrap(), "$(string.title)");
    }

    #[test]
    fn test_literal_dollars_are_kept() {
        assert_eq!(expand("cost $5 $", &table()).unwrap(), "cost $5 $");
        assert_eq!(expand("$(string.title) costs $", &table()).unwrap(), "Top costs $");
    }

    #[test]
    fn test_unterminated_token_is_reported() {
        let err = expand("open $(string.title", &table()).unwrap_err();
        assert_eq!(err.reference, "string.title");

        let err = expand("$(string.title) and $(", &table()).unwrap_err();
        assert_eq!(err.reference, "");
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(expand("Plain name", &table()).unwrap(), "Plain name");
        assert_eq!(expand("", &table()).unwrap(), "");
    }

    #[test]
    fn test_unknown_string_is_reported() {
        assert_eq!(
            expand("$(string.missing)", &table()).unwrap_err(),
            UnresolvedReference {
                reference: "string.missing".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_kind_is_reported() {
        let err = expand("$(explain.title)", &table()).unwrap_err();
        assert_eq!(err.reference, "explain.title");

        let err = expand("$(title)", &table()).unwrap_err();
        assert_eq!(err.reference, "title");
    }
}
