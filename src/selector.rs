// ============================================================================
// TAG SELECTORS
// ============================================================================
// A small boolean language over tag sets, used to classify series:
//
//   a b       both `a` and `b` present (AND, whitespace separated)
//   a|b       `a` or `b` present (OR, inside one word)
//   !a        `a` absent (NOT, word prefix)
//   *         always true
//
// Words must start with a letter and may contain letters, digits, `_`, `.`
// and `=`, so `job=mysql` selects on a label value.
// ============================================================================

use std::fmt::{self, Display, Formatter};

use ahash::AHashSet;
use compact_str::CompactString;

use crate::error::SelectorError;

// ----------------------------------------------------------------------------
// Tags
// ----------------------------------------------------------------------------

/// A set of tags a selector is evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(AHashSet<CompactString>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(AHashSet::with_capacity(capacity))
    }

    pub fn insert(&mut self, tag: impl Into<CompactString>) -> bool {
        self.0.insert(tag.into())
    }

    #[inline]
    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: Into<CompactString>> FromIterator<T> for Tags {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

// ----------------------------------------------------------------------------
// Selector Tree
// ----------------------------------------------------------------------------

/// Parsed tag selector expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Matches everything (`*` or the empty expression)
    True,
    /// Matches when the tag is present
    Exact(CompactString),
    /// Negation
    Not(Box<Selector>),
    /// Both sides must match
    And(Box<Selector>, Box<Selector>),
    /// Either side must match
    Or(Box<Selector>, Box<Selector>),
}

impl Selector {
    pub fn exact(tag: impl Into<CompactString>) -> Self {
        Selector::Exact(tag.into())
    }

    pub fn not(inner: Selector) -> Self {
        Selector::Not(Box::new(inner))
    }

    pub fn and(lhs: Selector, rhs: Selector) -> Self {
        Selector::And(Box::new(lhs), Box::new(rhs))
    }

    pub fn or(lhs: Selector, rhs: Selector) -> Self {
        Selector::Or(Box::new(lhs), Box::new(rhs))
    }

    /// Evaluate against a tag set. `And`/`Or` short-circuit.
    pub fn matches(&self, tags: &Tags) -> bool {
        match self {
            Selector::True => true,
            Selector::Exact(tag) => tags.contains(tag),
            Selector::Not(inner) => !inner.matches(tags),
            Selector::And(lhs, rhs) => lhs.matches(tags) && rhs.matches(tags),
            Selector::Or(lhs, rhs) => lhs.matches(tags) || rhs.matches(tags),
        }
    }

    fn is_compound(&self) -> bool {
        matches!(self, Selector::And(..) | Selector::Or(..))
    }

    // Brace-free body of the display form.
    fn write_body(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Selector::True => write!(f, "*"),
            Selector::Exact(tag) => write!(f, "{tag}"),
            Selector::Not(inner) if inner.is_compound() => {
                write!(f, "!(")?;
                inner.write_body(f)?;
                write!(f, ")")
            }
            Selector::Not(inner) => {
                write!(f, "!")?;
                inner.write_body(f)
            }
            Selector::And(lhs, rhs) => {
                lhs.write_body(f)?;
                write!(f, " ")?;
                rhs.write_body(f)
            }
            Selector::Or(lhs, rhs) => {
                for side in [lhs, rhs] {
                    if matches!(side.as_ref(), Selector::And(..)) {
                        write!(f, "(")?;
                        side.write_body(f)?;
                        write!(f, ")")?;
                    } else {
                        side.write_body(f)?;
                    }
                    if std::ptr::eq(side, lhs) {
                        write!(f, "|")?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Displays in the braced form `{...}`; nested expressions never add inner braces.
impl Display for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        self.write_body(f)?;
        write!(f, "}}")
    }
}

// ----------------------------------------------------------------------------
// Parser
// ----------------------------------------------------------------------------

// [a-zA-Z][a-zA-Z0-9=_.]*
fn is_valid_word(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '=' | '_' | '.'))
}

/// Parse a selector expression. The empty expression selects everything.
pub fn parse_selector(line: &str) -> Result<Selector, SelectorError> {
    let mut words = line.split_whitespace();

    let Some(first) = words.next() else {
        return Ok(Selector::True);
    };

    let mut selector = parse_word(line, first)?;
    for word in words {
        selector = Selector::and(selector, parse_word(line, word)?);
    }
    Ok(selector)
}

fn parse_word(line: &str, word: &str) -> Result<Selector, SelectorError> {
    if !word.contains('|') {
        return parse_single_word(line, word);
    }

    let mut parts = word.split('|');
    let first = parts.next().unwrap_or_default();
    let mut selector = parse_single_word(line, first)?;
    for part in parts {
        selector = Selector::or(selector, parse_single_word(line, part)?);
    }
    Ok(selector)
}

fn parse_single_word(line: &str, word: &str) -> Result<Selector, SelectorError> {
    let (negated, body) = match word.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, word),
    };

    if body.is_empty() {
        return Err(SelectorError::EmptyWord {
            selector: line.to_string(),
        });
    }

    let selector = if body == "*" {
        Selector::True
    } else if is_valid_word(body) {
        Selector::exact(body)
    } else {
        return Err(SelectorError::ForbiddenSymbol {
            selector: line.to_string(),
            word: word.to_string(),
        });
    };

    Ok(if negated { Selector::not(selector) } else { selector })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use regex::Regex;
    use rstest::rstest;

    fn tags(items: &[&str]) -> Tags {
        items.iter().copied().collect()
    }

    fn braced_form() -> Regex {
        Regex::new(r"^\{[^{}]+\}$").unwrap()
    }

    #[test]
    fn test_parse_compound_expression() {
        let got = parse_selector("a b !c d|e f").unwrap();
        let want = Selector::and(
            Selector::and(
                Selector::and(
                    Selector::and(Selector::exact("a"), Selector::exact("b")),
                    Selector::not(Selector::exact("c")),
                ),
                Selector::or(Selector::exact("d"), Selector::exact("e")),
            ),
            Selector::exact("f"),
        );
        assert_eq!(got, want);
        assert!(got.matches(&tags(&["a", "b", "d", "f"])));
        assert!(!got.matches(&tags(&["a", "b", "c", "d", "f"])));
        assert!(!got.matches(&tags(&["a", "b", "f"])));
    }

    #[rstest]
    #[case("", Selector::True)]
    #[case("*", Selector::True)]
    #[case("a", Selector::exact("a"))]
    #[case("Z", Selector::exact("Z"))]
    #[case("a_b", Selector::exact("a_b"))]
    #[case("a=b", Selector::exact("a=b"))]
    #[case("!a", Selector::not(Selector::exact("a")))]
    #[case("!*", Selector::not(Selector::True))]
    #[case("a b", Selector::and(Selector::exact("a"), Selector::exact("b")))]
    #[case("a|b", Selector::or(Selector::exact("a"), Selector::exact("b")))]
    fn test_parse_valid(#[case] input: &str, #[case] want: Selector) {
        assert_eq!(parse_selector(input).unwrap(), want);
    }

    #[rstest]
    #[case("!")]
    #[case("a !")]
    #[case("a!b")]
    #[case("0a")]
    #[case("a b c*")]
    #[case("__")]
    #[case("a|b|c*")]
    #[case("a||b")]
    fn test_parse_invalid(#[case] input: &str) {
        assert!(parse_selector(input).is_err());
    }

    #[rstest]
    #[case(Selector::exact("a"), &["a", "b"], true)]
    #[case(Selector::exact("c"), &["a", "b"], false)]
    #[case(Selector::not(Selector::exact("c")), &["a", "b"], true)]
    #[case(Selector::not(Selector::exact("a")), &["a", "b"], false)]
    #[case(
        Selector::or(
            Selector::or(Selector::exact("c"), Selector::exact("d")),
            Selector::or(Selector::exact("e"), Selector::exact("b")),
        ),
        &["a", "b"],
        true
    )]
    #[case(
        Selector::and(
            Selector::and(Selector::exact("a"), Selector::exact("b")),
            Selector::and(Selector::exact("c"), Selector::exact("z")),
        ),
        &["a", "b", "c", "d"],
        false
    )]
    fn test_matches(#[case] selector: Selector, #[case] items: &[&str], #[case] want: bool) {
        assert_eq!(selector.matches(&tags(items)), want);
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(Selector::True.to_string(), "{*}");
        assert_eq!(Selector::exact("a").to_string(), "{a}");
        assert_eq!(Selector::not(Selector::exact("a")).to_string(), "{!a}");
        assert_eq!(
            Selector::not(Selector::or(Selector::exact("a"), Selector::exact("b"))).to_string(),
            "{!(a|b)}"
        );

        let nested = Selector::not(Selector::and(
            Selector::and(Selector::exact("a"), Selector::not(Selector::exact("b"))),
            Selector::or(Selector::exact("c"), Selector::not(Selector::not(Selector::exact("d")))),
        ));
        assert!(braced_form().is_match(&nested.to_string()));
    }

    proptest! {
        #[test]
        fn prop_parser_never_panics(input in "[ a-z0-9!|*=_.{}-]{0,24}") {
            let _ = parse_selector(&input);
        }

        #[test]
        fn prop_display_is_single_braced(input in "[a-c]( !?[a-c](\\|!?[a-c])?){0,4}") {
            let selector = parse_selector(&input).unwrap();
            prop_assert!(braced_form().is_match(&selector.to_string()));
        }
    }
}
