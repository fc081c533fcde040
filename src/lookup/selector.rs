//! Matcher for the attribute selectors the step compiler emits.
//!
//! Grammar: `[tag]` `[` name `=` quoted-value `]`, where the value is wrapped
//! in `'` or `"` and may contain backslash escapes.

use std::collections::BTreeMap;
use std::iter::Peekable;
use std::str::Chars;

use super::LookupError;

/// A single `tag[name="value"]` selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSelector {
    pub tag: Option<String>,
    pub attribute: String,
    pub value: String,
}

impl AttributeSelector {
    pub fn parse(query: &str) -> Result<Self, LookupError> {
        let invalid = |reason: &str| LookupError::InvalidSelector(query.to_string(), reason.to_string());

        let mut chars = query.trim().chars().peekable();

        let tag = take_while(&mut chars, is_name_char);
        if chars.next() != Some('[') {
            return Err(invalid("expected '['"));
        }

        let attribute = take_while(&mut chars, is_name_char);
        if attribute.is_empty() {
            return Err(invalid("missing attribute name"));
        }
        if chars.next() != Some('=') {
            return Err(invalid("expected '=' after attribute name"));
        }

        let quote = match chars.next() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(invalid("attribute value must be quoted")),
        };

        let mut value = String::new();
        loop {
            match chars.next() {
                Some('\\') => match chars.next() {
                    Some(c) => value.push(c),
                    None => return Err(invalid("dangling escape")),
                },
                Some(c) if c == quote => break,
                Some(c) => value.push(c),
                None => return Err(invalid("unterminated attribute value")),
            }
        }

        if chars.next() != Some(']') {
            return Err(invalid("expected ']'"));
        }
        if chars.next().is_some() {
            return Err(invalid("unexpected trailing input"));
        }

        Ok(Self {
            tag: (!tag.is_empty()).then_some(tag),
            attribute,
            value,
        })
    }

    /// Whether an element with this tag and these attributes matches
    pub fn matches(&self, tag: &str, attributes: &BTreeMap<String, String>) -> bool {
        if let Some(ref wanted) = self.tag {
            if !wanted.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        attributes
            .get(&self.attribute)
            .is_some_and(|v| *v == self.value)
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn take_while(chars: &mut Peekable<Chars<'_>>, pred: fn(char) -> bool) -> String {
    let mut taken = String::new();
    while let Some(&c) = chars.peek() {
        if !pred(c) {
            break;
        }
        taken.push(c);
        chars.next();
    }
    taken
}
