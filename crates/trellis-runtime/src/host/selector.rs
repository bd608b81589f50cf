use std::str::FromStr;

use crate::error::RuntimeError;
use crate::host::element::Element;

/// A compound simple selector: `tag#id.class[attr][attr=value]`.
///
/// Combinators and pseudo-classes are not supported; `*` matches any tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<(String, Option<String>)>,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self, RuntimeError> {
        let invalid = |reason: &str| RuntimeError::InvalidSelector {
            selector: source.to_string(),
            reason: reason.to_string(),
        };

        let input = source.trim();
        if input.is_empty() {
            return Err(invalid("empty selector"));
        }

        let mut selector = Selector::default();
        let mut chars = input.chars().peekable();

        if chars.peek() == Some(&'*') {
            chars.next();
        } else if chars.peek().is_some_and(|c| is_ident_char(*c)) {
            selector.tag = Some(take_ident(&mut chars).to_ascii_lowercase());
        }

        while let Some(c) = chars.next() {
            match c {
                '#' => {
                    let id = take_ident(&mut chars);
                    if id.is_empty() {
                        return Err(invalid("expected id after '#'"));
                    }
                    selector.id = Some(id);
                }
                '.' => {
                    let class = take_ident(&mut chars);
                    if class.is_empty() {
                        return Err(invalid("expected class after '.'"));
                    }
                    selector.classes.push(class);
                }
                '[' => {
                    let mut body = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == ']' {
                            closed = true;
                            break;
                        }
                        body.push(c);
                    }
                    if !closed {
                        return Err(invalid("unterminated attribute selector"));
                    }
                    selector.attributes.push(parse_attribute(&body).ok_or_else(|| {
                        invalid("expected [name] or [name=value]")
                    })?);
                }
                other if other.is_whitespace() || matches!(other, '>' | '+' | '~') => {
                    return Err(invalid("combinators are not supported"));
                }
                other => return Err(invalid(&format!("unexpected character {other:?}"))),
            }
        }

        Ok(selector)
    }

    pub fn matches(&self, element: &Element) -> bool {
        if let Some(tag) = &self.tag
            && element.tag() != *tag
        {
            return false;
        }
        if let Some(id) = &self.id
            && element.id().as_deref() != Some(id.as_str())
        {
            return false;
        }
        if !self.classes.iter().all(|c| element.has_class(c)) {
            return false;
        }
        self.attributes.iter().all(|(name, expected)| match expected {
            Some(value) => element.attribute(name).as_deref() == Some(value.as_str()),
            None => element.has_attribute(name),
        })
    }
}

impl FromStr for Selector {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Selector::parse(s)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn take_ident(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut ident = String::new();
    while let Some(&c) = chars.peek() {
        if !is_ident_char(c) {
            break;
        }
        ident.push(c);
        chars.next();
    }
    ident
}

fn parse_attribute(body: &str) -> Option<(String, Option<String>)> {
    let (name, value) = match body.split_once('=') {
        Some((name, value)) => {
            let value = value.trim();
            let unquoted = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            (name.trim(), Some(unquoted.to_string()))
        }
        None => (body.trim(), None),
    };
    if name.is_empty() || !name.chars().all(is_ident_char) {
        return None;
    }
    Some((name.to_string(), value))
}
