//! Property path expressions.
//!
//! A handle binds each of its fields to a path inside its value tree, such
//! as `value`, `motor.speed` or `axes[2]['pos']`.
//!
//! # Grammar
//!
//! | Form | Segment |
//! |------|---------|
//! | `name` | name (digit-only names between dots are indices) |
//! | `.name` | name following another segment |
//! | `[3]` | index |
//! | `['x']`, `["x"]` | quoted name, may contain any character but its quote |
//!
//! Rejected: empty expressions, a leading `.` or `[`, unmatched `[`, `]`
//! or quotes, whitespace, non-numeric unquoted indices and empty quoted
//! names.
//!
//! # Example
//!
//! ```
//! use beckhoff_ads::{PropertyPath, Segment, Value};
//!
//! let path: PropertyPath = "a.b[2].c".parse().unwrap();
//! assert_eq!(
//!     path.segments(),
//!     &[
//!         Segment::Name("a".into()),
//!         Segment::Name("b".into()),
//!         Segment::Index(2),
//!         Segment::Name("c".into()),
//!     ]
//! );
//!
//! let mut root = Value::object();
//! path.bind(&mut root, Some(Value::Int(7))).unwrap();
//! assert_eq!(path.resolve(&root), Some(&Value::Int(7)));
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{AdsError, Result};
use crate::value::Value;

/// Largest array index [`PropertyPath::bind`] will grow an array to.
pub const MAX_BIND_INDEX: usize = 1 << 20;

/// One step of a property path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Object member.
    Name(String),
    /// Array element.
    Index(usize),
}

impl Segment {
    fn key(&self) -> String {
        match self {
            Self::Name(name) => name.clone(),
            Self::Index(i) => i.to_string(),
        }
    }
}

/// Parsed property path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyPath {
    text: String,
    segments: Vec<Segment>,
}

impl PropertyPath {
    /// Parses an expression.
    ///
    /// # Errors
    ///
    /// Returns `AdsError::InvalidPath` naming the offending position.
    pub fn parse(text: &str) -> Result<Self> {
        let segments = parse_segments(text)?;
        Ok(Self {
            text: text.to_owned(),
            segments,
        })
    }

    /// Single-name path; the name is not parsed.
    pub(crate) fn name(name: &str) -> Self {
        Self {
            text: name.to_owned(),
            segments: vec![Segment::Name(name.to_owned())],
        }
    }

    /// Returns the segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns the expression text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns this path with `[index]` appended.
    pub fn with_index(&self, index: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::Index(index));
        Self {
            text: format!("{}[{}]", self.text, index),
            segments,
        }
    }

    /// Looks up the value at this path.
    pub fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.segments.iter().try_fold(root, |node, segment| match (node, segment) {
            (Value::Object(map), segment) => map.get(&segment.key()),
            (Value::Array(items), Segment::Index(i)) => items.get(*i),
            (Value::Array(items), Segment::Name(name)) => {
                name.parse::<usize>().ok().and_then(|i| items.get(i))
            }
            _ => None,
        })
    }

    /// Stores `value` at this path, or removes the leaf for `None`.
    ///
    /// Missing containers are created on the way: an object when the next
    /// segment is a name, an array when it is an index. A container of the
    /// wrong kind is replaced. Removing an array element shifts the elements
    /// after it. Removal never creates containers.
    ///
    /// # Errors
    ///
    /// Returns `AdsError::InvalidPath` if storing would grow an array past
    /// [`MAX_BIND_INDEX`]. The tree is left as far as it was built.
    pub fn bind(&self, root: &mut Value, value: Option<Value>) -> Result<()> {
        bind_at(root, &self.segments, value)
    }
}

impl FromStr for PropertyPath {
    type Err = AdsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn unexpected(c: char, pos: usize) -> AdsError {
    AdsError::invalid_path(format!("unexpected {c} at position {pos}"))
}

fn unterminated() -> AdsError {
    AdsError::invalid_path("unterminated expression")
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn index_segment(s: &str, pos: usize) -> Result<Segment> {
    s.parse::<usize>()
        .map(Segment::Index)
        .map_err(|_| AdsError::invalid_path(format!("array index out of range at position {pos}")))
}

fn dotted_segment(s: &str, pos: usize) -> Result<Segment> {
    if is_digits(s) {
        index_segment(s, pos)
    } else {
        Ok(Segment::Name(s.to_owned()))
    }
}

fn parse_segments(text: &str) -> Result<Vec<Segment>> {
    let chars: Vec<char> = text.chars().collect();
    let length = chars.len();
    if length == 0 {
        return Err(AdsError::invalid_path("zero-length"));
    }

    let slice = |from: usize, to: usize| -> String { chars[from..to].iter().collect() };
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    let mut in_box = false;
    let mut quote = '"';

    for i in 0..length {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        if in_string {
            if c != quote {
                continue;
            }
            if i == start {
                return Err(AdsError::invalid_path(format!(
                    "zero-length string at position {start}"
                )));
            }
            parts.push(Segment::Name(slice(start, i)));
            if in_box && next != Some(']') {
                return Err(AdsError::invalid_path(format!(
                    "unexpected array expression at position {start}"
                )));
            }
            if !in_box {
                if let Some(n) = next.filter(|n| *n != '[' && *n != '.') {
                    return Err(unexpected(n, i + 1));
                }
            }
            start = i + 1;
            in_string = false;
            continue;
        }

        match c {
            '\'' | '"' => {
                if i != start {
                    return Err(unexpected(c, i));
                }
                in_string = true;
                quote = c;
                start = i + 1;
            }
            '.' => {
                if i == 0 {
                    return Err(unexpected(c, i));
                }
                if start != i {
                    parts.push(dotted_segment(&slice(start, i), start)?);
                }
                match next {
                    None => return Err(unterminated()),
                    Some(n) if !(n.is_ascii_alphanumeric() || n == '$' || n == '_') => {
                        return Err(unexpected(n, i + 1));
                    }
                    Some(_) => {}
                }
                start = i + 1;
            }
            '[' => {
                if i == 0 {
                    return Err(unexpected(c, i));
                }
                if start != i {
                    parts.push(Segment::Name(slice(start, i)));
                }
                match next {
                    None => return Err(unterminated()),
                    Some(n) if !(n == '\'' || n == '"' || n.is_ascii_digit()) => {
                        return Err(unexpected(n, i + 1));
                    }
                    Some(_) => {}
                }
                start = i + 1;
                in_box = true;
            }
            ']' => {
                if !in_box {
                    return Err(unexpected(c, i));
                }
                if start != i {
                    let v = slice(start, i);
                    if !is_digits(&v) {
                        return Err(AdsError::invalid_path(format!(
                            "unexpected array expression at position {start}"
                        )));
                    }
                    parts.push(index_segment(&v, start)?);
                }
                start = i + 1;
                in_box = false;
            }
            c if c.is_whitespace() => return Err(unexpected(c, i)),
            _ => {}
        }
    }

    if in_box || in_string {
        return Err(unterminated());
    }
    if start < length {
        parts.push(dotted_segment(&slice(start, length), start)?);
    }
    Ok(parts)
}

fn empty_container(next: &Segment) -> Value {
    match next {
        Segment::Index(_) => Value::Array(Vec::new()),
        Segment::Name(_) => Value::object(),
    }
}

/// Makes `items[i]` addressable, padding with `Null`.
fn grow_to(items: &mut Vec<Value>, i: usize) -> Result<()> {
    if i > MAX_BIND_INDEX {
        return Err(AdsError::invalid_path(format!(
            "array index {i} exceeds the limit of {MAX_BIND_INDEX}"
        )));
    }
    if items.len() <= i {
        items.resize(i + 1, Value::Null);
    }
    Ok(())
}

fn child_mut<'a>(
    slot: &'a mut Value,
    key: &Segment,
    next: &Segment,
    create: bool,
) -> Result<Option<&'a mut Value>> {
    if matches!((&*slot, key), (Value::Array(_), Segment::Index(_))) {
        let (Value::Array(items), Segment::Index(i)) = (slot, key) else {
            return Ok(None);
        };
        let i = *i;
        if items.get(i).map_or(true, Value::is_null) {
            if !create {
                return Ok(None);
            }
            grow_to(items, i)?;
            items[i] = empty_container(next);
        }
        return Ok(items.get_mut(i));
    }

    if !matches!(slot, Value::Object(_)) {
        if !create {
            return Ok(None);
        }
        *slot = Value::object();
    }
    let Value::Object(map) = slot else {
        return Ok(None);
    };
    let name = key.key();
    if !map.contains_key(&name) {
        if !create {
            return Ok(None);
        }
        map.insert(name.clone(), empty_container(next));
    }
    Ok(map.get_mut(&name))
}

fn bind_at(slot: &mut Value, segments: &[Segment], value: Option<Value>) -> Result<()> {
    let Some((key, rest)) = segments.split_first() else {
        return Ok(());
    };
    if let Some(next) = rest.first() {
        let create = value.is_some();
        if let Some(child) = child_mut(slot, key, next, create)? {
            bind_at(child, rest, value)?;
        }
        return Ok(());
    }

    match value {
        None => match (slot, key) {
            (Value::Array(items), Segment::Index(i)) => {
                if *i < items.len() {
                    items.remove(*i);
                }
            }
            (Value::Object(map), key) => {
                map.remove(&key.key());
            }
            _ => {}
        },
        Some(value) => {
            if let (Value::Array(items), Segment::Index(i)) = (&mut *slot, key) {
                grow_to(items, *i)?;
                items[*i] = value;
                return Ok(());
            }
            if !matches!(slot, Value::Object(_)) {
                *slot = Value::object();
            }
            if let Value::Object(map) = slot {
                map.insert(key.key(), value);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Segment {
        Segment::Name(s.to_owned())
    }

    #[test]
    fn test_parse_mixed() {
        let path = PropertyPath::parse("a.b[2].c").unwrap();
        assert_eq!(
            path.segments(),
            &[name("a"), name("b"), Segment::Index(2), name("c")]
        );
        assert_eq!(path.to_string(), "a.b[2].c");
    }

    #[test]
    fn test_parse_digit_segments() {
        let path = PropertyPath::parse("list.0.x").unwrap();
        assert_eq!(path.segments(), &[name("list"), Segment::Index(0), name("x")]);
        let path = PropertyPath::parse("list.12").unwrap();
        assert_eq!(path.segments(), &[name("list"), Segment::Index(12)]);
    }

    #[test]
    fn test_parse_quoted() {
        let path = PropertyPath::parse("a['b c'][\"d.e\"].f").unwrap();
        assert_eq!(path.segments(), &[name("a"), name("b c"), name("d.e"), name("f")]);
        let path = PropertyPath::parse("'x'.y").unwrap();
        assert_eq!(path.segments(), &[name("x"), name("y")]);
    }

    #[test]
    fn test_parse_rejects() {
        for bad in [
            "", "a[", ".a", "a[1", "a b", "[0]", "a]", "a.", "a[x]", "a['']", "a['b'c]",
            "a..b", "a'b'", "'a'b", "a[-1]", "a.\tb",
        ] {
            assert!(PropertyPath::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_bind_creates_containers() {
        let mut root = Value::object();
        PropertyPath::parse("a.b[1].c")
            .unwrap()
            .bind(&mut root, Some(Value::Int(5)))
            .unwrap();
        let a = root.get("a").unwrap();
        let b = a.get("b").unwrap().as_array().unwrap();
        assert_eq!(b.len(), 2);
        assert_eq!(b[0], Value::Null);
        assert_eq!(b[1].get("c"), Some(&Value::Int(5)));
    }

    #[test]
    fn test_bind_array_elements() {
        let mut root = Value::object();
        for i in 0..3 {
            PropertyPath::parse("value")
                .unwrap()
                .with_index(i)
                .bind(&mut root, Some(Value::UInt(i as u64 * 10)))
                .unwrap();
        }
        assert_eq!(
            root.get("value"),
            Some(&Value::Array(vec![
                Value::UInt(0),
                Value::UInt(10),
                Value::UInt(20)
            ]))
        );
    }

    #[test]
    fn test_bind_none_deletes_and_splices() {
        let mut root = Value::object();
        let path = PropertyPath::parse("v[1]").unwrap();
        for i in 0..3usize {
            PropertyPath::parse("v")
                .unwrap()
                .with_index(i)
                .bind(&mut root, Some(Value::from(i as u32)))
                .unwrap();
        }
        path.bind(&mut root, None).unwrap();
        assert_eq!(
            root.get("v"),
            Some(&Value::Array(vec![Value::UInt(0), Value::UInt(2)]))
        );

        let key = PropertyPath::parse("v").unwrap();
        key.bind(&mut root, None).unwrap();
        assert_eq!(root.get("v"), None);
    }

    #[test]
    fn test_bind_none_does_not_create() {
        let mut root = Value::object();
        PropertyPath::parse("a.b.c")
            .unwrap()
            .bind(&mut root, None)
            .unwrap();
        assert_eq!(root, Value::object());
    }

    #[test]
    fn test_resolve_missing() {
        let root = Value::object();
        assert_eq!(PropertyPath::parse("x.y").unwrap().resolve(&root), None);
    }

    #[test]
    fn test_resolve_numeric_key_on_object() {
        let mut root = Value::object();
        PropertyPath::parse("m['3']")
            .unwrap()
            .bind(&mut root, Some(Value::Bool(true)))
            .unwrap();
        let by_index = PropertyPath::parse("m[3]").unwrap();
        assert_eq!(by_index.resolve(&root), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_bind_rejects_huge_index() {
        let mut root = Value::object();
        let path = PropertyPath::parse("value[18446744073709551615]").unwrap();
        assert!(path.bind(&mut root, Some(Value::Int(1))).is_err());

        let nested = PropertyPath::parse("value[2000000].x").unwrap();
        assert!(nested.bind(&mut root, Some(Value::Int(1))).is_err());

        let edge = PropertyPath::parse("v").unwrap().with_index(MAX_BIND_INDEX);
        edge.bind(&mut root, Some(Value::Int(1))).unwrap();
        assert_eq!(
            root.get("v").and_then(Value::as_array).map(<[Value]>::len),
            Some(MAX_BIND_INDEX + 1)
        );
    }

    #[test]
    fn test_remove_huge_index_is_noop() {
        let mut root = Value::object();
        let path = PropertyPath::parse("v[18446744073709551615]").unwrap();
        path.bind(&mut root, None).unwrap();
        assert_eq!(root, Value::object());
    }
}
