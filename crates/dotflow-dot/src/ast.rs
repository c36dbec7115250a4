use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Attribute map shared by graphs, nodes, and edges.
pub type Attrs = BTreeMap<String, AttrValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub id: String,
    pub attrs: Attrs,
    pub nodes: BTreeMap<String, Node>,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub attrs: Attrs,
    /// Keys authored directly on this node. Defaults and stylesheet rules
    /// never overwrite these.
    pub explicit: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub from: String,
    pub to: String,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl AttrValue {
    /// Classify an unquoted value: `true`/`false`, `-?\d+`, `-?(\d+\.\d+|\d+\.)`,
    /// otherwise a plain string.
    pub fn from_bare(raw: &str) -> Self {
        match raw {
            "true" => return AttrValue::Boolean(true),
            "false" => return AttrValue::Boolean(false),
            _ => {}
        }

        let digits = raw.strip_prefix('-').unwrap_or(raw);
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = raw.parse::<i64>() {
                return AttrValue::Integer(n);
            }
        }
        if let Some((whole, frac)) = digits.split_once('.') {
            let whole_ok = !whole.is_empty() && whole.bytes().all(|b| b.is_ascii_digit());
            let frac_ok = frac.bytes().all(|b| b.is_ascii_digit());
            if whole_ok && frac_ok {
                if let Ok(f) = raw.trim_end_matches('.').parse::<f64>() {
                    return AttrValue::Float(f);
                }
            }
        }
        AttrValue::String(raw.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Integer(n) => Some(*n as f64),
            AttrValue::Float(f) if f.is_finite() => Some(*f),
            AttrValue::String(s) => parse_leading_int(s).map(|n| n as f64),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttrValue::String(s) => serde_json::Value::String(s.clone()),
            AttrValue::Integer(n) => serde_json::Value::from(*n),
            AttrValue::Float(f) => serde_json::Value::from(*f),
            AttrValue::Boolean(b) => serde_json::Value::Bool(*b),
        }
    }
}

impl std::fmt::Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::String(s) => f.write_str(s),
            AttrValue::Integer(n) => write!(f, "{n}"),
            AttrValue::Float(v) => write!(f, "{v}"),
            AttrValue::Boolean(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::String(value.to_string())
    }
}

/// Parse an optionally signed run of leading digits, ignoring whatever follows
/// (`"30s"` is 30, `"x1"` is nothing).
pub fn parse_leading_int(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let (sign, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse::<i64>().ok().map(|n| sign * n)
}

// ---------------------------------------------------------------------------
// Typed attribute access
// ---------------------------------------------------------------------------

/// String-valued attribute; numbers and booleans are not coerced.
pub fn attr_str<'a>(attrs: &'a Attrs, key: &str) -> Option<&'a str> {
    attrs.get(key).and_then(AttrValue::as_str)
}

/// Boolean attribute. Numbers count as `!= 0`; strings only as
/// case-insensitive `true`/`false`.
pub fn attr_bool(attrs: &Attrs, key: &str, default: bool) -> bool {
    match attrs.get(key) {
        Some(AttrValue::Boolean(b)) => *b,
        Some(AttrValue::Integer(n)) => *n != 0,
        Some(AttrValue::Float(f)) => *f != 0.0,
        Some(AttrValue::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" => true,
            "false" => false,
            _ => default,
        },
        None => default,
    }
}

/// Integer attribute. Floats truncate; strings use their leading integer.
pub fn attr_int(attrs: &Attrs, key: &str, default: i64) -> i64 {
    attrs
        .get(key)
        .and_then(AttrValue::as_f64)
        .map(|f| f as i64)
        .unwrap_or(default)
}

impl Graph {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attrs: Attrs::new(),
            nodes: BTreeMap::new(),
            edges: Vec::new(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn str_attr(&self, key: &str) -> Option<&str> {
        attr_str(&self.attrs, key)
    }

    pub fn int_attr(&self, key: &str, default: i64) -> i64 {
        attr_int(&self.attrs, key, default)
    }
}

impl Node {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attrs: Attrs::new(),
            explicit: BTreeSet::new(),
        }
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }

    pub fn str_attr(&self, key: &str) -> Option<&str> {
        attr_str(&self.attrs, key)
    }

    pub fn bool_attr(&self, key: &str, default: bool) -> bool {
        attr_bool(&self.attrs, key, default)
    }

    pub fn int_attr(&self, key: &str, default: i64) -> i64 {
        attr_int(&self.attrs, key, default)
    }

    pub fn is_explicit(&self, key: &str) -> bool {
        self.explicit.contains(key)
    }

    /// Author an attribute directly on the node.
    pub fn set_explicit(&mut self, key: impl Into<String>, value: AttrValue) {
        let key = key.into();
        self.explicit.insert(key.clone());
        self.attrs.insert(key, value);
    }

    /// Write a lower-priority value. Returns `false` when the key is explicit.
    pub fn set_inherited(&mut self, key: &str, value: AttrValue) -> bool {
        if self.is_explicit(key) {
            return false;
        }
        self.attrs.insert(key.to_string(), value);
        true
    }

    /// Entries of the comma-separated `class` attribute.
    pub fn classes(&self) -> Vec<String> {
        self.str_attr("class")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Union `classes` into the `class` attribute, keeping first-seen order.
    pub fn add_classes(&mut self, classes: &[String]) {
        let mut current = self.classes();
        for class in classes {
            if !class.is_empty() && !current.contains(class) {
                current.push(class.clone());
            }
        }
        if current.is_empty() {
            return;
        }
        self.attrs
            .insert("class".to_string(), AttrValue::String(current.join(",")));
    }
}

impl Edge {
    pub fn label(&self) -> Option<&str> {
        attr_str(&self.attrs, "label")
    }

    pub fn condition(&self) -> Option<&str> {
        attr_str(&self.attrs, "condition")
    }

    /// Numeric `weight`, defaulting to 0.
    pub fn weight(&self) -> f64 {
        self.attrs
            .get("weight")
            .and_then(AttrValue::as_f64)
            .unwrap_or(0.0)
    }
}
