//! # Document Trees
//!
//! In-memory representation of a decrypted document: a [`Tree`] holds one
//! [`TreeBranch`] per top-level document (YAML files may carry several), and
//! each branch is an ordered list of key/value [`TreeItem`]s.
//!
//! Declaration order is preserved everywhere so that emitting an untouched
//! tree reproduces the same bytes. Comment lines travel with the item they
//! precede, or with the branch when nothing follows them.

use crate::metadata::Metadata;
use std::fmt;

/// Mapping key inside a branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Str(String),
    Int(i64),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(s) => f.write_str(s),
            Key::Int(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    Branch(TreeBranch),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeItem {
    pub key: Key,
    pub value: Value,
    /// Comment lines directly above the entry, without the leading `#`.
    pub comments: Vec<String>,
}

impl TreeItem {
    pub fn new(key: impl Into<Key>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            comments: Vec::new(),
        }
    }
}

/// One segment of a path into a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(Key),
    Index(usize),
}

impl PathSegment {
    fn to_key(&self) -> Key {
        match self {
            PathSegment::Key(key) => key.clone(),
            PathSegment::Index(index) => Key::Int(*index as i64),
        }
    }

    /// Whether this segment addresses `key`. A textual segment reaches an
    /// integer key with the same decimal spelling.
    fn matches(&self, key: &Key) -> bool {
        match (self, key) {
            (PathSegment::Key(Key::Str(s)), Key::Int(i)) => *s == i.to_string(),
            (segment, key) => segment.to_key() == *key,
        }
    }
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        PathSegment::Key(Key::from(s))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeBranch {
    items: Vec<TreeItem>,
    trailing_comments: Vec<String>,
}

impl TreeBranch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<TreeItem>) -> Self {
        Self {
            items,
            trailing_comments: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[TreeItem] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [TreeItem] {
        &mut self.items
    }

    pub fn into_items(self) -> Vec<TreeItem> {
        self.items
    }

    pub fn push(&mut self, item: TreeItem) {
        self.items.push(item);
    }

    /// Comment lines after the last entry.
    pub fn trailing_comments(&self) -> &[String] {
        &self.trailing_comments
    }

    pub fn extend_trailing_comments(&mut self, comments: impl IntoIterator<Item = String>) {
        self.trailing_comments.extend(comments);
    }

    pub fn take_trailing_comments(&mut self) -> Vec<String> {
        std::mem::take(&mut self.trailing_comments)
    }

    /// First entry addressed by `segment`.
    fn entry(&self, segment: &PathSegment) -> Option<&TreeItem> {
        self.items.iter().find(|item| segment.matches(&item.key))
    }

    /// First entry with the given key.
    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.items
            .iter()
            .find(|item| &item.key == key)
            .map(|item| &item.value)
    }

    /// Remove every entry with the given key, returning the first removed value.
    pub fn remove(&mut self, key: &Key) -> Option<Value> {
        let position = self.items.iter().position(|item| &item.key == key)?;
        let removed = self.items.remove(position);
        self.items.retain(|item| &item.key != key);
        Some(removed.value)
    }

    /// Look up the value at `path`, descending through branches and arrays.
    pub fn lookup(&self, path: &[PathSegment]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = &self.entry(first)?.value;
        for segment in rest {
            current = match (current, segment) {
                (Value::Branch(branch), segment) => &branch.entry(segment)?.value,
                (Value::Array(values), PathSegment::Index(index)) => values.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Return a copy of this branch with `value` stored at `path`.
    ///
    /// Existing keys are overwritten in place, missing keys are appended after
    /// their existing siblings, and missing ancestors are created. A scalar
    /// standing where the path needs a branch is replaced. Insertion is never
    /// destructive: siblings of a newly created root key are kept.
    pub fn set(&self, path: &[PathSegment], value: &Value) -> TreeBranch {
        let mut branch = self.clone();
        branch.insert_path(path, value);
        branch
    }

    fn insert_path(&mut self, path: &[PathSegment], value: &Value) {
        let Some((first, rest)) = path.split_first() else {
            return;
        };
        match self.items.iter_mut().find(|item| first.matches(&item.key)) {
            Some(item) => {
                let current = std::mem::replace(&mut item.value, Value::Null);
                item.value = set_value(Some(current), rest, value);
            }
            None => self.items.push(TreeItem::new(
                first.to_key(),
                set_value(None, rest, value),
            )),
        }
    }
}

fn set_value(current: Option<Value>, path: &[PathSegment], value: &Value) -> Value {
    let Some(first) = path.first() else {
        return value.clone();
    };

    match first {
        PathSegment::Index(index) => {
            let mut values = match current {
                Some(Value::Array(values)) => values,
                _ => Vec::new(),
            };
            if *index < values.len() {
                let slot = std::mem::replace(&mut values[*index], Value::Null);
                values[*index] = set_value(Some(slot), &path[1..], value);
            } else {
                values.push(set_value(None, &path[1..], value));
            }
            Value::Array(values)
        }
        PathSegment::Key(_) => {
            let mut branch = match current {
                Some(Value::Branch(branch)) => branch,
                _ => TreeBranch::new(),
            };
            branch.insert_path(path, value);
            Value::Branch(branch)
        }
    }
}

/// A whole document: its branches plus the encryption metadata.
#[derive(Debug, Clone)]
pub struct Tree {
    pub branches: Vec<TreeBranch>,
    pub metadata: Metadata,
}
