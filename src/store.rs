//! # Document Stores
//!
//! A store converts between on-disk bytes and [`TreeBranch`]es for one
//! document format, both in plain form and in encrypted form (where the
//! `sops` metadata section sits next to the content in every branch).
//!
//! | Extension | Format | Branches |
//! | --- | --- | --- |
//! | `.json` | JSON | exactly one |
//! | anything else | YAML | one per `---` document |
//!
//! Full-line YAML comments are kept with the entry below them and written
//! back verbatim; they are never encrypted. JSON has no comments.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, SopsError};
use crate::metadata::{Metadata, METADATA_KEY};
use crate::tree::{Key, Tree, TreeBranch, TreeItem, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
}

/// Detect the document format from the file name.
pub fn format_for_path(path: &Path) -> Format {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
        _ => Format::Yaml,
    }
}

pub fn store_for_format(format: Format) -> Box<dyn Store> {
    match format {
        Format::Yaml => Box::new(YamlStore),
        Format::Json => Box::new(JsonStore),
    }
}

pub trait Store {
    fn load_plain(&self, data: &[u8]) -> Result<Vec<TreeBranch>>;

    fn emit_plain(&self, branches: &[TreeBranch]) -> Result<Vec<u8>>;

    /// Parse an encrypted document; the metadata section is removed from
    /// every branch and returned in [`Tree::metadata`].
    fn load_encrypted(&self, data: &[u8]) -> Result<Tree>;

    fn emit_encrypted(&self, tree: &Tree) -> Result<Vec<u8>>;
}

/// Split the metadata section off the branches; it must appear at least once.
fn extract_metadata(
    mut branches: Vec<TreeBranch>,
    decode: impl Fn(&Value) -> Result<Metadata>,
) -> Result<Tree> {
    let key = Key::from(METADATA_KEY);
    let mut metadata = None;
    for branch in &mut branches {
        let comments: Vec<String> = branch
            .items()
            .iter()
            .filter(|item| item.key == key)
            .flat_map(|item| item.comments.iter().cloned())
            .collect();
        if let Some(section) = branch.remove(&key) {
            if metadata.is_none() {
                metadata = Some(decode(&section)?);
            }
            let after = branch.take_trailing_comments();
            branch.extend_trailing_comments(comments.into_iter().chain(after));
        }
    }

    Ok(Tree {
        branches,
        metadata: metadata.ok_or(SopsError::MissingMetadata)?,
    })
}

fn parse_error(e: impl std::fmt::Display) -> SopsError {
    SopsError::Parse(e.to_string())
}

fn emit_error(e: impl std::fmt::Display) -> SopsError {
    SopsError::Emit(e.to_string())
}

pub struct YamlStore;

impl YamlStore {
    /// Join documents with `---`, restoring each branch's comments.
    /// Trailing comments go above `trailing_before` when that top-level key exists.
    fn emit_documents(
        &self,
        documents: Vec<(serde_yaml::Mapping, &TreeBranch)>,
        trailing_before: Option<&str>,
    ) -> Result<Vec<u8>> {
        let mut out = String::new();
        for (i, (document, branch)) in documents.into_iter().enumerate() {
            if i > 0 {
                out.push_str("---\n");
            }
            let emitted = serde_yaml::to_string(&document).map_err(emit_error)?;
            out.push_str(&comments::render(&emitted, branch, trailing_before));
        }
        Ok(out.into_bytes())
    }
}

impl Store for YamlStore {
    fn load_plain(&self, data: &[u8]) -> Result<Vec<TreeBranch>> {
        let text = std::str::from_utf8(data).map_err(parse_error)?;
        let mut branches = serde_yaml::Deserializer::from_str(text)
            .map(|document| {
                let value = serde_yaml::Value::deserialize(document).map_err(parse_error)?;
                yaml::document_to_branch(value)
            })
            .collect::<Result<Vec<_>>>()?;
        comments::attach(&mut branches, comments::scan(text));
        Ok(branches)
    }

    fn emit_plain(&self, branches: &[TreeBranch]) -> Result<Vec<u8>> {
        let documents = branches
            .iter()
            .map(|branch| (yaml::branch_to_mapping(branch), branch))
            .collect();
        self.emit_documents(documents, None)
    }

    fn load_encrypted(&self, data: &[u8]) -> Result<Tree> {
        extract_metadata(self.load_plain(data)?, |section| {
            serde_yaml::from_value(yaml::value_to_yaml(section)).map_err(parse_error)
        })
    }

    fn emit_encrypted(&self, tree: &Tree) -> Result<Vec<u8>> {
        let metadata = serde_yaml::to_value(&tree.metadata).map_err(emit_error)?;
        let documents = tree
            .branches
            .iter()
            .map(|branch| {
                let mut mapping = yaml::branch_to_mapping(branch);
                mapping.insert(METADATA_KEY.into(), metadata.clone());
                (mapping, branch)
            })
            .collect();
        self.emit_documents(documents, Some(METADATA_KEY))
    }
}

mod yaml {
    use super::*;
    use serde_yaml::{Mapping, Number};

    pub(super) fn document_to_branch(value: serde_yaml::Value) -> Result<TreeBranch> {
        match value {
            serde_yaml::Value::Mapping(mapping) => mapping_to_branch(mapping),
            serde_yaml::Value::Null => Ok(TreeBranch::new()),
            other => Err(SopsError::Parse(format!(
                "top-level document must be a mapping, found {other:?}"
            ))),
        }
    }

    fn mapping_to_branch(mapping: Mapping) -> Result<TreeBranch> {
        mapping
            .into_iter()
            .map(|(key, value)| Ok(TreeItem::new(yaml_to_key(key)?, yaml_to_value(value)?)))
            .collect::<Result<Vec<_>>>()
            .map(TreeBranch::from_items)
    }

    fn yaml_to_key(key: serde_yaml::Value) -> Result<Key> {
        match key {
            serde_yaml::Value::String(s) => Ok(Key::Str(s)),
            serde_yaml::Value::Number(n) if n.is_i64() => Ok(Key::Int(n.as_i64().unwrap_or_default())),
            serde_yaml::Value::Bool(b) => Ok(Key::Str(b.to_string())),
            other => Err(SopsError::Parse(format!("unsupported mapping key {other:?}"))),
        }
    }

    fn yaml_to_value(value: serde_yaml::Value) -> Result<Value> {
        Ok(match value {
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::Bool(b) => Value::Bool(b),
            serde_yaml::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_yaml::Value::String(s) => Value::Str(s),
            serde_yaml::Value::Sequence(values) => Value::Array(
                values
                    .into_iter()
                    .map(yaml_to_value)
                    .collect::<Result<Vec<_>>>()?,
            ),
            serde_yaml::Value::Mapping(mapping) => Value::Branch(mapping_to_branch(mapping)?),
            serde_yaml::Value::Tagged(tagged) => yaml_to_value(tagged.value)?,
        })
    }

    pub(super) fn branch_to_mapping(branch: &TreeBranch) -> Mapping {
        branch
            .items()
            .iter()
            .map(|item| {
                let key = match &item.key {
                    Key::Str(s) => serde_yaml::Value::String(s.clone()),
                    Key::Int(i) => serde_yaml::Value::Number(Number::from(*i)),
                };
                (key, value_to_yaml(&item.value))
            })
            .collect()
    }

    pub(super) fn value_to_yaml(value: &Value) -> serde_yaml::Value {
        match value {
            Value::Null => serde_yaml::Value::Null,
            Value::Bool(b) => serde_yaml::Value::Bool(*b),
            Value::Int(i) => serde_yaml::Value::Number(Number::from(*i)),
            Value::Float(f) => serde_yaml::Value::Number(Number::from(*f)),
            Value::Str(s) => serde_yaml::Value::String(s.clone()),
            Value::Array(values) => {
                serde_yaml::Value::Sequence(values.iter().map(value_to_yaml).collect())
            }
            Value::Branch(branch) => serde_yaml::Value::Mapping(branch_to_mapping(branch)),
        }
    }
}

mod comments {
    //! Full-line comments of a YAML document, located by the key path of the
    //! entry they precede. Comments inside sequences and block scalars stay
    //! with the next entry after them.

    use std::collections::HashMap;

    use crate::tree::{TreeBranch, TreeItem, Value};

    #[derive(Debug, Default, PartialEq)]
    pub(super) struct DocumentComments {
        /// Comment lines keyed by the path of the entry below them.
        pub(super) entries: Vec<(Vec<String>, Vec<String>)>,
        pub(super) trailing: Vec<String>,
    }

    #[derive(Debug, Clone, Copy)]
    enum Opaque {
        /// Items of a block sequence starting at this indent.
        Sequence(usize),
        /// Body of a block scalar whose key sits at this indent.
        Block(usize),
    }

    #[derive(Debug)]
    enum Line {
        Blank,
        Comment(String),
        Key(Vec<String>),
        Other,
    }

    /// Tracks the mapping keys enclosing the current line.
    #[derive(Default)]
    struct Scanner {
        parents: Vec<(usize, String)>,
        opaque: Option<Opaque>,
    }

    impl Scanner {
        fn classify(&mut self, line: &str) -> Line {
            let content = line.trim();
            let indent = line.len() - line.trim_start().len();

            if let Some(Opaque::Block(key_indent)) = self.opaque {
                if content.is_empty() || indent > key_indent {
                    return Line::Other;
                }
                self.opaque = None;
            }
            if content.is_empty() {
                return Line::Blank;
            }
            if let Some(text) = content.strip_prefix('#') {
                return Line::Comment(text.to_string());
            }
            if let Some(Opaque::Sequence(item_indent)) = self.opaque {
                if indent > item_indent || (indent == item_indent && is_sequence_item(content)) {
                    return Line::Other;
                }
                self.opaque = None;
            }
            if is_sequence_item(content) {
                self.opaque = Some(Opaque::Sequence(indent));
                return Line::Other;
            }

            let Some((key, rest)) = split_key(content) else {
                return Line::Other;
            };
            while self.parents.last().is_some_and(|(i, _)| *i >= indent) {
                self.parents.pop();
            }
            let mut path: Vec<String> = self.parents.iter().map(|(_, k)| k.clone()).collect();
            path.push(key.clone());
            self.parents.push((indent, key));
            if is_block_indicator(rest) {
                self.opaque = Some(Opaque::Block(indent));
            }
            Line::Key(path)
        }
    }

    fn is_document_start(line: &str) -> bool {
        line == "---" || line.starts_with("--- ") || line.starts_with("---\t")
    }

    fn is_sequence_item(content: &str) -> bool {
        content == "-" || content.starts_with("- ") || content.starts_with("-\t")
    }

    fn is_block_indicator(rest: &str) -> bool {
        let indicator = rest.split(" #").next().unwrap_or_default().trim();
        let mut chars = indicator.chars();
        matches!(chars.next(), Some('|' | '>'))
            && chars.all(|c| c.is_ascii_digit() || c == '+' || c == '-')
    }

    /// Split `key: rest` into the unquoted key and whatever follows the colon.
    fn split_key(content: &str) -> Option<(String, &str)> {
        let (key, after) = match content.chars().next()? {
            '\'' => single_quoted(&content[1..])?,
            '"' => double_quoted(&content[1..])?,
            '[' | '{' | '?' | '&' | '*' | '!' | '|' | '>' | '%' | '@' | '`' => return None,
            _ => {
                let end = content.char_indices().find_map(|(i, c)| {
                    let next = content[i + c.len_utf8()..].chars().next();
                    (c == ':' && matches!(next, None | Some(' ' | '\t'))).then_some(i)
                })?;
                (content[..end].trim_end().to_string(), &content[end..])
            }
        };
        let rest = after.trim_start().strip_prefix(':')?;
        if rest.is_empty() || rest.starts_with([' ', '\t']) {
            Some((key, rest.trim()))
        } else {
            None
        }
    }

    fn single_quoted(s: &str) -> Option<(String, &str)> {
        let mut key = String::new();
        let mut chars = s.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c != '\'' {
                key.push(c);
            } else if chars.peek().is_some_and(|&(_, next)| next == '\'') {
                chars.next();
                key.push('\'');
            } else {
                return Some((key, &s[i + 1..]));
            }
        }
        None
    }

    fn double_quoted(s: &str) -> Option<(String, &str)> {
        let mut key = String::new();
        let mut chars = s.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => return Some((key, &s[i + 1..])),
                '\\' => match chars.next()?.1 {
                    'n' => key.push('\n'),
                    't' => key.push('\t'),
                    other => key.push(other),
                },
                _ => key.push(c),
            }
        }
        None
    }

    /// Collect the comments of every document in `text`.
    ///
    /// Comments before a leading `---` belong to the first document.
    pub(super) fn scan(text: &str) -> Vec<DocumentComments> {
        let mut documents = Vec::new();
        let mut current = DocumentComments::default();
        let mut scanner = Scanner::default();
        let mut pending = Vec::new();
        let mut has_content = false;

        for line in text.lines() {
            if is_document_start(line) {
                if has_content || !documents.is_empty() {
                    current.trailing.append(&mut pending);
                    documents.push(std::mem::take(&mut current));
                }
                scanner = Scanner::default();
                has_content = false;
                continue;
            }
            if line == "..." || line.starts_with('%') {
                continue;
            }
            match scanner.classify(line) {
                Line::Blank => {}
                Line::Comment(comment) => pending.push(comment),
                Line::Key(path) => {
                    has_content = true;
                    if !pending.is_empty() {
                        current.entries.push((path, std::mem::take(&mut pending)));
                    }
                }
                Line::Other => has_content = true,
            }
        }
        current.trailing.append(&mut pending);
        documents.push(current);
        documents
    }

    /// Hand scanned comments to the entries they precede; comments whose
    /// entry cannot be found become trailing comments of the branch.
    pub(super) fn attach(branches: &mut [TreeBranch], documents: Vec<DocumentComments>) {
        let Some(last) = branches.len().checked_sub(1) else {
            return;
        };
        for (index, document) in documents.into_iter().enumerate() {
            let branch = &mut branches[index.min(last)];
            for (path, comments) in document.entries {
                let item = if index > last { None } else { item_at(branch, &path) };
                match item {
                    Some(item) => item.comments.extend(comments),
                    None => branch.extend_trailing_comments(comments),
                }
            }
            branch.extend_trailing_comments(document.trailing);
        }
    }

    fn item_at<'a>(branch: &'a mut TreeBranch, path: &[String]) -> Option<&'a mut TreeItem> {
        let (first, rest) = path.split_first()?;
        let item = branch
            .items_mut()
            .iter_mut()
            .find(|item| item.key.to_string() == *first)?;
        if rest.is_empty() {
            return Some(item);
        }
        match &mut item.value {
            Value::Branch(child) => item_at(child, rest),
            _ => None,
        }
    }

    /// Write the comments of `branch` into its serialized form `emitted`.
    pub(super) fn render(emitted: &str, branch: &TreeBranch, trailing_before: Option<&str>) -> String {
        let mut by_path = HashMap::new();
        collect(branch, &mut Vec::new(), &mut by_path);
        let trailing = branch.trailing_comments();
        if by_path.is_empty() && trailing.is_empty() {
            return emitted.to_string();
        }

        let mut out = String::with_capacity(emitted.len());
        let mut scanner = Scanner::default();
        let mut trailing_written = false;
        for line in emitted.lines() {
            if let Line::Key(path) = scanner.classify(line) {
                let top_level = path.len() == 1;
                if !trailing_written
                    && top_level
                    && trailing_before.is_some_and(|key| path[0] == key)
                {
                    push_comments(&mut out, "", trailing);
                    trailing_written = true;
                }
                if let Some(comments) = by_path.remove(&path) {
                    push_comments(&mut out, &line[..line.len() - line.trim_start().len()], comments);
                }
            }
            out.push_str(line);
            out.push('\n');
        }
        if !trailing_written {
            push_comments(&mut out, "", trailing);
        }
        out
    }

    fn collect<'a>(
        branch: &'a TreeBranch,
        path: &mut Vec<String>,
        out: &mut HashMap<Vec<String>, &'a [String]>,
    ) {
        for item in branch.items() {
            path.push(item.key.to_string());
            if !item.comments.is_empty() {
                out.entry(path.clone()).or_insert(item.comments.as_slice());
            }
            if let Value::Branch(child) = &item.value {
                collect(child, path, out);
            }
            path.pop();
        }
    }

    fn push_comments(out: &mut String, indent: &str, comments: &[String]) {
        for comment in comments {
            out.push_str(indent);
            out.push('#');
            out.push_str(comment);
            out.push('\n');
        }
    }

}

pub struct JsonStore;

impl JsonStore {
    fn emit_object(&self, object: serde_json::Map<String, serde_json::Value>) -> Result<Vec<u8>> {
        let mut out = serde_json::to_vec_pretty(&object).map_err(emit_error)?;
        out.push(b'\n');
        Ok(out)
    }

    fn single_branch<'a>(&self, branches: &'a [TreeBranch]) -> Result<&'a TreeBranch> {
        match branches {
            [branch] => Ok(branch),
            _ => Err(SopsError::Emit(format!(
                "JSON documents hold exactly one branch, got {}",
                branches.len()
            ))),
        }
    }
}

impl Store for JsonStore {
    fn load_plain(&self, data: &[u8]) -> Result<Vec<TreeBranch>> {
        match serde_json::from_slice(data).map_err(parse_error)? {
            serde_json::Value::Object(object) => Ok(vec![json::object_to_branch(object)?]),
            other => Err(SopsError::Parse(format!(
                "top-level JSON value must be an object, found {other}"
            ))),
        }
    }

    fn emit_plain(&self, branches: &[TreeBranch]) -> Result<Vec<u8>> {
        self.emit_object(json::branch_to_object(self.single_branch(branches)?)?)
    }

    fn load_encrypted(&self, data: &[u8]) -> Result<Tree> {
        extract_metadata(self.load_plain(data)?, |section| {
            serde_json::from_value(json::value_to_json(section)?).map_err(parse_error)
        })
    }

    fn emit_encrypted(&self, tree: &Tree) -> Result<Vec<u8>> {
        let mut object = json::branch_to_object(self.single_branch(&tree.branches)?)?;
        object.insert(
            METADATA_KEY.into(),
            serde_json::to_value(&tree.metadata).map_err(emit_error)?,
        );
        self.emit_object(object)
    }
}

mod json {
    use super::*;
    use serde_json::{Map, Number};

    pub(super) fn object_to_branch(object: Map<String, serde_json::Value>) -> Result<TreeBranch> {
        object
            .into_iter()
            .map(|(key, value)| Ok(TreeItem::new(key, json_to_value(value)?)))
            .collect::<Result<Vec<_>>>()
            .map(TreeBranch::from_items)
    }

    fn json_to_value(value: serde_json::Value) -> Result<Value> {
        Ok(match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(values) => Value::Array(
                values
                    .into_iter()
                    .map(json_to_value)
                    .collect::<Result<Vec<_>>>()?,
            ),
            serde_json::Value::Object(object) => Value::Branch(object_to_branch(object)?),
        })
    }

    pub(super) fn branch_to_object(branch: &TreeBranch) -> Result<Map<String, serde_json::Value>> {
        branch
            .items()
            .iter()
            .map(|item| Ok((item.key.to_string(), value_to_json(&item.value)?)))
            .collect()
    }

    pub(super) fn value_to_json(value: &Value) -> Result<serde_json::Value> {
        Ok(match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number(Number::from(*i)),
            Value::Float(f) => serde_json::Value::Number(
                Number::from_f64(*f)
                    .ok_or_else(|| SopsError::Emit(format!("{f} is not representable in JSON")))?,
            ),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Array(values) => serde_json::Value::Array(
                values.iter().map(value_to_json).collect::<Result<Vec<_>>>()?,
            ),
            Value::Branch(branch) => serde_json::Value::Object(branch_to_object(branch)?),
        })
    }
}
