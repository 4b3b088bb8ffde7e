//! Flattening of manifest trees into individual resources
//!
//! A manifest file may hold a single object, an array of objects, or a
//! `kind: List` wrapper whose `items` are themselves any of the above.
//! [`decompose`] walks such a tree depth-first, left to right, and yields
//! every leaf object as a [`ResourceDocument`].
use serde_json::Value;

use crate::document::ResourceDocument;

/// One level of a parsed manifest tree
///
/// Children stay as raw json until the walk reaches them, so classifying
/// a node never recurses.
#[derive(Clone, Debug, PartialEq)]
pub enum ManifestSource {
    /// An ordered sequence of nodes, e.g. the documents of a multi-document yaml file
    Sequence(Vec<Value>),
    /// A `kind: List` wrapper; its own apiVersion and metadata are ignored
    List(Vec<Value>),
    /// A single non-empty object
    Object(ResourceDocument),
    /// Null, an empty object, or a scalar
    Empty,
}

impl From<Value> for ManifestSource {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(nodes) => ManifestSource::Sequence(nodes),
            Value::Object(mut object) => {
                let is_list = object
                    .get("kind")
                    .and_then(Value::as_str)
                    .is_some_and(|kind| kind.eq_ignore_ascii_case("list"));
                if is_list && object.get("items").is_some_and(Value::is_array) {
                    match object.remove("items") {
                        Some(Value::Array(items)) => ManifestSource::List(items),
                        _ => ManifestSource::Empty,
                    }
                } else if object.is_empty() {
                    ManifestSource::Empty
                } else {
                    ManifestSource::Object(ResourceDocument::new(object))
                }
            }
            _ => ManifestSource::Empty,
        }
    }
}

impl From<Vec<Value>> for ManifestSource {
    fn from(nodes: Vec<Value>) -> Self {
        ManifestSource::Sequence(nodes)
    }
}

/// Lazily flatten a manifest tree into its resources
///
/// Order is depth-first, left to right, which preserves the prerequisite
/// ordering of the input. Nesting depth is bounded only by memory.
pub fn decompose(source: impl Into<ManifestSource>) -> Decompose {
    Decompose {
        pending: None,
        stack: Vec::new(),
    }
    .seeded(source.into())
}

/// Iterator returned by [`decompose`]
#[derive(Debug)]
pub struct Decompose {
    pending: Option<ResourceDocument>,
    stack: Vec<std::vec::IntoIter<Value>>,
}

impl Decompose {
    fn seeded(mut self, root: ManifestSource) -> Self {
        self.descend(root);
        self
    }

    fn descend(&mut self, node: ManifestSource) {
        match node {
            ManifestSource::Sequence(nodes) | ManifestSource::List(nodes) => {
                self.stack.push(nodes.into_iter());
            }
            ManifestSource::Object(doc) => self.pending = Some(doc),
            ManifestSource::Empty => {}
        }
    }
}

impl Iterator for Decompose {
    type Item = ResourceDocument;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(doc) = self.pending.take() {
                return Some(doc);
            }
            let frame = self.stack.last_mut()?;
            match frame.next() {
                Some(value) => self.descend(ManifestSource::from(value)),
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}
