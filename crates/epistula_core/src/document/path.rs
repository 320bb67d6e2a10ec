//! Indexed node paths and resolution against a tree.
//!
//! # Responsibility
//! - Address one node as a sequence of (child index, node name) steps from
//!   the document level.
//! - Resolve paths with both checks enforced at every step.
//!
//! # Invariants
//! - A path is only valid if every step's index exists and its recorded
//!   name matches the node found there. Stale paths fail loudly instead of
//!   editing the wrong node.
//! - Step 0 of a path addresses a document-level node; the root element is
//!   `(index_of_root, root_name)`, usually `(0, "TEI")`.

use crate::document::tree::{XmlNode, XmlTree};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// One path step: child index plus the name the client saw there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStep {
    pub index: usize,
    pub name: String,
}

/// Path from the document level to one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath {
    pub steps: Vec<PathStep>,
}

impl NodePath {
    pub fn new(steps: Vec<PathStep>) -> Self {
        Self { steps }
    }

    /// Builds a path from `(index, name)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (usize, &'a str)>) -> Self {
        Self {
            steps: pairs
                .into_iter()
                .map(|(index, name)| PathStep {
                    index,
                    name: name.to_string(),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Path of the parent node. `None` when this path is empty.
    pub fn parent(&self) -> Option<NodePath> {
        if self.steps.is_empty() {
            return None;
        }
        Some(NodePath {
            steps: self.steps[..self.steps.len() - 1].to_vec(),
        })
    }

    /// Final step of the path.
    pub fn last(&self) -> Option<&PathStep> {
        self.steps.last()
    }
}

impl Display for NodePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.steps.is_empty() {
            return f.write_str("(document)");
        }
        for (position, step) in self.steps.iter().enumerate() {
            if position > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}[{}]", step.name, step.index)?;
        }
        Ok(())
    }
}

/// Path resolution failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Empty paths address the document, which is not an editable node.
    EmptyPath,
    /// Step index is outside the sibling list.
    IndexOutOfRange { depth: usize, index: usize },
    /// Node at the step index has a different name than recorded.
    NameMismatch {
        depth: usize,
        expected: String,
        found: String,
    },
    /// Mid-path step landed on a text or comment node, which has no
    /// children to descend into.
    NotAnElement { depth: usize, name: String },
}

impl Display for PathError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPath => write!(f, "empty node path"),
            Self::IndexOutOfRange { depth, index } => {
                write!(f, "path step {depth}: child index {index} out of range")
            }
            Self::NameMismatch {
                depth,
                expected,
                found,
            } => write!(
                f,
                "path step {depth}: expected node `{expected}`, found `{found}`"
            ),
            Self::NotAnElement { depth, name } => {
                write!(f, "path step {depth}: `{name}` has no children")
            }
        }
    }
}

impl Error for PathError {}

/// Resolves a path to a shared node reference.
pub fn resolve<'tree>(tree: &'tree XmlTree, path: &NodePath) -> Result<&'tree XmlNode, PathError> {
    if path.steps.is_empty() {
        return Err(PathError::EmptyPath);
    }

    let mut siblings = &tree.nodes;
    for (depth, step) in path.steps.iter().enumerate() {
        let node = siblings.get(step.index).ok_or(PathError::IndexOutOfRange {
            depth,
            index: step.index,
        })?;
        if node.node_name() != step.name {
            return Err(PathError::NameMismatch {
                depth,
                expected: step.name.clone(),
                found: node.node_name().to_string(),
            });
        }
        if depth + 1 == path.steps.len() {
            return Ok(node);
        }
        match node {
            XmlNode::Element(element) => siblings = &element.children,
            other => {
                return Err(PathError::NotAnElement {
                    depth,
                    name: other.node_name().to_string(),
                })
            }
        }
    }

    // Loop always returns on the final step.
    Err(PathError::EmptyPath)
}

/// Resolves a path to a mutable node reference.
///
/// Validates via [`resolve`] first, then descends again mutably; the
/// second walk cannot fail on a tree that has not changed in between.
pub(crate) fn resolve_mut<'tree>(
    tree: &'tree mut XmlTree,
    path: &NodePath,
) -> Result<&'tree mut XmlNode, PathError> {
    resolve(tree, path)?;

    let (last, elements) = match path.steps.split_last() {
        Some(split) => split,
        None => return Err(PathError::EmptyPath),
    };

    let mut siblings = &mut tree.nodes;
    for (depth, step) in elements.iter().enumerate() {
        let node = siblings
            .get_mut(step.index)
            .ok_or(PathError::IndexOutOfRange {
                depth,
                index: step.index,
            })?;
        match node {
            XmlNode::Element(element) => siblings = &mut element.children,
            other => {
                return Err(PathError::NotAnElement {
                    depth,
                    name: other.node_name().to_string(),
                })
            }
        }
    }

    siblings
        .get_mut(last.index)
        .ok_or(PathError::IndexOutOfRange {
            depth: path.steps.len() - 1,
            index: last.index,
        })
}

/// Resolves the mutable sibling list containing the children of `parent`.
/// An empty parent path yields the document-level node list.
pub(crate) fn siblings_mut<'tree>(
    tree: &'tree mut XmlTree,
    parent: &NodePath,
) -> Result<&'tree mut Vec<XmlNode>, PathError> {
    if parent.steps.is_empty() {
        return Ok(&mut tree.nodes);
    }
    match resolve_mut(tree, parent)? {
        XmlNode::Element(element) => Ok(&mut element.children),
        other => Err(PathError::NotAnElement {
            depth: parent.steps.len() - 1,
            name: other.node_name().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{resolve, NodePath, PathError};
    use crate::document::tree::XmlTree;

    fn sample() -> XmlTree {
        XmlTree::parse("<body><p>Hello <placeName>Zurich</placeName></p><p>Bye</p></body>")
            .expect("sample should parse")
    }

    #[test]
    fn resolves_nested_element() {
        let tree = sample();
        let path = NodePath::from_pairs([(0, "body"), (0, "p"), (1, "placeName")]);
        let node = resolve(&tree, &path).expect("path should resolve");
        assert_eq!(node.text_content(), "Zurich");
    }

    #[test]
    fn resolves_text_node_by_hash_name() {
        let tree = sample();
        let path = NodePath::from_pairs([(0, "body"), (0, "p"), (0, "#text")]);
        let node = resolve(&tree, &path).expect("path should resolve");
        assert_eq!(node.text_content(), "Hello ");
    }

    #[test]
    fn reports_name_mismatch_with_depth() {
        let tree = sample();
        let path = NodePath::from_pairs([(0, "div")]);
        assert_eq!(
            resolve(&tree, &path),
            Err(PathError::NameMismatch {
                depth: 0,
                expected: "div".to_string(),
                found: "body".to_string(),
            })
        );
    }

    #[test]
    fn reports_index_out_of_range() {
        let tree = sample();
        let path = NodePath::from_pairs([(0, "body"), (5, "p")]);
        assert_eq!(
            resolve(&tree, &path),
            Err(PathError::IndexOutOfRange { depth: 1, index: 5 })
        );
    }

    #[test]
    fn refuses_to_descend_into_text() {
        let tree = sample();
        let path = NodePath::from_pairs([(0, "body"), (0, "p"), (0, "#text"), (0, "x")]);
        assert_eq!(
            resolve(&tree, &path),
            Err(PathError::NotAnElement {
                depth: 2,
                name: "#text".to_string(),
            })
        );
    }

    #[test]
    fn empty_path_is_invalid() {
        let tree = sample();
        assert_eq!(
            resolve(&tree, &NodePath::default()),
            Err(PathError::EmptyPath)
        );
    }
}
