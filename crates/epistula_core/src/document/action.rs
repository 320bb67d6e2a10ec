//! Typed correction actions and deterministic replay.
//!
//! # Responsibility
//! - Define the closed action set clients may submit against a letter.
//! - Apply actions to a tree, validating selection coordinates strictly.
//! - Replay stored action lists to reproduce a document byte-for-byte.
//!
//! # Invariants
//! - A failed action leaves the tree untouched; all checks run before the
//!   first mutation.
//! - After every applied action the tree is normalized, so recorded child
//!   indexes always refer to the canonical form.
//! - Offsets count Unicode scalar values, not bytes.

use crate::document::path::{self, NodePath, PathError};
use crate::document::tree::{is_valid_element_name, Element, ParseError, XmlNode, XmlTree};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// One correction action against a letter document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Action {
    /// Wraps a text selection into a new element, splitting the endpoint
    /// text nodes as needed. The endpoints must be text nodes under the
    /// same parent; intervening siblings move into the wrapper whole.
    Wrap {
        start: NodePath,
        /// Selection start, in chars from the beginning of the start node.
        start_offset: usize,
        end: NodePath,
        /// Selection end, in chars from the beginning of the end node.
        end_offset: usize,
        /// Literal selected text; re-checked against the tree on apply.
        text: String,
        /// Name of the wrapper element, such as `persName`.
        element: String,
        #[serde(default)]
        attributes: BTreeMap<String, String>,
    },
    /// Removes one element, splicing its children into its place.
    Unwrap { target: NodePath },
    /// Sets (`Some`) or removes (`None`) attributes on one element.
    ChangeAttributes {
        target: NodePath,
        attributes: BTreeMap<String, Option<String>>,
    },
}

/// Action application failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// A node path did not resolve.
    Path(PathError),
    /// Paths resolved, but the selection or target is not editable as
    /// requested.
    InvalidSelection(String),
}

impl Display for ApplyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(err) => write!(f, "{err}"),
            Self::InvalidSelection(message) => write!(f, "invalid selection: {message}"),
        }
    }
}

impl Error for ApplyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Path(err) => Some(err),
            Self::InvalidSelection(_) => None,
        }
    }
}

impl From<PathError> for ApplyError {
    fn from(value: PathError) -> Self {
        Self::Path(value)
    }
}

/// Applies one action and re-normalizes the tree.
pub fn apply_action(tree: &mut XmlTree, action: &Action) -> Result<(), ApplyError> {
    match action {
        Action::Wrap {
            start,
            start_offset,
            end,
            end_offset,
            text,
            element,
            attributes,
        } => apply_wrap(
            tree,
            start,
            *start_offset,
            end,
            *end_offset,
            text,
            element,
            attributes,
        )?,
        Action::Unwrap { target } => apply_unwrap(tree, target)?,
        Action::ChangeAttributes { target, attributes } => {
            apply_change_attributes(tree, target, attributes)?
        }
    }
    tree.normalize();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn apply_wrap(
    tree: &mut XmlTree,
    start: &NodePath,
    start_offset: usize,
    end: &NodePath,
    end_offset: usize,
    text: &str,
    element: &str,
    attributes: &BTreeMap<String, String>,
) -> Result<(), ApplyError> {
    if !is_valid_element_name(element) {
        return Err(ApplyError::InvalidSelection(format!(
            "invalid wrapper element name `{element}`"
        )));
    }
    for name in attributes.keys() {
        if !is_valid_element_name(name) {
            return Err(ApplyError::InvalidSelection(format!(
                "invalid attribute name `{name}`"
            )));
        }
    }

    let parent = start.parent().ok_or(PathError::EmptyPath)?;
    let end_parent = end.parent().ok_or(PathError::EmptyPath)?;
    if parent != end_parent {
        return Err(ApplyError::InvalidSelection(
            "wrap endpoints have different parents".to_string(),
        ));
    }
    if parent.is_empty() {
        return Err(ApplyError::InvalidSelection(
            "wrap endpoints cannot sit at document level".to_string(),
        ));
    }

    let (start_index, end_index) = match (start.last(), end.last()) {
        (Some(start_step), Some(end_step)) => (start_step.index, end_step.index),
        _ => return Err(ApplyError::Path(PathError::EmptyPath)),
    };
    if start_index > end_index {
        return Err(ApplyError::InvalidSelection(
            "selection ends before it starts".to_string(),
        ));
    }

    ensure_text_node(tree, start, "start")?;
    ensure_text_node(tree, end, "end")?;

    let siblings = path::siblings_mut(tree, &parent)?;

    if start_index == end_index {
        wrap_within_one_node(
            siblings,
            start_index,
            start_offset,
            end_offset,
            text,
            element,
            attributes,
        )
    } else {
        wrap_across_siblings(
            siblings,
            start_index,
            start_offset,
            end_index,
            end_offset,
            text,
            element,
            attributes,
        )
    }
}

fn wrap_within_one_node(
    siblings: &mut Vec<XmlNode>,
    index: usize,
    start_offset: usize,
    end_offset: usize,
    text: &str,
    element: &str,
    attributes: &BTreeMap<String, String>,
) -> Result<(), ApplyError> {
    if start_offset >= end_offset {
        return Err(ApplyError::InvalidSelection(
            "selection is empty".to_string(),
        ));
    }

    let content = text_at(siblings, index)?.to_string();
    let start_byte = offset_to_byte(&content, start_offset)?;
    let end_byte = offset_to_byte(&content, end_offset)?;

    let selected = &content[start_byte..end_byte];
    if selected != text {
        return Err(selection_mismatch(text, selected));
    }

    let mut wrapper = Element::new(element);
    wrapper.attributes = attributes.clone();
    wrapper.children.push(XmlNode::Text(selected.to_string()));

    let mut replacement = Vec::with_capacity(3);
    if start_byte > 0 {
        replacement.push(XmlNode::Text(content[..start_byte].to_string()));
    }
    replacement.push(XmlNode::Element(wrapper));
    if end_byte < content.len() {
        replacement.push(XmlNode::Text(content[end_byte..].to_string()));
    }
    siblings.splice(index..=index, replacement);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn wrap_across_siblings(
    siblings: &mut Vec<XmlNode>,
    start_index: usize,
    start_offset: usize,
    end_index: usize,
    end_offset: usize,
    text: &str,
    element: &str,
    attributes: &BTreeMap<String, String>,
) -> Result<(), ApplyError> {
    let start_content = text_at(siblings, start_index)?.to_string();
    let end_content = text_at(siblings, end_index)?.to_string();
    let start_byte = offset_to_byte(&start_content, start_offset)?;
    let end_byte = offset_to_byte(&end_content, end_offset)?;

    let head = &start_content[start_byte..];
    let tail = &end_content[..end_byte];

    let mut selected = String::from(head);
    for node in &siblings[start_index + 1..end_index] {
        selected.push_str(&node.text_content());
    }
    selected.push_str(tail);
    if selected != text {
        return Err(selection_mismatch(text, &selected));
    }

    let mut wrapper = Element::new(element);
    wrapper.attributes = attributes.clone();
    if !head.is_empty() {
        wrapper.children.push(XmlNode::Text(head.to_string()));
    }
    wrapper
        .children
        .extend(siblings[start_index + 1..end_index].to_vec());
    if !tail.is_empty() {
        wrapper.children.push(XmlNode::Text(tail.to_string()));
    }

    let mut replacement = Vec::with_capacity(3);
    if start_byte > 0 {
        replacement.push(XmlNode::Text(start_content[..start_byte].to_string()));
    }
    replacement.push(XmlNode::Element(wrapper));
    if end_byte < end_content.len() {
        replacement.push(XmlNode::Text(end_content[end_byte..].to_string()));
    }
    siblings.splice(start_index..=end_index, replacement);
    Ok(())
}

fn apply_unwrap(tree: &mut XmlTree, target: &NodePath) -> Result<(), ApplyError> {
    let parent = target.parent().ok_or(PathError::EmptyPath)?;
    if parent.is_empty() {
        return Err(ApplyError::InvalidSelection(
            "cannot unwrap the root element".to_string(),
        ));
    }

    match path::resolve(tree, target)? {
        XmlNode::Element(_) => {}
        other => {
            return Err(ApplyError::InvalidSelection(format!(
                "cannot unwrap `{}` node",
                other.node_name()
            )))
        }
    }

    let index = match target.last() {
        Some(step) => step.index,
        None => return Err(ApplyError::Path(PathError::EmptyPath)),
    };

    let siblings = path::siblings_mut(tree, &parent)?;
    let children = match siblings.get(index) {
        Some(XmlNode::Element(element)) => element.children.clone(),
        _ => {
            return Err(ApplyError::Path(PathError::IndexOutOfRange {
                depth: target.len() - 1,
                index,
            }))
        }
    };
    siblings.splice(index..=index, children);
    Ok(())
}

fn apply_change_attributes(
    tree: &mut XmlTree,
    target: &NodePath,
    changes: &BTreeMap<String, Option<String>>,
) -> Result<(), ApplyError> {
    for name in changes.keys() {
        if !is_valid_element_name(name) {
            return Err(ApplyError::InvalidSelection(format!(
                "invalid attribute name `{name}`"
            )));
        }
    }

    match path::resolve_mut(tree, target)? {
        XmlNode::Element(element) => {
            for (name, value) in changes {
                match value {
                    Some(value) => {
                        element.attributes.insert(name.clone(), value.clone());
                    }
                    None => {
                        element.attributes.remove(name);
                    }
                }
            }
            Ok(())
        }
        other => Err(ApplyError::InvalidSelection(format!(
            "cannot change attributes on `{}` node",
            other.node_name()
        ))),
    }
}

fn ensure_text_node(tree: &XmlTree, at: &NodePath, role: &str) -> Result<(), ApplyError> {
    match path::resolve(tree, at)? {
        XmlNode::Text(_) => Ok(()),
        other => Err(ApplyError::InvalidSelection(format!(
            "wrap {role} is a `{}` node, expected text",
            other.node_name()
        ))),
    }
}

fn text_at<'a>(siblings: &'a [XmlNode], index: usize) -> Result<&'a str, ApplyError> {
    match siblings.get(index) {
        Some(XmlNode::Text(text)) => Ok(text),
        Some(other) => Err(ApplyError::InvalidSelection(format!(
            "expected text node, found `{}`",
            other.node_name()
        ))),
        None => Err(ApplyError::InvalidSelection(
            "selection endpoint vanished during apply".to_string(),
        )),
    }
}

fn offset_to_byte(text: &str, char_offset: usize) -> Result<usize, ApplyError> {
    if char_offset == 0 {
        return Ok(0);
    }
    let mut count = 0usize;
    for (byte_index, _) in text.char_indices() {
        if count == char_offset {
            return Ok(byte_index);
        }
        count += 1;
    }
    if count == char_offset {
        return Ok(text.len());
    }
    Err(ApplyError::InvalidSelection(format!(
        "offset {char_offset} is beyond the text node ({count} chars)"
    )))
}

fn selection_mismatch(expected: &str, found: &str) -> ApplyError {
    ApplyError::InvalidSelection(format!(
        "selected text does not match: expected `{expected}`, found `{found}`"
    ))
}

/// Replay failures, positioned at the failing action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    Parse(ParseError),
    Apply { position: usize, source: ApplyError },
}

impl Display for ReplayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "{err}"),
            Self::Apply { position, source } => {
                write!(f, "action {position} failed: {source}")
            }
        }
    }
}

impl Error for ReplayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Apply { source, .. } => Some(source),
        }
    }
}

impl From<ParseError> for ReplayError {
    fn from(value: ParseError) -> Self {
        Self::Parse(value)
    }
}

/// Replays an action list against a base document and returns the tree.
pub fn replay_tree(document: &str, actions: &[Action]) -> Result<XmlTree, ReplayError> {
    let mut tree = XmlTree::parse(document)?;
    for (position, action) in actions.iter().enumerate() {
        apply_action(&mut tree, action)
            .map_err(|source| ReplayError::Apply { position, source })?;
    }
    Ok(tree)
}

/// Replays an action list and returns the canonical document bytes.
pub fn replay_document(document: &str, actions: &[Action]) -> Result<String, ReplayError> {
    replay_tree(document, actions).map(|tree| tree.serialize())
}

#[derive(Debug, Clone)]
struct SessionEntry {
    action: Action,
    applied: bool,
}

/// One client-side editing pass over a letter document.
///
/// Actions queue in order and apply exactly once each; `apply_pending` skips
/// entries already marked applied, so repeated calls are no-ops. Undo drops
/// the newest action and rebuilds from the base document.
#[derive(Debug, Clone)]
pub struct EditSession {
    base: XmlTree,
    tree: XmlTree,
    entries: Vec<SessionEntry>,
    redo_stack: Vec<Action>,
}

impl EditSession {
    /// Opens a session on a base document.
    pub fn open(document: &str) -> Result<Self, ParseError> {
        let base = XmlTree::parse(document)?;
        Ok(Self {
            tree: base.clone(),
            base,
            entries: Vec::new(),
            redo_stack: Vec::new(),
        })
    }

    /// Reopens a session from a stored document and its action list.
    pub fn resume(document: &str, actions: Vec<Action>) -> Result<Self, ReplayError> {
        let mut session = Self::open(document)?;
        for (position, action) in actions.into_iter().enumerate() {
            session.entries.push(SessionEntry {
                action,
                applied: false,
            });
            session
                .apply_pending()
                .map_err(|source| ReplayError::Apply { position, source })?;
        }
        Ok(session)
    }

    /// Queues one action and applies it. A failing action is dropped and
    /// the tree stays as it was.
    pub fn push(&mut self, action: Action) -> Result<(), ApplyError> {
        self.redo_stack.clear();
        self.entries.push(SessionEntry {
            action,
            applied: false,
        });
        match self.apply_pending() {
            Ok(_) => Ok(()),
            Err(err) => {
                self.entries.pop();
                Err(err)
            }
        }
    }

    /// Applies every queued action not yet applied, in order. Returns how
    /// many actions were applied; zero means the call was a no-op.
    pub fn apply_pending(&mut self) -> Result<usize, ApplyError> {
        let mut applied = 0usize;
        for index in 0..self.entries.len() {
            if self.entries[index].applied {
                continue;
            }
            let action = self.entries[index].action.clone();
            apply_action(&mut self.tree, &action)?;
            self.entries[index].applied = true;
            applied += 1;
        }
        Ok(applied)
    }

    /// Removes the newest action and rebuilds the tree from the base
    /// document. Returns `false` when there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool, ApplyError> {
        let Some(entry) = self.entries.pop() else {
            return Ok(false);
        };
        self.redo_stack.push(entry.action);
        self.rebuild()
    }

    /// Re-applies the most recently undone action. Returns `false` when
    /// there is nothing to redo.
    pub fn redo(&mut self) -> Result<bool, ApplyError> {
        let Some(action) = self.redo_stack.pop() else {
            return Ok(false);
        };
        self.entries.push(SessionEntry {
            action,
            applied: false,
        });
        match self.apply_pending() {
            Ok(_) => Ok(true),
            Err(err) => {
                if let Some(entry) = self.entries.pop() {
                    self.redo_stack.push(entry.action);
                }
                Err(err)
            }
        }
    }

    fn rebuild(&mut self) -> Result<bool, ApplyError> {
        self.tree = self.base.clone();
        for entry in &mut self.entries {
            entry.applied = false;
        }
        self.apply_pending()?;
        Ok(true)
    }

    /// Canonical bytes of the current document.
    pub fn document(&self) -> String {
        self.tree.serialize()
    }

    /// Canonical bytes of the base document the session opened on.
    pub fn base_document(&self) -> String {
        self.base.serialize()
    }

    /// Actions applied so far, in order, for persistence.
    pub fn actions(&self) -> Vec<Action> {
        self.entries
            .iter()
            .map(|entry| entry.action.clone())
            .collect()
    }

    /// Current tree, for inspection.
    pub fn tree(&self) -> &XmlTree {
        &self.tree
    }

    pub fn can_undo(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_action, replay_document, Action, ApplyError, EditSession};
    use crate::document::path::{NodePath, PathError};
    use crate::document::tree::XmlTree;
    use std::collections::BTreeMap;

    fn wrap(
        start: NodePath,
        start_offset: usize,
        end: NodePath,
        end_offset: usize,
        text: &str,
        element: &str,
    ) -> Action {
        Action::Wrap {
            start,
            start_offset,
            end,
            end_offset,
            text: text.to_string(),
            element: element.to_string(),
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn wrap_splits_one_text_node() {
        let mut tree = XmlTree::parse("<p>Hans Conrad war hier.</p>").expect("parse");
        let text_path = NodePath::from_pairs([(0, "p"), (0, "#text")]);
        apply_action(
            &mut tree,
            &wrap(text_path.clone(), 0, text_path, 11, "Hans Conrad", "persName"),
        )
        .expect("wrap should apply");

        assert_eq!(
            tree.serialize(),
            "<p><persName>Hans Conrad</persName> war hier.</p>\n"
        );
    }

    #[test]
    fn wrap_keeps_prefix_and_suffix() {
        let mut tree = XmlTree::parse("<p>Der Rat zu Bern tagte.</p>").expect("parse");
        let text_path = NodePath::from_pairs([(0, "p"), (0, "#text")]);
        let mut attributes = BTreeMap::new();
        attributes.insert("ref".to_string(), "l2".to_string());
        apply_action(
            &mut tree,
            &Action::Wrap {
                start: text_path.clone(),
                start_offset: 11,
                end: text_path,
                end_offset: 15,
                text: "Bern".to_string(),
                element: "placeName".to_string(),
                attributes,
            },
        )
        .expect("wrap should apply");

        assert_eq!(
            tree.serialize(),
            "<p>Der Rat zu <placeName ref=\"l2\">Bern</placeName> tagte.</p>\n"
        );
    }

    #[test]
    fn wrap_offsets_count_chars_not_bytes() {
        let mut tree = XmlTree::parse("<p>Z\u{fc}rich war sch\u{f6}n</p>").expect("parse");
        let text_path = NodePath::from_pairs([(0, "p"), (0, "#text")]);
        apply_action(
            &mut tree,
            &wrap(text_path.clone(), 0, text_path, 6, "Z\u{fc}rich", "placeName"),
        )
        .expect("wrap should apply");

        assert_eq!(
            tree.serialize(),
            "<p><placeName>Z\u{fc}rich</placeName> war sch\u{f6}n</p>\n"
        );
    }

    #[test]
    fn wrap_rejects_text_mismatch() {
        let mut tree = XmlTree::parse("<p>Hans Conrad</p>").expect("parse");
        let text_path = NodePath::from_pairs([(0, "p"), (0, "#text")]);
        let err = apply_action(
            &mut tree,
            &wrap(text_path.clone(), 0, text_path, 4, "Hens", "persName"),
        )
        .expect_err("mismatched literal must fail");

        assert!(matches!(err, ApplyError::InvalidSelection(_)));
        assert_eq!(tree.serialize(), "<p>Hans Conrad</p>\n");
    }

    #[test]
    fn wrap_rejects_stale_path_name() {
        let mut tree = XmlTree::parse("<p>Hello</p>").expect("parse");
        let stale = NodePath::from_pairs([(0, "div"), (0, "#text")]);
        let err = apply_action(
            &mut tree,
            &wrap(stale.clone(), 0, stale, 5, "Hello", "persName"),
        )
        .expect_err("stale name must fail");
        assert_eq!(
            err,
            ApplyError::Path(PathError::NameMismatch {
                depth: 0,
                expected: "div".to_string(),
                found: "p".to_string(),
            })
        );
    }

    #[test]
    fn wrap_spans_intervening_siblings() {
        let mut tree = XmlTree::parse("<p>Hans <lb/>Meier kam</p>").expect("parse");
        let start = NodePath::from_pairs([(0, "p"), (0, "#text")]);
        let end = NodePath::from_pairs([(0, "p"), (2, "#text")]);
        apply_action(&mut tree, &wrap(start, 0, end, 5, "Hans Meier", "persName"))
            .expect("spanning wrap should apply");

        assert_eq!(
            tree.serialize(),
            "<p><persName>Hans <lb/>Meier</persName> kam</p>\n"
        );
    }

    #[test]
    fn wrap_rejects_endpoints_under_different_parents() {
        let mut tree = XmlTree::parse("<body><p>one</p><p>two</p></body>").expect("parse");
        let start = NodePath::from_pairs([(0, "body"), (0, "p"), (0, "#text")]);
        let end = NodePath::from_pairs([(0, "body"), (1, "p"), (0, "#text")]);
        let err = apply_action(&mut tree, &wrap(start, 0, end, 3, "onetwo", "hi"))
            .expect_err("cross-parent wrap must fail");
        assert!(matches!(err, ApplyError::InvalidSelection(_)));
    }

    #[test]
    fn wrap_rejects_empty_selection() {
        let mut tree = XmlTree::parse("<p>abc</p>").expect("parse");
        let text_path = NodePath::from_pairs([(0, "p"), (0, "#text")]);
        let err = apply_action(&mut tree, &wrap(text_path.clone(), 1, text_path, 1, "", "x"))
            .expect_err("empty selection must fail");
        assert!(matches!(err, ApplyError::InvalidSelection(_)));
    }

    #[test]
    fn unwrap_splices_children_and_merges_text() {
        let mut tree =
            XmlTree::parse("<p>Hello <placeName>Zurich</placeName> folks</p>").expect("parse");
        apply_action(
            &mut tree,
            &Action::Unwrap {
                target: NodePath::from_pairs([(0, "p"), (1, "placeName")]),
            },
        )
        .expect("unwrap should apply");

        assert_eq!(tree.serialize(), "<p>Hello Zurich folks</p>\n");
        // Adjacent text merged into a single node.
        let root = tree.root().expect("root");
        assert_eq!(root.children.len(), 1);
    }

    #[test]
    fn unwrap_of_root_is_rejected() {
        let mut tree = XmlTree::parse("<p>x</p>").expect("parse");
        let err = apply_action(
            &mut tree,
            &Action::Unwrap {
                target: NodePath::from_pairs([(0, "p")]),
            },
        )
        .expect_err("root unwrap must fail");
        assert!(matches!(err, ApplyError::InvalidSelection(_)));
    }

    #[test]
    fn change_attributes_sets_and_removes() {
        let mut tree =
            XmlTree::parse("<p><persName ref=\"p9\" cert=\"low\">X</persName></p>").expect("parse");
        let mut changes = BTreeMap::new();
        changes.insert("cert".to_string(), Some("high".to_string()));
        changes.insert("ref".to_string(), None);
        apply_action(
            &mut tree,
            &Action::ChangeAttributes {
                target: NodePath::from_pairs([(0, "p"), (0, "persName")]),
                attributes: changes,
            },
        )
        .expect("change should apply");

        assert_eq!(
            tree.serialize(),
            "<p><persName cert=\"high\">X</persName></p>\n"
        );
    }

    #[test]
    fn change_attributes_on_text_is_rejected() {
        let mut tree = XmlTree::parse("<p>x</p>").expect("parse");
        let mut changes = BTreeMap::new();
        changes.insert("cert".to_string(), Some("high".to_string()));
        let err = apply_action(
            &mut tree,
            &Action::ChangeAttributes {
                target: NodePath::from_pairs([(0, "p"), (0, "#text")]),
                attributes: changes,
            },
        )
        .expect_err("text target must fail");
        assert!(matches!(err, ApplyError::InvalidSelection(_)));
    }

    #[test]
    fn replay_reports_failing_action_position() {
        let actions = vec![
            Action::ChangeAttributes {
                target: NodePath::from_pairs([(0, "p")]),
                attributes: BTreeMap::from([("rend".to_string(), Some("x".to_string()))]),
            },
            Action::Unwrap {
                target: NodePath::from_pairs([(0, "p"), (7, "gone")]),
            },
        ];
        let err = replay_document("<p>text</p>", &actions).expect_err("second action must fail");
        assert!(matches!(
            err,
            super::ReplayError::Apply { position: 1, .. }
        ));
    }

    #[test]
    fn session_apply_pending_is_idempotent() {
        let mut session = EditSession::open("<p>Hello Zurich</p>").expect("open");
        let text_path = NodePath::from_pairs([(0, "p"), (0, "#text")]);
        session
            .push(wrap(text_path.clone(), 6, text_path, 12, "Zurich", "placeName"))
            .expect("push should apply");

        let first = session.document();
        assert_eq!(session.apply_pending().expect("noop"), 0);
        assert_eq!(session.apply_pending().expect("noop"), 0);
        assert_eq!(session.document(), first);
        assert_eq!(
            first,
            "<p>Hello <placeName>Zurich</placeName></p>\n"
        );
    }

    #[test]
    fn session_undo_redo_round_trip() {
        let mut session = EditSession::open("<p>Hello Zurich</p>").expect("open");
        let text_path = NodePath::from_pairs([(0, "p"), (0, "#text")]);
        session
            .push(wrap(text_path.clone(), 6, text_path, 12, "Zurich", "placeName"))
            .expect("push");
        let edited = session.document();

        assert!(session.undo().expect("undo"));
        assert_eq!(session.document(), "<p>Hello Zurich</p>\n");
        assert!(!session.can_undo());

        assert!(session.redo().expect("redo"));
        assert_eq!(session.document(), edited);
        assert!(!session.can_redo());

        // Nothing left to redo.
        assert!(!session.redo().expect("redo on empty stack"));
    }

    #[test]
    fn session_push_clears_redo_stack() {
        let mut session = EditSession::open("<p>abc def</p>").expect("open");
        let text_path = NodePath::from_pairs([(0, "p"), (0, "#text")]);
        session
            .push(wrap(text_path.clone(), 0, text_path, 3, "abc", "hi"))
            .expect("push");
        assert!(session.undo().expect("undo"));
        assert!(session.can_redo());

        let text_path = NodePath::from_pairs([(0, "p"), (0, "#text")]);
        session
            .push(wrap(text_path.clone(), 4, text_path, 7, "def", "hi"))
            .expect("push after undo");
        assert!(!session.can_redo());
    }

    #[test]
    fn session_resume_restores_state() {
        let mut session = EditSession::open("<p>Hello Zurich</p>").expect("open");
        let text_path = NodePath::from_pairs([(0, "p"), (0, "#text")]);
        session
            .push(wrap(text_path.clone(), 6, text_path, 12, "Zurich", "placeName"))
            .expect("push");

        let resumed = EditSession::resume(&session.base_document(), session.actions())
            .expect("resume should replay");
        assert_eq!(resumed.document(), session.document());
    }

    #[test]
    fn double_apply_of_same_logical_edit_fails_loudly() {
        // Applying the same wrap twice must fail on the second run: the
        // first apply consumed the text node the path pointed at.
        let text_path = NodePath::from_pairs([(0, "p"), (0, "#text")]);
        let action = wrap(text_path.clone(), 0, text_path, 5, "Hello", "hi");
        let mut tree = XmlTree::parse("<p>Hello there</p>").expect("parse");
        apply_action(&mut tree, &action).expect("first apply");
        let err = apply_action(&mut tree, &action).expect_err("second apply must fail");
        assert!(matches!(err, ApplyError::Path(_) | ApplyError::InvalidSelection(_)));
    }
}
