//! Entity mention extraction from letter documents.
//!
//! # Responsibility
//! - Scan a parsed letter for `persName`, `orgName` and `placeName`
//!   elements and collect the entities they reference.
//! - Tolerate malformed `ref` values; a tagging element without a usable
//!   reference is simply not a mention.

use crate::document::tree::{Element, XmlNode, XmlTree};
use once_cell::sync::Lazy;
use regex::Regex;

/// `ref` values on person tags look like `p17`.
static PERSON_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^p(\d+)$").expect("person ref pattern is valid"));

/// `ref` values on place tags look like `l5`.
static PLACE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^l(\d+)$").expect("place ref pattern is valid"));

/// What kind of entity a mention points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MentionKind {
    Person,
    Place,
}

impl MentionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Place => "place",
        }
    }
}

/// Tagger confidence carried on the `cert` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Certainty {
    High,
    Medium,
    Low,
}

impl Certainty {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// One resolved entity reference inside a letter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub kind: MentionKind,
    pub target_id: i64,
    /// Missing or unknown `cert` values read as `None`.
    pub cert: Option<Certainty>,
}

/// Collects all entity mentions in document order.
pub fn extract_mentions(tree: &XmlTree) -> Vec<Mention> {
    let mut mentions = Vec::new();
    collect(&tree.nodes, &mut mentions);
    mentions
}

fn collect(nodes: &[XmlNode], out: &mut Vec<Mention>) {
    for node in nodes {
        let XmlNode::Element(element) = node else {
            continue;
        };
        let kind = match element.name.as_str() {
            "persName" | "orgName" => Some(MentionKind::Person),
            "placeName" => Some(MentionKind::Place),
            _ => None,
        };
        if let Some(kind) = kind {
            if let Some(mention) = mention_from_attributes(kind, element) {
                out.push(mention);
            }
        }
        collect(&element.children, out);
    }
}

fn mention_from_attributes(kind: MentionKind, element: &Element) -> Option<Mention> {
    let reference = element.attribute("ref")?;
    let pattern = match kind {
        MentionKind::Person => &PERSON_REF,
        MentionKind::Place => &PLACE_REF,
    };
    let captures = pattern.captures(reference)?;
    let target_id: i64 = captures.get(1)?.as_str().parse().ok()?;
    let cert = element.attribute("cert").and_then(Certainty::parse);
    Some(Mention {
        kind,
        target_id,
        cert,
    })
}
