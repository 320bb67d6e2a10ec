//! Corpus file layout and index codecs.
//!
//! # Responsibility
//! - Name where letters and index files live inside the corpus checkout.
//! - Parse the three index files into typed entries and render them back
//!   from accepted store snapshots.
//!
//! # Invariants
//! - Rendering then parsing an index is lossless for every entry field.
//! - Entry ids keep the reference prefixes used inside letters: `p<id>`
//!   for persons and organizations, `l<id>` for localities.

use crate::document::tree::{Element, ParseError, XmlNode, XmlTree};
use crate::model::entity::{PersonPayload, PlacePayload};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Letter documents, one file per letter id.
pub const LETTERS_DIR: &str = "data/letters";
/// Directory holding the three index files.
pub const INDEX_DIR: &str = "data/index";
pub const PERSONS_INDEX: &str = "data/index/persons.xml";
pub const LOCALITIES_INDEX: &str = "data/index/localities.xml";
pub const ORGANIZATIONS_INDEX: &str = "data/index/organizations.xml";

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";

/// Index file failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// Index file is not well-formed XML.
    Document(ParseError),
    /// Index file parses but does not have the expected shape.
    Structure(String),
}

impl Display for IndexError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Document(err) => write!(f, "{err}"),
            Self::Structure(message) => f.write_str(message),
        }
    }
}

impl Error for IndexError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Document(err) => Some(err),
            Self::Structure(_) => None,
        }
    }
}

impl From<ParseError> for IndexError {
    fn from(value: ParseError) -> Self {
        Self::Document(value)
    }
}

/// One person or organization index entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonEntry {
    pub id: i64,
    pub payload: PersonPayload,
    /// Alias names in file order. The index carries no alias ids; identity
    /// is the (person, name) pair.
    pub aliases: Vec<String>,
}

/// One locality index entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceEntry {
    pub id: i64,
    pub payload: PlacePayload,
}

/// Path of one letter file inside the corpus checkout.
pub fn letter_path(corpus_root: &Path, letter_id: i64) -> PathBuf {
    corpus_root.join(LETTERS_DIR).join(format!("{letter_id}.xml"))
}

/// Parses `persons.xml` or, with `organizations` set, `organizations.xml`.
pub fn parse_person_index(
    input: &str,
    organizations: bool,
) -> Result<Vec<PersonEntry>, IndexError> {
    let (list_name, entry_name, name_element) = person_index_names(organizations);
    let tree = XmlTree::parse(input)?;
    let root = require_root(&tree, list_name)?;

    let mut entries = Vec::new();
    for node in &root.children {
        let XmlNode::Element(entry) = node else {
            continue;
        };
        if entry.name != entry_name {
            return Err(IndexError::Structure(format!(
                "unexpected element `{}` in {list_name}",
                entry.name
            )));
        }
        let id = parse_entry_id(entry, 'p')?;

        let mut name: Option<String> = None;
        let mut forename: Option<String> = None;
        let mut surname: Option<String> = None;
        let mut aliases = Vec::new();
        for child in &entry.children {
            let XmlNode::Element(field) = child else {
                continue;
            };
            if field.name != name_element {
                return Err(IndexError::Structure(format!(
                    "unexpected element `{}` in {entry_name} p{id}",
                    field.name
                )));
            }
            if field.attribute("type") == Some("alias") {
                aliases.push(field.text_content());
            } else if name.is_some() {
                return Err(IndexError::Structure(format!(
                    "{entry_name} p{id} has more than one primary {name_element}"
                )));
            } else {
                name = Some(field.text_content());
                forename = field.attribute("forename").map(str::to_string);
                surname = field.attribute("surname").map(str::to_string);
            }
        }
        let Some(name) = name else {
            return Err(IndexError::Structure(format!(
                "{entry_name} p{id} has no {name_element}"
            )));
        };

        entries.push(PersonEntry {
            id,
            payload: PersonPayload {
                name,
                forename,
                surname,
                gnd: entry.attribute("gnd").map(str::to_string),
                is_organization: organizations,
            },
            aliases,
        });
    }
    Ok(entries)
}

/// Parses `localities.xml`.
pub fn parse_place_index(input: &str) -> Result<Vec<PlaceEntry>, IndexError> {
    let tree = XmlTree::parse(input)?;
    let root = require_root(&tree, "listPlace")?;

    let mut entries = Vec::new();
    for node in &root.children {
        let XmlNode::Element(entry) = node else {
            continue;
        };
        if entry.name != "place" {
            return Err(IndexError::Structure(format!(
                "unexpected element `{}` in listPlace",
                entry.name
            )));
        }
        let id = parse_entry_id(entry, 'l')?;

        let mut name: Option<String> = None;
        let mut country: Option<String> = None;
        let mut latitude: Option<f64> = None;
        let mut longitude: Option<f64> = None;
        for child in &entry.children {
            let XmlNode::Element(field) = child else {
                continue;
            };
            match field.name.as_str() {
                "placeName" => {
                    if name.is_some() {
                        return Err(IndexError::Structure(format!(
                            "place l{id} has more than one placeName"
                        )));
                    }
                    name = Some(field.text_content());
                }
                "country" => country = Some(field.text_content()),
                "geo" => {
                    let (lat, lon) = parse_geo(id, &field.text_content())?;
                    latitude = Some(lat);
                    longitude = Some(lon);
                }
                other => {
                    return Err(IndexError::Structure(format!(
                        "unexpected element `{other}` in place l{id}"
                    )))
                }
            }
        }
        let Some(name) = name else {
            return Err(IndexError::Structure(format!(
                "place l{id} has no placeName"
            )));
        };

        entries.push(PlaceEntry {
            id,
            payload: PlacePayload {
                name,
                country,
                latitude,
                longitude,
            },
        });
    }
    Ok(entries)
}

/// Renders `persons.xml` or, with `organizations` set, `organizations.xml`
/// in canonical form.
pub fn render_person_index(entries: &[PersonEntry], organizations: bool) -> String {
    let (list_name, entry_name, name_element) = person_index_names(organizations);
    let mut list = Element::new(list_name);
    for entry in entries {
        let mut element = Element::new(entry_name);
        element
            .attributes
            .insert("xml:id".to_string(), format!("p{}", entry.id));
        if let Some(gnd) = &entry.payload.gnd {
            element.attributes.insert("gnd".to_string(), gnd.clone());
        }

        let mut name = Element::new(name_element);
        if let Some(forename) = &entry.payload.forename {
            name.attributes
                .insert("forename".to_string(), forename.clone());
        }
        if let Some(surname) = &entry.payload.surname {
            name.attributes
                .insert("surname".to_string(), surname.clone());
        }
        name.children.push(XmlNode::Text(entry.payload.name.clone()));
        element.children.push(XmlNode::Element(name));

        for alias in &entry.aliases {
            let mut alias_element = Element::new(name_element);
            alias_element
                .attributes
                .insert("type".to_string(), "alias".to_string());
            alias_element.children.push(XmlNode::Text(alias.clone()));
            element.children.push(XmlNode::Element(alias_element));
        }
        list.children.push(XmlNode::Element(element));
    }
    index_document(list)
}

/// Renders `localities.xml` in canonical form.
pub fn render_place_index(entries: &[PlaceEntry]) -> String {
    let mut list = Element::new("listPlace");
    for entry in entries {
        let mut element = Element::new("place");
        element
            .attributes
            .insert("xml:id".to_string(), format!("l{}", entry.id));

        let mut name = Element::new("placeName");
        name.children.push(XmlNode::Text(entry.payload.name.clone()));
        element.children.push(XmlNode::Element(name));

        if let Some(country) = &entry.payload.country {
            let mut country_element = Element::new("country");
            country_element
                .children
                .push(XmlNode::Text(country.clone()));
            element.children.push(XmlNode::Element(country_element));
        }
        // Coordinates ship as a pair or not at all.
        if let (Some(latitude), Some(longitude)) = (entry.payload.latitude, entry.payload.longitude)
        {
            let mut geo = Element::new("geo");
            geo.children
                .push(XmlNode::Text(format!("{latitude} {longitude}")));
            element.children.push(XmlNode::Element(geo));
        }
        list.children.push(XmlNode::Element(element));
    }
    index_document(list)
}

fn person_index_names(organizations: bool) -> (&'static str, &'static str, &'static str) {
    if organizations {
        ("listOrg", "org", "orgName")
    } else {
        ("listPerson", "person", "persName")
    }
}

fn index_document(list: Element) -> String {
    XmlTree {
        declaration: Some(XML_DECLARATION.to_string()),
        nodes: vec![XmlNode::Element(list)],
    }
    .serialize()
}

fn require_root<'tree>(tree: &'tree XmlTree, expected: &str) -> Result<&'tree Element, IndexError> {
    let root = tree
        .root()
        .ok_or_else(|| IndexError::Structure("index file has no root element".to_string()))?;
    if root.name != expected {
        return Err(IndexError::Structure(format!(
            "expected root element `{expected}`, found `{}`",
            root.name
        )));
    }
    Ok(root)
}

fn parse_entry_id(element: &Element, prefix: char) -> Result<i64, IndexError> {
    let raw = element.attribute("xml:id").ok_or_else(|| {
        IndexError::Structure(format!("{} entry is missing xml:id", element.name))
    })?;
    raw.strip_prefix(prefix)
        .and_then(|digits| digits.parse::<i64>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| {
            IndexError::Structure(format!("invalid xml:id `{raw}` on {}", element.name))
        })
}

fn parse_geo(id: i64, text: &str) -> Result<(f64, f64), IndexError> {
    let invalid =
        || IndexError::Structure(format!("place l{id} has a malformed geo value `{text}`"));
    let mut parts = text.split_whitespace();
    let (Some(lat), Some(lon), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };
    let latitude: f64 = lat.parse().map_err(|_| invalid())?;
    let longitude: f64 = lon.parse().map_err(|_| invalid())?;
    Ok((latitude, longitude))
}

#[cfg(test)]
mod tests {
    use super::{
        letter_path, parse_person_index, parse_place_index, render_person_index,
        render_place_index, IndexError, PersonEntry, PlaceEntry,
    };
    use crate::model::entity::{PersonPayload, PlacePayload};
    use std::path::Path;

    fn bullinger() -> PersonEntry {
        PersonEntry {
            id: 17,
            payload: PersonPayload {
                name: "Heinrich Bullinger".to_string(),
                forename: Some("Heinrich".to_string()),
                surname: Some("Bullinger".to_string()),
                gnd: Some("118517880".to_string()),
                is_organization: false,
            },
            aliases: vec!["Bullingerus".to_string(), "H. B.".to_string()],
        }
    }

    #[test]
    fn person_index_round_trips() {
        let entries = vec![
            bullinger(),
            PersonEntry {
                id: 23,
                payload: PersonPayload {
                    name: "Anna Adlischwyler".to_string(),
                    forename: None,
                    surname: None,
                    gnd: None,
                    is_organization: false,
                },
                aliases: Vec::new(),
            },
        ];

        let rendered = render_person_index(&entries, false);
        assert!(rendered.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<listPerson>"));
        assert!(rendered.contains("<person gnd=\"118517880\" xml:id=\"p17\">"));
        assert!(rendered.contains("<persName type=\"alias\">Bullingerus</persName>"));

        let parsed = parse_person_index(&rendered, false).expect("parse rendered index");
        assert_eq!(parsed, entries);
    }

    #[test]
    fn organization_index_uses_org_elements() {
        let entries = vec![PersonEntry {
            id: 9,
            payload: PersonPayload {
                name: "Rat der Stadt Bern".to_string(),
                forename: None,
                surname: None,
                gnd: None,
                is_organization: true,
            },
            aliases: Vec::new(),
        }];

        let rendered = render_person_index(&entries, true);
        assert!(rendered.contains("<listOrg><org xml:id=\"p9\">"));
        assert!(rendered.contains("<orgName>Rat der Stadt Bern</orgName>"));

        let parsed = parse_person_index(&rendered, true).expect("parse rendered index");
        assert_eq!(parsed, entries);
        assert!(parsed[0].payload.is_organization);
    }

    #[test]
    fn place_index_round_trips_geo_pair() {
        let entries = vec![
            PlaceEntry {
                id: 5,
                payload: PlacePayload {
                    name: "Bern".to_string(),
                    country: Some("CH".to_string()),
                    latitude: Some(46.948),
                    longitude: Some(7.4474),
                },
            },
            PlaceEntry {
                id: 12,
                payload: PlacePayload {
                    name: "Unbekannt".to_string(),
                    country: None,
                    latitude: None,
                    longitude: None,
                },
            },
        ];

        let rendered = render_place_index(&entries);
        assert!(rendered.contains("<place xml:id=\"l5\">"));
        assert!(rendered.contains("<geo>46.948 7.4474</geo>"));

        let parsed = parse_place_index(&rendered).expect("parse rendered index");
        assert_eq!(parsed, entries);
    }

    #[test]
    fn malformed_geo_is_rejected() {
        let input = "<listPlace><place xml:id=\"l3\">\
                     <placeName>Chur</placeName><geo>46.85</geo>\
                     </place></listPlace>";
        let err = parse_place_index(input).expect_err("single coordinate");
        assert!(matches!(err, IndexError::Structure(_)));
    }

    #[test]
    fn wrong_id_prefix_is_rejected() {
        let input = "<listPerson><person xml:id=\"l4\">\
                     <persName>X</persName></person></listPerson>";
        let err = parse_person_index(input, false).expect_err("place prefix on person");
        assert!(matches!(err, IndexError::Structure(_)));

        let missing = "<listPerson><person><persName>X</persName></person></listPerson>";
        assert!(parse_person_index(missing, false).is_err());
    }

    #[test]
    fn unexpected_elements_are_rejected() {
        let input = "<listPerson><note>stray</note></listPerson>";
        let err = parse_person_index(input, false).expect_err("stray element");
        assert!(matches!(err, IndexError::Structure(_)));

        let wrong_root = "<people/>";
        assert!(parse_person_index(wrong_root, false).is_err());
    }

    #[test]
    fn whitespace_between_entries_is_tolerated() {
        let input = "<listPerson>\n  <person xml:id=\"p1\">\n    <persName>A</persName>\n  </person>\n</listPerson>";
        let parsed = parse_person_index(input, false).expect("pretty-printed index");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, 1);
        assert_eq!(parsed[0].payload.name, "A");
    }

    #[test]
    fn letter_path_is_under_the_letters_directory() {
        let path = letter_path(Path::new("/corpus"), 204);
        assert_eq!(path, Path::new("/corpus/data/letters/204.xml"));
    }
}
