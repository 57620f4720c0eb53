//! Generic XML element tree with namespace-agnostic lookups.
//!
//! Upstream servers use arbitrary prefixes (`gml:`, `wfs:`, vendor prefixes
//! or none), so every structural lookup goes by local name. This is the only
//! place the rest of the translator sees XML.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::GmlError;

/// Documents nested deeper than this are rejected.
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    /// Qualified name as written, e.g. `gml:Point`.
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    /// Concatenated character data directly inside this element.
    pub text: String,
}

impl Element {
    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    pub fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(prefix, _)| prefix)
    }

    pub fn is(&self, local: &str) -> bool {
        self.local_name() == local
    }

    /// First child whose name is `local` or ends in `:local`.
    pub fn child(&self, local: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.is(local))
    }

    /// All children named `local`, whether the element occurs once or repeats.
    pub fn children_named<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.is(local))
    }

    /// Attribute whose name is `local` or ends in `:local`.
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| local_part(name) == local)
            .map(|(_, value)| value.as_str())
    }

    pub fn text(&self) -> &str {
        self.text.trim()
    }
}

fn local_part(name: &str) -> &str {
    match name.rsplit_once(':') {
        Some((_, local)) => local,
        None => name,
    }
}

/// Parse an XML document into its root element.
pub fn parse_document(xml: &str) -> Result<Element, GmlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(GmlError::TooDeep(MAX_DEPTH));
                }
                stack.push(start_element(&e)?);
            }
            Ok(Event::Empty(e)) => {
                let element = start_element(&e)?;
                attach(&mut stack, &mut root, element);
            }
            Ok(Event::End(_)) => {
                if let Some(element) = stack.pop() {
                    attach(&mut stack, &mut root, element);
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(top) = stack.last_mut() {
                    let text = e.unescape().map_err(|e| GmlError::Xml(e.to_string()))?;
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(GmlError::Xml(format!(
                    "at position {}: {e}",
                    reader.error_position()
                )))
            }
        }
    }

    if !stack.is_empty() {
        return Err(GmlError::Xml("unexpected end of document".to_string()));
    }
    root.ok_or(GmlError::Empty)
}

fn start_element(e: &BytesStart<'_>) -> Result<Element, GmlError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| GmlError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| GmlError::Xml(e.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
        text: String::new(),
    })
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        // Only the first top-level element counts.
        None if root.is_none() => *root = Some(element),
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested() {
        let root = parse_document(
            r#"<?xml version="1.0"?>
            <wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs" numberMatched="2">
              <gml:featureMember><app:road gml:id="r.1"><app:name>Main &amp; 1st</app:name></app:road></gml:featureMember>
              <gml:featureMember/>
            </wfs:FeatureCollection>"#,
        )
        .unwrap();

        assert_eq!(root.local_name(), "FeatureCollection");
        assert_eq!(root.prefix(), Some("wfs"));
        assert_eq!(root.attr("numberMatched"), Some("2"));
        assert_eq!(root.children_named("featureMember").count(), 2);

        let road = &root.children[0].children[0];
        assert_eq!(road.attr("id"), Some("r.1"));
        assert_eq!(road.child("name").map(Element::text), Some("Main & 1st"));
    }

    #[test]
    fn test_lookup_without_prefix() {
        let root = parse_document("<Point srsName=\"EPSG:4326\"><pos>1 2</pos></Point>").unwrap();
        assert_eq!(root.prefix(), None);
        assert!(root.is("Point"));
        assert_eq!(root.child("pos").map(Element::text), Some("1 2"));
        assert!(root.child("posList").is_none());
    }

    #[test]
    fn test_cdata() {
        let root = parse_document("<a><![CDATA[x < y]]></a>").unwrap();
        assert_eq!(root.text(), "x < y");
    }

    #[test]
    fn test_malformed() {
        assert!(parse_document("<a><b></a>").is_err());
        assert!(parse_document("<a>").is_err());
        assert!(matches!(parse_document(""), Err(GmlError::Empty)));
    }

    #[test]
    fn test_depth_limit() {
        let deep = "<a>".repeat(MAX_DEPTH + 1) + &"</a>".repeat(MAX_DEPTH + 1);
        assert!(matches!(parse_document(&deep), Err(GmlError::TooDeep(_))));
    }
}
