use std::collections::BTreeMap;

use crate::xml::Element;

/// The fields decoded from the latest valid payload of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionData {
    fields: BTreeMap<String, String>,
}

impl SessionData {
    #[must_use]
    pub fn new() -> SessionData {
        SessionData::default()
    }

    /// Value of a field
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// Set a field, returning the previous value
    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, field: K, value: V) -> Option<String> {
        self.fields.insert(field.into(), value.into())
    }

    /// Fields in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SessionData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        SessionData {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Turns a validated payload into session data.
///
/// Returning `None` marks the payload as unusable; the server then drops it
/// without touching the session store.
pub trait PayloadParser: Send + Sync {
    fn parse(&self, xml: &[u8]) -> Option<SessionData>;
}

impl<F> PayloadParser for F
where
    F: Fn(&[u8]) -> Option<SessionData> + Send + Sync,
{
    fn parse(&self, xml: &[u8]) -> Option<SessionData> {
        self(xml)
    }
}

/// Flattens a message into fields: root attributes, then the text of every
/// leaf child element. A later leaf with the same name overwrites an earlier
/// one.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldParser;

impl PayloadParser for FieldParser {
    fn parse(&self, xml: &[u8]) -> Option<SessionData> {
        let root = Element::parse(xml).ok()?;
        let mut data: SessionData = root.attributes().collect();
        for child in root.children() {
            if child.children().is_empty() {
                data.insert(child.name(), child.text());
            }
        }
        (!data.is_empty()).then_some(data)
    }
}
