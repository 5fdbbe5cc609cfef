//! Message model exchanged over hub links.
//!
//! A `Message` carries the three sections the device client reads and
//! writes: standard properties, an application-property map of scalar
//! values, and an opaque binary body.

use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

/// Scalar value allowed in the application-property map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
}

impl PropertyValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
            Self::Binary(v) => write!(f, "{}", STANDARD.encode(v)),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(v)
    }
}

/// Application properties: string keys to scalar values, ordered by key.
pub type ApplicationProperties = BTreeMap<String, PropertyValue>;

/// Standard message properties the client uses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Properties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

/// A message as sent on, or received from, a link.
///
/// Absent sections are `None` rather than empty so that responses missing
/// a section can be told apart from responses carrying an empty one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_properties: Option<ApplicationProperties>,
    #[serde(default)]
    pub body: Vec<u8>,
}

impl Message {
    /// Create a message with only a body section.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            properties: None,
            application_properties: None,
            body: body.into(),
        }
    }

    /// Build a device event: `subject` set, every entry of `data` copied into
    /// the application properties, body = UTF-8 bytes of `body`.
    pub fn event<K, V>(subject: &str, data: impl IntoIterator<Item = (K, V)>, body: &str) -> Self
    where
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        let application_properties = data
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        Self {
            properties: Some(Properties {
                subject: Some(subject.to_string()),
                ..Default::default()
            }),
            application_properties: Some(application_properties),
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.properties.get_or_insert_with(Properties::default).message_id = Some(message_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.properties.get_or_insert_with(Properties::default).reply_to = Some(reply_to.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.properties.get_or_insert_with(Properties::default).subject = Some(subject.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.application_properties
            .get_or_insert_with(ApplicationProperties::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn subject(&self) -> Option<&str> {
        self.properties.as_ref()?.subject.as_deref()
    }

    pub fn message_id(&self) -> Option<&str> {
        self.properties.as_ref()?.message_id.as_deref()
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.properties.as_ref()?.reply_to.as_deref()
    }

    /// Look up a single application property.
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.application_properties.as_ref()?.get(key)
    }

    /// Body decoded as UTF-8, if it is valid text.
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Base64 digest of the body, for diagnostics.
    pub fn body_base64(&self) -> String {
        STANDARD.encode(&self.body)
    }
}
