//! CloudAPI records consumed by the inventory
//!
//! Instances and images are read-only projections of what CloudAPI returns.
//! Only the fields the inventory needs are modelled; everything else in the
//! response is ignored.

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;

/// A single tag value
///
/// CloudAPI tags may carry strings, booleans or numbers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    /// Boolean flag, `true` means "member of the group named by the key"
    Bool(bool),
    /// Numeric value
    Number(serde_json::Number),
    /// Plain string value
    Text(String),
}

impl TagValue {
    /// String form of the value, if it is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this is the boolean `true`
    pub fn is_true(&self) -> bool {
        matches!(self, Self::Bool(true))
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for TagValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Tag mapping in the order CloudAPI returned it
///
/// Order matters: flag tags become groups in the order they appear, which in
/// turn fixes the first-seen order of `all.children`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tags(Vec<(String, TagValue)>);

impl Tags {
    /// Create an empty tag set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tag, replacing an earlier value for the same key in place
    pub fn with(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.insert(key.into(), value.into());
        self
    }

    /// Insert a tag, replacing an earlier value for the same key in place
    pub fn insert(&mut self, key: String, value: TagValue) {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Look up a tag by key
    pub fn get(&self, key: &str) -> Option<&TagValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Look up a string-valued tag by key
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(TagValue::as_str)
    }

    /// Iterate over tags in source order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TagValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of tags
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no tags
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for Tags {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TagsVisitor;

        impl<'de> Visitor<'de> for TagsVisitor {
            type Value = Tags;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of tag names to values")
            }

            fn visit_unit<E>(self) -> std::result::Result<Tags, E>
            where
                E: de::Error,
            {
                Ok(Tags::new())
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Tags, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut tags = Tags::new();
                while let Some((key, value)) = map.next_entry::<String, TagValue>()? {
                    tags.insert(key, value);
                }
                Ok(tags)
            }
        }

        deserializer.deserialize_any(TagsVisitor)
    }
}

/// A provisioned compute instance ("machine" in CloudAPI terms)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Instance UUID
    pub id: String,

    /// Instance name, used as the inventory host name
    pub name: String,

    /// Primary IP address
    #[serde(default)]
    pub primary_ip: Option<String>,

    /// Image UUID the instance was provisioned from
    #[serde(default)]
    pub image: Option<String>,

    /// Instance state (running, stopped, ...)
    #[serde(default)]
    pub state: Option<String>,

    /// Instance tags
    #[serde(default)]
    pub tags: Tags,
}

impl Instance {
    /// Create an instance record with no tags
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            primary_ip: None,
            image: None,
            state: None,
            tags: Tags::new(),
        }
    }

    /// Set the primary IP
    pub fn with_primary_ip(mut self, ip: impl Into<String>) -> Self {
        self.primary_ip = Some(ip.into());
        self
    }

    /// Set the image id
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the tags
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }
}

/// Tag on an image naming the login user for instances built from it
pub const DEFAULT_USER_TAG: &str = "default_user";

/// OS name whose instances are left out of the inventory
pub const WINDOWS_OS: &str = "windows";

/// An image from the account's image catalog
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Image {
    /// Image UUID
    pub id: String,

    /// Image name
    #[serde(default)]
    pub name: String,

    /// Image version
    #[serde(default)]
    pub version: String,

    /// Operating system family (smartos, linux, windows, ...)
    pub os: String,

    /// Image tags
    #[serde(default)]
    pub tags: Tags,
}

impl Image {
    /// Create an image record
    pub fn new(id: impl Into<String>, os: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            version: String::new(),
            os: os.into(),
            tags: Tags::new(),
        }
    }

    /// Set the tags
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Login user advertised by the image, if any
    pub fn default_user(&self) -> Option<&str> {
        self.tags.get_str(DEFAULT_USER_TAG)
    }

    /// Whether instances of this image are left out of the inventory
    pub fn is_windows(&self) -> bool {
        self.os == WINDOWS_OS
    }
}
