//! Directory entries and attributes
//!
//! Attribute names are matched case-insensitively, the way directory servers
//! treat attribute descriptions. Values are kept as raw bytes so binary
//! attributes (objectGUID, objectSid, unicodePwd) survive untouched.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;

/// A single directory attribute with one or more values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LdapAttribute {
    /// Attribute description, e.g. `mail` or `member;range=0-1499`
    pub name: String,

    /// Raw values in server order
    pub values: Vec<Vec<u8>>,

    /// Whether the values are binary rather than UTF-8 text
    #[serde(default)]
    pub binary: bool,
}

impl LdapAttribute {
    /// Create a textual attribute
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            values: values
                .into_iter()
                .map(|v| v.into().into_bytes())
                .collect(),
            binary: false,
        }
    }

    /// Create a binary attribute
    pub fn binary(name: impl Into<String>, values: Vec<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            values,
            binary: true,
        }
    }

    /// Whether this attribute has the given name (case-insensitive)
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// First value as text
    pub fn string_value(&self) -> Option<Cow<'_, str>> {
        self.values.first().map(|v| String::from_utf8_lossy(v))
    }

    /// All values as text
    pub fn string_values(&self) -> Vec<String> {
        self.values
            .iter()
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect()
    }

    /// All values rendered for display: text as-is, binary as base64
    pub fn display_values(&self) -> Vec<String> {
        if self.binary {
            self.values
                .iter()
                .map(|v| base64::engine::general_purpose::STANDARD.encode(v))
                .collect()
        } else {
            self.string_values()
        }
    }

    /// Add a value unless it is already present
    pub fn add_value(&mut self, value: Vec<u8>) {
        if !self.values.contains(&value) {
            self.values.push(value);
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A directory entry: a DN plus its attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LdapEntry {
    pub dn: String,
    pub attributes: Vec<LdapAttribute>,
}

impl LdapEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: Vec::new(),
        }
    }

    /// Builder-style attribute addition
    pub fn with_attribute(mut self, attribute: LdapAttribute) -> Self {
        self.add_attribute(attribute);
        self
    }

    /// Look up an attribute by name (case-insensitive)
    pub fn attribute(&self, name: &str) -> Option<&LdapAttribute> {
        self.attributes.iter().find(|a| a.is_named(name))
    }

    pub fn attribute_mut(&mut self, name: &str) -> Option<&mut LdapAttribute> {
        self.attributes.iter_mut().find(|a| a.is_named(name))
    }

    /// Add an attribute, merging values into an existing attribute of the same name
    pub fn add_attribute(&mut self, attribute: LdapAttribute) {
        match self.attribute_mut(&attribute.name) {
            Some(existing) => {
                existing.binary |= attribute.binary;
                for value in attribute.values {
                    existing.add_value(value);
                }
            }
            None => self.attributes.push(attribute),
        }
    }

    /// Replace an attribute wholesale
    pub fn put_attribute(&mut self, attribute: LdapAttribute) {
        self.remove_attribute(&attribute.name);
        self.attributes.push(attribute);
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<LdapAttribute> {
        let idx = self.attributes.iter().position(|a| a.is_named(name))?;
        Some(self.attributes.remove(idx))
    }

    pub fn attribute_names(&self) -> Vec<&str> {
        self.attributes.iter().map(|a| a.name.as_str()).collect()
    }

    /// Merge another entry's attributes into this one
    pub fn merge(&mut self, other: LdapEntry) {
        for attribute in other.attributes {
            self.add_attribute(attribute);
        }
    }

    /// Attributes keyed by name with text values
    pub fn to_string_map(&self) -> HashMap<String, Vec<String>> {
        self.attributes
            .iter()
            .map(|a| (a.name.clone(), a.string_values()))
            .collect()
    }
}
