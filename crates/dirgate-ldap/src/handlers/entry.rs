//! Per-entry rewriting handlers

use dirgate_core::config::{
    CaseChangeHandlerProperties, DnAttributeHandlerProperties, MergeAttributeHandlerProperties,
};
use dirgate_core::types::{LdapAttribute, LdapEntry};
use tracing::trace;

use super::ad::{guid_to_string, sid_to_string};

pub const OBJECT_GUID: &str = "objectGUID";
pub const OBJECT_SID: &str = "objectSid";
pub const SID_HISTORY: &str = "sIDHistory";

/// Rewrites a single search entry in place
#[derive(Debug, Clone)]
pub enum EntryHandler {
    CaseChange(CaseChangeHandlerProperties),
    DnAttribute(DnAttributeHandlerProperties),
    MergeAttribute(MergeAttributeHandlerProperties),
    ObjectGuid,
    ObjectSid,
    /// objectGUID and objectSid together
    ActiveDirectory,
}

impl EntryHandler {
    pub fn handle(&self, entry: &mut LdapEntry) {
        match self {
            EntryHandler::CaseChange(props) => change_case(props, entry),
            EntryHandler::DnAttribute(props) => add_dn_attribute(props, entry),
            EntryHandler::MergeAttribute(props) => merge_attributes(props, entry),
            EntryHandler::ObjectGuid => decode(entry, &[OBJECT_GUID], guid_to_string),
            EntryHandler::ObjectSid => decode(entry, &[OBJECT_SID, SID_HISTORY], sid_to_string),
            EntryHandler::ActiveDirectory => {
                decode(entry, &[OBJECT_GUID], guid_to_string);
                decode(entry, &[OBJECT_SID, SID_HISTORY], sid_to_string);
            }
        }
    }

    /// Attributes that must be fetched as binary for this handler to work
    pub fn binary_attributes(&self) -> &'static [&'static str] {
        match self {
            EntryHandler::ObjectGuid => &[OBJECT_GUID],
            EntryHandler::ObjectSid => &[OBJECT_SID, SID_HISTORY],
            EntryHandler::ActiveDirectory => &[OBJECT_GUID, OBJECT_SID, SID_HISTORY],
            _ => &[],
        }
    }
}

fn change_case(props: &CaseChangeHandlerProperties, entry: &mut LdapEntry) {
    entry.dn = props.dn_case_change.apply(&entry.dn);

    let selected = |name: &str| {
        props.attribute_names.is_empty()
            || props.attribute_names.iter().any(|n| n.eq_ignore_ascii_case(name))
    };

    for attribute in entry.attributes.iter_mut().filter(|a| selected(&a.name)) {
        attribute.name = props.attribute_name_case_change.apply(&attribute.name);
        if !attribute.binary {
            attribute.values = attribute
                .string_values()
                .iter()
                .map(|v| props.attribute_value_case_change.apply(v).into_bytes())
                .collect();
        }
    }
}

fn add_dn_attribute(props: &DnAttributeHandlerProperties, entry: &mut LdapEntry) {
    if entry.attribute(&props.dn_attribute_name).is_some() && !props.add_if_exists {
        trace!("Entry {} already has {}", entry.dn, props.dn_attribute_name);
        return;
    }
    let dn = entry.dn.clone();
    entry.add_attribute(LdapAttribute::new(props.dn_attribute_name.clone(), [dn]));
}

fn merge_attributes(props: &MergeAttributeHandlerProperties, entry: &mut LdapEntry) {
    if props.merge_attribute_name.is_empty() {
        return;
    }

    let mut merged = LdapAttribute::new(props.merge_attribute_name.clone(), Vec::<String>::new());
    for name in &props.attribute_names {
        if let Some(attribute) = entry.attribute(name) {
            merged.binary |= attribute.binary;
            for value in &attribute.values {
                merged.add_value(value.clone());
            }
        }
    }

    if !merged.is_empty() {
        entry.add_attribute(merged);
    }
}

fn decode(entry: &mut LdapEntry, names: &[&str], render: fn(&[u8]) -> Option<String>) {
    for name in names {
        let Some(attribute) = entry.attribute_mut(name) else {
            continue;
        };
        if !attribute.binary {
            continue;
        }
        let rendered: Option<Vec<Vec<u8>>> = attribute
            .values
            .iter()
            .map(|v| render(v).map(String::into_bytes))
            .collect();
        match rendered {
            Some(values) => {
                attribute.values = values;
                attribute.binary = false;
            }
            None => trace!("Leaving malformed {} on {} untouched", name, entry.dn),
        }
    }
}
