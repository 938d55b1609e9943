//! Whole-response handlers that may issue follow-up searches

use dirgate_core::config::{PrimaryGroupIdHandlerProperties, RecursiveHandlerProperties, SearchScope};
use dirgate_core::types::{LdapAttribute, LdapEntry};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, trace, warn};

use super::ad::{domain_sid, sid_to_string};
use super::entry::OBJECT_SID;
use super::referral::follow_referrals;
use crate::client::{DirectoryConnection, SearchRequest, SearchResponse};
use crate::error::DirectoryResult;
use crate::factory::ConnectionFactory;
use crate::filter::new_search_filter;

pub const PRIMARY_GROUP_ID: &str = "primaryGroupID";
pub const MEMBER_OF: &str = "memberOf";

static RANGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+);range=(\d+)-(\d+|\*)$").expect("valid range pattern"));

/// Safety stop for range retrieval loops against misbehaving servers
const MAX_RANGE_ROUNDS: usize = 1000;

#[derive(Debug, Clone)]
pub enum ResultHandler {
    /// Add the AD primary group DN to memberOf
    PrimaryGroup(PrimaryGroupIdHandlerProperties),
    /// Complete ranged multi-value attributes (`member;range=0-1499`)
    RangeEntry,
    /// Walk group membership transitively
    RecursiveEntry(RecursiveHandlerProperties),
    /// Collapse every entry into the first
    MergeEntries,
    /// Chase continuation references up to `limit` hops
    FollowReferrals { limit: usize },
}

impl ResultHandler {
    pub async fn handle(
        &self,
        connection: &mut dyn DirectoryConnection,
        factory: &dyn ConnectionFactory,
        request: &SearchRequest,
        response: &mut SearchResponse,
    ) -> DirectoryResult<()> {
        match self {
            ResultHandler::PrimaryGroup(props) => {
                for entry in response.entries.iter_mut() {
                    add_primary_group(props, connection, request, entry).await?;
                }
                Ok(())
            }
            ResultHandler::RangeEntry => {
                for entry in response.entries.iter_mut() {
                    complete_ranges(connection, request, entry).await?;
                }
                Ok(())
            }
            ResultHandler::RecursiveEntry(props) => {
                for entry in response.entries.iter_mut() {
                    expand_recursively(props, connection, request, entry).await?;
                }
                Ok(())
            }
            ResultHandler::MergeEntries => {
                merge_entries(response);
                Ok(())
            }
            ResultHandler::FollowReferrals { limit } => {
                follow_referrals(factory, request, response, *limit).await
            }
        }
    }
}

async fn add_primary_group(
    props: &PrimaryGroupIdHandlerProperties,
    connection: &mut dyn DirectoryConnection,
    request: &SearchRequest,
    entry: &mut LdapEntry,
) -> DirectoryResult<()> {
    let Some(group_id) = entry
        .attribute(PRIMARY_GROUP_ID)
        .and_then(|a| a.string_value())
        .map(|v| v.into_owned())
    else {
        return Ok(());
    };

    let sid = match entry.attribute(OBJECT_SID) {
        Some(a) if a.binary => a.values.first().and_then(|v| sid_to_string(v)),
        Some(a) => a.string_value().map(|v| v.into_owned()),
        None => None,
    };
    let Some(domain) = sid.as_deref().and_then(domain_sid) else {
        debug!("Entry {} has no usable {}; skipping primary group", entry.dn, OBJECT_SID);
        return Ok(());
    };

    let group_sid = format!("{}-{}", domain, group_id);
    let filter = new_search_filter(&props.group_filter, &["groupSid"], &[group_sid.clone()], None)?;
    let base_dn = if props.base_dn.is_empty() {
        request.base_dn.clone()
    } else {
        props.base_dn.clone()
    };

    let group_search = SearchRequest::new(base_dn, filter.format())
        .with_attributes(vec![crate::client::NO_ATTRIBUTES.to_string()]);
    let groups = connection.search(&group_search).await?;

    match groups.entry() {
        Some(group) => {
            trace!("Primary group of {} is {}", entry.dn, group.dn);
            entry.add_attribute(LdapAttribute::new(MEMBER_OF, [group.dn.clone()]));
        }
        None => warn!("No group found for primary group SID {}", group_sid),
    }
    Ok(())
}

async fn complete_ranges(
    connection: &mut dyn DirectoryConnection,
    request: &SearchRequest,
    entry: &mut LdapEntry,
) -> DirectoryResult<()> {
    let ranged: Vec<String> = entry
        .attributes
        .iter()
        .filter(|a| RANGE.is_match(&a.name))
        .map(|a| a.name.clone())
        .collect();

    for name in ranged {
        let Some(attribute) = entry.remove_attribute(&name) else {
            continue;
        };
        let (base, mut end) = match RANGE.captures(&name) {
            Some(caps) => (caps[1].to_string(), caps[3].to_string()),
            None => continue,
        };
        let mut complete = LdapAttribute {
            name: base.clone(),
            values: attribute.values,
            binary: attribute.binary || request.is_binary(&base),
        };

        let mut rounds = 0;
        while end != "*" && rounds < MAX_RANGE_ROUNDS {
            rounds += 1;
            let Ok(last) = end.parse::<u64>() else {
                break;
            };
            let next = format!("{};range={}-*", base, last + 1);
            let read = SearchRequest::read(entry.dn.clone(), vec![next])
                .with_binary_attributes(request.binary_attributes.clone());
            let response = connection.search(&read).await?;

            let chunk = response.entry().and_then(|e| {
                e.attributes
                    .iter()
                    .find(|a| {
                        RANGE
                            .captures(&a.name)
                            .map(|c| c[1].eq_ignore_ascii_case(&base))
                            .unwrap_or(false)
                    })
                    .cloned()
            });
            let Some(chunk) = chunk else {
                break;
            };

            end = RANGE
                .captures(&chunk.name)
                .map(|c| c[3].to_string())
                .unwrap_or_else(|| "*".to_string());
            for value in chunk.values {
                complete.add_value(value);
            }
        }

        debug!("Retrieved {} values of {} for {}", complete.len(), base, entry.dn);
        entry.add_attribute(complete);
    }
    Ok(())
}

async fn expand_recursively(
    props: &RecursiveHandlerProperties,
    connection: &mut dyn DirectoryConnection,
    request: &SearchRequest,
    entry: &mut LdapEntry,
) -> DirectoryResult<()> {
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(entry.dn.to_lowercase());

    let mut pending: VecDeque<String> = entry
        .attribute(&props.search_attribute)
        .map(|a| a.string_values().into())
        .unwrap_or_default();

    let mut attributes = props.merge_attributes.clone();
    if !attributes.iter().any(|a| a.eq_ignore_ascii_case(&props.search_attribute)) {
        attributes.push(props.search_attribute.clone());
    }

    while let Some(dn) = pending.pop_front() {
        if !visited.insert(dn.to_lowercase()) {
            continue;
        }

        let read = SearchRequest::read(dn.clone(), attributes.clone())
            .with_scope(SearchScope::Object)
            .with_binary_attributes(request.binary_attributes.clone());
        let response = connection.search(&read).await?;
        let Some(found) = response.entry() else {
            trace!("Recursive lookup found nothing at {}", dn);
            continue;
        };

        for name in &props.merge_attributes {
            if let Some(attribute) = found.attribute(name) {
                entry.add_attribute(attribute.clone());
            }
        }
        if let Some(next) = found.attribute(&props.search_attribute) {
            pending.extend(next.string_values());
        }
    }
    Ok(())
}

fn merge_entries(response: &mut SearchResponse) {
    if response.entries.len() < 2 {
        return;
    }
    let mut rest = response.entries.split_off(1);
    let first = &mut response.entries[0];
    for entry in rest.drain(..) {
        first.merge(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::new_connection_descriptor;
    use crate::factory::DefaultConnectionFactory;
    use crate::mock::MockDirectory;
    use dirgate_core::LdapProperties;

    fn factory(directory: &MockDirectory) -> DefaultConnectionFactory {
        let props = LdapProperties {
            ldap_url: "ldap://localhost".to_string(),
            ..Default::default()
        };
        DefaultConnectionFactory::new(new_connection_descriptor(&props).unwrap(), directory.connector())
    }

    fn response(entries: Vec<LdapEntry>) -> SearchResponse {
        SearchResponse {
            entries,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_primary_group() {
        let directory = MockDirectory::new();
        directory.add_entry(
            LdapEntry::new("cn=Domain Users,cn=users,dc=ad")
                .with_attribute(LdapAttribute::new("objectClass", ["group"]))
                .with_attribute(LdapAttribute::new(OBJECT_SID, ["S-1-5-21-1-2-3-513"])),
        );
        let factory = factory(&directory);
        let mut conn = factory.get_connection().await.unwrap();

        let mut resp = response(vec![LdapEntry::new("cn=jdoe,cn=users,dc=ad")
            .with_attribute(LdapAttribute::new(OBJECT_SID, ["S-1-5-21-1-2-3-1105"]))
            .with_attribute(LdapAttribute::new(PRIMARY_GROUP_ID, ["513"]))]);
        let request = SearchRequest::new("dc=ad", "(cn=jdoe)");

        ResultHandler::PrimaryGroup(PrimaryGroupIdHandlerProperties::default())
            .handle(&mut *conn, &factory, &request, &mut resp)
            .await
            .unwrap();

        assert_eq!(
            resp.entries[0].attribute(MEMBER_OF).unwrap().string_values(),
            vec!["cn=Domain Users,cn=users,dc=ad"]
        );
    }

    #[tokio::test]
    async fn test_range_entry() {
        let directory = MockDirectory::new();
        directory.add_entry(
            LdapEntry::new("cn=big,dc=x")
                .with_attribute(LdapAttribute::new("member;range=2-*", ["cn=c"])),
        );
        let factory = factory(&directory);
        let mut conn = factory.get_connection().await.unwrap();

        let mut resp = response(vec![LdapEntry::new("cn=big,dc=x")
            .with_attribute(LdapAttribute::new("member;range=0-1", ["cn=a", "cn=b"]))]);
        ResultHandler::RangeEntry
            .handle(&mut *conn, &factory, &SearchRequest::new("dc=x", "(cn=big)"), &mut resp)
            .await
            .unwrap();

        let entry = &resp.entries[0];
        assert_eq!(
            entry.attribute("member").unwrap().string_values(),
            vec!["cn=a", "cn=b", "cn=c"]
        );
        assert!(entry.attribute("member;range=0-1").is_none());
    }

    #[tokio::test]
    async fn test_recursive_entry_stops_on_cycles() {
        let directory = MockDirectory::new();
        directory.add_entry(
            LdapEntry::new("cn=g1,dc=x").with_attribute(LdapAttribute::new(MEMBER_OF, ["cn=g2,dc=x"])),
        );
        directory.add_entry(
            LdapEntry::new("cn=g2,dc=x").with_attribute(LdapAttribute::new(MEMBER_OF, ["cn=g1,dc=x"])),
        );
        let factory = factory(&directory);
        let mut conn = factory.get_connection().await.unwrap();

        let mut resp = response(vec![LdapEntry::new("uid=u,dc=x")
            .with_attribute(LdapAttribute::new(MEMBER_OF, ["cn=g1,dc=x"]))]);
        ResultHandler::RecursiveEntry(RecursiveHandlerProperties::default())
            .handle(&mut *conn, &factory, &SearchRequest::new("dc=x", "(uid=u)"), &mut resp)
            .await
            .unwrap();

        assert_eq!(
            resp.entries[0].attribute(MEMBER_OF).unwrap().string_values(),
            vec!["cn=g1,dc=x", "cn=g2,dc=x"]
        );
        assert_eq!(directory.search_count(), 2);
    }

    #[test]
    fn test_merge_entries() {
        let mut resp = response(vec![
            LdapEntry::new("uid=a").with_attribute(LdapAttribute::new("mail", ["a@x"])),
            LdapEntry::new("uid=b").with_attribute(LdapAttribute::new("mail", ["b@x"])),
        ]);
        merge_entries(&mut resp);
        assert_eq!(resp.entries.len(), 1);
        assert_eq!(resp.entries[0].dn, "uid=a");
        assert_eq!(
            resp.entries[0].attribute("mail").unwrap().string_values(),
            vec!["a@x", "b@x"]
        );
    }
}
