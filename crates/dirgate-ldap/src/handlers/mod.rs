//! Search entry and search result handlers
//!
//! Entry handlers rewrite each returned entry; result handlers work on the
//! whole response and may search again over the same connection.

pub mod ad;
mod entry;
mod referral;
mod result;

pub use entry::{EntryHandler, OBJECT_GUID, OBJECT_SID, SID_HISTORY};
pub use referral::{follow_referrals, LdapUrl, DEFAULT_REFERRAL_LIMIT};
pub use result::{ResultHandler, MEMBER_OF, PRIMARY_GROUP_ID};

use dirgate_core::config::{SearchEntryHandlerProperties, SearchEntryHandlerType};

use crate::client::{DirectoryConnection, SearchRequest, SearchResponse};
use crate::error::DirectoryResult;
use crate::factory::ConnectionFactory;

/// Handlers attached to a resolver's searches
#[derive(Debug, Clone, Default)]
pub struct SearchHandlers {
    entry_handlers: Vec<EntryHandler>,
    result_handlers: Vec<ResultHandler>,
}

impl SearchHandlers {
    /// Build handlers in configuration order, optionally chasing referrals
    pub fn new(configs: &[SearchEntryHandlerProperties], follow_referrals: bool) -> Self {
        let mut handlers = Self::default();

        if follow_referrals {
            handlers.result_handlers.push(ResultHandler::FollowReferrals {
                limit: DEFAULT_REFERRAL_LIMIT,
            });
        }

        for config in configs {
            match config.handler_type {
                SearchEntryHandlerType::ActiveDirectory => {
                    handlers.entry_handlers.push(EntryHandler::ActiveDirectory)
                }
                SearchEntryHandlerType::CaseChange => handlers
                    .entry_handlers
                    .push(EntryHandler::CaseChange(config.case_change.clone())),
                SearchEntryHandlerType::DnAttributeEntry => handlers
                    .entry_handlers
                    .push(EntryHandler::DnAttribute(config.dn_attribute.clone())),
                SearchEntryHandlerType::Merge => handlers
                    .entry_handlers
                    .push(EntryHandler::MergeAttribute(config.merge_attribute.clone())),
                SearchEntryHandlerType::ObjectGuid => handlers.entry_handlers.push(EntryHandler::ObjectGuid),
                SearchEntryHandlerType::ObjectSid => handlers.entry_handlers.push(EntryHandler::ObjectSid),
                SearchEntryHandlerType::PrimaryGroup => handlers
                    .result_handlers
                    .push(ResultHandler::PrimaryGroup(config.primary_group_id.clone())),
                SearchEntryHandlerType::RangeEntry => handlers.result_handlers.push(ResultHandler::RangeEntry),
                SearchEntryHandlerType::RecursiveEntry => handlers
                    .result_handlers
                    .push(ResultHandler::RecursiveEntry(config.recursive.clone())),
                SearchEntryHandlerType::MergeEntries => {
                    handlers.result_handlers.push(ResultHandler::MergeEntries)
                }
            }
        }
        handlers
    }

    pub fn entry_handlers(&self) -> &[EntryHandler] {
        &self.entry_handlers
    }

    pub fn result_handlers(&self) -> &[ResultHandler] {
        &self.result_handlers
    }

    pub fn is_empty(&self) -> bool {
        self.entry_handlers.is_empty() && self.result_handlers.is_empty()
    }

    /// Attributes the entry handlers need returned as binary
    pub fn binary_attributes(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self.entry_handlers.iter().flat_map(|h| h.binary_attributes()) {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                names.push(name.to_string());
            }
        }
        names
    }

    /// Run referral chasing, then entry handlers, then the remaining result handlers
    pub async fn apply(
        &self,
        connection: &mut dyn DirectoryConnection,
        factory: &dyn ConnectionFactory,
        request: &SearchRequest,
        response: &mut SearchResponse,
    ) -> DirectoryResult<()> {
        let (referrals, others): (Vec<&ResultHandler>, Vec<&ResultHandler>) = self
            .result_handlers
            .iter()
            .partition(|h| matches!(h, ResultHandler::FollowReferrals { .. }));

        for handler in referrals {
            handler.handle(connection, factory, request, response).await?;
        }

        for entry in response.entries.iter_mut() {
            for handler in &self.entry_handlers {
                handler.handle(entry);
            }
        }

        for handler in others {
            handler.handle(connection, factory, request, response).await?;
        }
        Ok(())
    }
}
