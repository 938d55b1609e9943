//! Continuation reference and referral chasing

use percent_encoding::percent_decode_str;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};
use url::Url;

use crate::client::{SearchRequest, SearchResponse};
use crate::error::{DirectoryError, DirectoryResult};
use crate::factory::ConnectionFactory;
use dirgate_core::types::ResultCode;

/// Default hop limit when chasing referrals
pub const DEFAULT_REFERRAL_LIMIT: usize = 10;

/// A parsed LDAP URL: server part plus optional base DN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapUrl {
    pub server: String,
    pub base_dn: Option<String>,
}

impl LdapUrl {
    pub fn parse(value: &str) -> DirectoryResult<Self> {
        let url = Url::parse(value.trim())
            .map_err(|e| DirectoryError::connection(format!("Invalid referral URL {}: {}", value, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| DirectoryError::connection(format!("Referral URL {} has no host", value)))?;

        let server = match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        };
        let path = url.path().trim_start_matches('/');
        let base_dn = (!path.is_empty())
            .then(|| percent_decode_str(path).decode_utf8_lossy().into_owned());

        Ok(Self { server, base_dn })
    }
}

/// Re-run the search against every referred server, appending what they return.
///
/// Both search continuation references and referral results are followed.
/// Failures on one referral are logged and skipped.
pub async fn follow_referrals(
    factory: &dyn ConnectionFactory,
    request: &SearchRequest,
    response: &mut SearchResponse,
    limit: usize,
) -> DirectoryResult<()> {
    let mut pending: VecDeque<(String, usize)> = collect_referrals(response)
        .into_iter()
        .map(|url| (url, 1))
        .collect();
    let mut seen: HashSet<String> = HashSet::new();

    while let Some((reference, hop)) = pending.pop_front() {
        if !seen.insert(reference.clone()) {
            continue;
        }
        if hop > limit {
            warn!("Referral limit of {} reached; not following {}", limit, reference);
            continue;
        }

        let followed = match search_referral(factory, request, &reference).await {
            Ok(followed) => followed,
            Err(e) => {
                warn!("Failed to follow referral {}: {}", reference, e);
                continue;
            }
        };

        debug!(
            "Referral {} returned {} entries",
            reference,
            followed.entries.len()
        );
        for next in collect_referrals(&followed) {
            pending.push_back((next, hop + 1));
        }
        response.entries.extend(followed.entries);
    }

    response.references.clear();
    if let Some(result) = response.result.as_mut() {
        if result.code == ResultCode::Referral {
            result.code = ResultCode::Success;
            result.referrals.clear();
        }
    }
    Ok(())
}

fn collect_referrals(response: &SearchResponse) -> Vec<String> {
    let mut urls = response.references.clone();
    if let Some(result) = &response.result {
        if result.code == ResultCode::Referral {
            urls.extend(result.referrals.iter().cloned());
        }
    }
    urls
}

async fn search_referral(
    factory: &dyn ConnectionFactory,
    request: &SearchRequest,
    reference: &str,
) -> DirectoryResult<SearchResponse> {
    let url = LdapUrl::parse(reference)?;
    let mut connection = factory.connect_url(&url.server).await?;

    let mut referred = request.clone();
    if let Some(base_dn) = url.base_dn {
        referred.base_dn = base_dn;
    }
    referred.page = None;

    let result = connection.search(&referred).await;
    connection.check(result)
}
