//! Directory operations executor
//!
//! One-shot operations over a connection factory. Searches return the full
//! response; mutations report success as a boolean and log the result code
//! and diagnostic message of anything that failed.

use dirgate_core::config::LdapType;
use dirgate_core::types::{LdapEntry, ResultCode};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use crate::client::{
    AttributeModification, ModificationType, OperationResult, PageRequest, PasswordModifyRequest,
    SearchRequest, SearchResponse,
};
use crate::error::{DirectoryError, DirectoryResult};
use crate::factory::ConnectionFactory;
use crate::filter::SearchFilter;
use crate::handlers::{follow_referrals, DEFAULT_REFERRAL_LIMIT};

/// Active Directory password attribute
pub const UNICODE_PWD_ATTRIBUTE: &str = "unicodePwd";

fn search_request(
    base_dn: &str,
    filter: &SearchFilter,
    binary_attributes: &[String],
    return_attributes: &[String],
) -> SearchRequest {
    SearchRequest::new(base_dn, filter.format())
        .with_attributes(return_attributes.to_vec())
        .with_binary_attributes(binary_attributes.to_vec())
}

fn check_search(response: &SearchResponse) -> DirectoryResult<()> {
    match &response.result {
        Some(result) if !result.is_success() && result.code != ResultCode::Referral => Err(
            DirectoryError::operation("search", result.code, result.message.clone()),
        ),
        _ => Ok(()),
    }
}

/// Search `base_dn`. A `page_size` of zero or less runs one search and follows
/// referrals; otherwise pages are requested until the server returns an
/// empty cookie and concatenated in order.
pub async fn execute_search_operation(
    factory: &dyn ConnectionFactory,
    base_dn: &str,
    filter: &SearchFilter,
    page_size: i32,
    binary_attributes: &[String],
    return_attributes: &[String],
) -> DirectoryResult<SearchResponse> {
    let mut request = search_request(base_dn, filter, binary_attributes, return_attributes);
    debug!("Searching {} with {}", base_dn, request.filter);

    let mut connection = factory.get_connection().await?;
    if page_size <= 0 {
        let result = connection.search(&request).await;
        let mut response = connection.check(result)?;
        check_search(&response)?;
        drop(connection);
        follow_referrals(factory, &request, &mut response, DEFAULT_REFERRAL_LIMIT).await?;
        return Ok(response);
    }

    let mut combined = SearchResponse::default();
    let mut cookie = Vec::new();
    let mut pages = 0usize;
    loop {
        request.page = Some(PageRequest {
            size: page_size,
            cookie: std::mem::take(&mut cookie),
        });
        let result = connection.search(&request).await;
        let page = connection.check(result)?;
        check_search(&page)?;
        pages += 1;

        let next = page.page_cookie.clone().unwrap_or_default();
        combined.extend(page);
        if next.is_empty() {
            break;
        }
        cookie = next;
    }
    debug!("Paged search of {} returned {} entries in {} page(s)", base_dn, combined.entries.len(), pages);
    combined.page_cookie = None;
    Ok(combined)
}

/// Whether the search succeeded and returned at least one entry
pub fn contains_result_entry(response: &SearchResponse) -> bool {
    response.is_success() && response.entry().is_some()
}

fn report(operation: &str, dn: &str, result: DirectoryResult<OperationResult>) -> bool {
    match result {
        Ok(result) if result.is_success() => {
            debug!("{} of {} succeeded", operation, dn);
            true
        }
        Ok(result) => {
            warn!(
                "{} of {} failed with {}: {}",
                operation, dn, result.code, result.message
            );
            false
        }
        Err(e) => {
            error!("{} of {} failed: {}", operation, dn, e);
            false
        }
    }
}

async fn try_modify(
    factory: &dyn ConnectionFactory,
    dn: &str,
    modifications: &[AttributeModification],
) -> DirectoryResult<OperationResult> {
    let mut connection = factory.get_connection().await?;
    let result = connection.modify(dn, modifications).await;
    connection.check(result)
}

async fn modify(factory: &dyn ConnectionFactory, dn: &str, modifications: &[AttributeModification]) -> bool {
    report("Modify", dn, try_modify(factory, dn, modifications).await)
}

/// Replace each listed attribute of `dn` with the given values
pub async fn execute_modify_operation(
    dn: &str,
    factory: &dyn ConnectionFactory,
    attributes: &BTreeMap<String, Vec<String>>,
) -> bool {
    let modifications: Vec<AttributeModification> = attributes
        .iter()
        .map(|(name, values)| {
            AttributeModification::new(
                ModificationType::Replace,
                name.clone(),
                values.iter().map(|v| v.as_bytes().to_vec()).collect(),
            )
        })
        .collect();
    modify(factory, dn, &modifications).await
}

/// Replace every attribute of `dn` with the attributes of `entry`
pub async fn execute_modify_entry(dn: &str, factory: &dyn ConnectionFactory, entry: &LdapEntry) -> bool {
    let modifications: Vec<AttributeModification> = entry
        .attributes
        .iter()
        .map(|a| AttributeModification::new(ModificationType::Replace, a.name.clone(), a.values.clone()))
        .collect();
    modify(factory, dn, &modifications).await
}

async fn try_add(factory: &dyn ConnectionFactory, entry: &LdapEntry) -> DirectoryResult<OperationResult> {
    let mut connection = factory.get_connection().await?;
    let result = connection.add(entry).await;
    connection.check(result)
}

async fn try_delete(factory: &dyn ConnectionFactory, dn: &str) -> DirectoryResult<OperationResult> {
    let mut connection = factory.get_connection().await?;
    let result = connection.delete(dn).await;
    connection.check(result)
}

async fn try_password_modify(
    factory: &dyn ConnectionFactory,
    request: &PasswordModifyRequest,
) -> DirectoryResult<OperationResult> {
    let mut connection = factory.get_connection().await?;
    let result = connection.password_modify(request).await;
    connection.check(result)
}

pub async fn execute_add_operation(factory: &dyn ConnectionFactory, entry: &LdapEntry) -> bool {
    report("Add", &entry.dn, try_add(factory, entry).await)
}

pub async fn execute_delete_operation(factory: &dyn ConnectionFactory, entry: &LdapEntry) -> bool {
    report("Delete", &entry.dn, try_delete(factory, &entry.dn).await)
}

/// Quoted UTF-16LE form Active Directory expects in `unicodePwd`
pub fn encode_unicode_pwd(password: &str) -> Vec<u8> {
    format!("\"{}\"", password)
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect()
}

/// Change the password of `dn`.
///
/// Active Directory gets a `unicodePwd` modify: a REPLACE when no old
/// password is given, otherwise DELETE(old) and ADD(new) in one request.
/// Other directories get the password modify extended operation.
pub async fn execute_password_modify_operation(
    dn: &str,
    factory: &dyn ConnectionFactory,
    old_password: &str,
    new_password: &str,
    flavor: LdapType,
) -> bool {
    let descriptor = factory.descriptor();
    if !descriptor.is_secure() {
        warn!(
            "Executing password modification op under a non-secure LDAP connection; \
             To modify password attributes, the connection to the LDAP server {} be secured and/or encrypted.",
            if flavor == LdapType::Ad { "MUST" } else { "SHOULD" }
        );
    }

    if flavor == LdapType::Ad {
        info!("Executing password change for {} against Active Directory", dn);
        let modifications = if old_password.trim().is_empty() {
            vec![AttributeModification::new(
                ModificationType::Replace,
                UNICODE_PWD_ATTRIBUTE,
                vec![encode_unicode_pwd(new_password)],
            )]
        } else {
            vec![
                AttributeModification::new(
                    ModificationType::Delete,
                    UNICODE_PWD_ATTRIBUTE,
                    vec![encode_unicode_pwd(old_password)],
                ),
                AttributeModification::new(
                    ModificationType::Add,
                    UNICODE_PWD_ATTRIBUTE,
                    vec![encode_unicode_pwd(new_password)],
                ),
            ]
        };
        return modify(factory, dn, &modifications).await;
    }

    info!("Executing password modify extended operation for {}", dn);
    let request = PasswordModifyRequest {
        user_id: dn.to_string(),
        old_password: Some(old_password.to_string()).filter(|p| !p.trim().is_empty()),
        new_password: Some(new_password.to_string()),
    };
    report("Password modify", dn, try_password_modify(factory, &request).await)
}

/// First value of `attribute`, `None` when missing or blank
pub fn get_string(entry: &LdapEntry, attribute: &str) -> Option<String> {
    entry
        .attribute(attribute)
        .and_then(|a| a.string_value())
        .map(|v| v.into_owned())
        .filter(|v| !v.trim().is_empty())
}

/// Whether the first value of `attribute` is `true` (case-insensitive)
pub fn get_boolean(entry: &LdapEntry, attribute: &str, default: bool) -> bool {
    get_string(entry, attribute)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

pub fn get_long(entry: &LdapEntry, attribute: &str, default: i64) -> i64 {
    match get_string(entry, attribute) {
        Some(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!("Value {} of {} is not a number", value, attribute);
            default
        }),
        None => default,
    }
}
