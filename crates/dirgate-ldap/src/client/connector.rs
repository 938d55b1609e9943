//! `ldap3` backed connector
//!
//! Handles LDAP, LDAPS (SSL) and STARTTLS connections. Every operation is
//! bounded by the descriptor's response timeout.

use super::*;
use async_trait::async_trait;
use dirgate_core::config::{DerefAliases, SaslMechanism, SearchScope};
use dirgate_core::types::{LdapAttribute, LdapEntry, ResultCode};
use ldap3::controls::{Control, ControlType, PagedResults, RawControl};
use ldap3::exop::{Exop, PasswordModify};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapResult, Mod, Scope, SearchEntry, SearchOptions};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

use crate::connection::ConnectionDescriptor;
use crate::error::{DirectoryError, DirectoryResult};

/// LDAP_SERVER_FAST_BIND_OID
const FAST_BIND_OID: &str = "1.2.840.113556.1.4.1781";

/// Connector backed by the `ldap3` async client
#[derive(Debug, Clone, Default)]
pub struct Ldap3Connector;

impl Ldap3Connector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for Ldap3Connector {
    async fn connect(
        &self,
        url: &str,
        descriptor: &ConnectionDescriptor,
    ) -> DirectoryResult<Box<dyn DirectoryConnection>> {
        let mut settings = LdapConnSettings::new()
            .set_conn_timeout(descriptor.connect_timeout)
            .set_starttls(descriptor.use_start_tls);

        if descriptor.ssl.trusts_any() {
            settings = settings.set_no_tls_verify(true);
        } else if let Some(config) = descriptor.ssl.client_config()? {
            settings = settings.set_config(config);
        }

        debug!("Connecting to LDAP server: {}", url);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, url)
            .await
            .map_err(|e| DirectoryError::connection(format!("Failed to connect to {}: {}", url, e)))?;

        let driver_url = url.to_string();
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!("LDAP connection to {} terminated: {}", driver_url, e);
            }
        });

        Ok(Box::new(Ldap3Connection {
            ldap,
            url: url.to_string(),
            timeout: descriptor.response_timeout,
        }))
    }
}

struct Ldap3Connection {
    ldap: Ldap,
    url: String,
    timeout: Duration,
}

impl Ldap3Connection {
    /// Handle with the response timeout and the given controls applied
    fn handle(&mut self, controls: &[RequestControl]) -> &mut Ldap {
        let timeout = self.timeout;
        let ldap = self.ldap.with_timeout(timeout);
        if !controls.is_empty() {
            ldap.with_controls(controls.iter().map(to_raw_control).collect::<Vec<_>>());
        }
        ldap
    }
}

#[async_trait]
impl DirectoryConnection for Ldap3Connection {
    fn url(&self) -> &str {
        &self.url
    }

    async fn bind(&mut self, request: &BindRequest) -> DirectoryResult<OperationResult> {
        let result = self
            .handle(&request.controls)
            .simple_bind(&request.dn, &request.credential)
            .await?;
        Ok(to_operation_result(result))
    }

    async fn sasl_bind(&mut self, config: &SaslConfig) -> DirectoryResult<OperationResult> {
        match config.mechanism {
            SaslMechanism::External => {
                let result = self.handle(&[]).sasl_external_bind().await?;
                Ok(to_operation_result(result))
            }
            other => Err(DirectoryError::UnsupportedMechanism(format!(
                "{:?} is not available with the ldap3 client",
                other
            ))),
        }
    }

    async fn fast_bind(&mut self) -> DirectoryResult<OperationResult> {
        let exop = Exop {
            name: Some(FAST_BIND_OID.to_string()),
            val: None,
        };
        let result = self.handle(&[]).extended(exop).await?;
        Ok(to_operation_result(result.1))
    }

    async fn search(&mut self, request: &SearchRequest) -> DirectoryResult<SearchResponse> {
        let mut controls = request.controls.clone();
        if let Some(page) = &request.page {
            let raw: RawControl = PagedResults {
                size: page.size,
                cookie: page.cookie.clone(),
            }
            .into();
            controls.push(RequestControl {
                oid: raw.ctype,
                critical: raw.crit,
                value: raw.val,
            });
        }

        let options = SearchOptions::new()
            .deref(to_deref(request.deref_aliases))
            .sizelimit(request.size_limit);

        let attributes: Vec<&str> = if request.attributes.is_empty() {
            vec!["*"]
        } else {
            request.attributes.iter().map(String::as_str).collect()
        };

        let ldap = self.handle(&controls);
        ldap.with_search_options(options);
        let ldap3::SearchResult(rs, result) = ldap
            .search(
                &request.base_dn,
                to_scope(request.scope),
                &request.filter,
                attributes,
            )
            .await?;

        let mut response = SearchResponse::default();
        for re in rs {
            if re.is_ref() {
                response.references.extend(ldap3::parse_refs(re.0));
            } else if !re.is_intermediate() {
                response.entries.push(to_entry(SearchEntry::construct(re), request));
            }
        }

        for Control(ctype, raw) in &result.ctrls {
            if let Some(ControlType::PagedResults) = ctype {
                let paged: PagedResults = raw.parse();
                response.page_cookie = Some(paged.cookie);
            }
        }

        response.result = Some(to_operation_result(result));
        Ok(response)
    }

    async fn compare(&mut self, request: &CompareRequest) -> DirectoryResult<OperationResult> {
        let result = self
            .handle(&[])
            .compare(&request.dn, &request.attribute, request.value.as_slice())
            .await?;
        Ok(to_operation_result(result.0))
    }

    async fn add(&mut self, entry: &LdapEntry) -> DirectoryResult<OperationResult> {
        let attributes: Vec<(Vec<u8>, HashSet<Vec<u8>>)> = entry
            .attributes
            .iter()
            .map(|a| {
                (
                    a.name.as_bytes().to_vec(),
                    a.values.iter().cloned().collect::<HashSet<_>>(),
                )
            })
            .collect();
        let result = self.handle(&[]).add(&entry.dn, attributes).await?;
        Ok(to_operation_result(result))
    }

    async fn modify(
        &mut self,
        dn: &str,
        modifications: &[AttributeModification],
    ) -> DirectoryResult<OperationResult> {
        let mods: Vec<Mod<Vec<u8>>> = modifications
            .iter()
            .map(|m| {
                let name = m.attribute.as_bytes().to_vec();
                let values: HashSet<Vec<u8>> = m.values.iter().cloned().collect();
                match m.operation {
                    ModificationType::Add => Mod::Add(name, values),
                    ModificationType::Delete => Mod::Delete(name, values),
                    ModificationType::Replace => Mod::Replace(name, values),
                }
            })
            .collect();
        let result = self.handle(&[]).modify(dn, mods).await?;
        Ok(to_operation_result(result))
    }

    async fn delete(&mut self, dn: &str) -> DirectoryResult<OperationResult> {
        let result = self.handle(&[]).delete(dn).await?;
        Ok(to_operation_result(result))
    }

    async fn password_modify(
        &mut self,
        request: &PasswordModifyRequest,
    ) -> DirectoryResult<OperationResult> {
        let exop = PasswordModify {
            user_id: Some(&request.user_id),
            old_pass: request.old_password.as_deref(),
            new_pass: request.new_password.as_deref(),
        };
        let result = self.handle(&[]).extended(exop).await?;
        Ok(to_operation_result(result.1))
    }

    async fn close(&mut self) -> DirectoryResult<()> {
        self.ldap.unbind().await?;
        Ok(())
    }
}

fn to_raw_control(control: &RequestControl) -> RawControl {
    RawControl {
        ctype: control.oid.clone(),
        crit: control.critical,
        val: control.value.clone(),
    }
}

fn to_operation_result(result: LdapResult) -> OperationResult {
    OperationResult {
        code: ResultCode::from_code(result.rc),
        message: result.text,
        matched_dn: result.matched,
        referrals: result.refs,
        controls: result
            .ctrls
            .into_iter()
            .map(|Control(_, raw)| ResponseControl {
                oid: raw.ctype,
                critical: raw.crit,
                value: raw.val,
            })
            .collect(),
    }
}

fn to_entry(entry: SearchEntry, request: &SearchRequest) -> LdapEntry {
    let mut result = LdapEntry::new(entry.dn);
    for (name, values) in entry.attrs {
        let attribute = if request.is_binary(&name) {
            LdapAttribute::binary(name, values.into_iter().map(String::into_bytes).collect())
        } else {
            LdapAttribute::new(name, values)
        };
        result.add_attribute(attribute);
    }
    for (name, values) in entry.bin_attrs {
        result.add_attribute(LdapAttribute::binary(name, values));
    }
    result
}

fn to_scope(scope: SearchScope) -> Scope {
    match scope {
        SearchScope::Object => Scope::Base,
        SearchScope::OneLevel => Scope::OneLevel,
        SearchScope::Subtree => Scope::Subtree,
    }
}

fn to_deref(deref: DerefAliases) -> ldap3::DerefAliases {
    match deref {
        DerefAliases::Never => ldap3::DerefAliases::Never,
        DerefAliases::Searching => ldap3::DerefAliases::Searching,
        DerefAliases::Finding => ldap3::DerefAliases::Finding,
        DerefAliases::Always => ldap3::DerefAliases::Always,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_result_conversion() {
        let result = LdapResult {
            rc: 49,
            matched: String::new(),
            text: "80090308: LdapErr: DSID-0C09030B, data 775".to_string(),
            refs: vec![],
            ctrls: vec![],
        };
        let converted = to_operation_result(result);
        assert_eq!(converted.code, ResultCode::InvalidCredentials);
        assert!(converted.message.contains("data 775"));
    }

    #[test]
    fn test_binary_attributes_are_flagged() {
        let request = SearchRequest::new("dc=example,dc=com", "(uid=jdoe)")
            .with_binary_attributes(vec!["objectGUID".to_string()]);
        let entry = SearchEntry {
            dn: "cn=jdoe,dc=example,dc=com".to_string(),
            attrs: [
                ("cn".to_string(), vec!["jdoe".to_string()]),
                ("objectguid".to_string(), vec!["abc".to_string()]),
            ]
            .into_iter()
            .collect(),
            bin_attrs: [("objectSid".to_string(), vec![vec![1u8, 0, 0]])]
                .into_iter()
                .collect(),
        };

        let converted = to_entry(entry, &request);
        assert!(!converted.attribute("cn").unwrap().binary);
        assert!(converted.attribute("objectGUID").unwrap().binary);
        assert!(converted.attribute("objectSid").unwrap().binary);
    }
}
