//! Principals and credential pre-processing

use base64::Engine;
use digest::Digest;
use dirgate_core::config::{CaseConversion, DigestEncoding, PasswordEncoderProperties, PasswordEncoderType};
use dirgate_core::config::PrincipalTransformationProperties;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{DirectoryError, DirectoryResult};

/// An authenticated identity with its resolved attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub id: String,
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl Principal {
    pub fn attribute(&self, name: &str) -> Option<&[String]> {
        self.attributes.get(name).map(Vec::as_slice)
    }
}

/// Builds principals from the resolved id and attributes
pub trait PrincipalFactory: Send + Sync {
    fn create_principal(&self, id: &str, attributes: BTreeMap<String, Vec<String>>) -> Principal;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPrincipalFactory;

impl PrincipalFactory for DefaultPrincipalFactory {
    fn create_principal(&self, id: &str, attributes: BTreeMap<String, Vec<String>>) -> Principal {
        Principal {
            id: id.to_string(),
            attributes,
        }
    }
}

/// Rewrites the user name before it is resolved
#[derive(Debug, Clone, Default)]
pub struct PrincipalNameTransformer {
    prefix: String,
    suffix: String,
    case: CaseConversion,
}

impl PrincipalNameTransformer {
    pub fn from_properties(props: &PrincipalTransformationProperties) -> Self {
        Self {
            prefix: props.prefix.clone().unwrap_or_default(),
            suffix: props.suffix.clone().unwrap_or_default(),
            case: props.case_conversion,
        }
    }

    pub fn transform(&self, name: &str) -> String {
        let name = format!("{}{}{}", self.prefix, name.trim(), self.suffix);
        match self.case {
            CaseConversion::None => name,
            CaseConversion::Uppercase => name.to_uppercase(),
            CaseConversion::Lowercase => name.to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl std::str::FromStr for DigestAlgorithm {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('_', "-").as_str() {
            "MD5" => Ok(Self::Md5),
            "SHA" | "SHA1" | "SHA-1" => Ok(Self::Sha1),
            "SHA256" | "SHA-256" => Ok(Self::Sha256),
            "SHA512" | "SHA-512" => Ok(Self::Sha512),
            other => Err(DirectoryError::configuration(format!(
                "Unsupported password encoding algorithm {}",
                other
            ))),
        }
    }
}

/// Encodes the presented password before it reaches the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PasswordEncoder {
    #[default]
    None,
    Digest {
        algorithm: DigestAlgorithm,
        encoding: DigestEncoding,
    },
}

impl PasswordEncoder {
    pub fn from_properties(props: &PasswordEncoderProperties) -> DirectoryResult<Self> {
        match props.encoder_type {
            PasswordEncoderType::None => Ok(PasswordEncoder::None),
            PasswordEncoderType::Default => Ok(PasswordEncoder::Digest {
                algorithm: props.encoding_algorithm.parse()?,
                encoding: props.output_encoding,
            }),
        }
    }

    pub fn encode(&self, password: &str) -> String {
        let PasswordEncoder::Digest { algorithm, encoding } = self else {
            return password.to_string();
        };
        let bytes = password.as_bytes();
        let hash = match algorithm {
            DigestAlgorithm::Md5 => md5::Md5::digest(bytes).to_vec(),
            DigestAlgorithm::Sha1 => sha1::Sha1::digest(bytes).to_vec(),
            DigestAlgorithm::Sha256 => sha2::Sha256::digest(bytes).to_vec(),
            DigestAlgorithm::Sha512 => sha2::Sha512::digest(bytes).to_vec(),
        };
        match encoding {
            DigestEncoding::Hex => hex::encode(hash),
            DigestEncoding::Base64 => base64::engine::general_purpose::STANDARD.encode(hash),
        }
    }
}
