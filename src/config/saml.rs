use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::ConfigError;

/// Default NameID format requested from the IdP.
pub const DEFAULT_NAME_ID_FORMAT: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:transient";

/// Public base URL of the application.
///
/// The literal value `"local"` selects development mode, in which RelayState
/// redirects are not checked against an origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppBaseUrl {
    Local,
    Url(url::Url),
}

impl AppBaseUrl {
    pub fn is_local(&self) -> bool {
        matches!(self, AppBaseUrl::Local)
    }

    pub fn parse(value: &str) -> Result<Self, url::ParseError> {
        if value == "local" {
            Ok(AppBaseUrl::Local)
        } else {
            url::Url::parse(value).map(AppBaseUrl::Url)
        }
    }
}

impl Serialize for AppBaseUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AppBaseUrl::Local => serializer.serialize_str("local"),
            AppBaseUrl::Url(url) => serializer.serialize_str(url.as_str()),
        }
    }
}

impl<'de> Deserialize<'de> for AppBaseUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        AppBaseUrl::parse(&value).map_err(|e| {
            serde::de::Error::custom(format!(
                "app_base_url must be \"local\" or an absolute URL: {e}"
            ))
        })
    }
}

/// Active Directory integration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdConfig {
    /// Attribute claim key carrying the external user ID
    /// (e.g. `http://schemas.microsoft.com/identity/claims/objectidentifier`).
    pub user_id_key: String,

    /// Prefix prepended to the external user ID (`{prefix}:{id}`).
    pub external_id_prefix: String,

    /// SAML settings. When absent, AD login is disabled.
    #[serde(default)]
    pub saml: Option<SamlConfig>,
}

impl AdConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.user_id_key.trim().is_empty() {
            return Err(ConfigError::Validation(
                "ad.user_id_key must not be empty".into(),
            ));
        }
        if self.external_id_prefix.trim().is_empty() {
            return Err(ConfigError::Validation(
                "ad.external_id_prefix must not be empty".into(),
            ));
        }
        if let Some(saml) = &self.saml {
            saml.validate()?;
        }
        Ok(())
    }
}

/// SAML service-provider settings for one identity provider.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamlConfig {
    /// Path to the SP private key (PEM). Used for signing and, optionally,
    /// assertion decryption.
    pub private_cert: String,

    /// Trusted certificate name(s), certificate file path(s), or a federation
    /// metadata URL. When a list is given, the first entry decides whether the
    /// whole list is a metadata URL.
    pub public_cert_or_url_for_saml_metadata: CertReferences,

    /// Decrypt encrypted assertions with the SP private key.
    #[serde(default)]
    pub decrypt_assertions: bool,

    /// Assertion Consumer Service URL.
    pub callback_url: String,

    /// SP entity ID (also used as the expected audience).
    pub issuer: String,

    /// IdP Single Sign-On service URL.
    pub entry_point: String,

    /// IdP Single Logout service URL.
    pub logout_url: String,

    /// NameID format to request. Defaults to transient.
    #[serde(default)]
    pub name_id_format: Option<String>,

    /// Validate the InResponseTo attribute of responses.
    #[serde(default)]
    pub validate_in_response_to: bool,

    /// Named certificates that `public_cert_or_url_for_saml_metadata` may refer to.
    #[serde(default)]
    pub trusted_certificates: HashMap<String, String>,

    /// Timeout for federation metadata requests.
    #[serde(default = "default_metadata_timeout_secs")]
    pub metadata_timeout_secs: u64,
}

impl std::fmt::Debug for SamlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamlConfig")
            .field("private_cert", &self.private_cert)
            .field(
                "public_cert_or_url_for_saml_metadata",
                &self.public_cert_or_url_for_saml_metadata,
            )
            .field("decrypt_assertions", &self.decrypt_assertions)
            .field("callback_url", &self.callback_url)
            .field("issuer", &self.issuer)
            .field("entry_point", &self.entry_point)
            .field("logout_url", &self.logout_url)
            .field("name_id_format", &self.name_id_format)
            .field("validate_in_response_to", &self.validate_in_response_to)
            .field(
                "trusted_certificates",
                &self.trusted_certificates.keys().collect::<Vec<_>>(),
            )
            .field("metadata_timeout_secs", &self.metadata_timeout_secs)
            .finish()
    }
}

impl SamlConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.public_cert_or_url_for_saml_metadata.is_empty() {
            return Err(ConfigError::Validation(
                "ad.saml.public_cert_or_url_for_saml_metadata must not be empty".into(),
            ));
        }
        for (name, value) in [
            ("callback_url", &self.callback_url),
            ("entry_point", &self.entry_point),
            ("logout_url", &self.logout_url),
        ] {
            url::Url::parse(value).map_err(|e| {
                ConfigError::Validation(format!("ad.saml.{name} is not a valid URL: {e}"))
            })?;
        }
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::Validation(
                "ad.saml.issuer must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// The configured NameID format, or transient.
    pub fn name_id_format(&self) -> &str {
        self.name_id_format
            .as_deref()
            .unwrap_or(DEFAULT_NAME_ID_FORMAT)
    }
}

fn default_metadata_timeout_secs() -> u64 {
    10
}

/// One or more certificate references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CertReferences {
    One(String),
    Many(Vec<String>),
}

impl CertReferences {
    /// The entry that decides whether the set is a metadata URL.
    pub fn first(&self) -> Option<&str> {
        match self {
            CertReferences::One(reference) => Some(reference),
            CertReferences::Many(references) => references.first().map(String::as_str),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            CertReferences::One(reference) => std::slice::from_ref(reference),
            CertReferences::Many(references) => references,
        };
        slice.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        match self {
            CertReferences::One(_) => 1,
            CertReferences::Many(references) => references.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for CertReferences {
    fn from(reference: &str) -> Self {
        CertReferences::One(reference.to_string())
    }
}

impl From<Vec<String>> for CertReferences {
    fn from(references: Vec<String>) -> Self {
        CertReferences::Many(references)
    }
}
