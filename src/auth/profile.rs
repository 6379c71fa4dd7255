//! Validated SAML assertion profile and claim mapping.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{SamlError, session_store::AppSessionUser};
use crate::config::AdConfig;

pub const AD_GIVEN_NAME_KEY: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/givenname";
pub const AD_FAMILY_NAME_KEY: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/surname";
pub const AD_EMAIL_KEY: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress";

/// Identity data extracted by the protocol engine from a validated message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub issuer: String,
    #[serde(default, rename = "nameID")]
    pub name_id: Option<String>,
    #[serde(default, rename = "nameIDFormat")]
    pub name_id_format: Option<String>,
    #[serde(default)]
    pub name_qualifier: Option<String>,
    #[serde(default)]
    pub sp_name_qualifier: Option<String>,
    #[serde(default)]
    pub session_index: Option<String>,
    /// Attribute claims keyed by attribute name. Single-valued attributes are
    /// strings, multi-valued ones arrays of strings.
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl Profile {
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// The attribute rendered as a string; `None` when absent or null.
    pub fn attribute_string(&self, key: &str) -> Option<String> {
        self.attribute(key).and_then(value_to_string)
    }

    /// `None` when the profile has no NameID.
    pub fn id(&self) -> Option<ProfileId> {
        self.name_id.as_ref().map(|name_id| ProfileId {
            name_id: name_id.clone(),
            session_index: self.session_index.clone(),
        })
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(values) => Some(
            values
                .iter()
                .filter_map(value_to_string)
                .collect::<Vec<_>>()
                .join(","),
        ),
        other => Some(other.to_string()),
    }
}

/// The subset of a profile that identifies one IdP session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProfileId {
    pub name_id: String,
    pub session_index: Option<String>,
}

impl AppSessionUser {
    pub fn profile_id(&self) -> Option<ProfileId> {
        self.name_id.as_ref().map(|name_id| ProfileId {
            name_id: name_id.clone(),
            session_index: self.session_index.clone(),
        })
    }
}

/// Semantic meaning of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimField {
    UserId,
    GivenName,
    FamilyName,
    Email,
}

impl ClaimField {
    fn required(&self) -> bool {
        !matches!(self, ClaimField::Email)
    }
}

/// Claims extracted through a [`ClaimMapping`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Claims {
    pub user_id: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub email: Option<String>,
}

/// Maps attribute claim keys to the fields the gateway cares about.
#[derive(Debug, Clone)]
pub struct ClaimMapping {
    keys: Vec<(String, ClaimField)>,
}

impl ClaimMapping {
    pub fn new(keys: impl IntoIterator<Item = (String, ClaimField)>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    /// The configured user id key plus the Azure AD name and email claims.
    pub fn from_config(config: &AdConfig) -> Self {
        Self::new([
            (config.user_id_key.clone(), ClaimField::UserId),
            (AD_GIVEN_NAME_KEY.to_string(), ClaimField::GivenName),
            (AD_FAMILY_NAME_KEY.to_string(), ClaimField::FamilyName),
            (AD_EMAIL_KEY.to_string(), ClaimField::Email),
        ])
    }

    pub fn key_for(&self, field: ClaimField) -> Option<&str> {
        self.keys
            .iter()
            .find(|(_, f)| *f == field)
            .map(|(key, _)| key.as_str())
    }

    /// Check the expected attribute shape: every required claim is a string
    /// and the email claim, when present, is a string.
    pub fn validate(&self, profile: &Profile) -> Result<(), SamlError> {
        let problems: Vec<String> = self
            .keys
            .iter()
            .filter_map(|(key, field)| match profile.attribute(key) {
                Some(Value::String(_)) => None,
                None if !field.required() => None,
                None => Some(format!("{key}: required")),
                Some(other) => Some(format!("{key}: expected string, got {}", kind(other))),
            })
            .collect();

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SamlError::ProfileValidation(problems.join("; ")))
        }
    }

    /// Best-effort extraction; no shape checks.
    pub fn extract(&self, profile: &Profile) -> Claims {
        let mut claims = Claims::default();
        for (key, field) in &self.keys {
            let value = profile.attribute_string(key);
            let slot = match field {
                ClaimField::UserId => &mut claims.user_id,
                ClaimField::GivenName => &mut claims.given_name,
                ClaimField::FamilyName => &mut claims.family_name,
                ClaimField::Email => &mut claims.email,
            };
            if slot.is_none() {
                *slot = value;
            }
        }
        claims
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
