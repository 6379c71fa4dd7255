//! IdP certificate resolution.
//!
//! A configured reference is a trusted certificate name, a PEM file path, or a
//! federation metadata URL. References are resolved once at startup; metadata
//! URLs resolve to a [`MetadataCertFetcher`] that is invoked on demand so that
//! certificate rotation at the IdP needs no redeploy.

use std::collections::HashMap;

use super::{SamlError, metadata::MetadataCertFetcher};
use crate::config::{CertReferences, SamlConfig};

const METADATA_URL_SCHEME: &str = "https://";

/// Named PEM certificates that configuration may refer to by name.
#[derive(Clone, Default)]
pub struct TrustedCertificates {
    certificates: HashMap<String, String>,
}

impl TrustedCertificates {
    pub fn new(certificates: HashMap<String, String>) -> Self {
        Self { certificates }
    }

    pub fn from_config(config: &SamlConfig) -> Self {
        Self::new(config.trusted_certificates.clone())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.certificates.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.certificates.contains_key(name)
    }
}

impl std::fmt::Debug for TrustedCertificates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.certificates.keys()).finish()
    }
}

/// A single classified certificate reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateReference<'a> {
    Trusted(&'a str),
    File(&'a str),
    MetadataUrl(&'a str),
}

impl<'a> CertificateReference<'a> {
    /// Trusted names take precedence over everything else.
    pub fn classify(reference: &'a str, trusted: &TrustedCertificates) -> Self {
        if trusted.contains(reference) {
            CertificateReference::Trusted(reference)
        } else if reference.starts_with(METADATA_URL_SCHEME) {
            CertificateReference::MetadataUrl(reference)
        } else {
            CertificateReference::File(reference)
        }
    }
}

/// Certificates used to verify IdP signatures.
///
/// Exactly one of the two forms is ever produced for a configured reference.
#[derive(Debug, Clone)]
pub enum IdpCertificates {
    /// PEM certificates fixed at startup.
    Static(Vec<String>),
    /// Certificates fetched from federation metadata on each verification.
    Fetch(MetadataCertFetcher),
}

impl IdpCertificates {
    /// The current certificate set, fetching from metadata when URL-backed.
    pub async fn current(&self) -> Result<Vec<String>, SamlError> {
        match self {
            IdpCertificates::Static(certificates) => Ok(certificates.clone()),
            IdpCertificates::Fetch(fetcher) => fetcher.fetch().await,
        }
    }
}

/// Resolves configured certificate references.
pub struct CertificateResolver<'a> {
    trusted: &'a TrustedCertificates,
    http_client: reqwest::Client,
}

impl<'a> CertificateResolver<'a> {
    pub fn new(trusted: &'a TrustedCertificates, http_client: reqwest::Client) -> Self {
        Self {
            trusted,
            http_client,
        }
    }

    /// Resolve a single reference to its text: PEM data or a metadata URL.
    ///
    /// A trusted entry or file may itself contain a metadata URL.
    pub fn lookup(&self, reference: &str) -> Result<String, SamlError> {
        match CertificateReference::classify(reference, self.trusted) {
            CertificateReference::Trusted(name) => Ok(self
                .trusted
                .get(name)
                .map(str::to_string)
                .unwrap_or_default()),
            CertificateReference::MetadataUrl(url) => Ok(url.to_string()),
            CertificateReference::File(path) => std::fs::read_to_string(path).map_err(|e| {
                tracing::error!(path = %path, error = %e, "Failed to read IdP certificate file");
                SamlError::Configuration(format!(
                    "Failed to read IdP certificate file '{path}': {e}"
                ))
            }),
        }
    }

    /// Resolve the configured references.
    ///
    /// Only the first entry decides whether the set is a metadata URL; the
    /// remaining entries are then ignored. Otherwise every entry is resolved
    /// in order.
    pub fn resolve(&self, references: &CertReferences) -> Result<IdpCertificates, SamlError> {
        let first = references.first().ok_or_else(|| {
            SamlError::Configuration("No IdP certificate reference configured".into())
        })?;
        let first = self.lookup(first)?;

        if first.starts_with(METADATA_URL_SCHEME) {
            tracing::debug!(url = %first, "Using IdP certificates from federation metadata");
            return Ok(IdpCertificates::Fetch(MetadataCertFetcher::new(
                first,
                self.http_client.clone(),
            )));
        }

        let mut certificates = Vec::with_capacity(references.len());
        certificates.push(first);
        for reference in references.iter().skip(1) {
            certificates.push(self.lookup(reference)?);
        }

        tracing::debug!(count = certificates.len(), "Using static IdP certificates");
        Ok(IdpCertificates::Static(certificates))
    }
}
