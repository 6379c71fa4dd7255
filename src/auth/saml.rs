//! SAML protocol configuration.
//!
//! Turns `[ad.saml]` settings into the immutable parameter set handed to the
//! protocol engine. Key material is loaded here and never logged.

use std::time::Duration;

use openssl::pkey::{PKey, Private};

use super::{
    SamlError,
    certificates::{CertificateResolver, IdpCertificates, TrustedCertificates},
};
use crate::config::SamlConfig;

/// Signature digest used for outgoing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Sha256,
}

impl SignatureAlgorithm {
    /// The XML-DSig algorithm URI for the given key.
    pub fn uri(&self, key: &PKey<Private>) -> &'static str {
        match self {
            SignatureAlgorithm::Sha256 if key.ec_key().is_ok() => {
                "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256"
            }
            SignatureAlgorithm::Sha256 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
        }
    }

    pub fn digest(&self) -> openssl::hash::MessageDigest {
        match self {
            SignatureAlgorithm::Sha256 => openssl::hash::MessageDigest::sha256(),
        }
    }
}

/// PEM-encoded private key. `Debug` never prints the key.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKeyPem(String);

impl PrivateKeyPem {
    pub fn new(pem: impl Into<String>) -> Self {
        Self(pem.into())
    }

    /// Parse the key (PKCS#8 or PKCS#1).
    pub fn to_pkey(&self) -> Result<PKey<Private>, SamlError> {
        PKey::private_key_from_pem(self.0.as_bytes()).map_err(|e| {
            SamlError::Configuration(format!(
                "Failed to parse SP private key (expected PEM format): {e}"
            ))
        })
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PrivateKeyPem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("****")
    }
}

/// Protocol parameters for the SAML engine.
#[derive(Debug, Clone)]
pub struct SamlAuthConfig {
    /// SP signing key.
    pub private_key: PrivateKeyPem,
    /// Present only when assertions are to be decrypted.
    pub decryption_private_key: Option<PrivateKeyPem>,
    pub idp_certificates: IdpCertificates,
    pub accepted_clock_skew: Duration,
    pub signature_algorithm: SignatureAlgorithm,
    pub disable_requested_authn_context: bool,
    /// The engine still requires the response or the assertion to be signed
    /// even when both of these are false.
    pub want_assertions_signed: bool,
    pub want_authn_response_signed: bool,
    /// SP entity ID.
    pub issuer: String,
    /// Expected assertion audience.
    pub audience: String,
    pub callback_url: String,
    pub entry_point: String,
    pub logout_url: String,
    pub identifier_format: String,
    pub validate_in_response_to: bool,
    pub pass_request_to_callback: bool,
}

/// Build the protocol configuration.
///
/// Reads the SP private key from disk and resolves the IdP certificates.
/// Metadata-backed certificates are not fetched here.
pub fn build_saml_config(
    config: &SamlConfig,
    trusted: &TrustedCertificates,
    http_client: &reqwest::Client,
) -> Result<SamlAuthConfig, SamlError> {
    let private_key = std::fs::read_to_string(&config.private_cert)
        .map(PrivateKeyPem::new)
        .map_err(|e| {
            tracing::error!(path = %config.private_cert, error = %e, "Failed to read SP private key");
            SamlError::Configuration(format!(
                "Failed to read SP private key '{}': {e}",
                config.private_cert
            ))
        })?;

    let idp_certificates = CertificateResolver::new(trusted, http_client.clone())
        .resolve(&config.public_cert_or_url_for_saml_metadata)?;

    tracing::debug!("Creating SAML config");
    match &idp_certificates {
        IdpCertificates::Fetch(fetcher) => {
            tracing::debug!(url = %fetcher.url(), "Using IdP public cert from metadata")
        }
        IdpCertificates::Static(certificates) => {
            tracing::debug!(count = certificates.len(), "Using static IdP public cert")
        }
    }
    tracing::debug!(
        decrypt_assertions = config.decrypt_assertions,
        callback_url = %config.callback_url,
        issuer = %config.issuer,
        entry_point = %config.entry_point,
        logout_url = %config.logout_url,
        validate_in_response_to = config.validate_in_response_to,
        "Using SAML settings"
    );

    Ok(SamlAuthConfig {
        decryption_private_key: config.decrypt_assertions.then(|| private_key.clone()),
        private_key,
        idp_certificates,
        accepted_clock_skew: Duration::ZERO,
        signature_algorithm: SignatureAlgorithm::Sha256,
        disable_requested_authn_context: true,
        want_assertions_signed: false,
        want_authn_response_signed: false,
        issuer: config.issuer.clone(),
        audience: config.issuer.clone(),
        callback_url: config.callback_url.clone(),
        entry_point: config.entry_point.clone(),
        logout_url: config.logout_url.clone(),
        identifier_format: config.name_id_format().to_string(),
        validate_in_response_to: config.validate_in_response_to,
        pass_request_to_callback: true,
    })
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, io::Write};

    use super::*;
    use crate::{
        auth::test_support::{generate_test_certificate, saml_config},
        config::DEFAULT_NAME_ID_FORMAT,
    };

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_build_saml_config_fixed_parameters() {
        let (cert_pem, key_pem) = generate_test_certificate();
        let key = write_temp(&key_pem);
        let cert = write_temp(&cert_pem);
        let config = saml_config(
            key.path().to_str().unwrap(),
            cert.path().to_str().unwrap(),
        );

        let built =
            build_saml_config(&config, &TrustedCertificates::default(), &reqwest::Client::new())
                .unwrap();

        assert_eq!(built.accepted_clock_skew, Duration::ZERO);
        assert_eq!(built.signature_algorithm, SignatureAlgorithm::Sha256);
        assert!(built.disable_requested_authn_context);
        assert!(!built.want_assertions_signed);
        assert!(!built.want_authn_response_signed);
        assert!(built.pass_request_to_callback);
        assert!(built.validate_in_response_to);
        assert_eq!(built.issuer, "oppivelvollisuus");
        assert_eq!(built.audience, built.issuer);
        assert_eq!(built.identifier_format, DEFAULT_NAME_ID_FORMAT);
        assert_eq!(built.private_key.expose(), key_pem);
        assert!(built.decryption_private_key.is_none());
        assert!(matches!(
            built.idp_certificates,
            IdpCertificates::Static(ref c) if c == &[cert_pem.clone()]
        ));
    }

    #[test]
    fn test_build_saml_config_decryption_key_when_enabled() {
        let (_, key_pem) = generate_test_certificate();
        let key = write_temp(&key_pem);
        let mut config = saml_config(key.path().to_str().unwrap(), "idp");
        config.decrypt_assertions = true;
        config.name_id_format =
            Some("urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress".into());
        let trusted = TrustedCertificates::new(HashMap::from([(
            "idp".to_string(),
            "PEM".to_string(),
        )]));

        let built = build_saml_config(&config, &trusted, &reqwest::Client::new()).unwrap();

        assert_eq!(built.decryption_private_key, Some(built.private_key.clone()));
        assert_eq!(
            built.identifier_format,
            "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress"
        );
    }

    #[test]
    fn test_build_saml_config_metadata_url() {
        let (_, key_pem) = generate_test_certificate();
        let key = write_temp(&key_pem);
        let config = saml_config(
            key.path().to_str().unwrap(),
            "https://login.example.fi/federationmetadata.xml",
        );

        let built =
            build_saml_config(&config, &TrustedCertificates::default(), &reqwest::Client::new())
                .unwrap();
        assert!(matches!(built.idp_certificates, IdpCertificates::Fetch(_)));
    }

    #[test]
    fn test_build_saml_config_missing_private_key() {
        let config = saml_config("/does/not/exist.pem", "https://idp.example.fi/md");
        let err =
            build_saml_config(&config, &TrustedCertificates::default(), &reqwest::Client::new())
                .unwrap_err();
        assert!(matches!(err, SamlError::Configuration(_)));
    }

    #[test]
    fn test_debug_redacts_key_material() {
        let (_, key_pem) = generate_test_certificate();
        let key = write_temp(&key_pem);
        let mut config = saml_config(
            key.path().to_str().unwrap(),
            "https://idp.example.fi/md",
        );
        config.decrypt_assertions = true;

        let built =
            build_saml_config(&config, &TrustedCertificates::default(), &reqwest::Client::new())
                .unwrap();
        let debug = format!("{built:?}");
        assert!(debug.contains("****"));
        assert!(!debug.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_signature_algorithm_uri() {
        let (_, key_pem) = generate_test_certificate();
        let key = PrivateKeyPem::new(key_pem).to_pkey().unwrap();
        assert_eq!(
            SignatureAlgorithm::Sha256.uri(&key),
            "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"
        );
    }

    #[test]
    fn test_invalid_private_key() {
        assert!(matches!(
            PrivateKeyPem::new("not a key").to_pkey(),
            Err(SamlError::Configuration(_))
        ));
    }
}
