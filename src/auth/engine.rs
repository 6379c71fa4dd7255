//! SAML protocol engine adapter.
//!
//! Wraps samael for AuthnRequest generation and response validation, and
//! implements the HTTP-Redirect binding for Single Logout: DEFLATE encoding,
//! query signing with the SP key, and signature verification of incoming
//! LogoutRequests against the IdP certificates.

use std::io::{Read, Write};

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::Utc;
use flate2::{Compression, read::DeflateDecoder, write::DeflateEncoder};
use openssl::{hash::MessageDigest, sign::Verifier, x509::X509};
use quick_xml::{events::Event, reader::Reader};
use samael::{
    metadata::EntityDescriptor,
    service_provider::{ServiceProvider, ServiceProviderBuilder},
};
use serde_json::Value;
use uuid::Uuid;

use super::{SamlError, profile::Profile, saml::SamlAuthConfig, session_store::AppSessionUser};

/// Upper bound for an inflated LogoutRequest.
const MAX_LOGOUT_REQUEST_BYTES: u64 = 256 * 1024;

/// An AuthnRequest redirect and the request ID to expect in the response.
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    pub url: String,
    pub request_id: String,
}

/// SAML service provider for one IdP.
pub struct SamlServiceProvider {
    config: SamlAuthConfig,
    sp_certificate: Option<String>,
}

impl SamlServiceProvider {
    pub fn new(config: SamlAuthConfig) -> Self {
        if !cfg!(feature = "xmlsec") {
            tracing::error!(
                "Built without the 'xmlsec' feature: SAML login responses will be rejected"
            );
        }
        Self {
            config,
            sp_certificate: None,
        }
    }

    /// SP certificate (PEM) advertised in SP metadata.
    pub fn with_sp_certificate(mut self, pem: impl Into<String>) -> Self {
        self.sp_certificate = Some(pem.into());
        self
    }

    pub fn config(&self) -> &SamlAuthConfig {
        &self.config
    }

    /// Build a signed AuthnRequest redirect to the IdP.
    pub fn login_redirect(&self, relay_state: &str) -> Result<LoginRedirect, SamlError> {
        let sp = ServiceProviderBuilder::default()
            .entity_id(self.config.issuer.clone())
            .acs_url(self.config.callback_url.clone())
            .idp_metadata(self.idp_metadata(&[])?)
            .authn_name_id_format(self.config.identifier_format.clone())
            .force_authn(false)
            .build()
            .map_err(|e| SamlError::Protocol(format!("Failed to build ServiceProvider: {e}")))?;

        let mut authn_request = sp
            .make_authentication_request(&self.config.entry_point)
            .map_err(|e| SamlError::Protocol(format!("Failed to create AuthnRequest: {e}")))?;
        if self.config.disable_requested_authn_context {
            authn_request.requested_authn_context = None;
        }
        let request_id = authn_request.id.clone();

        let private_key = self.config.private_key.to_pkey()?;
        let url = authn_request
            .signed_redirect(relay_state, private_key)
            .map_err(|e| SamlError::Protocol(format!("Failed to sign AuthnRequest: {e}")))?
            .ok_or_else(|| SamlError::Protocol("AuthnRequest has no destination".into()))?;

        tracing::debug!(request_id = %request_id, "Generated SAML AuthnRequest");
        Ok(LoginRedirect {
            url: url.to_string(),
            request_id,
        })
    }

    /// Validate a base64 SAML Response and extract the profile.
    ///
    /// `request_ids` are the AuthnRequest IDs issued to this browser; they are
    /// only enforced when InResponseTo validation is enabled.
    pub async fn validate_login_response(
        &self,
        saml_response_b64: &str,
        request_ids: &[&str],
    ) -> Result<Profile, SamlError> {
        require_signature_verification()?;

        let certificates = self.config.idp_certificates.current().await?;
        let sp = self.response_service_provider(&certificates)?;

        let possible_request_ids = self.config.validate_in_response_to.then_some(request_ids);
        let assertion = sp
            .parse_base64_response(saml_response_b64, possible_request_ids)
            .map_err(|e| {
                tracing::error!(error = %e, "SAML response validation failed");
                SamlError::Protocol(format!("SAML response validation failed: {e}"))
            })?;

        Ok(profile_from_assertion(&assertion))
    }

    /// Service provider used to validate responses against `certificates`.
    ///
    /// Carries the decryption key when assertions are to be decrypted.
    fn response_service_provider(
        &self,
        certificates: &[String],
    ) -> Result<ServiceProvider, SamlError> {
        let max_clock_skew = chrono::Duration::from_std(self.config.accepted_clock_skew)
            .map_err(|e| SamlError::Configuration(format!("Invalid clock skew: {e}")))?;

        let mut builder = ServiceProviderBuilder::default();
        builder
            .entity_id(self.config.audience.clone())
            .acs_url(self.config.callback_url.clone())
            .idp_metadata(self.idp_metadata(certificates)?)
            .allow_idp_initiated(!self.config.validate_in_response_to)
            .max_clock_skew(max_clock_skew);
        if let Some(key) = &self.config.decryption_private_key {
            builder.key(key.to_pkey()?);
        }

        builder
            .build()
            .map_err(|e| SamlError::Protocol(format!("Failed to build ServiceProvider: {e}")))
    }

    /// Verify and decode an IdP-initiated LogoutRequest (HTTP-Redirect binding).
    ///
    /// `query` is the raw, still percent-encoded query string. The request must
    /// be signed by one of the current IdP certificates.
    pub async fn parse_logout_request(&self, query: &str) -> Result<Profile, SamlError> {
        let saml_request = raw_param(query, "SAMLRequest")
            .ok_or_else(|| SamlError::Protocol("Missing SAMLRequest".into()))?;
        let sig_alg = raw_param(query, "SigAlg")
            .ok_or_else(|| SamlError::Protocol("LogoutRequest is not signed".into()))?;
        let signature = raw_param(query, "Signature")
            .ok_or_else(|| SamlError::Protocol("LogoutRequest is not signed".into()))?;

        let mut signed = format!("SAMLRequest={saml_request}");
        if let Some(relay_state) = raw_param(query, "RelayState") {
            signed.push_str(&format!("&RelayState={relay_state}"));
        }
        signed.push_str(&format!("&SigAlg={sig_alg}"));

        let certificates = self.config.idp_certificates.current().await?;
        verify_redirect_signature(
            &signed,
            &percent_decode(sig_alg),
            &percent_decode(signature),
            &certificates,
        )?;

        let xml = inflate(&percent_decode(saml_request))?;
        parse_logout_request_xml(&xml)
    }

    /// Build a signed LogoutRequest redirect for the user's IdP session.
    pub fn logout_redirect(
        &self,
        user: &AppSessionUser,
        relay_state: &str,
    ) -> Result<String, SamlError> {
        use samael::{
            schema::{Issuer, LogoutRequest, NameID},
            traits::ToXml,
        };

        let name_id = user
            .name_id
            .clone()
            .ok_or_else(|| SamlError::Protocol("Session has no SAML NameID".into()))?;

        let logout_request = LogoutRequest {
            id: Some(format!("_logout_{}", Uuid::new_v4())),
            version: Some("2.0".to_string()),
            issue_instant: Some(Utc::now()),
            destination: Some(self.config.logout_url.clone()),
            issuer: Some(Issuer {
                value: Some(self.config.issuer.clone()),
                ..Default::default()
            }),
            name_id: Some(NameID {
                value: name_id,
                format: Some(
                    user.name_id_format
                        .clone()
                        .unwrap_or_else(|| self.config.identifier_format.clone()),
                ),
            }),
            session_index: user.session_index.clone(),
            signature: None,
        };

        let xml = logout_request
            .to_string()
            .map_err(|e| SamlError::Protocol(format!("Failed to serialize LogoutRequest: {e:?}")))?;

        let mut compressed = vec![];
        {
            let mut encoder = DeflateEncoder::new(&mut compressed, Compression::default());
            encoder.write_all(xml.as_bytes()).map_err(|e| {
                SamlError::Protocol(format!("Failed to compress LogoutRequest: {e}"))
            })?;
        }

        let mut url = url::Url::parse(&self.config.logout_url)
            .map_err(|e| SamlError::Configuration(format!("Invalid logout URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("SAMLRequest", &STANDARD.encode(&compressed));
        if !relay_state.is_empty() {
            url.query_pairs_mut().append_pair("RelayState", relay_state);
        }

        let url = self.sign_redirect_url(url)?;
        tracing::debug!(logout_url = %self.config.logout_url, "Generated SAML LogoutRequest URL");
        Ok(url.to_string())
    }

    /// Append `SigAlg` and `Signature` per the HTTP-Redirect binding.
    fn sign_redirect_url(&self, mut url: url::Url) -> Result<url::Url, SamlError> {
        use openssl::sign::Signer;

        let private_key = self.config.private_key.to_pkey()?;
        let algorithm = self.config.signature_algorithm;
        url.query_pairs_mut()
            .append_pair("SigAlg", algorithm.uri(&private_key));

        let query = url
            .query()
            .ok_or_else(|| SamlError::Protocol("No query string to sign".into()))?;
        let mut signer = Signer::new(algorithm.digest(), &private_key)
            .map_err(|e| SamlError::Protocol(format!("Failed to create signer: {e}")))?;
        signer
            .update(query.as_bytes())
            .map_err(|e| SamlError::Protocol(format!("Failed to update signer: {e}")))?;
        let signature = signer
            .sign_to_vec()
            .map_err(|e| SamlError::Protocol(format!("Failed to sign: {e}")))?;

        url.query_pairs_mut()
            .append_pair("Signature", &STANDARD.encode(&signature));
        Ok(url)
    }

    /// SP metadata for registering the gateway at the IdP.
    pub fn sp_metadata(&self) -> String {
        let mut xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{}">
  <md:SPSSODescriptor AuthnRequestsSigned="true" WantAssertionsSigned="{}" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">"#,
            self.config.issuer, self.config.want_assertions_signed
        );

        if let Some(sp_cert) = &self.sp_certificate {
            xml.push_str(&format!(
                r#"
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data>
          <ds:X509Certificate>{}</ds:X509Certificate>
        </ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>"#,
                strip_pem_headers(sp_cert)
            ));
        }

        xml.push_str(&format!(
            r#"
    <md:NameIDFormat>{}</md:NameIDFormat>
    <md:AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="{}" index="0"/>
  </md:SPSSODescriptor>
</md:EntityDescriptor>"#,
            self.config.identifier_format, self.config.callback_url
        ));

        xml
    }

    /// IdP metadata for samael built from configuration.
    ///
    /// No entityID is set, so the assertion issuer is not pinned.
    fn idp_metadata(&self, certificates: &[String]) -> Result<EntityDescriptor, SamlError> {
        let key_descriptors: String = certificates
            .iter()
            .map(|cert| {
                format!(
                    r#"
        <md:KeyDescriptor use="signing">
            <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
                <ds:X509Data>
                    <ds:X509Certificate>{}</ds:X509Certificate>
                </ds:X509Data>
            </ds:KeyInfo>
        </md:KeyDescriptor>"#,
                    strip_pem_headers(cert)
                )
            })
            .collect();

        let xml = format!(
            r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata">
    <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">{}
        <md:SingleLogoutService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="{}"/>
        <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="{}"/>
    </md:IDPSSODescriptor>
</md:EntityDescriptor>"#,
            key_descriptors, self.config.logout_url, self.config.entry_point
        );

        samael::metadata::de::from_str(&xml).map_err(|e| {
            tracing::error!(error = %e, "Failed to build IdP metadata from config");
            SamlError::Configuration(format!("Failed to build IdP metadata: {e}"))
        })
    }
}

/// Response signatures are verified by samael's xmlsec backend. Without it
/// no response can be trusted, so validation fails closed.
fn require_signature_verification() -> Result<(), SamlError> {
    if cfg!(feature = "xmlsec") {
        Ok(())
    } else {
        Err(SamlError::Protocol(
            "SAML response signature verification is unavailable (built without xmlsec)".into(),
        ))
    }
}

fn profile_from_assertion(assertion: &samael::schema::Assertion) -> Profile {
    let name_id = assertion
        .subject
        .as_ref()
        .and_then(|s| s.name_id.as_ref());

    let mut attributes = std::collections::HashMap::new();
    for statement in assertion.attribute_statements.iter().flatten() {
        for attr in &statement.attributes {
            let Some(key) = attr.name.clone().or_else(|| attr.friendly_name.clone()) else {
                continue;
            };
            let mut values: Vec<Value> = attr
                .values
                .iter()
                .filter_map(|v| v.value.clone().map(Value::String))
                .collect();
            let value = match values.len() {
                0 => continue,
                1 => values.remove(0),
                _ => Value::Array(values),
            };
            attributes.insert(key, value);
        }
    }

    Profile {
        issuer: assertion.issuer.value.clone().unwrap_or_default(),
        name_id: name_id.map(|n| n.value.clone()),
        name_id_format: name_id.and_then(|n| n.format.clone()),
        name_qualifier: None,
        sp_name_qualifier: None,
        session_index: assertion
            .authn_statements
            .as_ref()
            .and_then(|stmts| stmts.first())
            .and_then(|stmt| stmt.session_index.clone()),
        attributes,
    }
}

/// Raw (still percent-encoded) value of a query parameter.
fn raw_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        pair.strip_prefix(name)
            .and_then(|rest| rest.strip_prefix('='))
    })
}

fn percent_decode(raw: &str) -> String {
    url::form_urlencoded::parse(format!("v={raw}").as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default()
}

fn strip_pem_headers(pem: &str) -> String {
    pem.lines()
        .filter(|line| !line.starts_with("-----BEGIN") && !line.starts_with("-----END"))
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("")
}

/// Parse a PEM certificate or bare base64 DER as found in metadata.
fn parse_certificate(text: &str) -> Result<X509, SamlError> {
    if text.contains("-----BEGIN") {
        return X509::from_pem(text.as_bytes())
            .map_err(|e| SamlError::Configuration(format!("Invalid IdP certificate: {e}")));
    }
    let der = STANDARD
        .decode(strip_pem_headers(text))
        .map_err(|e| SamlError::Configuration(format!("Invalid IdP certificate: {e}")))?;
    X509::from_der(&der).map_err(|e| SamlError::Configuration(format!("Invalid IdP certificate: {e}")))
}

fn digest_for(sig_alg: &str) -> Result<MessageDigest, SamlError> {
    match sig_alg {
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"
        | "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256" => Ok(MessageDigest::sha256()),
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512" => Ok(MessageDigest::sha512()),
        "http://www.w3.org/2000/09/xmldsig#rsa-sha1" => Ok(MessageDigest::sha1()),
        other => Err(SamlError::Protocol(format!(
            "Unsupported signature algorithm: {other}"
        ))),
    }
}

/// Verify an HTTP-Redirect binding signature against any of the certificates.
fn verify_redirect_signature(
    signed: &str,
    sig_alg: &str,
    signature_b64: &str,
    certificates: &[String],
) -> Result<(), SamlError> {
    let digest = digest_for(sig_alg)?;
    let signature = STANDARD
        .decode(signature_b64)
        .map_err(|e| SamlError::Protocol(format!("Invalid signature encoding: {e}")))?;

    for cert in certificates {
        let public_key = match parse_certificate(cert).and_then(|x509| {
            x509.public_key()
                .map_err(|e| SamlError::Configuration(format!("Invalid IdP certificate: {e}")))
        }) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unusable IdP certificate");
                continue;
            }
        };

        let verified = Verifier::new(digest, &public_key)
            .and_then(|mut verifier| {
                verifier.update(signed.as_bytes())?;
                verifier.verify(&signature)
            })
            .unwrap_or(false);
        if verified {
            return Ok(());
        }
    }

    tracing::error!(
        certificates = certificates.len(),
        "LogoutRequest signature did not match any IdP certificate"
    );
    Err(SamlError::Protocol("Invalid LogoutRequest signature".into()))
}

fn inflate(encoded: &str) -> Result<String, SamlError> {
    let compressed = STANDARD
        .decode(encoded)
        .map_err(|e| SamlError::Protocol(format!("Base64 decode failed: {e}")))?;
    let mut xml = String::new();
    DeflateDecoder::new(compressed.as_slice())
        .take(MAX_LOGOUT_REQUEST_BYTES)
        .read_to_string(&mut xml)
        .map_err(|e| SamlError::Protocol(format!("Failed to inflate LogoutRequest: {e}")))?;
    Ok(xml)
}

fn parse_logout_request_xml(xml: &str) -> Result<Profile, SamlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut profile = Profile::default();
    let mut seen_root = false;
    let mut current_element = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let local = String::from_utf8_lossy(e.local_name().into_inner()).to_string();
                if !seen_root {
                    if local != "LogoutRequest" {
                        return Err(SamlError::Protocol(format!(
                            "Expected LogoutRequest, got {local}"
                        )));
                    }
                    seen_root = true;
                }
                if local == "NameID" {
                    for attr in e.attributes().flatten() {
                        let value = String::from_utf8_lossy(&attr.value).to_string();
                        match attr.key.local_name().into_inner() {
                            b"Format" => profile.name_id_format = Some(value),
                            b"NameQualifier" => profile.name_qualifier = Some(value),
                            b"SPNameQualifier" => profile.sp_name_qualifier = Some(value),
                            _ => {}
                        }
                    }
                }
                current_element = local;
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| SamlError::Protocol(format!("XML parse error: {e}")))?
                    .to_string();
                match current_element.as_str() {
                    "Issuer" => profile.issuer = text,
                    "NameID" => profile.name_id = Some(text),
                    "SessionIndex" => profile.session_index = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => current_element.clear(),
            Ok(Event::Eof) => break,
            Err(e) => return Err(SamlError::Protocol(format!("XML parse error: {e}"))),
            _ => {}
        }
    }

    if !seen_root {
        return Err(SamlError::Protocol("Empty LogoutRequest".into()));
    }
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use openssl::pkey::PKey;

    use super::*;
    use crate::auth::{
        certificates::IdpCertificates,
        saml::{PrivateKeyPem, SignatureAlgorithm},
        test_support::generate_test_certificate,
    };

    const LOGOUT_REQUEST: &str = r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_lr1" Version="2.0" IssueInstant="2026-10-01T10:00:00Z">
    <saml:Issuer>https://sts.windows.net/tenant/</saml:Issuer>
    <saml:NameID Format="urn:oasis:names:tc:SAML:2.0:nameid-format:transient" SPNameQualifier="oppivelvollisuus">abc</saml:NameID>
    <samlp:SessionIndex>_s1</samlp:SessionIndex>
</samlp:LogoutRequest>"#;

    fn auth_config(key_pem: &str, idp_certificates: Vec<String>) -> SamlAuthConfig {
        SamlAuthConfig {
            private_key: PrivateKeyPem::new(key_pem),
            decryption_private_key: None,
            idp_certificates: IdpCertificates::Static(idp_certificates),
            accepted_clock_skew: Duration::ZERO,
            signature_algorithm: SignatureAlgorithm::Sha256,
            disable_requested_authn_context: true,
            want_assertions_signed: false,
            want_authn_response_signed: false,
            issuer: "oppivelvollisuus".into(),
            audience: "oppivelvollisuus".into(),
            callback_url: "https://app.example.fi/api/auth/saml/login/callback".into(),
            entry_point: "https://idp.example.fi/saml2".into(),
            logout_url: "https://idp.example.fi/saml2/logout".into(),
            identifier_format: "urn:oasis:names:tc:SAML:2.0:nameid-format:transient".into(),
            validate_in_response_to: true,
            pass_request_to_callback: true,
        }
    }

    /// Sign a LogoutRequest the way an IdP would and return the query string.
    fn idp_logout_query(xml: &str, idp_key_pem: &str) -> String {
        let mut compressed = vec![];
        {
            let mut encoder = DeflateEncoder::new(&mut compressed, Compression::default());
            encoder.write_all(xml.as_bytes()).unwrap();
        }
        let mut url = url::Url::parse("https://app.example.fi/slo").unwrap();
        url.query_pairs_mut()
            .append_pair("SAMLRequest", &STANDARD.encode(&compressed))
            .append_pair("RelayState", "/after logout")
            .append_pair("SigAlg", "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256");

        let key = PKey::private_key_from_pem(idp_key_pem.as_bytes()).unwrap();
        let mut signer = openssl::sign::Signer::new(MessageDigest::sha256(), &key).unwrap();
        signer.update(url.query().unwrap().as_bytes()).unwrap();
        let signature = STANDARD.encode(signer.sign_to_vec().unwrap());
        url.query_pairs_mut().append_pair("Signature", &signature);
        url.query().unwrap().to_string()
    }

    #[test]
    fn test_login_redirect_is_signed() {
        let (_, sp_key) = generate_test_certificate();
        let sp = SamlServiceProvider::new(auth_config(&sp_key, vec![]));

        let redirect = sp.login_redirect("/case/123").unwrap();
        assert!(redirect.url.starts_with("https://idp.example.fi/saml2?"));
        assert!(redirect.url.contains("SAMLRequest="));
        assert!(redirect.url.contains("RelayState="));
        assert!(redirect.url.contains("SigAlg="));
        assert!(redirect.url.contains("Signature="));
        assert!(!redirect.request_id.is_empty());
    }

    #[tokio::test]
    async fn test_parse_logout_request_signed_by_idp() {
        let (sp_cert, sp_key) = generate_test_certificate();
        let (idp_cert, idp_key) = generate_test_certificate();
        // The first certificate is stale; rotation keeps old and new listed
        let sp = SamlServiceProvider::new(auth_config(&sp_key, vec![sp_cert, idp_cert]));

        let query = idp_logout_query(LOGOUT_REQUEST, &idp_key);
        let profile = sp.parse_logout_request(&query).await.unwrap();

        assert_eq!(profile.issuer, "https://sts.windows.net/tenant/");
        assert_eq!(profile.name_id.as_deref(), Some("abc"));
        assert_eq!(profile.session_index.as_deref(), Some("_s1"));
        assert_eq!(
            profile.name_id_format.as_deref(),
            Some("urn:oasis:names:tc:SAML:2.0:nameid-format:transient")
        );
        assert_eq!(profile.sp_name_qualifier.as_deref(), Some("oppivelvollisuus"));
    }

    #[tokio::test]
    async fn test_parse_logout_request_metadata_style_certificate() {
        let (_, sp_key) = generate_test_certificate();
        let (idp_cert, idp_key) = generate_test_certificate();
        let sp = SamlServiceProvider::new(auth_config(
            &sp_key,
            vec![strip_pem_headers(&idp_cert)],
        ));

        let query = idp_logout_query(LOGOUT_REQUEST, &idp_key);
        assert!(sp.parse_logout_request(&query).await.is_ok());
    }

    #[tokio::test]
    async fn test_parse_logout_request_wrong_key() {
        let (idp_cert, sp_key) = generate_test_certificate();
        let (_, attacker_key) = generate_test_certificate();
        let sp = SamlServiceProvider::new(auth_config(&sp_key, vec![idp_cert]));

        let query = idp_logout_query(LOGOUT_REQUEST, &attacker_key);
        assert!(matches!(
            sp.parse_logout_request(&query).await,
            Err(SamlError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_parse_logout_request_tampered() {
        let (idp_cert, idp_key) = generate_test_certificate();
        let sp = SamlServiceProvider::new(auth_config(&idp_key, vec![idp_cert]));

        let query = idp_logout_query(LOGOUT_REQUEST, &idp_key)
            .replace("RelayState=%2Fafter", "RelayState=%2Fevil");
        assert!(sp.parse_logout_request(&query).await.is_err());
    }

    #[tokio::test]
    async fn test_parse_logout_request_unsigned() {
        let (idp_cert, idp_key) = generate_test_certificate();
        let sp = SamlServiceProvider::new(auth_config(&idp_key, vec![idp_cert]));

        let query = idp_logout_query(LOGOUT_REQUEST, &idp_key);
        let unsigned: String = query
            .split('&')
            .filter(|p| !p.starts_with("Signature=") && !p.starts_with("SigAlg="))
            .collect::<Vec<_>>()
            .join("&");
        assert!(matches!(
            sp.parse_logout_request(&unsigned).await,
            Err(SamlError::Protocol(ref m)) if m.contains("not signed")
        ));
    }

    #[tokio::test]
    async fn test_logout_redirect_round_trip() {
        let (sp_cert, sp_key) = generate_test_certificate();
        let sp = SamlServiceProvider::new(auth_config(&sp_key, vec![]));
        let user = AppSessionUser {
            name_id: Some("abc".into()),
            session_index: Some("_s1".into()),
            ..AppSessionUser::new(Uuid::new_v4())
        };

        let url = url::Url::parse(&sp.logout_redirect(&user, "/").unwrap()).unwrap();
        assert_eq!(url.path(), "/saml2/logout");

        // The signature verifies against the SP certificate
        let query = url.query().unwrap();
        let (signed, _) = query.split_once("&Signature=").unwrap();
        verify_redirect_signature(
            signed,
            &percent_decode(raw_param(query, "SigAlg").unwrap()),
            &percent_decode(raw_param(query, "Signature").unwrap()),
            &[sp_cert],
        )
        .unwrap();

        let xml = inflate(&percent_decode(raw_param(query, "SAMLRequest").unwrap())).unwrap();
        let profile = parse_logout_request_xml(&xml).unwrap();
        assert_eq!(profile.issuer, "oppivelvollisuus");
        assert_eq!(profile.id(), user.profile_id());
    }

    #[test]
    fn test_logout_redirect_requires_name_id() {
        let (_, sp_key) = generate_test_certificate();
        let sp = SamlServiceProvider::new(auth_config(&sp_key, vec![]));
        assert!(
            sp.logout_redirect(&AppSessionUser::new(Uuid::new_v4()), "/")
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_validate_login_response_rejects_garbage() {
        let (cert, key) = generate_test_certificate();
        let sp = SamlServiceProvider::new(auth_config(&key, vec![cert]));
        assert!(matches!(
            sp.validate_login_response("not-base64!!", &["_req1"]).await,
            Err(SamlError::Protocol(_))
        ));
    }

    const UNSIGNED_RESPONSE: &str = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_resp1" Version="2.0" IssueInstant="2026-10-01T10:00:00Z" Destination="https://app.example.fi/api/auth/saml/login/callback">
    <saml:Issuer>https://sts.windows.net/tenant/</saml:Issuer>
    <samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>
    <saml:Assertion ID="_assert1" Version="2.0" IssueInstant="2026-10-01T10:00:00Z">
        <saml:Issuer>https://sts.windows.net/tenant/</saml:Issuer>
        <saml:Subject>
            <saml:NameID Format="urn:oasis:names:tc:SAML:2.0:nameid-format:transient">attacker</saml:NameID>
            <saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer">
                <saml:SubjectConfirmationData NotOnOrAfter="2099-01-01T00:00:00Z" Recipient="https://app.example.fi/api/auth/saml/login/callback"/>
            </saml:SubjectConfirmation>
        </saml:Subject>
        <saml:Conditions NotBefore="2000-01-01T00:00:00Z" NotOnOrAfter="2099-01-01T00:00:00Z">
            <saml:AudienceRestriction><saml:Audience>oppivelvollisuus</saml:Audience></saml:AudienceRestriction>
        </saml:Conditions>
        <saml:AuthnStatement AuthnInstant="2026-10-01T10:00:00Z" SessionIndex="_s1">
            <saml:AuthnContext><saml:AuthnContextClassRef>urn:oasis:names:tc:SAML:2.0:ac:classes:Password</saml:AuthnContextClassRef></saml:AuthnContext>
        </saml:AuthnStatement>
        <saml:AttributeStatement>
            <saml:Attribute Name="http://schemas.microsoft.com/identity/claims/objectidentifier">
                <saml:AttributeValue>forged-user</saml:AttributeValue>
            </saml:Attribute>
        </saml:AttributeStatement>
    </saml:Assertion>
</samlp:Response>"#;

    #[tokio::test]
    async fn test_validate_login_response_rejects_unsigned_response() {
        let (cert, key) = generate_test_certificate();
        let mut config = auth_config(&key, vec![cert]);
        config.validate_in_response_to = false;
        let sp = SamlServiceProvider::new(config);

        let encoded = STANDARD.encode(UNSIGNED_RESPONSE);
        assert!(matches!(
            sp.validate_login_response(&encoded, &[]).await,
            Err(SamlError::Protocol(_))
        ));
    }

    #[test]
    fn test_signature_verification_requires_xmlsec() {
        assert_eq!(
            require_signature_verification().is_ok(),
            cfg!(feature = "xmlsec")
        );
    }

    #[test]
    fn test_decryption_key_reaches_service_provider() {
        let (cert, key) = generate_test_certificate();

        let sp = SamlServiceProvider::new(auth_config(&key, vec![cert.clone()]));
        assert!(sp.response_service_provider(&[cert.clone()]).unwrap().key.is_none());

        let mut config = auth_config(&key, vec![cert.clone()]);
        config.decryption_private_key = Some(PrivateKeyPem::new(&key));
        let sp = SamlServiceProvider::new(config);
        let built = sp.response_service_provider(&[cert]).unwrap();
        let expected = PKey::private_key_from_pem(key.as_bytes()).unwrap();
        assert!(built.key.unwrap().public_eq(&expected));
    }

    #[test]
    fn test_invalid_decryption_key_is_configuration_error() {
        let (cert, key) = generate_test_certificate();
        let mut config = auth_config(&key, vec![cert.clone()]);
        config.decryption_private_key = Some(PrivateKeyPem::new("not a key"));
        let sp = SamlServiceProvider::new(config);
        assert!(matches!(
            sp.response_service_provider(&[cert]),
            Err(SamlError::Configuration(_))
        ));
    }

    #[test]
    fn test_sp_metadata() {
        let (cert, key) = generate_test_certificate();
        let sp = SamlServiceProvider::new(auth_config(&key, vec![])).with_sp_certificate(&cert);

        let metadata = sp.sp_metadata();
        assert!(metadata.contains(r#"entityID="oppivelvollisuus""#));
        assert!(metadata.contains(
            r#"Location="https://app.example.fi/api/auth/saml/login/callback""#
        ));
        assert!(metadata.contains(
            "<md:NameIDFormat>urn:oasis:names:tc:SAML:2.0:nameid-format:transient</md:NameIDFormat>"
        ));
        assert!(metadata.contains("<ds:X509Certificate>"));
        assert!(!metadata.contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn test_parse_logout_request_xml_wrong_root() {
        assert!(parse_logout_request_xml("<AuthnRequest/>").is_err());
    }

    #[test]
    fn test_raw_param() {
        let query = "SAMLRequest=a%2Bb&RelayState=%2F&SigAlg=x";
        assert_eq!(raw_param(query, "SAMLRequest"), Some("a%2Bb"));
        assert_eq!(percent_decode("a%2Bb"), "a+b");
        assert_eq!(raw_param(query, "Signature"), None);
    }
}
