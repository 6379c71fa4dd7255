//! Shared fixtures for auth tests.

use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    hash::MessageDigest,
    pkey::PKey,
    rsa::Rsa,
    x509::{X509Builder, X509NameBuilder},
};

/// Generate a self-signed X.509 certificate and private key.
///
/// Returns (certificate_pem, private_key_pem).
pub fn generate_test_certificate() -> (String, String) {
    let rsa = Rsa::generate(2048).unwrap();
    let private_key = PKey::from_rsa(rsa).unwrap();

    let mut x509_name = X509NameBuilder::new().unwrap();
    x509_name
        .append_entry_by_text("CN", "idp.example.fi")
        .unwrap();
    let x509_name = x509_name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial_number = BigNum::from_u32(1).unwrap();
    builder
        .set_serial_number(&serial_number.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&x509_name).unwrap();
    builder.set_issuer_name(&x509_name).unwrap();
    builder.set_pubkey(&private_key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();
    builder.sign(&private_key, MessageDigest::sha256()).unwrap();

    let cert = builder.build();
    let cert_pem = String::from_utf8(cert.to_pem().unwrap()).unwrap();
    let key_pem = String::from_utf8(private_key.private_key_to_pem_pkcs8().unwrap()).unwrap();

    (cert_pem, key_pem)
}

/// A `SamlConfig` pointing at the given key file and certificate reference.
pub fn saml_config(private_cert: &str, reference: &str) -> crate::config::SamlConfig {
    crate::config::SamlConfig {
        private_cert: private_cert.to_string(),
        public_cert_or_url_for_saml_metadata: reference.into(),
        decrypt_assertions: false,
        callback_url: "https://oppivelvollisuus.example.fi/api/auth/saml/login/callback".into(),
        issuer: "oppivelvollisuus".into(),
        entry_point: "https://idp.example.fi/saml2".into(),
        logout_url: "https://idp.example.fi/saml2/logout".into(),
        name_id_format: None,
        validate_in_response_to: true,
        trusted_certificates: Default::default(),
        metadata_timeout_secs: 10,
    }
}
