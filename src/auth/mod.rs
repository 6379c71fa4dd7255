//! SAML authentication against Azure AD.
//!
//! - [`certificates`] and [`metadata`] resolve the IdP signing certificates
//! - [`saml`] builds the protocol configuration
//! - [`SamlServiceProvider`] produces redirects and validates IdP messages
//! - [`verifier`] links validated profiles to application users and sessions
//! - [`relay_state`] validates post-login redirect targets

pub mod certificates;
mod engine;
mod error;
pub mod metadata;
pub mod profile;
pub mod relay_state;
pub mod request;
pub mod saml;
pub mod session_store;
#[cfg(test)]
mod test_support;
pub mod verifier;

pub use certificates::{CertificateResolver, IdpCertificates, TrustedCertificates};
pub use engine::{LoginRedirect, SamlServiceProvider};
pub use error::SamlError;
pub use metadata::{MetadataCertFetcher, extract_signing_certificates, metadata_http_client};
pub use profile::{ClaimField, ClaimMapping, Profile, ProfileId};
pub use relay_state::parse_relay_state;
pub use request::SamlRequest;
pub use saml::{SamlAuthConfig, build_saml_config};
pub use session_store::{
    AppSessionUser, LogoutToken, MemorySessionStore, SessionStore, SharedSessionStore,
    create_session_store,
};
pub use verifier::AdSamlVerifier;
