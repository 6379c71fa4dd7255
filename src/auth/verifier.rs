//! Login and logout verification for Azure AD SAML.
//!
//! The protocol engine validates signatures and hands the resulting profile
//! here. Login links the profile to an internal user; logout checks that the
//! IdP session being terminated is the one the request belongs to.

use std::sync::Arc;

use super::{
    SamlError,
    profile::{ClaimMapping, Profile},
    request::SamlRequest,
    session_store::{AppSessionUser, LogoutToken, SharedSessionStore},
};
use crate::{
    clients::{UserDirectory, UserLoginRequest},
    config::AdConfig,
};

pub struct AdSamlVerifier {
    claims: ClaimMapping,
    external_id_prefix: String,
    directory: Arc<dyn UserDirectory>,
    sessions: SharedSessionStore,
}

impl AdSamlVerifier {
    pub fn new(
        config: &AdConfig,
        directory: Arc<dyn UserDirectory>,
        sessions: SharedSessionStore,
    ) -> Self {
        Self {
            claims: ClaimMapping::from_config(config),
            external_id_prefix: config.external_id_prefix.clone(),
            directory,
            sessions,
        }
    }

    /// Resolve the internal user for a validated login profile.
    ///
    /// A profile with an unexpected attribute shape is logged and login is
    /// still attempted with whatever fields are present. Only a missing user
    /// id aborts the login.
    pub async fn login_verify(
        &self,
        _req: &SamlRequest,
        profile: Option<&Profile>,
    ) -> Result<Option<AppSessionUser>, SamlError> {
        let Some(profile) = profile else {
            return Ok(None);
        };

        if let Err(e) = self.claims.validate(profile) {
            tracing::warn!(issuer = %profile.issuer, error = %e, "SAML profile parsing failed");
        }

        let claims = self.claims.extract(profile);
        let user_id = claims
            .user_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SamlError::Auth("No user ID in SAML data".into()))?;

        let person = self
            .directory
            .user_login(UserLoginRequest {
                external_id: format!("{}:{}", self.external_id_prefix, user_id),
                first_name: claims.given_name.unwrap_or_default(),
                last_name: claims.family_name.unwrap_or_default(),
                email: claims.email,
            })
            .await?;

        tracing::debug!(user_id = %person.id, issuer = %profile.issuer, "SAML login verified");

        Ok(Some(AppSessionUser {
            id: person.id,
            issuer: Some(profile.issuer.clone()),
            name_id: profile.name_id.clone(),
            name_id_format: profile.name_id_format.clone(),
            name_qualifier: profile.name_qualifier.clone(),
            sp_name_qualifier: profile.sp_name_qualifier.clone(),
            session_index: profile.session_index.clone(),
        }))
    }

    /// Authorize a logout for the user the request belongs to.
    ///
    /// When the request has no user (e.g. third-party cookies were blocked
    /// during IdP-initiated logout), the session created at login is looked up
    /// by its logout token and attached to this request only.
    pub async fn logout_verify(
        &self,
        req: &mut SamlRequest,
        profile: Option<&Profile>,
    ) -> Result<Option<AppSessionUser>, SamlError> {
        let Some(profile_id) = profile.and_then(Profile::id) else {
            return Ok(None);
        };

        if req.user().is_none() {
            let token =
                LogoutToken::new(&profile_id.name_id, profile_id.session_index.as_deref());
            if let Some(stored) = self.sessions.lookup_by_logout_token(&token).await? {
                tracing::debug!(session_id = %stored.id, "Recovered session for SAML logout");
                req.login_scoped(stored.user);
            }
        }

        Ok(req
            .user()
            .filter(|user| user.profile_id().as_ref() == Some(&profile_id))
            .cloned())
    }
}
