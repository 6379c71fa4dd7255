//! SAML single sign-on glue for the compulsory-education case-management API
//! gateway.

pub mod auth;
pub mod clients;
pub mod config;
pub mod observability;
