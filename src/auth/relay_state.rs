//! RelayState validation.
//!
//! After login or logout the browser is redirected to the RelayState the
//! request carried. Only same-origin absolute paths are accepted.

use serde_json::Value;

use super::request::SamlRequest;
use crate::config::AppBaseUrl;

const RELAY_STATE: &str = "RelayState";

/// The validated redirect target, or `None`.
///
/// The body value takes precedence; the query value is used when the body
/// value is missing or empty. An invalid value is logged and yields `None`;
/// the caller falls back to its default redirect.
pub fn parse_relay_state(req: &SamlRequest, app_base_url: &AppBaseUrl) -> Option<String> {
    let relay_state = match req.body_field(RELAY_STATE) {
        Some(value) if is_present(value) => value.clone(),
        _ => match req.query_param(RELAY_STATE) {
            Some(value) if !value.is_empty() => Value::String(value),
            _ => return None,
        },
    };

    if let Value::String(target) = &relay_state
        && is_allowed(target, app_base_url)
    {
        return Some(target.clone());
    }

    tracing::error!(
        relay_state = %relay_state,
        method = %req.method(),
        path = %req.path(),
        "Invalid RelayState in request"
    );
    None
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::Bool(true) | Value::Array(_) | Value::Object(_) => true,
    }
}

fn is_allowed(target: &str, app_base_url: &AppBaseUrl) -> bool {
    if !target.starts_with('/') {
        return false;
    }
    match app_base_url {
        AppBaseUrl::Local => true,
        AppBaseUrl::Url(base) => base
            .join(target)
            .is_ok_and(|redirect| redirect.origin() == base.origin()),
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, Uri};
    use serde_json::{Map, json};

    use super::*;

    fn base() -> AppBaseUrl {
        AppBaseUrl::parse("https://app.example.fi/").unwrap()
    }

    fn with_body(value: Value) -> SamlRequest {
        let mut body = Map::new();
        body.insert(RELAY_STATE.into(), value);
        SamlRequest::new(Method::POST, Uri::from_static("/api/auth/saml/login/callback"))
            .with_body(body)
    }

    fn with_query(uri: &'static str) -> SamlRequest {
        SamlRequest::new(Method::GET, Uri::from_static(uri))
    }

    #[test]
    fn test_same_origin_path_returned_verbatim() {
        assert_eq!(
            parse_relay_state(&with_body(json!("/case/123")), &base()).as_deref(),
            Some("/case/123")
        );
        assert_eq!(
            parse_relay_state(&with_body(json!("/case/123?tab=2#notes")), &base()).as_deref(),
            Some("/case/123?tab=2#notes")
        );
    }

    #[test]
    fn test_absolute_url_rejected() {
        assert_eq!(
            parse_relay_state(&with_body(json!("https://evil.example/")), &base()),
            None
        );
    }

    #[test]
    fn test_protocol_relative_rejected() {
        assert_eq!(
            parse_relay_state(&with_body(json!("//evil.example/x")), &base()),
            None
        );
        assert_eq!(
            parse_relay_state(&with_body(json!("/\\evil.example/x")), &base()),
            None
        );
    }

    #[test]
    fn test_relative_path_rejected() {
        assert_eq!(parse_relay_state(&with_body(json!("case/123")), &base()), None);
    }

    #[test]
    fn test_local_accepts_any_absolute_path() {
        assert_eq!(
            parse_relay_state(&with_body(json!("//anything")), &AppBaseUrl::Local).as_deref(),
            Some("//anything")
        );
        assert_eq!(
            parse_relay_state(&with_body(json!("https://evil.example/")), &AppBaseUrl::Local),
            None
        );
    }

    #[test]
    fn test_query_fallback() {
        assert_eq!(
            parse_relay_state(&with_query("/slo?RelayState=%2Fhome"), &base()).as_deref(),
            Some("/home")
        );

        let mut body = Map::new();
        body.insert(RELAY_STATE.into(), json!(""));
        let request = SamlRequest::new(Method::POST, Uri::from_static("/cb?RelayState=%2Fhome"))
            .with_body(body);
        assert_eq!(parse_relay_state(&request, &base()).as_deref(), Some("/home"));
    }

    #[test]
    fn test_body_takes_precedence() {
        let mut body = Map::new();
        body.insert(RELAY_STATE.into(), json!("/from-body"));
        let request = SamlRequest::new(Method::POST, Uri::from_static("/cb?RelayState=%2Fq"))
            .with_body(body);
        assert_eq!(
            parse_relay_state(&request, &base()).as_deref(),
            Some("/from-body")
        );
    }

    #[test]
    fn test_non_string_body_value_rejected() {
        assert_eq!(parse_relay_state(&with_body(json!(["/a"])), &base()), None);
        assert_eq!(parse_relay_state(&with_body(json!(5)), &base()), None);
    }

    #[test]
    fn test_absent_is_none() {
        assert_eq!(parse_relay_state(&with_query("/cb"), &base()), None);
        assert_eq!(parse_relay_state(&with_query("/cb?RelayState="), &base()), None);
    }

    #[test]
    fn test_base_url_with_path() {
        let base = AppBaseUrl::parse("https://app.example.fi/oppivelvollisuus/").unwrap();
        assert_eq!(
            parse_relay_state(&with_body(json!("/oppivelvollisuus/case/1")), &base).as_deref(),
            Some("/oppivelvollisuus/case/1")
        );
    }
}
