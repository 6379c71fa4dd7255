//! Signing certificate extraction from SAML federation metadata.

use quick_xml::{events::Event, reader::Reader};

use super::SamlError;

const ROOT: &str = "EntityDescriptor";
const CERTIFICATE_PATH: [&str; 4] = ["KeyDescriptor", "KeyInfo", "X509Data", "X509Certificate"];

/// Extract every certificate under
/// `EntityDescriptor/{IDPSSODescriptor,SPSSODescriptor}/KeyDescriptor/KeyInfo/X509Data/X509Certificate`.
///
/// Namespace prefixes are ignored. Certificates are returned with all
/// whitespace removed, in document order, without de-duplication. Repeated
/// elements at any level are visited in order, so single and repeated
/// occurrences yield the same flattened list. Metadata without any
/// certificate yields an empty list.
pub fn extract_signing_certificates(xml: &str) -> Result<Vec<String>, SamlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut seen_root = false;
    // An attribute-less root without children or text counts as missing.
    let mut root_has_content = false;
    let mut current: Option<String> = None;
    let mut certificates = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let local = String::from_utf8_lossy(e.local_name().into_inner()).to_string();
                check_root(&mut seen_root, &local)?;
                if path.is_empty() {
                    root_has_content |= e.attributes().next().is_some();
                } else {
                    root_has_content = true;
                }
                path.push(local);
                if is_certificate_path(&path) {
                    current = Some(String::new());
                }
            }
            Ok(Event::Empty(ref e)) => {
                let local = String::from_utf8_lossy(e.local_name().into_inner()).to_string();
                check_root(&mut seen_root, &local)?;
                if path.is_empty() {
                    root_has_content |= e.attributes().next().is_some();
                } else {
                    root_has_content = true;
                }
            }
            Ok(Event::Text(ref e)) => {
                if !path.is_empty() {
                    root_has_content = true;
                }
                if let Some(buf) = current.as_mut() {
                    let text = e
                        .unescape()
                        .map_err(|e| SamlError::MetadataFetch(format!("Invalid metadata XML: {e}")))?;
                    buf.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(buf) = current.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                if is_certificate_path(&path)
                    && let Some(buf) = current.take()
                {
                    let cert: String = buf.chars().filter(|c| !c.is_whitespace()).collect();
                    if !cert.is_empty() {
                        certificates.push(cert);
                    }
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SamlError::MetadataFetch(format!(
                    "Invalid metadata XML at position {}: {e}",
                    reader.error_position()
                )));
            }
            _ => {}
        }
    }

    if !seen_root || !root_has_content {
        return Err(missing_root());
    }
    if !path.is_empty() {
        return Err(SamlError::MetadataFetch(
            "Invalid metadata XML: unexpected end of document".into(),
        ));
    }

    Ok(certificates)
}

fn check_root(seen_root: &mut bool, local: &str) -> Result<(), SamlError> {
    if !*seen_root {
        if local != ROOT {
            return Err(missing_root());
        }
        *seen_root = true;
    }
    Ok(())
}

fn missing_root() -> SamlError {
    SamlError::MetadataFetch("Invalid SAML metadata: Missing EntityDescriptor element".into())
}

fn is_certificate_path(path: &[String]) -> bool {
    path.len() == 2 + CERTIFICATE_PATH.len()
        && path[0] == ROOT
        && matches!(path[1].as_str(), "IDPSSODescriptor" | "SPSSODescriptor")
        && path[2..].iter().zip(CERTIFICATE_PATH).all(|(a, b)| a == b)
}

/// Fetches signing certificates from a federation metadata URL.
///
/// Every call performs one GET. Concurrent calls are neither coalesced nor
/// cached; the metadata document is small and the IdP may rotate at any time.
#[derive(Clone)]
pub struct MetadataCertFetcher {
    url: String,
    http_client: reqwest::Client,
}

impl MetadataCertFetcher {
    /// The client should carry a request timeout; see [`metadata_http_client`].
    pub fn new(url: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            http_client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> Result<Vec<String>, SamlError> {
        tracing::debug!(url = %self.url, "Fetching IdP certificates from metadata");

        let response = self.http_client.get(&self.url).send().await.map_err(|e| {
            tracing::error!(error = %e, url = %self.url, "Failed to fetch SAML metadata");
            SamlError::MetadataFetch(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(status = %status, url = %self.url, "SAML metadata endpoint returned error");
            return Err(SamlError::MetadataFetch(format!(
                "metadata endpoint returned {status}"
            )));
        }

        let xml = response.text().await.map_err(|e| {
            tracing::error!(error = %e, url = %self.url, "Failed to read SAML metadata response");
            SamlError::MetadataFetch(e.to_string())
        })?;

        let certificates = extract_signing_certificates(&xml).inspect_err(|e| {
            tracing::error!(error = %e, url = %self.url, "Failed to parse SAML metadata");
        })?;

        tracing::debug!(
            count = certificates.len(),
            url = %self.url,
            "Got certificates from metadata"
        );
        Ok(certificates)
    }

    /// Fetch and hand the outcome to a completion callback.
    pub async fn fetch_with<F>(&self, done: F)
    where
        F: FnOnce(Result<Vec<String>, SamlError>),
    {
        done(self.fetch().await)
    }
}

impl std::fmt::Debug for MetadataCertFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCertFetcher")
            .field("url", &self.url)
            .finish()
    }
}

/// HTTP client for metadata requests with an explicit request timeout.
pub fn metadata_http_client(timeout_secs: u64) -> Result<reqwest::Client, SamlError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| SamlError::Configuration(format!("Failed to build HTTP client: {e}")))
}
