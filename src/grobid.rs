//! HTTP client for the GROBID document-structure service.
//!
//! Only two endpoints are used:
//!
//! - `GET  /api/isalive`                  → `true` when the service is up
//! - `POST /api/processFulltextDocument`  → TEI-XML for one PDF
//!
//! Any failure here is fatal for the one document being processed.

use crate::config::GrobidConfig;
use crate::error::Tei2MdError;
use reqwest::multipart::{Form, Part};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const FULLTEXT_ENDPOINT: &str = "/api/processFulltextDocument";
const ISALIVE_ENDPOINT: &str = "/api/isalive";
const MAX_ERROR_BODY: usize = 500;

/// A configured GROBID client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct GrobidClient {
    http: reqwest::Client,
    config: GrobidConfig,
}

impl GrobidClient {
    pub fn new(config: &GrobidConfig) -> Result<Self, Tei2MdError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Tei2MdError::GrobidUnavailable {
                url: config.server_url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.config.server_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.server_url.trim_end_matches('/'), path)
    }

    /// True when the service answers its liveness check.
    pub async fn is_alive(&self) -> bool {
        let url = self.endpoint(ISALIVE_ENDPOINT);
        match self.http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let body = resp.text().await.unwrap_or_default();
                debug!("GROBID isalive: {}", body.trim());
                body.trim() != "false"
            }
            Ok(resp) => {
                debug!("GROBID isalive returned HTTP {}", resp.status());
                false
            }
            Err(e) => {
                debug!("GROBID isalive failed: {}", e);
                false
            }
        }
    }

    /// Fail with [`Tei2MdError::GrobidUnavailable`] unless the service is up.
    pub async fn ensure_alive(&self) -> Result<(), Tei2MdError> {
        if self.is_alive().await {
            Ok(())
        } else {
            Err(Tei2MdError::GrobidUnavailable {
                url: self.config.server_url.clone(),
                reason: "liveness check failed".to_string(),
            })
        }
    }

    /// Convert one PDF to TEI-XML.
    pub async fn process_fulltext(&self, pdf_path: &Path) -> Result<String, Tei2MdError> {
        let bytes = tokio::fs::read(pdf_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Tei2MdError::FileNotFound {
                    path: pdf_path.to_path_buf(),
                }
            } else {
                Tei2MdError::ReadFailed {
                    path: pdf_path.to_path_buf(),
                    source: e,
                }
            }
        })?;
        let file_name = pdf_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());

        info!("Sending {} ({} bytes) to GROBID", file_name, bytes.len());

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/pdf")
            .map_err(|e| Tei2MdError::Internal(format!("multipart: {}", e)))?;
        let form = form_fields(&self.config)
            .into_iter()
            .fold(Form::new().part("input", part), |form, (name, value)| {
                form.text(name, value)
            });

        let url = self.endpoint(FULLTEXT_ENDPOINT);
        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Tei2MdError::GrobidUnavailable {
                url: url.clone(),
                reason: if e.is_timeout() {
                    format!("timed out after {}s", self.config.timeout_secs)
                } else {
                    e.to_string()
                },
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Tei2MdError::GrobidUnavailable {
                url: url.clone(),
                reason: format!("reading response body: {}", e),
            })?;

        if status != reqwest::StatusCode::OK || body.trim().is_empty() {
            return Err(Tei2MdError::GrobidFailed {
                path: pdf_path.to_path_buf(),
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        debug!("GROBID returned {} bytes of TEI", body.len());
        Ok(body)
    }
}

/// Text fields sent alongside the PDF.
fn form_fields(config: &GrobidConfig) -> Vec<(&'static str, String)> {
    let flag = |on: bool| if on { "1" } else { "0" }.to_string();
    let mut fields = vec![
        ("consolidateHeader", flag(config.consolidate_header)),
        ("consolidateCitations", flag(config.consolidate_citations)),
        ("generateIDs", flag(config.generate_ids)),
        ("segmentSentences", flag(config.segment_sentences)),
        ("includeRawCitations", "1".to_string()),
    ];
    fields.extend(
        config
            .coordinate_elements
            .iter()
            .map(|el| ("teiCoordinates", el.clone())),
    );
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_fields_follow_config() {
        let config = GrobidConfig::builder()
            .consolidate_citations(false)
            .coordinate_elements(["figure", "formula"])
            .build()
            .unwrap();
        let fields = form_fields(&config);
        assert!(fields.contains(&("consolidateHeader", "1".to_string())));
        assert!(fields.contains(&("consolidateCitations", "0".to_string())));
        assert!(fields.contains(&("segmentSentences", "0".to_string())));
        let coords: Vec<_> = fields
            .iter()
            .filter(|(k, _)| *k == "teiCoordinates")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(coords, vec!["figure", "formula"]);
    }

    #[test]
    fn endpoint_join() {
        let client = GrobidClient::new(&GrobidConfig::default()).unwrap();
        assert_eq!(
            client.endpoint(FULLTEXT_ENDPOINT),
            "http://localhost:8070/api/processFulltextDocument"
        );
    }

    #[tokio::test]
    async fn missing_pdf_is_reported_before_any_request() {
        let client = GrobidClient::new(&GrobidConfig::default()).unwrap();
        let err = client
            .process_fulltext(Path::new("/nonexistent/paper.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, Tei2MdError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let config = GrobidConfig::builder()
            .server_url("http://127.0.0.1:9")
            .timeout_secs(5)
            .build()
            .unwrap();
        let client = GrobidClient::new(&config).unwrap();
        assert!(!client.is_alive().await);

        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("paper.pdf");
        std::fs::write(&pdf, b"%PDF-1.4\n%%EOF\n").unwrap();
        let err = client.process_fulltext(&pdf).await.unwrap_err();
        assert!(matches!(err, Tei2MdError::GrobidUnavailable { .. }));
    }
}
