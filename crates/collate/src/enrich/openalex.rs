//! OpenAlex `sources` endpoint.
//!
//! One request looks up a batch of ISSNs with an OR filter:
//! `GET /sources?filter=issn:0028-0836|1050-124X&per_page=200`. Results are
//! matched back to the requested keys through their `issn_l` and `issn`
//! fields, so a lookup by e-ISSN finds the record filed under the print
//! ISSN-L.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use serde_json::Value;

use super::transport::{CatalogResponse, CatalogTransport, TransportError};
use super::Metadata;
use crate::error::{CollateError, Result};
use crate::normalize::{issn, KeyNamespace, NormalizedKey};

/// Connection settings for [`OpenAlexTransport`].
#[derive(Debug, Clone)]
pub struct OpenAlexConfig {
    pub base_url: String,
    /// Contact address for the polite pool. Sent as `mailto` and in the
    /// user agent.
    pub mailto: Option<String>,
    pub per_page: usize,
    pub connect_timeout: Duration,
}

impl Default for OpenAlexConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openalex.org".to_string(),
            mailto: None,
            per_page: 200,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl OpenAlexConfig {
    pub fn with_mailto(mut self, mailto: impl Into<String>) -> Self {
        self.mailto = Some(mailto.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// [`CatalogTransport`] backed by the OpenAlex REST API.
pub struct OpenAlexTransport {
    client: Client,
    config: OpenAlexConfig,
}

impl OpenAlexTransport {
    pub fn new(config: OpenAlexConfig) -> Result<Self> {
        if let Some(mailto) = &config.mailto {
            if !mailto.contains('@') {
                return Err(CollateError::Config(format!(
                    "OpenAlex contact address '{}' is not an email address",
                    mailto
                )));
            }
        }

        let user_agent = match &config.mailto {
            Some(mailto) => format!("collate/{} (mailto:{})", env!("CARGO_PKG_VERSION"), mailto),
            None => format!("collate/{}", env!("CARGO_PKG_VERSION")),
        };

        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| CollateError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/sources", self.config.base_url.trim_end_matches('/'))
    }

    /// The OR filter for `keys`, in hyphenated form.
    fn filter(keys: &[NormalizedKey]) -> String {
        let issns: Vec<String> = keys.iter().map(|k| issn::display_form(k.value())).collect();
        format!("issn:{}", issns.join("|"))
    }

    /// Match the `results` of a response body to the requested keys.
    ///
    /// Items without a recognizable ISSN are skipped. When several items
    /// claim the same key the first one wins.
    pub fn parse_response(body: &Value, keys: &[NormalizedKey]) -> std::result::Result<CatalogResponse, TransportError> {
        let results = body
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| TransportError::Malformed("missing 'results' array".to_string()))?;

        let wanted: HashSet<&NormalizedKey> = keys.iter().collect();
        let mut response = CatalogResponse::new();

        for item in results {
            let metadata = extract_metadata(item);
            for key in item_keys(item) {
                if wanted.contains(&key) && !response.contains_key(&key) {
                    response.insert(key, metadata.clone());
                }
            }
        }
        Ok(response)
    }
}

/// Every ISSN an item is filed under, canonicalized.
fn item_keys(item: &Value) -> Vec<NormalizedKey> {
    let mut raw: Vec<&str> = Vec::new();
    if let Some(l) = item.get("issn_l").and_then(Value::as_str) {
        raw.push(l);
    }
    if let Some(list) = item.get("issn").and_then(Value::as_array) {
        raw.extend(list.iter().filter_map(Value::as_str));
    }
    raw.into_iter()
        .filter_map(|r| issn::canonicalize(r).ok())
        .map(|c| NormalizedKey::new(KeyNamespace::Issn, c))
        .collect()
}

const FIELDS: &[(&str, &str)] = &[
    ("display_name", "title"),
    ("issn_l", "issn_l"),
    ("issn", "issns"),
    ("host_organization_name", "publisher"),
    ("country_code", "country"),
    ("type", "type"),
    ("is_oa", "open_access"),
    ("works_count", "works_count"),
    ("cited_by_count", "cited_by_count"),
    ("homepage_url", "homepage"),
    ("id", "openalex_id"),
    ("updated_date", "updated"),
];

fn extract_metadata(item: &Value) -> Metadata {
    let mut metadata = Metadata::new();
    for (source, target) in FIELDS {
        if let Some(text) = item.get(*source).and_then(flatten) {
            metadata.insert(target.to_string(), text);
        }
    }
    metadata
}

/// Render a JSON value as a cell. Nulls and empty values are dropped.
fn flatten(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(flatten)
            .collect::<Vec<_>>()
            .join("; "),
        Value::Object(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_decode() {
        TransportError::Malformed(error.to_string())
    } else {
        TransportError::Connection(error.to_string())
    }
}

#[async_trait]
impl CatalogTransport for OpenAlexTransport {
    async fn fetch_batch(&self, keys: &[NormalizedKey]) -> std::result::Result<CatalogResponse, TransportError> {
        let mut query = vec![
            ("filter", Self::filter(keys)),
            ("per_page", self.config.per_page.to_string()),
        ];
        if let Some(mailto) = &self.config.mailto {
            query.push(("mailto", mailto.clone()));
        }

        tracing::debug!(keys = keys.len(), "Querying OpenAlex");

        let response = self
            .client
            .get(self.endpoint())
            .query(&query)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::from_status(status.as_u16(), retry_after, body));
        }

        let body: Value = response.json().await.map_err(map_reqwest_error)?;
        Self::parse_response(&body, keys)
    }

    fn supports(&self, key: &NormalizedKey) -> bool {
        key.namespace() == KeyNamespace::Issn
    }

    fn name(&self) -> &str {
        "openalex"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(v: &str) -> NormalizedKey {
        NormalizedKey::new(KeyNamespace::Issn, v)
    }

    #[test]
    fn test_filter_uses_hyphenated_issns() {
        let filter = OpenAlexTransport::filter(&[key("00280836"), key("1050124X")]);
        assert_eq!(filter, "issn:0028-0836|1050-124X");
    }

    #[test]
    fn test_parse_matches_by_issn_l_and_issn_list() {
        let body = json!({
            "meta": {"count": 1},
            "results": [{
                "id": "https://openalex.org/S137773608",
                "display_name": "Nature",
                "issn_l": "0028-0836",
                "issn": ["0028-0836", "1476-4687"],
                "host_organization_name": "Nature Portfolio",
                "country_code": "GB",
                "type": "journal",
                "is_oa": false,
                "works_count": 420000,
                "cited_by_count": 25000000,
                "homepage_url": null
            }]
        });

        let response =
            OpenAlexTransport::parse_response(&body, &[key("14764687"), key("12345678")]).unwrap();

        assert_eq!(response.len(), 1);
        let meta = &response[&key("14764687")];
        assert_eq!(meta["title"], "Nature");
        assert_eq!(meta["issns"], "0028-0836; 1476-4687");
        assert_eq!(meta["open_access"], "false");
        assert_eq!(meta["works_count"], "420000");
        assert!(!meta.contains_key("homepage"));
    }

    #[test]
    fn test_parse_rejects_missing_results() {
        let result = OpenAlexTransport::parse_response(&json!({"error": "bad"}), &[key("00280836")]);
        assert!(matches!(result, Err(TransportError::Malformed(_))));
    }

    #[test]
    fn test_rejects_invalid_mailto() {
        let result = OpenAlexTransport::new(OpenAlexConfig::default().with_mailto("nobody"));
        assert!(matches!(result, Err(CollateError::Config(_))));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let transport = OpenAlexTransport::new(
            OpenAlexConfig::default().with_base_url("http://localhost:8080/"),
        )
        .unwrap();
        assert_eq!(transport.endpoint(), "http://localhost:8080/sources");
    }
}
