//! HTTP client for the remote backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use fault_match_config::Settings;
use fault_match_core::{Candidate, Hints, Source};

use crate::query;
use crate::RemoteError;

/// Remote backend configuration.
#[derive(Debug, Clone)]
pub struct RemoteSearchConfig {
    pub base_url: String,
    pub index: String,
    pub username: String,
    pub password: String,
    pub vector_field: String,
    pub timeout: Duration,
    /// Candidate pool the backend examines per kNN query
    pub num_candidates: usize,
}

impl RemoteSearchConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            base_url: settings.opensearch_url.trim_end_matches('/').to_string(),
            index: settings.opensearch_index.clone(),
            username: settings.opensearch_username.clone(),
            password: settings.opensearch_password.clone(),
            vector_field: settings.opensearch_vector_field.clone(),
            timeout: settings.source_timeout(),
            num_candidates: 200,
        }
    }
}

/// One hit materialized from the backend response.
#[derive(Debug, Clone)]
pub struct RemoteHit {
    pub id: String,
    pub score: f64,
    pub source: Value,
    pub highlight: Option<Value>,
}

impl RemoteHit {
    /// Build a candidate from this hit. Lexical hits contribute the raw
    /// BM25 score, kNN hits the raw cosine similarity; both carry the
    /// remote source tag.
    pub fn to_candidate(&self, from_knn: bool) -> Candidate {
        let mut candidate = Candidate {
            id: self.id.clone(),
            text: pick_str(&self.source, TEXT_FIELDS).unwrap_or_default(),
            system: pick_str(&self.source, SYSTEM_FIELDS),
            part: pick_str(&self.source, PART_FIELDS),
            tags: pick_tags(&self.source),
            vehicletype: pick_str(&self.source, VEHICLETYPE_FIELDS),
            faultcode: pick_str(&self.source, FAULT_CODE_FIELDS),
            popularity: pick_number(&self.source, POPULARITY_FIELDS).unwrap_or(0.0),
            highlight: self.highlight.clone(),
            ..Candidate::default()
        };
        candidate.sources.insert(Source::Remote);
        if from_knn {
            candidate.cosine_raw = Some(self.score);
            candidate.sources.insert(Source::Semantic);
        } else {
            candidate.bm25_raw = Some(self.score);
            candidate.sources.insert(Source::Keyword);
        }
        candidate
    }
}

/// A search result page.
#[derive(Debug, Clone)]
pub struct RemoteSearchResult {
    pub total: u64,
    pub hits: Vec<RemoteHit>,
}

/// kNN clause input.
#[derive(Debug, Clone)]
pub struct KnnQuery {
    pub vector: Vec<f32>,
    pub k: usize,
}

/// Client for the remote full-text + vector backend.
pub struct RemoteSearch {
    config: RemoteSearchConfig,
    http: reqwest::Client,
    /// Set after the backend rejects the top-level kNN syntax once;
    /// later queries go straight to the nested form.
    knn_nested: AtomicBool,
}

impl RemoteSearch {
    pub fn new(config: RemoteSearchConfig) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            config,
            http,
            knn_nested: AtomicBool::new(false),
        })
    }

    /// Weighted lexical search with structured filters and highlights.
    pub async fn lexical(
        &self,
        query: &str,
        hints: &Hints,
        size: usize,
    ) -> Result<RemoteSearchResult, RemoteError> {
        let filters = query::build_filters(hints);
        let body = query::lexical_body(query, &filters, size);
        let response = self.post_search(&body).await?;
        parse_result(&response)
    }

    /// kNN search over the stored dense vector field.
    ///
    /// Tries the top-level clause first and falls back to the nested
    /// `bool.must` form when the server rejects the syntax.
    pub async fn knn(&self, knn: &KnnQuery, hints: &Hints) -> Result<RemoteSearchResult, RemoteError> {
        let filters = query::build_filters(hints);
        let num_candidates = self.config.num_candidates.max(knn.k * 4);

        if !self.knn_nested.load(Ordering::Relaxed) {
            let body = query::knn_body_top_level(
                &self.config.vector_field,
                &knn.vector,
                knn.k,
                num_candidates,
                &filters,
            );
            match self.post_search(&body).await {
                Ok(response) => return parse_result(&response),
                Err(RemoteError::Status { status, body }) if query::is_knn_syntax_error(&body) => {
                    warn!(status, "top-level kNN rejected, switching to nested syntax");
                    self.knn_nested.store(true, Ordering::Relaxed);
                }
                Err(other) => return Err(other),
            }
        }

        let body = query::knn_body_nested(
            &self.config.vector_field,
            &knn.vector,
            knn.k,
            num_candidates,
            &filters,
        );
        let response = self.post_search(&body).await?;
        parse_result(&response)
    }

    /// Document counts and facet distributions for the stats endpoint.
    pub async fn stats(&self) -> Result<Value, RemoteError> {
        let response = self.post_search(&query::stats_body()).await?;
        let aggs = &response["aggregations"];
        Ok(serde_json::json!({
            "total_documents": response["hits"]["total"]["value"],
            "systems": bucket_counts(&aggs["systems"]),
            "vehicletypes": bucket_counts(&aggs["vehicletypes"]),
            "popularity_stats": aggs["popularity_stats"],
        }))
    }

    async fn post_search(&self, body: &Value) -> Result<Value, RemoteError> {
        let url = format!("{}/{}/_search", self.config.base_url, self.config.index);
        debug!(url = %url, "remote search request");

        let mut request = self.http.post(&url).json(body);
        if !self.config.username.is_empty() {
            request = request.basic_auth(&self.config.username, Some(&self.config.password));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

fn parse_result(response: &Value) -> Result<RemoteSearchResult, RemoteError> {
    let hits_obj = response
        .get("hits")
        .ok_or_else(|| RemoteError::Parse("response has no hits".to_string()))?;
    let total = hits_obj["total"]["value"].as_u64().unwrap_or(0);

    let mut hits = Vec::new();
    for hit in hits_obj["hits"].as_array().into_iter().flatten() {
        let source = hit.get("_source").cloned().unwrap_or(Value::Null);
        let id = hit["_id"]
            .as_str()
            .map(str::to_string)
            .or_else(|| source["id"].as_str().map(str::to_string))
            .unwrap_or_default();
        if id.is_empty() {
            continue;
        }
        hits.push(RemoteHit {
            id,
            score: hit["_score"].as_f64().unwrap_or(0.0),
            highlight: hit.get("highlight").filter(|h| !h.is_null()).cloned(),
            source,
        });
    }
    Ok(RemoteSearchResult { total, hits })
}

fn bucket_counts(agg: &Value) -> Vec<Value> {
    agg["buckets"]
        .as_array()
        .into_iter()
        .flatten()
        .map(|bucket| {
            serde_json::json!({
                "name": bucket["key"],
                "count": bucket["doc_count"],
            })
        })
        .collect()
}

// Alias tables for materializing hits from heterogeneous imports.
const TEXT_FIELDS: &[&str] = &[
    "text",
    "fault_symptom",
    "symptoms",
    "symptom",
    "summary",
    "fault_description",
    "discussion",
    "fault_point",
];
const SYSTEM_FIELDS: &[&str] = &["system", "system_name"];
const PART_FIELDS: &[&str] = &["part", "component", "component_name", "control_unit"];
const VEHICLETYPE_FIELDS: &[&str] = &[
    "vehicletype",
    "vehicle_model",
    "vehicle_name",
    "model",
    "series",
];
const FAULT_CODE_FIELDS: &[&str] = &["faultcode", "fault_code", "dtc", "spare4"];
const POPULARITY_FIELDS: &[&str] = &["popularity", "popularity_score"];

fn pick_str(source: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        source
            .get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn pick_number(source: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| {
        let value = source.get(*key)?;
        value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
    })
}

fn pick_tags(source: &Value) -> Vec<String> {
    for key in ["tags", "labels"] {
        match source.get(key) {
            Some(Value::Array(items)) => {
                return items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            Some(Value::String(s)) => {
                return s
                    .split([',', '，', ';', '；'])
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            _ => continue,
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hit(score: f64, source: Value) -> RemoteHit {
        RemoteHit {
            id: "D001".to_string(),
            score,
            source,
            highlight: None,
        }
    }

    #[test]
    fn lexical_hit_becomes_keyword_candidate() {
        let candidate = hit(
            12.5,
            json!({
                "fault_symptom": "制动踏板变软",
                "system_name": "制动",
                "component": "制动踏板",
                "popularity": "120",
                "tags": "刹车,踏板",
            }),
        )
        .to_candidate(false);

        assert_eq!(candidate.text, "制动踏板变软");
        assert_eq!(candidate.system.as_deref(), Some("制动"));
        assert_eq!(candidate.part.as_deref(), Some("制动踏板"));
        assert_eq!(candidate.popularity, 120.0);
        assert_eq!(candidate.tags, vec!["刹车", "踏板"]);
        assert_eq!(candidate.bm25_raw, Some(12.5));
        assert!(candidate.cosine_raw.is_none());
        assert!(candidate.sources.contains(&Source::Remote));
        assert!(candidate.sources.contains(&Source::Keyword));
    }

    #[test]
    fn knn_hit_becomes_semantic_candidate() {
        let candidate = hit(0.87, json!({ "text": "怠速异响" })).to_candidate(true);
        assert_eq!(candidate.cosine_raw, Some(0.87));
        assert!(candidate.bm25_raw.is_none());
        assert!(candidate.sources.contains(&Source::Semantic));
    }

    #[test]
    fn parse_result_extracts_ids_and_totals() {
        let response = json!({
            "hits": {
                "total": { "value": 37 },
                "hits": [
                    { "_id": "A", "_score": 3.2, "_source": { "text": "x" } },
                    { "_score": 1.0, "_source": { "id": "B", "text": "y" } },
                    { "_score": 0.5, "_source": { "text": "no id, dropped" } },
                ]
            }
        });
        let result = parse_result(&response).expect("parse");
        assert_eq!(result.total, 37);
        let ids: Vec<&str> = result.hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[test]
    fn parse_result_rejects_malformed_payload() {
        assert!(parse_result(&json!({ "took": 3 })).is_err());
    }
}
