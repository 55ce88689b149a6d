//! Query body construction for the remote backend.
//!
//! The index holds records imported from several upstream exports, so most
//! logical fields exist under a handful of alias names with different
//! weights. The boost tables below mirror the import mapping.

use fault_match_core::Hints;
use serde_json::{json, Value};

/// Weighted fields for the main lexical query.
pub(crate) const MULTI_MATCH_FIELDS: &[&str] = &[
    "text^3.0",
    "symptoms^3.0",
    "symptom^3.0",
    "fault_symptom^3.0",
    "symptom_desc^2.8",
    "topic^2.5",
    "discussion^2.5",
    "fault_point^2.5",
    "summary^2.3",
    "analysis^2.0",
    "search_content^2.0",
    "solution^1.8",
    "part^1.5",
    "component^1.5",
    "system^1.5",
    "system_name^1.3",
    "vehicletype^1.5",
    "vehicle_model^1.5",
    "vehicle_name^1.3",
    "brand^1.3",
    "faultcode^0.8",
    "fault_code^0.8",
    "dtc^0.8",
];

pub(crate) const PART_FILTER_FIELDS: &[&str] = &[
    "part^2.0",
    "component^2.0",
    "component_name^2.0",
    "control_unit^1.5",
    "fault_point^1.2",
];

pub(crate) const VEHICLETYPE_FILTER_FIELDS: &[&str] = &[
    "vehicletype^2.0",
    "vehicle_model^2.0",
    "vehicle_name^1.5",
    "model^1.2",
    "series^1.2",
];

pub(crate) const FAULT_CODE_FIELDS: &[&str] =
    &["faultcode", "fault_code", "dtc", "dtc_code", "spare4"];

/// Highlighted fields with fragment sizing.
const HIGHLIGHT_FIELDS: &[(&str, u32)] = &[
    ("text", 150),
    ("symptoms", 150),
    ("fault_symptom", 150),
    ("discussion", 100),
    ("fault_point", 100),
];

/// Structured filter clauses for the supplied hints.
pub(crate) fn build_filters(hints: &Hints) -> Vec<Value> {
    let mut filters = Vec::new();

    if let Some(system) = non_empty(&hints.system) {
        filters.push(json!({
            "bool": {
                "should": [
                    { "term": { "system.keyword": system } },
                    { "term": { "system_name.keyword": system } },
                    { "match_phrase": { "system": system } },
                    { "match_phrase": { "system_name": system } },
                ],
                "minimum_should_match": 1,
            }
        }));
    }
    if let Some(part) = non_empty(&hints.part) {
        filters.push(json!({
            "multi_match": {
                "query": part,
                "fields": PART_FILTER_FIELDS,
                "type": "best_fields",
            }
        }));
    }
    if let Some(vehicletype) = non_empty(&hints.vehicletype) {
        filters.push(json!({
            "multi_match": {
                "query": vehicletype,
                "fields": VEHICLETYPE_FILTER_FIELDS,
                "type": "best_fields",
            }
        }));
    }
    if let Some(code) = non_empty(&hints.faultcode) {
        let should: Vec<Value> = FAULT_CODE_FIELDS
            .iter()
            .map(|field| json!({ "match_phrase": { *field: code } }))
            .collect();
        filters.push(json!({
            "bool": { "should": should, "minimum_should_match": 1 }
        }));
    }
    filters
}

/// Main lexical search body: weighted multi_match with fuzziness, the
/// structured filters, a soft popularity boost, and highlights.
pub(crate) fn lexical_body(query: &str, filters: &[Value], size: usize) -> Value {
    let highlight: serde_json::Map<String, Value> = HIGHLIGHT_FIELDS
        .iter()
        .map(|(field, fragment)| {
            (
                (*field).to_string(),
                json!({
                    "fragment_size": fragment,
                    "number_of_fragments": 1,
                    "pre_tags": ["<mark>"],
                    "post_tags": ["</mark>"],
                }),
            )
        })
        .collect();

    json!({
        "query": {
            "bool": {
                "must": {
                    "multi_match": {
                        "query": query,
                        "fields": MULTI_MATCH_FIELDS,
                        "type": "best_fields",
                        "fuzziness": "AUTO",
                        "minimum_should_match": "75%",
                    }
                },
                "filter": filters,
                "should": [
                    { "range": { "popularity": { "gte": 50 } } },
                    { "range": { "popularity_score": { "gte": 50 } } },
                ],
            }
        },
        "size": size,
        "highlight": { "fields": highlight },
        "sort": [
            { "_score": { "order": "desc" } },
            { "popularity": { "order": "desc", "missing": "_last", "unmapped_type": "float" } },
        ],
    })
}

/// kNN body using the top-level `knn` clause (OpenSearch >= 2.9).
pub(crate) fn knn_body_top_level(
    vector_field: &str,
    vector: &[f32],
    k: usize,
    num_candidates: usize,
    filters: &[Value],
) -> Value {
    let mut bool_query = serde_json::Map::new();
    if !filters.is_empty() {
        bool_query.insert("filter".to_string(), json!(filters));
    }
    json!({
        "size": k,
        "query": { "bool": bool_query },
        "knn": {
            "field": vector_field,
            "query_vector": vector,
            "k": k,
            "num_candidates": num_candidates,
        }
    })
}

/// kNN body nested under `bool.must`, for servers that reject the top-level
/// clause.
pub(crate) fn knn_body_nested(
    vector_field: &str,
    vector: &[f32],
    k: usize,
    num_candidates: usize,
    filters: &[Value],
) -> Value {
    let mut bool_query = serde_json::Map::new();
    if !filters.is_empty() {
        bool_query.insert("filter".to_string(), json!(filters));
    }
    bool_query.insert(
        "must".to_string(),
        json!([{
            "knn": {
                vector_field: {
                    "vector": vector,
                    "k": k,
                    "num_candidates": num_candidates,
                }
            }
        }]),
    );
    json!({
        "size": k,
        "query": { "bool": bool_query },
    })
}

/// Aggregation body for the stats endpoint.
pub(crate) fn stats_body() -> Value {
    json!({
        "size": 0,
        "track_total_hits": true,
        "aggs": {
            "systems": { "terms": { "field": "system.keyword", "size": 20 } },
            "vehicletypes": { "terms": { "field": "vehicletype.keyword", "size": 20 } },
            "popularity_stats": { "stats": { "field": "popularity" } },
        }
    })
}

/// Does this error body indicate the server rejected the top-level kNN
/// syntax (rather than failing for an unrelated reason)?
pub(crate) fn is_knn_syntax_error(body: &str) -> bool {
    [
        "Unknown key for a START_OBJECT in [knn]",
        "Unknown key for a FIELD_NAME in [knn]",
        "Failed to parse [knn]",
        "parsing_exception",
    ]
    .iter()
    .any(|needle| body.contains(needle))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hints() -> Hints {
        Hints {
            system: Some("制动".to_string()),
            part: Some("制动踏板".to_string()),
            vehicletype: None,
            faultcode: Some("P0420".to_string()),
        }
    }

    #[test]
    fn filters_cover_each_present_hint() {
        let filters = build_filters(&hints());
        assert_eq!(filters.len(), 3);
        // faultcode expands over every alias field
        let code_filter = &filters[2]["bool"]["should"];
        assert_eq!(code_filter.as_array().map(Vec::len), Some(FAULT_CODE_FIELDS.len()));
    }

    #[test]
    fn blank_hints_produce_no_filters() {
        let blank = Hints {
            system: Some("  ".to_string()),
            ..Hints::default()
        };
        assert!(build_filters(&blank).is_empty());
    }

    #[test]
    fn lexical_body_carries_fuzziness_and_msm() {
        let body = lexical_body("刹车异响", &build_filters(&hints()), 10);
        let mm = &body["query"]["bool"]["must"]["multi_match"];
        assert_eq!(mm["fuzziness"], "AUTO");
        assert_eq!(mm["minimum_should_match"], "75%");
        assert_eq!(body["size"], 10);
        assert!(body["highlight"]["fields"].get("text").is_some());
    }

    #[test]
    fn knn_bodies_differ_only_in_clause_placement() {
        let vector = vec![0.1_f32, 0.2, 0.3];
        let top = knn_body_top_level("text_vector", &vector, 5, 200, &[]);
        assert_eq!(top["knn"]["field"], "text_vector");
        assert_eq!(top["knn"]["k"], 5);

        let nested = knn_body_nested("text_vector", &vector, 5, 200, &[]);
        assert!(nested.get("knn").is_none());
        assert_eq!(
            nested["query"]["bool"]["must"][0]["knn"]["text_vector"]["k"],
            5
        );
    }

    #[test]
    fn knn_syntax_errors_are_recognized() {
        assert!(is_knn_syntax_error(
            r#"{"error":{"type":"parsing_exception","reason":"Unknown key for a START_OBJECT in [knn]"}}"#
        ));
        assert!(!is_knn_syntax_error(r#"{"error":"index_not_found"}"#));
    }
}
