//! End-to-end pipeline scenarios with controlled retriever outputs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use fault_match_config::FusionWeights;
use fault_match_core::{DecisionMode, Error, FaultCase, Hints, LlmVerdict, Result, Source};
use fault_match_llm::PickCandidate;
use fault_match_pipeline::{
    CandidatePicker, KeywordSource, MatchOptions, MatchPipeline, PipelineConfig, RerankScorer,
    SemanticSource,
};

fn case(id: &str, text: &str, system: Option<&str>, part: Option<&str>, popularity: f64) -> FaultCase {
    FaultCase {
        id: id.to_string(),
        text: text.to_string(),
        system: system.map(str::to_string),
        part: part.map(str::to_string),
        popularity,
        ..FaultCase::default()
    }
}

struct MapKeyword(Vec<(String, f64)>);

impl KeywordSource for MapKeyword {
    fn search(&self, _query: &str, k: usize) -> Result<Vec<(String, f64)>> {
        Ok(self.0.iter().take(k).cloned().collect())
    }
}

struct MapSemantic(Vec<(String, f64)>);

#[async_trait]
impl SemanticSource for MapSemantic {
    async fn search(&self, _query: &str, k: usize) -> Result<Vec<(String, f64)>> {
        Ok(self.0.iter().take(k).cloned().collect())
    }
}

struct FailingSemantic;

#[async_trait]
impl SemanticSource for FailingSemantic {
    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<(String, f64)>> {
        Err(Error::Retrieval("index corrupted".to_string()))
    }
}

struct FailingKeyword;

impl KeywordSource for FailingKeyword {
    fn search(&self, _query: &str, _k: usize) -> Result<Vec<(String, f64)>> {
        Err(Error::Retrieval("cache unreadable".to_string()))
    }
}

/// Scores each text by table lookup; unknown texts get zero.
struct MapRerank(HashMap<String, f64>);

impl RerankScorer for MapRerank {
    fn score(&self, _query: &str, texts: &[String]) -> Result<Vec<f64>> {
        Ok(texts.iter().map(|t| *self.0.get(t).unwrap_or(&0.0)).collect())
    }
}

/// Returns a fixed verdict and counts invocations.
struct FixedPicker {
    verdict: LlmVerdict,
    calls: AtomicUsize,
}

impl FixedPicker {
    fn new(verdict: LlmVerdict) -> Arc<Self> {
        Arc::new(Self {
            verdict,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CandidatePicker for FixedPicker {
    async fn pick(&self, _query: &str, _candidates: &[PickCandidate]) -> LlmVerdict {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.verdict.clone()
    }
}

// ---------------------------------------------------------------------------
// Scenario 1: direct hit
// ---------------------------------------------------------------------------

fn brake_kb() -> Vec<FaultCase> {
    vec![
        case(
            "P001",
            "制动踏板变软，制动距离变长",
            Some("制动"),
            Some("制动踏板"),
            120.0,
        ),
        case("P002", "发动机怠速异响", Some("发动机"), None, 10.0),
        case("P003", "空调不制冷", Some("空调"), None, 5.0),
        case("P004", "变速箱换挡顿挫", Some("变速箱"), None, 8.0),
        case("P005", "转向沉重", Some("转向"), None, 3.0),
    ]
}

fn brake_pipeline() -> MatchPipeline {
    let keyword = MapKeyword(vec![
        ("P001".to_string(), 12.0),
        ("P002".to_string(), 2.0),
        ("P003".to_string(), 2.0),
        ("P004".to_string(), 2.0),
        ("P005".to_string(), 2.0),
    ]);
    let semantic = MapSemantic(vec![
        ("P001".to_string(), 0.92),
        ("P002".to_string(), 0.30),
        ("P003".to_string(), 0.30),
        ("P004".to_string(), 0.30),
        ("P005".to_string(), 0.30),
    ]);
    let rerank: HashMap<String, f64> = [
        ("制动踏板变软，制动距离变长", 0.95),
        ("发动机怠速异响", 0.20),
        ("空调不制冷", 0.20),
        ("变速箱换挡顿挫", 0.20),
        ("转向沉重", 0.20),
    ]
    .into_iter()
    .map(|(t, s)| (t.to_string(), s))
    .collect();

    MatchPipeline::new(PipelineConfig::default(), brake_kb())
        .with_keyword(Arc::new(keyword))
        .with_semantic(Arc::new(semantic))
        .with_reranker(Arc::new(MapRerank(rerank)))
}

#[tokio::test]
async fn direct_hit_on_brake_case() {
    let hints = Hints {
        system: Some("制动".to_string()),
        part: Some("制动踏板".to_string()),
        ..Hints::default()
    };
    let response = brake_pipeline()
        .matching("刹车发软 车身发飘", hints, &MatchOptions::default())
        .await
        .expect("response");

    let top = &response.top[0];
    assert_eq!(top.id, "P001");
    assert!(
        top.final_score >= 0.84,
        "expected direct-band score, got {}",
        top.final_score
    );
    let decision = response.decision.expect("decision");
    assert_eq!(decision.mode, DecisionMode::Direct);
    assert_eq!(decision.chosen_id.as_deref(), Some("P001"));
    for tag in ["语义近", "系统一致"] {
        assert!(top.why.iter().any(|w| w == tag), "missing tag {tag}");
    }
}

// ---------------------------------------------------------------------------
// Scenarios 2 and 3: gray band with LLM adjudication
// ---------------------------------------------------------------------------

fn noise_kb() -> Vec<FaultCase> {
    vec![
        case("P006", "低速刹车时有金属摩擦异响", None, None, 0.0),
        case("P007", "发动机怠速异响", None, None, 0.0),
        case("P008", "车门密封条异响", None, None, 0.0),
        case("P009", "悬挂过坎异响", None, None, 0.0),
    ]
}

fn gray_pipeline(picker: Arc<dyn CandidatePicker>) -> MatchPipeline {
    let keyword = MapKeyword(vec![
        ("P006".to_string(), 8.0),
        ("P007".to_string(), 1.0),
        ("P008".to_string(), 0.9),
        ("P009".to_string(), 0.8),
    ]);
    let semantic = MapSemantic(vec![
        ("P006".to_string(), 0.85),
        ("P007".to_string(), 0.20),
        ("P008".to_string(), 0.19),
        ("P009".to_string(), 0.18),
    ]);
    let rerank: HashMap<String, f64> = [
        ("低速刹车时有金属摩擦异响", 0.90),
        ("发动机怠速异响", 0.20),
        ("车门密封条异响", 0.18),
        ("悬挂过坎异响", 0.16),
    ]
    .into_iter()
    .map(|(t, s)| (t.to_string(), s))
    .collect();

    MatchPipeline::new(PipelineConfig::default(), noise_kb())
        .with_keyword(Arc::new(keyword))
        .with_semantic(Arc::new(semantic))
        .with_reranker(Arc::new(MapRerank(rerank)))
        .with_picker(picker)
}

fn llm_options() -> MatchOptions {
    MatchOptions {
        use_llm: true,
        ..MatchOptions::default()
    }
}

#[tokio::test]
async fn gray_band_upgrades_on_concrete_pick() {
    let picker = FixedPicker::new(LlmVerdict {
        chosen_id: "P006".to_string(),
        confidence: 0.72,
        reason: Some("更符合异响描述".to_string()),
    });
    let response = gray_pipeline(picker.clone())
        .matching("车子有异响", Hints::default(), &llm_options())
        .await
        .expect("response");

    let base_score = response.top[0].final_score;
    assert!(
        (0.65..0.84).contains(&base_score),
        "expected gray-band score, got {base_score}"
    );

    let decision = response.decision.expect("decision");
    assert_eq!(decision.mode, DecisionMode::Llm);
    assert_eq!(decision.chosen_id.as_deref(), Some("P006"));
    assert!((decision.confidence - base_score.max(0.72)).abs() < 1e-9);
    assert_eq!(picker.calls.load(Ordering::SeqCst), 1);
    assert!(response.metadata.llm_used);
    assert!(response.metadata.llm_candidate_count > 0);
}

#[tokio::test]
async fn gray_band_survives_unknown_verdict() {
    let picker = FixedPicker::new(LlmVerdict::unknown("都不够像"));
    let response = gray_pipeline(picker)
        .matching("车子有异响", Hints::default(), &llm_options())
        .await
        .expect("response");

    let decision = response.decision.expect("decision");
    assert_eq!(decision.mode, DecisionMode::Gray);
    assert_eq!(decision.chosen_id.as_deref(), Some("P006"));
    let llm = decision.llm.expect("llm verdict attached");
    assert!(llm.is_unknown());
    assert!(llm.reason.is_some());
}

#[tokio::test]
async fn out_of_set_pick_is_ignored() {
    let picker = FixedPicker::new(LlmVerdict {
        chosen_id: "P999".to_string(),
        confidence: 0.99,
        reason: Some("hallucination".to_string()),
    });
    let response = gray_pipeline(picker)
        .matching("车子有异响", Hints::default(), &llm_options())
        .await
        .expect("response");

    let decision = response.decision.expect("decision");
    assert_eq!(decision.mode, DecisionMode::Gray);
    assert_eq!(decision.chosen_id.as_deref(), Some("P006"));
}

#[tokio::test]
async fn picker_runs_only_in_the_gray_band() {
    // direct decision, llm enabled: the picker must not run
    let picker = FixedPicker::new(LlmVerdict::unknown("should not run"));
    let hints = Hints {
        system: Some("制动".to_string()),
        part: Some("制动踏板".to_string()),
        ..Hints::default()
    };
    let response = brake_pipeline()
        .with_picker(picker.clone())
        .matching("刹车发软 车身发飘", hints, &llm_options())
        .await
        .expect("response");
    assert_eq!(response.decision.unwrap().mode, DecisionMode::Direct);
    assert_eq!(picker.calls.load(Ordering::SeqCst), 0);
    assert!(!response.metadata.llm_used);

    // gray decision, llm disabled: the picker must not run either
    let picker = FixedPicker::new(LlmVerdict::unknown("should not run"));
    let response = gray_pipeline(picker.clone())
        .matching("车子有异响", Hints::default(), &MatchOptions::default())
        .await
        .expect("response");
    assert_eq!(response.decision.unwrap().mode, DecisionMode::Gray);
    assert_eq!(picker.calls.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Scenario 4: reject
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unrelated_query_is_rejected() {
    let kb = vec![
        case("P101", "制动踏板变软", None, None, 0.0),
        case("P102", "发动机怠速异响", None, None, 0.0),
        case("P103", "空调不制冷", None, None, 0.0),
    ];
    let pipeline = MatchPipeline::new(PipelineConfig::default(), kb)
        .with_keyword(Arc::new(MapKeyword(Vec::new())))
        .with_semantic(Arc::new(MapSemantic(vec![
            ("P101".to_string(), 0.05),
            ("P102".to_string(), 0.04),
            ("P103".to_string(), 0.03),
        ])));

    let response = pipeline
        .matching("做饭洗衣服", Hints::default(), &MatchOptions::default())
        .await
        .expect("response");

    let decision = response.decision.expect("decision");
    assert_eq!(decision.mode, DecisionMode::Reject);
    assert_eq!(decision.chosen_id, None);
}

// ---------------------------------------------------------------------------
// Scenario 5: partial source failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn semantic_failure_degrades_to_keyword_only() {
    let pipeline = MatchPipeline::new(PipelineConfig::default(), brake_kb())
        .with_keyword(Arc::new(MapKeyword(vec![
            ("P001".to_string(), 9.0),
            ("P002".to_string(), 4.0),
            ("P003".to_string(), 3.0),
            ("P004".to_string(), 2.0),
            ("P005".to_string(), 1.0),
        ])))
        .with_semantic(Arc::new(FailingSemantic));

    let response = pipeline
        .matching("刹车发软", Hints::default(), &MatchOptions::default())
        .await
        .expect("response");

    assert_eq!(response.top[0].id, "P001");
    assert!(response.decision.is_some());
    assert!(!response.metadata.semantic_used);
    for candidate in &response.top {
        assert!(candidate.cosine.is_none());
        assert_eq!(
            candidate.sources.iter().collect::<Vec<_>>(),
            vec![&Source::Keyword]
        );
    }
}

#[tokio::test]
async fn all_sources_failing_is_a_hard_error() {
    let pipeline = MatchPipeline::new(PipelineConfig::default(), brake_kb())
        .with_keyword(Arc::new(FailingKeyword))
        .with_semantic(Arc::new(FailingSemantic));

    let err = pipeline
        .matching("刹车发软", Hints::default(), &MatchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AllSourcesFailed(_)));
    assert_eq!(err.reason_code(), "all_sources_failed");
}

// ---------------------------------------------------------------------------
// Scenario 6: weight override
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bm25_only_weights_follow_keyword_ordering() {
    // semantic strongly disagrees with keyword order
    let keyword = MapKeyword(vec![
        ("P001".to_string(), 9.0),
        ("P002".to_string(), 5.0),
        ("P003".to_string(), 1.0),
    ]);
    let semantic = MapSemantic(vec![
        ("P003".to_string(), 0.99),
        ("P002".to_string(), 0.50),
        ("P001".to_string(), 0.10),
    ]);

    let config = PipelineConfig {
        weights: FusionWeights {
            rerank: 0.0,
            cosine: 0.0,
            bm25: 1.0,
            kg_prior: 0.0,
            popularity: 0.0,
        },
        ..PipelineConfig::default()
    };
    let pipeline = MatchPipeline::new(config, brake_kb())
        .with_keyword(Arc::new(keyword))
        .with_semantic(Arc::new(semantic));

    let response = pipeline
        .matching("刹车", Hints::default(), &MatchOptions::default())
        .await
        .expect("response");
    let ids: Vec<&str> = response.top.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["P001", "P002", "P003"]);
}

// ---------------------------------------------------------------------------
// Determinism
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identical_inputs_give_identical_rankings() {
    let run = || async {
        gray_pipeline(FixedPicker::new(LlmVerdict::unknown("n/a")))
            .matching("车子有异响", Hints::default(), &MatchOptions::default())
            .await
            .expect("response")
    };
    let first = run().await;
    let second = run().await;

    let ids = |r: &fault_match_pipeline::MatchResponse| {
        r.top
            .iter()
            .map(|c| (c.id.clone(), c.final_score))
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
}
