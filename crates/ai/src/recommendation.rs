//! College recommendations: result types, link enrichment and the pipeline.
//!
//! ## Steps
//!
//! 1. Draft: JSON-mode completion over the user's context. Opportunities may carry a
//!    `search_query` placeholder instead of a verified link.
//! 2. Enrich: every `{title, search_query}` is sent to a web-search completion; resolved
//!    URLs replace the placeholders by title. Unmatched entries keep the draft URL. If this
//!    step fails the placeholders are simply dropped.
//! 3. Parse into [`CollegeRecommendation`]s with lenient defaults.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, warn};

use counsel_core::UserId;

use crate::config::ModelSelection;
use crate::context::{build_context, ResponseSource, NO_PROFILE_CONTEXT};
use crate::model::{CompletionRequest, LanguageModel, SearchRequest};
use crate::pipeline::{GenerationOutput, GenerationPipeline};
use crate::prompts::PromptSet;
use crate::result::{AiError, GenerationMetadata, GenerationResult};

pub const RECOMMENDATION_PROMPT_VERSION: &str = "v1.0";

const LINK_LIST_FORMAT_PROMPT: &str = "You are a JSON formatting assistant. Take the provided \
text and convert it to a valid JSON array. Do not exclude any information or include any \
additional information.";

const LIST_KEYS: [&str; 4] = ["data", "results", "items", "list"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum SchoolTier {
    Reach,
    #[default]
    Match,
    Safety,
}

impl SchoolTier {
    /// Case-insensitive; anything unrecognised is treated as a match school.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "reach" => SchoolTier::Reach,
            "safety" => SchoolTier::Safety,
            _ => SchoolTier::Match,
        }
    }
}

impl<'de> Deserialize<'de> for SchoolTier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = Option::<String>::deserialize(deserializer)?;
        Ok(label.map(|l| SchoolTier::from_label(&l)).unwrap_or_default())
    }
}

fn default_fit_level() -> String {
    "Good".to_string()
}

fn default_fit_score() -> String {
    "50".to_string()
}

/// Accepts `"87"`, `87`, `87.5` or `null`.
fn fit_score_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match JsonValue::deserialize(deserializer)? {
        JsonValue::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::Null | JsonValue::String(_) => Ok(default_fit_score()),
        other => Err(serde::de::Error::custom(format!("fit_score must be a string or number, got {other}"))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchoolFit {
    #[serde(default = "default_fit_level")]
    pub academic: String,
    #[serde(default = "default_fit_level")]
    pub social_cultural: String,
    #[serde(default = "default_fit_level")]
    pub financial: String,
}

impl Default for SchoolFit {
    fn default() -> Self {
        Self {
            academic: default_fit_level(),
            social_cultural: default_fit_level(),
            financial: default_fit_level(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistinctiveOpportunity {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollegeRecommendation {
    #[serde(rename = "type", default)]
    pub tier: SchoolTier,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default = "default_fit_score", deserialize_with = "fit_score_from_any")]
    pub fit_score: String,
    #[serde(default)]
    pub fit: SchoolFit,
    #[serde(default)]
    pub overall_fit_rationale: Vec<String>,
    #[serde(default)]
    pub distinctive_opportunities: Vec<DistinctiveOpportunity>,
    #[serde(default)]
    pub potential_challenges: Vec<String>,
    #[serde(default)]
    pub why_school_essay_points: Vec<String>,
    #[serde(default)]
    pub how_to_stand_out: Vec<String>,
}

/// An opportunity whose link still has to be looked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchTarget {
    pub title: String,
    pub search_query: String,
}

fn for_each_opportunity(draft: &mut JsonValue, mut f: impl FnMut(&mut Map<String, JsonValue>)) {
    let Some(recs) = draft.get_mut("recommendations").and_then(JsonValue::as_array_mut) else {
        return;
    };
    for rec in recs {
        let Some(opps) = rec
            .get_mut("distinctive_opportunities")
            .and_then(JsonValue::as_array_mut)
        else {
            continue;
        };
        for opp in opps.iter_mut().filter_map(JsonValue::as_object_mut) {
            f(opp);
        }
    }
}

/// Every opportunity in the draft that carries a `search_query` key.
pub fn collect_search_targets(draft: &JsonValue) -> Vec<SearchTarget> {
    let mut targets = Vec::new();
    let recs = draft["recommendations"].as_array().into_iter().flatten();
    for rec in recs {
        for opp in rec["distinctive_opportunities"].as_array().into_iter().flatten() {
            if opp.get("search_query").is_some() {
                targets.push(SearchTarget {
                    title: opp["title"].as_str().unwrap_or_default().to_string(),
                    search_query: opp["search_query"].as_str().unwrap_or_default().to_string(),
                });
            }
        }
    }
    targets
}

/// Parse search output that is already JSON: a bare list or an object with a `data` list.
pub fn parse_link_list(text: &str) -> Option<Vec<JsonValue>> {
    match serde_json::from_str::<JsonValue>(text.trim()).ok()? {
        JsonValue::Array(items) => Some(items),
        JsonValue::Object(mut obj) => match obj.remove("data") {
            Some(JsonValue::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

/// Pull the list out of a reformatting answer: a well-known key, else the first list value.
pub fn extract_list(value: JsonValue) -> Vec<JsonValue> {
    match value {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut obj) => {
            for key in LIST_KEYS {
                if matches!(obj.get(key), Some(JsonValue::Array(_))) {
                    if let Some(JsonValue::Array(items)) = obj.remove(key) {
                        return items;
                    }
                }
            }
            obj.into_iter()
                .find_map(|(_, v)| match v {
                    JsonValue::Array(items) => Some(items),
                    _ => None,
                })
                .unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

/// `title -> url` for every well-formed `{title, url}` entry.
pub fn resolved_links(results: &[JsonValue]) -> HashMap<String, String> {
    let mut links = HashMap::new();
    for (i, entry) in results.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            debug!(index = i, "skipping non-object link result");
            continue;
        };
        let title = obj.get("title").and_then(JsonValue::as_str).unwrap_or_default().trim();
        let url = obj.get("url").and_then(JsonValue::as_str).unwrap_or_default().trim();
        if !title.is_empty() && !url.is_empty() {
            links.insert(title.to_string(), url.to_string());
        }
    }
    links
}

/// Replace placeholders in place. Returns how many opportunities got a resolved URL.
pub fn apply_resolved_links(draft: &mut JsonValue, links: &HashMap<String, String>) -> usize {
    let mut matched = 0;
    for_each_opportunity(draft, |opp| {
        if opp.remove("search_query").is_none() {
            return;
        }
        let title = opp.get("title").and_then(JsonValue::as_str).unwrap_or_default().trim();
        if let Some(url) = links.get(title) {
            opp.insert("url".to_string(), JsonValue::String(url.clone()));
            matched += 1;
        }
    });
    matched
}

pub fn strip_search_queries(draft: &mut JsonValue) {
    for_each_opportunity(draft, |opp| {
        opp.remove("search_query");
    });
}

/// Typed recommendations from the (enriched) draft.
pub fn parse_recommendations(draft: &JsonValue) -> Result<Vec<CollegeRecommendation>, AiError> {
    let items = draft
        .get("recommendations")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| AiError::MalformedOutput("missing \"recommendations\" array".to_string()))?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            CollegeRecommendation::deserialize(item)
                .map_err(|e| AiError::MalformedOutput(format!("recommendation {i}: {e}")))
        })
        .collect()
}

pub struct RecommendationPipeline {
    model: Arc<dyn LanguageModel>,
    responses: Arc<dyn ResponseSource>,
    prompts: Arc<PromptSet>,
    models: ModelSelection,
}

impl RecommendationPipeline {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        responses: Arc<dyn ResponseSource>,
        prompts: Arc<PromptSet>,
        models: ModelSelection,
    ) -> Self {
        Self {
            model,
            responses,
            prompts,
            models,
        }
    }

    async fn draft(&self, context: String) -> Result<JsonValue, AiError> {
        let request = CompletionRequest::new(
            &self.models.recommendation,
            &self.prompts.college_recommendations,
            context,
        )
        .max_tokens(10_000)
        .temperature(0.7);
        self.model.complete_json(request).await
    }

    async fn search_links(&self, targets: &[SearchTarget]) -> Result<HashMap<String, String>, AiError> {
        let input = serde_json::to_string_pretty(targets)
            .map_err(|e| AiError::Internal(format!("encode search targets: {e}")))?;
        let output = self
            .model
            .search_web(SearchRequest {
                model: self.models.link_search.clone(),
                system: self.prompts.link_search.clone(),
                input,
            })
            .await?;

        let results = match parse_link_list(&output) {
            Some(items) => items,
            None => {
                debug!("search output is not a JSON list; asking the model to reformat it");
                let request =
                    CompletionRequest::new(&self.models.format, LINK_LIST_FORMAT_PROMPT, output)
                        .max_tokens(3_000)
                        .temperature(0.1);
                extract_list(self.model.complete_json(request).await?)
            }
        };
        Ok(resolved_links(&results))
    }

    async fn enrich(&self, mut draft: JsonValue) -> JsonValue {
        let targets = collect_search_targets(&draft);
        if targets.is_empty() {
            return draft;
        }

        match self.search_links(&targets).await {
            Ok(links) => {
                let matched = apply_resolved_links(&mut draft, &links);
                info!(targets = targets.len(), matched, "resolved opportunity links");
            }
            Err(e) => {
                warn!(error = %e, "link enrichment failed; keeping draft URLs");
                strip_search_queries(&mut draft);
            }
        }
        draft
    }
}

#[async_trait]
impl GenerationPipeline for RecommendationPipeline {
    async fn generate(&self, user_id: &UserId) -> Result<GenerationOutput, AiError> {
        let responses = self.responses.responses_for(user_id).await?;
        let context = build_context(&responses).unwrap_or_else(|| NO_PROFILE_CONTEXT.to_string());
        debug!(%user_id, forms = responses.len(), chars = context.len(), "built recommendation context");

        let draft = self.draft(context).await?;
        let enriched = self.enrich(draft).await;
        let recommendations = parse_recommendations(&enriched)?;
        if recommendations.is_empty() {
            return Err(AiError::EmptyResult("no recommendations were produced".to_string()));
        }

        Ok(GenerationOutput {
            result: GenerationResult::Recommendations { recommendations },
            metadata: GenerationMetadata::from_user_responses()
                .with_model(&self.models.recommendation)
                .with_prompt_version(RECOMMENDATION_PROMPT_VERSION)
                .with_generated_at(Utc::now()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::fixtures::{answered_form, StaticResponses};
    use crate::model::scripted::ScriptedModel;
    use serde_json::json;

    fn draft_with_queries() -> JsonValue {
        json!({
            "recommendations": [
                {
                    "type": "reach",
                    "name": "Stanford University",
                    "location": "Stanford, CA",
                    "fit_score": 91,
                    "distinctive_opportunities": [
                        {"title": "Hopkins Marine Station", "description": "Field research", "url": "https://guess.example", "search_query": "hopkins marine station"},
                        {"title": "Bing Overseas", "description": "Study abroad", "search_query": "bing overseas studies"}
                    ]
                },
                {
                    "type": "Safety",
                    "name": "UC Santa Cruz",
                    "distinctive_opportunities": [
                        {"title": "Long Marine Lab", "description": "Coastal lab", "url": "https://ucsc.example"}
                    ]
                }
            ]
        })
    }

    fn pipeline(model: Arc<ScriptedModel>) -> RecommendationPipeline {
        RecommendationPipeline::new(
            model,
            Arc::new(StaticResponses(vec![answered_form("u1")])),
            Arc::new(PromptSet::default()),
            ModelSelection::default(),
        )
    }

    #[test]
    fn recommendations_parse_with_defaults() {
        let parsed = parse_recommendations(&json!({
            "recommendations": [{"name": "Reed College", "fit_score": null, "type": "unknown"}]
        }))
        .unwrap();

        let rec = &parsed[0];
        assert_eq!(rec.tier, SchoolTier::Match);
        assert_eq!(rec.fit_score, "50");
        assert_eq!(rec.fit, SchoolFit::default());
        assert!(rec.distinctive_opportunities.is_empty());
    }

    #[test]
    fn numeric_fit_score_and_tier_labels_are_normalized() {
        let parsed = parse_recommendations(&draft_with_queries()).unwrap();
        assert_eq!(parsed[0].tier, SchoolTier::Reach);
        assert_eq!(parsed[0].fit_score, "91");
        assert_eq!(parsed[1].tier, SchoolTier::Safety);

        // Clients always see the canonical label, whatever casing the model used.
        let rendered = serde_json::to_value(&parsed[0]).unwrap();
        assert_eq!(rendered["type"], "Reach");
    }

    #[test]
    fn missing_recommendations_array_is_malformed() {
        let err = parse_recommendations(&json!({"colleges": []})).unwrap_err();
        assert!(matches!(err, AiError::MalformedOutput(_)));
    }

    #[test]
    fn search_targets_only_include_placeholders() {
        let targets = collect_search_targets(&draft_with_queries());
        assert_eq!(
            targets.iter().map(|t| t.title.as_str()).collect::<Vec<_>>(),
            vec!["Hopkins Marine Station", "Bing Overseas"]
        );
    }

    #[test]
    fn link_list_accepts_bare_list_or_data_object() {
        assert_eq!(parse_link_list("[{\"title\":\"a\"}]").unwrap().len(), 1);
        assert_eq!(parse_link_list("{\"data\":[{},{}]}").unwrap().len(), 2);
        assert!(parse_link_list("{\"results\":[]}").is_none());
        assert!(parse_link_list("Here are the links: ...").is_none());
    }

    #[test]
    fn extract_list_prefers_known_keys_then_first_list() {
        assert_eq!(extract_list(json!({"other": [1], "items": [1, 2]})).len(), 2);
        assert_eq!(extract_list(json!({"links": [1, 2, 3]})).len(), 3);
        assert!(extract_list(json!({"count": 3})).is_empty());
        assert!(extract_list(json!("text")).is_empty());
    }

    #[test]
    fn resolved_links_replace_by_title_and_keep_original_otherwise() {
        let mut draft = draft_with_queries();
        let links = resolved_links(&[
            json!({"title": " Hopkins Marine Station ", "url": "https://stanford.edu/hopkins"}),
            json!("not an object"),
            json!({"title": "No url"}),
        ]);

        let matched = apply_resolved_links(&mut draft, &links);
        assert_eq!(matched, 1);

        let opps = &draft["recommendations"][0]["distinctive_opportunities"];
        assert_eq!(opps[0]["url"], "https://stanford.edu/hopkins");
        assert!(opps[0].get("search_query").is_none());
        assert!(opps[1].get("url").is_none());
        assert!(opps[1].get("search_query").is_none());
        assert_eq!(
            draft["recommendations"][1]["distinctive_opportunities"][0]["url"],
            "https://ucsc.example"
        );
    }

    #[tokio::test]
    async fn pipeline_enriches_links_from_json_search_output() {
        let model = Arc::new(ScriptedModel::new());
        model
            .push_json(Ok(draft_with_queries()))
            .push_search(Ok(json!({"data": [{"title": "Bing Overseas", "url": "https://bosp.stanford.edu"}]}).to_string()));

        let output = pipeline(model.clone())
            .generate(&UserId::parse("u1").unwrap())
            .await
            .unwrap();

        let GenerationResult::Recommendations { recommendations } = &output.result else {
            panic!("expected recommendations");
        };
        assert_eq!(recommendations.len(), 2);
        let bing = &recommendations[0].distinctive_opportunities[1];
        assert_eq!(bing.url.as_deref(), Some("https://bosp.stanford.edu"));
        assert!(bing.search_query.is_none());
        assert_eq!(output.metadata.prompt_version.as_deref(), Some("v1.0"));
        assert_eq!(output.metadata.model.as_deref(), Some("gpt-4o-mini"));

        let completions = model.completions.lock().unwrap();
        assert!(completions[0].messages[1].content.contains("Current GPA: 3.9"));
    }

    #[tokio::test]
    async fn free_text_search_output_is_reformatted() {
        let model = Arc::new(ScriptedModel::new());
        model
            .push_json(Ok(draft_with_queries()))
            .push_search(Ok("Hopkins Marine Station - https://hopkins.stanford.edu".to_string()))
            .push_json(Ok(json!({"results": [{"title": "Hopkins Marine Station", "url": "https://hopkins.stanford.edu"}]})));

        let output = pipeline(model.clone())
            .generate(&UserId::parse("u1").unwrap())
            .await
            .unwrap();

        let GenerationResult::Recommendations { recommendations } = output.result else {
            panic!("expected recommendations");
        };
        assert_eq!(
            recommendations[0].distinctive_opportunities[0].url.as_deref(),
            Some("https://hopkins.stanford.edu")
        );
        assert_eq!(model.completion_models(), vec!["gpt-4o-mini", "gpt-3.5-turbo"]);
    }

    #[tokio::test]
    async fn failed_search_strips_placeholders_but_still_succeeds() {
        let model = Arc::new(ScriptedModel::new());
        model
            .push_json(Ok(draft_with_queries()))
            .push_search(Err(AiError::Provider("rate limited".into())));

        let output = pipeline(model)
            .generate(&UserId::parse("u1").unwrap())
            .await
            .unwrap();

        let GenerationResult::Recommendations { recommendations } = output.result else {
            panic!("expected recommendations");
        };
        let hopkins = &recommendations[0].distinctive_opportunities[0];
        assert_eq!(hopkins.url.as_deref(), Some("https://guess.example"));
        assert!(hopkins.search_query.is_none());
    }

    #[tokio::test]
    async fn draft_failure_and_empty_lists_are_errors() {
        let model = Arc::new(ScriptedModel::new());
        model.push_json(Err(AiError::MalformedOutput("not json".into())));
        assert!(pipeline(model).generate(&UserId::parse("u1").unwrap()).await.is_err());

        let model = Arc::new(ScriptedModel::new());
        model.push_json(Ok(json!({"recommendations": []})));
        let err = pipeline(model).generate(&UserId::parse("u1").unwrap()).await.unwrap_err();
        assert!(matches!(err, AiError::EmptyResult(_)));
    }

    #[tokio::test]
    async fn users_without_answers_get_the_placeholder_context() {
        let model = Arc::new(ScriptedModel::new());
        model.push_json(Ok(json!({"recommendations": [{"name": "Reed College"}]})));

        pipeline(model.clone())
            .generate(&UserId::parse("someone-else").unwrap())
            .await
            .unwrap();

        let completions = model.completions.lock().unwrap();
        assert_eq!(completions[0].messages[1].content, NO_PROFILE_CONTEXT);
        assert!(model.searches.lock().unwrap().is_empty());
    }
}
