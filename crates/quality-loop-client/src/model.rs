use crate::comparison::ComparisonReport;

/// Kind of document under analysis.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    RequirementsDocument,
    BusinessProcess,
    UserStory,
    UseCase,
    #[default]
    Unknown,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

/// Score for one quality dimension.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DimensionScore {
    pub name: String,
    pub score: f64,
    #[serde(default)]
    pub findings: Vec<String>,
    #[serde(default)]
    pub severity: Severity,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Issue {
    pub id: String,
    #[serde(default)]
    pub dimension: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub recommendation: String,
}

/// A proposed text replacement the user may accept.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Suggestion {
    pub id: String,
    #[serde(default)]
    pub original_text: String,
    #[serde(default)]
    pub suggested_text: String,
    #[serde(default)]
    pub rationale: String,
}

/// Terminal result of one analysis.
///
/// Only `overall_score` is required; everything else defaults so partial
/// payloads from the service still decode.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub artifact_type: ArtifactType,
    pub overall_score: f64,
    #[serde(default)]
    pub dimensions: Vec<DimensionScore>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
    #[serde(default = "first_iteration")]
    pub iteration_number: u32,
}

fn first_iteration() -> u32 {
    1
}

/// `complete` payload of a session round.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionRoundPayload {
    pub result: AnalysisResult,
    /// Left undecoded so a broken comparison cannot take the round down with it.
    #[serde(default)]
    pub comparison: Option<serde_json::Value>,
    #[serde(default)]
    pub is_ready: Option<bool>,
}

/// Body of `POST /api/analyse`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AnalyseRequest {
    pub artifact_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<ArtifactType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

impl AnalyseRequest {
    pub fn new(artifact_text: impl Into<String>) -> Self {
        Self {
            artifact_text: artifact_text.into(),
            artifact_type: None,
            threshold: None,
        }
    }

    pub fn artifact_type(mut self, artifact_type: ArtifactType) -> Self {
        self.artifact_type = Some(artifact_type);
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub(crate) struct CreateSessionRequest<'a> {
    pub artifact_text: &'a str,
    pub threshold: f64,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub(crate) struct ApplySuggestionsRequest<'a> {
    pub accepted_suggestion_ids: &'a [String],
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub(crate) struct ArtifactBody<'a> {
    pub artifact_text: &'a str,
}

/// Response of the suggestion-application and artifact-update endpoints.
#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
pub(crate) struct ArtifactResponse {
    pub artifact_text: String,
}

/// Server-side session as returned by `POST /api/sessions`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RemoteSession {
    pub id: String,
    pub threshold: f64,
}

/// One `{iteration, score}` entry of a session summary.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScorePoint {
    pub iteration: u32,
    pub score: f64,
}

/// Server-side view returned by `GET /api/sessions/{id}`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub threshold: f64,
    #[serde(default)]
    pub iterations: u32,
    #[serde(default)]
    pub artifact_text: String,
    #[serde(default)]
    pub latest_result: Option<AnalysisResult>,
    #[serde(default)]
    pub history: Vec<ScorePoint>,
}

/// Listing entry from `GET /api/sessions`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionListing {
    pub id: String,
    #[serde(default)]
    pub iterations: u32,
    #[serde(default)]
    pub latest_score: Option<f64>,
    pub threshold: f64,
}

/// Response of `POST /api/detect-type`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DetectedType {
    pub artifact_type: ArtifactType,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub(crate) struct CompareRequest<'a> {
    pub artifact_text_1: &'a str,
    pub artifact_text_2: &'a str,
}

/// `complete` payload of a side-by-side comparison stream.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CompareOutcome {
    pub result_1: AnalysisResult,
    pub result_2: AnalysisResult,
    pub comparison: ComparisonReport,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UserStory {
    pub id: String,
    #[serde(default)]
    pub epic: String,
    pub title: String,
    #[serde(default)]
    pub persona: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub benefit: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// MoSCoW label: `Must`, `Should`, `Could` or `Won't`.
    #[serde(default)]
    pub priority: String,
    /// T-shirt size: `S`, `M`, `L` or `XL`.
    #[serde(default)]
    pub estimate_complexity: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub source_requirement_ids: Vec<String>,
}

/// How many extracted requirements the generated stories cover.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CoverageReport {
    pub total_requirements: u32,
    pub covered_requirements: u32,
    #[serde(default)]
    pub uncovered_requirements: Vec<String>,
    pub coverage_percentage: f64,
}

/// `complete` payload of a story generation stream.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StoryGeneration {
    pub stories: Vec<UserStory>,
    pub coverage: CoverageReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_round_payload_decodes_with_defaults() {
        let payload: SessionRoundPayload = serde_json::from_value(serde_json::json!({
            "result": {"iteration_number": 1, "overall_score": 55}
        }))
        .expect("decode");
        assert_eq!(payload.result.overall_score, 55.0);
        assert_eq!(payload.result.artifact_type, ArtifactType::Unknown);
        assert!(payload.comparison.is_none());
        assert!(payload.is_ready.is_none());
    }

    #[test]
    fn full_result_decodes_wire_names() {
        let result: AnalysisResult = serde_json::from_value(serde_json::json!({
            "artifact_type": "requirements_document",
            "overall_score": 72.5,
            "dimensions": [{"name": "clarity", "score": 70, "findings": [], "severity": "WARNING"}],
            "issues": [{"id": "ISS-1", "dimension": "clarity", "severity": "CRITICAL",
                        "description": "d", "location": "l", "recommendation": "r"}],
            "suggestions": [{"id": "SUG-1", "original_text": "a", "suggested_text": "b", "rationale": "c"}],
            "iteration_number": 2
        }))
        .expect("decode");
        assert_eq!(result.artifact_type, ArtifactType::RequirementsDocument);
        assert_eq!(result.dimensions[0].severity, Severity::Warning);
        assert_eq!(result.issues[0].severity, Severity::Critical);
        assert_eq!(result.iteration_number, 2);
    }

    #[test]
    fn analyse_request_omits_unset_fields() {
        let body = serde_json::to_value(AnalyseRequest::new("text")).expect("encode");
        assert_eq!(body, serde_json::json!({"artifact_text": "text"}));
        let body = serde_json::to_value(
            AnalyseRequest::new("text")
                .artifact_type(ArtifactType::UserStory)
                .threshold(75.0),
        )
        .expect("encode");
        assert_eq!(body["artifact_type"], "user_story");
        assert_eq!(body["threshold"], 75.0);
    }

    #[test]
    fn story_generation_decodes_with_sparse_stories() {
        let generated: StoryGeneration = serde_json::from_value(serde_json::json!({
            "stories": [{"id": "US-001", "title": "Export reports", "priority": "Must",
                         "acceptance_criteria": ["Given a report, when exported, then CSV is produced"]}],
            "coverage": {"total_requirements": 4, "covered_requirements": 3,
                         "uncovered_requirements": ["REQ-4"], "coverage_percentage": 75.0}
        }))
        .expect("decode");
        assert_eq!(generated.stories[0].priority, "Must");
        assert!(generated.stories[0].dependencies.is_empty());
        assert_eq!(generated.coverage.uncovered_requirements, vec!["REQ-4"]);
    }

    #[test]
    fn session_listing_allows_missing_score() {
        let listing: Vec<SessionListing> = serde_json::from_value(serde_json::json!([
            {"id": "a1", "iterations": 0, "latest_score": null, "threshold": 80.0},
            {"id": "b2", "iterations": 2, "latest_score": 78.5, "threshold": 75.0}
        ]))
        .expect("decode");
        assert_eq!(listing[0].latest_score, None);
        assert_eq!(listing[1].latest_score, Some(78.5));
    }
}
