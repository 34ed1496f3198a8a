use std::collections::{BTreeSet, HashMap, HashSet};

use serde_json::Value;

use crate::model::AnalysisResult;

/// Difference between two consecutive rounds, as reported by the service.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ComparisonReport {
    pub previous_iteration: u32,
    pub current_iteration: u32,
    pub previous_score: f64,
    pub current_score: f64,
    pub score_delta: f64,
    #[serde(default)]
    pub improved_dimensions: BTreeSet<String>,
    #[serde(default)]
    pub regressed_dimensions: BTreeSet<String>,
    #[serde(default)]
    pub resolved_issues: BTreeSet<String>,
    #[serde(default)]
    pub new_issues: BTreeSet<String>,
}

impl ComparisonReport {
    /// Derives a report locally from two results.
    ///
    /// A dimension missing from `previous` counts as improved when it scores
    /// above 0 and regressed when it scores below 100.
    pub fn derive(previous: &AnalysisResult, current: &AnalysisResult) -> Self {
        let previous_dims: HashMap<&str, f64> = previous
            .dimensions
            .iter()
            .map(|d| (d.name.as_str(), d.score))
            .collect();

        let mut improved_dimensions = BTreeSet::new();
        let mut regressed_dimensions = BTreeSet::new();
        for dim in &current.dimensions {
            let before = previous_dims.get(dim.name.as_str()).copied();
            if dim.score > before.unwrap_or(0.0) {
                improved_dimensions.insert(dim.name.clone());
            }
            if dim.score < before.unwrap_or(100.0) {
                regressed_dimensions.insert(dim.name.clone());
            }
        }

        let previous_issues: HashSet<&str> = previous.issues.iter().map(|i| i.id.as_str()).collect();
        let current_issues: HashSet<&str> = current.issues.iter().map(|i| i.id.as_str()).collect();

        Self {
            previous_iteration: previous.iteration_number,
            current_iteration: current.iteration_number,
            previous_score: previous.overall_score,
            current_score: current.overall_score,
            score_delta: current.overall_score - previous.overall_score,
            improved_dimensions,
            regressed_dimensions,
            resolved_issues: previous_issues
                .difference(&current_issues)
                .map(|id| id.to_string())
                .collect(),
            new_issues: current_issues
                .difference(&previous_issues)
                .map(|id| id.to_string())
                .collect(),
        }
    }

    /// True when the report links `round_index - 1` to `round_index`.
    pub fn matches_round(&self, round_index: u32) -> bool {
        round_index >= 2
            && self.current_iteration == round_index
            && self.previous_iteration == round_index - 1
    }
}

/// Keeps a service-supplied comparison only when it decodes and describes
/// the round being committed.
///
/// Anything else is logged and dropped; the round itself stays valid.
pub fn reconcile(raw: Option<Value>, round_index: u32) -> Option<ComparisonReport> {
    let report: ComparisonReport = match serde_json::from_value(raw?) {
        Ok(report) => report,
        Err(err) => {
            tracing::warn!(round_index, error = %err, "discarding undecodable comparison");
            return None;
        }
    };
    if report.matches_round(round_index) {
        return Some(report);
    }
    tracing::warn!(
        round_index,
        previous_iteration = report.previous_iteration,
        current_iteration = report.current_iteration,
        "discarding comparison with inconsistent iteration indices"
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DimensionScore, Issue, Severity};

    fn result(iteration: u32, score: f64, dims: &[(&str, f64)], issues: &[&str]) -> AnalysisResult {
        AnalysisResult {
            artifact_type: Default::default(),
            overall_score: score,
            dimensions: dims
                .iter()
                .map(|(name, score)| DimensionScore {
                    name: name.to_string(),
                    score: *score,
                    findings: Vec::new(),
                    severity: Severity::Info,
                })
                .collect(),
            issues: issues
                .iter()
                .map(|id| Issue {
                    id: id.to_string(),
                    dimension: String::new(),
                    severity: Severity::Warning,
                    description: String::new(),
                    location: String::new(),
                    recommendation: String::new(),
                })
                .collect(),
            suggestions: Vec::new(),
            iteration_number: iteration,
        }
    }

    fn report(previous: u32, current: u32) -> Value {
        serde_json::to_value(ComparisonReport {
            previous_iteration: previous,
            current_iteration: current,
            previous_score: 55.0,
            current_score: 78.0,
            score_delta: 23.0,
            improved_dimensions: BTreeSet::new(),
            regressed_dimensions: BTreeSet::new(),
            resolved_issues: BTreeSet::new(),
            new_issues: BTreeSet::new(),
        })
        .expect("encode")
    }

    #[test]
    fn derive_classifies_dimensions_and_issues() {
        let prev = result(1, 55.0, &[("clarity", 50.0), ("testability", 60.0)], &["I1", "I2"]);
        let curr = result(
            2,
            78.0,
            &[("clarity", 80.0), ("testability", 40.0), ("traceability", 70.0)],
            &["I2", "I3"],
        );
        let report = ComparisonReport::derive(&prev, &curr);
        assert_eq!(report.score_delta, 23.0);
        assert_eq!(
            report.improved_dimensions.iter().collect::<Vec<_>>(),
            vec!["clarity", "traceability"]
        );
        assert_eq!(
            report.regressed_dimensions.iter().collect::<Vec<_>>(),
            vec!["testability", "traceability"]
        );
        assert_eq!(report.resolved_issues.iter().collect::<Vec<_>>(), vec!["I1"]);
        assert_eq!(report.new_issues.iter().collect::<Vec<_>>(), vec!["I3"]);
    }

    #[test]
    fn reconcile_keeps_matching_report() {
        assert!(reconcile(Some(report(1, 2)), 2).is_some());
        assert!(reconcile(None, 2).is_none());
    }

    #[test]
    fn reconcile_drops_mismatched_report() {
        assert!(reconcile(Some(report(1, 3)), 2).is_none());
        assert!(reconcile(Some(report(2, 2)), 2).is_none());
        assert!(reconcile(Some(report(0, 1)), 1).is_none());
    }

    #[test]
    fn reconcile_drops_report_that_does_not_decode() {
        let partial = serde_json::json!({"previous_iteration": 1, "current_iteration": 2});
        assert!(reconcile(Some(partial), 2).is_none());
        assert!(reconcile(Some(serde_json::json!("n/a")), 2).is_none());
    }
}
