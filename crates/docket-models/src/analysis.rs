//! Case-perspective analysis options.

use serde::{Deserialize, Serialize};

/// Options that shape an analysis and therefore its cache key.
///
/// Two analyses of the same content under different perspectives are
/// different results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Which side of the case the review is for (e.g. "plaintiff")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perspective: Option<String>,
    /// Client or party name the reviewer represents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party: Option<String>,
    /// Free-form reviewer instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl AnalysisOptions {
    /// Read options from a job's `options` column; unknown shapes fall back to defaults.
    pub fn from_job_options(value: &serde_json::Value) -> Self {
        if value.is_null() {
            return Self::default();
        }
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_job_options() {
        let opts = AnalysisOptions::from_job_options(&json!({
            "perspective": "defense",
            "party": "Acme Corp"
        }));
        assert_eq!(opts.perspective.as_deref(), Some("defense"));
        assert_eq!(opts.party.as_deref(), Some("Acme Corp"));
        assert!(opts.instructions.is_none());

        assert_eq!(
            AnalysisOptions::from_job_options(&serde_json::Value::Null),
            AnalysisOptions::default()
        );
        assert_eq!(
            AnalysisOptions::from_job_options(&json!([1, 2])),
            AnalysisOptions::default()
        );
    }
}
