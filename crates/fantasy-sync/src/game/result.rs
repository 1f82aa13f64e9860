// Race result records, entered incrementally as athletes finish.

use serde::{Deserialize, Serialize};

/// Where an athlete's race stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    /// No result entered yet.
    #[default]
    Pending,
    Finished,
    /// Did not finish.
    Dnf,
    /// Did not start.
    Dns,
    /// Disqualified.
    Dq,
    /// Any status string this client does not know about.
    #[serde(other)]
    Unknown,
}

/// A single athlete's race result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceResult {
    /// Official finish time as `H:MM:SS`, when finished.
    #[serde(default)]
    pub finish_time: Option<String>,
    #[serde(default)]
    pub status: ResultStatus,
}

impl RaceResult {
    /// A finished result with the given time.
    pub fn finished(finish_time: impl Into<String>) -> Self {
        Self {
            finish_time: Some(finish_time.into()),
            status: ResultStatus::Finished,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_sets_time_and_status() {
        let r = RaceResult::finished("2:05:30");
        assert_eq!(r.finish_time.as_deref(), Some("2:05:30"));
        assert_eq!(r.status, ResultStatus::Finished);
    }

    #[test]
    fn unknown_status_does_not_fail_parsing() {
        let r: RaceResult =
            serde_json::from_str(r#"{"finishTime": null, "status": "provisional"}"#).unwrap();
        assert_eq!(r.status, ResultStatus::Unknown);
    }

    #[test]
    fn status_defaults_to_pending() {
        let r: RaceResult = serde_json::from_str("{}").unwrap();
        assert_eq!(r.status, ResultStatus::Pending);
        assert!(r.finish_time.is_none());
    }
}
