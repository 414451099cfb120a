use serde::{Deserialize, Serialize};

/// Immutable snapshot of how far a running task got.
///
/// `completed_units` never exceeds `total_units` when a total is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "ProgressRepr")]
pub struct Progress {
    completed_units: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_units: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

/// Wire form; goes through the same clamping as [`Progress::of`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressRepr {
    completed_units: u64,
    #[serde(default)]
    total_units: Option<u64>,
    #[serde(default)]
    message: Option<String>,
}

impl From<ProgressRepr> for Progress {
    fn from(raw: ProgressRepr) -> Self {
        let progress = match raw.total_units {
            Some(total) => Progress::of(raw.completed_units, total),
            None => Progress::new(raw.completed_units),
        };
        Self {
            message: raw.message,
            ..progress
        }
    }
}

impl Progress {
    /// Progress with an unknown total.
    pub fn new(completed_units: u64) -> Self {
        Self {
            completed_units,
            total_units: None,
            message: None,
        }
    }

    /// Progress out of a known total; `completed` is clamped to `total`.
    pub fn of(completed: u64, total: u64) -> Self {
        Self {
            completed_units: completed.min(total),
            total_units: Some(total),
            message: None,
        }
    }

    /// Progress expressed as a percentage, bounded to `0..=100`.
    pub fn from_percent(percent: i64) -> Self {
        Self::of(percent.clamp(0, 100) as u64, 100)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn completed_units(&self) -> u64 {
        self.completed_units
    }

    pub fn total_units(&self) -> Option<u64> {
        self.total_units
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Completed share in `0.0..=1.0`, if the total is known and non-zero.
    pub fn fraction(&self) -> Option<f64> {
        match self.total_units {
            Some(0) | None => None,
            Some(total) => Some(self.completed_units as f64 / total as f64),
        }
    }

    /// Completed share as a whole percentage.
    pub fn percent_done(&self) -> Option<u8> {
        self.fraction().map(|f| (f * 100.0).floor() as u8)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.total_units, Some(total) if self.completed_units >= total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_is_clamped_to_total() {
        let p = Progress::of(12, 10);
        assert_eq!(p.completed_units(), 10);
        assert!(p.is_complete());
    }

    #[test]
    fn percent_is_bounded() {
        assert_eq!(Progress::from_percent(-5).completed_units(), 0);
        assert_eq!(Progress::from_percent(250).completed_units(), 100);
        assert_eq!(Progress::from_percent(42).percent_done(), Some(42));
    }

    #[test]
    fn unknown_total_has_no_fraction() {
        let p = Progress::new(7).with_message("scanning");
        assert_eq!(p.fraction(), None);
        assert_eq!(p.percent_done(), None);
        assert!(!p.is_complete());
        assert_eq!(p.message(), Some("scanning"));
    }

    #[test]
    fn zero_total_has_no_fraction() {
        assert_eq!(Progress::of(0, 0).fraction(), None);
    }

    #[test]
    fn percent_done_rounds_down() {
        assert_eq!(Progress::of(1, 3).percent_done(), Some(33));
        assert_eq!(Progress::of(5, 10).percent_done(), Some(50));
    }

    #[test]
    fn optional_fields_are_skipped() {
        let json = serde_json::to_string(&Progress::new(3)).unwrap();
        assert_eq!(json, r#"{"completedUnits":3}"#);

        let back: Progress = serde_json::from_str(r#"{"completedUnits":1,"totalUnits":4}"#).unwrap();
        assert_eq!(back, Progress::of(1, 4));
    }

    #[test]
    fn deserialized_completed_is_clamped() {
        let p: Progress = serde_json::from_str(
            r#"{"completedUnits":1000,"totalUnits":1,"message":"done"}"#,
        )
        .unwrap();
        assert_eq!(p.completed_units(), 1);
        assert_eq!(p.percent_done(), Some(100));
        assert_eq!(p.message(), Some("done"));
    }
}
