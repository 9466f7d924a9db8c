use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a single unit inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Approved,
    Rejected,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Approved => "APPROVED",
            Verdict::Rejected => "REJECTED",
        }
    }

    pub fn parse(raw: &str) -> Option<Verdict> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "APPROVED" => Some(Verdict::Approved),
            "REJECTED" => Some(Verdict::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One defect location on the inspected piece, in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DefectPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectionRecord {
    pub id: Uuid,
    /// Monotonic insertion sequence; breaks ties at equal timestamps.
    pub seq: i64,
    pub verdict: Verdict,
    pub max_deviation: f64,
    pub defect_points: Vec<DefectPoint>,
    pub category: String,
    pub lot_code: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Caller-supplied fields for appending one inspection to the ledger.
#[derive(Debug, Clone)]
pub struct NewInspection {
    pub verdict: Verdict,
    pub max_deviation: f64,
    pub defect_points: Vec<DefectPoint>,
    pub category: String,
    pub lot_code: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertKind {
    DefectRate,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::DefectRate => "DEFECT_RATE",
        }
    }

    pub fn parse(raw: &str) -> Option<AlertKind> {
        match raw {
            "DEFECT_RATE" => Some(AlertKind::DefectRate),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A threshold crossing captured together with the statistics that caused it.
///
/// Created by the alert manager; only the notification dispatcher may flip
/// `notified`, and only from false to true.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub defect_percentage: f64,
    pub total_inspections: i64,
    pub total_rejected: i64,
    /// Threshold in force when the alert was created.
    pub threshold: f64,
    pub recommendation: String,
    pub notified: bool,
    pub created_at: DateTime<Utc>,
}

/// One calendar week of aggregated inspections. Immutable once written;
/// at most one row exists per `week_start`.
#[derive(Debug, Clone, Serialize)]
pub struct WeeklyReport {
    pub id: Uuid,
    /// Always a Monday.
    pub week_start: NaiveDate,
    /// The following Sunday.
    pub week_end: NaiveDate,
    pub total_inspections: i64,
    pub total_rejected: i64,
    pub total_approved: i64,
    pub defect_percentage: f64,
    /// Signed percentage points versus the immediately preceding week.
    pub trend_delta: f64,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_round_trips_through_text() {
        assert_eq!(Verdict::parse("APPROVED"), Some(Verdict::Approved));
        assert_eq!(Verdict::parse("rejected"), Some(Verdict::Rejected));
        assert_eq!(Verdict::parse(" approved "), Some(Verdict::Approved));
        assert_eq!(Verdict::parse("MAYBE"), None);
        assert_eq!(Verdict::Rejected.as_str(), "REJECTED");
    }

    #[test]
    fn alert_kind_round_trips_through_text() {
        assert_eq!(AlertKind::parse("DEFECT_RATE"), Some(AlertKind::DefectRate));
        assert_eq!(AlertKind::parse("OTHER"), None);
        assert_eq!(AlertKind::DefectRate.to_string(), "DEFECT_RATE");
    }
}
