//! Defect-rate computation over a window of inspection outcomes.

use serde::Serialize;

use crate::models::{InspectionRecord, Verdict};

/// Pass/fail statistics for one evaluated window.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DefectStats {
    pub total_inspections: i64,
    pub total_rejected: i64,
    pub total_approved: i64,
    /// `100 * rejected / total`, rounded to two decimals; 0.0 for an empty
    /// window.
    pub defect_percentage: f64,
    pub threshold: f64,
    /// Strict greater-than against the configured threshold.
    pub exceeds_threshold: bool,
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn defect_percentage(rejected: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round2(rejected as f64 * 100.0 / total as f64)
    }
}

/// An empty window is a defined zero-valued, non-exceeding result, not an
/// error.
pub fn compute_stats(records: &[InspectionRecord], threshold: f64) -> DefectStats {
    let total = records.len() as i64;
    let rejected = records
        .iter()
        .filter(|r| r.verdict == Verdict::Rejected)
        .count() as i64;
    let percentage = defect_percentage(rejected, total);

    DefectStats {
        total_inspections: total,
        total_rejected: rejected,
        total_approved: total - rejected,
        defect_percentage: percentage,
        threshold,
        exceeds_threshold: percentage > threshold,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::models::DefectPoint;

    fn inspection(seq: i64, verdict: Verdict) -> InspectionRecord {
        InspectionRecord {
            id: Uuid::new_v4(),
            seq,
            verdict,
            max_deviation: if verdict == Verdict::Rejected { 4.2 } else { 0.0 },
            defect_points: if verdict == Verdict::Rejected {
                vec![DefectPoint { x: 100.0, y: 200.0 }]
            } else {
                Vec::new()
            },
            category: "Excluded".to_string(),
            lot_code: None,
            recorded_at: Utc::now(),
        }
    }

    fn window(rejected: usize, approved: usize) -> Vec<InspectionRecord> {
        let mut records = Vec::new();
        for i in 0..rejected {
            records.push(inspection(i as i64, Verdict::Rejected));
        }
        for i in 0..approved {
            records.push(inspection((rejected + i) as i64, Verdict::Approved));
        }
        records
    }

    #[test]
    fn empty_window_is_zero_and_not_exceeding() {
        let stats = compute_stats(&[], 5.0);
        assert_eq!(stats.total_inspections, 0);
        assert_eq!(stats.total_rejected, 0);
        assert_eq!(stats.total_approved, 0);
        assert_eq!(stats.defect_percentage, 0.0);
        assert!(!stats.exceeds_threshold);
    }

    #[test]
    fn percentage_is_rounded_to_two_decimals() {
        let stats = compute_stats(&window(1, 2), 5.0);
        assert_eq!(stats.defect_percentage, 33.33);

        let stats = compute_stats(&window(2, 1), 5.0);
        assert_eq!(stats.defect_percentage, 66.67);
    }

    #[test]
    fn seven_of_ten_rejected_is_seventy_percent() {
        let stats = compute_stats(&window(7, 3), 5.0);
        assert_eq!(stats.total_inspections, 10);
        assert_eq!(stats.total_rejected, 7);
        assert_eq!(stats.total_approved, 3);
        assert_eq!(stats.defect_percentage, 70.0);
        assert!(stats.exceeds_threshold);
    }

    #[test]
    fn threshold_comparison_is_strict() {
        // 1 of 20 rejected = exactly 5.0%
        let stats = compute_stats(&window(1, 19), 5.0);
        assert_eq!(stats.defect_percentage, 5.0);
        assert!(!stats.exceeds_threshold);

        let stats = compute_stats(&window(1, 19), 4.99);
        assert!(stats.exceeds_threshold);
    }
}
