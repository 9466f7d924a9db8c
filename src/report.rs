//! Weekly quality reports with trend versus the prior week.

use std::fmt::Write;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db;
use crate::error::EngineError;
use crate::models::{Alert, Verdict, WeeklyReport};
use crate::rate;

/// Monday-aligned bounds of the calendar week containing `day`.
pub fn week_bounds(day: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = day - Duration::days(i64::from(day.weekday().num_days_from_monday()));
    (monday, monday + Duration::days(6))
}

/// Instant range covering one week: `[monday 00:00, next monday 00:00)`.
/// Half-open, so adjacent weeks cannot overlap.
fn week_range(monday: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = monday.and_time(NaiveTime::MIN).and_utc();
    let end = (monday + Duration::days(7)).and_time(NaiveTime::MIN).and_utc();
    (start, end)
}

fn count_rejected(records: &[crate::models::InspectionRecord]) -> i64 {
    records
        .iter()
        .filter(|r| r.verdict == Verdict::Rejected)
        .count() as i64
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportOutcome {
    pub generated: bool,
    pub report: WeeklyReport,
}

/// Generates at most one report per calendar week.
pub struct WeeklyReportGenerator {
    pool: PgPool,
}

impl WeeklyReportGenerator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Generates the current week's report unless it already exists. The
    /// existing report is returned untouched in that case.
    pub async fn generate_if_due(&self) -> Result<ReportOutcome, EngineError> {
        self.generate_for(Utc::now().date_naive()).await
    }

    /// Targets the week containing `day`; split out so a backfill or a test
    /// can address an explicit week.
    pub async fn generate_for(&self, day: NaiveDate) -> Result<ReportOutcome, EngineError> {
        let (week_start, week_end) = week_bounds(day);

        if let Some(existing) = db::find_weekly_report(&self.pool, week_start).await? {
            return Ok(ReportOutcome {
                generated: false,
                report: existing,
            });
        }

        let (start, end) = week_range(week_start);
        let current = db::inspections_between(&self.pool, start, end).await?;

        let (prev_start, prev_end) = week_range(week_start - Duration::days(7));
        let previous = db::inspections_between(&self.pool, prev_start, prev_end).await?;

        let total = current.len() as i64;
        let rejected = count_rejected(&current);
        let percentage = rate::defect_percentage(rejected, total);

        // A week with no prior inspections compares against 0.0, so the
        // trend equals the current percentage.
        let previous_percentage =
            rate::defect_percentage(count_rejected(&previous), previous.len() as i64);
        let trend_delta = rate::round2(percentage - previous_percentage);

        let report = WeeklyReport {
            id: Uuid::new_v4(),
            week_start,
            week_end,
            total_inspections: total,
            total_rejected: rejected,
            total_approved: total - rejected,
            defect_percentage: percentage,
            trend_delta,
            generated_at: Utc::now(),
        };

        if db::insert_weekly_report(&self.pool, &report).await? {
            tracing::info!(
                week_start = %week_start,
                defect_percentage = percentage,
                trend_delta,
                "weekly report generated"
            );
            Ok(ReportOutcome {
                generated: true,
                report,
            })
        } else {
            // Lost a concurrent race; the winner's row is authoritative.
            let existing = db::find_weekly_report(&self.pool, week_start)
                .await?
                .unwrap_or(report);
            Ok(ReportOutcome {
                generated: false,
                report: existing,
            })
        }
    }

}

/// Markdown rendering of a weekly report plus recent alert history.
pub fn render_markdown(report: &WeeklyReport, recent_alerts: &[Alert]) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Weekly Quality Report");
    let _ = writeln!(
        output,
        "Week {} to {} (generated {})",
        report.week_start,
        report.week_end,
        report.generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Inspection Totals");
    let _ = writeln!(output, "- Inspections: {}", report.total_inspections);
    let _ = writeln!(output, "- Approved: {}", report.total_approved);
    let _ = writeln!(output, "- Rejected: {}", report.total_rejected);
    let _ = writeln!(
        output,
        "- Defect rate: {:.2}% ({:+.2} points vs prior week)",
        report.defect_percentage, report.trend_delta
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Alerts");

    if recent_alerts.is_empty() {
        let _ = writeln!(output, "No alerts on record.");
    } else {
        for alert in recent_alerts {
            let _ = writeln!(
                output,
                "- {} — {:.2}% over threshold {:.2}%, notified: {}",
                alert.created_at.format("%Y-%m-%d %H:%M"),
                alert.defect_percentage,
                alert.threshold,
                if alert.notified { "yes" } else { "no" }
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertKind;

    #[test]
    fn week_bounds_align_to_monday() {
        // 2026-02-04 is a Wednesday.
        let (start, end) = week_bounds(NaiveDate::from_ymd_opt(2026, 2, 4).unwrap());
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 2, 2).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 2, 8).unwrap());
    }

    #[test]
    fn week_bounds_of_a_monday_start_that_day() {
        let monday = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();
        let (start, end) = week_bounds(monday);
        assert_eq!(start, monday);
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 2, 8).unwrap());
    }

    #[test]
    fn week_bounds_of_a_sunday_reach_back_to_monday() {
        let sunday = NaiveDate::from_ymd_opt(2026, 2, 8).unwrap();
        let (start, end) = week_bounds(sunday);
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 2, 2).unwrap());
        assert_eq!(end, sunday);
    }

    #[test]
    fn week_range_is_half_open_and_seven_days_long() {
        let monday = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();
        let (start, end) = week_range(monday);
        assert_eq!(end - start, Duration::days(7));
        let (next_start, _) = week_range(monday + Duration::days(7));
        assert_eq!(end, next_start);
    }

    #[test]
    fn trend_against_an_empty_week_equals_the_current_percentage() {
        let current = rate::defect_percentage(5, 10);
        let previous = rate::defect_percentage(0, 0);
        assert_eq!(rate::round2(current - previous), 50.0);
    }

    fn sample_report() -> WeeklyReport {
        WeeklyReport {
            id: Uuid::new_v4(),
            week_start: NaiveDate::from_ymd_opt(2026, 2, 2).unwrap(),
            week_end: NaiveDate::from_ymd_opt(2026, 2, 8).unwrap(),
            total_inspections: 40,
            total_rejected: 6,
            total_approved: 34,
            defect_percentage: 15.0,
            trend_delta: -3.5,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn markdown_report_covers_totals_and_trend() {
        let output = render_markdown(&sample_report(), &[]);
        assert!(output.contains("# Weekly Quality Report"));
        assert!(output.contains("- Inspections: 40"));
        assert!(output.contains("15.00% (-3.50 points vs prior week)"));
        assert!(output.contains("No alerts on record."));
    }

    #[test]
    fn markdown_report_lists_alerts() {
        let alert = Alert {
            id: Uuid::new_v4(),
            kind: AlertKind::DefectRate,
            defect_percentage: 22.5,
            total_inspections: 80,
            total_rejected: 18,
            threshold: 5.0,
            recommendation: "Halt production immediately.".to_string(),
            notified: true,
            created_at: Utc::now(),
        };
        let output = render_markdown(&sample_report(), &[alert]);
        assert!(output.contains("22.50%"));
        assert!(output.contains("notified: yes"));
    }
}
