use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{
    Alert, AlertKind, DefectPoint, InspectionRecord, NewInspection, Verdict, WeeklyReport,
};
use crate::rate::DefectStats;

pub async fn init_db(pool: &PgPool) -> Result<(), EngineError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn inspection_from_row(row: &PgRow) -> Result<InspectionRecord, EngineError> {
    let raw_verdict: String = row.get("verdict");
    let verdict = Verdict::parse(&raw_verdict).ok_or_else(|| {
        EngineError::CorruptRow(format!("unknown verdict {raw_verdict:?}"))
    })?;
    let points: Json<Vec<DefectPoint>> = row.get("defect_points");

    Ok(InspectionRecord {
        id: row.get("id"),
        seq: row.get("seq"),
        verdict,
        max_deviation: row.get("max_deviation"),
        defect_points: points.0,
        category: row.get("category"),
        lot_code: row.get("lot_code"),
        recorded_at: row.get("recorded_at"),
    })
}

/// Appends one inspection outcome to the ledger.
pub async fn record_inspection(
    pool: &PgPool,
    new: &NewInspection,
) -> Result<InspectionRecord, EngineError> {
    let id = Uuid::new_v4();
    let row = sqlx::query(
        r#"
        INSERT INTO defect_early_warning.inspections
        (id, verdict, max_deviation, defect_points, category, lot_code, recorded_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING seq
        "#,
    )
    .bind(id)
    .bind(new.verdict.as_str())
    .bind(new.max_deviation)
    .bind(Json(&new.defect_points))
    .bind(&new.category)
    .bind(&new.lot_code)
    .bind(new.recorded_at)
    .fetch_one(pool)
    .await?;

    Ok(InspectionRecord {
        id,
        seq: row.get("seq"),
        verdict: new.verdict,
        max_deviation: new.max_deviation,
        defect_points: new.defect_points.clone(),
        category: new.category.clone(),
        lot_code: new.lot_code.clone(),
        recorded_at: new.recorded_at,
    })
}

/// The `n` most recent inspections, newest first. Ties at identical
/// timestamps fall back to insertion order so window membership is
/// deterministic.
pub async fn recent_inspections(
    pool: &PgPool,
    n: i64,
) -> Result<Vec<InspectionRecord>, EngineError> {
    let rows = sqlx::query(
        r#"
        SELECT id, seq, verdict, max_deviation, defect_points, category, lot_code, recorded_at
        FROM defect_early_warning.inspections
        ORDER BY recorded_at DESC, seq DESC
        LIMIT $1
        "#,
    )
    .bind(n)
    .fetch_all(pool)
    .await?;

    rows.iter().map(inspection_from_row).collect()
}

/// Inspections recorded in `[start, end_exclusive)`.
pub async fn inspections_between(
    pool: &PgPool,
    start: DateTime<Utc>,
    end_exclusive: DateTime<Utc>,
) -> Result<Vec<InspectionRecord>, EngineError> {
    let rows = sqlx::query(
        r#"
        SELECT id, seq, verdict, max_deviation, defect_points, category, lot_code, recorded_at
        FROM defect_early_warning.inspections
        WHERE recorded_at >= $1 AND recorded_at < $2
        ORDER BY recorded_at ASC, seq ASC
        "#,
    )
    .bind(start)
    .bind(end_exclusive)
    .fetch_all(pool)
    .await?;

    rows.iter().map(inspection_from_row).collect()
}

pub async fn import_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
) -> Result<usize, EngineError> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        verdict: String,
        max_deviation: f64,
        defect_points: Option<String>,
        category: Option<String>,
        lot_code: Option<String>,
        recorded_at: Option<DateTime<Utc>>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let verdict = Verdict::parse(&row.verdict).ok_or_else(|| {
            EngineError::CorruptRow(format!("unknown verdict {:?} in csv", row.verdict))
        })?;
        let points: Vec<DefectPoint> = match row.defect_points.as_deref() {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw)?,
            _ => Vec::new(),
        };
        let new = NewInspection {
            verdict,
            max_deviation: row.max_deviation,
            defect_points: points,
            category: row.category.unwrap_or_else(|| "Excluded".to_string()),
            lot_code: row.lot_code,
            recorded_at: row.recorded_at.unwrap_or_else(Utc::now),
        };
        record_inspection(pool, &new).await?;
        inserted += 1;
    }

    Ok(inserted)
}

pub async fn seed(pool: &PgPool) -> Result<(), EngineError> {
    let now = Utc::now();
    let samples = vec![
        (
            "8c1f6a02-55d1-4f28-9f10-1a2b3c4d5e01",
            Verdict::Approved,
            0.0,
            "[]",
            "Excluded",
            Some("LT-0001"),
            30,
        ),
        (
            "8c1f6a02-55d1-4f28-9f10-1a2b3c4d5e02",
            Verdict::Approved,
            0.4,
            "[]",
            "Excluded",
            Some("LT-0001"),
            28,
        ),
        (
            "8c1f6a02-55d1-4f28-9f10-1a2b3c4d5e03",
            Verdict::Rejected,
            5.8,
            r#"[{"x": 142.0, "y": 381.5}, {"x": 150.25, "y": 388.0}]"#,
            "Incomplete cut",
            Some("LT-0001"),
            26,
        ),
        (
            "8c1f6a02-55d1-4f28-9f10-1a2b3c4d5e04",
            Verdict::Approved,
            0.9,
            "[]",
            "Excluded",
            Some("LT-0002"),
            20,
        ),
        (
            "8c1f6a02-55d1-4f28-9f10-1a2b3c4d5e05",
            Verdict::Rejected,
            3.1,
            r#"[{"x": 87.0, "y": 40.0}]"#,
            "Overheating",
            Some("LT-0002"),
            16,
        ),
        (
            "8c1f6a02-55d1-4f28-9f10-1a2b3c4d5e06",
            Verdict::Approved,
            1.2,
            "[]",
            "Excluded",
            Some("LT-0002"),
            12,
        ),
        (
            "8c1f6a02-55d1-4f28-9f10-1a2b3c4d5e07",
            Verdict::Approved,
            0.0,
            "[]",
            "Excluded",
            None,
            8,
        ),
        (
            "8c1f6a02-55d1-4f28-9f10-1a2b3c4d5e08",
            Verdict::Rejected,
            7.6,
            r#"[{"x": 310.0, "y": 12.5}, {"x": 305.5, "y": 18.0}, {"x": 298.0, "y": 25.75}]"#,
            "Incomplete cut",
            Some("LT-0003"),
            4,
        ),
        (
            "8c1f6a02-55d1-4f28-9f10-1a2b3c4d5e09",
            Verdict::Approved,
            0.7,
            "[]",
            "Excluded",
            Some("LT-0003"),
            2,
        ),
        (
            "8c1f6a02-55d1-4f28-9f10-1a2b3c4d5e10",
            Verdict::Approved,
            0.3,
            "[]",
            "Excluded",
            Some("LT-0003"),
            1,
        ),
    ];

    for (id, verdict, max_deviation, points, category, lot_code, hours_ago) in samples {
        sqlx::query(
            r#"
            INSERT INTO defect_early_warning.inspections
            (id, verdict, max_deviation, defect_points, category, lot_code, recorded_at)
            VALUES ($1, $2, $3, $4::jsonb, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(Uuid::parse_str(id)?)
        .bind(verdict.as_str())
        .bind(max_deviation)
        .bind(points)
        .bind(category)
        .bind(lot_code)
        .bind(now - Duration::hours(hours_ago))
        .execute(pool)
        .await?;
    }

    Ok(())
}

fn alert_from_row(row: &PgRow) -> Result<Alert, EngineError> {
    let raw_kind: String = row.get("alert_kind");
    let kind = AlertKind::parse(&raw_kind)
        .ok_or_else(|| EngineError::CorruptRow(format!("unknown alert kind {raw_kind:?}")))?;

    Ok(Alert {
        id: row.get("id"),
        kind,
        defect_percentage: row.get("defect_percentage"),
        total_inspections: row.get("total_inspections"),
        total_rejected: row.get("total_rejected"),
        threshold: row.get("threshold"),
        recommendation: row.get("recommendation"),
        notified: row.get("notified"),
        created_at: row.get("created_at"),
    })
}

/// Result of the atomic cooldown-check-and-insert.
#[derive(Debug)]
pub enum AlertInsert {
    Created(Alert),
    /// An alert of this kind already exists inside the cooldown horizon.
    RecentExists(Uuid),
}

/// Inserts a new alert unless one of the same kind was created within the
/// cooldown horizon.
///
/// The recency check and the insert run in one transaction holding a
/// per-kind advisory lock, so concurrent evaluations cannot both insert.
pub async fn insert_alert_if_quiet(
    pool: &PgPool,
    kind: AlertKind,
    stats: &DefectStats,
    recommendation: &str,
    cooldown: Duration,
) -> Result<AlertInsert, EngineError> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(kind.as_str())
        .execute(&mut *tx)
        .await?;

    let now = Utc::now();
    let cutoff = now - cooldown;

    let recent = sqlx::query(
        r#"
        SELECT id FROM defect_early_warning.alerts
        WHERE alert_kind = $1 AND created_at >= $2
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(kind.as_str())
    .bind(cutoff)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(row) = recent {
        tx.commit().await?;
        return Ok(AlertInsert::RecentExists(row.get("id")));
    }

    let alert = Alert {
        id: Uuid::new_v4(),
        kind,
        defect_percentage: stats.defect_percentage,
        total_inspections: stats.total_inspections,
        total_rejected: stats.total_rejected,
        threshold: stats.threshold,
        recommendation: recommendation.to_string(),
        notified: false,
        created_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO defect_early_warning.alerts
        (id, alert_kind, defect_percentage, total_inspections, total_rejected,
         threshold, recommendation, notified, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(alert.id)
    .bind(alert.kind.as_str())
    .bind(alert.defect_percentage)
    .bind(alert.total_inspections)
    .bind(alert.total_rejected)
    .bind(alert.threshold)
    .bind(&alert.recommendation)
    .bind(alert.notified)
    .bind(alert.created_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(AlertInsert::Created(alert))
}

/// Alerts whose notification has not yet been delivered, oldest first.
pub async fn unnotified_alerts(pool: &PgPool) -> Result<Vec<Alert>, EngineError> {
    let rows = sqlx::query(
        r#"
        SELECT id, alert_kind, defect_percentage, total_inspections, total_rejected,
               threshold, recommendation, notified, created_at
        FROM defect_early_warning.alerts
        WHERE notified = FALSE
        ORDER BY created_at ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(alert_from_row).collect()
}

/// Most recent alerts, newest first.
pub async fn alert_history(pool: &PgPool, limit: i64) -> Result<Vec<Alert>, EngineError> {
    let rows = sqlx::query(
        r#"
        SELECT id, alert_kind, defect_percentage, total_inspections, total_rejected,
               threshold, recommendation, notified, created_at
        FROM defect_early_warning.alerts
        ORDER BY created_at DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(alert_from_row).collect()
}

pub async fn get_alert(pool: &PgPool, id: Uuid) -> Result<Option<Alert>, EngineError> {
    let row = sqlx::query(
        r#"
        SELECT id, alert_kind, defect_percentage, total_inspections, total_rejected,
               threshold, recommendation, notified, created_at
        FROM defect_early_warning.alerts
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(alert_from_row).transpose()
}

/// Marks an alert as notified. Idempotent: re-marking an already-notified
/// alert succeeds without changing anything. Returns false when no alert
/// with this id exists.
pub async fn mark_alert_notified(pool: &PgPool, id: Uuid) -> Result<bool, EngineError> {
    let result = sqlx::query(
        "UPDATE defect_early_warning.alerts SET notified = TRUE WHERE id = $1",
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn report_from_row(row: &PgRow) -> WeeklyReport {
    WeeklyReport {
        id: row.get("id"),
        week_start: row.get("week_start"),
        week_end: row.get("week_end"),
        total_inspections: row.get("total_inspections"),
        total_rejected: row.get("total_rejected"),
        total_approved: row.get("total_approved"),
        defect_percentage: row.get("defect_percentage"),
        trend_delta: row.get("trend_delta"),
        generated_at: row.get("generated_at"),
    }
}

pub async fn find_weekly_report(
    pool: &PgPool,
    week_start: NaiveDate,
) -> Result<Option<WeeklyReport>, EngineError> {
    let row = sqlx::query(
        r#"
        SELECT id, week_start, week_end, total_inspections, total_rejected,
               total_approved, defect_percentage, trend_delta, generated_at
        FROM defect_early_warning.weekly_reports
        WHERE week_start = $1
        "#,
    )
    .bind(week_start)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(report_from_row))
}

/// Returns false when a report for this week_start already exists; the
/// unique index makes the idempotence hold under concurrent generation.
pub async fn insert_weekly_report(
    pool: &PgPool,
    report: &WeeklyReport,
) -> Result<bool, EngineError> {
    let result = sqlx::query(
        r#"
        INSERT INTO defect_early_warning.weekly_reports
        (id, week_start, week_end, total_inspections, total_rejected,
         total_approved, defect_percentage, trend_delta, generated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (week_start) DO NOTHING
        "#,
    )
    .bind(report.id)
    .bind(report.week_start)
    .bind(report.week_end)
    .bind(report.total_inspections)
    .bind(report.total_rejected)
    .bind(report.total_approved)
    .bind(report.defect_percentage)
    .bind(report.trend_delta)
    .bind(report.generated_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
