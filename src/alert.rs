//! Alert evaluation: windowed threshold check, per-kind cooldown
//! deduplication, and tiered recommendations.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::db::{self, AlertInsert};
use crate::error::EngineError;
use crate::models::{Alert, AlertKind};
use crate::rate::{self, DefectStats};

/// Severity bucket derived from the defect percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    Critical,
    Urgent,
    Attention,
    Info,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Critical => "CRITICAL",
            Tier::Urgent => "URGENT",
            Tier::Attention => "ATTENTION",
            Tier::Info => "INFO",
        }
    }
}

/// A percentage strictly above `floor` selects this rule.
#[derive(Debug, Clone, Copy)]
pub struct RecommendationRule {
    pub floor: f64,
    pub tier: Tier,
    pub text: &'static str,
}

/// Evaluated top-down; the first matching rule wins. The final rule matches
/// any percentage.
pub const RECOMMENDATION_RULES: [RecommendationRule; 4] = [
    RecommendationRule {
        floor: 20.0,
        tier: Tier::Critical,
        text: "Halt production immediately. Run full preventive maintenance on the \
               cutting equipment and recalibrate the laser system.",
    },
    RecommendationRule {
        floor: 10.0,
        tier: Tier::Urgent,
        text: "Recalibrate the laser system and inspect the mold. Verify the cutting \
               parameters.",
    },
    RecommendationRule {
        floor: 5.0,
        tier: Tier::Attention,
        text: "Check equipment calibration and operating conditions (temperature, \
               humidity, mold wear).",
    },
    RecommendationRule {
        floor: f64::NEG_INFINITY,
        tier: Tier::Info,
        text: "Monitor the trend and verify whether this is a temporary pattern.",
    },
];

pub fn rule_for(percentage: f64) -> &'static RecommendationRule {
    for rule in &RECOMMENDATION_RULES[..RECOMMENDATION_RULES.len() - 1] {
        if percentage > rule.floor {
            return rule;
        }
    }
    &RECOMMENDATION_RULES[RECOMMENDATION_RULES.len() - 1]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationReason {
    Created,
    BelowThreshold,
    DuplicateSuppressed,
}

impl EvaluationReason {
    pub fn describe(self) -> &'static str {
        match self {
            EvaluationReason::Created => "alert created",
            EvaluationReason::BelowThreshold => "no alert created, below threshold",
            EvaluationReason::DuplicateSuppressed => {
                "no alert created, duplicate suppressed"
            }
        }
    }
}

/// What an evaluation decided, and the statistics it decided on. Callers
/// always get this structure back; only infrastructure faults are errors.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationOutcome {
    pub created: bool,
    pub reason: EvaluationReason,
    pub stats: DefectStats,
    pub alert: Option<Alert>,
    /// The alert that caused suppression, when one exists.
    pub existing_alert_id: Option<Uuid>,
}

/// Owns alert-creation decisions. Configuration is fixed at construction.
pub struct AlertManager {
    pool: PgPool,
    config: EngineConfig,
}

impl AlertManager {
    pub fn new(pool: PgPool, config: EngineConfig) -> Self {
        Self { pool, config }
    }

    /// Statistics over the trailing window, re-read from the ledger on every
    /// call.
    pub async fn defect_stats(&self, window: Option<i64>) -> Result<DefectStats, EngineError> {
        let n = window.unwrap_or(self.config.window_size);
        let records = db::recent_inspections(&self.pool, n).await?;
        Ok(rate::compute_stats(&records, self.config.alert_threshold))
    }

    /// Evaluates the current window and creates an alert when the threshold
    /// is exceeded and no alert of the same kind exists within the cooldown.
    pub async fn evaluate_and_maybe_alert(&self) -> Result<EvaluationOutcome, EngineError> {
        let kind = AlertKind::DefectRate;
        let stats = self.defect_stats(None).await?;

        if !stats.exceeds_threshold {
            return Ok(EvaluationOutcome {
                created: false,
                reason: EvaluationReason::BelowThreshold,
                stats,
                alert: None,
                existing_alert_id: None,
            });
        }

        let rule = rule_for(stats.defect_percentage);
        match db::insert_alert_if_quiet(&self.pool, kind, &stats, rule.text, self.config.cooldown)
            .await?
        {
            AlertInsert::Created(alert) => {
                tracing::info!(
                    alert_id = %alert.id,
                    kind = %kind,
                    defect_percentage = stats.defect_percentage,
                    tier = rule.tier.as_str(),
                    "alert created"
                );
                Ok(EvaluationOutcome {
                    created: true,
                    reason: EvaluationReason::Created,
                    stats,
                    alert: Some(alert),
                    existing_alert_id: None,
                })
            }
            AlertInsert::RecentExists(existing) => {
                tracing::debug!(
                    kind = %kind,
                    existing_alert_id = %existing,
                    "alert suppressed by cooldown"
                );
                Ok(EvaluationOutcome {
                    created: false,
                    reason: EvaluationReason::DuplicateSuppressed,
                    stats,
                    alert: None,
                    existing_alert_id: Some(existing),
                })
            }
        }
    }

    /// Alerts not yet notified, oldest first.
    pub async fn unnotified(&self) -> Result<Vec<Alert>, EngineError> {
        db::unnotified_alerts(&self.pool).await
    }

    /// Most recent alerts with full detail, newest first.
    pub async fn history(&self, limit: i64) -> Result<Vec<Alert>, EngineError> {
        db::alert_history(&self.pool, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_boundaries_follow_the_rule_table() {
        assert_eq!(rule_for(20.01).tier, Tier::Critical);
        assert_eq!(rule_for(20.0).tier, Tier::Urgent);
        assert_eq!(rule_for(10.01).tier, Tier::Urgent);
        assert_eq!(rule_for(10.0).tier, Tier::Attention);
        assert_eq!(rule_for(5.01).tier, Tier::Attention);
        assert_eq!(rule_for(5.0).tier, Tier::Info);
        assert_eq!(rule_for(0.0).tier, Tier::Info);
    }

    #[test]
    fn critical_recommendation_calls_for_a_production_halt() {
        let rule = rule_for(70.0);
        assert_eq!(rule.tier, Tier::Critical);
        assert!(rule.text.contains("Halt production"));
    }

    #[test]
    fn rule_table_floors_descend() {
        for pair in RECOMMENDATION_RULES.windows(2) {
            assert!(pair[0].floor > pair[1].floor);
        }
    }

    #[test]
    fn reasons_have_stable_descriptions() {
        assert_eq!(
            EvaluationReason::DuplicateSuppressed.describe(),
            "no alert created, duplicate suppressed"
        );
        assert_eq!(
            EvaluationReason::BelowThreshold.describe(),
            "no alert created, below threshold"
        );
    }
}
