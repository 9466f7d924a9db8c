//! Alert message rendering and notification dispatch.
//!
//! The `Notifier` trait abstracts delivery so the dispatcher can be driven
//! against a real SMTP transport or a recording double in tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use sqlx::PgPool;
use uuid::Uuid;

use crate::alert::{rule_for, Tier};
use crate::config::SmtpConfig;
use crate::db;
use crate::error::EngineError;
use crate::models::Alert;

/// A stalled transport must not stall the evaluation path.
pub const SMTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivery capability for rendered alert messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        recipients: &[String],
        subject: &str,
        html: &str,
        text: &str,
    ) -> Result<(), EngineError>;

    /// Startup diagnostic: true when the transport is reachable and the
    /// credentials are accepted.
    async fn test_connection(&self) -> bool;
}

/// SMTP delivery over STARTTLS.
pub struct SmtpNotifier {
    config: SmtpConfig,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, EngineError> {
        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.clone(),
        );
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
            .map_err(|e| EngineError::Transport(e.to_string()))?
            .port(self.config.port)
            .credentials(creds)
            .timeout(Some(SMTP_TIMEOUT))
            .build();
        Ok(transport)
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(
        &self,
        recipients: &[String],
        subject: &str,
        html: &str,
        text: &str,
    ) -> Result<(), EngineError> {
        let from: Mailbox = self.config.from_email.parse()?;
        let mut builder = Message::builder().from(from).subject(subject);
        for recipient in recipients {
            builder = builder.to(recipient.parse::<Mailbox>()?);
        }

        let message = builder.multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(text.to_string()),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(html.to_string()),
                ),
        )?;

        let mailer = self.transport()?;
        mailer
            .send(message)
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        tracing::info!(
            recipients = recipients.len(),
            subject,
            "alert notification sent"
        );
        Ok(())
    }

    async fn test_connection(&self) -> bool {
        match self.transport() {
            Ok(transport) => transport.test_connection().await.unwrap_or(false),
            Err(_) => false,
        }
    }
}

/// Test double that captures messages instead of delivering them.
#[derive(Default)]
pub struct RecordingNotifier {
    fail_sends: bool,
    sent: Mutex<Vec<RecordedMessage>>,
}

#[derive(Debug, Clone)]
pub struct RecordedMessage {
    pub recipients: Vec<String>,
    pub subject: String,
    pub html: String,
    pub text: String,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A double whose sends always fail with a transport error.
    pub fn failing() -> Self {
        Self {
            fail_sends: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<RecordedMessage> {
        self.sent.lock().map(|guard| guard.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        recipients: &[String],
        subject: &str,
        html: &str,
        text: &str,
    ) -> Result<(), EngineError> {
        if self.fail_sends {
            return Err(EngineError::Transport("simulated send failure".to_string()));
        }
        if let Ok(mut guard) = self.sent.lock() {
            guard.push(RecordedMessage {
                recipients: recipients.to_vec(),
                subject: subject.to_string(),
                html: html.to_string(),
                text: text.to_string(),
            });
        }
        Ok(())
    }

    async fn test_connection(&self) -> bool {
        !self.fail_sends
    }
}

/// Severity color for the HTML template, keyed by the same breakpoints as
/// the recommendation tiers.
fn tier_color(tier: Tier) -> &'static str {
    match tier {
        Tier::Critical => "#d32f2f",
        Tier::Urgent => "#f57c00",
        Tier::Attention | Tier::Info => "#fbc02d",
    }
}

/// Rendered subject and bodies for one alert.
#[derive(Debug, Clone)]
pub struct RenderedAlert {
    pub subject: String,
    pub html: String,
    pub text: String,
}

const ALERT_STYLE: &str = r#"
  body { font-family: Arial, sans-serif; line-height: 1.6; color: #333; }
  .container { max-width: 600px; margin: 0 auto; padding: 20px; }
  .content { background-color: #f9f9f9; padding: 30px; border: 1px solid #ddd; }
  .stat-item { display: flex; justify-content: space-between; padding: 10px 0; border-bottom: 1px solid #eee; }
  .stat-label { font-weight: bold; color: #555; }
  .recommendation { background-color: #fff3cd; padding: 15px; margin: 20px 0; border-left: 4px solid #ffc107; }
  .footer { text-align: center; color: #777; margin-top: 30px; font-size: 0.9em; }
"#;

pub fn render_alert(alert: &Alert) -> RenderedAlert {
    let rule = rule_for(alert.defect_percentage);
    let color = tier_color(rule.tier);
    let level = rule.tier.as_str();
    let analyzed_at = alert.created_at.format("%d/%m/%Y %H:%M:%S UTC");

    let subject = format!(
        "⚠️ QUALITY ALERT: {:.2}% defect rate detected",
        alert.defect_percentage
    );

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head><style>{style}</style></head>
<body>
  <div class="container">
    <div style="background-color: {color}; color: white; padding: 20px; text-align: center;">
      <h1>⚠️ QUALITY ALERT - {level}</h1>
    </div>
    <div class="content">
      <p>An elevated defect rate was detected by the quality control system.</p>
      <div style="background-color: white; padding: 20px; margin: 20px 0; border-left: 4px solid {color};">
        <div class="stat-item">
          <span class="stat-label">Defect percentage:</span>
          <span style="color: {color}; font-weight: bold;">{percentage:.2}%</span>
        </div>
        <div class="stat-item">
          <span class="stat-label">Inspections analyzed:</span>
          <span style="color: {color}; font-weight: bold;">{total}</span>
        </div>
        <div class="stat-item">
          <span class="stat-label">Pieces rejected:</span>
          <span style="color: {color}; font-weight: bold;">{rejected}</span>
        </div>
        <div class="stat-item" style="border-bottom: none;">
          <span class="stat-label">Pieces approved:</span>
          <span style="color: {color}; font-weight: bold;">{approved}</span>
        </div>
      </div>
      <div class="recommendation">
        <h3 style="margin-top: 0;">Recommended action</h3>
        <p style="margin-bottom: 0;">{recommendation}</p>
      </div>
      <p><strong>Analyzed at:</strong> {analyzed_at}</p>
      <p style="color: #777; font-size: 0.9em;">
        This is an automatic notification from the quality control system.
        Please take corrective action as soon as possible.
      </p>
    </div>
    <div class="footer">
      <p>Defect Early Warning - automatic message, please do not reply.</p>
    </div>
  </div>
</body>
</html>
"#,
        style = ALERT_STYLE,
        color = color,
        level = level,
        percentage = alert.defect_percentage,
        total = alert.total_inspections,
        rejected = alert.total_rejected,
        approved = alert.total_inspections - alert.total_rejected,
        recommendation = alert.recommendation,
        analyzed_at = analyzed_at,
    );

    let text = format!(
        "QUALITY ALERT - {level}\n\n\
         Defect percentage: {percentage:.2}%\n\
         Inspections analyzed: {total}\n\
         Pieces rejected: {rejected}\n\
         Pieces approved: {approved}\n\n\
         Recommended action: {recommendation}\n\n\
         Analyzed at: {analyzed_at}\n",
        level = level,
        percentage = alert.defect_percentage,
        total = alert.total_inspections,
        rejected = alert.total_rejected,
        approved = alert.total_inspections - alert.total_rejected,
        recommendation = alert.recommendation,
        analyzed_at = analyzed_at,
    );

    RenderedAlert {
        subject,
        html,
        text,
    }
}

/// Counts for one pass over the unnotified queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
}

/// Renders alerts, drives the notifier, and durably records delivery.
///
/// Owns the `notified` transition: the flag flips only after the notifier
/// reports success, and flipping it again is a no-op.
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    default_recipient: String,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, default_recipient: impl Into<String>) -> Self {
        Self {
            notifier,
            default_recipient: default_recipient.into(),
        }
    }

    pub fn resolve_recipients(&self, requested: Option<&[String]>) -> Vec<String> {
        match requested {
            Some(list) if !list.is_empty() => list.to_vec(),
            _ => vec![self.default_recipient.clone()],
        }
    }

    /// Sends one alert and marks it notified. A transport failure leaves the
    /// flag unchanged so a later pass can retry; an already-notified alert
    /// is skipped without a send.
    pub async fn dispatch_alert(
        &self,
        pool: &PgPool,
        alert: &Alert,
        recipients: Option<&[String]>,
    ) -> Result<(), EngineError> {
        if alert.notified {
            tracing::debug!(alert_id = %alert.id, "alert already notified, skipping");
            return Ok(());
        }

        let rendered = render_alert(alert);
        let recipients = self.resolve_recipients(recipients);
        self.notifier
            .send(&recipients, &rendered.subject, &rendered.html, &rendered.text)
            .await?;

        if !db::mark_alert_notified(pool, alert.id).await? {
            return Err(EngineError::AlertNotFound(alert.id));
        }
        Ok(())
    }

    pub async fn dispatch_by_id(&self, pool: &PgPool, id: Uuid) -> Result<(), EngineError> {
        let alert = db::get_alert(pool, id)
            .await?
            .ok_or(EngineError::AlertNotFound(id))?;
        self.dispatch_alert(pool, &alert, None).await
    }

    /// Dispatches every unnotified alert, oldest first. Failures are logged
    /// and counted; they do not stop the pass.
    pub async fn dispatch_pending(&self, pool: &PgPool) -> Result<DispatchSummary, EngineError> {
        let pending = db::unnotified_alerts(pool).await?;
        let mut summary = DispatchSummary::default();

        for alert in pending {
            match self.dispatch_alert(pool, &alert, None).await {
                Ok(()) => summary.sent += 1,
                Err(err) => {
                    summary.failed += 1;
                    tracing::warn!(
                        alert_id = %alert.id,
                        error = %err,
                        "notification dispatch failed"
                    );
                }
            }
        }

        Ok(summary)
    }

    /// Transport diagnostic plus a rendered sample alert, for startup checks.
    pub async fn send_sample(&self) -> Result<(), EngineError> {
        let rendered = render_alert(&sample_alert());
        let recipients = self.resolve_recipients(None);
        self.notifier
            .send(&recipients, &rendered.subject, &rendered.html, &rendered.text)
            .await
    }

    pub async fn test_connection(&self) -> bool {
        self.notifier.test_connection().await
    }
}

/// A representative alert used by the transport diagnostic.
pub fn sample_alert() -> Alert {
    use crate::models::AlertKind;

    Alert {
        id: Uuid::new_v4(),
        kind: AlertKind::DefectRate,
        defect_percentage: 15.5,
        total_inspections: 100,
        total_rejected: 15,
        threshold: 5.0,
        recommendation: "This is a test of the alert notification system.".to_string(),
        notified: false,
        created_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertKind;
    use chrono::Utc;

    fn alert_with_percentage(percentage: f64) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            kind: AlertKind::DefectRate,
            defect_percentage: percentage,
            total_inspections: 100,
            total_rejected: (percentage.round() as i64).max(0),
            threshold: 5.0,
            recommendation: rule_for(percentage).text.to_string(),
            notified: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn render_uses_the_critical_color_above_twenty_percent() {
        let rendered = render_alert(&alert_with_percentage(25.0));
        assert!(rendered.html.contains("#d32f2f"));
        assert!(rendered.html.contains("CRITICAL"));
        assert!(rendered.subject.contains("25.00%"));
    }

    #[test]
    fn render_uses_the_urgent_color_between_ten_and_twenty() {
        let rendered = render_alert(&alert_with_percentage(12.0));
        assert!(rendered.html.contains("#f57c00"));
        assert!(rendered.html.contains("URGENT"));
    }

    #[test]
    fn render_uses_the_attention_color_at_lower_percentages() {
        let rendered = render_alert(&alert_with_percentage(7.5));
        assert!(rendered.html.contains("#fbc02d"));
        assert!(rendered.html.contains("ATTENTION"));
    }

    #[test]
    fn text_body_carries_the_recommendation() {
        let alert = alert_with_percentage(25.0);
        let rendered = render_alert(&alert);
        assert!(rendered.text.contains("Halt production"));
        assert!(rendered.text.contains("100"));
    }

    #[test]
    fn recipients_default_to_the_configured_address() {
        let dispatcher = NotificationDispatcher::new(
            Arc::new(RecordingNotifier::new()),
            "quality@example.com",
        );
        assert_eq!(
            dispatcher.resolve_recipients(None),
            vec!["quality@example.com".to_string()]
        );
        assert_eq!(
            dispatcher.resolve_recipients(Some(&[])),
            vec!["quality@example.com".to_string()]
        );
        let explicit = vec!["ops@example.com".to_string()];
        assert_eq!(dispatcher.resolve_recipients(Some(&explicit)), explicit);
    }

    #[tokio::test]
    async fn recording_notifier_captures_sent_messages() {
        let notifier = RecordingNotifier::new();
        notifier
            .send(
                &["quality@example.com".to_string()],
                "subject",
                "<p>html</p>",
                "text",
            )
            .await
            .unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec!["quality@example.com".to_string()]);
        assert_eq!(sent[0].subject, "subject");
        assert_eq!(sent[0].html, "<p>html</p>");
        assert_eq!(sent[0].text, "text");
        assert!(notifier.test_connection().await);
    }

    #[tokio::test]
    async fn failing_notifier_surfaces_a_transport_error() {
        let notifier = RecordingNotifier::failing();
        let result = notifier
            .send(&["quality@example.com".to_string()], "s", "h", "t")
            .await;
        assert!(matches!(result, Err(EngineError::Transport(_))));
        assert!(notifier.sent().is_empty());
        assert!(!notifier.test_connection().await);
    }
}
