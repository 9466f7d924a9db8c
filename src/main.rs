use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod alert;
mod config;
mod db;
mod error;
mod models;
mod notify;
mod rate;
mod report;

use alert::AlertManager;
use config::EngineConfig;
use models::{DefectPoint, NewInspection, Verdict};
use notify::{NotificationDispatcher, SmtpNotifier};
use report::WeeklyReportGenerator;

#[derive(Parser)]
#[command(name = "defect-early-warning")]
#[command(about = "Defect-rate alerting and weekly quality reports", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import inspections from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Record one inspection outcome
    Record {
        /// APPROVED or REJECTED
        #[arg(long)]
        verdict: String,
        #[arg(long, default_value_t = 0.0)]
        max_deviation: f64,
        /// Defect points as JSON, e.g. '[{"x": 100.0, "y": 200.0}]'
        #[arg(long, default_value = "[]")]
        points: String,
        #[arg(long, default_value = "Excluded")]
        category: String,
        #[arg(long)]
        lot: Option<String>,
    },
    /// Show defect statistics for the trailing window
    Stats {
        #[arg(long)]
        window: Option<i64>,
        #[arg(long)]
        json: bool,
    },
    /// Evaluate the defect rate and raise an alert if warranted
    Evaluate {
        /// Skip the notification dispatch for a newly created alert
        #[arg(long)]
        no_notify: bool,
        #[arg(long)]
        json: bool,
    },
    /// List alert history (or only alerts awaiting notification)
    Alerts {
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long)]
        pending: bool,
    },
    /// Dispatch pending notifications, or one specific alert
    Notify {
        #[arg(long)]
        alert_id: Option<Uuid>,
    },
    /// Generate this week's quality report if not already generated
    WeeklyReport {
        /// Also write a Markdown rendering to this path
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Verify the SMTP configuration and send a sample alert
    TestEmail,
    /// Run the periodic scheduler (reports + pending notifications)
    Watch {
        #[arg(long, default_value_t = 300)]
        interval_secs: u64,
        /// Also re-evaluate the defect rate on every tick
        #[arg(long)]
        evaluate: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} inspections from {}.", csv.display());
        }
        Commands::Record {
            verdict,
            max_deviation,
            points,
            category,
            lot,
        } => {
            let verdict =
                Verdict::parse(&verdict).context("verdict must be APPROVED or REJECTED")?;
            let defect_points: Vec<DefectPoint> =
                serde_json::from_str(&points).context("invalid defect points JSON")?;
            let record = db::record_inspection(
                &pool,
                &NewInspection {
                    verdict,
                    max_deviation,
                    defect_points,
                    category,
                    lot_code: lot,
                    recorded_at: chrono::Utc::now(),
                },
            )
            .await?;
            println!("Recorded inspection {} ({}).", record.id, record.verdict);

            // Every new inspection outcome triggers an evaluation.
            run_evaluation(&pool, false, false).await?;
        }
        Commands::Stats { window, json } => {
            let manager = AlertManager::new(pool.clone(), EngineConfig::from_env()?);
            let stats = manager.defect_stats(window).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Inspections analyzed: {}", stats.total_inspections);
                println!("Rejected: {}", stats.total_rejected);
                println!("Approved: {}", stats.total_approved);
                println!(
                    "Defect rate: {:.2}% (threshold {:.2}%)",
                    stats.defect_percentage, stats.threshold
                );
                println!(
                    "Exceeds threshold: {}",
                    if stats.exceeds_threshold { "yes" } else { "no" }
                );
            }
        }
        Commands::Evaluate { no_notify, json } => {
            run_evaluation(&pool, json, no_notify).await?;
        }
        Commands::Alerts { limit, pending } => {
            let manager = AlertManager::new(pool.clone(), EngineConfig::from_env()?);
            let alerts = if pending {
                manager.unnotified().await?
            } else {
                manager.history(limit).await?
            };

            if alerts.is_empty() {
                println!("No alerts on record.");
            } else {
                for alert in alerts {
                    println!(
                        "- {} [{}] {:.2}% ({}/{} rejected), notified: {}",
                        alert.created_at.format("%Y-%m-%d %H:%M"),
                        alert.id,
                        alert.defect_percentage,
                        alert.total_rejected,
                        alert.total_inspections,
                        if alert.notified { "yes" } else { "no" }
                    );
                    println!("  {}", alert.recommendation);
                }
            }
        }
        Commands::Notify { alert_id } => {
            let smtp = config::SmtpConfig::from_env()?;
            let recipient = smtp.default_recipient.clone();
            let dispatcher =
                NotificationDispatcher::new(Arc::new(SmtpNotifier::new(smtp)), recipient);

            match alert_id {
                Some(id) => {
                    dispatcher.dispatch_by_id(&pool, id).await?;
                    println!("Notification sent for alert {id}.");
                }
                None => {
                    let summary = dispatcher.dispatch_pending(&pool).await?;
                    println!(
                        "Dispatched {} notifications, {} failed.",
                        summary.sent, summary.failed
                    );
                }
            }
        }
        Commands::WeeklyReport { out } => {
            let generator = WeeklyReportGenerator::new(pool.clone());
            let outcome = generator.generate_if_due().await?;

            if outcome.generated {
                println!("Weekly report generated for week {}.", outcome.report.week_start);
            } else {
                println!(
                    "Weekly report for week {} already exists.",
                    outcome.report.week_start
                );
            }
            println!(
                "Defect rate: {:.2}% across {} inspections, trend {:+.2} points",
                outcome.report.defect_percentage,
                outcome.report.total_inspections,
                outcome.report.trend_delta
            );

            if let Some(out) = out {
                let recent = db::alert_history(&pool, 10).await?;
                let markdown = report::render_markdown(&outcome.report, &recent);
                std::fs::write(&out, markdown)?;
                println!("Report written to {}.", out.display());
            }
        }
        Commands::TestEmail => {
            let smtp = config::SmtpConfig::from_env()?;
            let recipient = smtp.default_recipient.clone();
            let dispatcher =
                NotificationDispatcher::new(Arc::new(SmtpNotifier::new(smtp)), recipient);

            if dispatcher.test_connection().await {
                println!("SMTP connection OK.");
            } else {
                println!("SMTP connection failed; check transport settings.");
            }

            dispatcher.send_sample().await?;
            println!("Sample alert sent.");
        }
        Commands::Watch {
            interval_secs,
            evaluate,
        } => {
            let engine_config = EngineConfig::from_env()?;
            let smtp = config::SmtpConfig::from_env()?;
            let recipient = smtp.default_recipient.clone();
            let dispatcher =
                NotificationDispatcher::new(Arc::new(SmtpNotifier::new(smtp)), recipient);
            let manager = AlertManager::new(pool.clone(), engine_config);
            let generator = WeeklyReportGenerator::new(pool.clone());

            println!("Watching every {interval_secs}s (evaluate: {evaluate}).");
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));

            loop {
                ticker.tick().await;

                if evaluate {
                    match manager.evaluate_and_maybe_alert().await {
                        Ok(outcome) if outcome.created => {
                            tracing::info!("scheduled evaluation created an alert");
                        }
                        Ok(_) => {}
                        Err(err) => {
                            tracing::warn!(error = %err, "scheduled evaluation failed");
                        }
                    }
                }

                match generator.generate_if_due().await {
                    Ok(outcome) if outcome.generated => {
                        tracing::info!(
                            week_start = %outcome.report.week_start,
                            "scheduled weekly report generated"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "scheduled report generation failed");
                    }
                }

                match dispatcher.dispatch_pending(&pool).await {
                    Ok(summary) if summary.sent > 0 || summary.failed > 0 => {
                        tracing::info!(
                            sent = summary.sent,
                            failed = summary.failed,
                            "scheduled notification pass finished"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "scheduled notification pass failed");
                    }
                }
            }
        }
    }

    Ok(())
}

/// Evaluates the current window, reports the structured outcome, and
/// dispatches the notification for a newly created alert unless suppressed.
/// Missing transport configuration or a failed send leaves the alert
/// pending for a later `notify` pass.
async fn run_evaluation(
    pool: &sqlx::PgPool,
    json: bool,
    no_notify: bool,
) -> anyhow::Result<()> {
    let manager = AlertManager::new(pool.clone(), EngineConfig::from_env()?);
    let outcome = manager.evaluate_and_maybe_alert().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", outcome.reason.describe());
        println!(
            "Defect rate: {:.2}% across {} inspections ({} rejected)",
            outcome.stats.defect_percentage,
            outcome.stats.total_inspections,
            outcome.stats.total_rejected
        );
        if let Some(existing) = outcome.existing_alert_id {
            println!("Existing alert within cooldown: {existing}");
        }
    }

    if let Some(alert) = outcome.alert.as_ref().filter(|_| !no_notify) {
        match config::SmtpConfig::from_env() {
            Ok(smtp) => {
                let recipient = smtp.default_recipient.clone();
                let dispatcher =
                    NotificationDispatcher::new(Arc::new(SmtpNotifier::new(smtp)), recipient);
                match dispatcher.dispatch_alert(pool, alert, None).await {
                    Ok(()) => println!("Notification sent for alert {}.", alert.id),
                    Err(err) => println!(
                        "Notification failed ({err}); alert {} stays pending.",
                        alert.id
                    ),
                }
            }
            Err(err) => println!(
                "Notification skipped ({err}); alert {} stays pending.",
                alert.id
            ),
        }
    }

    Ok(())
}
