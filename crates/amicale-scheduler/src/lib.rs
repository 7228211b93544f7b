//! Periodic background work: article publication, scheduled communication
//! dispatch, and calendar maintenance. The runner owns its task handles so
//! the binary can shut the loops down cleanly.

pub mod sweeps;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use amicale_db::Database;
use amicale_mailer::dispatcher::DispatchConfig;
use amicale_mailer::provider::{MailConfig, Mailer};
use amicale_mailer::{run_send, SendError};

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Cadence of the article-publish and communication-send sweeps.
    pub sweep_interval: Duration,
    /// Cadence of the calendar sweep; its steps are idempotent per day.
    pub calendar_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            calendar_interval: Duration::from_secs(3600),
        }
    }
}

pub struct Runner {
    handles: Vec<JoinHandle<()>>,
}

impl Runner {
    /// Spawn the sweep loops. The timers run independently and may overlap
    /// with in-flight requests; every touched record is guarded by its own
    /// conditional update, not by the timers.
    pub fn start(
        db: Arc<Database>,
        mailer: Arc<dyn Mailer>,
        mail: MailConfig,
        dispatch: DispatchConfig,
        config: RunnerConfig,
    ) -> Self {
        let mut handles = Vec::new();

        handles.push(tokio::spawn(publish_loop(db.clone(), config.sweep_interval)));
        handles.push(tokio::spawn(send_loop(
            db.clone(),
            mailer,
            mail,
            dispatch,
            config.sweep_interval,
        )));
        handles.push(tokio::spawn(calendar_loop(db, config.calendar_interval)));

        info!("Scheduled-task runner started ({} loops)", handles.len());
        Self { handles }
    }

    pub fn shutdown(self) {
        for handle in &self.handles {
            handle.abort();
        }
        info!("Scheduled-task runner stopped");
    }
}

/// Flip due scheduled articles to published.
async fn publish_loop(db: Arc<Database>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match db.publish_due_articles(Utc::now()) {
            Ok(count) => {
                if count > 0 {
                    info!("Publish sweep: {} article(s) published", count);
                }
            }
            Err(e) => warn!("Publish sweep error: {}", e),
        }
    }
}

/// Send scheduled communications whose due time has passed. A record due
/// at the same moment a manual send fires is protected by the claim inside
/// `run_send`; the loser of the race just logs and moves on.
async fn send_loop(
    db: Arc<Database>,
    mailer: Arc<dyn Mailer>,
    mail: MailConfig,
    dispatch: DispatchConfig,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;

        let due = match db.due_communications(Utc::now()) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Send sweep query error: {}", e);
                continue;
            }
        };

        for row in due {
            let id = row.id.clone();
            match run_send(&db, mailer.as_ref(), &mail, &dispatch, &id).await {
                Ok(report) => info!(
                    "Scheduled communication {} sent: {} ok, {} failed",
                    id, report.sent, report.failed
                ),
                Err(SendError::AlreadySending) => {
                    debug!("Communication {} already claimed by another trigger", id)
                }
                Err(SendError::NoRecipients) => {
                    warn!("Scheduled communication {} resolved no recipients", id)
                }
                Err(e) => warn!("Scheduled communication {} failed: {}", id, e),
            }
        }
    }
}

async fn calendar_loop(db: Arc<Database>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if let Err(e) = sweeps::run_calendar_sweep(&db, Utc::now().date_naive()) {
            warn!("Calendar sweep error: {}", e);
        }
    }
}
