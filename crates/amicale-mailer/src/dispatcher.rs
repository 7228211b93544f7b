//! Batched dispatch of one communication to its resolved recipients.
//!
//! Recipients are split into fixed-size batches; every send in a batch runs
//! concurrently and the batch joins on all outcomes before the next one
//! starts. The pause between batches throttles the provider, nothing more.

use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use tracing::warn;

use amicale_types::models::{Communication, SendFailure};

use crate::provider::{Mailer, OrgAssets, OutboundEmail};
use crate::resolver::Recipient;
use crate::template;

/// Only this many failures are kept on the record; the counts still cover
/// every recipient.
const MAX_STORED_ERRORS: usize = 10;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub sent: u32,
    pub failed: u32,
    pub errors: Vec<SendFailure>,
}

/// Send to every recipient. One failed send never aborts its batch or the
/// batches after it. Touches nothing but the provider; persisting the
/// report is the caller's job.
pub async fn dispatch(
    mailer: &dyn Mailer,
    config: &DispatchConfig,
    communication: &Communication,
    assets: &OrgAssets,
    recipients: &[Recipient],
) -> DispatchReport {
    let mut report = DispatchReport::default();
    let batch_size = config.batch_size.max(1);
    let batch_count = recipients.len().div_ceil(batch_size);

    for (index, batch) in recipients.chunks(batch_size).enumerate() {
        let outcomes = join_all(batch.iter().map(|recipient| async move {
            let email = OutboundEmail {
                sender: assets.sender.clone(),
                to_email: recipient.email.clone(),
                to_name: recipient.name.clone(),
                subject: communication.subject.clone(),
                html: template::render_html(
                    &communication.body_html,
                    &assets.header_image_url,
                    &recipient.name,
                ),
            };
            (recipient, mailer.send(&email).await)
        }))
        .await;

        for (recipient, outcome) in outcomes {
            match outcome {
                Ok(_message_id) => report.sent += 1,
                Err(e) => {
                    warn!("Send to {} failed: {}", recipient.email, e);
                    report.failed += 1;
                    report.errors.push(SendFailure {
                        email: recipient.email.clone(),
                        error: e.to_string(),
                        date: Utc::now(),
                    });
                }
            }
        }

        if index + 1 < batch_count {
            tokio::time::sleep(config.batch_delay).await;
        }
    }

    if report.errors.len() > MAX_STORED_ERRORS {
        let drop = report.errors.len() - MAX_STORED_ERRORS;
        report.errors.drain(..drop);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MailerError, SenderIdentity};
    use amicale_types::models::{Audience, CommunicationStatus, Org};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct MockMailer {
        calls: AtomicU32,
        sent_to: Mutex<Vec<String>>,
        fail_for: Vec<String>,
    }

    impl MockMailer {
        fn new(fail_for: Vec<String>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                sent_to: Mutex::new(Vec::new()),
                fail_for,
            }
        }
    }

    #[async_trait]
    impl Mailer for MockMailer {
        async fn send(&self, email: &OutboundEmail) -> Result<String, MailerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_for.contains(&email.to_email) {
                return Err(MailerError::Provider {
                    status: 400,
                    message: "bounced".into(),
                });
            }
            self.sent_to.lock().unwrap().push(email.to_email.clone());
            Ok(format!("msg-{}", email.to_email))
        }
    }

    fn recipients(n: usize) -> Vec<Recipient> {
        (0..n)
            .map(|i| Recipient {
                user_id: Uuid::new_v4(),
                email: format!("user{i}@example.org"),
                name: format!("User {i}"),
            })
            .collect()
    }

    fn communication() -> Communication {
        Communication {
            id: Uuid::new_v4(),
            org: Org::A,
            author_id: Uuid::new_v4(),
            subject: "s".into(),
            body_html: "<p>b</p>".into(),
            audience: Audience::HealthAlert,
            status: CommunicationStatus::Sending,
            scheduled_at: None,
            sent_count: 0,
            failed_count: 0,
            errors: vec![],
            sent_at: None,
            created_at: Utc::now(),
        }
    }

    fn assets() -> OrgAssets {
        OrgAssets {
            sender: SenderIdentity {
                name: "Amicale".into(),
                email: "no-reply@example.org".into(),
            },
            header_image_url: "https://cdn.example.org/header-a.png".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn twenty_five_recipients_make_three_batches_and_two_delays() {
        let mailer = MockMailer::new(vec![]);
        let config = DispatchConfig {
            batch_size: 10,
            batch_delay: Duration::from_millis(1000),
        };
        let start = tokio::time::Instant::now();

        let report = dispatch(&mailer, &config, &communication(), &assets(), &recipients(25)).await;

        assert_eq!(report.sent, 25);
        assert_eq!(report.failed, 0);
        assert_eq!(mailer.calls.load(Ordering::SeqCst), 25);
        // Two inter-batch pauses, none after the final partial batch.
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn failures_are_isolated_and_counted() {
        let all = recipients(10);
        let fail_for = vec![all[2].email.clone(), all[7].email.clone()];
        let mailer = MockMailer::new(fail_for.clone());
        let config = DispatchConfig {
            batch_size: 10,
            batch_delay: Duration::from_millis(0),
        };

        let report = dispatch(&mailer, &config, &communication(), &assets(), &all).await;

        assert_eq!(report.sent, 8);
        assert_eq!(report.failed, 2);
        // Every recipient was attempted despite the two failures.
        assert_eq!(mailer.calls.load(Ordering::SeqCst), 10);
        let failed: Vec<String> = report.errors.iter().map(|e| e.email.clone()).collect();
        assert_eq!(failed, fail_for);
    }

    #[tokio::test]
    async fn error_list_keeps_only_the_most_recent_ten() {
        let all = recipients(15);
        let fail_for: Vec<String> = all.iter().map(|r| r.email.clone()).collect();
        let mailer = MockMailer::new(fail_for);
        let config = DispatchConfig {
            batch_size: 5,
            batch_delay: Duration::from_millis(0),
        };

        let report = dispatch(&mailer, &config, &communication(), &assets(), &all).await;

        assert_eq!(report.failed, 15);
        assert_eq!(report.errors.len(), 10);
        // The oldest five failures were dropped from the stored list.
        assert_eq!(report.errors[0].email, all[5].email);
        assert_eq!(report.errors[9].email, all[14].email);
    }

    #[tokio::test]
    async fn empty_recipient_list_sends_nothing() {
        let mailer = MockMailer::new(vec![]);
        let config = DispatchConfig::default();

        let report = dispatch(&mailer, &config, &communication(), &assets(), &[]).await;

        assert_eq!(report.sent, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(mailer.calls.load(Ordering::SeqCst), 0);
    }
}
