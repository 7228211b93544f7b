//! Outbound communications: recipient resolution, templating, batched
//! dispatch through the email provider, and the shared send flow used by
//! both the REST handler and the scheduled sweep.

pub mod dispatcher;
pub mod provider;
pub mod resolver;
pub mod template;

use chrono::{Datelike, Utc};
use thiserror::Error;
use tracing::info;

use amicale_db::Database;

use crate::dispatcher::{dispatch, DispatchConfig, DispatchReport};
use crate::provider::{MailConfig, Mailer};
use crate::resolver::resolve_recipients;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("communication not found")]
    NotFound,

    /// Another trigger already claimed the record — manual send racing the
    /// scheduler, or a double click.
    #[error("a send is already in progress")]
    AlreadySending,

    #[error("no recipients found")]
    NoRecipients,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Execute one send attempt: claim the record, resolve recipients, dispatch,
/// persist the report. The claim makes concurrent triggers single-winner;
/// the loser gets [`SendError::AlreadySending`].
pub async fn run_send(
    db: &Database,
    mailer: &dyn Mailer,
    mail: &MailConfig,
    config: &DispatchConfig,
    communication_id: &str,
) -> Result<DispatchReport, SendError> {
    let row = db
        .get_communication(communication_id)?
        .ok_or(SendError::NotFound)?;
    let communication = row.into_communication()?;
    let prior_status = communication.status;

    if !db.claim_communication(communication_id)? {
        return Err(SendError::AlreadySending);
    }

    let recipients = match resolve_recipients(db, &communication, Utc::now().year()) {
        Ok(recipients) => recipients,
        Err(e) => {
            db.release_communication_claim(communication_id, prior_status.as_str())?;
            return Err(e.into());
        }
    };

    if recipients.is_empty() {
        db.release_communication_claim(communication_id, prior_status.as_str())?;
        return Err(SendError::NoRecipients);
    }

    info!(
        "Dispatching communication {} to {} recipient(s)",
        communication_id,
        recipients.len()
    );

    let assets = mail.assets_for(communication.org);
    let report = dispatch(mailer, config, &communication, assets, &recipients).await;

    let errors_json = serde_json::to_string(&report.errors).map_err(anyhow::Error::from)?;
    db.record_dispatch(
        communication_id,
        report.sent,
        report.failed,
        &errors_json,
        Utc::now(),
    )?;

    info!(
        "Communication {} sent: {} ok, {} failed",
        communication_id, report.sent, report.failed
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MailerError, OrgAssets, OutboundEmail, SenderIdentity};
    use amicale_types::models::{
        Audience, Communication, CommunicationStatus, Membership, MembershipStatus, Org,
        Preference, Role,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    struct CountingMailer {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Mailer for CountingMailer {
        async fn send(&self, _email: &OutboundEmail) -> Result<String, MailerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("msg-id".into())
        }
    }

    fn mail_config() -> MailConfig {
        let assets = |suffix: &str| OrgAssets {
            sender: SenderIdentity {
                name: format!("Amicale {suffix}"),
                email: format!("no-reply-{suffix}@example.org"),
            },
            header_image_url: format!("https://cdn.example.org/header-{suffix}.png"),
        };
        MailConfig {
            api_key: "test-key".into(),
            base_url: "http://localhost:0".into(),
            org_a: assets("a"),
            org_b: assets("b"),
        }
    }

    fn fast_dispatch() -> DispatchConfig {
        DispatchConfig {
            batch_size: 10,
            batch_delay: Duration::from_millis(0),
        }
    }

    fn seed_draft(db: &Database, audience: Audience) -> String {
        let author = Uuid::new_v4();
        db.create_user(
            &author.to_string(),
            "author@example.org",
            "Author",
            "hash",
            Role::Admin.as_str(),
            &[Org::A],
        )
        .unwrap();
        let c = Communication {
            id: Uuid::new_v4(),
            org: Org::A,
            author_id: author,
            subject: "s".into(),
            body_html: "<p>b</p>".into(),
            audience,
            status: CommunicationStatus::Draft,
            scheduled_at: None,
            sent_count: 0,
            failed_count: 0,
            errors: vec![],
            sent_at: None,
            created_at: Utc::now(),
        };
        db.insert_communication(&c).unwrap();
        c.id.to_string()
    }

    #[tokio::test]
    async fn empty_resolution_is_rejected_before_any_provider_call() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_draft(&db, Audience::HealthAlert);
        let mailer = CountingMailer {
            calls: AtomicU32::new(0),
        };

        let result = run_send(&db, &mailer, &mail_config(), &fast_dispatch(), &id).await;

        assert!(matches!(result, Err(SendError::NoRecipients)));
        assert_eq!(mailer.calls.load(Ordering::SeqCst), 0);
        // The claim was rolled back; the record is a draft again.
        let row = db.get_communication(&id).unwrap().unwrap();
        assert_eq!(row.status, "draft");
    }

    #[tokio::test]
    async fn successful_send_records_counts_and_flips_status() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_draft(&db, Audience::HealthAlert);

        let member = Uuid::new_v4();
        db.create_user(
            &member.to_string(),
            "member@example.org",
            "Member",
            "hash",
            Role::User.as_str(),
            &[Org::A],
        )
        .unwrap();
        db.insert_membership(&Membership {
            id: Uuid::new_v4(),
            user_id: member,
            org: Org::A,
            year: 2026,
            status: MembershipStatus::Active,
            created_at: Utc::now(),
        })
        .unwrap();
        db.upsert_preference(&Preference {
            user_id: member,
            own_group: true,
            other_group: false,
            health_alerts: true,
        })
        .unwrap();

        let mailer = CountingMailer {
            calls: AtomicU32::new(0),
        };
        let report = run_send(&db, &mailer, &mail_config(), &fast_dispatch(), &id)
            .await
            .unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 0);
        let row = db.get_communication(&id).unwrap().unwrap();
        assert_eq!(row.status, "sent");
        assert_eq!(row.sent_count, 1);
        assert!(row.sent_at.is_some());
    }
}
