//! Recipient resolution: turns a communication's targeting rule into a
//! deduplicated, preference-gated list of recipients.

use std::collections::HashSet;

use anyhow::Result;
use uuid::Uuid;

use amicale_db::models::UserRow;
use amicale_db::Database;
use amicale_types::models::{
    parse_org_list, Audience, Communication, LegacyAudience, MembershipStatus, Org, Preference,
};

#[derive(Debug, Clone)]
pub struct Recipient {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
}

impl Recipient {
    fn from_row(row: &UserRow) -> Result<Self> {
        Ok(Self {
            user_id: row.id.parse()?,
            email: row.email.clone(),
            name: row.name.clone(),
        })
    }
}

/// A user without a stored preference row is treated as fully opted out
/// here. The preference read endpoint lazily creates defaults instead; the
/// two behaviors differ on purpose and must stay that way.
fn stored_preference(db: &Database, user_id: &str) -> Result<Option<Preference>> {
    match db.get_preference(user_id)? {
        Some(row) => Ok(Some(row.into_preference()?)),
        None => Ok(None),
    }
}

/// Resolve the recipient set for a communication. Resolution order is fixed:
/// health alert, then the criteria list, then the legacy single-value rule.
/// No recipient appears twice even when matched through several membership
/// records. Returns an empty list when nobody qualifies; the caller decides
/// whether that is an error.
pub fn resolve_recipients(
    db: &Database,
    communication: &Communication,
    current_year: i32,
) -> Result<Vec<Recipient>> {
    match &communication.audience {
        Audience::HealthAlert => resolve_health_alert(db),
        Audience::Criteria { criteria } => resolve_criteria(db, criteria),
        Audience::Legacy { rule } => resolve_legacy(db, communication.org, *rule, current_year),
    }
}

/// Everyone with at least one current or past membership, gated on the
/// health-alert flag. Users are deduplicated before the preference lookup,
/// so a member with five records is visited once.
fn resolve_health_alert(db: &Database) -> Result<Vec<Recipient>> {
    let candidates = db.users_with_membership_status(&[
        MembershipStatus::Active,
        MembershipStatus::Expired,
    ])?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut recipients = Vec::new();
    for row in &candidates {
        if !seen.insert(row.id.clone()) {
            continue;
        }
        let opted_in = stored_preference(db, &row.id)?
            .map(|p| p.health_alerts)
            .unwrap_or(false);
        if opted_in {
            recipients.push(Recipient::from_row(row)?);
        }
    }
    Ok(recipients)
}

/// Union of the membership records matching each criterion, deduplicated by
/// user. The own-group flag gates inclusion for every criterion, also when
/// the criterion names another org.
fn resolve_criteria(
    db: &Database,
    criteria: &[amicale_types::models::MembershipCriterion],
) -> Result<Vec<Recipient>> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut recipients = Vec::new();

    for criterion in criteria {
        let rows = db.list_memberships(
            Some(criterion.org),
            Some(criterion.year),
            Some(criterion.status),
        )?;
        for membership in &rows {
            if !seen.insert(membership.user_id.clone()) {
                continue;
            }
            let opted_in = stored_preference(db, &membership.user_id)?
                .map(|p| p.own_group)
                .unwrap_or(false);
            if !opted_in {
                continue;
            }
            if let Some(user) = db.get_user_by_id(&membership.user_id)? {
                recipients.push(Recipient::from_row(&user)?);
            }
        }
    }
    Ok(recipients)
}

/// Legacy single-value rule over users holding an active membership in the
/// current calendar year.
fn resolve_legacy(
    db: &Database,
    communication_org: Org,
    rule: LegacyAudience,
    current_year: i32,
) -> Result<Vec<Recipient>> {
    let candidates = db.users_with_active_membership_in_year(current_year)?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut recipients = Vec::new();
    for row in &candidates {
        if !seen.insert(row.id.clone()) {
            continue;
        }
        let Some(prefs) = stored_preference(db, &row.id)? else {
            continue;
        };
        let orgs = parse_org_list(&row.orgs)?;

        let included = match rule {
            LegacyAudience::OrgA => orgs.contains(&Org::A) && prefs.own_group,
            LegacyAudience::OrgB => orgs.contains(&Org::B) && prefs.own_group,
            LegacyAudience::OwnGroup => orgs.contains(&communication_org) && prefs.own_group,
            LegacyAudience::AllGroups => {
                (orgs.contains(&communication_org) && prefs.own_group)
                    || (orgs.iter().any(|o| *o != communication_org) && prefs.other_group)
            }
        };
        if included {
            recipients.push(Recipient::from_row(row)?);
        }
    }
    Ok(recipients)
}

#[cfg(test)]
mod tests {
    use super::*;
    use amicale_types::models::{
        Audience, CommunicationStatus, Membership, MembershipCriterion, Role,
    };
    use chrono::{Datelike, Utc};

    const YEAR: i32 = 2026;

    fn seed_user(db: &Database, email: &str, orgs: &[Org]) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(
            &id.to_string(),
            email,
            email.split('@').next().unwrap_or(email),
            "hash",
            Role::User.as_str(),
            orgs,
        )
        .unwrap();
        id
    }

    fn seed_membership(db: &Database, user_id: Uuid, org: Org, year: i32, status: MembershipStatus) {
        db.insert_membership(&Membership {
            id: Uuid::new_v4(),
            user_id,
            org,
            year,
            status,
            created_at: Utc::now(),
        })
        .unwrap();
    }

    fn seed_preference(db: &Database, user_id: Uuid, own: bool, other: bool, health: bool) {
        db.upsert_preference(&Preference {
            user_id,
            own_group: own,
            other_group: other,
            health_alerts: health,
        })
        .unwrap();
    }

    fn communication(org: Org, audience: Audience) -> Communication {
        Communication {
            id: Uuid::new_v4(),
            org,
            author_id: Uuid::new_v4(),
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
        }
    }

    fn emails(recipients: &[Recipient]) -> Vec<String> {
        let mut v: Vec<String> = recipients.iter().map(|r| r.email.clone()).collect();
        v.sort();
        v
    }

    #[test]
    fn health_alert_dedups_across_orgs_and_gates_on_flag() {
        let db = Database::open_in_memory().unwrap();

        // Five records across both orgs, one user.
        let both = seed_user(&db, "both@example.org", &[Org::A, Org::B]);
        for (org, year, status) in [
            (Org::A, YEAR, MembershipStatus::Active),
            (Org::B, YEAR, MembershipStatus::Active),
            (Org::A, YEAR - 1, MembershipStatus::Expired),
            (Org::B, YEAR - 1, MembershipStatus::Expired),
            (Org::A, YEAR - 2, MembershipStatus::Expired),
        ] {
            seed_membership(&db, both, org, year, status);
        }
        seed_preference(&db, both, false, false, true);

        let opted_out = seed_user(&db, "optout@example.org", &[Org::A]);
        seed_membership(&db, opted_out, Org::A, YEAR, MembershipStatus::Active);
        seed_preference(&db, opted_out, true, true, false);

        // Pending memberships never qualify for alerts.
        let pending = seed_user(&db, "pending@example.org", &[Org::A]);
        seed_membership(&db, pending, Org::A, YEAR, MembershipStatus::Pending);
        seed_preference(&db, pending, true, true, true);

        let comm = communication(Org::A, Audience::HealthAlert);
        let recipients = resolve_recipients(&db, &comm, YEAR).unwrap();
        assert_eq!(emails(&recipients), vec!["both@example.org"]);
    }

    #[test]
    fn all_groups_combines_both_flags() {
        let db = Database::open_in_memory().unwrap();
        let year = Utc::now().year();

        let own = seed_user(&db, "own@example.org", &[Org::A]);
        seed_membership(&db, own, Org::A, year, MembershipStatus::Active);
        seed_preference(&db, own, true, false, false);

        let other = seed_user(&db, "other@example.org", &[Org::B]);
        seed_membership(&db, other, Org::B, year, MembershipStatus::Active);
        seed_preference(&db, other, false, true, false);

        let neither = seed_user(&db, "neither@example.org", &[Org::B]);
        seed_membership(&db, neither, Org::B, year, MembershipStatus::Active);
        seed_preference(&db, neither, false, false, true);

        let comm = communication(
            Org::A,
            Audience::Legacy {
                rule: LegacyAudience::AllGroups,
            },
        );
        let recipients = resolve_recipients(&db, &comm, year).unwrap();
        assert_eq!(
            emails(&recipients),
            vec!["other@example.org", "own@example.org"]
        );
    }

    #[test]
    fn named_org_rule_needs_matching_org_and_own_flag() {
        let db = Database::open_in_memory().unwrap();
        let year = Utc::now().year();

        let a = seed_user(&db, "a@example.org", &[Org::A]);
        seed_membership(&db, a, Org::A, year, MembershipStatus::Active);
        seed_preference(&db, a, true, true, true);

        let b = seed_user(&db, "b@example.org", &[Org::B]);
        seed_membership(&db, b, Org::B, year, MembershipStatus::Active);
        seed_preference(&db, b, true, true, true);

        // Lapsed member excluded from the current-year candidate set.
        let lapsed = seed_user(&db, "lapsed@example.org", &[Org::A]);
        seed_membership(&db, lapsed, Org::A, year - 1, MembershipStatus::Active);
        seed_preference(&db, lapsed, true, true, true);

        let comm = communication(
            Org::B,
            Audience::Legacy {
                rule: LegacyAudience::OrgA,
            },
        );
        let recipients = resolve_recipients(&db, &comm, year).unwrap();
        assert_eq!(emails(&recipients), vec!["a@example.org"]);
    }

    #[test]
    fn criteria_dedup_and_own_flag_even_cross_org() {
        let db = Database::open_in_memory().unwrap();

        let u = seed_user(&db, "u@example.org", &[Org::A, Org::B]);
        seed_membership(&db, u, Org::A, YEAR, MembershipStatus::Active);
        seed_membership(&db, u, Org::B, YEAR, MembershipStatus::Active);
        seed_preference(&db, u, true, false, false);

        let v = seed_user(&db, "v@example.org", &[Org::B]);
        seed_membership(&db, v, Org::B, YEAR, MembershipStatus::Active);
        seed_preference(&db, v, false, true, true);

        let comm = communication(
            Org::A,
            Audience::Criteria {
                criteria: vec![
                    MembershipCriterion {
                        org: Org::A,
                        year: YEAR,
                        status: MembershipStatus::Active,
                    },
                    MembershipCriterion {
                        org: Org::B,
                        year: YEAR,
                        status: MembershipStatus::Active,
                    },
                ],
            },
        );
        let recipients = resolve_recipients(&db, &comm, YEAR).unwrap();
        // u matches both criteria but appears once; v is gated out by the
        // own-group flag even though the second criterion names their org.
        assert_eq!(emails(&recipients), vec!["u@example.org"]);
    }

    #[test]
    fn missing_preference_row_excludes_in_resolution() {
        let db = Database::open_in_memory().unwrap();
        let year = Utc::now().year();

        let u = seed_user(&db, "noprefs@example.org", &[Org::A]);
        seed_membership(&db, u, Org::A, year, MembershipStatus::Active);
        // No preference row: the stored defaults would opt them in, but
        // resolution treats the absence as fully opted out.

        for audience in [
            Audience::HealthAlert,
            Audience::Legacy {
                rule: LegacyAudience::OwnGroup,
            },
            Audience::Criteria {
                criteria: vec![MembershipCriterion {
                    org: Org::A,
                    year,
                    status: MembershipStatus::Active,
                }],
            },
        ] {
            let comm = communication(Org::A, audience);
            let recipients = resolve_recipients(&db, &comm, year).unwrap();
            assert!(recipients.is_empty());
        }
    }
}
