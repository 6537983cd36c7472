//! Invitation lifecycle rules
//!
//! `pending|sent -> accepted | revoked`, with `expired` derived from the
//! clock at read time.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::domain::invitations::{Invitation, InvitationStatus};
use crate::error::{FieldError, RuleViolation};

pub const MAX_DAYS_VALID: i64 = 365;

/// Lower-cased, trimmed address, or a validation error
pub fn normalize_email(raw: &str) -> Result<String, RuleViolation> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(email)
    } else {
        Err(RuleViolation::validation("email", "is not a valid email address"))
    }
}

/// Validate the input of `invite` before touching storage
pub fn validate_invite(
    email: &str,
    company_name: &str,
    days_valid: i64,
) -> Result<String, RuleViolation> {
    let mut fields = Vec::new();

    let email = match normalize_email(email) {
        Ok(email) => Some(email),
        Err(RuleViolation::Validation(mut errs)) => {
            fields.append(&mut errs);
            None
        }
        Err(other) => return Err(other),
    };
    if company_name.trim().is_empty() {
        fields.push(FieldError::new("company_name", "is required"));
    }
    if !(1..=MAX_DAYS_VALID).contains(&days_valid) {
        fields.push(FieldError::new(
            "days_valid",
            format!("must be between 1 and {}", MAX_DAYS_VALID),
        ));
    }

    match email {
        Some(email) if fields.is_empty() => Ok(email),
        _ => Err(RuleViolation::Validation(fields)),
    }
}

/// Reject when another invitation for the same address is still live
pub fn ensure_no_live_invitation(
    existing: &[Invitation],
    email: &str,
    now: DateTime<Utc>,
) -> Result<(), RuleViolation> {
    let live = existing.iter().any(|inv| {
        inv.email.eq_ignore_ascii_case(email)
            && !matches!(
                inv.effective_status(now),
                InvitationStatus::Expired | InvitationStatus::Revoked
            )
    });

    if live {
        Err(RuleViolation::DuplicateInvitation(email.to_string()))
    } else {
        Ok(())
    }
}

/// Build a new invitation valid for `days_valid` days from `now`
pub fn new_invitation(
    email: String,
    company_name: &str,
    days_valid: i64,
    send_email: bool,
    now: DateTime<Utc>,
) -> Invitation {
    let (status, sent_at) = if send_email {
        (InvitationStatus::Sent, Some(now))
    } else {
        (InvitationStatus::Pending, None)
    };

    Invitation {
        id: Uuid::new_v4(),
        email,
        company_name: company_name.trim().to_string(),
        token: Uuid::new_v4(),
        status,
        expires_at: now + Duration::days(days_valid),
        sent_at,
        accepted_at: None,
        revoked_at: None,
        created_at: now,
    }
}

/// Revocation is allowed while open or expired, never once accepted
pub fn ensure_revocable(inv: &Invitation, now: DateTime<Utc>) -> Result<(), RuleViolation> {
    match inv.effective_status(now) {
        InvitationStatus::Pending | InvitationStatus::Sent | InvitationStatus::Expired => Ok(()),
        InvitationStatus::Accepted => Err(RuleViolation::InvalidState(
            "an accepted invitation cannot be revoked".to_string(),
        )),
        InvitationStatus::Revoked => Err(RuleViolation::InvalidState(
            "invitation is already revoked".to_string(),
        )),
    }
}

/// Acceptance requires an open, unexpired invitation
pub fn ensure_acceptable(inv: &Invitation, now: DateTime<Utc>) -> Result<(), RuleViolation> {
    match inv.effective_status(now) {
        InvitationStatus::Pending | InvitationStatus::Sent => Ok(()),
        other => Err(RuleViolation::InvalidState(format!(
            "invitation is {} and can no longer be accepted",
            other.as_str()
        ))),
    }
}
