use chrono::{DateTime, Utc};
use sentinel_common::types::{Alert, AlertStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Only OPEN alerts can be acknowledged (alert {id} is {status})")]
    NotOpen { id: String, status: AlertStatus },

    #[error("Alert {id} is already resolved")]
    AlreadyResolved { id: String },

    #[error("Alert {id} is closed as {status}")]
    Closed { id: String, status: AlertStatus },
}

// Transition stamps never precede the alert's creation.
fn stamp(alert: &Alert, now: DateTime<Utc>) -> DateTime<Utc> {
    now.max(alert.created_at)
}

/// OPEN -> ACKNOWLEDGED.
pub fn acknowledge(alert: &mut Alert, by: &str, now: DateTime<Utc>) -> Result<(), TransitionError> {
    if alert.status != AlertStatus::Open {
        return Err(TransitionError::NotOpen {
            id: alert.id.clone(),
            status: alert.status,
        });
    }
    let at = stamp(alert, now);
    alert.status = AlertStatus::Acknowledged;
    alert.acknowledged_by = Some(by.to_string());
    alert.acknowledged_at = Some(at);
    alert.updated_at = at;
    Ok(())
}

/// OPEN or ACKNOWLEDGED -> RESOLVED.
pub fn resolve(
    alert: &mut Alert,
    by: &str,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    match alert.status {
        AlertStatus::Resolved => {
            return Err(TransitionError::AlreadyResolved {
                id: alert.id.clone(),
            })
        }
        AlertStatus::FalsePositive => {
            return Err(TransitionError::Closed {
                id: alert.id.clone(),
                status: alert.status,
            })
        }
        AlertStatus::Open | AlertStatus::Acknowledged => {}
    }
    let at = stamp(alert, now);
    alert.status = AlertStatus::Resolved;
    alert.resolved_by = Some(by.to_string());
    alert.resolved_at = Some(at);
    alert.resolution_notes = notes.map(str::to_string);
    alert.updated_at = at;
    Ok(())
}

/// OPEN or ACKNOWLEDGED -> FALSE_POSITIVE, recorded as resolved by `by`.
pub fn mark_false_positive(
    alert: &mut Alert,
    by: &str,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    if alert.status.is_terminal() {
        return Err(TransitionError::Closed {
            id: alert.id.clone(),
            status: alert.status,
        });
    }
    let at = stamp(alert, now);
    alert.status = AlertStatus::FalsePositive;
    alert.resolved_by = Some(by.to_string());
    alert.resolved_at = Some(at);
    alert.updated_at = at;
    Ok(())
}
