//! Escalation policy: which reminder step, if any, is due for an invoice.
//!
//! Steps are independent: a later step may fire even if an earlier one was
//! never sent (e.g. the provider was down that day). At most one step is
//! returned per evaluation, the most escalated one whose offset has elapsed.

use std::collections::BTreeSet;

use chrono::{NaiveDate, TimeDelta};
use dunning_core::config::EscalationConfig;
use dunning_core::{DunningError, Invoice, Result};
use serde::{Deserialize, Serialize};

/// One stage of the reminder sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationStep {
    /// 1-based, contiguous.
    pub step: u32,
    /// Days after the due date.
    pub offset_days: i64,
}

impl EscalationStep {
    pub fn new(step: u32, offset_days: i64) -> Self {
        Self { step, offset_days }
    }

    /// Date from which this step may be sent, `None` on calendar overflow.
    pub fn fires_on(&self, due_date: NaiveDate) -> Option<NaiveDate> {
        due_date.checked_add_signed(TimeDelta::try_days(self.offset_days)?)
    }
}

/// Validated, immutable escalation sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationPolicy {
    steps: Vec<EscalationStep>,
}

impl EscalationPolicy {
    /// Build a policy, rejecting malformed sequences.
    pub fn new(steps: Vec<EscalationStep>) -> Result<Self> {
        validate(&steps)?;
        Ok(Self { steps })
    }

    pub fn from_config(config: &EscalationConfig) -> Result<Self> {
        Self::new(
            config
                .steps
                .iter()
                .map(|s| EscalationStep::new(s.step, s.offset_days))
                .collect(),
        )
    }

    /// The default +1 / +7 / +15 / +30 sequence.
    pub fn standard() -> Self {
        Self {
            steps: vec![
                EscalationStep::new(1, 1),
                EscalationStep::new(2, 7),
                EscalationStep::new(3, 15),
                EscalationStep::new(4, 30),
            ],
        }
    }

    pub fn steps(&self) -> &[EscalationStep] {
        &self.steps
    }

    pub fn step(&self, step: u32) -> Option<EscalationStep> {
        self.steps.iter().find(|s| s.step == step).copied()
    }

    /// Step due for `invoice` on `today`. Paid invoices are never due.
    pub fn next_due(
        &self,
        invoice: &Invoice,
        today: NaiveDate,
        sent: &BTreeSet<u32>,
    ) -> Option<EscalationStep> {
        if invoice.is_paid() {
            return None;
        }
        next_due_step(invoice.due_date, today, sent, &self.steps)
    }

    /// Lowest step not yet sent, ignoring dates. Used by the manual trigger.
    pub fn next_unsent(&self, sent: &BTreeSet<u32>) -> Option<EscalationStep> {
        self.steps.iter().find(|s| !sent.contains(&s.step)).copied()
    }
}

/// Check that steps are non-empty, numbered 1..=n in order, and that offsets
/// are non-negative and strictly increasing.
pub fn validate(steps: &[EscalationStep]) -> Result<()> {
    if steps.is_empty() {
        return Err(DunningError::PolicyMisconfigured(
            "escalation sequence is empty".into(),
        ));
    }
    let mut previous: Option<i64> = None;
    for (idx, s) in steps.iter().enumerate() {
        let expected = idx as u32 + 1;
        if s.step != expected {
            return Err(DunningError::PolicyMisconfigured(format!(
                "step indices must be contiguous from 1: found {} at position {}",
                s.step, expected
            )));
        }
        if s.offset_days < 0 {
            return Err(DunningError::PolicyMisconfigured(format!(
                "step {} has a negative offset ({})",
                s.step, s.offset_days
            )));
        }
        if let Some(prev) = previous
            && s.offset_days <= prev
        {
            return Err(DunningError::PolicyMisconfigured(format!(
                "offsets must be strictly increasing: step {} has {} after {}",
                s.step, s.offset_days, prev
            )));
        }
        previous = Some(s.offset_days);
    }
    Ok(())
}

/// Most escalated unsent step whose offset has elapsed on `today`.
///
/// A malformed sequence yields nothing rather than an error.
pub fn next_due_step(
    due_date: NaiveDate,
    today: NaiveDate,
    sent: &BTreeSet<u32>,
    steps: &[EscalationStep],
) -> Option<EscalationStep> {
    if validate(steps).is_err() || today < due_date {
        return None;
    }
    steps
        .iter()
        .filter(|s| !sent.contains(&s.step))
        .filter(|s| s.fires_on(due_date).is_some_and(|d| d <= today))
        .max_by_key(|s| s.offset_days)
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dunning_core::PaymentStatus;
    use rust_decimal::Decimal;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sent(steps: &[u32]) -> BTreeSet<u32> {
        steps.iter().copied().collect()
    }

    fn invoice(due: NaiveDate, status: PaymentStatus) -> Invoice {
        let now = Utc::now();
        Invoice {
            id: 1,
            client_id: 1,
            invoice_number: "F-2025-001".into(),
            amount: Decimal::new(50000, 2),
            currency: "EUR".into(),
            issue_date: due - TimeDelta::days(30),
            due_date: due,
            status,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_first_step_when_only_first_offset_elapsed() {
        let policy = EscalationPolicy::standard();
        let due = date(2025, 1, 31);
        for offset in 1..7 {
            let today = due + TimeDelta::days(offset);
            let step = next_due_step(due, today, &sent(&[]), policy.steps()).unwrap();
            assert_eq!(step.step, 1, "offset {offset}");
        }
    }

    #[test]
    fn test_no_resend_within_same_window() {
        let policy = EscalationPolicy::standard();
        let due = date(2025, 1, 31);
        assert_eq!(next_due_step(due, due + TimeDelta::days(3), &sent(&[1]), policy.steps()), None);
        assert_eq!(next_due_step(due, due + TimeDelta::days(10), &sent(&[1, 2]), policy.steps()), None);
    }

    #[test]
    fn test_most_advanced_step_wins() {
        let policy = EscalationPolicy::standard();
        let due = date(2025, 1, 31);
        let step = next_due_step(due, due + TimeDelta::days(40), &sent(&[]), policy.steps());
        assert_eq!(step, Some(EscalationStep::new(4, 30)));
    }

    #[test]
    fn test_worked_example() {
        let policy = EscalationPolicy::standard();
        let due = date(2025, 1, 31);
        let step = next_due_step(due, date(2025, 2, 1), &sent(&[]), policy.steps());
        assert_eq!(step.map(|s| s.step), Some(1));
        let step = next_due_step(due, date(2025, 3, 2), &sent(&[1]), policy.steps());
        assert_eq!(step.map(|s| s.step), Some(4));
    }

    #[test]
    fn test_skipped_steps_after_final_notice() {
        let policy = EscalationPolicy::standard();
        let due = date(2025, 1, 31);
        // Steps 2 and 3 never went out; 3 is the most advanced one left.
        let step = next_due_step(due, due + TimeDelta::days(45), &sent(&[1, 4]), policy.steps());
        assert_eq!(step.map(|s| s.step), Some(3));
        let step = next_due_step(due, due + TimeDelta::days(45), &sent(&[1, 2, 3, 4]), policy.steps());
        assert_eq!(step, None);
    }

    #[test]
    fn test_paid_invoice_never_due() {
        let policy = EscalationPolicy::standard();
        let due = date(2025, 1, 31);
        let paid = invoice(due, PaymentStatus::Paid);
        for days in [0, 1, 8, 16, 31, 400] {
            assert_eq!(policy.next_due(&paid, due + TimeDelta::days(days), &sent(&[])), None);
        }
        let unpaid = invoice(due, PaymentStatus::Unpaid);
        assert!(policy.next_due(&unpaid, due + TimeDelta::days(1), &sent(&[])).is_some());
    }

    #[test]
    fn test_future_due_date_never_due() {
        let policy = EscalationPolicy::standard();
        let due = date(2025, 6, 30);
        assert_eq!(next_due_step(due, date(2025, 6, 1), &sent(&[]), policy.steps()), None);
        // The due date itself: offset 1 has not elapsed yet.
        assert_eq!(next_due_step(due, due, &sent(&[]), policy.steps()), None);
    }

    #[test]
    fn test_malformed_policy_is_fail_safe() {
        let due = date(2025, 1, 31);
        let today = due + TimeDelta::days(100);
        assert_eq!(next_due_step(due, today, &sent(&[]), &[]), None);
        let unordered = [EscalationStep::new(1, 7), EscalationStep::new(2, 1)];
        assert_eq!(next_due_step(due, today, &sent(&[]), &unordered), None);
    }

    #[test]
    fn test_validation_errors() {
        assert!(EscalationPolicy::new(vec![]).is_err());
        assert!(EscalationPolicy::new(vec![EscalationStep::new(2, 1)]).is_err());
        assert!(
            EscalationPolicy::new(vec![EscalationStep::new(1, 5), EscalationStep::new(2, 5)])
                .is_err()
        );
        assert!(EscalationPolicy::new(vec![EscalationStep::new(1, -1)]).is_err());
        let err = EscalationPolicy::new(vec![EscalationStep::new(1, 1), EscalationStep::new(3, 7)])
            .unwrap_err();
        assert!(matches!(err, DunningError::PolicyMisconfigured(_)));
        assert!(EscalationPolicy::from_config(&EscalationConfig::default()).is_ok());
    }

    #[test]
    fn test_next_unsent() {
        let policy = EscalationPolicy::standard();
        assert_eq!(policy.next_unsent(&sent(&[])).map(|s| s.step), Some(1));
        assert_eq!(policy.next_unsent(&sent(&[1, 3])).map(|s| s.step), Some(2));
        assert_eq!(policy.next_unsent(&sent(&[1, 2, 3, 4])), None);
    }
}
