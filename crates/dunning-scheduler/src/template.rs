//! Reminder email templates (Tera).
//!
//! Templates are compiled once at startup so a syntax error surfaces as a
//! configuration failure instead of a failed send.
//!
//! Available variables: `client_name`, `company`, `invoice_number`, `amount`,
//! `currency`, `due_date`, `issue_date`, `days_overdue`, `step`,
//! `sender_name`.

use chrono::NaiveDate;
use dunning_core::config::StepConfig;
use dunning_core::{Client, DunningError, Invoice, Result};
use tera::{Context, Tera};

const DATE_FORMAT: &str = "%d/%m/%Y";

/// A rendered reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
}

pub struct ReminderTemplates {
    tera: Tera,
    sender_name: String,
}

impl ReminderTemplates {
    pub fn new(steps: &[StepConfig], sender_name: &str) -> Result<Self> {
        let mut tera = Tera::default();
        let templates: Vec<(String, String)> = steps
            .iter()
            .flat_map(|s| {
                [
                    (subject_name(s.step), s.subject.clone()),
                    (body_name(s.step), s.body.clone()),
                ]
            })
            .collect();
        tera.add_raw_templates(templates).map_err(|e| {
            DunningError::PolicyMisconfigured(format!("invalid template: {}", describe(&e)))
        })?;
        Ok(Self {
            tera,
            sender_name: sender_name.to_string(),
        })
    }

    pub fn render(
        &self,
        step: u32,
        client: &Client,
        invoice: &Invoice,
        today: NaiveDate,
    ) -> Result<RenderedEmail> {
        let mut ctx = Context::new();
        ctx.insert("client_name", &client.name);
        ctx.insert("company", &client.company.clone().unwrap_or_default());
        ctx.insert("invoice_number", &invoice.invoice_number);
        ctx.insert("amount", &format!("{:.2}", invoice.amount));
        ctx.insert("currency", &invoice.currency);
        ctx.insert("due_date", &invoice.due_date.format(DATE_FORMAT).to_string());
        ctx.insert("issue_date", &invoice.issue_date.format(DATE_FORMAT).to_string());
        ctx.insert("days_overdue", &invoice.days_overdue(today).max(0));
        ctx.insert("step", &step);
        ctx.insert("sender_name", &self.sender_name);

        let subject = self
            .tera
            .render(&subject_name(step), &ctx)
            .map_err(|e| DunningError::Template(describe(&e)))?;
        let body = self
            .tera
            .render(&body_name(step), &ctx)
            .map_err(|e| DunningError::Template(describe(&e)))?;
        Ok(RenderedEmail {
            subject: subject.trim().to_string(),
            body,
        })
    }
}

fn subject_name(step: u32) -> String {
    format!("step-{step}.subject")
}

fn body_name(step: u32) -> String {
    format!("step-{step}.body")
}

/// Tera nests the useful message in the source chain.
fn describe(err: &tera::Error) -> String {
    let mut msg = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        msg.push_str(": ");
        msg.push_str(&inner.to_string());
        source = inner.source();
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dunning_core::PaymentStatus;
    use dunning_core::config::EscalationConfig;
    use rust_decimal::Decimal;

    fn fixtures() -> (Client, Invoice) {
        let now = Utc::now();
        let client = Client {
            id: 1,
            name: "Jane Martin".into(),
            email: "jane@acme.test".into(),
            company: Some("Acme".into()),
            phone: None,
            address: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let invoice = Invoice {
            id: 1,
            client_id: 1,
            invoice_number: "F-2025-042".into(),
            amount: Decimal::new(12345, 1),
            currency: "EUR".into(),
            issue_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
            status: PaymentStatus::Unpaid,
            description: None,
            created_at: now,
            updated_at: now,
        };
        (client, invoice)
    }

    #[test]
    fn test_render_default_steps() {
        let templates =
            ReminderTemplates::new(&EscalationConfig::default().steps, "Acme Billing").unwrap();
        let (client, invoice) = fixtures();
        let today = NaiveDate::from_ymd_opt(2025, 2, 15).unwrap();

        let email = templates.render(1, &client, &invoice, today).unwrap();
        assert_eq!(email.subject, "Reminder: invoice F-2025-042 is due");
        assert!(email.body.contains("Hello Jane Martin"));
        assert!(email.body.contains("1234.50 EUR"));
        assert!(email.body.contains("31/01/2025"));
        assert!(email.body.ends_with("Acme Billing"));

        let email = templates.render(3, &client, &invoice, today).unwrap();
        assert!(email.body.contains("15 days overdue"));
    }

    #[test]
    fn test_invalid_template_is_misconfiguration() {
        let steps = vec![StepConfig {
            step: 1,
            offset_days: 1,
            subject: "{{ invoice_number".into(),
            body: "ok".into(),
        }];
        assert!(matches!(
            ReminderTemplates::new(&steps, "x"),
            Err(DunningError::PolicyMisconfigured(_))
        ));
    }

    #[test]
    fn test_unknown_variable_fails_render() {
        let steps = vec![StepConfig {
            step: 1,
            offset_days: 1,
            subject: "Hi".into(),
            body: "{{ iban }}".into(),
        }];
        let templates = ReminderTemplates::new(&steps, "x").unwrap();
        let (client, invoice) = fixtures();
        let today = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        assert!(matches!(
            templates.render(1, &client, &invoice, today),
            Err(DunningError::Template(_))
        ));
    }
}
