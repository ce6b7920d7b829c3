//! Dunning configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DunningError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DunningConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl DunningConfig {
    /// Load config from `path` (defaults when the file is missing), then
    /// apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load_from(path)?
        } else {
            tracing::info!("📄 No config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DunningError::Config(format!("Failed to read config: {e}")))?;
        tracing::debug!("📄 Loading config from {}", path.display());
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| DunningError::Config(format!("Failed to parse config: {e}")))
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| DunningError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Environment variables take precedence over the file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("DUNNING_DATABASE_PATH") {
            self.database.path = v;
        }
        if let Some(v) = get("BREVO_API_KEY") {
            self.email.api_key = v;
        }
        if let Some(v) = get("DUNNING_SENDER_EMAIL") {
            self.email.sender_email = v;
        }
        if let Some(v) = get("DUNNING_SENDER_NAME") {
            self.email.sender_name = v;
        }
        if let Some(v) = get("DUNNING_API_KEY") {
            self.gateway.api_key = v;
        }
        if let Some(h) = get("DUNNING_SCHEDULER_HOUR").and_then(|v| v.parse().ok()) {
            self.scheduler.hour = h;
        }
        if let Some(m) = get("DUNNING_SCHEDULER_MINUTE").and_then(|v| v.parse().ok()) {
            self.scheduler.minute = m;
        }
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the dunning home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".dunning")
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.dunning/dunning.db".into() }

impl DatabaseConfig {
    /// Path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Email provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// "brevo" or "smtp".
    #[serde(default = "default_email_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_sender_email")]
    pub sender_email: String,
    #[serde(default = "default_sender_name")]
    pub sender_name: String,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: String,
    #[serde(default)]
    pub smtp_password: String,
    /// Per-send timeout enforced by the runner.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_email_provider() -> String { "brevo".into() }
fn default_api_url() -> String { "https://api.brevo.com/v3/smtp/email".into() }
fn default_sender_email() -> String { "noreply@example.com".into() }
fn default_sender_name() -> String { "Billing Department".into() }
fn default_smtp_port() -> u16 { 587 }
fn default_timeout_secs() -> u64 { 30 }

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            provider: default_email_provider(),
            api_key: String::new(),
            api_url: default_api_url(),
            sender_email: default_sender_email(),
            sender_name: default_sender_name(),
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            smtp_username: String::new(),
            smtp_password: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Daily batch scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_hour")]
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
    /// 5-field cron expression; overrides `hour`/`minute` when set.
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
}

fn bool_true() -> bool { true }
fn default_hour() -> u32 { 9 }
fn default_max_concurrent_sends() -> usize { 4 }

impl SchedulerConfig {
    /// The effective cron expression (UTC).
    pub fn expression(&self) -> String {
        match &self.cron {
            Some(expr) if !expr.trim().is_empty() => expr.trim().to_string(),
            _ => format!("{} {} * * *", self.minute, self.hour),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: default_hour(),
            minute: 0,
            cron: None,
            max_concurrent_sends: default_max_concurrent_sends(),
        }
    }
}

/// Escalation sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    #[serde(default = "default_steps")]
    pub steps: Vec<StepConfig>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self { steps: default_steps() }
    }
}

/// One escalation step with its email templates (Tera syntax).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    pub step: u32,
    pub offset_days: i64,
    pub subject: String,
    pub body: String,
}

fn default_steps() -> Vec<StepConfig> {
    vec![
        StepConfig {
            step: 1,
            offset_days: 1,
            subject: "Reminder: invoice {{ invoice_number }} is due".into(),
            body: "Hello {{ client_name }},

This is a reminder that invoice {{ invoice_number }} for {{ amount }} {{ currency }} was due on {{ due_date }}.

We would be grateful if you could arrange payment at your earliest convenience.

If you have already paid, please disregard this message.

Kind regards,
{{ sender_name }}"
                .into(),
        },
        StepConfig {
            step: 2,
            offset_days: 7,
            subject: "Second reminder: invoice {{ invoice_number }} is unpaid".into(),
            body: "Hello {{ client_name }},

Unless we are mistaken, we have not yet received payment for invoice {{ invoice_number }} for {{ amount }} {{ currency }}, due since {{ due_date }}.

Please settle this invoice as soon as possible.

Do not hesitate to contact us with any questions.

Kind regards,
{{ sender_name }}"
                .into(),
        },
        StepConfig {
            step: 3,
            offset_days: 15,
            subject: "URGENT: invoice {{ invoice_number }} is overdue".into(),
            body: "Hello {{ client_name }},

Despite our previous reminders, invoice {{ invoice_number }} for {{ amount }} {{ currency }} remains unpaid.

It was due on {{ due_date }} and is now {{ days_overdue }} days overdue.

Please pay within 48 hours to avoid collection proceedings.

Kind regards,
{{ sender_name }}"
                .into(),
        },
        StepConfig {
            step: 4,
            offset_days: 30,
            subject: "FINAL NOTICE: invoice {{ invoice_number }} - action required".into(),
            body: "Hello {{ client_name }},

This is our final reminder regarding invoice {{ invoice_number }} for {{ amount }} {{ currency }}, unpaid since {{ due_date }}.

Without payment within 7 days, we will have to hand this file over to our collections department.

To avoid this, please pay immediately or contact us to agree on a payment plan.

Kind regards,
{{ sender_name }}"
                .into(),
        },
    ]
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Required as `X-API-Key` on `/api/*` when non-empty.
    #[serde(default)]
    pub api_key: String,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 8000 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = DunningConfig::default();
        let offsets: Vec<i64> = config.escalation.steps.iter().map(|s| s.offset_days).collect();
        assert_eq!(offsets, vec![1, 7, 15, 30]);
        assert_eq!(config.scheduler.expression(), "0 9 * * *");
        assert_eq!(config.email.timeout_secs, 30);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = DunningConfig::parse(
            r#"
            [scheduler]
            hour = 7
            minute = 30

            [[escalation.steps]]
            step = 1
            offset_days = 3
            subject = "Due {{ invoice_number }}"
            body = "Please pay"
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.expression(), "30 7 * * *");
        assert_eq!(config.escalation.steps.len(), 1);
        assert_eq!(config.escalation.steps[0].offset_days, 3);
        assert_eq!(config.gateway.port, 8000);
    }

    #[test]
    fn test_cron_overrides_hour() {
        let config = DunningConfig::parse("[scheduler]\ncron = \"15 6 * * *\"\n").unwrap();
        assert_eq!(config.scheduler.expression(), "15 6 * * *");
    }

    #[test]
    fn test_load_file_or_defaults() {
        let dir = std::env::temp_dir().join(format!("dunning-config-{}", std::process::id()));
        let path = dir.join("config.toml");
        let _ = std::fs::remove_dir_all(&dir);

        let missing = DunningConfig::load(&path).unwrap();
        assert_eq!(missing.gateway.port, 8000);

        let mut config = DunningConfig::default();
        config.gateway.port = 9100;
        config.save_to(&path).unwrap();
        let loaded = DunningConfig::load(&path).unwrap();
        assert_eq!(loaded.gateway.port, 9100);
        assert_eq!(loaded.escalation.steps.len(), 4);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            DunningConfig::parse("[scheduler\nhour = 1"),
            Err(DunningError::Config(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("BREVO_API_KEY", "xkeysib-123"),
            ("DUNNING_SCHEDULER_HOUR", "6"),
            ("DUNNING_SCHEDULER_MINUTE", "not-a-number"),
        ]);
        let mut config = DunningConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.email.api_key, "xkeysib-123");
        assert_eq!(config.scheduler.hour, 6);
        assert_eq!(config.scheduler.minute, 0);
    }
}
