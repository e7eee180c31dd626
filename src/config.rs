use crate::certificate_index::CertificateNaming;
use anyhow::{bail, Context};
use lettre::message::Mailbox;
use lettre::Address;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub smtp: SmtpConfig,
    pub campaign: CampaignConfig,
    pub input: InputConfig,
    pub template: TemplateConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub server: String,            // SMTP server hostname
    pub port: Option<u16>,         // default: 465 implicit, 587 starttls, 25 none
    #[serde(default)]
    pub tls: TlsMode,
    pub username: Option<String>,  // SMTP username (optional for anonymous relays)
    #[serde(default = "default_password_env")]
    pub password_env: String,      // environment variable holding the password or token
    pub from_email: String,
    pub from_name: Option<String>,
    pub reply_to: Option<String>,
    pub timeout_seconds: Option<u64>, // default: 30
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// TLS from the first byte (SMTPS).
    #[default]
    Implicit,
    /// Plain connection upgraded with STARTTLS.
    StartTls,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub certificates_dir: PathBuf,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    #[serde(default = "default_file_extension")]
    pub file_extension: String,
    pub ledger_path: PathBuf,
    /// Treat a substring lookup with several candidates as not found.
    #[serde(default)]
    pub strict_matching: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    pub path: PathBuf,
    pub delimiter: Option<char>, // sniffed from the header when absent
    pub columns: ColumnMapping,
}

/// Header names of the input columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub name: String,
    pub email: String,
    pub title: Option<String>, // presence switches to presentation certificates
    pub authors: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub subject: String,
    pub body: Option<String>,
    pub body_file: Option<PathBuf>,
    #[serde(default = "default_test_subject")]
    pub test_subject: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingConfig {
    pub delay_seconds: u64,       // after every successful send
    pub batch_size: u32,          // sends between long pauses
    pub batch_delay_seconds: u64, // replaces the short delay after each batch
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            delay_seconds: 10,
            batch_size: 10,
            batch_delay_seconds: 60,
        }
    }
}

fn default_password_env() -> String {
    "CERT_MAILER_SMTP_PASSWORD".to_string()
}

fn default_file_prefix() -> String {
    CertificateNaming::default().prefix
}

fn default_file_extension() -> String {
    CertificateNaming::default().extension
}

fn default_test_subject() -> String {
    "Test email - certificate delivery".to_string()
}

const DEFAULT_BODY: &str = r#"<html>
<body style="font-family: Arial, sans-serif; line-height: 1.6;">
<p>Hello <b>{name}</b>,</p>
<p>Thank you for taking part in the congress. Your certificate of participation is attached to this email.</p>
<p>Best regards,</p>
<p><i>The organizing committee</i></p>
</body>
</html>
"#;

impl Default for Config {
    fn default() -> Self {
        Config {
            smtp: SmtpConfig {
                server: "smtp.example.com".to_string(),
                port: Some(465),
                tls: TlsMode::Implicit,
                username: Some("certificates@example.com".to_string()),
                password_env: default_password_env(),
                from_email: "certificates@example.com".to_string(),
                from_name: Some("Congress Certificates".to_string()),
                reply_to: None,
                timeout_seconds: Some(30),
            },
            campaign: CampaignConfig {
                certificates_dir: PathBuf::from("certificates"),
                file_prefix: default_file_prefix(),
                file_extension: default_file_extension(),
                ledger_path: PathBuf::from("sent_certificates.json"),
                strict_matching: false,
            },
            input: InputConfig {
                path: PathBuf::from("registrations.csv"),
                delimiter: None,
                columns: ColumnMapping {
                    name: "Name".to_string(),
                    email: "Email".to_string(),
                    title: None,
                    authors: None,
                },
            },
            template: TemplateConfig {
                subject: "Certificate of participation".to_string(),
                body: Some(DEFAULT_BODY.to_string()),
                body_file: None,
                test_subject: default_test_subject(),
            },
            pacing: PacingConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {path}"))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file {path}"))?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Checks that do not touch the network or the filesystem.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.smtp.server.trim().is_empty() {
            bail!("smtp.server must not be empty");
        }
        self.smtp.from_mailbox()?;
        self.smtp.reply_to_mailbox()?;

        if self.pacing.batch_size == 0 {
            bail!("pacing.batch_size must be at least 1");
        }
        if let Some(delimiter) = self.input.delimiter {
            if !delimiter.is_ascii() {
                bail!("input.delimiter must be an ASCII character, got {delimiter:?}");
            }
        }
        if self.input.columns.authors.is_some() && self.input.columns.title.is_none() {
            bail!("input.columns.authors requires input.columns.title");
        }
        match (&self.template.body, &self.template.body_file) {
            (Some(_), Some(_)) => bail!("set only one of template.body and template.body_file"),
            (None, None) => bail!("one of template.body or template.body_file is required"),
            _ => {}
        }
        Ok(())
    }
}

impl SmtpConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(match self.tls {
            TlsMode::Implicit => 465,
            TlsMode::StartTls => 587,
            TlsMode::None => 25,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(30))
    }

    pub fn from_mailbox(&self) -> anyhow::Result<Mailbox> {
        let address: Address = self
            .from_email
            .parse()
            .with_context(|| format!("smtp.from_email is not a valid address: {}", self.from_email))?;
        Ok(Mailbox::new(self.from_name.clone(), address))
    }

    pub fn reply_to_mailbox(&self) -> anyhow::Result<Option<Mailbox>> {
        self.reply_to
            .as_deref()
            .map(|reply_to| {
                reply_to
                    .parse::<Mailbox>()
                    .with_context(|| format!("smtp.reply_to is not a valid mailbox: {reply_to}"))
            })
            .transpose()
    }
}

impl CampaignConfig {
    pub fn naming(&self) -> CertificateNaming {
        CertificateNaming {
            prefix: self.file_prefix.clone(),
            extension: self.file_extension.clone(),
        }
    }
}

impl ColumnMapping {
    /// Presentation certificates are keyed by name and title.
    pub fn is_presenter_flow(&self) -> bool {
        self.title.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cert-mailer.yaml");
        let path = path.to_str().unwrap();

        Config::default().to_file(path).unwrap();
        let loaded = Config::from_file(path).unwrap();

        assert_eq!(loaded.smtp.server, "smtp.example.com");
        assert_eq!(loaded.smtp.tls, TlsMode::Implicit);
        assert_eq!(loaded.pacing, PacingConfig::default());
        assert_eq!(loaded.campaign.file_prefix, "certificado_");
    }

    #[test]
    fn test_minimal_presenter_config() {
        let yaml = r#"
smtp:
  server: smtp.hostinger.com
  tls: starttls
  username: info@example.org
  from_email: info@example.org
campaign:
  certificates_dir: certificados_expositores
  ledger_path: sent_certificates.json
input:
  path: presentadores.csv
  delimiter: ";"
  columns:
    name: PRESENTADOR/A
    email: EMAIL
    title: TITULO
    authors: AUTORES
template:
  subject: Certificado
  body: "<p>{name}: {title} - {authors}</p>"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.smtp.port(), 587);
        assert_eq!(config.smtp.password_env, "CERT_MAILER_SMTP_PASSWORD");
        assert_eq!(config.campaign.naming(), CertificateNaming::default());
        assert_eq!(config.input.delimiter, Some(';'));
        assert!(config.input.columns.is_presenter_flow());
        assert_eq!(config.pacing.batch_size, 10);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.smtp.from_email = "not an address".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pacing.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.template.body_file = Some(PathBuf::from("body.html"));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.input.columns.authors = Some("Authors".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mailboxes() {
        let mut smtp = Config::default().smtp;
        smtp.reply_to = Some("Committee <committee@example.com>".to_string());

        let from = smtp.from_mailbox().unwrap();
        assert_eq!(from.email.to_string(), "certificates@example.com");
        assert_eq!(from.name.as_deref(), Some("Congress Certificates"));
        assert!(smtp.reply_to_mailbox().unwrap().is_some());
    }
}
