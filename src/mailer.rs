use crate::config::{SmtpConfig, TlsMode};
use anyhow::Context;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::{ExposeSecret, SecretString};
use std::path::Path;

const USER_AGENT: &str = concat!("cert-mailer/", env!("CARGO_PKG_VERSION"));

/// Permanent replies that concern the recipient mailbox or address.
const RECIPIENT_REJECTION_CODES: [&str; 5] = ["501", "550", "551", "553", "555"];

/// Replies that mean the provider stopped accepting mail for now.
const THROTTLING_CODES: [&str; 1] = ["421"];

const TEST_BODY: &str = r#"<html>
<body>
<p>This is a test message to verify the mail configuration.</p>
<p>If you received it, the configuration works.</p>
</body>
</html>
"#;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Permanent failure for this recipient only.
    #[error("recipient rejected: {0}")]
    RecipientRejected(String),
    /// The provider's sending limit was hit; later sends would fail too.
    #[error("sending limit exceeded: {0}")]
    RateLimitExceeded(String),
    #[error("transport error: {0}")]
    Other(String),
}

/// Sort a failed SMTP exchange into the delivery loop's categories.
pub fn classify_failure(code: Option<&str>, message: &str) -> TransportError {
    let lowered = message.to_lowercase();
    let detail = message.to_string();
    if lowered.contains("exceeded")
        || lowered.contains("limit")
        || code.is_some_and(|c| THROTTLING_CODES.contains(&c))
    {
        return TransportError::RateLimitExceeded(detail);
    }
    if code.is_some_and(|c| RECIPIENT_REJECTION_CODES.contains(&c)) {
        return TransportError::RecipientRejected(detail);
    }
    TransportError::Other(detail)
}

fn classify_smtp_error(error: &lettre::transport::smtp::Error) -> TransportError {
    let code = error.status().map(|code| code.to_string());
    classify_failure(code.as_deref(), &error.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "certificate".to_string());
        Ok(Self {
            file_name,
            content_type: content_type_for(path),
            bytes,
        })
    }
}

pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub attachment: Option<Attachment>,
}

/// Mail transport as seen by the delivery loop.
#[allow(async_fn_in_trait)]
pub trait Mailer {
    /// Pre-flight: connect, negotiate TLS and authenticate.
    async fn verify(&self) -> Result<(), TransportError>;

    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError>;
}

/// SMTP mailer over lettre's async transport.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    reply_to: Option<Mailbox>,
    server: String,
    port: u16,
    username: Option<String>,
}

impl SmtpMailer {
    /// Build from configuration, reading the password from `password_env`.
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let password = match &config.username {
            Some(_) => {
                let password = std::env::var(&config.password_env).with_context(|| {
                    format!(
                        "SMTP password not set: export it in the {} environment variable",
                        config.password_env
                    )
                })?;
                Some(SecretString::from(password))
            }
            None => None,
        };
        Self::with_password(config, password)
    }

    pub fn with_password(
        config: &SmtpConfig,
        password: Option<SecretString>,
    ) -> anyhow::Result<Self> {
        let port = config.port();
        let builder = match config.tls {
            TlsMode::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.server)?,
            TlsMode::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)?
            }
            TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.server),
        };
        let mut builder = builder.port(port).timeout(Some(config.timeout()));

        if let (Some(username), Some(password)) = (&config.username, &password) {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.expose_secret().to_string(),
            ));
        }

        log::debug!(
            "SMTP transport for {}:{} ({:?} TLS)",
            config.server,
            port,
            config.tls
        );

        Ok(Self {
            transport: builder.build(),
            from: config.from_mailbox()?,
            reply_to: config.reply_to_mailbox()?,
            server: config.server.clone(),
            port,
            username: config.username.clone(),
        })
    }

    /// Send a fixed test message without attachment.
    pub async fn send_test(&self, to: &str, subject: &str) -> Result<(), TransportError> {
        self.send(&OutgoingMessage {
            to: to.to_string(),
            subject: subject.to_string(),
            html_body: TEST_BODY.to_string(),
            attachment: None,
        })
        .await
    }

    fn build_message(&self, message: &OutgoingMessage) -> Result<Message, TransportError> {
        let to: Mailbox = message.to.parse().map_err(|e| {
            TransportError::RecipientRejected(format!("invalid address '{}': {e}", message.to))
        })?;

        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone())
            .user_agent(USER_AGENT.to_string());
        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(reply_to.clone());
        }

        let html = SinglePart::builder()
            .header(ContentType::TEXT_HTML)
            .body(message.html_body.clone());

        let built = match &message.attachment {
            Some(attachment) => {
                let content_type = ContentType::parse(attachment.content_type).map_err(|e| {
                    TransportError::Other(format!(
                        "bad content type {}: {e}",
                        attachment.content_type
                    ))
                })?;
                let file = lettre::message::Attachment::new(attachment.file_name.clone())
                    .body(attachment.bytes.clone(), content_type);
                builder.multipart(MultiPart::mixed().singlepart(html).singlepart(file))
            }
            None => builder.singlepart(html),
        };

        built.map_err(|e| TransportError::Other(format!("cannot build message: {e}")))
    }
}

impl Mailer for SmtpMailer {
    async fn verify(&self) -> Result<(), TransportError> {
        log::info!(
            "Testing SMTP connection to {}:{} as {}",
            self.server,
            self.port,
            self.username.as_deref().unwrap_or("<anonymous>")
        );
        match self.transport.test_connection().await {
            Ok(true) => {
                log::info!("SMTP connection and login successful");
                Ok(())
            }
            Ok(false) => Err(TransportError::Other(format!(
                "{}:{} accepted the connection but did not answer",
                self.server, self.port
            ))),
            Err(e) => Err(TransportError::Other(format!(
                "{}:{}: {e}",
                self.server, self.port
            ))),
        }
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        let built = self.build_message(message)?;
        log::debug!("Sending '{}' to {}", message.subject, message.to);
        self.transport.send(built).await.map_err(|e| {
            let error = classify_smtp_error(&e);
            log::warn!("Sending to {} failed: {error}", message.to);
            error
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn plain_mailer() -> SmtpMailer {
        let mut config = Config::default().smtp;
        config.tls = TlsMode::None;
        config.server = "localhost".to_string();
        config.reply_to = Some("Committee <committee@example.com>".to_string());
        SmtpMailer::with_password(&config, Some(SecretString::from("secret".to_string())))
            .unwrap()
    }

    #[test]
    fn test_classify_rate_limit_by_text() {
        assert!(matches!(
            classify_failure(Some("550"), "5.4.6 Daily sending quota EXCEEDED"),
            TransportError::RateLimitExceeded(_)
        ));
        assert!(matches!(
            classify_failure(None, "Ratelimit reached for user"),
            TransportError::RateLimitExceeded(_)
        ));
        assert!(matches!(
            classify_failure(Some("421"), "Try again later"),
            TransportError::RateLimitExceeded(_)
        ));
    }

    #[test]
    fn test_classify_recipient_rejection() {
        assert!(matches!(
            classify_failure(Some("550"), "5.1.1 mailbox unavailable"),
            TransportError::RecipientRejected(_)
        ));
        assert!(matches!(
            classify_failure(Some("553"), "mailbox name not allowed"),
            TransportError::RecipientRejected(_)
        ));
    }

    #[test]
    fn test_classify_other_failures() {
        assert!(matches!(
            classify_failure(Some("451"), "local error in processing"),
            TransportError::Other(_)
        ));
        assert!(matches!(
            classify_failure(None, "connection reset by peer"),
            TransportError::Other(_)
        ));
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("a/certificado_ana.pdf")), "application/pdf");
        assert_eq!(content_type_for(Path::new("certificado_ana.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("certificado_ana.jpeg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("certificado_ana")), "application/octet-stream");
    }

    #[test]
    fn test_attachment_from_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("certificado_josé pérez.pdf");
        std::fs::write(&path, b"%PDF-1.4 test").unwrap();

        let attachment = Attachment::from_path(&path).unwrap();
        assert_eq!(attachment.file_name, "certificado_josé pérez.pdf");
        assert_eq!(attachment.content_type, "application/pdf");
        assert_eq!(attachment.bytes, b"%PDF-1.4 test");
    }

    #[tokio::test]
    async fn test_build_message_with_attachment() {
        let mailer = plain_mailer();
        let message = mailer
            .build_message(&OutgoingMessage {
                to: "jp@example.com".to_string(),
                subject: "Certificado".to_string(),
                html_body: "<p>Hola José</p>".to_string(),
                attachment: Some(Attachment {
                    file_name: "certificado_jose perez.pdf".to_string(),
                    content_type: "application/pdf",
                    bytes: b"%PDF-1.4".to_vec(),
                }),
            })
            .unwrap();

        let raw = String::from_utf8_lossy(&message.formatted()).into_owned();
        assert!(raw.contains("To: jp@example.com"));
        assert!(raw.contains("Reply-To:"));
        assert!(raw.contains("committee@example.com"));
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("application/pdf"));
        assert!(raw.contains("certificado_jose perez.pdf"));
        assert!(raw.contains("cert-mailer/"));
    }

    #[tokio::test]
    async fn test_build_message_rejects_bad_recipient() {
        let mailer = plain_mailer();
        let result = mailer.build_message(&OutgoingMessage {
            to: "not an address".to_string(),
            subject: "Certificado".to_string(),
            html_body: String::new(),
            attachment: None,
        });
        assert!(matches!(result, Err(TransportError::RecipientRejected(_))));
    }
}
