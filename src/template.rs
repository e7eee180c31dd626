use crate::config::TemplateConfig;
use crate::input::Recipient;
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;

const NAME: &str = "name";
const TITLE: &str = "title";
const AUTHORS: &str = "authors";

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("cannot read template body {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("template body is not configured")]
    MissingBody,
    #[error("unknown placeholder {{{0}}}, expected {{name}}, {{title}} or {{authors}}")]
    UnknownPlaceholder(String),
    #[error("placeholder {{{0}}} needs the presenter columns (title) to be mapped")]
    PresenterOnly(String),
}

/// Subject and HTML body with `{name}`, `{title}` and `{authors}` slots.
///
/// Values are substituted verbatim; HTML mail clients tolerate the
/// characters that show up in names and talk titles.
#[derive(Debug, Clone)]
pub struct EmailTemplate {
    subject: String,
    body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{([A-Za-z_]+)\}").expect("valid placeholder pattern"))
}

impl EmailTemplate {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }

    pub fn from_config(config: &TemplateConfig) -> Result<Self, TemplateError> {
        let body = match (&config.body, &config.body_file) {
            (Some(body), _) => body.clone(),
            (None, Some(path)) => {
                std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
                    path: path.clone(),
                    source,
                })?
            }
            (None, None) => return Err(TemplateError::MissingBody),
        };
        Ok(Self::new(config.subject.clone(), body))
    }

    /// Reject placeholders that would be left unsubstituted.
    pub fn validate(&self, presenter_flow: bool) -> Result<(), TemplateError> {
        for text in [&self.subject, &self.body] {
            for captures in placeholder_regex().captures_iter(text) {
                let placeholder = &captures[1];
                match placeholder {
                    NAME => {}
                    TITLE | AUTHORS if presenter_flow => {}
                    TITLE | AUTHORS => {
                        return Err(TemplateError::PresenterOnly(placeholder.to_string()))
                    }
                    other => return Err(TemplateError::UnknownPlaceholder(other.to_string())),
                }
            }
        }
        Ok(())
    }

    pub fn render(&self, recipient: &Recipient) -> RenderedEmail {
        RenderedEmail {
            subject: Self::substitute(&self.subject, recipient),
            body: Self::substitute(&self.body, recipient),
        }
    }

    fn substitute(text: &str, recipient: &Recipient) -> String {
        text.replace("{name}", &recipient.name)
            .replace("{title}", recipient.title.as_deref().unwrap_or_default())
            .replace("{authors}", recipient.authors.as_deref().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presenter() -> Recipient {
        Recipient {
            line: 2,
            name: "Ana Gómez".to_string(),
            email: Some("ana@example.com".to_string()),
            title: Some("Memoria & atención".to_string()),
            authors: Some("Gómez A., Ruiz B.".to_string()),
        }
    }

    #[test]
    fn test_render_substitutes_verbatim() {
        let template = EmailTemplate::new(
            "Certificado - {name}",
            "<p>Hola <b>{name}</b></p><p>{title} - {authors}</p>",
        );
        let email = template.render(&presenter());

        assert_eq!(email.subject, "Certificado - Ana Gómez");
        assert_eq!(
            email.body,
            "<p>Hola <b>Ana Gómez</b></p><p>Memoria & atención - Gómez A., Ruiz B.</p>"
        );
    }

    #[test]
    fn test_missing_optional_values_render_empty() {
        let template = EmailTemplate::new("s", "{name}|{title}|{authors}");
        let recipient = Recipient {
            title: None,
            authors: None,
            ..presenter()
        };
        assert_eq!(template.render(&recipient).body, "Ana Gómez||");
    }

    #[test]
    fn test_validate_placeholders() {
        let body = "<style>p {color: red}</style><p>{name} {title}</p>";
        let template = EmailTemplate::new("Certificado", body);

        template.validate(true).unwrap();
        assert!(matches!(
            template.validate(false),
            Err(TemplateError::PresenterOnly(p)) if p == "title"
        ));

        let typo = EmailTemplate::new("Certificado", "<p>{presenter_name}</p>");
        assert!(matches!(
            typo.validate(true),
            Err(TemplateError::UnknownPlaceholder(p)) if p == "presenter_name"
        ));
    }

    #[test]
    fn test_from_config_reads_body_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("body.html");
        std::fs::write(&path, "<p>{name}</p>").unwrap();

        let config = TemplateConfig {
            subject: "Certificado".to_string(),
            body: None,
            body_file: Some(path),
            test_subject: "Test".to_string(),
        };
        let template = EmailTemplate::from_config(&config).unwrap();
        assert_eq!(template.render(&presenter()).body, "<p>Ana Gómez</p>");
    }
}
