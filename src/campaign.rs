use crate::normalization::NameNormalizer;
use std::fmt;

/// Separator between identity and title in the stored key form.
pub const KEY_SEPARATOR: char = ':';

/// One certificate-delivery obligation.
///
/// Attendee certificates are keyed by identity alone; presentation
/// certificates also carry the normalized title, since one presenter may
/// give several talks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CampaignKey {
    identity: String,
    title: Option<String>,
}

impl CampaignKey {
    pub fn new(name: &str, title: Option<&str>) -> Self {
        Self {
            identity: NameNormalizer::normalize(name),
            title: title.map(NameNormalizer::normalize),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }
}

impl fmt::Display for CampaignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.title {
            Some(title) => write!(f, "{}{KEY_SEPARATOR}{}", self.identity, title),
            None => write!(f, "{}", self.identity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attendee_key() {
        let key = CampaignKey::new("  José Pérez ", None);
        assert_eq!(key.identity(), "jose perez");
        assert_eq!(key.title(), None);
        assert_eq!(key.to_string(), "jose perez");
    }

    #[test]
    fn test_presenter_key() {
        let key = CampaignKey::new("Ana Gómez", Some("Memoria de Trabajo"));
        assert_eq!(key.to_string(), "ana gomez:memoria de trabajo");
    }

    #[test]
    fn test_same_obligation_same_key() {
        assert_eq!(
            CampaignKey::new("ANA GÓMEZ", Some("Memoria")),
            CampaignKey::new("ana gomez ", Some(" memoria"))
        );
        assert_ne!(
            CampaignKey::new("Ana Gómez", Some("Memoria")),
            CampaignKey::new("Ana Gómez", Some("Atención"))
        );
    }
}
