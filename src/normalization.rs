/// Accent substitutions applied after lowercasing.
///
/// Certificate files already on disk were named with this exact table, so it
/// must not grow or change: any edit breaks matching against them.
const ACCENT_TABLE: [(char, char); 7] = [
    ('á', 'a'),
    ('é', 'e'),
    ('í', 'i'),
    ('ó', 'o'),
    ('ú', 'u'),
    ('ü', 'u'),
    ('ñ', 'n'),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidIdentityError {
    #[error("identity cell is missing")]
    Missing,
    #[error("identity cell is blank")]
    Blank,
}

/// Canonicalizes names and titles into comparable identity keys.
pub struct NameNormalizer;

impl NameNormalizer {
    /// Lowercase, trim, and strip the accents in the fixed table.
    ///
    /// Pure and idempotent: `normalize(&normalize(x)) == normalize(x)`.
    pub fn normalize(text: &str) -> String {
        text.to_lowercase()
            .trim()
            .chars()
            .map(Self::strip_accent)
            .collect::<String>()
            .trim()
            .to_string()
    }

    /// Normalize a spreadsheet cell that may be absent or empty.
    pub fn normalize_cell(cell: Option<&str>) -> Result<String, InvalidIdentityError> {
        let cell = cell.ok_or(InvalidIdentityError::Missing)?;
        let key = Self::normalize(cell);
        if key.is_empty() {
            return Err(InvalidIdentityError::Blank);
        }
        Ok(key)
    }

    /// File name the renderer gives the certificate of `name`.
    pub fn certificate_file_name(prefix: &str, name: &str, extension: &str) -> String {
        format!("{prefix}{}.{extension}", Self::normalize(name))
    }

    fn strip_accent(c: char) -> char {
        ACCENT_TABLE
            .iter()
            .find(|(accented, _)| *accented == c)
            .map(|(_, plain)| *plain)
            .unwrap_or(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_mapped_accents_and_lowercases() {
        assert_eq!(NameNormalizer::normalize("José Pérez"), "jose perez");
        assert_eq!(NameNormalizer::normalize("ÁNGEL MUÑOZ"), "angel munoz");
        assert_eq!(NameNormalizer::normalize("Agüero Íñiguez Ú"), "aguero iniguez u");
        assert_eq!(NameNormalizer::normalize("  Ana María  "), "ana maria");
    }

    #[test]
    fn test_leaves_unmapped_characters_alone() {
        // Only the fixed table is folded, not every diacritic.
        assert_eq!(NameNormalizer::normalize("François Çelik"), "françois çelik");
        assert_eq!(NameNormalizer::normalize("João"), "joão");
        assert_eq!(NameNormalizer::normalize("Anne-Marie O'Neil"), "anne-marie o'neil");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples = [
            "José Pérez",
            "  ANA MARÍA GÓMEZ LÓPEZ ",
            "Núñez, Begoña",
            "Agüero",
            "plain ascii",
            "",
            "   ",
            "François",
        ];
        for sample in samples {
            let once = NameNormalizer::normalize(sample);
            assert_eq!(NameNormalizer::normalize(&once), once, "sample: {sample:?}");
        }
    }

    #[test]
    fn test_normalize_cell_fails_soft() {
        assert_eq!(
            NameNormalizer::normalize_cell(None),
            Err(InvalidIdentityError::Missing)
        );
        assert_eq!(
            NameNormalizer::normalize_cell(Some("  \t ")),
            Err(InvalidIdentityError::Blank)
        );
        assert_eq!(
            NameNormalizer::normalize_cell(Some(" Begoña ")),
            Ok("begona".to_string())
        );
    }

    #[test]
    fn test_certificate_file_name() {
        assert_eq!(
            NameNormalizer::certificate_file_name("certificado_", "José Pérez", "pdf"),
            "certificado_jose perez.pdf"
        );
    }
}
