//! Three-letter project codes for work-package ids

use regex::Regex;

use crate::config::EngineConfig;

const CODE_LEN: usize = 3;

#[derive(Debug, Clone)]
pub struct ProjectCodeDeriver {
    prefix_re: Option<Regex>,
    fallback: String,
}

impl ProjectCodeDeriver {
    pub fn new(vessel_prefixes: &[String], fallback: impl Into<String>) -> Result<Self, String> {
        let prefix_re = if vessel_prefixes.is_empty() {
            None
        } else {
            let alternatives: Vec<String> = vessel_prefixes.iter().map(|p| regex::escape(p)).collect();
            let pattern = format!(r"(?i)^(?:{})\b\.?\s*", alternatives.join("|"));
            Some(Regex::new(&pattern).map_err(|e| format!("Invalid vessel prefix pattern: {}", e))?)
        };
        Ok(Self {
            prefix_re,
            fallback: fallback.into(),
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, String> {
        Self::new(&config.vessel_prefixes, config.fallback_project_code.clone())
    }

    /// "MV Nordic Star" → "NOR", "Al" → "ALX", "" → fallback
    pub fn derive(&self, project_name: &str) -> String {
        let trimmed = project_name.trim();
        let rest = match &self.prefix_re {
            Some(re) => re.replace(trimmed, ""),
            None => trimmed.into(),
        };

        let letters: String = rest
            .split_whitespace()
            .next()
            .unwrap_or("")
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .map(|c| c.to_ascii_uppercase())
            .take(CODE_LEN)
            .collect();

        if letters.is_empty() {
            return self.fallback.clone();
        }
        format!("{:X<width$}", letters, width = CODE_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deriver() -> ProjectCodeDeriver {
        ProjectCodeDeriver::from_config(&EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_strips_vessel_prefix() {
        let d = deriver();
        assert_eq!(d.derive("MV Nordic Star"), "NOR");
        assert_eq!(d.derive("mv. aurora"), "AUR");
        assert_eq!(d.derive("HMS Victory"), "VIC");
        assert_eq!(d.derive("Nordic"), "NOR");
    }

    #[test]
    fn test_prefix_must_be_whole_token() {
        assert_eq!(deriver().derive("MSC Aurora"), "MSC");
    }

    #[test]
    fn test_short_names_padded() {
        assert_eq!(deriver().derive("Al"), "ALX");
        assert_eq!(deriver().derive("MT X"), "XXX");
    }

    #[test]
    fn test_fallback_when_empty() {
        let d = deriver();
        assert_eq!(d.derive(""), "GEN");
        assert_eq!(d.derive("MV"), "GEN");
        assert_eq!(d.derive("  42 "), "GEN");
    }

    #[test]
    fn test_only_letters_count_toward_code() {
        let d = deriver();
        // Codes must stay within WP-[A-Z]{3}-NNN
        assert_eq!(d.derive("MV 42 Star"), "GEN");
        assert_eq!(d.derive("B2B Marine"), "BBX");
        assert_eq!(d.derive("p1"), "PXX");
        for name in ["MV 42 Star", "B2B Marine", "Ørsted"] {
            let code = d.derive(name);
            assert!(code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()), "{}", code);
        }
    }
}
