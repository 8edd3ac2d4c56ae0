use regex::Regex;

use crate::config::LinkPattern;
use crate::error::{Result, RelayError};

/// Syntax check every link must pass before the supported link table
pub const URL_PATTERN: &str = r"^https?://[^\s/$.?#].[^\s]*$";

/// Checks links against the supported link table
#[derive(Debug, Clone)]
pub struct LinkValidator {
    url: Regex,
    links: Vec<(LinkPattern, Regex)>,
}

impl LinkValidator {
    pub fn new(links: &[LinkPattern]) -> Result<Self> {
        let url = Regex::new(URL_PATTERN)
            .map_err(|e| RelayError::Config(format!("Invalid URL pattern: {}", e)))?;

        let links = links
            .iter()
            .map(|link| {
                Regex::new(&link.pattern)
                    .map(|re| (link.clone(), re))
                    .map_err(|e| {
                        RelayError::Config(format!("Invalid pattern for {}: {}", link.name, e))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { url, links })
    }

    /// Validate `link` and return the name of the platform it belongs to
    pub fn validate(&self, link: &str) -> Result<&str> {
        if !self.url.is_match(link) {
            return Err(RelayError::Validation("invalid URL format".to_string()));
        }

        self.links
            .iter()
            .find(|(_, re)| re.is_match(link))
            .map(|(pattern, _)| pattern.name.as_str())
            .ok_or_else(|| {
                RelayError::Validation(format!(
                    "unsupported media format. Supported formats:\n{}",
                    self.supported_formats()
                ))
            })
    }

    /// One `• name: example` line per supported platform
    pub fn supported_formats(&self) -> String {
        self.links
            .iter()
            .map(|(pattern, _)| format!("• {}: {}", pattern.name, pattern.example))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn validator() -> LinkValidator {
        LinkValidator::new(&Config::default().links).unwrap()
    }

    #[test]
    fn test_supported_link_returns_platform() {
        let v = validator();
        assert_eq!(v.validate("https://www.tiktok.com/@u/video/1").unwrap(), "TikTok");
        assert_eq!(v.validate("https://youtube.com/shorts/abc_1").unwrap(), "YouTube Shorts");
    }

    #[test]
    fn test_malformed_url_is_rejected() {
        let err = validator().validate("not a link").unwrap_err();
        assert_eq!(err.to_string(), "Invalid URL: invalid URL format");
    }

    #[test]
    fn test_unsupported_link_lists_examples() {
        let err = validator().validate("https://example.com/video").unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Invalid URL: unsupported media format"));
        assert!(message.contains("• Instagram: https://www.instagram.com/reel/abc123"));
    }
}
