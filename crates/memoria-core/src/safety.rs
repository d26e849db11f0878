//! Safety Filter (§4.H): a content gate run on every memory before it is
//! ever embedded or stored. Three independent scans — length, PII, sensitive
//! words — plus a warn-only custom-pattern scan, composed into one verdict.

use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FilterAction {
    Allow,
    Warn,
    Redact,
    Block,
}

#[derive(Debug, Clone)]
pub struct SafetyConfig {
    pub max_length: usize,
    pub pii_action: FilterAction,
    pub sensitive_words: Vec<String>,
    pub custom_patterns: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_length: 10_000,
            pii_action: FilterAction::Redact,
            sensitive_words: Vec::new(),
            custom_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SafetyResult {
    pub action: FilterAction,
    pub filtered_content: String,
    pub pii_detected: Vec<String>,
    pub sensitive_words_detected: Vec<String>,
}

struct PiiPattern {
    label: &'static str,
    regex: Regex,
}

fn pii_patterns() -> &'static Vec<PiiPattern> {
    static PATTERNS: OnceLock<Vec<PiiPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            PiiPattern {
                label: "email",
                regex: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap(),
            },
            PiiPattern {
                label: "phone_cn",
                regex: Regex::new(r"(?:\+?86)?1[3-9]\d{9}\b").unwrap(),
            },
            PiiPattern {
                label: "phone_us",
                regex: Regex::new(r"\b(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b").unwrap(),
            },
            PiiPattern {
                label: "national_id_cn",
                regex: Regex::new(r"\b[1-9]\d{5}(?:19|20)\d{2}(?:0[1-9]|1[0-2])(?:0[1-9]|[12]\d|3[01])\d{3}[\dXx]\b").unwrap(),
            },
            PiiPattern {
                label: "credit_card",
                regex: Regex::new(r"\b(?:\d{4}[-\s]?){3}\d{4}\b").unwrap(),
            },
            PiiPattern {
                label: "ipv4",
                regex: Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b").unwrap(),
            },
            PiiPattern {
                label: "api_key",
                regex: Regex::new(r"(?i)\b(?:sk-|api[_-]|key[_-]|secret[_-]|token[_-]|auth[_-])[A-Za-z0-9_-]{20,}\b").unwrap(),
            },
        ]
    })
}

pub struct SafetyFilter {
    config: SafetyConfig,
}

impl Default for SafetyFilter {
    fn default() -> Self {
        Self::new(SafetyConfig::default())
    }
}

impl SafetyFilter {
    pub fn new(config: SafetyConfig) -> Self {
        Self { config }
    }

    pub fn check(&self, content: &str) -> SafetyResult {
        if content.len() > self.config.max_length {
            return SafetyResult {
                action: FilterAction::Block,
                filtered_content: content.to_string(),
                pii_detected: Vec::new(),
                sensitive_words_detected: Vec::new(),
            };
        }

        let mut action = FilterAction::Allow;
        let mut filtered = content.to_string();
        let mut pii_detected = Vec::new();

        for pattern in pii_patterns() {
            if pattern.regex.is_match(&filtered) {
                pii_detected.push(pattern.label.to_string());
            }
        }
        if !pii_detected.is_empty() {
            action = action.max(self.config.pii_action);
            if self.config.pii_action == FilterAction::Redact {
                for pattern in pii_patterns() {
                    filtered = pattern.regex.replace_all(&filtered, "[REDACTED]").to_string();
                }
            }
        }

        let lowered = filtered.to_lowercase();
        let sensitive_words_detected: Vec<String> = self
            .config
            .sensitive_words
            .iter()
            .filter(|w| lowered.contains(&w.to_lowercase()))
            .cloned()
            .collect();
        if !sensitive_words_detected.is_empty() {
            action = action.max(FilterAction::Warn);
        }

        for pattern in &self.config.custom_patterns {
            if let Ok(re) = Regex::new(pattern) {
                if re.is_match(&filtered) {
                    action = action.max(FilterAction::Warn);
                }
            }
        }

        if action == FilterAction::Block {
            filtered = content.to_string();
        }

        SafetyResult { action, filtered_content: filtered, pii_detected, sensitive_words_detected }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_over_length() {
        let filter = SafetyFilter::new(SafetyConfig { max_length: 5, ..Default::default() });
        let result = filter.check("this is too long");
        assert_eq!(result.action, FilterAction::Block);
    }

    #[test]
    fn redacts_email_by_default() {
        let filter = SafetyFilter::default();
        let result = filter.check("reach me at jane.doe@example.com please");
        assert_eq!(result.action, FilterAction::Redact);
        assert!(!result.filtered_content.contains("jane.doe@example.com"));
        assert!(result.pii_detected.contains(&"email".to_string()));
    }

    #[test]
    fn warn_action_leaves_content_untouched() {
        let filter = SafetyFilter::new(SafetyConfig { pii_action: FilterAction::Warn, ..Default::default() });
        let result = filter.check("reach me at jane.doe@example.com please");
        assert_eq!(result.action, FilterAction::Warn);
        assert!(result.filtered_content.contains("jane.doe@example.com"));
    }

    #[test]
    fn sensitive_words_trigger_warn_only() {
        let filter = SafetyFilter::new(SafetyConfig {
            sensitive_words: vec!["confidential".into()],
            ..Default::default()
        });
        let result = filter.check("this note is CONFIDENTIAL");
        assert_eq!(result.action, FilterAction::Warn);
        assert_eq!(result.sensitive_words_detected, vec!["confidential".to_string()]);
    }

    #[test]
    fn clean_content_is_allowed() {
        let filter = SafetyFilter::default();
        let result = filter.check("patient went for a walk in the park today");
        assert_eq!(result.action, FilterAction::Allow);
    }
}
