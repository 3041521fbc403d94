//! Content filtering.
//!
//! A [`ContentFilter`] holds an ordered list of [`FilterRule`]s that is loaded once at startup
//! and never changes afterwards.  [`ContentFilter::check`] is a pure function of its input: the
//! first rule that matches decides the [`Verdict`] and its category.

use std::fs;
use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Replacement text used by [`ContentFilter::redact`].
pub const REDACTION: &str = "[inappropriate content removed]";

/// How a rule's pattern is interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// A literal substring.
    #[default]
    Substring,
    /// A regular expression.
    Regex,
}

/// A single filter rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    /// The pattern to look for.  Matching is always case-insensitive.
    pub pattern: String,
    /// The category reported when this rule matches.
    pub category: String,
    /// How `pattern` is interpreted.
    #[serde(default)]
    pub kind: MatchKind,
}

impl FilterRule {
    /// A literal, case-insensitive substring rule.
    pub fn substring(pattern: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            category: category.into(),
            kind: MatchKind::Substring,
        }
    }

    /// A case-insensitive regular expression rule.
    pub fn regex(pattern: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            category: category.into(),
            kind: MatchKind::Regex,
        }
    }
}

/// The outcome of [`ContentFilter::check`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// No rule matched.
    Allowed,
    /// A rule matched.
    Blocked {
        /// The matching rule's category.
        category: String,
    },
}

impl Verdict {
    /// True when the text may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }

    /// Converts a block into [`Error::Blocked`].
    pub fn into_result(self) -> Result<()> {
        match self {
            Verdict::Allowed => Ok(()),
            Verdict::Blocked { category } => Err(Error::blocked(category)),
        }
    }
}

#[derive(Deserialize)]
struct RuleFile {
    rules: Vec<FilterRule>,
}

#[derive(Debug)]
struct CompiledRule {
    rule: FilterRule,
    regex: Regex,
}

/// An ordered, immutable set of filter rules.
#[derive(Debug)]
pub struct ContentFilter {
    rules: Vec<CompiledRule>,
}

impl ContentFilter {
    /// Compiles `rules`, preserving their order.
    ///
    /// An invalid regular expression or an empty category is a configuration error.
    pub fn new(rules: Vec<FilterRule>) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            if rule.category.trim().is_empty() {
                return Err(Error::configuration(
                    format!("filter rule {:?} has an empty category", rule.pattern),
                    None,
                ));
            }
            if rule.pattern.is_empty() {
                return Err(Error::configuration(
                    format!("filter rule in category {:?} has an empty pattern", rule.category),
                    None,
                ));
            }
            let source = match rule.kind {
                MatchKind::Substring => regex::escape(&rule.pattern),
                MatchKind::Regex => rule.pattern.clone(),
            };
            let regex = RegexBuilder::new(&source)
                .case_insensitive(true)
                .build()
                .map_err(|err| {
                    Error::configuration(
                        format!("invalid filter pattern {:?}: {err}", rule.pattern),
                        None,
                    )
                })?;
            compiled.push(CompiledRule { rule, regex });
        }
        Ok(Self { rules: compiled })
    }

    /// The built-in rule set.
    pub fn default_rules() -> Vec<FilterRule> {
        vec![
            FilterRule::regex(r"\b(kill|murder|violence|harm|hurt|attack)\b", "violence"),
            FilterRule::regex(r"\b(hate|racist|discrimination)\b", "hate"),
            FilterRule::regex(r"\b(explicit|adult|nsfw)\b", "adult"),
            FilterRule::regex(r"\b(dangerous|illegal|drugs)\b", "dangerous"),
            FilterRule::substring("how to make weapons", "harmful-request"),
            FilterRule::substring("how to harm", "harmful-request"),
            FilterRule::substring("illegal activities", "harmful-request"),
            FilterRule::substring("generate explicit", "harmful-request"),
            FilterRule::substring("create inappropriate", "harmful-request"),
        ]
    }

    /// A filter with [`ContentFilter::default_rules`].
    pub fn with_default_rules() -> Self {
        // The built-in patterns are known to compile.
        match Self::new(Self::default_rules()) {
            Ok(filter) => filter,
            Err(_) => Self { rules: Vec::new() },
        }
    }

    /// Parses a YAML document of the form `rules: [{pattern, category, kind}]`.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: RuleFile = serde_yaml::from_str(yaml).map_err(|err| {
            Error::configuration(format!("failed to parse filter rules: {err}"), None)
        })?;
        if file.rules.is_empty() {
            return Err(Error::configuration("filter rule file has no rules", None));
        }
        Self::new(file.rules)
    }

    /// Loads rules from a YAML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|err| {
            Error::configuration(
                format!("failed to read filter rules from {}: {err}", path.display()),
                None,
            )
        })?;
        Self::from_yaml(&yaml)
    }

    /// Checks `text` against the rules in order.  The first match wins.
    pub fn check(&self, text: &str) -> Verdict {
        if text.trim().is_empty() {
            return Verdict::Allowed;
        }
        self.rules
            .iter()
            .find(|compiled| compiled.regex.is_match(text))
            .map(|compiled| Verdict::Blocked {
                category: compiled.rule.category.clone(),
            })
            .unwrap_or(Verdict::Allowed)
    }

    /// Replaces every match of every rule with [`REDACTION`].
    pub fn redact(&self, text: &str) -> String {
        let mut redacted = text.to_string();
        for compiled in &self.rules {
            if compiled.regex.is_match(&redacted) {
                redacted = compiled
                    .regex
                    .replace_all(&redacted, REDACTION)
                    .into_owned();
            }
        }
        redacted
    }

    /// Advisory warnings for text that is allowed but sensitive.
    pub fn warnings(&self, text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        let mut warnings = Vec::new();
        if ["violence", "harm", "dangerous"]
            .iter()
            .any(|word| lower.contains(word))
        {
            warnings.push("Content may contain references to violence or harm".to_string());
        }
        if ["medical", "health", "diagnosis"]
            .iter()
            .any(|word| lower.contains(word))
        {
            warnings
                .push("Content may contain medical information - consult professionals".to_string());
        }
        warnings
    }

    /// The rules, in evaluation order.
    pub fn rules(&self) -> impl Iterator<Item = &FilterRule> {
        self.rules.iter().map(|compiled| &compiled.rule)
    }

    /// The number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True when there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::with_default_rules()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profanity() -> ContentFilter {
        ContentFilter::new(vec![FilterRule::substring("badword", "profanity")]).unwrap()
    }

    #[test]
    fn blocks_matching_text_with_category() {
        let filter = profanity();
        assert_eq!(
            filter.check("this is a badword"),
            Verdict::Blocked {
                category: "profanity".to_string()
            }
        );
        assert_eq!(filter.check("this is fine"), Verdict::Allowed);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let filter = profanity();
        assert!(!filter.check("BADWORD!").is_allowed());
        assert!(!filter.check("a BadWord here").is_allowed());
    }

    #[test]
    fn first_match_wins() {
        let filter = ContentFilter::new(vec![
            FilterRule::substring("apple", "fruit"),
            FilterRule::regex(r"\bapple pie\b", "dessert"),
        ])
        .unwrap();
        assert_eq!(
            filter.check("I want apple pie"),
            Verdict::Blocked {
                category: "fruit".to_string()
            }
        );
    }

    #[test]
    fn substring_patterns_are_literal() {
        let filter = ContentFilter::new(vec![FilterRule::substring("a.b", "dots")]).unwrap();
        assert!(filter.check("axb").is_allowed());
        assert!(!filter.check("a.b").is_allowed());
    }

    #[test]
    fn empty_text_is_allowed() {
        let filter = ContentFilter::with_default_rules();
        assert_eq!(filter.check(""), Verdict::Allowed);
        assert_eq!(filter.check("   "), Verdict::Allowed);
    }

    #[test]
    fn default_rules() {
        let filter = ContentFilter::with_default_rules();
        assert_eq!(filter.len(), ContentFilter::default_rules().len());
        assert_eq!(
            filter.check("They will attack at dawn"),
            Verdict::Blocked {
                category: "violence".to_string()
            }
        );
        assert_eq!(
            filter.check("Tell me how to make weapons"),
            Verdict::Blocked {
                category: "harmful-request".to_string()
            }
        );
        assert!(filter.check("What is the capital of France?").is_allowed());
        // Word boundaries: "skill" does not contain the word "kill".
        assert!(filter.check("I want to improve my skill").is_allowed());
    }

    #[test]
    fn invalid_regex_is_configuration_error() {
        let err = ContentFilter::new(vec![FilterRule::regex("(unclosed", "broken")]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn empty_category_rejected() {
        let err = ContentFilter::new(vec![FilterRule::substring("x", " ")]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn from_yaml() {
        let filter = ContentFilter::from_yaml(
            r#"
rules:
  - pattern: badword
    category: profanity
  - pattern: '\bspam+\b'
    category: spam
    kind: regex
"#,
        )
        .unwrap();
        let rules: Vec<_> = filter.rules().cloned().collect();
        assert_eq!(rules[0], FilterRule::substring("badword", "profanity"));
        assert_eq!(rules[1].kind, MatchKind::Regex);
        assert_eq!(
            filter.check("SPAMMM"),
            Verdict::Blocked {
                category: "spam".to_string()
            }
        );
    }

    #[test]
    fn from_yaml_requires_rules() {
        assert!(ContentFilter::from_yaml("rules: []").unwrap_err().is_configuration());
        assert!(ContentFilter::from_yaml("nope: 1").unwrap_err().is_configuration());
    }

    #[test]
    fn redact_replaces_matches() {
        let filter = ContentFilter::with_default_rules();
        assert_eq!(
            filter.redact("Do not Kill the messenger"),
            format!("Do not {REDACTION} the messenger")
        );
        assert_eq!(filter.redact("all good"), "all good");
    }

    #[test]
    fn warnings() {
        let filter = ContentFilter::with_default_rules();
        assert!(filter.warnings("sunny day").is_empty());
        assert_eq!(filter.warnings("a health question").len(), 1);
        assert_eq!(filter.warnings("harm and diagnosis").len(), 2);
    }

    #[test]
    fn verdict_into_result() {
        assert!(Verdict::Allowed.into_result().is_ok());
        let err = Verdict::Blocked {
            category: "hate".to_string(),
        }
        .into_result()
        .unwrap_err();
        assert_eq!(err.blocked_category(), Some("hate"));
    }
}
