// @zen-component: AUTH-PasswordPolicy
//
//! Password policy rules, presets, and strength scoring.
//!
//! Rules run independently and every violation is collected. Candidates are
//! normalized with [`normalize`] before evaluation; the hasher applies the same
//! normalization so both agree on what "the password" is.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Upper bound applied by every preset.
pub const MAX_PASSWORD_LENGTH: usize = 128;

const COMMON_PATTERNS: [&str; 3] = ["password", "123456", "qwerty"];

/// Strip tab/newline/carriage-return and trim surrounding whitespace.
pub fn normalize(candidate: &str) -> String {
    candidate
        .chars()
        .filter(|c| !matches!(c, '\t' | '\n' | '\r'))
        .collect::<String>()
        .trim()
        .to_string()
}

fn is_special(c: char) -> bool {
    c.is_ascii_punctuation()
}

/// A single named password rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    MinLength(usize),
    MaxLength(usize),
    RequireUppercase,
    RequireLowercase,
    RequireNumber,
    RequireSpecialChar,
}

impl Rule {
    pub fn name(&self) -> &'static str {
        match self {
            Rule::MinLength(_) => "minLength",
            Rule::MaxLength(_) => "maxLength",
            Rule::RequireUppercase => "requireUppercase",
            Rule::RequireLowercase => "requireLowercase",
            Rule::RequireNumber => "requireNumber",
            Rule::RequireSpecialChar => "requireSpecialChar",
        }
    }

    /// Evaluate against an already-normalized password.
    pub fn check(&self, password: &str) -> Option<String> {
        let ok = match *self {
            Rule::MinLength(n) => password.chars().count() >= n,
            Rule::MaxLength(n) => password.chars().count() <= n,
            Rule::RequireUppercase => password.chars().any(char::is_uppercase),
            Rule::RequireLowercase => password.chars().any(char::is_lowercase),
            Rule::RequireNumber => password.chars().any(|c| c.is_ascii_digit()),
            Rule::RequireSpecialChar => password.chars().any(is_special),
        };
        (!ok).then(|| self.message())
    }

    fn message(&self) -> String {
        match self {
            Rule::MinLength(n) => format!("min length {n}"),
            Rule::MaxLength(n) => format!("max length {n}"),
            Rule::RequireUppercase => "requires uppercase".to_string(),
            Rule::RequireLowercase => "requires lowercase".to_string(),
            Rule::RequireNumber => "requires number".to_string(),
            Rule::RequireSpecialChar => "requires special character".to_string(),
        }
    }
}

/// Named policy preset; each bundles a rule set and a bcrypt cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Low,
    Medium,
    High,
}

impl SecurityLevel {
    pub fn cost(self) -> u32 {
        match self {
            SecurityLevel::Low => 10,
            SecurityLevel::Medium => 12,
            SecurityLevel::High => 14,
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SecurityLevel::Low => "low",
            SecurityLevel::Medium => "medium",
            SecurityLevel::High => "high",
        })
    }
}

impl FromStr for SecurityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(SecurityLevel::Low),
            "medium" => Ok(SecurityLevel::Medium),
            "high" => Ok(SecurityLevel::High),
            other => Err(format!("unknown password policy '{other}'")),
        }
    }
}

/// Immutable, ordered rule set plus the hashing cost that goes with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordPolicy {
    rules: Vec<Rule>,
    cost: u32,
}

impl PasswordPolicy {
    /// Build a custom policy. Rules are evaluated in the given order.
    pub fn new(rules: Vec<Rule>, cost: u32) -> Self {
        Self { rules, cost }
    }

    pub fn preset(level: SecurityLevel) -> Self {
        let rules = match level {
            SecurityLevel::Low => vec![Rule::MinLength(6), Rule::MaxLength(MAX_PASSWORD_LENGTH)],
            SecurityLevel::Medium => vec![
                Rule::MinLength(8),
                Rule::MaxLength(MAX_PASSWORD_LENGTH),
                Rule::RequireNumber,
            ],
            SecurityLevel::High => vec![
                Rule::MinLength(12),
                Rule::MaxLength(MAX_PASSWORD_LENGTH),
                Rule::RequireUppercase,
                Rule::RequireLowercase,
                Rule::RequireNumber,
                Rule::RequireSpecialChar,
            ],
        };
        Self::new(rules, level.cost())
    }

    /// Same rules, different bcrypt cost.
    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub fn min_length(&self) -> Option<usize> {
        self.rules.iter().find_map(|r| match r {
            Rule::MinLength(n) => Some(*n),
            _ => None,
        })
    }

    /// Validate a raw candidate; see [`validate`].
    pub fn validate(&self, candidate: &str) -> ValidationResult {
        validate(candidate, self)
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::preset(SecurityLevel::Medium)
    }
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub violations: Vec<String>,
}

/// Run every rule of `policy` against the normalized candidate.
///
/// An empty candidate (after normalization) is always invalid and reported as
/// `"password required"` alone.
pub fn validate(candidate: &str, policy: &PasswordPolicy) -> ValidationResult {
    let password = normalize(candidate);
    if password.is_empty() {
        return ValidationResult {
            is_valid: false,
            violations: vec!["password required".to_string()],
        };
    }

    let violations: Vec<String> = policy
        .rules
        .iter()
        .filter_map(|rule| rule.check(&password))
        .collect();

    ValidationResult {
        is_valid: violations.is_empty(),
        violations,
    }
}

/// Coarse banding of a strength score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrengthBand {
    Weak,
    Medium,
    Strong,
}

impl fmt::Display for StrengthBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StrengthBand::Weak => "weak",
            StrengthBand::Medium => "medium",
            StrengthBand::Strong => "strong",
        })
    }
}

/// Informational strength report. Never used to accept or reject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Strength {
    pub score: u8,
    pub band: StrengthBand,
    pub feedback: Vec<String>,
}

/// Highest score [`strength`] can return.
pub const MAX_STRENGTH_SCORE: u8 = 5;

/// One point each for length, uppercase, lowercase, number, and special.
///
/// Length counts when the password meets the policy minimum (8 when the policy
/// has none). Common patterns cost two points.
pub fn strength(candidate: &str, policy: &PasswordPolicy) -> Strength {
    let password = normalize(candidate);
    let min = policy.min_length().unwrap_or(8);
    let mut feedback = Vec::new();

    let classes = [
        (password.chars().count() >= min, format!("use at least {min} characters")),
        (
            password.chars().any(char::is_uppercase),
            "add an uppercase letter".to_string(),
        ),
        (
            password.chars().any(char::is_lowercase),
            "add a lowercase letter".to_string(),
        ),
        (
            password.chars().any(|c| c.is_ascii_digit()),
            "add a number".to_string(),
        ),
        (password.chars().any(is_special), "add a symbol".to_string()),
    ];

    let mut score: u8 = 0;
    for (satisfied, hint) in classes {
        if satisfied {
            score += 1;
        } else {
            feedback.push(hint);
        }
    }

    let lowered = password.to_lowercase();
    if COMMON_PATTERNS.iter().any(|p| lowered.contains(p)) {
        score = score.saturating_sub(2);
        feedback.push("avoid common passwords".to_string());
    }

    let band = match score {
        0..=2 => StrengthBand::Weak,
        3..=4 => StrengthBand::Medium,
        _ => StrengthBand::Strong,
    };

    Strength {
        score,
        band,
        feedback,
    }
}
