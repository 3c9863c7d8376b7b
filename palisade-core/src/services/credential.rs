//! Credential validation service.
//!
//! Enforces the password policy and computes an advisory strength score.
//! The boolean rule set is what accepts or rejects a password; the strength
//! score is surfaced to callers and never blocks anything by itself.

use crate::{Error, error::AuthError, validation::email_local_part};

/// Configurable password policy.
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
    /// Case-insensitive substrings that must not appear anywhere in a
    /// password.
    pub forbidden_substrings: Vec<String>,
    /// How many superseded password hashes are checked for reuse.
    pub history_depth: u32,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 10,
            max_length: 128,
            forbidden_substrings: [
                "password", "qwerty", "letmein", "admin", "welcome", "12345", "abc123",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            history_depth: 5,
        }
    }
}

impl PasswordPolicy {
    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_forbidden_substrings(mut self, substrings: Vec<String>) -> Self {
        self.forbidden_substrings = substrings;
        self
    }

    pub fn with_history_depth(mut self, depth: u32) -> Self {
        self.history_depth = depth;
        self
    }
}

/// One reason a password was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    TooShort { min: usize },
    TooLong { max: usize },
    MissingUppercase,
    MissingLowercase,
    MissingDigit,
    MissingSymbol,
    ForbiddenSubstring(String),
    RepeatedCharacters,
    SequentialRun,
    ContainsAccountName,
    ContainsEmailLocalPart,
    ReusedPassword,
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyViolation::TooShort { min } => {
                write!(f, "must be at least {min} characters long")
            }
            PolicyViolation::TooLong { max } => {
                write!(f, "must be no more than {max} characters long")
            }
            PolicyViolation::MissingUppercase => write!(f, "must contain an uppercase letter"),
            PolicyViolation::MissingLowercase => write!(f, "must contain a lowercase letter"),
            PolicyViolation::MissingDigit => write!(f, "must contain a digit"),
            PolicyViolation::MissingSymbol => write!(f, "must contain a symbol"),
            PolicyViolation::ForbiddenSubstring(s) => {
                write!(f, "must not contain \"{s}\"")
            }
            PolicyViolation::RepeatedCharacters => {
                write!(f, "must not repeat a character three or more times in a row")
            }
            PolicyViolation::SequentialRun => {
                write!(f, "must not contain an ascending character sequence")
            }
            PolicyViolation::ContainsAccountName => {
                write!(f, "must not contain the account name")
            }
            PolicyViolation::ContainsEmailLocalPart => {
                write!(f, "must not contain the email address")
            }
            PolicyViolation::ReusedPassword => {
                write!(f, "must not reuse a recent password")
            }
        }
    }
}

/// Account attributes consulted by the validator.
///
/// `recent_hashes` is the password history the caller fetched for the
/// account, newest first, already truncated to the policy's history depth.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountContext<'a> {
    pub name: Option<&'a str>,
    pub email: Option<&'a str>,
    pub recent_hashes: &'a [String],
}

/// Outcome of a validation pass.
#[derive(Debug, Clone)]
pub struct PasswordCheck {
    pub valid: bool,
    pub violations: Vec<PolicyViolation>,
    /// Advisory strength in 0..=100.
    pub strength: u8,
}

/// Service enforcing the password policy.
pub struct CredentialValidator {
    policy: PasswordPolicy,
}

impl CredentialValidator {
    pub fn new(policy: PasswordPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    /// Validate a candidate password against the policy.
    ///
    /// Never fails: malformed input yields violations, not errors.
    pub fn validate(&self, password: &str, context: &AccountContext<'_>) -> PasswordCheck {
        let mut violations = Vec::new();

        let char_count = password.chars().count();
        if char_count < self.policy.min_length {
            violations.push(PolicyViolation::TooShort {
                min: self.policy.min_length,
            });
        }
        if char_count > self.policy.max_length {
            violations.push(PolicyViolation::TooLong {
                max: self.policy.max_length,
            });
        }

        if !password.chars().any(|c| c.is_uppercase()) {
            violations.push(PolicyViolation::MissingUppercase);
        }
        if !password.chars().any(|c| c.is_lowercase()) {
            violations.push(PolicyViolation::MissingLowercase);
        }
        if !password.chars().any(|c| c.is_ascii_digit()) {
            violations.push(PolicyViolation::MissingDigit);
        }
        if !password.chars().any(|c| !c.is_alphanumeric()) {
            violations.push(PolicyViolation::MissingSymbol);
        }

        let lowered = password.to_lowercase();
        for forbidden in &self.policy.forbidden_substrings {
            if lowered.contains(&forbidden.to_lowercase()) {
                violations.push(PolicyViolation::ForbiddenSubstring(forbidden.clone()));
            }
        }

        if has_repeated_run(password, 3) {
            violations.push(PolicyViolation::RepeatedCharacters);
        }
        if has_ascending_run(password, 4) {
            violations.push(PolicyViolation::SequentialRun);
        }

        if let Some(name) = context.name {
            if name.len() >= 3 && lowered.contains(&name.to_lowercase()) {
                violations.push(PolicyViolation::ContainsAccountName);
            }
        }
        if let Some(email) = context.email {
            let local = email_local_part(email);
            if local.len() >= 3 && lowered.contains(&local.to_lowercase()) {
                violations.push(PolicyViolation::ContainsEmailLocalPart);
            }
        }

        if context
            .recent_hashes
            .iter()
            .any(|hash| Self::verify_password(password, hash))
        {
            violations.push(PolicyViolation::ReusedPassword);
        }

        let strength = strength_score(password, &violations);

        PasswordCheck {
            valid: violations.is_empty(),
            violations,
            strength,
        }
    }

    /// Hash a password using argon2
    pub fn hash_password(password: &str) -> Result<String, Error> {
        use password_auth::generate_hash;
        Ok(generate_hash(password))
    }

    /// Verify a password against a hash
    pub fn verify_password(password: &str, hash: &str) -> bool {
        use password_auth::verify_password;
        verify_password(password, hash).is_ok()
    }

    /// Verify a password, surfacing a hash-format problem as an auth error.
    pub fn verify_password_strict(password: &str, hash: &str) -> Result<bool, Error> {
        use password_auth::{VerifyError, verify_password};
        match verify_password(password, hash) {
            Ok(()) => Ok(true),
            Err(VerifyError::PasswordInvalid) => Ok(false),
            Err(e) => Err(AuthError::PasswordHash(e.to_string()).into()),
        }
    }
}

impl Default for CredentialValidator {
    fn default() -> Self {
        Self::new(PasswordPolicy::default())
    }
}

/// Whether the password contains `run` or more identical consecutive
/// characters.
fn has_repeated_run(password: &str, run: usize) -> bool {
    let mut count = 0usize;
    let mut prev: Option<char> = None;
    for c in password.chars() {
        if Some(c) == prev {
            count += 1;
            if count >= run {
                return true;
            }
        } else {
            count = 1;
            prev = Some(c);
        }
    }
    false
}

/// Whether the password contains an ascending alphanumeric run of at least
/// `run` characters ("abcd", "1234"). Case-insensitive.
fn has_ascending_run(password: &str, run: usize) -> bool {
    let chars: Vec<char> = password
        .to_lowercase()
        .chars()
        .collect();
    let mut count = 1usize;
    for window in chars.windows(2) {
        let (a, b) = (window[0], window[1]);
        let ascending =
            a.is_ascii_alphanumeric() && b.is_ascii_alphanumeric() && (a as u32) + 1 == b as u32;
        if ascending {
            count += 1;
            if count >= run {
                return true;
            }
        } else {
            count = 1;
        }
    }
    false
}

/// Length-weighted base plus a bonus per distinct character class,
/// penalized per violation, clamped to 0..=100.
fn strength_score(password: &str, violations: &[PolicyViolation]) -> u8 {
    let length = password.chars().count();
    let mut score = (length * 4).min(50) as i32;

    if password.chars().any(|c| c.is_uppercase()) {
        score += 10;
    }
    if password.chars().any(|c| c.is_lowercase()) {
        score += 10;
    }
    if password.chars().any(|c| c.is_ascii_digit()) {
        score += 10;
    }
    if password.chars().any(|c| !c.is_alphanumeric()) {
        score += 15;
    }
    if length >= 16 {
        score += 5;
    }

    score -= violations.len() as i32 * 15;

    score.clamp(0, 100) as u8
}
