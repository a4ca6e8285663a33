//! One-time codes: purposes, generation and verification outcomes.
//!
//! Storage lives in the infrastructure layer; this module only decides what a
//! code looks like, which purposes exist and how a submitted code is compared.

use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use ticketing_core::{DomainError, DomainResult};

/// How long an issued code stays valid.
pub const OTP_TTL: Duration = Duration::from_secs(10 * 60);

/// Length of the codes issued to users.
pub const DEFAULT_CODE_DIGITS: u32 = 6;

/// Largest code length whose numeric range fits in a `u64`.
pub const MAX_CODE_DIGITS: u32 = 18;

/// Message shown to users for every failed verification.
///
/// Wrong, expired and never-issued codes must look the same from outside.
pub const INVALID_CODE_MESSAGE: &str = "invalid or expired code";

/// What a one-time code is for.
///
/// A code issued for one purpose never verifies for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OtpPurpose {
    #[serde(rename = "registration")]
    Registration,
    #[serde(rename = "password_reset")]
    PasswordReset,
    #[serde(rename = "phone_verification")]
    PhoneVerification,
    #[serde(rename = "2fa")]
    TwoFactor,
    #[serde(rename = "payment")]
    Payment,
}

impl OtpPurpose {
    pub const ALL: [OtpPurpose; 5] = [
        OtpPurpose::Registration,
        OtpPurpose::PasswordReset,
        OtpPurpose::PhoneVerification,
        OtpPurpose::TwoFactor,
        OtpPurpose::Payment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::Registration => "registration",
            OtpPurpose::PasswordReset => "password_reset",
            OtpPurpose::PhoneVerification => "phone_verification",
            OtpPurpose::TwoFactor => "2fa",
            OtpPurpose::Payment => "payment",
        }
    }

    /// Whether codes for this purpose are delivered by email.
    ///
    /// Phone verification needs an SMS channel, which does not exist yet.
    pub fn delivered_by_email(&self) -> bool {
        !matches!(self, OtpPurpose::PhoneVerification)
    }

    /// Subject, title and body text of the email carrying the code.
    pub fn email_copy(&self) -> OtpEmailCopy {
        match self {
            OtpPurpose::Registration => OtpEmailCopy {
                subject: "Verify Your Email Address",
                title: "Email Verification",
                message: "Thank you for registering. Please use the following code to verify your email address.",
            },
            OtpPurpose::PasswordReset => OtpEmailCopy {
                subject: "Reset Your Password",
                title: "Password Reset Request",
                message: "We received a request to reset your password. Please use the following code to continue with your password reset.",
            },
            OtpPurpose::TwoFactor => OtpEmailCopy {
                subject: "Two-Factor Authentication Code",
                title: "Login Authentication Code",
                message: "To complete your login, please enter the following verification code.",
            },
            OtpPurpose::PhoneVerification | OtpPurpose::Payment => OtpEmailCopy {
                subject: "Verification Code",
                title: "Your Verification Code",
                message: "Please use the following code to verify your identity.",
            },
        }
    }
}

impl core::fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OtpPurpose {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OtpPurpose::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| DomainError::unknown("otp purpose", s))
    }
}

/// Static copy used to build the OTP email for a purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtpEmailCopy {
    pub subject: &'static str,
    pub title: &'static str,
    pub message: &'static str,
}

/// Outcome of checking a submitted code.
///
/// A negative outcome is data, not an error: callers cannot tell a wrong code
/// from an expired or never-issued one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpVerification {
    Valid,
    Invalid,
}

impl OtpVerification {
    pub fn is_valid(&self) -> bool {
        matches!(self, OtpVerification::Valid)
    }
}

/// Confirmation returned to the caller after a code was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpIssued {
    pub expires_in_secs: u64,
}

/// Generate a uniformly random numeric code of exactly `digits` characters.
///
/// The leading digit is never zero. Draws from the operating system CSPRNG on
/// every call.
pub fn generate_code(digits: u32) -> DomainResult<String> {
    if digits == 0 || digits > MAX_CODE_DIGITS {
        return Err(DomainError::validation(format!(
            "otp length must be between 1 and {MAX_CODE_DIGITS} digits, got {digits}"
        )));
    }

    let min = 10u64.pow(digits - 1);
    let max = 10u64.pow(digits) - 1;
    let code = OsRng.gen_range(min..=max);
    Ok(code.to_string())
}

/// Compare a stored code with a submitted one without short-circuiting on the
/// first differing byte.
pub fn codes_match(stored: &str, submitted: &str) -> bool {
    let (a, b) = (stored.as_bytes(), submitted.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Store key for the live code of `(identifier, purpose)`.
pub fn storage_key(purpose: OtpPurpose, identifier: &str) -> String {
    format!("{}:{}", purpose.as_str(), identifier)
}
