//! `ticketing-auth`: one-time code rules for auth and registration flows.
//!
//! This crate is intentionally decoupled from storage and delivery.

pub mod otp;

pub use otp::{
    DEFAULT_CODE_DIGITS, INVALID_CODE_MESSAGE, OTP_TTL, OtpEmailCopy, OtpIssued, OtpPurpose,
    OtpVerification, codes_match, generate_code, storage_key,
};
