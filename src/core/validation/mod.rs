//! Parameter validation
//!
//! Type tags and conditions ([`ParamType`]), the validators that turn raw
//! request text into typed values ([`validators::parse`]), and the password
//! hashing the PASSWORD validator relies on.

pub mod password;
pub mod types;
pub mod validators;

pub use password::PasswordHash;
pub use types::{
    DateConditions, FloatConditions, IntegerConditions, ParamType, ParamValue, Params, RawValue,
    StringConditions, UploadedFile,
};
pub use validators::{ValidationFailure, parse};
