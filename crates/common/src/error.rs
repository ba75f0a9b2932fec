//! Stable numeric error codes carried in API response bodies.
//!
//! The numeric values are part of the wire contract and must never be
//! renumbered; clients match on them.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Error codes returned by the file API (`/api/upload`, `/api/download`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiErrorCode {
    #[default]
    None = 0,
    InternalApiError = 1,
    InvalidContentFormat = 2,
    UnexpectedEof = 3,
    TooBigContentSize = 4,
    ParameterOutOfRange = 5,
    NotFound = 6,
}

impl Serialize for ApiErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(*self as i32)
    }
}

impl<'de> Deserialize<'de> for ApiErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match i32::deserialize(deserializer)? {
            0 => Ok(ApiErrorCode::None),
            1 => Ok(ApiErrorCode::InternalApiError),
            2 => Ok(ApiErrorCode::InvalidContentFormat),
            3 => Ok(ApiErrorCode::UnexpectedEof),
            4 => Ok(ApiErrorCode::TooBigContentSize),
            5 => Ok(ApiErrorCode::ParameterOutOfRange),
            6 => Ok(ApiErrorCode::NotFound),
            other => Err(de::Error::custom(format!("unknown api error code {other}"))),
        }
    }
}

/// Error codes returned by the auth API (`/api/register`, `/api/login`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthErrorCode {
    #[default]
    None = 0,
    InternalApiError = 1,
    InvalidContentFormat = 2,
    NoSessionToken = 3,
    InvalidSessionToken = 4,
    InvalidCredentials = 5,
}

impl Serialize for AuthErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(*self as i32)
    }
}

impl<'de> Deserialize<'de> for AuthErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match i32::deserialize(deserializer)? {
            0 => Ok(AuthErrorCode::None),
            1 => Ok(AuthErrorCode::InternalApiError),
            2 => Ok(AuthErrorCode::InvalidContentFormat),
            3 => Ok(AuthErrorCode::NoSessionToken),
            4 => Ok(AuthErrorCode::InvalidSessionToken),
            5 => Ok(AuthErrorCode::InvalidCredentials),
            other => Err(de::Error::custom(format!("unknown auth error code {other}"))),
        }
    }
}
