//! Environment variable loading with type conversion and default-value handling, shared
//! by every `*Config::from_env()` below.

use super::error::{ConfigError, ConfigResult};
use std::env;
use std::str::FromStr;

pub struct EnvLoader;

impl EnvLoader {
    pub fn load_required<T>(key: &str) -> ConfigResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let value = env::var(key).map_err(|_| ConfigError::EnvVarNotFound(key.to_string()))?;
        value.parse().map_err(|e| ConfigError::parse_error(format!("{e}"), "environment", key))
    }

    pub fn load_with_default<T>(key: &str, default: T) -> ConfigResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(key) {
            Ok(value) => value.parse().map_err(|e| ConfigError::parse_error(format!("{e}"), "environment", key)),
            Err(_) => Ok(default),
        }
    }

    pub fn load_bool(key: &str, default: bool) -> bool {
        match env::var(key).as_deref() {
            Ok("true" | "True" | "TRUE" | "1" | "yes" | "on") => true,
            Ok("false" | "False" | "FALSE" | "0" | "no" | "off") => false,
            _ => default,
        }
    }

    pub fn load_optional<T>(key: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(key) {
            Ok(value) => Ok(Some(
                value.parse().map_err(|e| ConfigError::parse_error(format!("{e}"), "environment", key))?,
            )),
            Err(_) => Ok(None),
        }
    }
}
