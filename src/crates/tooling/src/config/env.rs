//! Environment variable readers
//!
//! Typed helpers for reading environment variables. Only `TektonConfig`
//! calls these; the rest of the workspace receives configuration as values.

use crate::{Result, ToolingError};
use std::env;
use std::str::FromStr;

/// Read an environment variable as a string
///
/// Returns `Ok(None)` when the variable is unset and an error when it is
/// set but not valid UTF-8.
pub fn get_env(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(val) => Ok(Some(val)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ToolingError::Config(format!(
            "Environment variable {} contains invalid UTF-8",
            key
        ))),
    }
}

/// Read and parse an environment variable
///
/// # Example
///
/// ```rust,ignore
/// let port: Option<u16> = get_env_parse("TEKTON_REGISTRY_PORT")?;
/// ```
pub fn get_env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_env(key)? {
        Some(val) => {
            let parsed = val.parse::<T>().map_err(|e| {
                ToolingError::Config(format!("Failed to parse environment variable {}: {}", key, e))
            })?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Read and parse an environment variable, falling back to a default
pub fn get_env_parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(get_env_parse(key)?.unwrap_or(default))
}

/// Build the conventional `<COMPONENT>_PORT` variable name for a component id
///
/// # Example
///
/// ```rust,ignore
/// assert_eq!(component_port_key("apollo"), "APOLLO_PORT");
/// ```
pub fn component_port_key(component_id: &str) -> String {
    format!("{}_PORT", component_id.to_uppercase().replace('-', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_missing() {
        let result = get_env("TEKTON_TEST_MISSING_VAR_12345");
        assert!(result.is_ok());
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn test_get_env_parse() {
        env::set_var("TEKTON_TEST_NUMBER", "42");
        let result: Option<i32> = get_env_parse("TEKTON_TEST_NUMBER").unwrap();
        assert_eq!(result, Some(42));
        env::remove_var("TEKTON_TEST_NUMBER");
    }

    #[test]
    fn test_get_env_parse_invalid() {
        env::set_var("TEKTON_TEST_INVALID_NUMBER", "not_a_number");
        let result: Result<Option<i32>> = get_env_parse("TEKTON_TEST_INVALID_NUMBER");
        assert!(result.is_err());
        env::remove_var("TEKTON_TEST_INVALID_NUMBER");
    }

    #[test]
    fn test_get_env_parse_or() {
        let result: i32 = get_env_parse_or("TEKTON_TEST_MISSING_VAR_12345", 99).unwrap();
        assert_eq!(result, 99);
    }

    #[test]
    fn test_component_port_key() {
        assert_eq!(component_port_key("apollo"), "APOLLO_PORT");
        assert_eq!(component_port_key("ci-worker"), "CI_WORKER_PORT");
    }
}
