//! `KEY=VALUE` environment argument parsing.

use crate::{ConfigError, ConfigResult};
use appgen_core::validation::is_env_var_name;
use std::collections::BTreeMap;

/// Parse environment arguments.
///
/// Each argument may hold several comma separated `KEY=VALUE` pairs. Later
/// occurrences of a key replace earlier ones.
pub fn parse_environment<S: AsRef<str>>(args: &[S]) -> ConfigResult<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();

    for arg in args {
        for pair in arg.as_ref().split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
                field: "environment".to_string(),
                message: format!("{:?} must be in the form KEY=VALUE", pair),
            })?;
            let key = key.trim();
            if !is_env_var_name(key) {
                return Err(ConfigError::InvalidValue {
                    field: "environment".to_string(),
                    message: format!("{:?} is not a valid variable name", key),
                });
            }
            env.insert(key.to_string(), value.to_string());
        }
    }

    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_comma_separated() {
        let env = parse_environment(&["RACK_ENV=production,PORT=8080"]).unwrap();
        assert_eq!(env.len(), 2);
        assert_eq!(env["RACK_ENV"], "production");
        assert_eq!(env["PORT"], "8080");
    }

    #[test]
    fn test_value_may_contain_equals() {
        let env = parse_environment(&["DATABASE_URL=postgres://u:p@h/db?sslmode=require"]).unwrap();
        assert_eq!(env["DATABASE_URL"], "postgres://u:p@h/db?sslmode=require");
    }

    #[test]
    fn test_last_occurrence_wins() {
        let env = parse_environment(&["A=1", "A=2"]).unwrap();
        assert_eq!(env["A"], "2");
    }

    #[test]
    fn test_rejects_missing_equals() {
        assert!(parse_environment(&["JUSTAKEY"]).is_err());
    }

    #[test]
    fn test_rejects_invalid_name() {
        assert!(parse_environment(&["1BAD=x"]).is_err());
    }

    #[test]
    fn test_empty_input() {
        let none: [&str; 0] = [];
        assert!(parse_environment(&none).unwrap().is_empty());
        assert!(parse_environment(&[""]).unwrap().is_empty());
    }
}
