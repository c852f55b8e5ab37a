//! Environment variable substitution for configuration values
//!
//! Configuration files reference secrets and per-deployment values as
//! `${VAR_NAME}`, or `${VAR_NAME:-fallback}` when a default is acceptable.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::env;

use crate::config::ConfigError;

/// Matches `${VAR_NAME}` and `${VAR_NAME:-default}`
static ENV_VAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid env var pattern")
});

/// Substitute environment variable references in a string.
///
/// Returns an error listing every referenced variable that is unset and has
/// no default.
///
/// ```ignore
/// use s3_fs_adapter::env::substitute_env_vars;
///
/// std::env::set_var("BUCKET", "assets");
/// let result = substitute_env_vars("bucket: ${BUCKET}").unwrap();
/// assert_eq!(result, "bucket: assets");
/// ```
pub fn substitute_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut missing_vars: Vec<String> = Vec::new();

    let result = ENV_VAR_PATTERN.replace_all(input, |caps: &Captures<'_>| {
        let var_name = &caps[1];
        match (env::var(var_name), caps.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.as_str().to_string(),
            (Err(_), None) => {
                if !missing_vars.iter().any(|v| v == var_name) {
                    missing_vars.push(var_name.to_string());
                }
                String::new()
            }
        }
    });

    if !missing_vars.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "Missing environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result.into_owned())
}
