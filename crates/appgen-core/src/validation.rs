//! Name validation and normalization.

use regex::Regex;
use std::sync::LazyLock;

use crate::{Error, Result};

pub const DNS1123_LABEL_MAX_LEN: usize = 63;
pub const DNS1123_SUBDOMAIN_MAX_LEN: usize = 253;

static DNS1123_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

static DNS1123_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap()
});

static ENV_VAR_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

pub fn is_dns1123_label(value: &str) -> bool {
    value.len() <= DNS1123_LABEL_MAX_LEN && DNS1123_LABEL.is_match(value)
}

pub fn is_dns1123_subdomain(value: &str) -> bool {
    value.len() <= DNS1123_SUBDOMAIN_MAX_LEN && DNS1123_SUBDOMAIN.is_match(value)
}

pub fn is_env_var_name(value: &str) -> bool {
    ENV_VAR_NAME.is_match(value)
}

/// Validate a caller supplied object name.
pub fn validate_name(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::validation(field, "may not be empty"));
    }
    if !is_dns1123_subdomain(value) {
        return Err(Error::validation(
            field,
            format!("{value:?} does not conform to lower-cased dns1123"),
        ));
    }
    Ok(())
}

/// Turn an arbitrary repository or directory name into a dns1123 label.
///
/// Returns `None` when nothing usable is left after normalization.
pub fn normalize_name(raw: &str) -> Option<String> {
    let lowered: String = raw
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect();

    let mut collapsed = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        if c == '-' && collapsed.ends_with('-') {
            continue;
        }
        collapsed.push(c);
    }

    let mut name = collapsed.trim_matches('-').to_string();
    if name.len() > DNS1123_LABEL_MAX_LEN {
        name.truncate(DNS1123_LABEL_MAX_LEN);
        name = name.trim_end_matches('-').to_string();
    }

    if name.is_empty() { None } else { Some(name) }
}
