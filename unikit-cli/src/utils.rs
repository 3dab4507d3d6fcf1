use std::collections::BTreeMap;
use unikit_core::{Result, UnikitError};

/// Parses `KEY=VALUE` pairs. Values may contain `=`.
pub fn parse_env_vars(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            UnikitError::InvalidInput(format!("environment variable must be KEY=VALUE: {pair}"))
        })?;
        if key.is_empty() {
            return Err(UnikitError::InvalidInput(format!(
                "environment variable has an empty name: {pair}"
            )));
        }
        env.insert(key.to_string(), value.to_string());
    }
    Ok(env)
}

/// Parses `MOUNT_POINT:VOLUME` pairs into mount point -> volume query.
pub fn parse_mounts(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut mounts = BTreeMap::new();
    for pair in pairs {
        let (mount_point, volume) = pair
            .rsplit_once(':')
            .filter(|(m, v)| m.starts_with('/') && !v.is_empty())
            .ok_or_else(|| {
                UnikitError::InvalidInput(format!("mount must be /MOUNT_POINT:VOLUME: {pair}"))
            })?;
        if mounts
            .insert(mount_point.to_string(), volume.to_string())
            .is_some()
        {
            return Err(UnikitError::InvalidInput(format!(
                "mount point {mount_point} given more than once"
            )));
        }
    }
    Ok(mounts)
}

/// Parses a size such as `512MB` or `2GB` into megabytes.
pub fn parse_size_mb(size: &str) -> Result<u64> {
    let upper = size.trim().to_uppercase();
    let (digits, unit) = if let Some(value) = upper.strip_suffix("GB") {
        (value, 1024)
    } else if let Some(value) = upper.strip_suffix("MB") {
        (value, 1)
    } else {
        (upper.as_str(), 1)
    };

    let value = digits
        .parse::<u64>()
        .map_err(|_| UnikitError::InvalidInput(format!("invalid size: {size}")))?;
    if value == 0 {
        return Err(UnikitError::InvalidInput("size must be greater than zero".to_string()));
    }
    value
        .checked_mul(unit)
        .ok_or_else(|| UnikitError::InvalidInput(format!("size is too large: {size}")))
}
