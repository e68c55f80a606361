use std::str::FromStr;

/// Prefix checked before the bare variable name.
pub const ENV_PREFIX: &str = "BILLSYNC_";

/// Get environment variable with BILLSYNC_ prefix, falling back to unprefixed version
///
/// Checks `BILLSYNC_{key}` first, then `{key}`, so hosting platforms that set
/// `PORT` or `STRIPE_SECRET_KEY` directly keep working.
///
/// # Examples
///
/// ```rust,ignore
/// // Checks BILLSYNC_PORT first, then PORT
/// let port = get_env_with_prefix("PORT");
/// ```
pub fn get_env_with_prefix(key: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, key))
        .or_else(|_| std::env::var(key))
        .ok()
}

/// Like [`get_env_with_prefix`], parsed. Unparseable values are logged and
/// treated as unset.
pub fn get_env_parsed<T: FromStr>(key: &str) -> Option<T> {
    let raw = get_env_with_prefix(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(target: "billsync::config", key = key, value = %raw, "Ignoring unparseable environment variable");
            None
        }
    }
}
