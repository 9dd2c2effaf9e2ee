/// Child environment: the inherited environment plus diagnostic overrides.
use std::collections::BTreeMap;

/// Flags forced on for every supervised run, whatever the caller passes.
///
/// They silence the wrapped tool's telemetry, update checks and doctor run,
/// turn on its debug logging, mark the run as CI, and make Node resolve
/// IPv4 addresses first.
pub const FORCED_FLAGS: &[(&str, &str)] = &[
    ("EXPO_DEBUG", "1"),
    ("EXPO_NO_DOCTOR", "1"),
    ("EXPO_NO_TELEMETRY", "1"),
    ("EXPO_NO_UPDATE_CHECK", "1"),
    ("DEBUG", "expo:*"),
    ("CI", "1"),
    ("NODE_OPTIONS", "--dns-result-order=ipv4first"),
];

/// Build the overrides applied on top of the inherited environment.
///
/// Caller-supplied variables come first; the forced flags win on conflict.
pub fn child_overrides(extra: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut env = extra.clone();
    for (key, value) in FORCED_FLAGS {
        if let Some(previous) = env.insert(key.to_string(), value.to_string()) {
            if previous != *value {
                tracing::debug!(key, previous = %previous, "forced diagnostic flag overrides configured value");
            }
        }
    }
    env
}
