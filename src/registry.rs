//! Lookups against a hierarchical key/value store, used for settings that live outside any
//! profile file.

use tracing::trace;

use crate::entry::{ProcessEnv, copy_entry};

pub trait Registry {
    /// Returns the raw value stored for `key` under `namespace`.
    fn query(&self, namespace: &str, key: &str) -> Option<Vec<u8>>;
}

/// Copies the value of `key`, or `default`, into `buf` with quotes stripped and `${NAME}`
/// references expanded from the process environment.
pub fn get_config_string(
    registry: &dyn Registry,
    namespace: &str,
    key: &str,
    default: &[u8],
    buf: &mut [u8],
) -> usize {
    let value = registry.query(namespace, key);
    trace!(namespace, key, found = value.is_some(), "config lookup");

    copy_entry(buf, value.as_deref().unwrap_or(default), Some(&ProcessEnv))
}

/// Interprets the first character of a value as a yes/no answer.
pub fn get_config_bool(registry: &dyn Registry, namespace: &str, key: &str, default: bool) -> bool {
    let mut buf = [0_u8; 2];
    if get_config_string(registry, namespace, key, b"", &mut buf) == 0 {
        return default;
    }

    match buf[0] {
        b'n' | b'N' | b'f' | b'F' | b'0' => false,
        b'y' | b'Y' | b't' | b'T' | b'1' => true,
        _ => default,
    }
}
