//! Transforms between the raw text stored for an entry and the text handed to callers.

use std::borrow::Cow;
use std::env;
use std::ffi::OsString;

const DOS_EOF: u8 = 0x1A;
const VERTICAL_TAB: u8 = 0x0B;

/// Source of values for `${NAME}` references.
pub trait EnvLookup {
    fn lookup(&self, name: &str) -> Option<Vec<u8>>;
}

/// Resolves references against the environment of the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn lookup(&self, name: &str) -> Option<Vec<u8>> {
        if name.is_empty() || name.contains(['=', '\0']) {
            return None;
        }

        env::var_os(name).map(OsString::into_encoded_bytes)
    }
}

impl<F> EnvLookup for F
where
    F: Fn(&str) -> Option<Vec<u8>>,
{
    fn lookup(&self, name: &str) -> Option<Vec<u8>> {
        self(name)
    }
}

/// Whitespace as far as profile files are concerned. Carriage returns and the DOS end-of-file
/// marker show up in files copied from old media, so both count as blanks.
#[must_use]
pub fn is_profile_space(b: u8) -> bool {
    b.is_ascii_whitespace() || b == VERTICAL_TAB || b == DOS_EOF
}

#[must_use]
pub(crate) fn trim_start(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if !is_profile_space(*first) {
            break;
        }
        bytes = rest;
    }
    bytes
}

#[must_use]
pub(crate) fn trim_end(mut bytes: &[u8]) -> &[u8] {
    while let [rest @ .., last] = bytes {
        if !is_profile_space(*last) {
            break;
        }
        bytes = rest;
    }
    bytes
}

#[must_use]
pub(crate) fn trim(bytes: &[u8]) -> &[u8] {
    trim_end(trim_start(bytes))
}

/// Removes one pair of enclosing `'` or `"` quotes.
#[must_use]
pub fn strip_quotes(raw: &[u8]) -> &[u8] {
    match raw {
        [first @ (b'\'' | b'"'), inner @ .., last] if first == last => inner,
        _ => raw,
    }
}

/// Replaces every `${NAME}` with the value `env` has for `NAME`.
///
/// References to unset names are kept verbatim. A `${` without a closing brace is literal text.
#[must_use]
pub fn expand_env(value: &[u8], env: &dyn EnvLookup) -> Vec<u8> {
    let mut result = Vec::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.windows(2).position(|w| w == b"${") {
        result.extend_from_slice(&rest[..start]);
        let reference = &rest[start..];

        let Some(end) = reference.iter().position(|&b| b == b'}') else {
            result.extend_from_slice(reference);
            return result;
        };

        let replacement = std::str::from_utf8(&reference[2..end])
            .ok()
            .and_then(|name| env.lookup(name));

        match replacement {
            Some(replacement) => result.extend_from_slice(&replacement),
            None => result.extend_from_slice(&reference[..=end]),
        }

        rest = &reference[end + 1..];
    }

    result.extend_from_slice(rest);
    result
}

/// Interprets a stored value: strips enclosing quotes and optionally expands references.
#[must_use]
pub fn entry_text<'a>(raw: &'a [u8], env: Option<&dyn EnvLookup>) -> Cow<'a, [u8]> {
    let value = strip_quotes(raw);
    match env {
        Some(env) => Cow::Owned(expand_env(value, env)),
        None => Cow::Borrowed(value),
    }
}

/// Interprets `raw` (see [`entry_text`]) into `buf` and returns the number of bytes written
/// before the terminating NUL.
pub fn copy_entry(buf: &mut [u8], raw: &[u8], env: Option<&dyn EnvLookup>) -> usize {
    copy_to_buffer(buf, &entry_text(raw, env))
}

/// Copies as much of `bytes` as fits while leaving room for a NUL terminator.
pub fn copy_to_buffer(buf: &mut [u8], bytes: &[u8]) -> usize {
    let Some(room) = buf.len().checked_sub(1) else {
        return 0;
    };

    let n = bytes.len().min(room);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf[n] = 0;
    n
}

/// Prepares a value for storage so that blanks at either end survive the trimming done at load.
/// Such values are wrapped in double quotes; anything else is stored as given, so a value that is
/// already quoted reads back without its quotes.
#[must_use]
pub fn escape_value(value: &[u8]) -> Cow<'_, [u8]> {
    let blank_edge = value.first().is_some_and(|&b| is_profile_space(b))
        || value.last().is_some_and(|&b| is_profile_space(b));

    if !blank_edge {
        return Cow::Borrowed(value);
    }

    let mut escaped = Vec::with_capacity(value.len() + 2);
    escaped.push(b'"');
    escaped.extend_from_slice(value);
    escaped.push(b'"');
    Cow::Owned(escaped)
}
