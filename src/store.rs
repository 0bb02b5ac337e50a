//! The locked entry points used by callers.
//!
//! Every call takes the cache lock, opens the profile (making it current), does its work and
//! releases the lock before returning. Documents never leave the lock: callers get copies, or
//! work inside [`ProfileStore::with_document`].

use std::sync::Mutex;

use tracing::{trace, warn};

use crate::cache::{CachedProfile, ProfileCache, ProfileFile};
use crate::config::ProfileConfig;
use crate::document::Document;
use crate::entry::{copy_entry, entry_text, escape_value, trim_start};
use crate::error::{ProfileError, Result};
use crate::lock::mutex_lock;
use crate::section::Key;
use crate::struct_codec;

/// Size of the scratch buffer integer lookups read into.
const INT_BUFFER_LEN: usize = 20;

pub struct ProfileStore {
    cache: Mutex<ProfileCache>,
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new(&ProfileConfig::default())
    }
}

impl ProfileStore {
    #[must_use]
    pub fn new(config: &ProfileConfig) -> Self {
        Self {
            cache: Mutex::new(ProfileCache::new(config)),
        }
    }

    /// Runs `f` against the document of `file` while the cache is locked.
    pub fn with_document<R>(&self, file: &ProfileFile, f: impl FnOnce(&Document) -> R) -> R {
        let mut cache = mutex_lock(&self.cache, "with_document");
        f(cache.open(file).document())
    }

    /// Reads a value, a key listing or the section names into `buf`, depending on which names are
    /// given, and returns the length written (not counting the final NUL).
    ///
    /// - No `section` and `allow_listing`: the names of all sections, whatever `key` is.
    /// - `key` is `Some("")`: nothing is read and 0 is returned, whatever the default.
    /// - `section` and `key` given: the value (quotes stripped), or `default` when missing.
    /// - Only `section` given: the names of its keys as NUL-separated entries; `default` if the
    ///   section has none.
    ///
    /// Trailing spaces of `default` are ignored.
    pub fn get_private_string(
        &self,
        file: &ProfileFile,
        section: Option<&[u8]>,
        key: Option<&[u8]>,
        default: Option<&[u8]>,
        buf: &mut [u8],
        allow_listing: bool,
    ) -> usize {
        let default = default.map_or(&b""[..], trim_trailing_spaces);
        let mut cache = mutex_lock(&self.cache, "get_private_string");
        let document = cache.open(file).document();

        match (section, key) {
            (None, _) if allow_listing => document.get_section_names(buf),
            (_, Some([])) => terminate(buf),
            (Some(section), Some(key)) => {
                let raw = document.find(section, key).and_then(Key::value);
                let n = copy_entry(buf, raw.unwrap_or(default), None);
                trace!(
                    section = %String::from_utf8_lossy(section),
                    key = %String::from_utf8_lossy(key),
                    found = raw.is_some(),
                    "get string"
                );
                n
            }
            (Some(section), None) if !section.is_empty() => {
                let n = document.get_section(section, buf, None, false);
                if buf.first().is_some_and(|&b| b != 0) {
                    n
                } else {
                    copy_entry(buf, default, None)
                }
            }
            _ => terminate(buf),
        }
    }

    /// Edits a profile. Returns whether the document changed.
    ///
    /// - Nothing given: writes the profile back and drops it from the cache.
    /// - `key` is `None`: deletes the section.
    /// - `value` is `None`: deletes the key.
    /// - Otherwise stores `value` with leading blanks removed. Storing the value a key already
    ///   has leaves the profile clean.
    pub fn write_private_string(
        &self,
        file: &ProfileFile,
        section: Option<&[u8]>,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
    ) -> Result<bool> {
        let mut cache = mutex_lock(&self.cache, "write_private_string");

        let section = match (section, key, value) {
            (None, None, None) => {
                cache.open(file);
                cache.release(file.path())?;
                return Ok(false);
            }
            (None, ..) => {
                warn!(name = %file.name(), "write without a section name");
                return Err(ProfileError::MissingSection);
            }
            (Some(section), ..) => section,
        };

        let document = cache.open(file).document_mut();
        Ok(apply_write(document, section, key, value, false))
    }

    pub fn get_string(
        &self,
        file: &ProfileFile,
        section: impl AsRef<[u8]>,
        key: impl AsRef<[u8]>,
        default: impl AsRef<[u8]>,
        buf: &mut [u8],
    ) -> usize {
        self.get_private_string(
            file,
            Some(section.as_ref()),
            Some(key.as_ref()),
            Some(default.as_ref()),
            buf,
            false,
        )
    }

    /// Lists the key names of a section, falling back to `default` when there are none.
    pub fn get_section_keys(
        &self,
        file: &ProfileFile,
        section: impl AsRef<[u8]>,
        default: impl AsRef<[u8]>,
        buf: &mut [u8],
    ) -> usize {
        self.get_private_string(
            file,
            Some(section.as_ref()),
            None,
            Some(default.as_ref()),
            buf,
            false,
        )
    }

    pub fn get_section_names(&self, file: &ProfileFile, buf: &mut [u8]) -> usize {
        self.get_private_string(file, None, None, None, buf, true)
    }

    /// Lists a section as `key=value` entries. See [`Document::get_section`] for the layout.
    pub fn get_section(
        &self,
        file: &ProfileFile,
        section: impl AsRef<[u8]>,
        buf: &mut [u8],
    ) -> usize {
        self.with_document(file, |document| {
            document.get_section(section.as_ref(), buf, None, true)
        })
    }

    /// Returns the interpreted value of a key, if it has one.
    pub fn get_value(
        &self,
        file: &ProfileFile,
        section: impl AsRef<[u8]>,
        key: impl AsRef<[u8]>,
    ) -> Option<Vec<u8>> {
        self.with_document(file, |document| {
            let raw = document.find(section.as_ref(), key.as_ref())?.value()?;
            Some(entry_text(raw, None).into_owned())
        })
    }

    /// Reads a number the way `%lu` would: leading blanks, an optional sign, then digits. Missing
    /// or empty values give `default`; text without digits gives 0.
    pub fn get_int(
        &self,
        file: &ProfileFile,
        section: impl AsRef<[u8]>,
        key: impl AsRef<[u8]>,
        default: u32,
    ) -> u32 {
        let mut buf = [0_u8; INT_BUFFER_LEN];
        let n = self.get_string(file, section, key, b"", &mut buf);
        if n == 0 {
            return default;
        }

        parse_unsigned(&buf[..n])
    }

    pub fn set_string(
        &self,
        file: &ProfileFile,
        section: impl AsRef<[u8]>,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<bool> {
        self.write_private_string(
            file,
            Some(section.as_ref()),
            Some(key.as_ref()),
            Some(value.as_ref()),
        )
    }

    pub fn delete_key(
        &self,
        file: &ProfileFile,
        section: impl AsRef<[u8]>,
        key: impl AsRef<[u8]>,
    ) -> Result<bool> {
        self.write_private_string(file, Some(section.as_ref()), Some(key.as_ref()), None)
    }

    pub fn delete_section(&self, file: &ProfileFile, section: impl AsRef<[u8]>) -> Result<bool> {
        self.write_private_string(file, Some(section.as_ref()), None, None)
    }

    /// Replaces the contents of a section with `key=value` lines. Lines without `=` are skipped
    /// and repeated keys are kept.
    pub fn write_section<I>(&self, file: &ProfileFile, section: impl AsRef<[u8]>, lines: I) -> bool
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let section = section.as_ref();
        let mut cache = mutex_lock(&self.cache, "write_section");
        let document = cache.open(file).document_mut();

        let mut changed = document.clear_section(section);
        for line in lines {
            let line = line.as_ref();
            if let Some(eq) = line.iter().position(|&b| b == b'=') {
                changed |= apply_write(
                    document,
                    section,
                    Some(&line[..eq]),
                    Some(&line[eq + 1..]),
                    true,
                );
            }
        }

        changed
    }

    /// Reads a binary value written by [`ProfileStore::set_struct`].
    pub fn get_struct(
        &self,
        file: &ProfileFile,
        section: impl AsRef<[u8]>,
        key: impl AsRef<[u8]>,
        expected_len: usize,
    ) -> Result<Vec<u8>> {
        let (section, key) = (section.as_ref(), key.as_ref());

        self.with_document(file, |document| -> Result<Vec<u8>> {
            let value = document
                .find(section, key)
                .and_then(Key::value)
                .ok_or(ProfileError::NotFound)?;

            struct_codec::unpack(value, expected_len).map_err(|err| {
                warn!(
                    name = %file.name(),
                    section = %String::from_utf8_lossy(section),
                    key = %String::from_utf8_lossy(key),
                    error = %err,
                    "invalid struct value"
                );
                err.into()
            })
        })
    }

    pub fn set_struct(
        &self,
        file: &ProfileFile,
        section: impl AsRef<[u8]>,
        key: impl AsRef<[u8]>,
        bytes: &[u8],
    ) -> Result<bool> {
        let packed = struct_codec::pack(bytes);
        self.set_string(file, section, key, packed)
    }

    /// Makes `file` current, writes it back and drops it from the cache. The next access reads
    /// the file again.
    pub fn flush_all(&self, file: &ProfileFile) -> Result<()> {
        self.write_private_string(file, None, None, None).map(|_| ())
    }

    /// Writes the current profile if it has pending edits.
    pub fn write_out_profiles(&self) -> Result<bool> {
        mutex_lock(&self.cache, "write_out_profiles").flush_current()
    }

    #[must_use]
    pub fn is_resident(&self, file: &ProfileFile) -> bool {
        mutex_lock(&self.cache, "is_resident")
            .peek(file.path())
            .is_some()
    }

    /// Whether a resident profile has unsaved edits; `None` if it is not resident.
    #[must_use]
    pub fn is_dirty(&self, file: &ProfileFile) -> Option<bool> {
        mutex_lock(&self.cache, "is_dirty")
            .peek(file.path())
            .map(CachedProfile::is_dirty)
    }

    #[must_use]
    pub fn resident_len(&self) -> usize {
        mutex_lock(&self.cache, "resident_len").len()
    }

    /// Writes back and drops every cached profile.
    pub fn close(&self) -> Result<()> {
        mutex_lock(&self.cache, "close").close()
    }
}

fn apply_write(
    document: &mut Document,
    section: &[u8],
    key: Option<&[u8]>,
    value: Option<&[u8]>,
    create_always: bool,
) -> bool {
    match (key, value) {
        (None, _) => {
            trace!(section = %String::from_utf8_lossy(section), "delete section");
            document.delete_section(section)
        }
        (Some(key), None) => {
            trace!(
                section = %String::from_utf8_lossy(section),
                key = %String::from_utf8_lossy(key),
                "delete key"
            );
            document.delete_key(section, key)
        }
        (Some(key), Some(value)) => {
            let value = trim_start(value);
            let current = document.find(section, key).and_then(Key::value);
            if !create_always && current == Some(value) {
                trace!("no change needed");
                return false;
            }
            document.set_value(section, key, &escape_value(value), create_always)
        }
    }
}

fn terminate(buf: &mut [u8]) -> usize {
    if let Some(first) = buf.first_mut() {
        *first = 0;
    }
    0
}

fn trim_trailing_spaces(mut text: &[u8]) -> &[u8] {
    while let [rest @ .., b' '] = text {
        text = rest;
    }
    text
}

#[allow(clippy::cast_possible_truncation)]
fn parse_unsigned(text: &[u8]) -> u32 {
    let text = trim_start(text);
    let (negative, digits) = match text {
        [b'-', rest @ ..] => (true, rest),
        [b'+', rest @ ..] => (false, rest),
        _ => (false, text),
    };

    let value = digits
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0_u64, |acc, &b| {
            acc.saturating_mul(10).saturating_add(u64::from(b - b'0'))
        });

    let value = if negative { value.wrapping_neg() } else { value };
    value as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_parsing() {
        assert_eq!(parse_unsigned(b"42"), 42);
        assert_eq!(parse_unsigned(b"  17 apples"), 17);
        assert_eq!(parse_unsigned(b"+5"), 5);
        assert_eq!(parse_unsigned(b"-1"), u32::MAX);
        assert_eq!(parse_unsigned(b"abc"), 0);
        assert_eq!(parse_unsigned(b"99999999999999999999999"), u32::MAX);
    }

    #[test]
    fn default_loses_trailing_spaces_only() {
        assert_eq!(trim_trailing_spaces(b"  x   "), b"  x");
        assert_eq!(trim_trailing_spaces(b"   "), b"");
    }

    #[test]
    fn terminate_handles_empty_buffer() {
        let mut empty: [u8; 0] = [];
        assert_eq!(terminate(&mut empty), 0);
    }
}
