//! Most-recently-used cache of open profiles.
//!
//! The cache keeps at most `capacity` documents. The most recently used one is the "current"
//! profile: it is flushed whenever another profile takes its place, and the least recently used
//! one is written back and dropped when a new file needs a slot.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use lru::LruCache;
use tracing::{debug, error, trace, warn};

use crate::config::{ProfileConfig, StalePolicy};
use crate::document::Document;
use crate::error::{ProfileError, Result};

/// A profile file as named by the caller, together with the path that name resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProfileFile {
    name: String,
    path: PathBuf,
}

impl ProfileFile {
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Resolves a bare file name inside `dir`. A name containing a path separator is used as is.
    #[must_use]
    pub fn in_dir(dir: impl AsRef<Path>, name: &str) -> Self {
        let path = if name.contains(['/', '\\']) {
            PathBuf::from(name)
        } else {
            dir.as_ref().join(name)
        };
        Self::new(name, path)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name used inside the fallback directory: the last component of the logical name, in lower
    /// case.
    fn fallback_name(&self) -> String {
        self.name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.name)
            .to_lowercase()
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn read(file: &ProfileFile, path: &Path) -> (Document, Option<SystemTime>) {
    match File::open(path) {
        Ok(handle) => {
            debug!(name = %file.name(), path = %path.display(), "loading profile");
            (Document::load(BufReader::new(handle)), modified(path))
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "profile file not found");
            (Document::new(), None)
        }
    }
}

/// A resident document and what is known about the file behind it.
#[derive(Debug)]
pub struct CachedProfile {
    file: ProfileFile,
    /// Where the document was last read from or written to. Differs from `file.path()` once the
    /// profile lives in the fallback directory.
    location: PathBuf,
    document: Document,
    mtime: Option<SystemTime>,
}

impl CachedProfile {
    /// Parses the file, or starts an empty document when it cannot be read. A copy in the
    /// fallback directory takes precedence over the resolved path. The first flush creates the
    /// file when neither exists.
    fn open(file: &ProfileFile, fallback_dir: Option<&Path>) -> Self {
        let location = fallback_dir
            .map(|dir| dir.join(file.fallback_name()))
            .filter(|alternate| alternate.is_file())
            .unwrap_or_else(|| file.path().to_path_buf());

        let (document, mtime) = read(file, &location);
        Self {
            file: file.clone(),
            location,
            document,
            mtime,
        }
    }

    #[must_use]
    pub fn file(&self) -> &ProfileFile {
        &self.file
    }

    #[must_use]
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    /// The file the document was last read from or written to.
    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.document.is_changed()
    }

    #[must_use]
    pub fn is_stale(&self) -> bool {
        modified(&self.location) != self.mtime
    }

    fn refresh(&mut self, policy: StalePolicy) {
        let path = self.location.as_path();

        if policy == StalePolicy::Ignore || !self.is_stale() {
            trace!(path = %path.display(), "already opened");
            return;
        }

        match policy {
            StalePolicy::Ignore => {}
            StalePolicy::Warn => {
                warn!(path = %path.display(), "profile changed on disk, serving cached copy");
            }
            StalePolicy::Reload if self.is_dirty() => {
                warn!(
                    path = %path.display(),
                    "profile changed on disk but has unsaved edits, keeping cached copy"
                );
            }
            StalePolicy::Reload => {
                debug!(path = %path.display(), "profile changed on disk, reloading");
                (self.document, self.mtime) = read(&self.file, &self.location);
            }
        }
    }

    /// Writes the document if it has unsaved edits. When its location cannot be created the
    /// document goes to `fallback_dir` instead, which then becomes its location. On failure the
    /// edits stay pending.
    pub(crate) fn flush(&mut self, fallback_dir: Option<&Path>) -> Result<bool> {
        if !self.document.is_changed() {
            return Ok(false);
        }

        let (path, handle) = match File::create(&self.location) {
            Ok(handle) => (self.location.clone(), handle),
            Err(err) => {
                let alternate = fallback_dir
                    .map(|dir| dir.join(self.file.fallback_name()))
                    .filter(|alternate| *alternate != self.location);
                let Some(alternate) = alternate else {
                    return Err(ProfileError::Write {
                        path: self.location.clone(),
                        source: err,
                    });
                };

                warn!(
                    path = %self.location.display(),
                    alternate = %alternate.display(),
                    error = %err,
                    "cannot write profile, using fallback location"
                );

                match File::create(&alternate) {
                    Ok(handle) => (alternate, handle),
                    Err(source) => {
                        return Err(ProfileError::Write {
                            path: alternate,
                            source,
                        });
                    }
                }
            }
        };

        debug!(name = %self.file.name(), path = %path.display(), "saving profile");
        if let Err(source) = self.document.save(BufWriter::new(handle)) {
            return Err(ProfileError::Write { path, source });
        }

        self.document.mark_saved();
        self.mtime = modified(&path);
        self.location = path;
        Ok(true)
    }
}

/// Fixed-capacity cache of open profiles keyed by resolved path.
pub struct ProfileCache {
    entries: LruCache<PathBuf, CachedProfile>,
    stale_policy: StalePolicy,
    fallback_dir: Option<PathBuf>,
}

impl ProfileCache {
    #[must_use]
    pub fn new(config: &ProfileConfig) -> Self {
        Self {
            entries: LruCache::new(config.capacity_non_zero()),
            stale_policy: config.stale_policy,
            fallback_dir: config.fallback_dir.clone(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resident paths, most recently used first.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|(path, _)| path.as_path())
    }

    /// Looks at a resident profile without changing its position.
    #[must_use]
    pub fn peek(&self, path: &Path) -> Option<&CachedProfile> {
        self.entries.peek(path)
    }

    fn is_current(&self, path: &Path) -> bool {
        self.entries.iter().next().is_some_and(|(p, _)| p == path)
    }

    /// Makes `file` the current profile, loading it on a miss.
    pub fn open(&mut self, file: &ProfileFile) -> &mut CachedProfile {
        self.release_alias(file);

        let hit = self.entries.contains(file.path());
        if hit {
            if !self.is_current(file.path()) {
                self.flush_current_logged();
            }
            debug!(name = %file.name(), "profile cache hit");
        } else {
            self.flush_current_logged();

            if self.entries.len() == self.capacity() {
                if let Some((path, victim)) = self.entries.pop_lru() {
                    self.evict(&path, victim);
                }
            }
            debug!(name = %file.name(), path = %file.path().display(), "profile cache miss");
        }

        let policy = self.stale_policy;
        let fallback = self.fallback_dir.as_deref();
        let profile = self.entries.get_or_insert_mut(file.path().to_path_buf(), || {
            CachedProfile::open(file, fallback)
        });
        if hit {
            profile.refresh(policy);
        }
        profile
    }

    /// A profile known under the same logical name but a different path is out of date; the
    /// resolved path decides identity.
    fn release_alias(&mut self, file: &ProfileFile) {
        let alias = self
            .entries
            .iter()
            .find(|(path, profile)| {
                profile.file.name() == file.name() && path.as_path() != file.path()
            })
            .map(|(path, _)| path.clone());

        if let Some(path) = alias {
            warn!(
                name = %file.name(),
                cached = %path.display(),
                resolved = %file.path().display(),
                "profile name now resolves elsewhere, releasing cached copy"
            );
            if let Err(err) = self.release(&path) {
                error!(error = %err, "failed to release aliased profile");
            }
        }
    }

    fn evict(&self, path: &Path, mut victim: CachedProfile) {
        debug!(path = %path.display(), "evicting profile");
        if let Err(err) = victim.flush(self.fallback_dir.as_deref()) {
            error!(error = %err, "discarding unsaved edits of evicted profile");
        }
    }

    /// Writes the current profile if it has pending edits.
    pub fn flush_current(&mut self) -> Result<bool> {
        let fallback = self.fallback_dir.as_deref();
        match self.entries.iter_mut().next() {
            Some((_, profile)) => profile.flush(fallback),
            None => Ok(false),
        }
    }

    fn flush_current_logged(&mut self) {
        if let Err(err) = self.flush_current() {
            error!(error = %err, "failed to write current profile");
        }
    }

    /// Writes the profile back and drops it from the cache. Returns `false` when it was not
    /// resident. A profile that cannot be written stays resident with its edits.
    pub fn release(&mut self, path: &Path) -> Result<bool> {
        let fallback = self.fallback_dir.as_deref();
        let Some(profile) = self.entries.peek_mut(path) else {
            return Ok(false);
        };

        profile.flush(fallback)?;
        self.entries.pop(path);
        Ok(true)
    }

    /// Writes back and drops every profile. Profiles that cannot be written stay resident and the
    /// first error is returned.
    pub fn close(&mut self) -> Result<()> {
        let fallback = self.fallback_dir.as_deref();
        let mut failed = Vec::new();
        let mut first_error = None;

        while let Some((path, mut profile)) = self.entries.pop_lru() {
            if let Err(err) = profile.flush(fallback) {
                error!(path = %path.display(), error = %err, "failed to write profile on close");
                failed.push((path, profile));
                first_error.get_or_insert(err);
            }
        }

        for (path, profile) in failed {
            self.entries.put(path, profile);
        }

        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for ProfileCache {
    fn drop(&mut self) {
        let fallback = self.fallback_dir.as_deref();
        for (path, profile) in &mut self.entries {
            if let Err(err) = profile.flush(fallback) {
                error!(path = %path.display(), error = %err, "failed to write profile on drop");
            }
        }
    }
}
