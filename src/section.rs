/// A `[name]` group of keys. The unnamed section holds the keys found before the first header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    name: Vec<u8>,
    keys: Vec<Key>,
}

impl Section {
    #[must_use]
    pub(crate) fn new(name: Vec<u8>, keys: Vec<Key>) -> Self {
        Self { name, keys }
    }

    #[must_use]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    #[must_use]
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub(crate) fn keys_mut(&mut self) -> &mut Vec<Key> {
        &mut self.keys
    }

    /// The unnamed section is never found by name.
    #[must_use]
    pub fn is_named(&self) -> bool {
        !self.name.is_empty()
    }

    #[must_use]
    pub fn matches(&self, name: &[u8]) -> bool {
        self.is_named() && self.name.eq_ignore_ascii_case(name)
    }

    pub(crate) fn push(&mut self, key: Key) {
        self.keys.push(key);
    }
}

/// A line inside a section. `value` is `None` when the line had no `=`, which is how comments and
/// blank lines are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    name: Vec<u8>,
    value: Option<Vec<u8>>,
}

impl Key {
    #[must_use]
    pub fn new(name: Vec<u8>, value: Option<Vec<u8>>) -> Self {
        Self { name, value }
    }

    #[must_use]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    #[must_use]
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    pub(crate) fn set_value(&mut self, value: Vec<u8>) {
        self.value = Some(value);
    }

    #[must_use]
    pub fn matches(&self, name: &[u8]) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    #[must_use]
    pub fn is_comment(&self) -> bool {
        self.name.first() == Some(&b';')
    }

    #[must_use]
    pub(crate) fn is_placeholder(&self) -> bool {
        self.name.is_empty() && self.value.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_match_ignores_case() {
        let section = Section::new(b"Set1".to_vec(), Vec::new());
        assert!(section.matches(b"SET1"));
        assert!(!section.matches(b"set"));
        assert!(!section.matches(b"set12"));
    }

    #[test]
    fn unnamed_section_never_matches() {
        let section = Section::new(Vec::new(), Vec::new());
        assert!(!section.matches(b""));
    }

    #[test]
    fn comment_keys() {
        assert!(Key::new(b"; note".to_vec(), None).is_comment());
        assert!(!Key::new(b"key".to_vec(), Some(b";".to_vec())).is_comment());
    }
}
