use std::io::{self, BufRead, Write};

use tracing::{trace, warn};

use crate::entry::{EnvLookup, copy_entry, trim, trim_end, trim_start};
use crate::section::{Key, Section};

/// The parsed contents of one profile file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    sections: Vec<Section>,
    changed: bool,
}

impl Document {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn parse(buffer: &[u8]) -> Self {
        Self::load(buffer)
    }

    /// Reads a document line by line. Loading never fails: a read error or an allocation failure
    /// stops the parse and keeps whatever was read up to that point.
    pub fn load<R: BufRead>(mut reader: R) -> Self {
        let mut loader = Loader::new();
        let mut line = Vec::with_capacity(256);

        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if !loader.feed(&line) {
                        warn!(line = loader.line, "out of memory while loading profile");
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!(line = loader.line, error = %err, "failed to read profile");
                    break;
                }
            }
        }

        Self {
            sections: loader.sections,
            changed: false,
        }
    }

    /// Writes the document with DOS line endings. Every named section is preceded by a blank line.
    pub fn save<W: Write>(&self, mut writer: W) -> io::Result<()> {
        for section in &self.sections {
            if section.is_named() {
                writer.write_all(b"\r\n[")?;
                writer.write_all(section.name())?;
                writer.write_all(b"]\r\n")?;
            }

            for key in section.keys() {
                writer.write_all(key.name())?;
                if let Some(value) = key.value() {
                    writer.write_all(b"=")?;
                    writer.write_all(value)?;
                }
                writer.write_all(b"\r\n")?;
            }
        }

        writer.flush()
    }

    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section_names(&self) -> impl Iterator<Item = &[u8]> {
        self.sections
            .iter()
            .filter(|section| section.is_named())
            .map(Section::name)
    }

    #[must_use]
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub(crate) fn mark_saved(&mut self) {
        self.changed = false;
    }

    fn section_index(&self, name: &[u8]) -> Option<usize> {
        self.sections.iter().position(|section| section.matches(name))
    }

    /// Looks up a key. Both names are trimmed and compared without regard to case. Only the first
    /// section with a matching name is searched.
    #[must_use]
    pub fn find(&self, section: &[u8], key: &[u8]) -> Option<&Key> {
        let key = trim(key);
        self.sections
            .iter()
            .find(|s| s.matches(trim(section)))?
            .keys()
            .iter()
            .find(|k| k.matches(key))
    }

    /// Returns the key, appending it (and its section) when missing. A new key has no value.
    pub(crate) fn find_or_create(&mut self, section: &[u8], key: &[u8]) -> &mut Key {
        let (section, key) = (trim(section), trim(key));

        let Some(i) = self.section_index(section) else {
            return self.push_section(section, key);
        };

        let keys = self.sections[i].keys_mut();
        let j = match keys.iter().position(|k| k.matches(key)) {
            Some(j) => j,
            None => {
                trace!(key = %String::from_utf8_lossy(key), "new key");
                keys.push(Key::new(key.to_vec(), None));
                keys.len() - 1
            }
        };

        &mut keys[j]
    }

    /// Appends a key even if one with the same name exists, for sections that hold repeated keys.
    pub(crate) fn append_key(&mut self, section: &[u8], key: &[u8]) -> &mut Key {
        let (section, key) = (trim(section), trim(key));

        let Some(i) = self.section_index(section) else {
            return self.push_section(section, key);
        };

        let keys = self.sections[i].keys_mut();
        keys.push(Key::new(key.to_vec(), None));
        let j = keys.len() - 1;
        &mut keys[j]
    }

    fn push_section(&mut self, section: &[u8], key: &[u8]) -> &mut Key {
        trace!(section = %String::from_utf8_lossy(section), "new section");

        let i = self.sections.len();
        self.sections.push(Section::new(
            section.to_vec(),
            vec![Key::new(key.to_vec(), None)],
        ));
        &mut self.sections[i].keys_mut()[0]
    }

    /// Stores `value` under the key, creating it when needed. Returns `false` when the key already
    /// held exactly this value, in which case the document is left untouched.
    pub fn set_value(
        &mut self,
        section: &[u8],
        key: &[u8],
        value: &[u8],
        create_always: bool,
    ) -> bool {
        let key = if create_always {
            self.append_key(section, key)
        } else {
            self.find_or_create(section, key)
        };

        if key.value() == Some(value) {
            trace!("no change needed");
            return false;
        }

        key.set_value(value.to_vec());
        self.changed = true;
        true
    }

    /// Removes the first section with this name together with its keys.
    pub fn delete_section(&mut self, name: &[u8]) -> bool {
        let Some(i) = self.section_index(trim(name)) else {
            return false;
        };

        self.sections.remove(i);
        self.changed = true;
        true
    }

    /// Removes the first matching key, looking through every section with the given name.
    pub fn delete_key(&mut self, section: &[u8], key: &[u8]) -> bool {
        let (section, key) = (trim(section), trim(key));

        for s in self.sections.iter_mut().filter(|s| s.matches(section)) {
            let keys = s.keys_mut();
            if let Some(j) = keys.iter().position(|k| k.matches(key)) {
                keys.remove(j);
                self.changed = true;
                return true;
            }
        }

        false
    }

    /// Empties every section with this name, keeping the headers.
    pub fn clear_section(&mut self, name: &[u8]) -> bool {
        let name = trim(name);
        let mut removed = false;

        for section in self.sections.iter_mut().filter(|s| s.matches(name)) {
            let keys = section.keys_mut();
            removed |= !keys.is_empty();
            keys.clear();
        }

        self.changed |= removed;
        removed
    }

    /// Writes the keys of a section into `buf` as NUL-separated entries followed by an extra NUL.
    ///
    /// Blank lines and comments are skipped. With `include_values`, entries read `key=value`.
    /// Returns the number of bytes written, not counting the final NUL. When `buf` runs out the
    /// last entry is cut short, two NULs end the block and the return value is `buf.len() - 2`.
    pub fn get_section(
        &self,
        name: &[u8],
        buf: &mut [u8],
        env: Option<&dyn EnvLookup>,
        include_values: bool,
    ) -> usize {
        let Some(section) = self.sections.iter().find(|s| s.matches(trim(name))) else {
            buf.iter_mut().take(2).for_each(|b| *b = 0);
            return 0;
        };

        let total = buf.len();
        if total < 2 {
            buf.iter_mut().for_each(|b| *b = 0);
            return 0;
        }

        let mut pos = 0;
        let mut left = total;

        for key in section.keys() {
            if left <= 2 {
                break;
            }
            if key.name().is_empty() || key.is_comment() {
                continue;
            }

            let n = copy_entry(&mut buf[pos..pos + left - 1], key.name(), env);
            left -= n + 1;
            pos += n + 1;
            if left < 2 {
                break;
            }

            if let Some(value) = key.value().filter(|_| include_values) {
                buf[pos - 1] = b'=';
                let n = copy_entry(&mut buf[pos..pos + left - 1], value, env);
                left -= n + 1;
                pos += n + 1;
            }
        }

        buf[pos] = 0;
        if left <= 1 {
            buf[pos - 1] = 0;
            return total - 2;
        }

        total - left
    }

    /// Writes the names of all sections into `buf`, with the same layout and truncation rules as
    /// [`Document::get_section`].
    pub fn get_section_names(&self, buf: &mut [u8]) -> usize {
        let total = buf.len();
        match total {
            0 => return 0,
            1 => {
                buf[0] = 0;
                return 0;
            }
            _ => {}
        }

        let mut free = total - 1;
        let mut pos = 0;

        for name in self.section_names() {
            let needed = name.len() + 1;

            if needed > free {
                if free > 0 {
                    buf[pos..pos + free - 1].copy_from_slice(&name[..free - 1]);
                    pos += free - 1;
                    buf[pos] = 0;
                    pos += 1;
                }
                buf[pos] = 0;
                return total - 2;
            }

            buf[pos..pos + name.len()].copy_from_slice(name);
            buf[pos + name.len()] = 0;
            pos += needed;
            free -= needed;
        }

        buf[pos] = 0;
        pos
    }
}

/// Parse state carried from one line to the next.
struct Loader {
    sections: Vec<Section>,
    line: usize,
}

impl Loader {
    fn new() -> Self {
        Self {
            sections: vec![Section::new(Vec::new(), Vec::new())],
            line: 0,
        }
    }

    /// Returns `false` when memory for the new entry could not be reserved.
    fn feed(&mut self, raw: &[u8]) -> bool {
        self.line += 1;
        let text = trim(raw);

        if let Some(header) = text.strip_prefix(b"[") {
            // The last bracket closes the header so names may contain `]`.
            if let Some(end) = header.iter().rposition(|&b| b == b']') {
                return self.open_section(trim(&header[..end]));
            }

            warn!(
                line = self.line,
                text = %String::from_utf8_lossy(text),
                "invalid section header"
            );
        }

        let (name, value) = match text.iter().position(|&b| b == b'=') {
            Some(eq) => (trim_end(&text[..eq]), Some(trim_start(&text[eq + 1..]))),
            None => (text, None),
        };

        let Some(section) = self.sections.last_mut() else {
            return true;
        };

        // Collapse runs of blank lines into a single placeholder.
        if name.is_empty() && section.keys().last().is_some_and(|k| k.name().is_empty()) {
            return true;
        }

        if section.keys_mut().try_reserve(1).is_err() {
            return false;
        }

        trace!(
            name = %String::from_utf8_lossy(name),
            value = ?value.map(String::from_utf8_lossy),
            "new key"
        );
        section.push(Key::new(name.to_vec(), value.map(<[u8]>::to_vec)));
        true
    }

    fn open_section(&mut self, name: &[u8]) -> bool {
        // A blank line right before a header is the separator written by `Document::save`.
        if let Some(previous) = self.sections.last_mut() {
            if previous.keys().last().is_some_and(Key::is_placeholder) {
                previous.keys_mut().pop();
            }
        }

        if self.sections.try_reserve(1).is_err() {
            return false;
        }

        trace!(name = %String::from_utf8_lossy(name), "new section");
        self.sections.push(Section::new(name.to_vec(), Vec::new()));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saved(document: &Document) -> Vec<u8> {
        let mut out = Vec::new();
        document
            .save(&mut out)
            .expect("writing to a Vec should not fail");
        out
    }

    fn value<'a>(document: &'a Document, section: &str, key: &str) -> Option<&'a [u8]> {
        document
            .find(section.as_bytes(), key.as_bytes())
            .and_then(Key::value)
    }

    #[test]
    fn multiple_keys_and_values() {
        let document = Document::parse(
            b"[Section]\r\nkey1 = value1\r\nkey2=  value2\r\n  key3   =value3  \r\n",
        );

        assert_eq!(
            document.sections()[1].keys(),
            &[
                Key::new(b"key1".to_vec(), Some(b"value1".to_vec())),
                Key::new(b"key2".to_vec(), Some(b"value2".to_vec())),
                Key::new(b"key3".to_vec(), Some(b"value3".to_vec())),
            ]
        );
    }

    #[test]
    fn multiple_sections() {
        let document = Document::parse(b"top=1\n[Version]\nSignature=$CHICAGO$\n[Section]\nkey=value\n");

        let names: Vec<&[u8]> = document.section_names().collect();
        assert_eq!(names, [&b"Version"[..], &b"Section"[..]]);
        assert_eq!(document.sections()[0].name(), b"");
        assert_eq!(value(&document, "Version", "Signature"), Some(&b"$CHICAGO$"[..]));
        assert_eq!(value(&document, "Section", "key"), Some(&b"value"[..]));
    }

    #[test]
    fn header_uses_last_bracket() {
        let document = Document::parse(b"[a]b] ; trailing\nk=v\n");
        let names: Vec<&[u8]> = document.section_names().collect();
        assert_eq!(names, [&b"a]b"[..]]);
    }

    #[test]
    fn unterminated_header_becomes_key() {
        let document = Document::parse(b"[broken\nk=v\n");
        assert_eq!(document.section_names().count(), 0);
        assert_eq!(document.sections()[0].keys()[0].name(), b"[broken");
        assert_eq!(document.sections()[0].keys()[0].value(), None);
    }

    #[test]
    fn dos_eof_and_carriage_returns_are_trimmed() {
        let document = Document::parse(b"[s]\r\nk=v\r\x1a\r\n");
        assert_eq!(value(&document, "s", "k"), Some(&b"v"[..]));
    }

    #[test]
    fn comments_and_blank_lines_are_kept_once() {
        let document = Document::parse(b"[s]\n; comment\na=1\n\n\n\nb=2\n");
        let keys = document.sections()[1].keys();

        assert_eq!(keys.len(), 4);
        assert_eq!(keys[0], Key::new(b"; comment".to_vec(), None));
        assert_eq!(keys[2], Key::new(Vec::new(), None));
        assert_eq!(keys[3].name(), b"b");
    }

    #[test]
    fn duplicate_sections_are_not_merged() {
        let document = Document::parse(b"[s]\na=1\n[S]\na=2\nb=3\n");
        assert_eq!(document.section_names().count(), 2);
        assert_eq!(value(&document, "s", "a"), Some(&b"1"[..]));
        assert_eq!(value(&document, "s", "b"), None);
    }

    #[test]
    fn save_format() {
        let document = Document::parse(b"top\n[set1]\n1=hello\n; note\nempty=\n");
        assert_eq!(
            saved(&document),
            b"top\r\n\r\n[set1]\r\n1=hello\r\n; note\r\nempty=\r\n"
        );
    }

    #[test]
    fn save_then_load_is_identical() {
        let original = Document::parse(
            b"; header comment\n\n[a]\nk=v\n\n; c\nflag\nempty=\n[b]\n[c]\nx = y z \n\n",
        );

        let reloaded = Document::parse(&saved(&original));
        assert_eq!(reloaded, original);

        let again = Document::parse(&saved(&reloaded));
        assert_eq!(again, original);
    }

    #[test]
    fn find_ignores_case_and_surrounding_blanks() {
        let document = Document::parse(b"[Foo]\nBar=1\n");
        let upper = document.find(b"Foo", b"Bar").map(Key::name);
        let lower = document.find(b"  foo ", b"bar\t").map(Key::name);
        assert_eq!(upper, Some(&b"Bar"[..]));
        assert_eq!(upper, lower);
    }

    #[test]
    fn find_requires_exact_length() {
        let document = Document::parse(b"[section]\nkeyname=1\n");
        assert!(document.find(b"sect", b"keyname").is_none());
        assert!(document.find(b"section", b"key").is_none());
    }

    #[test]
    fn find_or_create_appends() {
        let mut document = Document::parse(b"[s]\na=1\n");

        document.find_or_create(b"s", b"b").set_value(b"2".to_vec());
        document.find_or_create(b" new ", b"k").set_value(b"v".to_vec());

        assert_eq!(saved(&document), b"\r\n[s]\r\na=1\r\nb=2\r\n\r\n[new]\r\nk=v\r\n");
    }

    #[test]
    fn append_key_allows_repeats() {
        let mut document = Document::new();
        assert!(document.set_value(b"s", b"k", b"1", true));
        assert!(document.set_value(b"s", b"k", b"2", true));
        assert_eq!(document.sections()[0].keys().len(), 2);
    }

    #[test]
    fn set_value_reports_no_change() {
        let mut document = Document::parse(b"[s]\nk=v\n");
        assert!(!document.set_value(b"s", b"k", b"v", false));
        assert!(!document.is_changed());
        assert!(document.set_value(b"s", b"k", b"w", false));
        assert!(document.is_changed());
    }

    #[test]
    fn every_edit_marks_changed() {
        let fixture = b"[s]\nk=v\n";
        let edits: [fn(&mut Document) -> bool; 5] = [
            |d| d.set_value(b"s", b"k", b"w", false),
            |d| d.set_value(b"s", b"new", b"", false),
            |d| d.set_value(b"t", b"k", b"v", true),
            |d| d.delete_key(b"s", b"k"),
            |d| d.clear_section(b"s"),
        ];

        for (i, edit) in edits.iter().enumerate() {
            let mut document = Document::parse(fixture);
            assert!(edit(&mut document), "edit {i} reported no change");
            assert!(document.is_changed(), "edit {i} left the document clean");
        }

        let mut document = Document::parse(fixture);
        assert!(document.delete_section(b"s"));
        assert!(document.is_changed());
    }

    #[test]
    fn delete_section_and_key() {
        let mut document = Document::parse(b"[a]\nk=1\n[b]\nk=2\nj=3\n");

        assert!(document.delete_key(b"B", b"K"));
        assert!(!document.delete_key(b"b", b"k"));
        assert!(document.delete_section(b"A"));
        assert!(!document.delete_section(b"a"));
        assert!(document.is_changed());

        assert_eq!(saved(&document), b"\r\n[b]\r\nj=3\r\n");
    }

    #[test]
    fn delete_key_searches_duplicate_sections() {
        let mut document = Document::parse(b"[s]\na=1\n[s]\nb=2\n");
        assert!(document.delete_key(b"s", b"b"));
    }

    #[test]
    fn clear_section_keeps_header() {
        let mut document = Document::parse(b"[s]\na=1\nb=2\n");
        assert!(document.clear_section(b"s"));
        assert!(!document.clear_section(b"s"));
        assert_eq!(saved(&document), b"\r\n[s]\r\n");
    }

    #[test]
    fn get_section_with_values() {
        let document = Document::parse(b"[s]\n; skip me\na=1\n\nflag\nb=\"quoted\"\n");
        let mut buf = [0xAA_u8; 32];

        let n = document.get_section(b"s", &mut buf, None, true);
        assert_eq!(&buf[..=n], b"a=1\0flag\0b=quoted\0\0");
    }

    #[test]
    fn get_section_keys_only() {
        let document = Document::parse(b"[s]\nA=1\nB=2\nC=3\n");
        let mut buf = [0xAA_u8; 16];

        let n = document.get_section(b"S", &mut buf, None, false);
        assert_eq!(n, 6);
        assert_eq!(&buf[..7], b"A\0B\0C\0\0");
    }

    #[test]
    fn get_section_truncates() {
        let document = Document::parse(b"[S]\nA=1\nB=2\nC=3\n");
        let mut buf = [0xAA_u8; 3];

        let n = document.get_section(b"S", &mut buf, None, false);
        assert_eq!(n, 1);
        assert_eq!(&buf, b"A\0\0");
    }

    #[test]
    fn get_section_truncates_inside_entry() {
        let document = Document::parse(b"[S]\nlongname=1\n");
        let mut buf = [0xAA_u8; 6];

        let n = document.get_section(b"S", &mut buf, None, false);
        assert_eq!(n, 4);
        assert_eq!(&buf, b"long\0\0");
    }

    #[test]
    fn get_missing_section() {
        let document = Document::parse(b"[s]\na=1\n");
        let mut buf = [0xAA_u8; 4];

        assert_eq!(document.get_section(b"nope", &mut buf, None, true), 0);
        assert_eq!(&buf[..2], b"\0\0");
    }

    #[test]
    fn section_names_fit() {
        let document = Document::parse(b"x=1\n[one]\n[two]\n");
        let mut buf = [0xAA_u8; 16];

        let n = document.get_section_names(&mut buf);
        assert_eq!(n, 8);
        assert_eq!(&buf[..=n], b"one\0two\0\0");
    }

    #[test]
    fn section_names_truncate() {
        let document = Document::parse(b"[one]\n[two]\n");
        let mut buf = [0xAA_u8; 7];

        let n = document.get_section_names(&mut buf);
        assert_eq!(n, 5);
        assert_eq!(&buf, b"one\0t\0\0");
    }

    #[test]
    fn load_stops_on_read_error() {
        struct Failing<'a>(&'a [u8]);

        impl io::Read for Failing<'_> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.0.is_empty() {
                    return Err(io::Error::other("device went away"));
                }
                let n = self.0.len().min(buf.len());
                buf[..n].copy_from_slice(&self.0[..n]);
                self.0 = &self.0[n..];
                Ok(n)
            }
        }

        let document = Document::load(io::BufReader::new(Failing(b"[s]\na=1\n")));
        assert_eq!(value(&document, "s", "a"), Some(&b"1"[..]));
    }
}
