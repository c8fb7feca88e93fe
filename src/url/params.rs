//! Ordered parameter multi-map
//!
//! Keeps parameters in insertion order (or sorted, case-insensitively, once
//! [`ParamMap::set_sort_keys`] is called). Keys compare exactly until a
//! key-case mode is selected; from then on stored keys are folded and
//! lookups ignore case.

use std::fmt;

use super::codec;
use super::UrlError;

/// Key normalization mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyCase {
    /// Keys are stored as given and compared exactly
    #[default]
    Preserve,
    /// Keys are stored lower-case
    Lower,
    /// Keys are stored upper-case
    Upper,
}

/// Ordered map of URL parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamMap {
    entries: Vec<(String, String)>,
    sort_keys: bool,
    key_case: KeyCase,
}

impl ParamMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a form-encoded parameter string (`a=1&b=2`)
    ///
    /// Both `&` and `;` separate pairs. A pair without `=` gets an empty
    /// value. A repeated key keeps its first position and its last value.
    pub fn parse(input: &str) -> Result<Self, UrlError> {
        let mut map = Self::new();
        for pair in input.split(['&', ';']).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = codec::decode_form(key)?;
            if key.is_empty() {
                continue;
            }
            map.insert(key, codec::decode_form(value)?);
        }
        Ok(map)
    }

    fn same_key(&self, a: &str, b: &str) -> bool {
        match self.key_case {
            KeyCase::Preserve => a == b,
            KeyCase::Lower | KeyCase::Upper => a.eq_ignore_ascii_case(b),
        }
    }

    fn fold(&self, key: String) -> String {
        match self.key_case {
            KeyCase::Preserve => key,
            KeyCase::Lower => key.to_ascii_lowercase(),
            KeyCase::Upper => key.to_ascii_uppercase(),
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| self.same_key(k, key))
    }

    fn sort(&mut self) {
        self.entries.sort_by_cached_key(|(k, _)| k.to_ascii_lowercase());
    }

    /// Get a parameter value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key).map(|idx| self.entries[idx].1.as_str())
    }

    /// Check whether a parameter is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Insert or replace a parameter
    ///
    /// A replaced parameter keeps its position. Returns the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();

        if let Some(idx) = self.position(&key) {
            let key = self.fold(key);
            let (_, old) = std::mem::replace(&mut self.entries[idx], (key, value));
            return Some(old);
        }

        let key = self.fold(key);
        self.entries.push((key, value));
        if self.sort_keys {
            self.sort();
        }
        None
    }

    /// Remove a parameter, returning its value
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.position(key).map(|idx| self.entries.remove(idx).1)
    }

    /// Keep only the listed keys (matched case-insensitively)
    ///
    /// Surviving entries follow the order of `allowed` unless the map is
    /// sorted.
    pub fn retain_keys(&mut self, allowed: &[&str]) {
        let entries = std::mem::take(&mut self.entries);
        for name in allowed {
            if let Some((k, v)) = entries.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
                self.insert(k.clone(), v.clone());
            }
        }
        if self.sort_keys {
            self.sort();
        }
    }

    /// Switch to sorted key order (case-insensitive)
    pub fn set_sort_keys(&mut self) {
        self.sort_keys = true;
        self.sort();
    }

    /// Whether keys are kept sorted
    pub fn is_sort_keys(&self) -> bool {
        self.sort_keys
    }

    /// Select a key-case mode and re-fold every stored key
    ///
    /// Keys that collide after folding collapse into the first position with
    /// the last value.
    pub fn set_key_case(&mut self, case: KeyCase) {
        self.key_case = case;
        let entries = std::mem::take(&mut self.entries);
        for (k, v) in entries {
            self.insert(k, v);
        }
    }

    /// Current key-case mode
    pub fn key_case(&self) -> KeyCase {
        self.key_case
    }

    /// Iterate over parameter keys in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Iterate over `(key, value)` pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every parameter, keeping the ordering and case modes
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Display for ParamMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str("&")?;
            }
            write!(f, "{}={}", codec::encode_form(k), codec::encode_form(v))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_order() {
        let map = ParamMap::parse("name=John+Doe&Address=321+O%27Tool+Street&grade=85%25").unwrap();

        let keys: Vec<_> = map.keys().collect();
        assert_eq!(keys, vec!["name", "Address", "grade"]);
        assert_eq!(map.get("Address"), Some("321 O'Tool Street"));
        assert_eq!(map.get("grade"), Some("85%"));
    }

    #[test]
    fn test_exact_lookup_without_case_mode() {
        let map = ParamMap::parse("Name=Jim").unwrap();

        assert_eq!(map.get("Name"), Some("Jim"));
        assert_eq!(map.get("name"), None);
    }

    #[test]
    fn test_folded_lookup_with_case_mode() {
        let mut map = ParamMap::parse("NAME=Beam+Current&threshold=50.0").unwrap();
        map.set_key_case(KeyCase::Lower);

        assert_eq!(map.get("Name"), Some("Beam Current"));
        assert_eq!(map.to_string(), "name=Beam+Current&threshold=50.0");
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut map = ParamMap::parse("a=1&b=2&c=3").unwrap();

        assert_eq!(map.insert("b", "20"), Some("2".to_string()));
        assert_eq!(map.to_string(), "a=1&b=20&c=3");
    }

    #[test]
    fn test_sorted_insert() {
        let mut map = ParamMap::parse("zed=1&Attr=2").unwrap();
        map.set_sort_keys();
        map.insert("grade", "3");

        assert_eq!(map.to_string(), "Attr=2&grade=3&zed=1");
    }

    #[test]
    fn test_upper_case_mode() {
        let mut map = ParamMap::parse("abc=1&Def=2").unwrap();
        map.set_sort_keys();
        map.set_key_case(KeyCase::Upper);
        map.insert("ghi", "3");

        assert_eq!(map.to_string(), "ABC=1&DEF=2&GHI=3");
    }

    #[test]
    fn test_collision_after_folding() {
        let mut map = ParamMap::parse("Scale=2&SCALE=3").unwrap();
        assert_eq!(map.len(), 2);

        map.set_key_case(KeyCase::Lower);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("scale"), Some("3"));
    }

    #[test]
    fn test_retain_keys() {
        let mut map = ParamMap::parse("b=2&junk=x&a=1").unwrap();
        map.retain_keys(&["a", "b"]);

        assert_eq!(map.to_string(), "a=1&b=2");
    }

    #[test]
    fn test_remove() {
        let mut map = ParamMap::parse("a=1&b=2").unwrap();

        assert_eq!(map.remove("a"), Some("1".to_string()));
        assert_eq!(map.remove("a"), None);
        assert_eq!(map.to_string(), "b=2");
    }

    #[test]
    fn test_blank_value_kept() {
        let map = ParamMap::parse("buffer=&rate").unwrap();

        assert_eq!(map.get("buffer"), Some(""));
        assert_eq!(map.get("rate"), Some(""));
    }

    #[test]
    fn test_malformed_value() {
        assert!(ParamMap::parse("a=%G1").is_err());
    }
}
