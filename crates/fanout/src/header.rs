//! Ordered, case-insensitive header set with canonical names.
//!
//! `http::HeaderMap` lower-cases every name, but the fanout surface promises
//! canonical capitalization (`X-Request-Id`, `Content-Type`) on everything it
//! writes. `Header` keeps insertion order, looks names up ASCII
//! case-insensitively, and stores names written through [`Header::set`] and
//! [`Header::add`] in canonical form.

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;

/// Return the canonical form of a header name: the first letter and every
/// letter following a hyphen are upper case, all others lower case.
///
/// Names containing bytes that are not valid header token characters are
/// returned unchanged.
pub fn canonical_header_key(name: &str) -> String {
    if !name.bytes().all(is_token_byte) {
        return name.to_string();
    }

    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c.to_ascii_lowercase());
        }
        upper = c == '-';
    }
    out
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// An ordered multimap of header names to values.
///
/// Equality compares names case-insensitively and ignores the order of
/// entries; the order of values within one entry is significant.
#[derive(Debug, Clone, Default)]
pub struct Header {
    entries: Vec<(String, Vec<String>)>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    /// Look up an entry by name, returning the stored name and its values.
    pub fn entry(&self, name: &str) -> Option<(&str, &[String])> {
        self.position(name).map(|i| {
            let (key, values) = &self.entries[i];
            (key.as_str(), values.as_slice())
        })
    }

    /// First value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    /// All values for `name`; empty when the header is absent.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entry(name).map(|(_, values)| values).unwrap_or(&[])
    }

    /// True when an entry exists for `name`, even with zero values.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Replace all values of `name` with a single value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.set_all(name, vec![value.into()]);
    }

    /// Replace all values of `name`.
    pub fn set_all(&mut self, name: &str, values: Vec<String>) {
        let key = canonical_header_key(name);
        match self.position(name) {
            Some(i) => self.entries[i] = (key, values),
            None => self.entries.push((key, values)),
        }
    }

    /// Append a value to `name`, creating the entry if needed.
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        match self.position(name) {
            Some(i) => self.entries[i].1.push(value.into()),
            None => self
                .entries
                .push((canonical_header_key(name), vec![value.into()])),
        }
    }

    /// Remove `name`, returning its values.
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(key, values)| (key.as_str(), values.as_slice()))
    }

    /// Copy the named headers from `source`, overwriting existing values.
    ///
    /// Matching is case-insensitive; the name as stored in `source` is the one
    /// written here. Names missing from `source`, or present with no values,
    /// are skipped.
    pub fn copy_from<S: AsRef<str>>(&mut self, source: &Header, names: &[S]) {
        for name in names {
            if let Some((key, values)) = source.entry(name.as_ref()) {
                if !values.is_empty() {
                    self.set_all(key, values.to_vec());
                }
            }
        }
    }

    /// Convert to an `http::HeaderMap`, skipping names or values that are not
    /// valid on the wire.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (key, values) in &self.entries {
            let Ok(name) = HeaderName::from_bytes(key.as_bytes()) else {
                tracing::debug!(header = %key, "Skipping invalid header name");
                continue;
            };
            for value in values {
                match HeaderValue::from_str(value) {
                    Ok(v) => {
                        map.append(name.clone(), v);
                    }
                    Err(_) => {
                        tracing::debug!(header = %key, "Skipping invalid header value");
                    }
                }
            }
        }
        map
    }
}

impl PartialEq for Header {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.iter().all(|(key, values)| {
                other
                    .entry(key)
                    .is_some_and(|(_, theirs)| theirs == values.as_slice())
            })
    }
}

impl Eq for Header {}

impl From<&HeaderMap> for Header {
    fn from(map: &HeaderMap) -> Self {
        let mut header = Header::new();
        for (name, value) in map.iter() {
            header.add(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }
        header
    }
}

impl<N, V, S> FromIterator<(N, V)> for Header
where
    N: AsRef<str>,
    V: IntoIterator<Item = S>,
    S: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut header = Header::new();
        for (name, values) in iter {
            header.set_all(
                name.as_ref(),
                values.into_iter().map(Into::into).collect(),
            );
        }
        header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_header_key() {
        assert_eq!(canonical_header_key("content-type"), "Content-Type");
        assert_eq!(canonical_header_key("x-TeST-3"), "X-Test-3");
        assert_eq!(canonical_header_key("X-TEST-1"), "X-Test-1");
        assert_eq!(canonical_header_key("etag"), "Etag");
        // Not a token: left alone
        assert_eq!(canonical_header_key("bad header"), "bad header");
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut header = Header::new();
        header.set("x-request-id", "abc");

        assert_eq!(header.get("X-REQUEST-ID"), Some("abc"));
        assert!(header.contains("X-Request-Id"));
        assert_eq!(header.iter().next().unwrap().0, "X-Request-Id");
    }

    #[test]
    fn test_set_overwrites_and_add_appends() {
        let mut header = Header::new();
        header.add("Accept", "text/plain");
        header.add("accept", "application/json");
        assert_eq!(header.get_all("Accept"), ["text/plain", "application/json"]);

        header.set("ACCEPT", "*/*");
        assert_eq!(header.get_all("accept"), ["*/*"]);
        assert_eq!(header.len(), 1);

        assert_eq!(header.remove("Accept"), Some(vec!["*/*".to_string()]));
        assert!(header.is_empty());
    }

    #[test]
    fn test_copy_from_skips_missing_and_empty() {
        let source: Header = [
            ("X-Test-1", vec!["foo"]),
            ("X-Test-2", vec!["foo", "bar"]),
            ("X-Test-3", vec![]),
        ]
        .into_iter()
        .collect();

        let mut dest = Header::new();
        dest.copy_from(&source, &["X-TEST-3", "x-TEsT-1", "x-TesT-2", "X-Missing"]);

        let expected: Header = [("X-Test-1", vec!["foo"]), ("X-Test-2", vec!["foo", "bar"])]
            .into_iter()
            .collect();
        assert_eq!(dest, expected);
    }

    #[test]
    fn test_equality_ignores_entry_order() {
        let forward: Header = [("X-Test-1", vec!["foo"]), ("X-Test-2", vec!["foo", "bar"])]
            .into_iter()
            .collect();
        let mut reversed = Header::new();
        reversed.add("x-test-2", "foo");
        reversed.add("x-test-2", "bar");
        reversed.add("x-test-1", "foo");
        assert_eq!(forward, reversed);

        let mut swapped_values = Header::new();
        swapped_values.set_all("X-Test-2", vec!["bar".into(), "foo".into()]);
        swapped_values.set("X-Test-1", "foo");
        assert_ne!(forward, swapped_values);

        let mut extra = forward.clone();
        extra.set("X-Test-3", "baz");
        assert_ne!(forward, extra);
        assert_ne!(extra, forward);
    }

    #[test]
    fn test_header_map_conversion_canonicalizes() {
        let mut map = HeaderMap::new();
        map.append("x-multi", HeaderValue::from_static("a"));
        map.append("x-multi", HeaderValue::from_static("b"));
        map.insert("content-type", HeaderValue::from_static("text/plain"));

        let header = Header::from(&map);
        assert_eq!(header.get_all("X-Multi"), ["a", "b"]);
        assert_eq!(header.entry("content-type").unwrap().0, "Content-Type");

        let back = header.to_header_map();
        assert_eq!(back.get_all("x-multi").iter().count(), 2);
        assert_eq!(back.get("content-type").unwrap(), "text/plain");
    }

    #[test]
    fn test_invalid_values_are_skipped_on_the_wire() {
        let mut header = Header::new();
        header.set("X-Good", "ok");
        header.set("X-Bad", "line\nbreak");

        let map = header.to_header_map();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("x-good"));
    }
}
