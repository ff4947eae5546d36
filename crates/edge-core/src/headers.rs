//! Request header container.

use std::sync::{PoisonError, RwLock};

use http::header::{HeaderMap, HeaderName, HeaderValue, SET_COOKIE};

use crate::error::StoreError;

/// Capability interface over a header container.
///
/// Names are case-insensitive. Multiple values for the same name are
/// joined with `", "` on read, matching the Fetch `Headers` semantics.
pub trait HeaderStore: Send + Sync {
    /// Get the combined value for a header.
    fn get(&self, name: &str) -> Option<String>;

    /// Get every `set-cookie` value separately.
    fn get_set_cookie(&self) -> Vec<String>;

    /// Check whether a header exists.
    fn has(&self, name: &str) -> bool;

    /// All `(name, combined value)` pairs, sorted by name.
    fn entries(&self) -> Vec<(String, String)>;

    /// Replace a header.
    fn set(&self, name: &str, value: &str) -> Result<(), StoreError>;

    /// Append a value to a header.
    fn append(&self, name: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a header.
    fn delete(&self, name: &str) -> Result<(), StoreError>;

    /// Header names, sorted.
    fn keys(&self) -> Vec<String> {
        self.entries().into_iter().map(|(k, _)| k).collect()
    }

    /// Combined header values, ordered by name.
    fn values(&self) -> Vec<String> {
        self.entries().into_iter().map(|(_, v)| v).collect()
    }
}

/// In-memory header container backed by [`http::HeaderMap`].
#[derive(Debug, Default)]
pub struct MemoryHeaders {
    map: RwLock<HeaderMap>,
    sealed: bool,
}

impl MemoryHeaders {
    /// Create an empty, mutable container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty container that rejects mutation.
    pub fn sealed() -> Self {
        Self {
            map: RwLock::new(HeaderMap::new()),
            sealed: true,
        }
    }

    /// Wrap an existing header map, sealing it against mutation.
    pub fn from_map(map: HeaderMap) -> Self {
        Self {
            map: RwLock::new(map),
            sealed: true,
        }
    }

    /// Build from name/value pairs, sealing the result.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(parse_name(name)?, parse_value(value)?);
        }
        Ok(Self::from_map(map))
    }

    /// Whether mutation is rejected.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.sealed {
            Err(StoreError::ReadonlyHeaders)
        } else {
            Ok(())
        }
    }
}

fn parse_name(name: &str) -> Result<HeaderName, StoreError> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| StoreError::InvalidHeader(name.to_string()))
}

fn parse_value(value: &str) -> Result<HeaderValue, StoreError> {
    HeaderValue::from_str(value).map_err(|_| StoreError::InvalidHeader(value.to_string()))
}

fn combined(map: &HeaderMap, name: &HeaderName) -> Option<String> {
    let values: Vec<&str> = map
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join(", "))
    }
}

impl HeaderStore for MemoryHeaders {
    fn get(&self, name: &str) -> Option<String> {
        let name = parse_name(name).ok()?;
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
        combined(&map, &name)
    }

    fn get_set_cookie(&self) -> Vec<String> {
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
        map.get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(String::from)
            .collect()
    }

    fn has(&self, name: &str) -> bool {
        match parse_name(name) {
            Ok(name) => self
                .map
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(name),
            Err(_) => false,
        }
    }

    fn entries(&self) -> Vec<(String, String)> {
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<(String, String)> = map
            .keys()
            .filter_map(|name| combined(&map, name).map(|v| (name.as_str().to_string(), v)))
            .collect();
        entries.sort();
        entries
    }

    fn set(&self, name: &str, value: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        let (name, value) = (parse_name(name)?, parse_value(value)?);
        self.map
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, value);
        Ok(())
    }

    fn append(&self, name: &str, value: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        let (name, value) = (parse_name(name)?, parse_value(value)?);
        self.map
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .append(name, value);
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        let name = parse_name(name)?;
        self.map
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let headers = MemoryHeaders::from_pairs([("Accept-Language", "en-US")]).unwrap();
        assert_eq!(headers.get("accept-language").as_deref(), Some("en-US"));
        assert_eq!(headers.get("ACCEPT-LANGUAGE").as_deref(), Some("en-US"));
        assert!(headers.has("Accept-Language"));
        assert!(!headers.has("x-missing"));
    }

    #[test]
    fn test_multi_values_are_joined() {
        let headers = MemoryHeaders::from_pairs([("accept", "text/html"), ("accept", "*/*")]).unwrap();
        assert_eq!(headers.get("accept").as_deref(), Some("text/html, */*"));
    }

    #[test]
    fn test_get_set_cookie_is_not_joined() {
        let headers =
            MemoryHeaders::from_pairs([("set-cookie", "a=1"), ("set-cookie", "b=2")]).unwrap();
        assert_eq!(headers.get_set_cookie(), vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_entries_sorted() {
        let headers = MemoryHeaders::from_pairs([("x-b", "2"), ("x-a", "1")]).unwrap();
        assert_eq!(
            headers.entries(),
            vec![
                ("x-a".to_string(), "1".to_string()),
                ("x-b".to_string(), "2".to_string())
            ]
        );
        assert_eq!(headers.keys(), vec!["x-a", "x-b"]);
        assert_eq!(headers.values(), vec!["1", "2"]);
    }

    #[test]
    fn test_sealed_rejects_mutation() {
        let headers = MemoryHeaders::sealed();
        assert_eq!(headers.set("x", "1"), Err(StoreError::ReadonlyHeaders));
        assert_eq!(headers.append("x", "1"), Err(StoreError::ReadonlyHeaders));
        assert_eq!(headers.delete("x"), Err(StoreError::ReadonlyHeaders));
    }

    #[test]
    fn test_mutable_headers() {
        let headers = MemoryHeaders::new();
        headers.set("x-a", "1").unwrap();
        headers.append("x-a", "2").unwrap();
        assert_eq!(headers.get("x-a").as_deref(), Some("1, 2"));
        headers.set("x-a", "3").unwrap();
        assert_eq!(headers.get("x-a").as_deref(), Some("3"));
        headers.delete("x-a").unwrap();
        assert!(!headers.has("x-a"));
    }

    #[test]
    fn test_invalid_header_name() {
        let headers = MemoryHeaders::new();
        assert!(matches!(
            headers.set("bad header", "1"),
            Err(StoreError::InvalidHeader(_))
        ));
    }
}
