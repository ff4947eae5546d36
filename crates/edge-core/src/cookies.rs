//! Request cookie container.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use crate::error::StoreError;

/// A single cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Path attribute.
    pub path: Option<String>,
    /// Max-Age attribute in seconds.
    pub max_age: Option<i64>,
    /// HttpOnly attribute.
    pub http_only: bool,
    /// Secure attribute.
    pub secure: bool,
}

impl Cookie {
    /// Create a cookie with no attributes.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            max_age: None,
            http_only: false,
            secure: false,
        }
    }

    /// Set the path attribute.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the Max-Age attribute.
    pub fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Mark the cookie HttpOnly.
    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    /// Mark the cookie Secure.
    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// Whether the cookie instructs the client to drop it.
    pub fn is_expired(&self) -> bool {
        matches!(self.max_age, Some(age) if age <= 0)
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Capability interface over a cookie container.
pub trait CookieStore: Send + Sync {
    /// Get a cookie by name.
    fn get(&self, name: &str) -> Option<Cookie>;

    /// Get all cookies, ordered by name.
    fn get_all(&self) -> Vec<Cookie>;

    /// Check whether a cookie exists.
    fn has(&self, name: &str) -> bool;

    /// Number of cookies.
    fn size(&self) -> usize;

    /// Set or replace a cookie.
    fn set(&self, cookie: Cookie) -> Result<(), StoreError>;

    /// Delete a cookie by name.
    fn delete(&self, name: &str) -> Result<(), StoreError>;

    /// Remove every cookie.
    fn clear(&self) -> Result<(), StoreError>;

    /// Serialize as a `Cookie` request header value.
    fn serialize(&self) -> String {
        self.get_all()
            .iter()
            .map(Cookie::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// In-memory cookie container.
#[derive(Debug, Default)]
pub struct MemoryCookies {
    cookies: RwLock<BTreeMap<String, Cookie>>,
    readonly: bool,
}

impl MemoryCookies {
    /// Create an empty, mutable container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty container that rejects mutation.
    pub fn readonly() -> Self {
        Self {
            cookies: RwLock::new(BTreeMap::new()),
            readonly: true,
        }
    }

    /// Parse a `Cookie` request header (e.g. `"a=1; b=2"`) into a readonly container.
    pub fn from_header(header: &str) -> Self {
        let cookies = header
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some((name.to_string(), Cookie::new(name, value.trim())))
            })
            .collect();

        Self {
            cookies: RwLock::new(cookies),
            readonly: true,
        }
    }

    /// Add a cookie while building, bypassing the readonly flag.
    pub fn with_cookie(self, cookie: Cookie) -> Self {
        self.cookies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cookie.name.clone(), cookie);
        self
    }

    /// Whether mutation is rejected.
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.readonly {
            Err(StoreError::ReadonlyCookies)
        } else {
            Ok(())
        }
    }
}

impl CookieStore for MemoryCookies {
    fn get(&self, name: &str) -> Option<Cookie> {
        self.cookies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn get_all(&self) -> Vec<Cookie> {
        self.cookies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn has(&self, name: &str) -> bool {
        self.cookies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    fn size(&self) -> usize {
        self.cookies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn set(&self, cookie: Cookie) -> Result<(), StoreError> {
        self.check_writable()?;
        self.cookies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cookie.name.clone(), cookie);
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.cookies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.check_writable()?;
        self.cookies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_header_parses_pairs() {
        let cookies = MemoryCookies::from_header("theme=dark; session=abc123;  ; bad");
        assert_eq!(cookies.size(), 2);
        assert_eq!(cookies.get("theme").unwrap().value, "dark");
        assert!(cookies.has("session"));
        assert!(!cookies.has("bad"));
    }

    #[test]
    fn test_readonly_rejects_mutation() {
        let cookies = MemoryCookies::from_header("a=1");
        assert_eq!(
            cookies.set(Cookie::new("b", "2")),
            Err(StoreError::ReadonlyCookies)
        );
        assert_eq!(cookies.delete("a"), Err(StoreError::ReadonlyCookies));
        assert_eq!(cookies.clear(), Err(StoreError::ReadonlyCookies));
        assert_eq!(cookies.size(), 1);
    }

    #[test]
    fn test_mutable_set_delete_clear() {
        let cookies = MemoryCookies::new();
        cookies.set(Cookie::new("a", "1")).unwrap();
        cookies.set(Cookie::new("b", "2")).unwrap();
        cookies.set(Cookie::new("a", "3")).unwrap();
        assert_eq!(cookies.get("a").unwrap().value, "3");

        cookies.delete("a").unwrap();
        assert!(!cookies.has("a"));

        cookies.clear().unwrap();
        assert_eq!(cookies.size(), 0);
    }

    #[test]
    fn test_serialize_ordered_by_name() {
        let cookies = MemoryCookies::new()
            .with_cookie(Cookie::new("z", "26"))
            .with_cookie(Cookie::new("a", "1"));
        assert_eq!(cookies.serialize(), "a=1; z=26");
    }

    #[test]
    fn test_cookie_expired() {
        assert!(Cookie::new("a", "").with_max_age(0).is_expired());
        assert!(!Cookie::new("a", "").with_max_age(60).is_expired());
        assert!(!Cookie::new("a", "").is_expired());
    }
}
