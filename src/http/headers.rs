//! HTTP headers handling
//!
//! This module provides a type for managing HTTP headers with support for
//! multiple values per header name. Names are lowercased on insert, and
//! pseudo-headers (`:method`, `:path`, `:scheme`, `:authority`, `:status`)
//! always precede ordinary headers regardless of insertion order.

use super::{Error, Result, MAX_HEADERS};
use std::fmt;

/// HTTP headers collection
///
/// Headers are stored in insertion order (pseudo-header block first) and
/// support:
/// - Multiple values for the same header name
/// - Case-insensitive lookups (names are stored lowercase)
/// - Iteration over all headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Create a new empty headers collection
    pub fn new() -> Self {
        Headers { fields: Vec::new() }
    }

    /// Insert a header
    ///
    /// The name is lowercased. If a header with the same name already
    /// exists, this adds another value rather than replacing it.
    /// Pseudo-headers (leading `:`) are placed at the end of the
    /// pseudo-header block, ahead of all ordinary headers.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into().to_ascii_lowercase();
        let value = value.into();

        if self.fields.len() >= MAX_HEADERS {
            // Silently ignore past the cap (matching prior behavior)
            return;
        }

        if name.starts_with(':') {
            let pos = self
                .fields
                .iter()
                .position(|(n, _)| !n.starts_with(':'))
                .unwrap_or(self.fields.len());
            self.fields.insert(pos, (name, value));
        } else {
            self.fields.push((name, value));
        }
    }

    /// Get the first value for a header (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get all values for a header (case-insensitive)
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Check if a header exists
    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Remove all instances of a header (case-insensitive)
    pub fn remove(&mut self, name: &str) -> usize {
        let initial_len = self.fields.len();
        self.fields.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        initial_len - self.fields.len()
    }

    /// Get the number of headers
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if there are no headers
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Clear all headers
    pub fn clear(&mut self) {
        self.fields.clear();
    }

    /// Iterate over all headers, pseudo-header block first
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Check whether any comma-separated token of the named header equals
    /// `token` (ASCII case-insensitive). Used for `Connection` tokens like
    /// `close` and `keep-alive`.
    pub fn value_has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .iter()
            .any(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
    }

    /// Check whether the final comma-separated token of the named header
    /// equals `token` (ASCII case-insensitive). Used for the
    /// `Transfer-Encoding: …, chunked` rule, where `chunked` must be the
    /// last applied coding.
    pub fn value_ends_with_token(&self, name: &str, token: &str) -> bool {
        match self.get_all(name).last() {
            Some(v) => v
                .split(',')
                .last()
                .map(|t| t.trim().eq_ignore_ascii_case(token))
                .unwrap_or(false),
            None => false,
        }
    }

    /// Split a raw field line into name and value
    pub fn parse_header_line(line: &str) -> Result<(String, String)> {
        let (name, value) = line.split_once(':').ok_or_else(|| {
            Error::InvalidHeader(format!("field line without separator: {}", line))
        })?;

        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidHeader(format!(
                "field line without a name: {}",
                line
            )));
        }

        Ok((name.to_string(), value.trim().to_string()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}
