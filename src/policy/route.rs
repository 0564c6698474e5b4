//! Hierarchical route identifiers
//!
//! A route such as `public:chat` or `private:support.tickets` selects the
//! policy governing a request. Segments are separated by `:` or `.`;
//! resolution tests the full route first, then each shorter prefix, and
//! finally the empty route.

use std::fmt;

/// Characters that separate route segments
pub const SEPARATORS: [char; 2] = [':', '.'];

/// A normalized route identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Route(String);

impl Route {
    /// Normalize a route string: trimmed and ASCII-lowercased.
    pub fn parse(route: &str) -> Self {
        Self(route.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Route segments in order (`public:chat.v2` → `public`, `chat`, `v2`)
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATORS).filter(|s| !s.is_empty())
    }

    /// Lookup candidates from most to least specific, ending with `""`.
    ///
    /// `public:chat.v2` yields `public:chat.v2`, `public:chat`, `public`, `""`.
    pub fn candidates(&self) -> Vec<&str> {
        let mut out = Vec::new();
        if !self.0.is_empty() {
            out.push(self.0.as_str());
        }
        let mut rest = self.0.as_str();
        while let Some(idx) = rest.rfind(SEPARATORS) {
            rest = &rest[..idx];
            if !rest.is_empty() {
                out.push(rest);
            }
        }
        out.push("");
        out
    }

    /// Top-level segment, e.g. `public` for `public:chat`
    pub fn root(&self) -> &str {
        self.segments().next().unwrap_or("")
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Route {
    fn from(s: &str) -> Self {
        Route::parse(s)
    }
}
