use crate::config::IMMUTABLE_MAX_AGE;

/// Cache-Control directives emitted with responses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachePolicy {
    /// Client and intermediary cache lifetime in seconds (max-age).
    /// Zero means the response must not be stored at all.
    pub max_age: u32,

    /// Enable caching by intermediaries (CDNs, proxies).
    pub public: bool,

    /// The body at this URL never changes; no revalidation.
    pub immutable: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::immutable()
    }
}

impl CachePolicy {
    /// Policy for every successful response: one year, public, immutable.
    /// Query parameters are the cache busters.
    pub fn immutable() -> Self {
        Self { max_age: IMMUTABLE_MAX_AGE, public: true, immutable: true }
    }

    /// Policy for error responses, which are never cached.
    pub fn no_store() -> Self {
        Self { max_age: 0, public: false, immutable: false }
    }

    pub fn header_value(&self) -> String {
        if self.max_age == 0 {
            return "no-store".to_string();
        }

        let mut parts = Vec::new();
        parts.push(if self.public { "public" } else { "private" }.to_string());
        parts.push(format!("max-age={}", self.max_age));
        if self.immutable {
            parts.push("immutable".to_string());
        }
        parts.join(", ")
    }
}
