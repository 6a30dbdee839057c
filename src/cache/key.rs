use crate::{EdgeError, Result};
use sha2::{Digest, Sha256};

/// Logical route a cached response belongs to. Each route is its own key
/// namespace, so identical resources under different routes never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    PreviewImage,
    PublicFile,
    Metadata,
    MetadataOg,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::PreviewImage => "preview-image",
            Route::PublicFile => "public-file",
            Route::Metadata => "metadata",
            Route::MetadataOg => "metadata-og",
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical identity of a cacheable response.
///
/// Rendered as `<route>?key=<resource>&<params sorted by name>`, with every
/// value form-urlencoded so a resource containing `&` or `=` cannot forge
/// another key. Parameters the caller leaves out are simply not present.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    route: Route,
    canonical: String,
}

impl CacheKey {
    pub fn new(route: Route, resource: &str, params: &[(&str, String)]) -> Result<Self> {
        let mut sorted: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        sorted.sort();

        let mut pairs = Vec::with_capacity(sorted.len() + 1);
        pairs.push(("key", resource));
        pairs.extend(sorted);

        let query = serde_urlencoded::to_string(&pairs)
            .map_err(|e| EdgeError::Internal(format!("cache key encoding: {}", e)))?;

        Ok(Self { route, canonical: format!("{}?{}", route.as_str(), query) })
    }

    pub fn route(&self) -> Route {
        self.route
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Fixed-length physical key for storage backends.
    pub fn storage_key(&self) -> String {
        storage_key_for(&self.canonical)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// Hex SHA-256 of a canonical key.
pub fn storage_key_for(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::TransformParams;

    fn image_key(query: &str) -> CacheKey {
        let params: TransformParams = query.parse().unwrap();
        CacheKey::new(Route::PreviewImage, "cat.png", &params.key_params()).unwrap()
    }

    #[test]
    fn parameter_order_does_not_matter() {
        assert_eq!(image_key("width=100&quality=80"), image_key("quality=80&width=100"));

        let a = CacheKey::new(Route::PreviewImage, "k", &[("width", "1".into()), ("height", "2".into())]).unwrap();
        let b = CacheKey::new(Route::PreviewImage, "k", &[("height", "2".into()), ("width", "1".into())]).unwrap();
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn canonical_form() {
        assert_eq!(
            image_key("width=100&quality=80").canonical(),
            "preview-image?key=cat.png&quality=80&width=100"
        );
        assert_eq!(image_key("").canonical(), "preview-image?key=cat.png");
    }

    #[test]
    fn unset_width_differs_from_zero() {
        assert_ne!(image_key(""), image_key("width=0"));
    }

    #[test]
    fn every_output_parameter_is_significant() {
        let base = image_key("width=100&height=50&quality=80");
        assert_ne!(base, image_key("width=101&height=50&quality=80"));
        assert_ne!(base, image_key("width=100&height=51&quality=80"));
        assert_ne!(base, image_key("width=100&height=50&quality=81"));
    }

    #[test]
    fn unknown_parameters_are_ignored() {
        assert_eq!(image_key("width=100"), image_key("width=100&utm_source=mail"));
    }

    #[test]
    fn routes_are_separate_namespaces() {
        let url = "https://example.com/page";
        let plain = CacheKey::new(Route::Metadata, url, &[]).unwrap();
        let og = CacheKey::new(Route::MetadataOg, url, &[]).unwrap();
        assert_ne!(plain, og);
        assert_ne!(plain.storage_key(), og.storage_key());
    }

    #[test]
    fn resource_cannot_spoof_parameters() {
        let sneaky = CacheKey::new(Route::PreviewImage, "cat.png&width=100", &[]).unwrap();
        assert_ne!(sneaky, image_key("width=100"));
    }

    #[test]
    fn storage_key_is_hex_sha256() {
        let key = image_key("width=100");
        assert_eq!(key.storage_key().len(), 64);
        assert_eq!(key.storage_key(), storage_key_for(key.canonical()));
    }
}
