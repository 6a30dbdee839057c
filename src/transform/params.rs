use crate::config::{OutputFormat, DEFAULT_QUALITY, MAX_DIMENSION};
use crate::{EdgeError, Result};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Parameters for image transformation parsed from URL query parameters.
///
/// Absent fields stay `None` so the transformer can tell "keep the source
/// resolution" apart from an explicit size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformParams {
    /// Desired width of the output image
    pub width: Option<u32>,

    /// Desired height of the output image
    pub height: Option<u32>,

    /// Output quality, already clamped into 1..=100
    pub quality: Option<u8>,

    /// Output image format
    pub format: OutputFormat,
}

impl TransformParams {
    /// Build params from a raw query mapping. Unknown names are ignored and
    /// empty values count as absent.
    ///
    /// Quality outside 1..=100 is clamped; non-numeric values are rejected.
    pub fn from_query(query: &BTreeMap<String, String>) -> Result<Self> {
        let width = parse_dimension(query, "width")?;
        let height = parse_dimension(query, "height")?;
        let quality = match present(query, "quality") {
            Some(raw) => {
                let q = raw.parse::<i64>().map_err(|_| {
                    EdgeError::InvalidInput(format!("quality is not a number: {}", raw))
                })?;
                Some(q.clamp(1, 100) as u8)
            }
            None => None,
        };
        Ok(Self { width, height, quality, format: OutputFormat::WebP })
    }

    /// Quality handed to the encoder.
    pub fn effective_quality(&self) -> u8 {
        self.quality.unwrap_or(DEFAULT_QUALITY)
    }

    /// Name/value pairs that take part in the cache key. Absent fields are
    /// left out entirely.
    pub fn key_params(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if let Some(w) = self.width { out.push(("width", w.to_string())); }
        if let Some(h) = self.height { out.push(("height", h.to_string())); }
        if let Some(q) = self.quality { out.push(("quality", q.to_string())); }
        out
    }
}

impl FromStr for TransformParams {
    type Err = EdgeError;

    /// Parse a URL query string into TransformParams
    fn from_str(s: &str) -> Result<Self> {
        let map: BTreeMap<String, String> = serde_urlencoded::from_str(s)
            .map_err(|e| EdgeError::InvalidInput(format!("malformed query: {}", e)))?;
        Self::from_query(&map)
    }
}

fn present<'a>(query: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    query.get(name).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn parse_dimension(query: &BTreeMap<String, String>, name: &str) -> Result<Option<u32>> {
    let Some(raw) = present(query, name) else { return Ok(None) };
    let value = raw
        .parse::<u32>()
        .map_err(|_| EdgeError::InvalidInput(format!("{} is not a non-negative integer: {}", name, raw)))?;
    if value > MAX_DIMENSION {
        return Err(EdgeError::InvalidInput(format!(
            "{} {} exceeds the {} px limit",
            name, value, MAX_DIMENSION
        )));
    }
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_fields_stay_unset() {
        let p: TransformParams = "".parse().unwrap();
        assert_eq!(p.width, None);
        assert_eq!(p.height, None);
        assert_eq!(p.quality, None);
        assert_eq!(p.effective_quality(), 75);
        assert!(p.key_params().is_empty());
    }

    #[test]
    fn empty_values_count_as_absent() {
        let p: TransformParams = "width=&quality=".parse().unwrap();
        assert_eq!(p, TransformParams::default());
    }

    #[test]
    fn quality_is_clamped() {
        let high: TransformParams = "quality=150".parse().unwrap();
        assert_eq!(high.quality, Some(100));
        let low: TransformParams = "quality=-3".parse().unwrap();
        assert_eq!(low.quality, Some(1));
        let zero: TransformParams = "quality=0".parse().unwrap();
        assert_eq!(zero.quality, Some(1));
    }

    #[test]
    fn non_numeric_values_are_rejected() {
        assert!(matches!("quality=high".parse::<TransformParams>(), Err(EdgeError::InvalidInput(_))));
        assert!(matches!("width=abc".parse::<TransformParams>(), Err(EdgeError::InvalidInput(_))));
        assert!(matches!("height=-5".parse::<TransformParams>(), Err(EdgeError::InvalidInput(_))));
    }

    #[test]
    fn oversized_dimension_is_rejected() {
        assert!("width=8192".parse::<TransformParams>().is_ok());
        assert!(matches!("width=8193".parse::<TransformParams>(), Err(EdgeError::InvalidInput(_))));
    }

    #[test]
    fn zero_width_differs_from_unset() {
        let zero: TransformParams = "width=0".parse().unwrap();
        assert_eq!(zero.width, Some(0));
        assert_eq!(zero.key_params(), vec![("width", "0".to_string())]);
    }
}
