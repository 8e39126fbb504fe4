//! Rendition filter strings.
//!
//! A filter is a `|`-joined list of operations, e.g. `fill-300x200-c50|format-png`.
//! Exactly one resize operation is required; output format, JPEG quality and
//! a focal point override are optional.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::MediaError;

/// Largest width or height any operation may request.
pub const MAX_DIMENSION: u32 = 4096;

/// JPEG quality used when the filter does not set one.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// How the source is resized (and possibly cropped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResizeMode {
    /// Keep the source dimensions.
    Original,
    /// Scale down to this width, keeping the aspect ratio.
    Width(u32),
    /// Scale down to this height, keeping the aspect ratio.
    Height(u32),
    /// Crop to the target aspect ratio around the focal point, then scale.
    /// `closeness` (0..=100) zooms the crop towards the focal rectangle.
    Fill {
        width: u32,
        height: u32,
        closeness: u8,
    },
    /// Scale down to fit inside the box.
    Max { width: u32, height: u32 },
    /// Scale down until one side matches the box and the other covers it.
    Min { width: u32, height: u32 },
}

impl ResizeMode {
    /// Whether the focal point influences the output.
    pub fn uses_focal_point(&self) -> bool {
        matches!(self, ResizeMode::Fill { .. })
    }
}

impl fmt::Display for ResizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResizeMode::Original => write!(f, "original"),
            ResizeMode::Width(w) => write!(f, "width-{w}"),
            ResizeMode::Height(h) => write!(f, "height-{h}"),
            ResizeMode::Fill {
                width,
                height,
                closeness: 0,
            } => write!(f, "fill-{width}x{height}"),
            ResizeMode::Fill {
                width,
                height,
                closeness,
            } => write!(f, "fill-{width}x{height}-c{closeness}"),
            ResizeMode::Max { width, height } => write!(f, "max-{width}x{height}"),
            ResizeMode::Min { width, height } => write!(f, "min-{width}x{height}"),
        }
    }
}

/// Encoded output format of a rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }

    fn name(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
        }
    }
}

/// Region of interest in normalised coordinates (`0.0..=1.0`).
///
/// Coordinates are rounded to four decimals on construction so that the
/// textual key is canonical.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocalPoint {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl FocalPoint {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Result<Self, String> {
        let coords = [left, top, right, bottom];
        if coords.iter().any(|c| !c.is_finite() || !(0.0..=1.0).contains(c)) {
            return Err("focal point coordinates must be within 0..1".to_string());
        }
        if left > right || top > bottom {
            return Err("focal point must have left <= right and top <= bottom".to_string());
        }
        let round = |v: f64| (v * 10_000.0).round() / 10_000.0;
        Ok(Self {
            left: round(left),
            top: round(top),
            right: round(right),
            bottom: round(bottom),
        })
    }

    /// The centre of the image as a zero-sized rectangle.
    pub fn centre() -> Self {
        Self {
            left: 0.5,
            top: 0.5,
            right: 0.5,
            bottom: 0.5,
        }
    }

    /// Canonical textual key, e.g. `focus-0.25,0.1,0.75,0.6`.
    pub fn key(&self) -> String {
        format!("focus-{self}")
    }
}

impl fmt::Display for FocalPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.left, self.top, self.right, self.bottom)
    }
}

/// A parsed rendition filter.
///
/// Equality and hashing use the canonical filter string.
#[derive(Debug, Clone)]
pub struct RenditionSpec {
    mode: ResizeMode,
    format: Option<OutputFormat>,
    quality: Option<u8>,
    focal_override: Option<FocalPoint>,
}

impl RenditionSpec {
    pub fn new(mode: ResizeMode) -> Self {
        Self {
            mode,
            format: None,
            quality: None,
            focal_override: None,
        }
    }

    /// Parse a filter string.
    pub fn parse(filter: &str) -> Result<Self, MediaError> {
        let invalid = |reason: String| MediaError::InvalidSpec {
            spec: filter.to_string(),
            reason,
        };

        let mut mode = None;
        let mut format = None;
        let mut quality = None;
        let mut focal_override = None;

        for op in filter.split('|').map(str::trim) {
            if op.is_empty() {
                return Err(invalid("empty operation".to_string()));
            }
            let (name, arg) = op.split_once('-').unwrap_or((op, ""));
            match name {
                "original" | "width" | "height" | "fill" | "max" | "min" => {
                    if mode.is_some() {
                        return Err(invalid("more than one resize operation".to_string()));
                    }
                    mode = Some(parse_mode(name, arg).map_err(invalid)?);
                }
                "format" => {
                    let parsed = match arg {
                        "jpeg" | "jpg" => OutputFormat::Jpeg,
                        "png" => OutputFormat::Png,
                        other => return Err(invalid(format!("unsupported format '{other}'"))),
                    };
                    set_once(&mut format, parsed, "format").map_err(invalid)?;
                }
                "jpegquality" => {
                    let q: u8 = arg
                        .parse()
                        .map_err(|_| invalid(format!("invalid quality '{arg}'")))?;
                    if !(1..=100).contains(&q) {
                        return Err(invalid("quality must be between 1 and 100".to_string()));
                    }
                    set_once(&mut quality, q, "jpegquality").map_err(invalid)?;
                }
                "focus" => {
                    let coords: Vec<f64> = arg
                        .split(',')
                        .map(|c| c.trim().parse::<f64>())
                        .collect::<Result<_, _>>()
                        .map_err(|_| invalid(format!("invalid focal point '{arg}'")))?;
                    let [l, t, r, b] = coords[..] else {
                        return Err(invalid("focal point needs four coordinates".to_string()));
                    };
                    let point = FocalPoint::new(l, t, r, b).map_err(invalid)?;
                    set_once(&mut focal_override, point, "focus").map_err(invalid)?;
                }
                other => return Err(invalid(format!("unknown operation '{other}'"))),
            }
        }

        let mode = mode.ok_or_else(|| invalid("no resize operation".to_string()))?;
        Ok(Self {
            mode,
            format,
            quality,
            focal_override,
        })
    }

    pub fn mode(&self) -> ResizeMode {
        self.mode
    }

    /// Explicit output format, if the filter sets one.
    pub fn format(&self) -> Option<OutputFormat> {
        self.format
    }

    /// JPEG quality to encode with.
    pub fn jpeg_quality(&self) -> u8 {
        self.quality.unwrap_or(DEFAULT_JPEG_QUALITY)
    }

    pub fn focal_override(&self) -> Option<FocalPoint> {
        self.focal_override
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_focal_override(mut self, focal: FocalPoint) -> Self {
        self.focal_override = Some(focal);
        self
    }

    /// Canonical key of the transformation, excluding any focal override.
    pub fn spec_key(&self) -> String {
        let mut key = self.mode.to_string();
        if let Some(format) = self.format {
            key.push_str("|format-");
            key.push_str(format.name());
        }
        if let Some(quality) = self.quality {
            key.push_str(&format!("|jpegquality-{quality}"));
        }
        key
    }
}

impl fmt::Display for RenditionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec_key())?;
        if let Some(focal) = &self.focal_override {
            write!(f, "|{}", focal.key())?;
        }
        Ok(())
    }
}

impl PartialEq for RenditionSpec {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for RenditionSpec {}

impl Hash for RenditionSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}

impl FromStr for RenditionSpec {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, name: &str) -> Result<(), String> {
    if slot.is_some() {
        return Err(format!("'{name}' given more than once"));
    }
    *slot = Some(value);
    Ok(())
}

fn parse_dimension(text: &str) -> Result<u32, String> {
    let value: u32 = text
        .parse()
        .map_err(|_| format!("invalid dimension '{text}'"))?;
    if !(1..=MAX_DIMENSION).contains(&value) {
        return Err(format!("dimension {value} outside 1..={MAX_DIMENSION}"));
    }
    Ok(value)
}

fn parse_box(text: &str) -> Result<(u32, u32), String> {
    let (w, h) = text
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{text}'"))?;
    Ok((parse_dimension(w)?, parse_dimension(h)?))
}

fn parse_mode(name: &str, arg: &str) -> Result<ResizeMode, String> {
    match name {
        "original" if arg.is_empty() => Ok(ResizeMode::Original),
        "original" => Err("'original' takes no arguments".to_string()),
        "width" => Ok(ResizeMode::Width(parse_dimension(arg)?)),
        "height" => Ok(ResizeMode::Height(parse_dimension(arg)?)),
        "fill" => {
            let (size, closeness) = match arg.split_once("-c") {
                Some((size, c)) => {
                    let closeness: u8 = c
                        .parse()
                        .map_err(|_| format!("invalid closeness '{c}'"))?;
                    if closeness > 100 {
                        return Err("closeness must be between 0 and 100".to_string());
                    }
                    (size, closeness)
                }
                None => (arg, 0),
            };
            let (width, height) = parse_box(size)?;
            Ok(ResizeMode::Fill {
                width,
                height,
                closeness,
            })
        }
        "max" => {
            let (width, height) = parse_box(arg)?;
            Ok(ResizeMode::Max { width, height })
        }
        "min" => {
            let (width, height) = parse_box(arg)?;
            Ok(ResizeMode::Min { width, height })
        }
        other => Err(format!("unknown resize operation '{other}'")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_modes() {
        assert_eq!(RenditionSpec::parse("original").unwrap().mode(), ResizeMode::Original);
        assert_eq!(RenditionSpec::parse("width-400").unwrap().mode(), ResizeMode::Width(400));
        assert_eq!(RenditionSpec::parse("height-90").unwrap().mode(), ResizeMode::Height(90));
        assert_eq!(
            RenditionSpec::parse("fill-300x200-c40").unwrap().mode(),
            ResizeMode::Fill {
                width: 300,
                height: 200,
                closeness: 40
            }
        );
        assert_eq!(
            RenditionSpec::parse("max-800x600").unwrap().mode(),
            ResizeMode::Max {
                width: 800,
                height: 600
            }
        );
        assert_eq!(
            RenditionSpec::parse("min-10x20").unwrap().mode(),
            ResizeMode::Min {
                width: 10,
                height: 20
            }
        );
    }

    #[test]
    fn canonical_key_orders_operations() {
        let a = RenditionSpec::parse("jpegquality-60|fill-100x100|format-jpg").unwrap();
        let b = RenditionSpec::parse("fill-100x100|format-jpeg|jpegquality-60").unwrap();
        assert_eq!(a.spec_key(), "fill-100x100|format-jpeg|jpegquality-60");
        assert_eq!(a, b);
    }

    #[test]
    fn focal_override_is_not_part_of_spec_key() {
        let spec = RenditionSpec::parse("fill-100x100|focus-0.1,0.2,0.3,0.4").unwrap();
        assert_eq!(spec.spec_key(), "fill-100x100");
        assert_eq!(spec.to_string(), "fill-100x100|focus-0.1,0.2,0.3,0.4");
        assert_ne!(spec, RenditionSpec::parse("fill-100x100").unwrap());
        assert_eq!(
            spec.focal_override().unwrap(),
            FocalPoint::new(0.1, 0.2, 0.3, 0.4).unwrap()
        );
    }

    #[test]
    fn fill_without_closeness_has_short_form() {
        let spec = RenditionSpec::parse("fill-10x20-c0").unwrap();
        assert_eq!(spec.spec_key(), "fill-10x20");
    }

    #[test]
    fn rejects_nonsense() {
        for filter in [
            "",
            "width-0",
            "width--5",
            "width-abc",
            "fill-0x100",
            "fill-100",
            "max-5000x10",
            "fill-10x10-c101",
            "width-10|height-10",
            "format-gif|width-10",
            "jpegquality-0|width-10",
            "focus-0.5,0.5|fill-1x1",
            "focus-0.9,0,0.1,1|fill-1x1",
            "format-png",
            "rotate-90",
            "original-5",
            "width-10|",
        ] {
            let result = RenditionSpec::parse(filter);
            assert!(
                matches!(result, Err(MediaError::InvalidSpec { .. })),
                "{filter:?} should be rejected"
            );
        }
    }

    #[test]
    fn defaults() {
        let spec = RenditionSpec::parse("width-100").unwrap();
        assert_eq!(spec.format(), None);
        assert_eq!(spec.jpeg_quality(), DEFAULT_JPEG_QUALITY);
        assert!(!spec.mode().uses_focal_point());
    }

    #[test]
    fn focal_point_rounds_to_canonical_form() {
        let point = FocalPoint::new(0.123456, 0.0, 1.0, 0.5).unwrap();
        assert_eq!(point.key(), "focus-0.1235,0,1,0.5");
        assert!(FocalPoint::new(-0.1, 0.0, 0.5, 0.5).is_err());
        assert!(FocalPoint::new(0.0, 0.0, f64::NAN, 0.5).is_err());
    }
}
