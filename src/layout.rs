//! Layout parameters and their cache fingerprint.
//!
//! A [`LayoutContext`] holds every display setting that changes how much text
//! fits on a page. [`fingerprint`] turns it into a stable string key so cached
//! page boundaries are invalidated exactly when one of those settings changes.

use core::fmt;

use crate::error::PaginateError;

/// Fingerprint encoding version. Bump when the encoding changes.
const FINGERPRINT_VERSION: &str = "v1";

/// Display settings that affect measurement.
#[derive(Clone, Debug, PartialEq)]
pub struct LayoutContext {
    /// Font size in CSS pixels.
    pub font_size: f32,
    /// Line height as a multiplier of `font_size`.
    pub line_height: f32,
    /// Font family name or stack as handed to the renderer.
    pub font_family: String,
    /// Content box width in CSS pixels.
    pub box_width: f32,
    /// Content box height in CSS pixels.
    pub box_height: f32,
}

impl Default for LayoutContext {
    fn default() -> Self {
        Self {
            font_size: 16.0,
            line_height: 1.5,
            font_family: String::from("serif"),
            box_width: 600.0,
            box_height: 800.0,
        }
    }
}

impl LayoutContext {
    /// Build a layout for a content box with default typography.
    pub fn for_box(box_width: f32, box_height: f32) -> Self {
        Self {
            box_width,
            box_height,
            ..Self::default()
        }
    }

    /// Set the font size.
    pub fn with_font_size(mut self, font_size: f32) -> Self {
        self.font_size = font_size;
        self
    }

    /// Set the line-height multiplier.
    pub fn with_line_height(mut self, line_height: f32) -> Self {
        self.line_height = line_height;
        self
    }

    /// Set the font family.
    pub fn with_font_family(mut self, font_family: impl Into<String>) -> Self {
        self.font_family = font_family.into();
        self
    }

    /// Reject layouts that cannot be measured.
    ///
    /// Every numeric field must be finite and strictly positive, and the
    /// family must not be blank.
    pub fn validate(&self) -> Result<(), PaginateError> {
        let numeric = [
            ("font_size", self.font_size),
            ("line_height", self.line_height),
            ("box_width", self.box_width),
            ("box_height", self.box_height),
        ];
        for (name, value) in numeric {
            if !value.is_finite() || value <= 0.0 {
                return Err(PaginateError::InvalidLayout(format!(
                    "{} must be finite and positive (got {})",
                    name, value
                )));
            }
        }
        if self.font_family.trim().is_empty() {
            return Err(PaginateError::InvalidLayout(
                "font_family must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Cache fingerprint for this layout.
    pub fn fingerprint(&self) -> ConfigFingerprint {
        fingerprint(self)
    }
}

/// Deterministic cache key derived from a [`LayoutContext`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigFingerprint(String);

impl ConfigFingerprint {
    /// Wrap a previously persisted fingerprint string.
    pub fn from_persisted(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the encoded fingerprint.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the encoded string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ConfigFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the fingerprint of a layout.
///
/// The encoding is a delimited concatenation of exactly the
/// measurement-relevant fields: font size, line height, box width, box height
/// and font family. Floats use Rust's shortest round-trip formatting, so two
/// distinct values never print the same. The family goes last so it needs no
/// escaping.
pub fn fingerprint(layout: &LayoutContext) -> ConfigFingerprint {
    // Exhaustive destructure: a new field must be added here or this fails to compile.
    let LayoutContext {
        font_size,
        line_height,
        font_family,
        box_width,
        box_height,
    } = layout;
    ConfigFingerprint(format!(
        "{};fs={};lh={};w={};h={};ff={}",
        FINGERPRINT_VERSION, font_size, line_height, box_width, box_height, font_family
    ))
}
