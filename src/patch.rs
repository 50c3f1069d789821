//! Patch request types: what background to inject and how to lay it out.
//!
//! A [`PatchSpec`] is built once per user action, handed to the engine, and
//! discarded. Construction validates the ranges the engine cannot repair on
//! its own; opacity above [`MAX_OPACITY`] is accepted and clamped at render
//! time.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Highest opacity the rendered overlay may use.
pub const MAX_OPACITY: f64 = 0.8;

/// Highest accepted blur radius, in pixels.
pub const MAX_BLUR: f64 = 100.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("opacity must be a finite value >= 0, got {0}")]
    Opacity(f64),

    #[error("blur radius must be within [0, {max}], got {value}")]
    Blur { value: f64, max: f64 },

    #[error("image reference is empty")]
    EmptyImage,

    #[error("unknown size mode '{input}'{}", did_you_mean(.suggestion))]
    UnknownSizeMode {
        input: String,
        suggestion: Option<String>,
    },

    #[error("unknown theme kind '{0}' (expected light, dark or high-contrast)")]
    UnknownTheme(String),
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(name) => format!(" (did you mean '{name}'?)"),
        None => String::new(),
    }
}

/// Everything needed to render one background patch.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchSpec {
    image: ImageReference,
    opacity: f64,
    blur: f64,
    size_mode: SizeMode,
    blend_mode: BlendMode,
}

impl PatchSpec {
    pub fn new(
        image: ImageReference,
        opacity: f64,
        blur: f64,
        size_mode: SizeMode,
        blend_mode: BlendMode,
    ) -> Result<Self, ValidationError> {
        if !opacity.is_finite() || opacity < 0.0 {
            return Err(ValidationError::Opacity(opacity));
        }
        if !blur.is_finite() || !(0.0..=MAX_BLUR).contains(&blur) {
            return Err(ValidationError::Blur {
                value: blur,
                max: MAX_BLUR,
            });
        }
        if image.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyImage);
        }

        Ok(Self {
            image,
            opacity,
            blur,
            size_mode,
            blend_mode,
        })
    }

    pub fn image(&self) -> &ImageReference {
        &self.image
    }

    /// Opacity as requested by the caller, before clamping.
    pub fn opacity(&self) -> f64 {
        self.opacity
    }

    /// Opacity as it will be rendered.
    pub fn effective_opacity(&self) -> f64 {
        self.opacity.min(MAX_OPACITY)
    }

    pub fn blur(&self) -> f64 {
        self.blur
    }

    pub fn size_mode(&self) -> SizeMode {
        self.size_mode
    }

    pub fn blend_mode(&self) -> &BlendMode {
        &self.blend_mode
    }

    /// Same spec with a different image, used once the caller has resolved
    /// a local path into something the host can load.
    pub fn with_image(mut self, image: ImageReference) -> Self {
        self.image = image;
        self
    }
}

/// Where the background image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    LocalPath(PathBuf),
    DataUri(String),
    RemoteUrl(String),
}

impl ImageReference {
    /// Classify a raw reference as it appears in user configuration.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("data:") {
            ImageReference::DataUri(trimmed.to_string())
        } else if lower.starts_with("https://") {
            ImageReference::RemoteUrl(trimmed.to_string())
        } else {
            ImageReference::LocalPath(PathBuf::from(trimmed))
        }
    }

    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        match self {
            ImageReference::LocalPath(path) => path.to_string_lossy(),
            ImageReference::DataUri(s) | ImageReference::RemoteUrl(s) => {
                std::borrow::Cow::Borrowed(s.as_str())
            }
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ImageReference::LocalPath(_))
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

/// Layout policy for the background image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SizeMode {
    #[default]
    Cover,
    Contain,
    Repeat,
    NoopCenter,
    NoopLeft,
    NoopRight,
    NoopTop,
    NoopBottom,
    NoopTopRight,
    NoopBottomRight,
}

/// `background-size`, `background-repeat` and `background-position` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub size: &'static str,
    pub repeat: &'static str,
    pub position: &'static str,
}

impl SizeMode {
    pub const ALL: [SizeMode; 10] = [
        SizeMode::Cover,
        SizeMode::Contain,
        SizeMode::Repeat,
        SizeMode::NoopCenter,
        SizeMode::NoopLeft,
        SizeMode::NoopRight,
        SizeMode::NoopTop,
        SizeMode::NoopBottom,
        SizeMode::NoopTopRight,
        SizeMode::NoopBottomRight,
    ];

    pub fn layout(self) -> Layout {
        let (size, repeat, position) = match self {
            SizeMode::Cover => ("cover", "no-repeat", "center"),
            SizeMode::Contain => ("100% 100%", "no-repeat", "center"),
            SizeMode::Repeat => ("auto", "repeat", "center"),
            SizeMode::NoopCenter => ("auto", "no-repeat", "center"),
            SizeMode::NoopLeft => ("auto", "no-repeat", "left"),
            SizeMode::NoopRight => ("auto", "no-repeat", "right"),
            SizeMode::NoopTop => ("auto", "no-repeat", "top"),
            SizeMode::NoopBottom => ("auto", "no-repeat", "bottom"),
            SizeMode::NoopTopRight => ("auto", "no-repeat", "right 30px"),
            SizeMode::NoopBottomRight => ("auto", "no-repeat", "right 96%"),
        };
        Layout {
            size,
            repeat,
            position,
        }
    }

    /// Name used in configuration files.
    pub fn config_name(self) -> &'static str {
        match self {
            SizeMode::Cover => "cover",
            SizeMode::Contain => "contain",
            SizeMode::Repeat => "repeat",
            SizeMode::NoopCenter => "noop_center",
            SizeMode::NoopLeft => "noop_left",
            SizeMode::NoopRight => "noop_right",
            SizeMode::NoopTop => "noop_top",
            SizeMode::NoopBottom => "noop_bottom",
            SizeMode::NoopTopRight => "noop_right_top",
            SizeMode::NoopBottomRight => "noop_right_bottom",
        }
    }
}

impl fmt::Display for SizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_name())
    }
}

impl FromStr for SizeMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        if let Some(mode) = SizeMode::ALL
            .iter()
            .find(|mode| mode.config_name() == normalized)
        {
            return Ok(*mode);
        }

        let suggestion = SizeMode::ALL
            .iter()
            .map(|mode| (mode.config_name(), strsim::jaro_winkler(mode.config_name(), &normalized)))
            .filter(|(_, score)| *score > 0.8)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(name, _)| name.to_string());

        Err(ValidationError::UnknownSizeMode {
            input: s.to_string(),
            suggestion,
        })
    }
}

/// Ambient color theme of the host, used to pick a default blend mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThemeKind {
    Light,
    #[default]
    Dark,
    HighContrast,
}

impl FromStr for ThemeKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(ThemeKind::Light),
            "dark" => Ok(ThemeKind::Dark),
            "high-contrast" | "high_contrast" | "hc" => Ok(ThemeKind::HighContrast),
            _ => Err(ValidationError::UnknownTheme(s.to_string())),
        }
    }
}

/// CSS `mix-blend-mode` applied to the overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlendMode(String);

impl BlendMode {
    pub fn new(mode: impl Into<String>) -> Self {
        Self(mode.into())
    }

    /// Light themes darken the image into the UI, everything else lightens.
    pub fn for_theme(theme: ThemeKind) -> Self {
        match theme {
            ThemeKind::Light => Self::new("multiply"),
            ThemeKind::Dark | ThemeKind::HighContrast => Self::new("lighten"),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BlendMode {
    fn default() -> Self {
        Self::for_theme(ThemeKind::default())
    }
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
