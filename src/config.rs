//! Configuration types for batch certificate generation.
//!
//! All batch behaviour is controlled through [`GenerationConfig`], built via
//! its [`GenerationConfigBuilder`]. Collaborators that carry state (template
//! and report repositories, the acting user) are passed separately in
//! [`crate::generate::BatchServices`]; the config only holds knobs and
//! optional overrides.

use crate::error::{CertBatchError, UploadRole};
use crate::pipeline::render::DocumentRenderer;
use crate::progress::ProgressCallback;
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for one certificate batch.
///
/// Built via [`GenerationConfig::builder()`] or using
/// [`GenerationConfig::default()`].
///
/// # Example
/// ```rust
/// use certbatch::GenerationConfig;
///
/// let config = GenerationConfig::builder()
///     .concurrency(4)
///     .required_sheet_name("Candidate Data")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct GenerationConfig {
    /// Number of candidates rendered at once. Default: 4.
    ///
    /// Rendering is CPU-bound and runs on tokio's blocking pool, so values
    /// far above the core count only add memory pressure.
    pub concurrency: usize,

    /// Pipeline-wide static image folder, bound after the template's own
    /// static images. Default: None.
    pub base_static_dir: Option<PathBuf>,

    /// When set, the first sheet must carry exactly this name. Default: None.
    pub required_sheet_name: Option<String>,

    /// `chrono` format used for date-formatted cells. Default: `%d-%m-%Y`.
    pub date_format: String,

    /// Upper bound on numbered static image slots. Default: 15.
    pub max_sequential_slots: usize,

    /// Fixed options every render receives.
    pub render: RenderOptions,

    /// Renderer override. If None, the built-in PDF renderer is used.
    pub renderer: Option<Arc<dyn DocumentRenderer>>,

    /// Optional per-candidate progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            base_static_dir: None,
            required_sheet_name: None,
            date_format: "%d-%m-%Y".to_string(),
            max_sequential_slots: 15,
            render: RenderOptions::default(),
            renderer: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("concurrency", &self.concurrency)
            .field("base_static_dir", &self.base_static_dir)
            .field("required_sheet_name", &self.required_sheet_name)
            .field("date_format", &self.date_format)
            .field("max_sequential_slots", &self.max_sequential_slots)
            .field("render", &self.render)
            .field(
                "renderer",
                &self.renderer.as_ref().map(|_| "<dyn DocumentRenderer>"),
            )
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn GenerationProgressCallback>"),
            )
            .finish()
    }
}

impl GenerationConfig {
    /// Create a new builder for `GenerationConfig`.
    pub fn builder() -> GenerationConfigBuilder {
        GenerationConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`GenerationConfig`].
#[derive(Debug)]
pub struct GenerationConfigBuilder {
    config: GenerationConfig,
}

impl GenerationConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn base_static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.base_static_dir = Some(dir.into());
        self
    }

    pub fn required_sheet_name(mut self, name: impl Into<String>) -> Self {
        self.config.required_sheet_name = Some(name.into());
        self
    }

    pub fn date_format(mut self, fmt: impl Into<String>) -> Self {
        self.config.date_format = fmt.into();
        self
    }

    pub fn max_sequential_slots(mut self, n: usize) -> Self {
        self.config.max_sequential_slots = n.min(15);
        self
    }

    pub fn render_options(mut self, options: RenderOptions) -> Self {
        self.config.render = options;
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.config.renderer = Some(renderer);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<GenerationConfig, CertBatchError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(CertBatchError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.date_format.trim().is_empty() {
            return Err(CertBatchError::InvalidConfig(
                "Date format must not be empty".into(),
            ));
        }
        if StrftimeItems::new(&c.date_format).any(|i| matches!(i, Item::Error)) {
            return Err(CertBatchError::InvalidConfig(format!(
                "Date format '{}' is not a valid strftime pattern",
                c.date_format
            )));
        }
        if let Some(name) = &c.required_sheet_name {
            if name.trim().is_empty() {
                return Err(CertBatchError::InvalidConfig(
                    "Required sheet name must not be blank".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which auxiliary images a template needs, stored as the integer 0–3.
///
/// Each tier includes every requirement of the tiers below it:
///
/// | Tier | Variant | Required uploads |
/// |------|---------|------------------|
/// | 0 | `NoImages` | none (static images only) |
/// | 1 | `PhotoOnly` | photo archive |
/// | 2 | `PhotoAndLogo` | photo archive, logo |
/// | 3 | `PhotoLogoSignature` | photo archive, logo, signature |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Tier {
    #[default]
    NoImages,
    PhotoOnly,
    PhotoAndLogo,
    PhotoLogoSignature,
}

impl Tier {
    pub fn level(self) -> u8 {
        match self {
            Tier::NoImages => 0,
            Tier::PhotoOnly => 1,
            Tier::PhotoAndLogo => 2,
            Tier::PhotoLogoSignature => 3,
        }
    }

    /// Uploads this tier cannot render without, in validation order.
    pub fn required_uploads(self) -> &'static [UploadRole] {
        match self {
            Tier::NoImages => &[],
            Tier::PhotoOnly => &[UploadRole::PhotoArchive],
            Tier::PhotoAndLogo => &[UploadRole::PhotoArchive, UploadRole::Logo],
            Tier::PhotoLogoSignature => &[
                UploadRole::PhotoArchive,
                UploadRole::Logo,
                UploadRole::Signature,
            ],
        }
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Tier::NoImages),
            1 => Ok(Tier::PhotoOnly),
            2 => Ok(Tier::PhotoAndLogo),
            3 => Ok(Tier::PhotoLogoSignature),
            other => Err(format!("image tier must be 0–3, got {other}")),
        }
    }
}

impl From<Tier> for u8 {
    fn from(t: Tier) -> u8 {
        t.level()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

/// How text values are treated before layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Markup {
    /// Values are laid out verbatim.
    None,
    /// Values may carry simple HTML (`<b>`, `<br>`); tags are passed through
    /// the layout step, `<br>` becomes a line break. (default)
    #[default]
    Html,
}

/// Fixed rendering options applied to every candidate of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Locale tag handed to the renderer's data source. Default: `en`.
    pub locale: String,
    /// Builtin font family used when a text element names none. Default: Helvetica.
    pub default_font: String,
    /// Embed font programs in the output. Default: true.
    pub embed_fonts: bool,
    /// Markup handling for field values. Default: [`Markup::Html`].
    pub markup: Markup,
    /// Break lines at element wrap widths even mid-phrase. Default: true.
    pub force_line_breaks: bool,
    /// Allow cutting text at an element's `max_lines`. Default: false.
    pub truncate_text: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            locale: "en".to_string(),
            default_font: "Helvetica".to_string(),
            embed_fonts: true,
            markup: Markup::Html,
            force_line_breaks: true,
            truncate_text: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_from_integer() {
        assert_eq!(Tier::try_from(0), Ok(Tier::NoImages));
        assert_eq!(Tier::try_from(3), Ok(Tier::PhotoLogoSignature));
        assert!(Tier::try_from(4).is_err());
    }

    #[test]
    fn tier_requirements_are_cumulative() {
        assert!(Tier::NoImages.required_uploads().is_empty());
        assert_eq!(Tier::PhotoOnly.required_uploads(), &[UploadRole::PhotoArchive]);
        assert_eq!(Tier::PhotoLogoSignature.required_uploads().len(), 3);
        assert!(Tier::PhotoAndLogo < Tier::PhotoLogoSignature);
    }

    #[test]
    fn tier_serialises_as_integer() {
        let json = serde_json::to_string(&Tier::PhotoAndLogo).unwrap();
        assert_eq!(json, "2");
        let back: Tier = serde_json::from_str("1").unwrap();
        assert_eq!(back, Tier::PhotoOnly);
        assert!(serde_json::from_str::<Tier>("9").is_err());
    }

    #[test]
    fn builder_clamps_and_validates() {
        let c = GenerationConfig::builder()
            .concurrency(0)
            .max_sequential_slots(40)
            .build()
            .unwrap();
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.max_sequential_slots, 15);

        let err = GenerationConfig::builder().date_format(" ").build();
        assert!(err.is_err());
        let err = GenerationConfig::builder().date_format("%Q-%m").build();
        assert!(err.is_err());
        assert!(GenerationConfig::builder().date_format("%Y/%m/%d").build().is_ok());
    }

    #[test]
    fn debug_hides_trait_objects() {
        let dbg = format!("{:?}", GenerationConfig::default());
        assert!(dbg.contains("concurrency"));
        assert!(dbg.contains("renderer: None"));
    }
}
