//! Document rendering: compile a template once, render one PDF per candidate.
//!
//! Rendering sits behind the [`DocumentRenderer`] seam so callers can plug in
//! another engine through [`crate::config::GenerationConfigBuilder::renderer`].
//! The built-in [`PdfRenderer`] reads a JSON layout and draws it with
//! printpdf.
//!
//! ## Why spawn_blocking?
//!
//! Layout parsing, image decoding and PDF serialisation are all CPU-bound.
//! [`compile_template`] and the per-candidate work in [`crate::generate`]
//! run on tokio's blocking pool so the worker threads never stall.
//!
//! ## Layout format
//!
//! ```json
//! {
//!   "page":   { "width_mm": 297, "height_mm": 210 },
//!   "fonts":  { "Script": "fonts/GreatVibes.ttf" },
//!   "texts":  [ { "text": "{salutation} {candidateName}", "x_mm": 40, "y_mm": 110,
//!                 "size": 24, "font": "Script", "wrap_chars": 40, "max_lines": 2 } ],
//!   "images": [ { "param": "imgParamBG", "x_mm": 0, "y_mm": 0,
//!                 "width_mm": 297, "height_mm": 210 } ]
//! }
//! ```
//!
//! Coordinates are millimetres from the bottom-left corner. `{field}`
//! placeholders name candidate fields; `param` names an image slot.

use crate::candidate::FIELD_NAMES;
use crate::config::{Markup, RenderOptions};
use crate::error::{CertBatchError, RenderError};
use crate::pipeline::binding::is_slot_param;
use crate::template::TemplateDescriptor;
use once_cell::sync::Lazy;
use printpdf::{
    BuiltinFont, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference,
    PdfLayerReference,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Everything one render needs. Owned so it can cross into `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct RenderJob {
    /// Single-row data source: field name → value.
    pub fields: BTreeMap<String, String>,
    /// Image slot parameter → file.
    pub images: BTreeMap<String, PathBuf>,
    pub options: RenderOptions,
    /// Where the document must be written.
    pub output_path: PathBuf,
}

/// A rendered file awaiting packaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub identifier: String,
    pub name: String,
    pub path: PathBuf,
}

/// Turns a template descriptor into something that can render.
pub trait DocumentRenderer: Send + Sync {
    /// Compile once per batch. An error here aborts the batch before any
    /// candidate is rendered.
    fn compile(&self, template: &TemplateDescriptor) -> Result<Box<dyn CompiledTemplate>, CertBatchError>;
}

/// A compiled template, shared across concurrent renders.
pub trait CompiledTemplate: Send + Sync {
    fn render(&self, job: &RenderJob) -> Result<(), RenderError>;
}

/// Compile `template` on the blocking pool.
pub async fn compile_template(
    renderer: Arc<dyn DocumentRenderer>,
    template: &TemplateDescriptor,
) -> Result<Arc<dyn CompiledTemplate>, CertBatchError> {
    let template = template.clone();
    let compiled = tokio::task::spawn_blocking(move || renderer.compile(&template))
        .await
        .map_err(|e| CertBatchError::Internal(format!("Compile task panicked: {}", e)))??;
    Ok(Arc::from(compiled))
}

// ── Layout ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layout {
    pub page: PageSize,
    /// Font name → TrueType file, relative to the layout file.
    #[serde(default)]
    pub fonts: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub texts: Vec<TextElement>,
    #[serde(default)]
    pub images: Vec<ImageElement>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PageSize {
    pub width_mm: f32,
    pub height_mm: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextElement {
    pub text: String,
    pub x_mm: f32,
    pub y_mm: f32,
    #[serde(default = "default_font_size")]
    pub size: f32,
    #[serde(default)]
    pub font: Option<String>,
    /// Distance between wrapped lines. Defaults to 1.2 × the font size.
    #[serde(default)]
    pub line_height_mm: Option<f32>,
    #[serde(default)]
    pub wrap_chars: Option<usize>,
    #[serde(default)]
    pub max_lines: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageElement {
    pub param: String,
    pub x_mm: f32,
    pub y_mm: f32,
    pub width_mm: f32,
    pub height_mm: f32,
}

fn default_font_size() -> f32 {
    12.0
}

static RE_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").unwrap());
static RE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

const BUILTIN_FONTS: [(&str, BuiltinFont); 8] = [
    ("Helvetica", BuiltinFont::Helvetica),
    ("Helvetica-Bold", BuiltinFont::HelveticaBold),
    ("Helvetica-Oblique", BuiltinFont::HelveticaOblique),
    ("Times-Roman", BuiltinFont::TimesRoman),
    ("Times-Bold", BuiltinFont::TimesBold),
    ("Times-Italic", BuiltinFont::TimesItalic),
    ("Courier", BuiltinFont::Courier),
    ("Courier-Bold", BuiltinFont::CourierBold),
];

fn builtin_font(name: &str) -> Option<BuiltinFont> {
    BUILTIN_FONTS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, f)| *f)
}

const MM_PER_PT: f32 = 25.4 / 72.0;
const IMAGE_DPI: f32 = 300.0;

// ── Built-in engine ──────────────────────────────────────────────────────

/// The default renderer: JSON layout → PDF via printpdf.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfRenderer;

impl DocumentRenderer for PdfRenderer {
    fn compile(&self, template: &TemplateDescriptor) -> Result<Box<dyn CompiledTemplate>, CertBatchError> {
        let fail = |detail: String| CertBatchError::TemplateCompile {
            template: template.name.clone(),
            detail,
        };

        let raw = std::fs::read_to_string(&template.definition_path).map_err(|e| {
            fail(format!(
                "cannot read '{}': {}",
                template.definition_path.display(),
                e
            ))
        })?;
        let mut layout: Layout =
            serde_json::from_str(&raw).map_err(|e| fail(format!("invalid layout: {}", e)))?;

        let base = template
            .definition_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        validate_layout(&mut layout, &base).map_err(fail)?;

        info!(
            "Compiled template '{}' ({} texts, {} images)",
            template.name,
            layout.texts.len(),
            layout.images.len()
        );
        Ok(Box::new(CompiledLayout {
            title: template.name.clone(),
            layout,
        }))
    }
}

/// Reject anything a render could not honour, and resolve font paths.
fn validate_layout(layout: &mut Layout, base: &Path) -> Result<(), String> {
    if !(layout.page.width_mm > 0.0 && layout.page.height_mm > 0.0) {
        return Err("page width and height must be positive".into());
    }

    for path in layout.fonts.values_mut() {
        if path.is_relative() {
            *path = base.join(&*path);
        }
    }

    for t in &layout.texts {
        for cap in RE_PLACEHOLDER.captures_iter(&t.text) {
            let field = &cap[1];
            if !FIELD_NAMES.contains(&field) {
                return Err(format!("unknown placeholder {{{}}}", field));
            }
        }
        if let Some(font) = &t.font {
            if builtin_font(font).is_none() && !layout.fonts.contains_key(font) {
                return Err(format!("unknown font '{}'", font));
            }
        }
        if t.wrap_chars == Some(0) {
            return Err("wrap_chars must be at least 1".into());
        }
    }

    for img in &layout.images {
        if !is_slot_param(&img.param) {
            return Err(format!("unknown image slot '{}'", img.param));
        }
        if !(img.width_mm > 0.0 && img.height_mm > 0.0) {
            return Err(format!("image slot '{}' needs a positive size", img.param));
        }
    }
    Ok(())
}

struct CompiledLayout {
    title: String,
    layout: Layout,
}

impl CompiledTemplate for CompiledLayout {
    fn render(&self, job: &RenderJob) -> Result<(), RenderError> {
        let page = self.layout.page;
        let (doc, page1, layer1) = PdfDocument::new(
            &self.title,
            Mm(page.width_mm),
            Mm(page.height_mm),
            "Layer 1",
        );
        let layer = doc.get_page(page1).get_layer(layer1);

        // Images first so text lands on top of the background.
        for img in &self.layout.images {
            let Some(path) = job.images.get(&img.param) else {
                continue;
            };
            place_image(&layer, img, path)?;
        }

        let fonts = FontSet::load(&doc, &self.layout, &job.options)?;
        for t in &self.layout.texts {
            let font = fonts.get(t.font.as_deref());
            let text = substitute(&t.text, &job.fields);
            let lines = layout_lines(&text, t, &job.options);
            let step = t.line_height_mm.unwrap_or(t.size * 1.2 * MM_PER_PT);
            for (i, line) in lines.iter().enumerate() {
                let y = t.y_mm - step * i as f32;
                layer.use_text(line.as_str(), t.size, Mm(t.x_mm), Mm(y), font);
            }
        }

        save(doc, &job.output_path)
    }
}

/// Fonts for one document, keyed by layout name.
struct FontSet {
    default: IndirectFontRef,
    named: HashMap<String, IndirectFontRef>,
}

impl FontSet {
    fn load(doc: &PdfDocumentReference, layout: &Layout, options: &RenderOptions) -> Result<Self, RenderError> {
        let default_builtin = builtin_font(&options.default_font).unwrap_or(BuiltinFont::Helvetica);
        let default = doc
            .add_builtin_font(default_builtin)
            .map_err(|e| RenderError::Font(e.to_string()))?;

        let mut named = HashMap::new();
        for t in &layout.texts {
            let Some(name) = t.font.as_deref() else {
                continue;
            };
            if named.contains_key(name) {
                continue;
            }
            let font = if let Some(b) = builtin_font(name) {
                doc.add_builtin_font(b)
                    .map_err(|e| RenderError::Font(e.to_string()))?
            } else if let (true, Some(path)) = (options.embed_fonts, layout.fonts.get(name)) {
                let file = File::open(path)
                    .map_err(|e| RenderError::Font(format!("{}: {}", path.display(), e)))?;
                doc.add_external_font(file)
                    .map_err(|e| RenderError::Font(format!("{}: {}", path.display(), e)))?
            } else {
                debug!("Font '{}' not embedded; using default", name);
                default.clone()
            };
            named.insert(name.to_string(), font);
        }
        Ok(Self { default, named })
    }

    fn get(&self, name: Option<&str>) -> &IndirectFontRef {
        name.and_then(|n| self.named.get(n)).unwrap_or(&self.default)
    }
}

fn place_image(layer: &PdfLayerReference, el: &ImageElement, path: &Path) -> Result<(), RenderError> {
    let slot_err = |detail: String| RenderError::Image {
        slot: el.param.clone(),
        detail,
    };

    let decoded = printpdf::image_crate::open(path)
        .map_err(|e| slot_err(format!("{}: {}", path.display(), e)))?;
    let (w_px, h_px) = (decoded.width() as f32, decoded.height() as f32);
    if w_px == 0.0 || h_px == 0.0 {
        return Err(slot_err(format!("{}: empty image", path.display())));
    }

    // Natural size at IMAGE_DPI, scaled to fill the element box.
    let natural_w_mm = w_px / IMAGE_DPI * 25.4;
    let natural_h_mm = h_px / IMAGE_DPI * 25.4;

    Image::from_dynamic_image(&decoded).add_to_layer(
        layer.clone(),
        ImageTransform {
            translate_x: Some(Mm(el.x_mm)),
            translate_y: Some(Mm(el.y_mm)),
            scale_x: Some(el.width_mm / natural_w_mm),
            scale_y: Some(el.height_mm / natural_h_mm),
            dpi: Some(IMAGE_DPI),
            ..Default::default()
        },
    );
    Ok(())
}

fn save(doc: PdfDocumentReference, path: &Path) -> Result<(), RenderError> {
    let write_err = |source: std::io::Error| RenderError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    let file = File::create(path).map_err(write_err)?;
    let mut buf = BufWriter::new(file);
    doc.save(&mut buf)
        .map_err(|e| RenderError::Other(format!("PDF save error: {e}")))?;
    buf.flush().map_err(write_err)
}

// ── Text helpers ─────────────────────────────────────────────────────────

/// Replace `{field}` placeholders with values; unknown fields become empty.
pub fn substitute(text: &str, fields: &BTreeMap<String, String>) -> String {
    RE_PLACEHOLDER
        .replace_all(text, |caps: &regex::Captures| {
            fields.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// `<br>` becomes a newline, other tags are dropped, common entities decoded.
pub fn strip_markup(text: &str) -> String {
    let with_breaks = RE_BREAK.replace_all(text, "\n");
    RE_TAG
        .replace_all(&with_breaks, "")
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

/// Split text into the lines drawn for one element.
fn layout_lines(text: &str, el: &TextElement, options: &RenderOptions) -> Vec<String> {
    let text = match options.markup {
        Markup::Html => strip_markup(text),
        Markup::None => text.to_string(),
    };

    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        match (options.force_line_breaks, el.wrap_chars) {
            (true, Some(width)) => lines.extend(wrap_text(paragraph, width)),
            _ => lines.push(paragraph.trim().to_string()),
        }
    }

    if options.truncate_text {
        if let Some(max) = el.max_lines {
            lines.truncate(max);
        }
    }
    lines
}

/// Greedy word wrap; words longer than `max_chars` are split.
pub fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > max_chars {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = word.split_off(max_chars);
            lines.push(word.into_iter().collect());
            word = rest;
        }

        if current_len + word.len() + 1 > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current_len += word.len();
        current.extend(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tier;

    fn element(text: &str, wrap: Option<usize>, max_lines: Option<usize>) -> TextElement {
        TextElement {
            text: text.into(),
            x_mm: 10.0,
            y_mm: 100.0,
            size: 12.0,
            font: None,
            line_height_mm: None,
            wrap_chars: wrap,
            max_lines,
        }
    }

    fn write_layout(dir: &Path, json: &str) -> TemplateDescriptor {
        let path = dir.join("layout.json");
        std::fs::write(&path, json).unwrap();
        TemplateDescriptor {
            id: 1,
            name: "Test".into(),
            tier: Tier::NoImages,
            definition_path: path,
            static_image_dir: None,
        }
    }

    #[test]
    fn substitute_fills_known_fields() {
        let mut fields = BTreeMap::new();
        fields.insert("candidateName".to_string(), "Alice".to_string());
        assert_eq!(
            substitute("Awarded to {candidateName} ({sid})", &fields),
            "Awarded to Alice ()"
        );
    }

    #[test]
    fn markup_breaks_and_tags() {
        assert_eq!(strip_markup("<b>Alice</b><br/>K &amp; Co"), "Alice\nK & Co");
        assert_eq!(strip_markup("a<BR>b"), "a\nb");
    }

    #[test]
    fn wrap_is_greedy_and_splits_long_words() {
        assert_eq!(wrap_text("one two three", 7), vec!["one two", "three"]);
        assert_eq!(wrap_text("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(wrap_text("", 10), vec![""]);
    }

    #[test]
    fn text_is_kept_whole_unless_truncation_enabled() {
        let el = element("aa bb cc dd", Some(2), Some(2));
        let mut opts = RenderOptions::default();
        assert_eq!(layout_lines("aa bb cc dd", &el, &opts).len(), 4);

        opts.truncate_text = true;
        assert_eq!(layout_lines("aa bb cc dd", &el, &opts), vec!["aa", "bb"]);

        opts.truncate_text = false;
        opts.force_line_breaks = false;
        assert_eq!(layout_lines("aa bb cc dd", &el, &opts), vec!["aa bb cc dd"]);
    }

    #[test]
    fn compile_rejects_unknown_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let t = write_layout(
            dir.path(),
            r#"{"page": {"width_mm": 297, "height_mm": 210},
                "texts": [{"text": "{nickname}", "x_mm": 1, "y_mm": 1}]}"#,
        );
        let err = PdfRenderer.compile(&t).err().unwrap();
        assert!(matches!(err, CertBatchError::TemplateCompile { .. }));
        assert!(err.to_string().contains("nickname"));
    }

    #[test]
    fn compile_rejects_unknown_slot_and_font() {
        let dir = tempfile::tempdir().unwrap();
        let t = write_layout(
            dir.path(),
            r#"{"page": {"width_mm": 100, "height_mm": 100},
                "images": [{"param": "imgParam99", "x_mm": 0, "y_mm": 0, "width_mm": 1, "height_mm": 1}]}"#,
        );
        assert!(PdfRenderer.compile(&t).is_err());

        let t = write_layout(
            dir.path(),
            r#"{"page": {"width_mm": 100, "height_mm": 100},
                "texts": [{"text": "x", "x_mm": 1, "y_mm": 1, "font": "Comic"}]}"#,
        );
        assert!(PdfRenderer.compile(&t).is_err());
    }

    #[test]
    fn render_writes_a_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let t = write_layout(
            dir.path(),
            r#"{"page": {"width_mm": 297, "height_mm": 210},
                "texts": [{"text": "Certificate for {candidateName}", "x_mm": 20, "y_mm": 120,
                           "size": 20, "font": "Helvetica-Bold", "wrap_chars": 30}],
                "images": [{"param": "imgParam3", "x_mm": 230, "y_mm": 140,
                            "width_mm": 40, "height_mm": 50}]}"#,
        );
        let compiled = PdfRenderer.compile(&t).unwrap();

        let out = dir.path().join("rendered/0/S1_Alice.pdf");
        let mut fields = BTreeMap::new();
        fields.insert("candidateName".to_string(), "<b>Alice</b>".to_string());
        let job = RenderJob {
            fields,
            images: BTreeMap::new(),
            options: RenderOptions::default(),
            output_path: out.clone(),
        };
        compiled.render(&job).unwrap();

        let bytes = std::fs::read(&out).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn unreadable_image_is_a_slot_error() {
        let dir = tempfile::tempdir().unwrap();
        let t = write_layout(
            dir.path(),
            r#"{"page": {"width_mm": 100, "height_mm": 100},
                "images": [{"param": "imgParamBG", "x_mm": 0, "y_mm": 0, "width_mm": 100, "height_mm": 100}]}"#,
        );
        let compiled = PdfRenderer.compile(&t).unwrap();
        let bogus = dir.path().join("bg.png");
        std::fs::write(&bogus, b"not a png").unwrap();

        let mut images = BTreeMap::new();
        images.insert("imgParamBG".to_string(), bogus);
        let job = RenderJob {
            fields: BTreeMap::new(),
            images,
            options: RenderOptions::default(),
            output_path: dir.path().join("out.pdf"),
        };
        let err = compiled.render(&job).unwrap_err();
        assert!(matches!(err, RenderError::Image { .. }));
    }
}
