//! Share card renderer.
//!
//! Produces a 1200x630 PNG for one APOD entry: the entry's picture
//! center-cropped to fill the canvas, a dark scrim, title/date/caption
//! text, a QR code for the permalink and a footer line. The background
//! picture and the fonts are optional; without them the card is still
//! produced on a solid background. Only QR, rasterization and PNG
//! encoding failures surface as `RenderError`.

use crate::clients::HttpClient;
use crate::domain::{ApodItem, MediaType};
use crate::errors::RenderError;
use crate::utils::{escape_xml, truncate_chars};
use chrono::NaiveDate;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use qrcodegen::{QrCode, QrCodeEcc};
use resvg::tiny_skia::{Color, IntSize, Pixmap, Transform};
use resvg::usvg::{fontdb::Database, Options, Tree};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const CARD_WIDTH: u32 = 1200;
pub const CARD_HEIGHT: u32 = 630;
pub const CAPTION_MAX_CHARS: usize = 220;

const MARGIN: u32 = 36;
const QR_SIZE: u32 = 160;
const QR_BORDER: i32 = 2;
const CAPTION_LINE_CHARS: usize = 66;
const BACKGROUND: (u8, u8, u8) = (10, 15, 26);
const SCRIM_OPACITY: f32 = 80.0 / 255.0;
const FOOTER: &str = "APOD (NASA) | apod-gallery";
const PREFERRED_FAMILIES: [&str; 3] = ["DejaVu Sans", "Liberation Sans", "Noto Sans"];

/// Rendered card, ready to download
#[derive(Debug, Clone)]
pub struct ShareCard {
    pub date: NaiveDate,
    pub png: Vec<u8>,
}

impl ShareCard {
    pub const MIME: &'static str = "image/png";

    pub fn file_name(&self) -> String {
        format!("apod_{}.png", self.date.format("%Y-%m-%d"))
    }
}

/// Font faces available to the card text
pub struct CardFonts {
    db: Arc<Database>,
    family: Option<String>,
}

impl CardFonts {
    /// Load preferred faces from `font_dir`, falling back to system fonts.
    /// With no usable faces at all the card is drawn without text.
    pub fn load(font_dir: Option<&Path>) -> Self {
        let mut db = Database::new();
        if let Some(dir) = font_dir {
            db.load_fonts_dir(dir);
            if db.is_empty() {
                warn!("no fonts found in {}, using system fonts", dir.display());
            }
        }
        if db.is_empty() {
            db.load_system_fonts();
        }
        debug!("Loaded {} font faces for share cards", db.len());
        Self::from_database(db)
    }

    pub fn from_database(db: Database) -> Self {
        let family = preferred_family(&db);
        if family.is_none() {
            warn!("no font faces available, share cards will carry no text");
        }
        Self {
            db: Arc::new(db),
            family,
        }
    }

    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }
}

fn preferred_family(db: &Database) -> Option<String> {
    let names: Vec<&str> = db
        .faces()
        .flat_map(|face| face.families.iter().map(|(name, _)| name.as_str()))
        .collect();
    PREFERRED_FAMILIES
        .iter()
        .copied()
        .find(|p| names.contains(p))
        .or_else(|| names.first().copied())
        .map(str::to_string)
}

/// Region of the source picture that is scaled onto the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropPlan {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// Largest centered region of the source with the canvas aspect ratio.
/// Scaling it to the canvas covers both sides, like scale-then-crop, but
/// never materializes an oversized intermediate.
pub fn cover_crop(src_width: u32, src_height: u32) -> CropPlan {
    let (w, h) = (u64::from(src_width.max(1)), u64::from(src_height.max(1)));
    let (cw, ch) = (u64::from(CARD_WIDTH), u64::from(CARD_HEIGHT));

    let (width, height) = if w * ch > h * cw {
        (((h * cw + ch / 2) / ch).clamp(1, w), h)
    } else {
        (w, ((w * ch + cw / 2) / cw).clamp(1, h))
    };

    CropPlan {
        left: ((w - width) / 2) as u32,
        top: ((h - height) / 2) as u32,
        width: width as u32,
        height: height as u32,
    }
}

/// Decode `bytes` and fit them to the canvas; `None` if undecodable
pub fn fit_background(bytes: &[u8]) -> Option<RgbaImage> {
    let src = match image::load_from_memory(bytes) {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            warn!("share card background could not be decoded: {}", e);
            return None;
        }
    };
    let plan = cover_crop(src.width(), src.height());
    let region = imageops::crop_imm(&src, plan.left, plan.top, plan.width, plan.height).to_image();
    Some(imageops::resize(&region, CARD_WIDTH, CARD_HEIGHT, FilterType::Lanczos3))
}

/// Caption as drawn on the card
pub fn card_caption(explanation: &str) -> String {
    truncate_chars(explanation, CAPTION_MAX_CHARS)
}

fn wrap_words(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        let needed = if line.is_empty() { 0 } else { 1 } + word.chars().count();
        if !line.is_empty() && line.chars().count() + needed > width {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// QR modules for `permalink` as one SVG path inside a `QR_SIZE` square
pub fn qr_path(permalink: &str, x0: f32, y0: f32) -> Result<String, RenderError> {
    let qr = QrCode::encode_text(permalink, QrCodeEcc::Medium)
        .map_err(|e| RenderError::Qr(e.to_string()))?;
    let modules = qr.size() + QR_BORDER * 2;
    let cell = QR_SIZE as f32 / modules as f32;

    let mut d = String::new();
    for y in 0..qr.size() {
        for x in 0..qr.size() {
            if qr.get_module(x, y) {
                let px = x0 + (x + QR_BORDER) as f32 * cell;
                let py = y0 + (y + QR_BORDER) as f32 * cell;
                d.push_str(&format!("M{:.2} {:.2}h{:.2}v{:.2}h-{:.2}z", px, py, cell, cell, cell));
            }
        }
    }
    Ok(d)
}

fn text_element(x: u32, y: u32, size: u32, fill: &str, bold: bool, family: &str, text: &str) -> String {
    format!(
        r#"<text x="{x}" y="{baseline}" font-family="{family}" font-size="{size}"{weight} fill="{fill}">{body}</text>"#,
        baseline = y + size,
        weight = if bold { r#" font-weight="bold""# } else { "" },
        body = escape_xml(text),
    )
}

/// Overlay markup: scrim, text and QR code. Transparent elsewhere.
pub fn card_svg(item: &ApodItem, permalink: &str, family: Option<&str>) -> Result<String, RenderError> {
    let family = escape_xml(&match family {
        Some(f) => format!("{}, DejaVu Sans, sans-serif", f),
        None => "DejaVu Sans, sans-serif".to_string(),
    });
    let title = if item.title.trim().is_empty() {
        "Astronomy Picture of the Day"
    } else {
        item.title.as_str()
    };

    let mut body = String::new();
    body.push_str(&format!(
        r##"<rect x="0" y="0" width="{CARD_WIDTH}" height="{CARD_HEIGHT}" fill="#000000" fill-opacity="{SCRIM_OPACITY:.3}"/>"##
    ));
    body.push_str(&text_element(MARGIN, 30, 42, "#FFFFFF", true, &family, title));
    body.push_str(&text_element(
        MARGIN,
        92,
        26,
        "#C8D2E6",
        false,
        &family,
        &item.date.format("%Y-%m-%d").to_string(),
    ));
    for (i, line) in wrap_words(&card_caption(&item.explanation), CAPTION_LINE_CHARS)
        .iter()
        .enumerate()
    {
        body.push_str(&text_element(MARGIN, 140 + i as u32 * 32, 26, "#E6EBF5", false, &family, line));
    }

    let qr_x = CARD_WIDTH - MARGIN - QR_SIZE;
    let qr_y = CARD_HEIGHT - MARGIN - QR_SIZE;
    body.push_str(&format!(
        r##"<rect x="{qr_x}" y="{qr_y}" width="{QR_SIZE}" height="{QR_SIZE}" fill="#000000"/>"##
    ));
    body.push_str(&format!(
        r##"<path d="{}" fill="#FFFFFF" shape-rendering="crispEdges"/>"##,
        qr_path(permalink, qr_x as f32, qr_y as f32)?
    ));
    body.push_str(&text_element(MARGIN, CARD_HEIGHT - 48, 22, "#D2DCF0", false, &family, FOOTER));

    Ok(format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{CARD_WIDTH}" height="{CARD_HEIGHT}" viewBox="0 0 {CARD_WIDTH} {CARD_HEIGHT}">{body}</svg>"#
    ))
}

/// Compose the card over `background` (solid fill when absent) and encode PNG
pub fn compose_card(
    background: Option<&RgbaImage>,
    item: &ApodItem,
    permalink: &str,
    fonts: &CardFonts,
) -> Result<Vec<u8>, RenderError> {
    let mut pixmap = match background {
        Some(img) if img.dimensions() == (CARD_WIDTH, CARD_HEIGHT) => {
            let size = IntSize::from_wh(CARD_WIDTH, CARD_HEIGHT).ok_or(RenderError::Canvas)?;
            // Pixmaps hold premultiplied alpha
            let mut data = img.as_raw().clone();
            for px in data.chunks_exact_mut(4) {
                let a = u16::from(px[3]);
                for c in &mut px[..3] {
                    *c = ((u16::from(*c) * a + 127) / 255) as u8;
                }
            }
            Pixmap::from_vec(data, size).ok_or(RenderError::Canvas)?
        }
        _ => {
            let mut blank = Pixmap::new(CARD_WIDTH, CARD_HEIGHT).ok_or(RenderError::Canvas)?;
            let (r, g, b) = BACKGROUND;
            blank.fill(Color::from_rgba8(r, g, b, 255));
            blank
        }
    };

    let svg = card_svg(item, permalink, fonts.family())?;
    let mut options = Options::default();
    if let Some(family) = fonts.family() {
        options.font_family = family.to_string();
    }
    options.fontdb = fonts.db.clone();
    let tree = Tree::from_str(&svg, &options).map_err(|e| RenderError::Svg(e.to_string()))?;

    resvg::render(&tree, Transform::default(), &mut pixmap.as_mut());

    pixmap
        .encode_png()
        .map_err(|e| RenderError::Encode(e.to_string()))
}

/// Share card builder: downloads the background and composes off the runtime
pub struct ShareCardRenderer {
    http_client: HttpClient,
    timeout: Duration,
    fonts: Arc<CardFonts>,
}

impl ShareCardRenderer {
    pub fn new(http_client: HttpClient, timeout: Duration, fonts: CardFonts) -> Self {
        Self {
            http_client,
            timeout,
            fonts: Arc::new(fonts),
        }
    }

    pub async fn build(&self, item: &ApodItem, permalink: &str) -> Result<ShareCard, RenderError> {
        let image_bytes = match background_url(item) {
            Some(url) => self.fetch_image(url).await,
            None => None,
        };

        let fonts = self.fonts.clone();
        let owned_item = item.clone();
        let permalink = permalink.to_string();
        let png = tokio::task::spawn_blocking(move || {
            let background = image_bytes.as_deref().and_then(fit_background);
            compose_card(background.as_ref(), &owned_item, &permalink, &fonts)
        })
        .await
        .map_err(|e| RenderError::Task(e.to_string()))??;

        Ok(ShareCard {
            date: item.date,
            png,
        })
    }

    async fn fetch_image(&self, url: &str) -> Option<Vec<u8>> {
        match self.http_client.get_bytes(url, self.timeout).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(url, "share card background unavailable: {}", e);
                None
            }
        }
    }
}

/// Videos link to a player page, so their thumbnail is the only picture
fn background_url(item: &ApodItem) -> Option<&str> {
    match item.media_type {
        MediaType::Video => item.thumbnail_url.as_deref().filter(|u| !u.is_empty()),
        _ => item.best_image_url(),
    }
}
