//! PNG leaderboard renderer.
//!
//! Draws with tiny-skia, sets text with ab_glyph using the bundled DejaVu Sans
//! face, and encodes with `image`. Layout: a title band, the total country
//! count and refresh time, then one row per leaderboard entry (rank block,
//! bar whose length is relative to the top entry, name and formatted GDP).

use std::path::Path;

use ab_glyph::{point, Font, FontRef, GlyphId, PxScale, ScaleFont};
use image::{ImageFormat, RgbaImage};
use tiny_skia::{Color, Paint, Pixmap, PremultipliedColorU8, Rect, Transform};
use tracing::info;

use super::{format_gdp, RefreshSummary, SummaryRenderer};
use crate::error::{AppError, Result};

pub const IMAGE_WIDTH: u32 = 800;
pub const IMAGE_HEIGHT: u32 = 450;

static FONT_DATA: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

const MARGIN: f32 = 30.0;
const HEADER_HEIGHT: f32 = 64.0;
const ACCENT_HEIGHT: f32 = 4.0;
const INFO_TOP: f32 = 82.0;
const LINE_PITCH: f32 = 24.0;
const SUBTITLE_TOP: f32 = 138.0;
const BAR_TOP: f32 = 176.0;
const BAR_HEIGHT: f32 = 40.0;
const BAR_PITCH: f32 = 52.0;
const RANK_BLOCK: f32 = 40.0;
const LABEL_PAD: f32 = 10.0;

const TITLE_SIZE: f32 = 28.0;
const SUBTITLE_SIZE: f32 = 20.0;
const BODY_SIZE: f32 = 16.0;

const BACKGROUND: (u8, u8, u8) = (0x0d, 0x11, 0x17);
const HEADER: (u8, u8, u8) = (0x16, 0x1b, 0x22);
const ACCENT: (u8, u8, u8) = (0x58, 0xa6, 0xff);
const TRACK: (u8, u8, u8) = (0x21, 0x26, 0x2d);
const MUTED: (u8, u8, u8) = (0x8b, 0x94, 0x9e);
const TEXT: (u8, u8, u8) = (0xc9, 0xd1, 0xd9);
const LABEL: (u8, u8, u8) = (0xf0, 0xf6, 0xfc);

/// Bar colours by rank, best first.
const RANK_COLORS: [(u8, u8, u8); 5] = [
    (0x58, 0xa6, 0xff),
    (0x3f, 0xb9, 0x50),
    (0xd2, 0x99, 0x22),
    (0xdb, 0x6d, 0x28),
    (0xa3, 0x71, 0xf7),
];

#[derive(Debug, Clone, Copy)]
pub struct PngRenderer {
    width: u32,
    height: u32,
}

impl Default for PngRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PngRenderer {
    pub fn new() -> Self {
        Self {
            width: IMAGE_WIDTH,
            height: IMAGE_HEIGHT,
        }
    }

    fn draw(&self, summary: &RefreshSummary) -> Result<Pixmap> {
        let font = FontRef::try_from_slice(FONT_DATA)
            .map_err(|e| AppError::SummaryGeneration(format!("bundled font unreadable: {e}")))?;
        let mut pixmap = Pixmap::new(self.width, self.height)
            .ok_or_else(|| AppError::SummaryGeneration("invalid canvas size".to_string()))?;
        pixmap.fill(rgb(BACKGROUND));

        let w = self.width as f32;

        fill(&mut pixmap, 0.0, 0.0, w, HEADER_HEIGHT, HEADER);
        fill(&mut pixmap, 0.0, HEADER_HEIGHT, w, ACCENT_HEIGHT, ACCENT);
        let title_top = (HEADER_HEIGHT - TITLE_SIZE) / 2.0;
        draw_text(&mut pixmap, &font, "Countries by Estimated GDP", MARGIN, title_top, TITLE_SIZE, ACCENT);

        let total = format!("Total Countries: {}", summary.total_countries);
        draw_text(&mut pixmap, &font, &total, MARGIN, INFO_TOP, BODY_SIZE, TEXT);
        let refreshed = format!(
            "Last Refresh Time: {}",
            summary.refreshed_at.format("%a, %d %b %Y %H:%M:%S GMT")
        );
        draw_text(&mut pixmap, &font, &refreshed, MARGIN, INFO_TOP + LINE_PITCH, BODY_SIZE, TEXT);

        let subtitle = format!("Top {} Countries by Estimated GDP", summary.top.len());
        draw_text(&mut pixmap, &font, &subtitle, MARGIN, SUBTITLE_TOP, SUBTITLE_SIZE, MUTED);

        let track_x = MARGIN + RANK_BLOCK + 12.0;
        let track_w = w - track_x - MARGIN;
        let max_gdp = summary
            .top
            .iter()
            .filter_map(|e| e.estimated_gdp)
            .fold(0.0_f64, f64::max);
        let label_top = (BAR_HEIGHT - BODY_SIZE) / 2.0 - 2.0;

        for (i, entry) in summary.top.iter().enumerate() {
            let y = BAR_TOP + i as f32 * BAR_PITCH;
            let color = RANK_COLORS[i % RANK_COLORS.len()];

            fill(&mut pixmap, MARGIN, y, RANK_BLOCK, BAR_HEIGHT, color);
            fill(&mut pixmap, track_x, y, track_w, BAR_HEIGHT, TRACK);

            if let Some(gdp) = entry.estimated_gdp.filter(|g| *g > 0.0 && max_gdp > 0.0) {
                let len = ((gdp / max_gdp) as f32 * track_w).max(2.0);
                fill(&mut pixmap, track_x, y, len, BAR_HEIGHT, color);
            }

            let rank = entry.rank.to_string();
            let rank_x = MARGIN + (RANK_BLOCK - text_width(&font, &rank, BODY_SIZE)) / 2.0;
            draw_text(&mut pixmap, &font, &rank, rank_x, y + label_top, BODY_SIZE, BACKGROUND);

            let gdp = format_gdp(entry.estimated_gdp);
            let gdp_w = text_width(&font, &gdp, BODY_SIZE);
            let gdp_x = track_x + track_w - LABEL_PAD - gdp_w;
            draw_text(&mut pixmap, &font, &gdp, gdp_x, y + label_top, BODY_SIZE, LABEL);

            let name_room = gdp_x - (track_x + LABEL_PAD) - 2.0 * LABEL_PAD;
            let name = fit_text(&font, &entry.name, BODY_SIZE, name_room);
            draw_text(&mut pixmap, &font, &name, track_x + LABEL_PAD, y + label_top, BODY_SIZE, LABEL);
        }

        Ok(pixmap)
    }
}

impl SummaryRenderer for PngRenderer {
    fn render(&self, summary: &RefreshSummary, path: &Path) -> Result<()> {
        let pixmap = self.draw(summary)?;

        // Every pixel is opaque, so premultiplied data is already straight RGBA.
        let img = RgbaImage::from_raw(self.width, self.height, pixmap.data().to_vec())
            .ok_or_else(|| AppError::SummaryGeneration("pixel buffer size mismatch".to_string()))?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        // Write beside the target and rename so readers never see a partial file.
        let tmp = path.with_extension("png.tmp");
        img.save_with_format(&tmp, ImageFormat::Png)
            .map_err(|e| AppError::SummaryGeneration(format!("PNG encode failed: {e}")))?;
        std::fs::rename(&tmp, path)?;

        info!(path = %path.display(), entries = summary.top.len(), "Summary image saved");
        Ok(())
    }
}

fn rgb((r, g, b): (u8, u8, u8)) -> Color {
    Color::from_rgba8(r, g, b, 255)
}

fn fill(pixmap: &mut Pixmap, x: f32, y: f32, w: f32, h: f32, color: (u8, u8, u8)) {
    let Some(rect) = Rect::from_xywh(x, y, w, h) else {
        return;
    };
    let mut paint = Paint::default();
    paint.set_color(rgb(color));
    paint.anti_alias = true;
    pixmap.fill_rect(rect, &paint, Transform::identity(), None);
}

/// Horizontal advance of `text` at `size`, kerning included.
fn text_width(font: &FontRef<'_>, text: &str, size: f32) -> f32 {
    let scaled = font.as_scaled(PxScale::from(size));
    let mut width = 0.0;
    let mut prev: Option<GlyphId> = None;
    for c in text.chars() {
        let id = scaled.glyph_id(c);
        if let Some(p) = prev {
            width += scaled.kern(p, id);
        }
        width += scaled.h_advance(id);
        prev = Some(id);
    }
    width
}

/// `text` unchanged if it fits in `max_width`, otherwise cut with an ellipsis.
fn fit_text(font: &FontRef<'_>, text: &str, size: f32, max_width: f32) -> String {
    if text_width(font, text, size) <= max_width {
        return text.to_string();
    }
    let mut cut = text.to_string();
    while cut.pop().is_some() {
        let candidate = format!("{}…", cut.trim_end());
        if text_width(font, &candidate, size) <= max_width {
            return candidate;
        }
    }
    "…".to_string()
}

/// Draw `text` with its top edge at `top`. Glyph coverage is blended over the
/// existing (opaque) pixels.
fn draw_text(
    pixmap: &mut Pixmap,
    font: &FontRef<'_>,
    text: &str,
    x: f32,
    top: f32,
    size: f32,
    color: (u8, u8, u8),
) {
    let scaled = font.as_scaled(PxScale::from(size));
    let mut caret = point(x, top + scaled.ascent());
    let mut prev: Option<GlyphId> = None;

    for c in text.chars() {
        let id = scaled.glyph_id(c);
        if let Some(p) = prev {
            caret.x += scaled.kern(p, id);
        }
        let glyph = id.with_scale_and_position(scaled.scale(), caret);
        caret.x += scaled.h_advance(id);
        prev = Some(id);

        if let Some(outlined) = font.outline_glyph(glyph) {
            let bounds = outlined.px_bounds();
            outlined.draw(|gx, gy, coverage| {
                let px = bounds.min.x as i32 + gx as i32;
                let py = bounds.min.y as i32 + gy as i32;
                blend(pixmap, px, py, color, coverage);
            });
        }
    }
}

fn blend(pixmap: &mut Pixmap, x: i32, y: i32, (r, g, b): (u8, u8, u8), coverage: f32) {
    let (w, h) = (pixmap.width() as i32, pixmap.height() as i32);
    if x < 0 || y < 0 || x >= w || y >= h {
        return;
    }
    let idx = (y * w + x) as usize;
    let a = coverage.clamp(0.0, 1.0);
    let dst = pixmap.pixels()[idx];
    let mix = |d: u8, s: u8| (f32::from(d) + (f32::from(s) - f32::from(d)) * a).round() as u8;
    if let Some(px) = PremultipliedColorU8::from_rgba(mix(dst.red(), r), mix(dst.green(), g), mix(dst.blue(), b), 255) {
        pixmap.pixels_mut()[idx] = px;
    }
}
