use crate::matcher::MatchInfo;
use crate::util::ensure_parent_dir;
use anyhow::{Context, Result};
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgba, RgbaImage};
use std::path::Path;

const BEST_COLOR: Rgba<u8> = Rgba([40, 200, 90, 255]);
const OTHER_COLOR: Rgba<u8> = Rgba([255, 150, 30, 255]);
const LABEL_BG: Rgba<u8> = Rgba([0, 0, 0, 170]);
const LABEL_FG: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Boxes and score labels for the top `limit` candidates, best first.
pub fn annotate_candidates(frame: &RgbaImage, info: &MatchInfo, limit: usize) -> RgbaImage {
    let mut img = frame.clone();
    let scale = if img.width() >= 1600 { 2 } else { 1 };

    // weaker candidates first so the best box is painted last
    for (rank, cand) in info.all_matches.iter().take(limit).enumerate().rev() {
        let color = if rank == 0 { BEST_COLOR } else { OTHER_COLOR };
        let left = i64::from(cand.x) - i64::from(cand.width / 2);
        let top = i64::from(cand.y) - i64::from(cand.height / 2);
        outline_box(&mut img, left, top, cand.width, cand.height, color, 2 * scale);

        let label = format!("#{} {:.3}", rank + 1, cand.score);
        let (label_w, label_h) = label_size(&label, scale);
        let label_left = left.max(0);
        let label_top = (top - i64::from(label_h) - 2).max(0);
        if let Some(bg) = Span::clip(&img, label_left - 2, label_top - 1, label_w + 3, label_h + 1) {
            bg.for_each(|x, y| blend_onto(&mut img, x, y, LABEL_BG));
        }
        stamp_text(&mut img, label_left, label_top, &label, LABEL_FG, scale);
    }
    img
}

pub fn save_annotated(path: &Path, frame: &RgbaImage, info: &MatchInfo, limit: usize) -> Result<()> {
    ensure_parent_dir(path)?;
    annotate_candidates(frame, info, limit)
        .save(path)
        .with_context(|| format!("failed to write annotated frame: {}", path.display()))
}

/// Inclusive pixel bounds, clipped to an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    left: u32,
    top: u32,
    right: u32,
    bottom: u32,
}

impl Span {
    fn clip(img: &RgbaImage, x: i64, y: i64, w: u32, h: u32) -> Option<Self> {
        let (iw, ih) = (i64::from(img.width()), i64::from(img.height()));
        let (x_end, y_end) = (x + i64::from(w), y + i64::from(h));
        if w == 0 || h == 0 || x_end <= 0 || y_end <= 0 || x >= iw || y >= ih {
            return None;
        }
        Some(Self {
            left: x.max(0) as u32,
            top: y.max(0) as u32,
            right: (x_end.min(iw) - 1) as u32,
            bottom: (y_end.min(ih) - 1) as u32,
        })
    }

    fn inset(self, by: u32) -> Option<Self> {
        let shrunk = Self {
            left: self.left + by,
            top: self.top + by,
            right: self.right.checked_sub(by)?,
            bottom: self.bottom.checked_sub(by)?,
        };
        (shrunk.left <= shrunk.right && shrunk.top <= shrunk.bottom).then_some(shrunk)
    }

    fn for_each(self, mut f: impl FnMut(u32, u32)) {
        for y in self.top..=self.bottom {
            for x in self.left..=self.right {
                f(x, y);
            }
        }
    }
}

/// Rings drawn inside the box so edge pixels of the match stay visible.
fn outline_box(img: &mut RgbaImage, x: i64, y: i64, w: u32, h: u32, color: Rgba<u8>, thickness: u32) {
    let Some(outer) = Span::clip(img, x, y, w, h) else {
        return;
    };
    for ring in (0..thickness.max(1)).filter_map(|t| outer.inset(t)) {
        for x in ring.left..=ring.right {
            img.put_pixel(x, ring.top, color);
            img.put_pixel(x, ring.bottom, color);
        }
        for y in ring.top..=ring.bottom {
            img.put_pixel(ring.left, y, color);
            img.put_pixel(ring.right, y, color);
        }
    }
}

/// Source-over compositing with integer alpha.
fn blend_onto(img: &mut RgbaImage, x: u32, y: u32, src: Rgba<u8>) {
    let alpha = u32::from(src[3]);
    let dst = img.get_pixel_mut(x, y);
    for c in 0..3 {
        let mixed = u32::from(dst[c]) * (255 - alpha) + u32::from(src[c]) * alpha;
        dst[c] = ((mixed + 127) / 255) as u8;
    }
    dst[3] = dst[3].max(src[3]);
}

fn label_size(text: &str, scale: u32) -> (u32, u32) {
    let cell = 8 * scale.max(1);
    (text.chars().count() as u32 * cell, cell)
}

/// 8x8 bitmap glyphs, each lit bit drawn as a `scale`-sized square.
fn stamp_text(img: &mut RgbaImage, x: i64, y: i64, text: &str, color: Rgba<u8>, scale: u32) {
    let scale = scale.max(1);
    let cell = i64::from(8 * scale);
    for (index, ch) in text.chars().enumerate() {
        let Some(glyph) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) else {
            continue;
        };
        let origin_x = x + index as i64 * cell;
        for (row, bits) in glyph.iter().enumerate() {
            for col in (0..8i64).filter(|col| (*bits >> col) & 1 == 1) {
                let px = origin_x + col * i64::from(scale);
                let py = y + row as i64 * i64::from(scale);
                if let Some(dot) = Span::clip(img, px, py, scale, scale) {
                    dot.for_each(|dx, dy| blend_onto(img, dx, dy, color));
                }
            }
        }
    }
}
