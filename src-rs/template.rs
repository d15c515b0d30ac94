//! Normalized cross-correlation template matching.
//!
//! Scores follow the mean-subtracted, normalized correlation (`TM_CCOEFF_NORMED`)
//! over all three colour channels: per-channel means are removed from both the
//! template and the screen window, the products are summed across channels, and
//! the result is divided by the product of the two norms. Window sums come from
//! integral images so only the numerator costs `O(template area)` per position.

use image::RgbImage;
use std::collections::HashSet;

const CHANNELS: usize = 3;
const MIN_COARSE_SIDE: u32 = 8;
const EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy)]
pub struct MatcherConfig {
    /// Largest power-of-two downscale used for the coarse pass; 1 (the
    /// default) scores every position at full resolution.
    pub max_downscale: u32,
    /// Coarse positions scoring at least `threshold - coarse_slack` are refined.
    pub coarse_slack: f32,
    /// The best coarse positions are always refined, whatever their score.
    pub coarse_top_k: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            max_downscale: 1,
            coarse_slack: 0.25,
            coarse_top_k: 8,
        }
    }
}

/// Top-left corner of a template placement and its score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub x: u32,
    pub y: u32,
    pub score: f32,
}

struct Planes {
    width: usize,
    height: usize,
    channels: [Vec<f32>; CHANNELS],
}

impl Planes {
    fn from_rgb(img: &RgbImage) -> Self {
        let (w, h) = img.dimensions();
        let len = (w as usize) * (h as usize);
        let mut channels: [Vec<f32>; CHANNELS] = std::array::from_fn(|_| Vec::with_capacity(len));
        for pixel in img.pixels() {
            for (c, plane) in channels.iter_mut().enumerate() {
                plane.push(pixel.0[c] as f32);
            }
        }
        Self {
            width: w as usize,
            height: h as usize,
            channels,
        }
    }

    /// Box-filter average over `factor x factor` blocks; trailing rows and
    /// columns that do not fill a block are dropped.
    fn downscale(&self, factor: usize) -> Self {
        let width = self.width / factor;
        let height = self.height / factor;
        let area = (factor * factor) as f32;
        let channels = std::array::from_fn(|c| {
            let src = &self.channels[c];
            let mut out = Vec::with_capacity(width * height);
            for by in 0..height {
                for bx in 0..width {
                    let mut sum = 0.0f32;
                    for dy in 0..factor {
                        let row = (by * factor + dy) * self.width + bx * factor;
                        sum += src[row..row + factor].iter().sum::<f32>();
                    }
                    out.push(sum / area);
                }
            }
            out
        });
        Self {
            width,
            height,
            channels,
        }
    }
}

struct Integral {
    stride: usize,
    sums: [Vec<f64>; CHANNELS],
    squares: Vec<f64>,
}

impl Integral {
    fn new(planes: &Planes) -> Self {
        let stride = planes.width + 1;
        let len = stride * (planes.height + 1);
        let mut sums: [Vec<f64>; CHANNELS] = std::array::from_fn(|_| vec![0.0; len]);
        let mut squares = vec![0.0; len];
        for y in 0..planes.height {
            let mut row_sq = 0.0f64;
            let mut row_sum = [0.0f64; CHANNELS];
            for x in 0..planes.width {
                let src = y * planes.width + x;
                let dst = (y + 1) * stride + x + 1;
                for c in 0..CHANNELS {
                    let v = planes.channels[c][src] as f64;
                    row_sum[c] += v;
                    row_sq += v * v;
                    sums[c][dst] = sums[c][dst - stride] + row_sum[c];
                }
                squares[dst] = squares[dst - stride] + row_sq;
            }
        }
        Self {
            stride,
            sums,
            squares,
        }
    }

    fn rect(table: &[f64], stride: usize, x: usize, y: usize, w: usize, h: usize) -> f64 {
        let a = y * stride + x;
        let b = y * stride + x + w;
        let c = (y + h) * stride + x;
        let d = (y + h) * stride + x + w;
        table[d] - table[b] - table[c] + table[a]
    }
}

struct PreparedTemplate {
    width: usize,
    height: usize,
    centered: [Vec<f32>; CHANNELS],
    norm_sq: f64,
}

impl PreparedTemplate {
    fn new(planes: &Planes) -> Self {
        let n = (planes.width * planes.height) as f64;
        let mut norm_sq = 0.0f64;
        let centered = std::array::from_fn(|c| {
            let plane = &planes.channels[c];
            let mean = plane.iter().map(|&v| v as f64).sum::<f64>() / n;
            plane
                .iter()
                .map(|&v| {
                    let d = v as f64 - mean;
                    norm_sq += d * d;
                    d as f32
                })
                .collect()
        });
        Self {
            width: planes.width,
            height: planes.height,
            centered,
            norm_sq,
        }
    }
}

struct Scorer<'a> {
    screen: &'a Planes,
    integral: Integral,
    template: PreparedTemplate,
}

impl<'a> Scorer<'a> {
    fn new(screen: &'a Planes, template: &Planes) -> Self {
        Self {
            screen,
            integral: Integral::new(screen),
            template: PreparedTemplate::new(template),
        }
    }

    fn max_x(&self) -> usize {
        self.screen.width - self.template.width
    }

    fn max_y(&self) -> usize {
        self.screen.height - self.template.height
    }

    fn score(&self, x: usize, y: usize) -> f32 {
        let (tw, th) = (self.template.width, self.template.height);
        let n = (tw * th) as f64;
        let stride = self.integral.stride;

        let mut window_var = Integral::rect(&self.integral.squares, stride, x, y, tw, th);
        for c in 0..CHANNELS {
            let s = Integral::rect(&self.integral.sums[c], stride, x, y, tw, th);
            window_var -= s * s / n;
        }
        let denom = (self.template.norm_sq * window_var.max(0.0)).sqrt();
        if denom < EPSILON {
            return 0.0;
        }

        let mut num = 0.0f64;
        for c in 0..CHANNELS {
            let plane = &self.screen.channels[c];
            let tpl = &self.template.centered[c];
            for v in 0..th {
                let row = (y + v) * self.screen.width + x;
                let window = &plane[row..row + tw];
                let trow = &tpl[v * tw..(v + 1) * tw];
                num += window
                    .iter()
                    .zip(trow)
                    .map(|(&a, &b)| (a * b) as f64)
                    .sum::<f64>();
            }
        }
        (num / denom).clamp(-1.0, 1.0) as f32
    }
}

fn pick_downscale(template: &RgbImage, max_downscale: u32) -> u32 {
    let min_side = template.width().min(template.height());
    let mut scale = 1;
    while scale * 2 <= max_downscale && min_side / (scale * 2) >= MIN_COARSE_SIDE {
        scale *= 2;
    }
    scale
}

/// Every placement of `template` inside `screen` whose score reaches `threshold`.
///
/// With `max_downscale > 1`, larger templates go through a coarse pass on a
/// downscaled copy first and only the neighbourhoods of promising coarse
/// positions are scored at full resolution. A coarse pass that yields nothing
/// falls back to the exhaustive scan, so enabling it never loses a match.
pub fn match_template(
    screen: &RgbImage,
    template: &RgbImage,
    threshold: f32,
    config: &MatcherConfig,
) -> Vec<Hit> {
    let (sw, sh) = screen.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > sw || th > sh {
        return Vec::new();
    }

    let screen_planes = Planes::from_rgb(screen);
    let template_planes = Planes::from_rgb(template);
    let full = Scorer::new(&screen_planes, &template_planes);

    let scale = pick_downscale(template, config.max_downscale.max(1));
    if scale == 1 {
        return exhaustive(&full, threshold);
    }

    let factor = scale as usize;
    let coarse_screen = screen_planes.downscale(factor);
    let coarse_template = template_planes.downscale(factor);
    if coarse_template.width > coarse_screen.width || coarse_template.height > coarse_screen.height
    {
        return exhaustive(&full, threshold);
    }
    let coarse = Scorer::new(&coarse_screen, &coarse_template);

    let mut coarse_hits = Vec::with_capacity((coarse.max_x() + 1) * (coarse.max_y() + 1));
    for y in 0..=coarse.max_y() {
        for x in 0..=coarse.max_x() {
            coarse_hits.push((coarse.score(x, y), x, y));
        }
    }
    coarse_hits.sort_by(|a, b| b.0.total_cmp(&a.0));

    let seed_floor = threshold - config.coarse_slack;
    let seeds = coarse_hits
        .iter()
        .enumerate()
        .take_while(|(rank, (score, _, _))| *rank < config.coarse_top_k || *score >= seed_floor)
        .map(|(_, &(_, x, y))| (x * factor, y * factor));

    let mut visited: HashSet<(usize, usize)> = HashSet::new();
    let mut hits = Vec::new();
    for (fx, fy) in seeds {
        let x0 = fx.saturating_sub(factor);
        let y0 = fy.saturating_sub(factor);
        let x1 = (fx + factor).min(full.max_x());
        let y1 = (fy + factor).min(full.max_y());
        for y in y0..=y1 {
            for x in x0..=x1 {
                if !visited.insert((x, y)) {
                    continue;
                }
                let score = full.score(x, y);
                if score >= threshold {
                    hits.push(Hit {
                        x: x as u32,
                        y: y as u32,
                        score,
                    });
                }
            }
        }
    }
    if hits.is_empty() {
        return exhaustive(&full, threshold);
    }
    hits.sort_by(|a, b| (a.y, a.x).cmp(&(b.y, b.x)));
    hits
}

fn exhaustive(scorer: &Scorer<'_>, threshold: f32) -> Vec<Hit> {
    let mut hits = Vec::new();
    for y in 0..=scorer.max_y() {
        for x in 0..=scorer.max_x() {
            let score = scorer.score(x, y);
            if score >= threshold {
                hits.push(Hit {
                    x: x as u32,
                    y: y as u32,
                    score,
                });
            }
        }
    }
    hits
}
