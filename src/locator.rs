use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use image::GrayImage;
use imageproc::template_matching::{MatchTemplateMethod, match_template};

use crate::geometry::Region;

/// Name of a reference image in the asset set (the file stem, e.g. "post").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateId(String);

impl TemplateId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// On-screen template lookup.
///
/// Implementations are treated as read-only queries; nothing is cached on
/// the caller side because the screen can change between any two calls.
pub trait Locator {
    /// Best match anywhere on screen above `threshold`, or None.
    fn find_on_screen(&self, template: &TemplateId, threshold: f32) -> Option<Region>;

    /// Best match within `region` (clamped to the screen) above `threshold`.
    fn find_in_region(&self, template: &TemplateId, region: Region, threshold: f32)
    -> Option<Region>;

    /// Pixel dimensions of the template image.
    fn dimensions(&self, template: &TemplateId) -> Option<(u32, u32)>;
}

/// Best correlation position of `needle` inside `haystack`.
#[derive(Debug, Clone, Copy)]
pub struct Match {
    pub x: u32,
    pub y: u32,
    pub score: f32,
}

/// Normalized cross-correlation sweep, returning the single best position.
/// Returns None when the needle does not fit inside the haystack.
pub fn best_match(haystack: &GrayImage, needle: &GrayImage) -> Option<Match> {
    if needle.width() > haystack.width() || needle.height() > haystack.height() {
        return None;
    }

    let scores = match_template(
        haystack,
        needle,
        MatchTemplateMethod::CrossCorrelationNormalized,
    );

    let mut best: Option<Match> = None;
    for (x, y, pixel) in scores.enumerate_pixels() {
        let score = pixel.0[0];
        if !score.is_finite() {
            continue;
        }
        if best.is_none_or(|b| score > b.score) {
            best = Some(Match { x, y, score });
        }
    }

    best
}

/// `Locator` backed by live screen captures.
///
/// Template images are loaded once at startup and matched in grayscale; the
/// screen is re-captured for every query.
pub struct ScreenLocator {
    templates: HashMap<TemplateId, GrayImage>,
}

impl ScreenLocator {
    /// Load every `*.png` in `assets_dir` as a template keyed by file stem.
    pub fn load(assets_dir: &Path) -> Result<Self> {
        let mut templates = HashMap::new();

        let entries = std::fs::read_dir(assets_dir)
            .with_context(|| format!("failed to read assets dir {}", assets_dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("png") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let img = image::open(&path)
                .with_context(|| format!("failed to decode {}", path.display()))?;
            tracing::debug!("loaded template {} ({}x{})", stem, img.width(), img.height());
            templates.insert(TemplateId::new(stem), img.to_luma8());
        }

        if templates.is_empty() {
            anyhow::bail!("no template images found in {}", assets_dir.display());
        }

        tracing::info!("loaded {} template image(s)", templates.len());
        Ok(Self { templates })
    }

    /// Capture the primary monitor as grayscale, with its screen origin.
    fn capture_screen() -> Option<(GrayImage, i32, i32)> {
        let monitors = match xcap::Monitor::all() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("monitor enumeration failed: {e}");
                return None;
            }
        };

        let monitor = monitors
            .iter()
            .find(|m| m.is_primary().unwrap_or(false))
            .or_else(|| monitors.first())?;

        let origin_x = monitor.x().ok()?;
        let origin_y = monitor.y().ok()?;

        let capture = match monitor.capture_image() {
            Ok(img) => img,
            Err(e) => {
                tracing::warn!("screen capture failed: {e}");
                return None;
            }
        };

        // Convert through raw RGBA bytes rather than image-type conversions,
        // so the capture backend's pixel buffer version doesn't matter.
        let (width, height) = (capture.width(), capture.height());
        let rgba = capture.into_raw();
        let mut luma = Vec::with_capacity((width * height) as usize);
        for px in rgba.chunks_exact(4) {
            let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
            luma.push(((299 * r + 587 * g + 114 * b) / 1000) as u8);
        }

        let gray = GrayImage::from_raw(width, height, luma)?;
        Some((gray, origin_x, origin_y))
    }

    /// Search `region` of the captured `screen` (screen coordinates, origin at
    /// `(origin_x, origin_y)`). The region is clamped to the capture bounds;
    /// a region that leaves less room than the needle yields None.
    fn locate_in_capture(
        &self,
        template: &TemplateId,
        screen: &GrayImage,
        origin: (i32, i32),
        region: Region,
        threshold: f32,
    ) -> Option<Region> {
        let needle = self.templates.get(template)?;

        let screen_w = screen.width() as i32;
        let screen_h = screen.height() as i32;

        // Clamp to the capture; the grid math can produce regions that poke
        // past the screen edge when the game window sits near a border.
        let left = (region.left - origin.0).max(0);
        let top = (region.top - origin.1).max(0);
        let right = (region.left - origin.0 + region.width).min(screen_w);
        let bottom = (region.top - origin.1 + region.height).min(screen_h);

        let width = right - left;
        let height = bottom - top;
        if width < needle.width() as i32 || height < needle.height() as i32 {
            tracing::debug!(
                "search region for {template} clamps to {width}x{height}, smaller than the template"
            );
            return None;
        }

        let view = image::imageops::crop_imm(screen, left as u32, top as u32, width as u32, height as u32)
            .to_image();

        let m = best_match(&view, needle)?;
        if m.score < threshold {
            return None;
        }

        Some(Region::new(
            origin.0 + left + m.x as i32,
            origin.1 + top + m.y as i32,
            needle.width() as i32,
            needle.height() as i32,
        ))
    }
}

impl Locator for ScreenLocator {
    fn find_on_screen(&self, template: &TemplateId, threshold: f32) -> Option<Region> {
        let (screen, ox, oy) = Self::capture_screen()?;
        let full = Region::new(ox, oy, screen.width() as i32, screen.height() as i32);
        self.locate_in_capture(template, &screen, (ox, oy), full, threshold)
    }

    fn find_in_region(
        &self,
        template: &TemplateId,
        region: Region,
        threshold: f32,
    ) -> Option<Region> {
        let (screen, ox, oy) = Self::capture_screen()?;
        self.locate_in_capture(template, &screen, (ox, oy), region, threshold)
    }

    fn dimensions(&self, template: &TemplateId) -> Option<(u32, u32)> {
        self.templates
            .get(template)
            .map(|img| (img.width(), img.height()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_screen(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            image::Luma([((x * 7 + y * 13) % 97) as u8])
        })
    }

    fn stamp(img: &mut GrayImage, x: u32, y: u32, w: u32, h: u32, value: u8) {
        for dy in 0..h {
            for dx in 0..w {
                img.put_pixel(x + dx, y + dy, image::Luma([value]));
            }
        }
    }

    fn solid(w: u32, h: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(w, h, image::Luma([value]))
    }

    fn locator_with(name: &str, needle: GrayImage) -> ScreenLocator {
        let mut templates = HashMap::new();
        templates.insert(TemplateId::new(name), needle);
        ScreenLocator { templates }
    }

    #[test]
    fn test_best_match_finds_stamp() {
        let mut screen = gradient_screen(64, 64);
        stamp(&mut screen, 20, 12, 8, 8, 255);
        let m = best_match(&screen, &solid(8, 8, 255)).unwrap();
        assert_eq!((m.x, m.y), (20, 12));
        assert!(m.score > 0.99, "score {}", m.score);
    }

    #[test]
    fn test_best_match_rejects_oversized_needle() {
        let screen = gradient_screen(16, 16);
        assert!(best_match(&screen, &solid(32, 32, 255)).is_none());
    }

    #[test]
    fn test_locate_in_capture_offsets_to_screen_coords() {
        let mut screen = gradient_screen(64, 64);
        stamp(&mut screen, 30, 40, 8, 8, 255);
        let locator = locator_with("item", solid(8, 8, 255));

        // Monitor origin at (100, 200): stamp sits at screen (130, 240).
        let region = Region::new(120, 230, 30, 30);
        let found = locator
            .locate_in_capture(&TemplateId::new("item"), &screen, (100, 200), region, 0.99)
            .unwrap();
        assert_eq!(found, Region::new(130, 240, 8, 8));
    }

    #[test]
    fn test_locate_in_capture_misses_outside_region() {
        let mut screen = gradient_screen(64, 64);
        stamp(&mut screen, 30, 40, 8, 8, 255);
        let locator = locator_with("item", solid(8, 8, 255));

        let region = Region::new(0, 0, 20, 20);
        assert!(
            locator
                .locate_in_capture(&TemplateId::new("item"), &screen, (0, 0), region, 0.99)
                .is_none()
        );
    }

    #[test]
    fn test_locate_in_capture_clamps_region() {
        let mut screen = gradient_screen(64, 64);
        stamp(&mut screen, 0, 0, 8, 8, 255);
        let locator = locator_with("item", solid(8, 8, 255));

        // Region starts off-screen; the clamped part still contains the stamp.
        let region = Region::new(-20, -20, 40, 40);
        let found = locator
            .locate_in_capture(&TemplateId::new("item"), &screen, (0, 0), region, 0.99)
            .unwrap();
        assert_eq!(found, Region::new(0, 0, 8, 8));
    }

    #[test]
    fn test_locate_in_capture_region_smaller_than_needle() {
        let screen = gradient_screen(64, 64);
        let locator = locator_with("item", solid(8, 8, 255));
        let region = Region::new(60, 60, 40, 40); // clamps to 4x4
        assert!(
            locator
                .locate_in_capture(&TemplateId::new("item"), &screen, (0, 0), region, 0.5)
                .is_none()
        );
    }

    #[test]
    fn test_threshold_filters_weak_matches() {
        let screen = gradient_screen(64, 64); // no stamp anywhere
        let locator = locator_with("item", solid(8, 8, 255));
        let full = Region::new(0, 0, 64, 64);
        assert!(
            locator
                .locate_in_capture(&TemplateId::new("item"), &screen, (0, 0), full, 0.995)
                .is_none()
        );
    }
}
