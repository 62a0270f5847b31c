use rand::Rng;
use thiserror::Error;

use crate::config::GridSpec;
use crate::geometry::{Region, grid_cells};
use crate::input::Input;
use crate::locator::{Locator, TemplateId};

#[derive(Debug, Error)]
pub enum ClickError {
    /// The margin eats the whole rectangle. This is bad calibration data,
    /// not a transient condition, so it is a real error rather than a miss.
    #[error("{region:?} leaves no clickable area at a {margin} margin")]
    CellTooSmall { region: Region, margin: f32 },
}

/// Locate the grid's anchor and derive its cell rectangles.
///
/// Cells are recomputed on every call; the anchor moves with the game
/// window. None means the anchor is not on screen right now.
pub fn resolve_grid<L: Locator>(
    locator: &L,
    spec: &GridSpec,
    threshold: f32,
) -> Option<Vec<Region>> {
    let anchor = locator.find_on_screen(&spec.anchor, threshold)?;

    let top_left = (anchor.left + spec.offset_x, anchor.top + spec.offset_y);
    let bottom_right = (top_left.0 + spec.width, top_left.1 + spec.height);

    match grid_cells(top_left, bottom_right, spec.rows, spec.cols) {
        Ok(cells) => {
            tracing::debug!("{}: {} cell(s) derived", spec.anchor, cells.len());
            Some(cells)
        }
        Err(e) => {
            // GridSpec construction validates shape, so this only fires on a
            // hand-built spec that bypassed it.
            tracing::error!("{}: {e}", spec.anchor);
            None
        }
    }
}

/// Scan every cell for `template`, preserving cell order. A miss in one
/// cell never stops the rest of the sweep.
pub fn scan_grid<L: Locator>(
    locator: &L,
    template: &TemplateId,
    cells: &[Region],
    threshold: f32,
) -> Vec<Option<Region>> {
    cells
        .iter()
        .map(|cell| locator.find_in_region(template, *cell, threshold))
        .collect()
}

/// Indices of cells where the template was found, ascending.
pub fn occupied_indices(scan: &[Option<Region>]) -> Vec<usize> {
    scan.iter()
        .enumerate()
        .filter_map(|(i, hit)| hit.is_some().then_some(i))
        .collect()
}

/// Indices of cells where the template was not found, ascending.
pub fn empty_indices(scan: &[Option<Region>]) -> Vec<usize> {
    scan.iter()
        .enumerate()
        .filter_map(|(i, hit)| hit.is_none().then_some(i))
        .collect()
}

/// Pair the k-th occupied source cell with the k-th empty destination cell,
/// lowest indices first. The result has `min(occupied, empty)` moves.
pub fn plan_moves(occupied: &[usize], empty: &[usize]) -> Vec<(usize, usize)> {
    occupied
        .iter()
        .zip(empty.iter())
        .map(|(&src, &dst)| (src, dst))
        .collect()
}

/// Click a uniformly random point inside `region`, keeping `margin` (a
/// fraction of each axis) away from every edge. The jitter keeps the click
/// pattern from looking scripted.
pub fn click_randomly_in<I: Input>(
    input: &I,
    region: Region,
    margin: f32,
) -> Result<(), ClickError> {
    let h_margin = (region.width as f32 * margin) as i32;
    let v_margin = (region.height as f32 * margin) as i32;

    let x_min = region.left + h_margin;
    let x_max = region.left + region.width - h_margin;
    let y_min = region.top + v_margin;
    let y_max = region.top + region.height - v_margin;

    if x_min >= x_max || y_min >= y_max {
        return Err(ClickError::CellTooSmall { region, margin });
    }

    let mut rng = rand::rng();
    let x = rng.random_range(x_min..=x_max);
    let y = rng.random_range(y_min..=y_max);

    input.click(x, y);
    tracing::debug!("clicked ({x}, {y}) inside {region:?}");
    Ok(())
}
