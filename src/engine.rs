use anyhow::Result;
use tokio::time::sleep;

use crate::config::{GridSpec, ScrollSpec, Tuning};
use crate::geometry::Region;
use crate::grid::{
    click_randomly_in, empty_indices, occupied_indices, plan_moves, resolve_grid, scan_grid,
};
use crate::input::Input;
use crate::locator::{Locator, TemplateId};
use crate::retry::CancelToken;
use crate::scroll::ScrollNavigator;

/// Moves items between two on-screen grids by clicking source and
/// destination cells in turn.
///
/// Grids and scans are recomputed every round; nothing spatial survives an
/// input action, because each click can shift what the client displays.
pub struct Transfer<'a, L, I> {
    locator: &'a L,
    input: &'a I,
    scroll: ScrollNavigator<'a, L, I>,
    tuning: &'a Tuning,
    cancel: &'a CancelToken,
}

impl<'a, L: Locator, I: Input> Transfer<'a, L, I> {
    pub fn new(
        locator: &'a L,
        input: &'a I,
        scroll_spec: &'a ScrollSpec,
        tuning: &'a Tuning,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            locator,
            input,
            scroll: ScrollNavigator::new(locator, input, scroll_spec, tuning, cancel),
            tuning,
            cancel,
        }
    }

    /// Fill every empty cell of `destination` with items from `source`.
    ///
    /// Returns `true` once the destination scan shows no empty cell. `false`
    /// covers a vanished grid anchor, cancellation, and genuine source
    /// exhaustion (the scroll search came up dry); callers that need to
    /// tell cancellation apart inspect the token afterwards.
    pub async fn fill_destination(
        &self,
        source: &GridSpec,
        destination: &GridSpec,
        item: &TemplateId,
    ) -> Result<bool> {
        let threshold = self.tuning.match_threshold;

        for round in 0..self.tuning.max_rounds {
            if self.cancel.is_cancelled() {
                tracing::info!("transfer cancelled");
                return Ok(false);
            }

            let Some(dst_cells) = resolve_grid(self.locator, destination, threshold) else {
                tracing::warn!("{}: destination anchor not found", destination.anchor);
                return Ok(false);
            };
            let dst_scan = scan_grid(self.locator, item, &dst_cells, threshold);
            let empty = empty_indices(&dst_scan);
            if empty.is_empty() {
                tracing::info!("destination full after {round} round(s)");
                return Ok(true);
            }

            let Some(src_cells) = resolve_grid(self.locator, source, threshold) else {
                tracing::warn!("{}: source anchor not found", source.anchor);
                return Ok(false);
            };
            let src_scan = scan_grid(self.locator, item, &src_cells, threshold);
            let occupied = occupied_indices(&src_scan);

            if occupied.is_empty() {
                tracing::info!("source shows no {item}, searching by scrolling");
                if self.scroll.find_by_scrolling(item, source).await? {
                    continue;
                }
                tracing::info!(
                    "source exhausted with {} destination cell(s) still empty",
                    empty.len()
                );
                return Ok(false);
            }

            let moves = plan_moves(&occupied, &empty);
            tracing::info!("round {round}: moving {} item(s)", moves.len());
            for (src_idx, dst_idx) in moves {
                if self.cancel.is_cancelled() {
                    tracing::info!("transfer cancelled mid-round");
                    return Ok(false);
                }
                self.click_cell(src_cells[src_idx]).await?;
                if self.cancel.is_cancelled() {
                    tracing::info!("transfer cancelled mid-move");
                    return Ok(false);
                }
                self.click_cell(dst_cells[dst_idx]).await?;
            }
        }

        tracing::warn!(
            "transfer did not settle within {} round(s)",
            self.tuning.max_rounds
        );
        Ok(false)
    }

    async fn click_cell(&self, cell: Region) -> Result<()> {
        click_randomly_in(self.input, cell, self.tuning.click_margin)?;
        sleep(self.tuning.settle).await;
        Ok(())
    }
}
