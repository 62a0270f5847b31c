use anyhow::Result;
use tokio::time::sleep;

use crate::config::{GridSpec, ScrollSpec, Tuning};
use crate::geometry::Region;
use crate::grid::{click_randomly_in, resolve_grid, scan_grid};
use crate::input::Input;
use crate::locator::{Locator, TemplateId};
use crate::retry::CancelToken;

/// Drives a scrollable panel between its limits.
///
/// The limits are detected by sentinel templates probed at fixed offsets
/// from the panel's anchor; a missing anchor or sentinel reads as "not at
/// the limit" rather than an error, because a popup can cover either for a
/// moment.
pub struct ScrollNavigator<'a, L, I> {
    locator: &'a L,
    input: &'a I,
    spec: &'a ScrollSpec,
    tuning: &'a Tuning,
    cancel: &'a CancelToken,
}

impl<'a, L: Locator, I: Input> ScrollNavigator<'a, L, I> {
    pub fn new(
        locator: &'a L,
        input: &'a I,
        spec: &'a ScrollSpec,
        tuning: &'a Tuning,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            locator,
            input,
            spec,
            tuning,
            cancel,
        }
    }

    fn marker_visible(&self, marker: &TemplateId, offset: (i32, i32)) -> bool {
        let Some(anchor) = self
            .locator
            .find_on_screen(&self.spec.anchor, self.tuning.match_threshold)
        else {
            return false;
        };
        let Some((w, h)) = self.locator.dimensions(marker) else {
            return false;
        };
        let probe = Region::new(
            anchor.left + offset.0,
            anchor.top + offset.1,
            w as i32,
            h as i32,
        );
        self.locator
            .find_in_region(marker, probe, self.tuning.match_threshold)
            .is_some()
    }

    pub fn at_top(&self) -> bool {
        self.marker_visible(&self.spec.top_marker, self.spec.top_offset)
    }

    pub fn at_bottom(&self) -> bool {
        self.marker_visible(&self.spec.bottom_marker, self.spec.bottom_offset)
    }

    /// Scroll until the top sentinel shows, at most `max_scroll_steps` steps.
    ///
    /// `false` is a soft failure ("could not confirm the top"); callers
    /// decide whether to proceed or abort.
    pub async fn scroll_to_top(&self) -> Result<bool> {
        if self.cancel.is_cancelled() {
            return Ok(false);
        }

        let Some(anchor) = self
            .locator
            .find_on_screen(&self.spec.anchor, self.tuning.match_threshold)
        else {
            tracing::warn!("{}: panel anchor not found, cannot scroll", self.spec.anchor);
            return Ok(false);
        };

        // The wheel only reaches the panel once it has been clicked.
        let focus = Region::new(
            anchor.left + self.spec.focus.offset_x,
            anchor.top + self.spec.focus.offset_y,
            self.spec.focus.width,
            self.spec.focus.height,
        );
        click_randomly_in(self.input, focus, self.tuning.click_margin)?;
        sleep(self.tuning.settle).await;

        for _ in 0..self.tuning.max_scroll_steps {
            if self.cancel.is_cancelled() {
                return Ok(false);
            }
            if self.at_top() {
                return Ok(true);
            }
            self.input.scroll(self.tuning.scroll_step);
            sleep(self.tuning.settle).await;
        }

        Ok(self.at_top())
    }

    /// Walk the panel from the top looking for `template` anywhere in the
    /// visible grid. `Ok(false)` is the stock-out signal: either the bottom
    /// was reached without a hit or the attempt budget ran out.
    pub async fn find_by_scrolling(&self, template: &TemplateId, grid: &GridSpec) -> Result<bool> {
        if !self.scroll_to_top().await? {
            tracing::warn!("could not confirm the top of the panel, giving up the search");
            return Ok(false);
        }

        for attempt in 0..self.tuning.max_scroll_attempts {
            if self.cancel.is_cancelled() {
                return Ok(false);
            }

            if self.visible_hit(template, grid) {
                tracing::info!("{template} found after {attempt} scroll step(s)");
                return Ok(true);
            }

            if self.at_bottom() {
                // The last step may have revealed a partial row; look once more.
                return Ok(self.visible_hit(template, grid));
            }

            for _ in 0..self.tuning.scroll_down_steps {
                if self.cancel.is_cancelled() {
                    return Ok(false);
                }
                self.input.scroll(-self.tuning.scroll_step);
                if self.at_bottom() {
                    break;
                }
            }
            sleep(self.tuning.settle).await;
        }

        tracing::info!(
            "{template} not found within {} scroll attempt(s)",
            self.tuning.max_scroll_attempts
        );
        Ok(false)
    }

    fn visible_hit(&self, template: &TemplateId, grid: &GridSpec) -> bool {
        let Some(cells) = resolve_grid(self.locator, grid, self.tuning.match_threshold) else {
            return false;
        };
        scan_grid(self.locator, template, &cells, self.tuning.match_threshold)
            .iter()
            .any(Option::is_some)
    }
}
