use std::sync::Arc;

use anyhow::Result;
use tokio::time::sleep;

use crate::config::{ButtonSpec, Config};
use crate::engine::Transfer;
use crate::geometry::Region;
use crate::grid::click_randomly_in;
use crate::input::{Input, Key};
use crate::locator::{Locator, TemplateId};
use crate::retry::{CancelToken, Wait, poll_until};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryType {
    Standard,
    Express,
}

impl DeliveryType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "standard" => Some(Self::Standard),
            "express" => Some(Self::Express),
            _ => None,
        }
    }
}

/// One delivery order as submitted through the control surface.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub delivery_type: String,
    pub receiver: String,
    /// Digits only; typed into the amount field verbatim.
    pub amount: String,
}

/// Drives the mail form around one or more transfer runs.
///
/// Every outcome collapses to a boolean: diagnostics go to the log, and a
/// `false` is the caller's signal to restock (an external routine) or to
/// check the cancel token.
pub struct Delivery<L, I> {
    locator: Arc<L>,
    input: Arc<I>,
    config: Config,
    cancel: CancelToken,
}

impl<L: Locator, I: Input> Delivery<L, I> {
    pub fn new(locator: Arc<L>, input: Arc<I>, config: Config, cancel: CancelToken) -> Self {
        Self {
            locator,
            input,
            config,
            cancel,
        }
    }

    /// Run one complete delivery: select the type, paste the receiver, fill
    /// the mail grid, request, enter the amount, send, and acknowledge both
    /// confirmation dialogs.
    pub async fn execute(&self, request: &DeliveryRequest) -> Result<bool> {
        let Some(delivery_type) = DeliveryType::parse(&request.delivery_type) else {
            tracing::warn!("unknown delivery type {:?}", request.delivery_type);
            return Ok(false);
        };
        if request.receiver.is_empty() {
            tracing::warn!("empty receiver, refusing to drive the form");
            return Ok(false);
        }
        if request.amount.is_empty() || !request.amount.bytes().all(|b| b.is_ascii_digit()) {
            tracing::warn!("amount {:?} is not a digit string", request.amount);
            return Ok(false);
        }

        tracing::info!(
            "delivery start: type={delivery_type:?} receiver={} amount={}",
            request.receiver,
            request.amount
        );

        let type_button = match delivery_type {
            DeliveryType::Standard => self.config.buttons.standard,
            DeliveryType::Express => self.config.buttons.express,
        };
        if !self.click_button(type_button, "type").await? {
            return Ok(false);
        }

        if !self.click_button(self.config.buttons.receiver, "receiver").await? {
            return Ok(false);
        }
        self.input.paste_text(&request.receiver);
        sleep(self.config.tuning.settle).await;

        let transfer = Transfer::new(
            &*self.locator,
            &*self.input,
            &self.config.inventory_scroll,
            &self.config.tuning,
            &self.cancel,
        );
        if !transfer
            .fill_destination(&self.config.inventory, &self.config.mail, &self.config.item)
            .await?
        {
            tracing::warn!("mail grid could not be filled, aborting the delivery");
            return Ok(false);
        }

        if !self.click_button(self.config.buttons.request, "request").await? {
            return Ok(false);
        }

        if !self.click_button(self.config.buttons.value, "amount").await? {
            return Ok(false);
        }
        self.input.type_text(&request.amount);
        sleep(self.config.tuning.settle).await;
        self.input.key_press(Key::Enter);
        sleep(self.config.tuning.settle).await;

        if !self.click_button(self.config.buttons.send, "send").await? {
            return Ok(false);
        }

        // Two confirmation dialogs follow the send; the first pops quickly,
        // the second can lag behind the server.
        if !self
            .acknowledge(
                &self.config.confirm_send,
                self.config.tuning.confirm_first_timeout,
            )
            .await?
        {
            return Ok(false);
        }
        if !self
            .acknowledge(
                &self.config.confirm_done,
                self.config.tuning.confirm_second_timeout,
            )
            .await?
        {
            return Ok(false);
        }

        tracing::info!("delivery to {} complete", request.receiver);
        Ok(true)
    }

    /// Send `sets` identical deliveries back to back, stopping at the first
    /// failure or cancellation. Returns how many sets completed.
    pub async fn execute_sets(&self, request: &DeliveryRequest, sets: u32) -> Result<u32> {
        let mut sent = 0;
        for set in 0..sets {
            if self.cancel.is_cancelled() {
                tracing::info!("delivery run cancelled after {sent}/{sets} set(s)");
                break;
            }
            tracing::info!("delivery set {}/{sets}", set + 1);
            if !self.execute(request).await? {
                break;
            }
            sent += 1;
            if set + 1 < sets {
                sleep(self.config.tuning.set_pause).await;
            }
        }
        Ok(sent)
    }

    /// Claim delivered payments: click the next payment entry in the mail
    /// list, press receive, confirm the receipt dialog. Stops when no entry
    /// shows up within the wait, or after `max_claims`.
    pub async fn collect_payments(&self, max_claims: u32) -> Result<u32> {
        let tuning = &self.config.tuning;
        let mut claimed = 0;

        for _ in 0..max_claims {
            if self.cancel.is_cancelled() {
                break;
            }

            let Some(anchor) = self
                .locator
                .find_on_screen(&self.config.mail.anchor, tuning.match_threshold)
            else {
                tracing::warn!("mail window not found, stopping the claim loop");
                break;
            };
            let area = self.config.payment_area;
            let search = Region::new(
                anchor.left + area.offset_x,
                anchor.top + area.offset_y,
                area.width,
                area.height,
            );

            let entry = poll_until(
                || {
                    self.locator
                        .find_in_region(&self.config.payment, search, tuning.match_threshold)
                },
                tuning.payment_timeout,
                tuning.poll_interval,
                &self.cancel,
            )
            .await;
            let Wait::Found(entry) = entry else {
                tracing::info!("no pending payment within the wait, {claimed} claimed");
                break;
            };

            click_randomly_in(&*self.input, entry, tuning.click_margin)?;
            sleep(tuning.settle).await;

            if !self.click_button(self.config.buttons.receive, "receive").await? {
                break;
            }

            match poll_until(
                || {
                    self.locator
                        .find_on_screen(&self.config.receipt, tuning.match_threshold)
                },
                tuning.receipt_timeout,
                tuning.poll_interval,
                &self.cancel,
            )
            .await
            {
                Wait::Found(_) => {
                    self.input.key_press(Key::Enter);
                    sleep(tuning.receipt_pause).await;
                    claimed += 1;
                }
                Wait::TimedOut => {
                    tracing::warn!("receipt dialog never appeared, continuing");
                }
                Wait::Cancelled => break,
            }
        }

        Ok(claimed)
    }

    /// Click a form button placed relative to the mail window anchor.
    /// `false` means the anchor (and with it the form) is gone.
    async fn click_button(&self, button: ButtonSpec, what: &str) -> Result<bool> {
        if self.cancel.is_cancelled() {
            return Ok(false);
        }
        let Some(anchor) = self
            .locator
            .find_on_screen(&self.config.mail.anchor, self.config.tuning.match_threshold)
        else {
            tracing::warn!("mail anchor not found while looking for the {what} button");
            return Ok(false);
        };
        let rect = Region::new(
            anchor.left + button.offset_x,
            anchor.top + button.offset_y,
            button.width,
            button.height,
        );
        click_randomly_in(&*self.input, rect, self.config.tuning.click_margin)?;
        sleep(self.config.tuning.settle).await;
        Ok(true)
    }

    /// Wait for a confirmation template and dismiss it: a randomized click
    /// inside the dialog, then Enter.
    async fn acknowledge(
        &self,
        template: &TemplateId,
        timeout: std::time::Duration,
    ) -> Result<bool> {
        let tuning = &self.config.tuning;
        match poll_until(
            || self.locator.find_on_screen(template, tuning.match_threshold),
            timeout,
            tuning.poll_interval,
            &self.cancel,
        )
        .await
        {
            Wait::Found(region) => {
                click_randomly_in(&*self.input, region, tuning.click_margin)?;
                sleep(tuning.settle).await;
                self.input.key_press(Key::Enter);
                sleep(tuning.settle).await;
                Ok(true)
            }
            Wait::TimedOut => {
                tracing::warn!("confirmation {template} never appeared");
                Ok(false)
            }
            Wait::Cancelled => {
                tracing::info!("confirmation wait cancelled");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::{
        ButtonSpec, DeliveryButtons, GridSpec, ScrollSpec, Tuning, WhisperConfig,
    };
    use crate::fakes::{FakeDesk, Side};
    use crate::geometry::grid_cells;

    fn test_config(desk: &FakeDesk) -> Config {
        let tuning = Tuning {
            match_threshold: 0.85,
            settle: Duration::from_millis(1),
            click_margin: 0.2,
            scroll_step: 3,
            scroll_down_steps: 3,
            max_rounds: 30,
            max_scroll_steps: 5,
            max_scroll_attempts: 5,
            poll_interval: Duration::from_millis(2),
            confirm_first_timeout: Duration::from_millis(30),
            confirm_second_timeout: Duration::from_millis(60),
            payment_timeout: Duration::from_millis(30),
            receipt_timeout: Duration::from_millis(30),
            receipt_pause: Duration::from_millis(1),
            set_pause: Duration::from_millis(1),
        };

        Config {
            listen_addr: "127.0.0.1:0".into(),
            auth_token: "test".into(),
            window_title: "game".into(),
            assets_dir: "assets".into(),
            item: desk.item(),
            inventory: GridSpec::new("inventory", desk.src_anchor(), 0, 40, 120, 80, 2, 3)
                .unwrap(),
            mail: GridSpec::new("mail", desk.dst_anchor(), 0, 40, 240, 80, 2, 6).unwrap(),
            inventory_scroll: ScrollSpec {
                anchor: desk.src_anchor(),
                top_marker: desk.top_marker(),
                top_offset: (50, 150),
                bottom_marker: desk.bottom_marker(),
                bottom_offset: (50, 250),
                focus: ButtonSpec::new("focus", 0, 40, 120, 80).unwrap(),
            },
            buttons: DeliveryButtons {
                standard: ButtonSpec::new("standard", 124, 25, 80, 25).unwrap(),
                express: ButtonSpec::new("express", 208, 25, 80, 25).unwrap(),
                receiver: ButtonSpec::new("receiver", 95, 126, 58, 20).unwrap(),
                request: ButtonSpec::new("request", 264, 382, 11, 10).unwrap(),
                value: ButtonSpec::new("value", 94, 410, 14, 17).unwrap(),
                send: ButtonSpec::new("send", 343, 489, 67, 19).unwrap(),
                receive: ButtonSpec::new("receive", 300, 445, 70, 22).unwrap(),
            },
            payment_area: ButtonSpec::new("payments", 152, 149, 129, 281).unwrap(),
            payment: TemplateId::new("payment"),
            receipt: TemplateId::new("receipt"),
            confirm_send: TemplateId::new("confirm_send"),
            confirm_done: TemplateId::new("confirm_done"),
            tuning,
            whisper: WhisperConfig {
                header_marker: "77686973706572".into(),
                skip_after_header: 8,
                data_pattern: regex::Regex::new("([0-9a-f]+?)3a([0-9a-f]+?)3a([0-9a-f]+)")
                    .unwrap(),
                channel_pattern: regex::Regex::new("^ch[0-9]+$").unwrap(),
                log_path: "logs/test.jsonl".into(),
            },
        }
    }

    /// Anchors both windows and fills the grids so one transfer round
    /// completes: destination has one empty cell, source one item.
    fn wire_desk(desk: &FakeDesk) {
        desk.set_anchor(desk.src_anchor(), Region::new(100, 100, 40, 20));
        desk.set_anchor(desk.dst_anchor(), Region::new(500, 100, 40, 20));

        let src_cells = grid_cells((100, 140), (220, 220), 2, 3).unwrap();
        let dst_cells = grid_cells((500, 140), (740, 220), 2, 6).unwrap();
        desk.set_grid_cells(Side::Source, src_cells, &[0]);
        let dst_occupied: Vec<usize> = (1..12).collect();
        desk.set_grid_cells(Side::Destination, dst_cells, &dst_occupied);
    }

    fn delivery(desk: &Arc<FakeDesk>, cancel: &CancelToken) -> Delivery<FakeDesk, FakeDesk> {
        Delivery::new(
            desk.clone(),
            desk.clone(),
            test_config(desk),
            cancel.clone(),
        )
    }

    fn request() -> DeliveryRequest {
        DeliveryRequest {
            delivery_type: "standard".into(),
            receiver: "한라봉".into(),
            amount: "45000".into(),
        }
    }

    #[tokio::test]
    async fn test_execute_happy_path() {
        let desk = Arc::new(FakeDesk::new());
        wire_desk(&desk);
        // The confirmations only pop once the whole form has been driven:
        // type, receiver, one item moved (2 clicks), request, amount, send.
        desk.set_appear_after_clicks(7, TemplateId::new("confirm_send"), Region::new(600, 300, 80, 40));
        desk.set_appear_after_clicks(7, TemplateId::new("confirm_done"), Region::new(600, 340, 80, 40));
        let cancel = CancelToken::new();

        let ok = delivery(&desk, &cancel).execute(&request()).await.unwrap();

        assert!(ok);
        assert_eq!(desk.pasted(), vec!["한라봉".to_string()]);
        assert_eq!(desk.typed(), vec!["45000".to_string()]);
        // Enter after the amount plus one per confirmation.
        assert_eq!(desk.keys().iter().filter(|k| **k == Key::Enter).count(), 3);
        assert!(desk.occupied(Side::Destination).iter().all(|&o| o));
    }

    #[tokio::test]
    async fn test_execute_rejects_unknown_type() {
        let desk = Arc::new(FakeDesk::new());
        wire_desk(&desk);
        let cancel = CancelToken::new();
        let mut req = request();
        req.delivery_type = "overnight".into();

        let ok = delivery(&desk, &cancel).execute(&req).await.unwrap();

        assert!(!ok);
        assert!(desk.clicks().is_empty());
        assert!(desk.pasted().is_empty());
        assert!(desk.keys().is_empty());
    }

    #[tokio::test]
    async fn test_execute_rejects_non_digit_amount() {
        let desk = Arc::new(FakeDesk::new());
        wire_desk(&desk);
        let cancel = CancelToken::new();
        let mut req = request();
        req.amount = "45k".into();

        let ok = delivery(&desk, &cancel).execute(&req).await.unwrap();

        assert!(!ok);
        assert!(desk.clicks().is_empty());
    }

    #[tokio::test]
    async fn test_execute_fails_without_mail_anchor() {
        let desk = Arc::new(FakeDesk::new());
        wire_desk(&desk);
        desk.remove_anchor(&desk.dst_anchor());
        let cancel = CancelToken::new();

        let ok = delivery(&desk, &cancel).execute(&request()).await.unwrap();

        assert!(!ok);
        assert!(desk.clicks().is_empty());
    }

    #[tokio::test]
    async fn test_execute_fails_when_confirmation_never_shows() {
        let desk = Arc::new(FakeDesk::new());
        wire_desk(&desk);
        // confirm_send never appears; the wait must time out and fail the run.
        let cancel = CancelToken::new();

        let ok = delivery(&desk, &cancel).execute(&request()).await.unwrap();

        assert!(!ok);
        // The form was driven up to and including "send".
        assert!(!desk.clicks().is_empty());
        assert_eq!(desk.typed(), vec!["45000".to_string()]);
    }

    #[tokio::test]
    async fn test_execute_propagates_transfer_exhaustion() {
        let desk = Arc::new(FakeDesk::new());
        wire_desk(&desk);
        // Source empty and nothing to find by scrolling.
        let src_cells = grid_cells((100, 140), (220, 220), 2, 3).unwrap();
        desk.set_grid_cells(Side::Source, src_cells, &[]);
        desk.set_at_top(true);
        let cancel = CancelToken::new();

        let ok = delivery(&desk, &cancel).execute(&request()).await.unwrap();

        assert!(!ok);
        // No amount typed: the workflow stopped before the request step.
        assert!(desk.typed().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_execute_performs_no_ui_step() {
        let desk = Arc::new(FakeDesk::new());
        wire_desk(&desk);
        let cancel = CancelToken::new();
        cancel.cancel();

        let ok = delivery(&desk, &cancel).execute(&request()).await.unwrap();

        assert!(!ok);
        assert!(desk.clicks().is_empty());
        assert!(desk.pasted().is_empty());
    }

    #[tokio::test]
    async fn test_execute_sets_stops_on_failure() {
        let desk = Arc::new(FakeDesk::new());
        wire_desk(&desk);
        // First set succeeds (grids settle full); later sets fail because the
        // destination stays full but the source is empty -> still success.
        // Use a missing confirmation instead to fail every set.
        let cancel = CancelToken::new();

        let sent = delivery(&desk, &cancel)
            .execute_sets(&request(), 3)
            .await
            .unwrap();

        // confirm_send never shows, so the first set already fails.
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn test_collect_payments_claims_until_dry() {
        let desk = Arc::new(FakeDesk::new());
        wire_desk(&desk);
        // One payment entry inside the search area; the receipt dialog is
        // visible as soon as it is queried.
        desk.set_anchor(TemplateId::new("payment"), Region::new(660, 260, 40, 20));
        desk.set_anchor(TemplateId::new("receipt"), Region::new(600, 300, 80, 40));
        let cancel = CancelToken::new();

        let claimed = delivery(&desk, &cancel).collect_payments(1).await.unwrap();

        assert_eq!(claimed, 1);
        assert!(desk.keys().contains(&Key::Enter));
    }

    #[tokio::test]
    async fn test_collect_payments_stops_when_none_pending() {
        let desk = Arc::new(FakeDesk::new());
        wire_desk(&desk);
        let cancel = CancelToken::new();

        let claimed = delivery(&desk, &cancel).collect_payments(5).await.unwrap();

        assert_eq!(claimed, 0);
    }
}
