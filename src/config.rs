use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

use crate::locator::TemplateId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingEnv(String),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("{context}: grid must have positive size and shape")]
    InvalidGrid { context: &'static str },

    #[error("{context}: rectangle must have positive size")]
    InvalidRect { context: &'static str },
}

/// Where a grid of inventory/mail cells sits relative to its anchor image.
#[derive(Debug, Clone)]
pub struct GridSpec {
    pub anchor: TemplateId,
    pub offset_x: i32,
    pub offset_y: i32,
    pub width: i32,
    pub height: i32,
    pub rows: u32,
    pub cols: u32,
}

impl GridSpec {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: &'static str,
        anchor: TemplateId,
        offset_x: i32,
        offset_y: i32,
        width: i32,
        height: i32,
        rows: u32,
        cols: u32,
    ) -> Result<Self, ConfigError> {
        if width <= 0 || height <= 0 || rows == 0 || cols == 0 {
            return Err(ConfigError::InvalidGrid { context });
        }
        Ok(Self {
            anchor,
            offset_x,
            offset_y,
            width,
            height,
            rows,
            cols,
        })
    }
}

/// A clickable rectangle relative to an anchor image.
#[derive(Debug, Clone, Copy)]
pub struct ButtonSpec {
    pub offset_x: i32,
    pub offset_y: i32,
    pub width: i32,
    pub height: i32,
}

impl ButtonSpec {
    pub fn new(
        context: &'static str,
        offset_x: i32,
        offset_y: i32,
        width: i32,
        height: i32,
    ) -> Result<Self, ConfigError> {
        if width <= 0 || height <= 0 {
            return Err(ConfigError::InvalidRect { context });
        }
        Ok(Self {
            offset_x,
            offset_y,
            width,
            height,
        })
    }
}

/// Scroll-limit detection for a scrollable panel: two sentinel templates
/// probed at fixed offsets from the panel's anchor, plus a rectangle to
/// click so the panel has wheel focus.
#[derive(Debug, Clone)]
pub struct ScrollSpec {
    pub anchor: TemplateId,
    pub top_marker: TemplateId,
    pub top_offset: (i32, i32),
    pub bottom_marker: TemplateId,
    pub bottom_offset: (i32, i32),
    pub focus: ButtonSpec,
}

/// The mail form's buttons, all relative to the mail window anchor.
#[derive(Debug, Clone)]
pub struct DeliveryButtons {
    pub standard: ButtonSpec,
    pub express: ButtonSpec,
    pub receiver: ButtonSpec,
    pub request: ButtonSpec,
    pub value: ButtonSpec,
    pub send: ButtonSpec,
    pub receive: ButtonSpec,
}

/// Timing and matching knobs shared by every automation loop.
#[derive(Debug, Clone)]
pub struct Tuning {
    /// Similarity threshold in [0, 1]; higher is stricter.
    pub match_threshold: f32,
    /// Pause after each input action so the client UI can catch up.
    pub settle: Duration,
    /// Fraction of a cell kept clear of clicks on each side.
    pub click_margin: f32,
    /// Wheel rotation per scroll step, in clicks.
    pub scroll_step: i32,
    /// Small downward steps issued per scroll-search attempt.
    pub scroll_down_steps: u32,
    pub max_rounds: u32,
    pub max_scroll_steps: u32,
    pub max_scroll_attempts: u32,
    pub poll_interval: Duration,
    pub confirm_first_timeout: Duration,
    pub confirm_second_timeout: Duration,
    pub payment_timeout: Duration,
    pub receipt_timeout: Duration,
    pub receipt_pause: Duration,
    pub set_pause: Duration,
}

/// Whisper payload layout: a fixed hex marker, a skip, then three hex runs
/// (name, channel, content) captured by `data_pattern`.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    pub header_marker: String,
    pub skip_after_header: usize,
    pub data_pattern: Regex,
    pub channel_pattern: Regex,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub auth_token: String,
    pub window_title: String,
    pub assets_dir: PathBuf,
    /// The item being delivered; every grid scan looks for this template.
    pub item: TemplateId,
    pub inventory: GridSpec,
    pub mail: GridSpec,
    pub inventory_scroll: ScrollSpec,
    pub buttons: DeliveryButtons,
    /// Sub-region of the mail window where pending payments appear.
    pub payment_area: ButtonSpec,
    pub payment: TemplateId,
    pub receipt: TemplateId,
    pub confirm_send: TemplateId,
    pub confirm_done: TemplateId,
    pub tuning: Tuning,
    pub whisper: WhisperConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let auth_token = required_env("COURIER_AUTH_TOKEN")?;
        let window_title = required_env("COURIER_WINDOW_TITLE")?;

        let listen_addr =
            std::env::var("COURIER_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".into());

        let assets_dir =
            PathBuf::from(std::env::var("COURIER_ASSETS_DIR").unwrap_or_else(|_| "assets".into()));

        let item = TemplateId::new(
            std::env::var("COURIER_ITEM_TEMPLATE").unwrap_or_else(|_| "cider".into()),
        );

        let match_threshold = env_parse("COURIER_MATCH_THRESHOLD", 0.85f32)?;
        if !(0.0..=1.0).contains(&match_threshold) {
            return Err(ConfigError::Invalid {
                name: "COURIER_MATCH_THRESHOLD",
                reason: format!("{match_threshold} is outside [0, 1]"),
            });
        }

        let settle_ms: u64 = env_parse("COURIER_SETTLE_MS", 45)?;

        // Calibrated against the 1366x768 client preset.
        let inventory =
            GridSpec::new("inventory", TemplateId::new("inven"), -5, 58, 201, 291, 6, 4)?;
        let mail = GridSpec::new("mail", TemplateId::new("post"), 85, 254, 349, 115, 2, 6)?;

        let inventory_scroll = ScrollSpec {
            anchor: TemplateId::new("inven"),
            top_marker: TemplateId::new("scroll_top"),
            top_offset: (50, 150),
            bottom_marker: TemplateId::new("scroll_bottom"),
            bottom_offset: (50, 250),
            focus: ButtonSpec::new("inventory scroll focus", -5, 58, 201, 291)?,
        };

        let buttons = DeliveryButtons {
            standard: ButtonSpec::new("standard button", 124, 25, 80, 25)?,
            express: ButtonSpec::new("express button", 208, 25, 80, 25)?,
            receiver: ButtonSpec::new("receiver button", 95, 126, 58, 20)?,
            request: ButtonSpec::new("request button", 264, 382, 11, 10)?,
            value: ButtonSpec::new("value button", 94, 410, 14, 17)?,
            send: ButtonSpec::new("send button", 343, 489, 67, 19)?,
            receive: ButtonSpec::new("receive button", 300, 445, 70, 22)?,
        };

        let payment_area = ButtonSpec::new("payment area", 152, 149, 129, 281)?;

        let tuning = Tuning {
            match_threshold,
            settle: Duration::from_millis(settle_ms),
            click_margin: 0.2,
            scroll_step: 3,
            scroll_down_steps: 3,
            max_rounds: 30,
            max_scroll_steps: 30,
            max_scroll_attempts: 30,
            poll_interval: Duration::from_millis(150),
            confirm_first_timeout: Duration::from_secs(5),
            confirm_second_timeout: Duration::from_secs(10),
            payment_timeout: Duration::from_secs(5),
            receipt_timeout: Duration::from_secs(5),
            receipt_pause: Duration::from_millis(1500),
            set_pause: Duration::from_millis(500),
        };

        let whisper = WhisperConfig {
            header_marker: std::env::var("COURIER_WHISPER_HEADER")
                .unwrap_or_else(|_| "77686973706572".into()),
            skip_after_header: env_parse("COURIER_WHISPER_SKIP", 8usize)?,
            data_pattern: env_regex(
                "COURIER_WHISPER_DATA_PATTERN",
                "([0-9a-f]+?)3a([0-9a-f]+?)3a([0-9a-f]+)",
            )?,
            channel_pattern: env_regex("COURIER_WHISPER_CHANNEL_PATTERN", "^ch[0-9]+$")?,
            log_path: PathBuf::from(
                std::env::var("COURIER_WHISPER_LOG")
                    .unwrap_or_else(|_| "logs/whispers.jsonl".into()),
            ),
        };

        Ok(Config {
            listen_addr,
            auth_token,
            window_title,
            assets_dir,
            item,
            inventory,
            mail,
            inventory_scroll,
            buttons,
            payment_area,
            payment: TemplateId::new("payment"),
            receipt: TemplateId::new("receipt"),
            confirm_send: TemplateId::new("confirm_send"),
            confirm_done: TemplateId::new("confirm_done"),
            tuning,
            whisper,
        })
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnv(name.into()))
}

fn env_parse<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|e| ConfigError::Invalid {
            name,
            reason: format!("{raw:?}: {e}"),
        }),
        Err(_) => Ok(default),
    }
}

fn env_regex(name: &'static str, default: &str) -> Result<Regex, ConfigError> {
    let raw = std::env::var(name).unwrap_or_else(|_| default.into());
    Regex::new(&raw).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}
