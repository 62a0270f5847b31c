//! Deterministic desk simulation used by the unit tests.
//!
//! `FakeDesk` plays both capability roles: as a `Locator` it answers
//! template queries from scripted anchors and grid contents, and as an
//! `Input` it records every synthetic event while simulating the game's
//! pick-up/put-down behavior, so a click on an occupied source cell
//! followed by a click on an empty destination cell actually moves the
//! item for the next scan.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::geometry::Region;
use crate::input::{Input, Key};
use crate::locator::{Locator, TemplateId};
use crate::retry::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Destination,
}

#[derive(Default)]
struct DeskState {
    anchors: HashMap<TemplateId, Region>,
    dims: HashMap<TemplateId, (u32, u32)>,

    src_cells: Vec<Region>,
    src_occupied: Vec<bool>,
    dst_cells: Vec<Region>,
    dst_occupied: Vec<bool>,
    /// An item has been picked up and waits for a destination click.
    picked: bool,

    at_top: bool,
    at_bottom: bool,
    up_scrolls: u32,
    down_scrolls: u32,
    /// Reach the top after this many upward scrolls.
    top_after_up_scrolls: Option<u32>,
    /// After this many downward scrolls, the given source cell shows an item.
    reveal_after_down_scrolls: Option<(u32, usize)>,
    /// After this many item-cell queries, the given source cell shows an
    /// item (models the UI settling between two scans).
    reveal_after_item_scans: Option<(u32, usize)>,
    item_scans: u32,

    /// Templates that only show up once enough clicks happened
    /// (confirmation dialogs appearing after "send").
    appear_after_clicks: Vec<(usize, TemplateId, Region)>,

    /// Fire this token once the nth click has been issued.
    cancel_after_clicks: Option<(usize, CancelToken)>,

    clicks: Vec<(i32, i32)>,
    scrolls: Vec<i32>,
    typed: Vec<String>,
    pasted: Vec<String>,
    keys: Vec<Key>,
}

pub struct FakeDesk {
    state: Mutex<DeskState>,
}

impl FakeDesk {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DeskState::default()),
        }
    }

    pub fn item(&self) -> TemplateId {
        TemplateId::new("cider")
    }

    pub fn src_anchor(&self) -> TemplateId {
        TemplateId::new("inven")
    }

    pub fn dst_anchor(&self) -> TemplateId {
        TemplateId::new("post")
    }

    pub fn top_marker(&self) -> TemplateId {
        TemplateId::new("scroll_top")
    }

    pub fn bottom_marker(&self) -> TemplateId {
        TemplateId::new("scroll_bottom")
    }

    pub fn set_anchor(&self, template: TemplateId, region: Region) {
        self.state.lock().unwrap().anchors.insert(template, region);
    }

    pub fn remove_anchor(&self, template: &TemplateId) {
        self.state.lock().unwrap().anchors.remove(template);
    }

    pub fn set_grid_cells(&self, side: Side, cells: Vec<Region>, occupied: &[usize]) {
        let mut flags = vec![false; cells.len()];
        for &i in occupied {
            flags[i] = true;
        }
        let mut s = self.state.lock().unwrap();
        match side {
            Side::Source => {
                s.src_cells = cells;
                s.src_occupied = flags;
            }
            Side::Destination => {
                s.dst_cells = cells;
                s.dst_occupied = flags;
            }
        }
    }

    pub fn set_at_top(&self, value: bool) {
        self.state.lock().unwrap().at_top = value;
    }

    pub fn set_at_bottom(&self, value: bool) {
        self.state.lock().unwrap().at_bottom = value;
    }

    pub fn set_top_after_up_scrolls(&self, count: u32) {
        self.state.lock().unwrap().top_after_up_scrolls = Some(count);
    }

    pub fn set_reveal_after_down_scrolls(&self, count: u32, cell: usize) {
        self.state.lock().unwrap().reveal_after_down_scrolls = Some((count, cell));
    }

    pub fn set_reveal_after_item_scans(&self, count: u32, cell: usize) {
        self.state.lock().unwrap().reveal_after_item_scans = Some((count, cell));
    }

    pub fn set_appear_after_clicks(&self, clicks: usize, template: TemplateId, region: Region) {
        self.state
            .lock()
            .unwrap()
            .appear_after_clicks
            .push((clicks, template, region));
    }

    pub fn set_cancel_after_clicks(&self, clicks: usize, token: CancelToken) {
        self.state.lock().unwrap().cancel_after_clicks = Some((clicks, token));
    }

    pub fn clicks(&self) -> Vec<(i32, i32)> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn scrolls(&self) -> Vec<i32> {
        self.state.lock().unwrap().scrolls.clone()
    }

    pub fn typed(&self) -> Vec<String> {
        self.state.lock().unwrap().typed.clone()
    }

    pub fn pasted(&self) -> Vec<String> {
        self.state.lock().unwrap().pasted.clone()
    }

    pub fn keys(&self) -> Vec<Key> {
        self.state.lock().unwrap().keys.clone()
    }

    pub fn occupied(&self, side: Side) -> Vec<bool> {
        let s = self.state.lock().unwrap();
        match side {
            Side::Source => s.src_occupied.clone(),
            Side::Destination => s.dst_occupied.clone(),
        }
    }
}

impl Locator for FakeDesk {
    fn find_on_screen(&self, template: &TemplateId, _threshold: f32) -> Option<Region> {
        let s = self.state.lock().unwrap();
        if let Some(region) = s.anchors.get(template) {
            return Some(*region);
        }
        s.appear_after_clicks
            .iter()
            .find(|(after, t, _)| t == template && s.clicks.len() >= *after)
            .map(|(_, _, region)| *region)
    }

    fn find_in_region(
        &self,
        template: &TemplateId,
        region: Region,
        _threshold: f32,
    ) -> Option<Region> {
        let mut s = self.state.lock().unwrap();

        if *template == self.item() {
            s.item_scans += 1;
            if let Some((after, cell)) = s.reveal_after_item_scans {
                if s.item_scans > after && cell < s.src_occupied.len() {
                    s.src_occupied[cell] = true;
                }
            }
            for (cells, occupied) in [
                (&s.src_cells, &s.src_occupied),
                (&s.dst_cells, &s.dst_occupied),
            ] {
                if let Some(i) = cells.iter().position(|c| *c == region) {
                    return occupied[i].then(|| {
                        Region::new(region.left + 2, region.top + 2, region.width - 4, region.height - 4)
                    });
                }
            }
            return None;
        }

        if *template == self.top_marker() {
            return s
                .at_top
                .then(|| Region::new(region.left, region.top, region.width, region.height));
        }
        if *template == self.bottom_marker() {
            return s
                .at_bottom
                .then(|| Region::new(region.left, region.top, region.width, region.height));
        }

        // Anything else (payment entries, dialogs) matches when its scripted
        // location sits inside the queried region.
        let candidate = s.anchors.get(template).copied().or_else(|| {
            s.appear_after_clicks
                .iter()
                .find(|(after, t, _)| t == template && s.clicks.len() >= *after)
                .map(|(_, _, r)| *r)
        })?;
        let inside = candidate.left >= region.left
            && candidate.top >= region.top
            && candidate.right() <= region.right()
            && candidate.bottom() <= region.bottom();
        inside.then_some(candidate)
    }

    fn dimensions(&self, template: &TemplateId) -> Option<(u32, u32)> {
        let s = self.state.lock().unwrap();
        Some(s.dims.get(template).copied().unwrap_or((10, 10)))
    }
}

impl Input for FakeDesk {
    fn click(&self, x: i32, y: i32) {
        let mut s = self.state.lock().unwrap();
        s.clicks.push((x, y));

        // Simulate pick-up / put-down.
        if !s.picked {
            let hit = s
                .src_cells
                .iter()
                .enumerate()
                .find(|(i, c)| c.contains(x, y) && s.src_occupied[*i])
                .map(|(i, _)| i);
            if let Some(i) = hit {
                s.src_occupied[i] = false;
                s.picked = true;
            }
        } else if let Some(i) = s.dst_cells.iter().position(|c| c.contains(x, y)) {
            if !s.dst_occupied[i] {
                s.dst_occupied[i] = true;
                s.picked = false;
            }
        }

        if let Some((after, token)) = &s.cancel_after_clicks {
            if s.clicks.len() >= *after {
                token.cancel();
            }
        }
    }

    fn scroll(&self, clicks: i32) {
        let mut s = self.state.lock().unwrap();
        s.scrolls.push(clicks);
        if clicks > 0 {
            s.up_scrolls += 1;
            if let Some(after) = s.top_after_up_scrolls {
                if s.up_scrolls >= after {
                    s.at_top = true;
                }
            }
        } else if clicks < 0 {
            s.down_scrolls += 1;
            if let Some((after, cell)) = s.reveal_after_down_scrolls {
                if s.down_scrolls >= after && cell < s.src_occupied.len() {
                    s.src_occupied[cell] = true;
                }
            }
        }
    }

    fn type_text(&self, text: &str) {
        self.state.lock().unwrap().typed.push(text.to_string());
    }

    fn paste_text(&self, text: &str) {
        self.state.lock().unwrap().pasted.push(text.to_string());
    }

    fn key_press(&self, key: Key) {
        self.state.lock().unwrap().keys.push(key);
    }
}
