//! Virtual window math for fixed-height rows.
//!
//! Only rows in `[start_index, end_index)` are materialized; `top_offset`
//! reserves the space of every row above them so absolute scroll positions
//! and the total extent stay correct. Variable row heights would need a
//! prefix-sum index and are not supported.

use serde::Serialize;

/// Rows rendered beyond each edge of the viewport.
pub const DEFAULT_OVERSCAN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleRange {
    pub start_index: usize,
    pub end_index: usize,
    pub top_offset: u64,
    pub total_height: u64,
}

impl VisibleRange {
    pub fn len(&self) -> usize {
        self.end_index - self.start_index
    }

    pub fn is_empty(&self) -> bool {
        self.start_index == self.end_index
    }

    /// Rows of leading overscan above `scroll_offset`, i.e. how many of the
    /// materialized rows sit above the viewport top.
    pub fn rows_above(&self, scroll_offset: u64, row_height: u32) -> usize {
        if row_height == 0 {
            return 0;
        }
        let hidden = scroll_offset.saturating_sub(self.top_offset) / row_height as u64;
        (hidden as usize).min(self.len())
    }
}

/// Maximum number of rows `visible_range` will materialize.
pub fn visible_count(row_height: u32, viewport_height: u64, overscan: usize) -> usize {
    if row_height == 0 {
        return 0;
    }
    let rows = viewport_height.div_ceil(row_height as u64) as usize;
    rows.saturating_add(overscan.saturating_mul(2))
}

pub fn visible_range(
    scroll_offset: u64,
    row_height: u32,
    viewport_height: u64,
    item_count: usize,
    overscan: usize,
) -> VisibleRange {
    let total_height = item_count as u64 * row_height as u64;
    if row_height == 0 {
        return VisibleRange { start_index: 0, end_index: 0, top_offset: 0, total_height };
    }

    let first_visible = (scroll_offset / row_height as u64).min(usize::MAX as u64) as usize;
    let start_index = first_visible.saturating_sub(overscan).min(item_count);
    let end_index = start_index
        .saturating_add(visible_count(row_height, viewport_height, overscan))
        .min(item_count);

    VisibleRange {
        start_index,
        end_index,
        top_offset: start_index as u64 * row_height as u64,
        total_height,
    }
}

/// Largest scroll offset that still fills the viewport.
pub fn max_scroll_offset(row_height: u32, viewport_height: u64, item_count: usize) -> u64 {
    let total = item_count as u64 * row_height as u64;
    total.saturating_sub(viewport_height)
}
