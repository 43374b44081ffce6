//! Primitive deltas between two projections of the same cloud.
//!
//! A primitive counts as changed when its tile membership moved (rect
//! differs) or its depth moved by more than the configured tolerance. With
//! a zero tolerance every depth change is reported, which makes the reuse
//! merge bit-exact against a full rebuild.

use super::ProjectionRecord;
use crate::tiles::ScreenRect;

#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    changed: Vec<bool>,
    ids: Vec<u32>,
}

impl ChangeSet {
    pub fn with_capacity(primitives: usize) -> Self {
        Self {
            changed: Vec::with_capacity(primitives),
            ids: Vec::with_capacity(primitives),
        }
    }

    pub fn between(
        prev_records: &[ProjectionRecord],
        prev_rects: &[ScreenRect],
        curr_records: &[ProjectionRecord],
        curr_rects: &[ScreenRect],
        depth_tolerance: f32,
    ) -> Self {
        let mut set = Self::with_capacity(curr_records.len());
        set.detect(
            prev_records,
            prev_rects,
            curr_records,
            curr_rects,
            depth_tolerance,
        );
        set
    }

    /// Recomputes the set in place, reusing its storage.
    pub fn detect(
        &mut self,
        prev_records: &[ProjectionRecord],
        prev_rects: &[ScreenRect],
        curr_records: &[ProjectionRecord],
        curr_rects: &[ScreenRect],
        depth_tolerance: f32,
    ) {
        debug_assert_eq!(prev_records.len(), curr_records.len());
        debug_assert_eq!(prev_rects.len(), curr_rects.len());

        self.changed.clear();
        self.ids.clear();
        let rows = prev_records
            .iter()
            .zip(prev_rects)
            .zip(curr_records.iter().zip(curr_rects));
        for (id, ((prev_record, prev_rect), (curr_record, curr_rect))) in rows.enumerate() {
            let changed = primitive_changed(
                prev_record,
                prev_rect,
                curr_record,
                curr_rect,
                depth_tolerance,
            );
            self.changed.push(changed);
            if changed {
                self.ids.push(id as u32);
            }
        }
    }

    pub fn is_changed(&self, id: u32) -> bool {
        self.changed.get(id as usize).copied().unwrap_or(false)
    }

    /// Changed primitive ids, ascending.
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

fn primitive_changed(
    prev_record: &ProjectionRecord,
    prev_rect: &ScreenRect,
    curr_record: &ProjectionRecord,
    curr_rect: &ScreenRect,
    depth_tolerance: f32,
) -> bool {
    if prev_rect != curr_rect {
        return true;
    }
    if curr_rect.is_empty() {
        return false;
    }
    (curr_record.depth - prev_record.depth).abs() > depth_tolerance
}
