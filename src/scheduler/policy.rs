//! Refresh policies: when a frame forces (part of) the sorted index to be
//! rebuilt instead of reused.
//!
//! A policy is selected once per session. `decide` only reads the
//! scheduler state (the periodic variants also draw the jitter offset from
//! their RNG); the state is advanced when the frame commits.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::SchedulerState;
use crate::error::{SortError, SortResult};
use crate::settings::{HierarchicalSettings, RefreshSettings, RefreshVariant};
use crate::tiles::{morton, TileGrid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshLevel {
    Coarse,
    Fine,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshAction {
    None,
    /// Full rebuild on the critical path, against the camera of frame
    /// `snapshot`.
    Full { snapshot: u64 },
    /// Full rebuild against `snapshot` on the worker thread. The result
    /// becomes the previous generation of a later frame.
    Background { snapshot: u64 },
    /// Local rebuild of `tiles` as part of the reuse merge.
    Partial { level: RefreshLevel, tiles: Vec<u32> },
}

impl RefreshAction {
    pub fn forced_tiles(&self) -> &[u32] {
        match self {
            RefreshAction::Partial { tiles, .. } => tiles,
            _ => &[],
        }
    }
}

/// Fires every `window` frames. The rebuild may use a camera up to
/// `jitter` frames old.
pub struct PeriodicRefresh {
    window: u64,
    jitter: u64,
    rng: SmallRng,
}

impl PeriodicRefresh {
    pub fn new(window: u64, jitter: u64, seed: Option<u64>) -> SortResult<Self> {
        if window == 0 {
            return Err(SortError::InvalidConfig(
                "refresh window must be at least one frame".into(),
            ));
        }
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Ok(Self {
            window,
            jitter: jitter.min(window / 2),
            rng,
        })
    }

    pub fn window(&self) -> u64 {
        self.window
    }

    pub fn jitter(&self) -> u64 {
        self.jitter
    }

    pub fn is_due(&self, frame: u64, state: &SchedulerState) -> bool {
        frame.saturating_sub(state.last_refresh_index) >= self.window
    }

    fn snapshot(&mut self, frame: u64) -> u64 {
        if self.jitter == 0 {
            frame
        } else {
            frame - self.rng.gen_range(0..=self.jitter)
        }
    }
}

/// Square groups of tiles, visited in Z-order so consecutive groups stay
/// spatially close.
#[derive(Debug, Clone)]
pub struct TileGroups {
    groups: Vec<Vec<u32>>,
}

impl TileGroups {
    pub fn new(grid: &TileGrid, group_size: u32) -> SortResult<Self> {
        if group_size == 0 {
            return Err(SortError::InvalidConfig(
                "tile group size must be at least one tile".into(),
            ));
        }
        let cols = grid.tiles_x().div_ceil(group_size);
        let rows = grid.tiles_y().div_ceil(group_size);
        let groups = morton::morton_order(cols, rows)
            .into_iter()
            .map(|group| {
                let gx = (group % cols) * group_size;
                let gy = (group / cols) * group_size;
                let mut tiles = Vec::with_capacity((group_size * group_size) as usize);
                for y in gy..(gy + group_size).min(grid.tiles_y()) {
                    for x in gx..(gx + group_size).min(grid.tiles_x()) {
                        tiles.push(grid.tile_id(x, y));
                    }
                }
                tiles
            })
            .collect();
        Ok(Self { groups })
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn group(&self, index: usize) -> &[u32] {
        &self.groups[index % self.groups.len()]
    }
}

/// Two-level partial refresh. Coarse refreshes rebuild a few whole groups
/// every `coarse_window` frames; fine refreshes rebuild a slice of one
/// group every `fine_window` frames.
pub struct HierarchicalRefresh {
    groups: TileGroups,
    coarse_window: u64,
    fine_window: u64,
    coarse_groups_per_refresh: usize,
    fine_tiles_per_refresh: usize,
}

impl HierarchicalRefresh {
    pub fn new(grid: &TileGrid, settings: &HierarchicalSettings) -> SortResult<Self> {
        if settings.coarse_window == 0 || settings.fine_window == 0 {
            return Err(SortError::InvalidConfig(format!(
                "hierarchical windows must be at least one frame (coarse {}, fine {})",
                settings.coarse_window, settings.fine_window
            )));
        }
        if settings.coarse_groups_per_refresh == 0 || settings.fine_tiles_per_refresh == 0 {
            return Err(SortError::InvalidConfig(format!(
                "hierarchical refreshes must cover at least one group and one tile (groups {}, tiles {})",
                settings.coarse_groups_per_refresh, settings.fine_tiles_per_refresh
            )));
        }
        let groups = TileGroups::new(grid, settings.group_size)?;
        Ok(Self {
            coarse_window: settings.coarse_window,
            fine_window: settings.fine_window,
            coarse_groups_per_refresh: settings.coarse_groups_per_refresh.min(groups.len()),
            fine_tiles_per_refresh: settings.fine_tiles_per_refresh,
            groups,
        })
    }

    pub fn groups(&self) -> &TileGroups {
        &self.groups
    }

    /// Upper bound on tiles a single frame rebuilds.
    pub fn max_tiles_per_frame(&self) -> usize {
        let largest = (0..self.groups.len())
            .map(|g| self.groups.group(g).len())
            .max()
            .unwrap_or(0);
        (largest * self.coarse_groups_per_refresh).max(self.fine_tiles_per_refresh.min(largest))
    }

    fn decide(&self, frame: u64, state: &SchedulerState) -> RefreshAction {
        if frame.saturating_sub(state.last_refresh_index) >= self.coarse_window {
            let tiles = (0..self.coarse_groups_per_refresh)
                .flat_map(|i| self.groups.group(state.coarse_cursor + i).iter().copied())
                .collect();
            return RefreshAction::Partial {
                level: RefreshLevel::Coarse,
                tiles,
            };
        }
        if frame.saturating_sub(state.last_fine_refresh_index) >= self.fine_window {
            let group = self.groups.group(state.fine_group);
            let start = state.fine_offset.min(group.len());
            let end = (start + self.fine_tiles_per_refresh).min(group.len());
            return RefreshAction::Partial {
                level: RefreshLevel::Fine,
                tiles: group[start..end].to_vec(),
            };
        }
        RefreshAction::None
    }

    fn advance(&self, level: RefreshLevel, frame: u64, state: &mut SchedulerState) {
        let groups = self.groups.len();
        match level {
            RefreshLevel::Coarse => {
                state.last_refresh_index = frame;
                state.last_fine_refresh_index = frame;
                state.coarse_cursor = (state.coarse_cursor + self.coarse_groups_per_refresh) % groups;
            }
            RefreshLevel::Fine => {
                state.last_fine_refresh_index = frame;
                state.fine_offset += self.fine_tiles_per_refresh;
                if state.fine_offset >= self.groups.group(state.fine_group).len() {
                    state.fine_group = (state.fine_group + 1) % groups;
                    state.fine_offset = 0;
                }
            }
        }
    }
}

pub enum RefreshPolicy {
    Periodic(PeriodicRefresh),
    Background(PeriodicRefresh),
    Hierarchical(HierarchicalRefresh),
}

impl RefreshPolicy {
    pub fn from_settings(
        settings: &RefreshSettings,
        grid: &TileGrid,
        seed: Option<u64>,
    ) -> SortResult<Self> {
        Ok(match settings.variant {
            RefreshVariant::Periodic => RefreshPolicy::Periodic(PeriodicRefresh::new(
                settings.window,
                settings.jitter,
                seed,
            )?),
            RefreshVariant::Background => RefreshPolicy::Background(PeriodicRefresh::new(
                settings.window,
                settings.jitter,
                seed,
            )?),
            RefreshVariant::Hierarchical => RefreshPolicy::Hierarchical(HierarchicalRefresh::new(
                grid,
                &settings.hierarchical,
            )?),
        })
    }

    pub fn variant(&self) -> RefreshVariant {
        match self {
            RefreshPolicy::Periodic(_) => RefreshVariant::Periodic,
            RefreshPolicy::Background(_) => RefreshVariant::Background,
            RefreshPolicy::Hierarchical(_) => RefreshVariant::Hierarchical,
        }
    }

    /// Refresh work for a REUSE-eligible `frame`.
    pub fn decide(&mut self, frame: u64, state: &SchedulerState) -> RefreshAction {
        match self {
            RefreshPolicy::Periodic(periodic) => {
                if periodic.is_due(frame, state) {
                    RefreshAction::Full {
                        snapshot: periodic.snapshot(frame),
                    }
                } else {
                    RefreshAction::None
                }
            }
            RefreshPolicy::Background(periodic) => {
                if periodic.is_due(frame, state) {
                    RefreshAction::Background {
                        snapshot: periodic.snapshot(frame),
                    }
                } else {
                    RefreshAction::None
                }
            }
            RefreshPolicy::Hierarchical(hierarchical) => hierarchical.decide(frame, state),
        }
    }

    pub(crate) fn advance(&self, action: &RefreshAction, frame: u64, state: &mut SchedulerState) {
        match (self, action) {
            (_, RefreshAction::None) => {}
            (_, RefreshAction::Full { .. }) | (_, RefreshAction::Background { .. }) => {
                state.last_refresh_index = frame;
            }
            (RefreshPolicy::Hierarchical(hierarchical), RefreshAction::Partial { level, .. }) => {
                hierarchical.advance(*level, frame, state);
            }
            (_, RefreshAction::Partial { .. }) => {
                log::warn!("Partial refresh issued by a non-hierarchical policy; ignoring");
            }
        }
    }
}
