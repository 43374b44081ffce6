//! Per-frame INITIAL/REUSE state machine.
//!
//! The scheduler owns the slot flag of the generation arena. Every frame
//! renders into the slot opposite to the last committed one, so previous
//! and current never alias and each committed frame performs exactly one
//! swap. Frames that fail are aborted: nothing advances and the next frame
//! is forced to a full rebuild.

pub mod background;
pub mod policy;

pub use background::BackgroundRefresh;
pub use policy::{
    HierarchicalRefresh, PeriodicRefresh, RefreshAction, RefreshLevel, RefreshPolicy, TileGroups,
};

use crate::generation::SlotId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Full rebuild of the sorted index.
    Initial,
    /// Incremental merge from the previous generation.
    Reuse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerState {
    /// Phase the last committed frame executed.
    pub phase: Phase,
    /// Index of the next frame to render.
    pub frame_index: u64,
    pub last_refresh_index: u64,
    /// Slot holding the last committed generation.
    pub current: SlotId,
    pub force_initial: bool,
    pub last_fine_refresh_index: u64,
    pub coarse_cursor: usize,
    pub fine_group: usize,
    pub fine_offset: usize,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self {
            phase: Phase::Initial,
            frame_index: 0,
            last_refresh_index: 0,
            // Frame 0 renders into A.
            current: SlotId::B,
            force_initial: false,
            last_fine_refresh_index: 0,
            coarse_cursor: 0,
            fine_group: 0,
            fine_offset: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDecision {
    pub frame: u64,
    pub phase: Phase,
    pub previous: SlotId,
    pub current: SlotId,
    pub action: RefreshAction,
}

pub struct FrameScheduler {
    policy: RefreshPolicy,
    state: SchedulerState,
}

impl FrameScheduler {
    pub fn new(policy: RefreshPolicy) -> Self {
        Self {
            policy,
            state: SchedulerState::default(),
        }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// Decides how the next frame is produced. Does not change the
    /// schedule until [`FrameScheduler::commit`].
    pub fn begin_frame(&mut self) -> FrameDecision {
        let frame = self.state.frame_index;
        let previous = self.state.current;
        let current = previous.other();

        let (phase, action) = if frame == 0 || self.state.force_initial {
            (Phase::Initial, RefreshAction::None)
        } else {
            let action = self.policy.decide(frame, &self.state);
            let phase = match action {
                RefreshAction::Full { .. } => Phase::Initial,
                _ => Phase::Reuse,
            };
            (phase, action)
        };

        log::debug!(
            "Frame {}: {:?} into {:?} (previous {:?}), refresh {:?}",
            frame,
            phase,
            current,
            previous,
            action
        );
        FrameDecision {
            frame,
            phase,
            previous,
            current,
            action,
        }
    }

    /// Marks `decision` as rendered. `executed` is the phase actually run,
    /// which differs from the decided one when a merge escalated.
    pub fn commit(&mut self, decision: &FrameDecision, executed: Phase) {
        debug_assert_eq!(decision.frame, self.state.frame_index);
        if decision.phase == Phase::Initial && decision.action == RefreshAction::None {
            self.state.last_refresh_index = decision.frame;
            self.state.last_fine_refresh_index = decision.frame;
        }
        self.policy
            .advance(&decision.action, decision.frame, &mut self.state);

        self.state.phase = executed;
        self.state.current = decision.current;
        self.state.frame_index += 1;
        self.state.force_initial = false;
    }

    /// Drops `decision` without rendering. The slot flag and frame index
    /// stay put and the next frame rebuilds from scratch.
    pub fn abort(&mut self, decision: &FrameDecision) {
        log::warn!(
            "Frame {} aborted; next frame will rebuild from scratch",
            decision.frame
        );
        self.state.force_initial = true;
    }
}
