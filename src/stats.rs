use std::collections::VecDeque;
use std::time::Duration;

use crate::scheduler::Phase;

const DEFAULT_HISTORY_FRAMES: usize = 240;

/// Host-side time spent in each stage of one frame, in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameTimings {
    pub project: f32,
    pub build: f32,
    pub merge: f32,
    pub raster: f32,
}

impl FrameTimings {
    pub fn total(&self) -> f32 {
        self.project + self.build + self.merge + self.raster
    }
}

pub(crate) fn millis(duration: Duration) -> f32 {
    duration.as_secs_f32() * 1000.0
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FrameSample {
    pub frame: u64,
    pub phase: Option<Phase>,
    pub timings: FrameTimings,
}

/// Counters over a session plus a rolling window of recent frame timings.
#[derive(Clone, Debug)]
pub struct SessionStats {
    pub frames: u64,
    pub initial_frames: u64,
    pub reuse_frames: u64,
    pub forced_refreshes: u64,
    /// Full rebuilds attempted after a merge, including ones that failed.
    pub escalations: u64,
    pub background_installs: u64,
    /// Background refreshes dropped because a rebuild was still running.
    pub background_skips: u64,
    pub partial_refreshes: u64,
    pub partially_refreshed_tiles: u64,
    pub skipped_frames: u64,
    pub failed_frames: u64,
    samples: VecDeque<FrameSample>,
    max_history: usize,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::with_history(DEFAULT_HISTORY_FRAMES)
    }

    pub fn with_history(max_history: usize) -> Self {
        Self {
            frames: 0,
            initial_frames: 0,
            reuse_frames: 0,
            forced_refreshes: 0,
            escalations: 0,
            background_installs: 0,
            background_skips: 0,
            partial_refreshes: 0,
            partially_refreshed_tiles: 0,
            skipped_frames: 0,
            failed_frames: 0,
            samples: VecDeque::with_capacity(max_history),
            max_history: max_history.max(1),
        }
    }

    pub fn record(&mut self, frame: u64, phase: Phase, timings: FrameTimings) {
        self.frames += 1;
        match phase {
            Phase::Initial => self.initial_frames += 1,
            Phase::Reuse => self.reuse_frames += 1,
        }
        self.samples.push_back(FrameSample {
            frame,
            phase: Some(phase),
            timings,
        });
        while self.samples.len() > self.max_history {
            self.samples.pop_front();
        }
    }

    pub fn samples(&self) -> impl Iterator<Item = &FrameSample> {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<FrameSample> {
        self.samples.back().copied()
    }

    /// Mean timings over the retained window, skipping frame 0 whose full
    /// build would skew the steady-state figures.
    pub fn average_timings(&self) -> FrameTimings {
        let mut sum = FrameTimings::default();
        let mut count = 0usize;
        for sample in self.samples.iter().filter(|s| s.frame > 0) {
            sum.project += sample.timings.project;
            sum.build += sample.timings.build;
            sum.merge += sample.timings.merge;
            sum.raster += sample.timings.raster;
            count += 1;
        }
        if count == 0 {
            return FrameTimings::default();
        }
        let n = count as f32;
        FrameTimings {
            project: sum.project / n,
            build: sum.build / n,
            merge: sum.merge / n,
            raster: sum.raster / n,
        }
    }

    pub fn average_fps(&self) -> f32 {
        let frame_time = self.average_timings().total();
        if frame_time > 0.0 {
            1000.0 / frame_time
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        let avg = self.average_timings();
        log::info!(
            "{} frames: {} initial ({} forced, {} escalated), {} reuse, {} background installs ({} skipped), {} partial refreshes over {} tiles, {} skipped, {} failed",
            self.frames,
            self.initial_frames,
            self.forced_refreshes,
            self.escalations,
            self.reuse_frames,
            self.background_installs,
            self.background_skips,
            self.partial_refreshes,
            self.partially_refreshed_tiles,
            self.skipped_frames,
            self.failed_frames
        );
        log::info!(
            "Average frame {:.3} ms ({:.1} fps): project {:.3} ms, build {:.3} ms, merge {:.3} ms, raster {:.3} ms",
            avg.total(),
            self.average_fps(),
            avg.project,
            avg.build,
            avg.merge,
            avg.raster
        );
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timings(ms: f32) -> FrameTimings {
        FrameTimings {
            project: ms,
            build: 0.0,
            merge: ms,
            raster: 0.0,
        }
    }

    #[test]
    fn averages_skip_the_first_frame() {
        let mut stats = SessionStats::new();
        stats.record(0, Phase::Initial, timings(100.0));
        stats.record(1, Phase::Reuse, timings(1.0));
        stats.record(2, Phase::Reuse, timings(3.0));

        assert_eq!(stats.frames, 3);
        assert_eq!(stats.initial_frames, 1);
        assert_eq!(stats.reuse_frames, 2);
        assert_eq!(stats.average_timings().total(), 4.0);
        assert_eq!(stats.average_fps(), 250.0);
    }

    #[test]
    fn history_is_bounded() {
        let mut stats = SessionStats::with_history(4);
        for frame in 0..10 {
            stats.record(frame, Phase::Reuse, timings(1.0));
        }
        assert_eq!(stats.samples().count(), 4);
        assert_eq!(stats.latest().map(|s| s.frame), Some(9));
    }

    #[test]
    fn empty_stats_report_zero() {
        let stats = SessionStats::default();
        assert_eq!(stats.average_fps(), 0.0);
        assert_eq!(stats.average_timings(), FrameTimings::default());
    }
}
