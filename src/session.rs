//! Frame loop driver: projection, scheduling, build or merge, rasterize.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use crate::camera::Camera;
use crate::error::{SortError, SortResult};
use crate::generation::{GenerationArena, GenerationBuffer, SlotId};
use crate::raster::{FrameDigest, Rasterizer, TileDigestRasterizer};
use crate::scheduler::background::CompletedRefresh;
use crate::scheduler::{
    BackgroundRefresh, FrameDecision, FrameScheduler, Phase, RefreshAction, RefreshPolicy,
    SchedulerState,
};
use crate::settings::{RefreshVariant, SessionConfig};
use crate::sorting::{
    verify_generation, BuildReport, MergeOutcome, MergeReport, MergeStep, TileSortBuilder,
};
use crate::splats::ProjectionProvider;
use crate::stats::{millis, FrameTimings, SessionStats};

#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub frame: u64,
    /// Phase actually executed.
    pub phase: Phase,
    /// Phase the scheduler decided before any escalation.
    pub decided: Phase,
    pub escalated: bool,
    pub action: RefreshAction,
    pub slot: SlotId,
    pub build: Option<BuildReport>,
    pub merge: Option<MergeReport>,
    /// Snapshot frame of a background generation installed as previous.
    pub installed: Option<u64>,
    pub digest: FrameDigest,
    pub timings: FrameTimings,
}

/// How the current generation got its sorted index.
#[derive(Default)]
struct Produced {
    build: Option<BuildReport>,
    merge: Option<MergeReport>,
    escalated: bool,
}

/// Which spare buffer a displaced generation belongs to.
enum SpareOwner {
    Snapshot,
    Background,
}

/// Last committed generation swapped out of the previous slot during a
/// frame. Held until the frame commits so an abort can put it back.
struct Displaced {
    buffer: GenerationBuffer,
    owner: SpareOwner,
}

pub struct RenderSession {
    config: SessionConfig,
    provider: Arc<dyn ProjectionProvider>,
    builder: TileSortBuilder,
    merge: MergeStep,
    arena: GenerationArena,
    scheduler: FrameScheduler,
    rasterizer: Box<dyn Rasterizer>,
    cameras: VecDeque<(u64, Camera)>,
    camera_history: usize,
    background: Option<BackgroundRefresh>,
    /// Background rebuild collected by [`RenderSession::wait_for_background`].
    pending: Option<CompletedRefresh>,
    /// Submit failure reported by the next frame.
    background_error: Option<SortError>,
    /// Target of jittered snapshot rebuilds.
    spare: Option<GenerationBuffer>,
    displaced: Option<Displaced>,
    stats: SessionStats,
}

impl RenderSession {
    pub fn new(config: SessionConfig, provider: Arc<dyn ProjectionProvider>) -> SortResult<Self> {
        let builder = TileSortBuilder::new(config.grid, config.max_element_of_tile);
        Self::with_parts(config, provider, builder, Box::new(TileDigestRasterizer))
    }

    pub fn with_parts(
        config: SessionConfig,
        provider: Arc<dyn ProjectionProvider>,
        builder: TileSortBuilder,
        rasterizer: Box<dyn Rasterizer>,
    ) -> SortResult<Self> {
        if builder.grid() != &config.grid {
            return Err(SortError::InvalidConfig(format!(
                "builder grid {}x{} does not match session grid {}x{}",
                builder.grid().tiles_x(),
                builder.grid().tiles_y(),
                config.grid.tiles_x(),
                config.grid.tiles_y()
            )));
        }
        if config.max_element_of_tile == 0 {
            return Err(SortError::InvalidConfig(
                "max_element_of_tile must be at least 1".into(),
            ));
        }
        let grid = config.grid;
        let primitives = provider.primitive_count();
        let policy = RefreshPolicy::from_settings(&config.refresh, &grid, config.seed)?;
        let arena = GenerationArena::new(primitives, &grid, config.max_element_of_tile);
        let merge = MergeStep::for_builder(&builder, config.max_element_of_tile, config.merge);

        let background = match policy.variant() {
            RefreshVariant::Background => Some(BackgroundRefresh::spawn(
                Arc::clone(&provider),
                builder.clone(),
                GenerationBuffer::new(primitives, &grid, config.max_element_of_tile),
            )?),
            _ => None,
        };
        let spare = match policy.variant() {
            RefreshVariant::Periodic if config.refresh.jitter > 0 => Some(GenerationBuffer::new(
                primitives,
                &grid,
                config.max_element_of_tile,
            )),
            _ => None,
        };

        log::info!(
            "Session: {}x{} px, {}x{} tiles of {} px ({} total), {} primitives",
            grid.width(),
            grid.height(),
            grid.tiles_x(),
            grid.tiles_y(),
            grid.tile_size(),
            grid.tile_count(),
            primitives
        );
        log::info!(
            "Capacity {} entries per tile, {} entries per generation; {:?} refresh, window {}, jitter {}",
            config.max_element_of_tile,
            arena.slot(SlotId::A).entry_capacity(),
            policy.variant(),
            config.refresh.window,
            config.refresh.jitter
        );

        let camera_history = config.refresh.jitter as usize + 1;
        Ok(Self {
            config,
            provider,
            builder,
            merge,
            arena,
            scheduler: FrameScheduler::new(policy),
            rasterizer,
            cameras: VecDeque::with_capacity(camera_history),
            camera_history,
            background,
            pending: None,
            background_error: None,
            spare,
            displaced: None,
            stats: SessionStats::new(),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn scheduler_state(&self) -> &SchedulerState {
        self.scheduler.state()
    }

    pub fn generation(&self, slot: SlotId) -> &GenerationBuffer {
        self.arena.slot(slot)
    }

    /// Generation produced by the last successful frame.
    pub fn current_generation(&self) -> &GenerationBuffer {
        self.arena.slot(self.scheduler.state().current)
    }

    /// Renders the next frame from `camera`.
    ///
    /// An invalid camera skips the frame: nothing is committed and the
    /// slots are not swapped. Any other error aborts the frame, leaves the
    /// last committed generation in place and forces the next frame to a
    /// full rebuild.
    pub fn render_frame(&mut self, camera: &Camera) -> SortResult<FrameReport> {
        if let Err(err) = camera.validate() {
            self.stats.skipped_frames += 1;
            log::warn!(
                "Skipping frame {}: {}",
                self.scheduler.state().frame_index,
                err
            );
            return Err(err);
        }

        let decision = self.scheduler.begin_frame();
        match self.execute(&decision, camera) {
            Ok(report) => {
                self.scheduler.commit(&decision, report.phase);
                self.release_displaced();
                self.remember_camera(decision.frame, *camera);
                if let RefreshAction::Background { snapshot } = decision.action {
                    self.submit_background(decision.frame, snapshot, camera);
                }
                self.record(&report);
                Ok(report)
            }
            Err(err) => {
                log::error!("Frame {} failed: {}", decision.frame, err);
                self.arena.slot_mut(decision.current).invalidate();
                self.restore_displaced(decision.previous);
                self.scheduler.abort(&decision);
                self.stats.failed_frames += 1;
                Err(err)
            }
        }
    }

    /// Blocks until a running background rebuild finishes. Its result is
    /// installed by the next frame. Frames never call this themselves.
    pub fn wait_for_background(&mut self) -> SortResult<()> {
        let Some(background) = self.background.as_mut() else {
            return Ok(());
        };
        if self.pending.is_none() {
            self.pending = background.wait()?;
        }
        Ok(())
    }

    fn execute(&mut self, decision: &FrameDecision, camera: &Camera) -> SortResult<FrameReport> {
        let mut timings = FrameTimings::default();
        let installed = self.install_background(decision)?;

        let start = Instant::now();
        {
            let current = self.arena.slot_mut(decision.current);
            let (records, rects) = current.projection_mut();
            self.provider
                .project(camera, &self.config.grid, records, rects)?;
        }
        timings.project = millis(start.elapsed());

        let produced = match (decision.phase, &decision.action) {
            (Phase::Initial, RefreshAction::Full { snapshot }) if *snapshot != decision.frame => {
                self.refresh_from_snapshot(decision, *snapshot, camera, &mut timings)?
            }
            (Phase::Initial, action) => {
                if matches!(action, RefreshAction::Full { .. }) {
                    log::info!("Frame {}: forced refresh", decision.frame);
                }
                Produced {
                    build: Some(self.build_current(decision, &mut timings)?),
                    ..Produced::default()
                }
            }
            (Phase::Reuse, action) => {
                if let RefreshAction::Partial { level, tiles } = action {
                    log::debug!(
                        "Frame {}: {:?} partial refresh of {} tiles",
                        decision.frame,
                        level,
                        tiles.len()
                    );
                }
                self.merge_or_escalate(decision, action.forced_tiles(), &mut timings)?
            }
        };

        debug_assert_eq!(
            verify_generation(self.arena.slot(decision.current)),
            Ok(()),
            "frame {} produced an invalid generation",
            decision.frame
        );

        let start = Instant::now();
        let digest = self
            .rasterizer
            .rasterize(self.arena.slot(decision.current), camera);
        timings.raster = millis(start.elapsed());

        let phase = if produced.escalated {
            Phase::Initial
        } else {
            decision.phase
        };
        Ok(FrameReport {
            frame: decision.frame,
            phase,
            decided: decision.phase,
            escalated: produced.escalated,
            action: decision.action.clone(),
            slot: decision.current,
            build: produced.build,
            merge: produced.merge,
            installed,
            digest,
            timings,
        })
    }

    fn build_current(
        &mut self,
        decision: &FrameDecision,
        timings: &mut FrameTimings,
    ) -> SortResult<BuildReport> {
        let start = Instant::now();
        let result = self
            .builder
            .build(decision.frame, self.arena.slot_mut(decision.current));
        timings.build += millis(start.elapsed());
        result
    }

    /// Reuse merge, escalated to a full rebuild when the merge overflows a
    /// tile or touches too much of the screen.
    fn merge_or_escalate(
        &mut self,
        decision: &FrameDecision,
        forced: &[u32],
        timings: &mut FrameTimings,
    ) -> SortResult<Produced> {
        let start = Instant::now();
        let (previous, current) = self.arena.pair_mut(decision.previous, decision.current);
        let merged = self.merge.merge(decision.frame, previous, current, forced);
        timings.merge += millis(start.elapsed());

        let (merge, reason) = match merged {
            Ok(report) if report.outcome == MergeOutcome::Merged => {
                return Ok(Produced {
                    merge: Some(report),
                    ..Produced::default()
                });
            }
            Ok(report) => {
                let reason = format!(
                    "{} of {} tiles touched",
                    report.touched_tiles,
                    self.config.grid.tile_count()
                );
                (Some(report), reason)
            }
            Err(err) if err.is_capacity_violation() => (None, err.to_string()),
            Err(err) => return Err(err),
        };

        log::info!(
            "Frame {}: escalating to full rebuild ({})",
            decision.frame,
            reason
        );
        self.stats.escalations += 1;
        let build = self.build_current(decision, timings)?;
        Ok(Produced {
            build: Some(build),
            merge,
            escalated: true,
        })
    }

    /// Periodic refresh against an older camera: rebuild a spare generation
    /// from the snapshot, swap it in as previous, then merge it forward to
    /// this frame. The committed generation is only displaced once the
    /// snapshot rebuild succeeded.
    fn refresh_from_snapshot(
        &mut self,
        decision: &FrameDecision,
        snapshot: u64,
        camera: &Camera,
        timings: &mut FrameTimings,
    ) -> SortResult<Produced> {
        let snapshot_camera = self.snapshot_camera(snapshot, camera);
        log::info!(
            "Frame {}: forced refresh from the camera of frame {}",
            decision.frame,
            snapshot
        );

        let mut spare = match self.spare.take() {
            Some(buffer) => buffer,
            None => GenerationBuffer::new(
                self.provider.primitive_count(),
                &self.config.grid,
                self.config.max_element_of_tile,
            ),
        };
        let start = Instant::now();
        let rebuilt = self.builder.rebuild(
            self.provider.as_ref(),
            &snapshot_camera,
            snapshot,
            &mut spare,
        );
        timings.build += millis(start.elapsed());

        match rebuilt {
            Ok(report) => {
                self.arena.exchange(decision.previous, &mut spare);
                self.displaced = Some(Displaced {
                    buffer: spare,
                    owner: SpareOwner::Snapshot,
                });
                let mut produced = self.merge_or_escalate(decision, &[], timings)?;
                if produced.build.is_none() {
                    produced.build = Some(report);
                }
                Ok(produced)
            }
            Err(err) if err.is_capacity_violation() => {
                self.spare = Some(spare);
                log::info!(
                    "Frame {}: snapshot rebuild failed ({}), rebuilding from this frame's camera",
                    decision.frame,
                    err
                );
                self.stats.escalations += 1;
                Ok(Produced {
                    build: Some(self.build_current(decision, timings)?),
                    merge: None,
                    escalated: true,
                })
            }
            Err(err) => {
                self.spare = Some(spare);
                Err(err)
            }
        }
    }

    fn install_background(&mut self, decision: &FrameDecision) -> SortResult<Option<u64>> {
        if let Some(err) = self.background_error.take() {
            return Err(err);
        }
        let Some(background) = self.background.as_mut() else {
            return Ok(None);
        };
        let completed = match self.pending.take() {
            Some(completed) => completed,
            None => match background.poll()? {
                Some(completed) => completed,
                None => return Ok(None),
            },
        };

        let CompletedRefresh {
            frame,
            snapshot,
            mut buffer,
            result,
        } = completed;
        match result {
            Ok(report) => {
                self.arena.exchange(decision.previous, &mut buffer);
                self.displaced = Some(Displaced {
                    buffer,
                    owner: SpareOwner::Background,
                });
                log::info!(
                    "Frame {}: installed background generation (queued at frame {}, camera of frame {}, {} entries)",
                    decision.frame,
                    frame,
                    snapshot,
                    report.entries
                );
                Ok(Some(snapshot))
            }
            Err(err) => {
                background.restore(buffer);
                Err(err)
            }
        }
    }

    /// Queues a background rebuild after `frame` committed. A failure to
    /// reach the worker fails the next frame.
    fn submit_background(&mut self, frame: u64, snapshot: u64, camera: &Camera) {
        let snapshot_camera = self.snapshot_camera(snapshot, camera);
        let Some(background) = self.background.as_mut() else {
            return;
        };
        match background.submit(frame, snapshot, snapshot_camera) {
            Ok(true) => log::info!(
                "Frame {}: queued background refresh from the camera of frame {}",
                frame,
                snapshot
            ),
            Ok(false) => {
                self.stats.background_skips += 1;
                log::warn!(
                    "Frame {}: background refresh still running, skipping this one",
                    frame
                );
            }
            Err(err) => {
                log::error!("Frame {}: could not queue background refresh: {}", frame, err);
                self.background_error = Some(err);
            }
        }
    }

    /// Hands the displaced generation's buffer back to its owner.
    fn release_displaced(&mut self) {
        let Some(Displaced { buffer, owner }) = self.displaced.take() else {
            return;
        };
        match owner {
            SpareOwner::Snapshot => self.spare = Some(buffer),
            SpareOwner::Background => {
                if let Some(background) = self.background.as_mut() {
                    background.restore(buffer);
                }
            }
        }
    }

    /// Puts the last committed generation back into `previous` after an
    /// aborted frame. The generation swapped in for the frame is dropped.
    fn restore_displaced(&mut self, previous: SlotId) {
        if let Some(displaced) = self.displaced.as_mut() {
            self.arena.exchange(previous, &mut displaced.buffer);
            displaced.buffer.invalidate();
            log::warn!("Restored the last committed generation after a failed frame");
        }
        self.release_displaced();
    }

    /// Camera of `snapshot`, or `fallback` when it is this frame (or no
    /// longer retained).
    fn snapshot_camera(&self, snapshot: u64, fallback: &Camera) -> Camera {
        self.cameras
            .iter()
            .find(|(frame, _)| *frame == snapshot)
            .map(|(_, camera)| *camera)
            .unwrap_or(*fallback)
    }

    fn remember_camera(&mut self, frame: u64, camera: Camera) {
        self.cameras.push_back((frame, camera));
        while self.cameras.len() > self.camera_history {
            self.cameras.pop_front();
        }
    }

    fn record(&mut self, report: &FrameReport) {
        self.stats
            .record(report.frame, report.phase, report.timings);
        if report.installed.is_some() {
            self.stats.background_installs += 1;
        }
        match &report.action {
            RefreshAction::Full { .. } | RefreshAction::Background { .. } => {
                self.stats.forced_refreshes += 1
            }
            RefreshAction::Partial { tiles, .. } => {
                self.stats.partial_refreshes += 1;
                self.stats.partially_refreshed_tiles += tiles.len() as u64;
            }
            RefreshAction::None => {}
        }
        log::debug!(
            "Frame {} {:?}{}: {} entries in {} tiles, {:.3} ms",
            report.frame,
            report.phase,
            if report.escalated { " (escalated)" } else { "" },
            report.digest.entries,
            report.digest.populated_tiles,
            report.timings.total()
        );
    }
}
