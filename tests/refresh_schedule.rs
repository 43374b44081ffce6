//! Scheduler behaviour observed through a full session: refresh cadence,
//! slot ping-pong, skipped frames, capacity failures and escalation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use glam::Vec3;
use splat_tiles::raster::TileDigestRasterizer;
use splat_tiles::scheduler::RefreshAction;
use splat_tiles::settings::{HierarchicalSettings, RefreshSettings, RefreshVariant};
use splat_tiles::sorting::{verify_generation, TileSortBuilder};
use splat_tiles::splats::{ProjectionRecord, Splat};
use splat_tiles::tiles::ScreenRect;
use splat_tiles::{
    Camera, CpuProjector, Phase, ProjectionProvider, RenderSession, SessionConfig,
    SessionSettings, SlotId, SortError, SortResult, SplatCloud, TileGrid,
};

fn session(splats: SplatCloud, capacity: usize, window: u64) -> RenderSession {
    let provider: Arc<dyn ProjectionProvider> = Arc::new(CpuProjector::new(splats));
    let mut config = SessionConfig::new(TileGrid::new(256, 256, 16), capacity);
    config.refresh = RefreshSettings {
        window,
        ..RefreshSettings::default()
    };
    RenderSession::new(config, provider).unwrap()
}

fn scene() -> SplatCloud {
    SplatCloud::random(400, 1.0, 3)
}

#[test]
fn periodic_refresh_fires_16_times_in_100_frames() {
    let mut session = session(scene(), 512, 6);
    let camera = Camera::default();

    let mut forced = Vec::new();
    for frame in 0..100 {
        let report = session.render_frame(&camera).unwrap();
        match frame {
            0 => assert_eq!(report.phase, Phase::Initial),
            f if f % 6 == 0 => {
                assert_eq!(report.phase, Phase::Initial);
                assert_eq!(report.action, RefreshAction::Full { snapshot: f });
                forced.push(f);
            }
            _ => assert_eq!(report.phase, Phase::Reuse, "frame {frame}"),
        }
    }

    assert_eq!(forced, (1..=16).map(|k| k * 6).collect::<Vec<u64>>());
    let stats = session.stats();
    assert_eq!(stats.forced_refreshes, 16);
    assert_eq!(stats.initial_frames, 17);
    assert_eq!(stats.reuse_frames, 83);
    assert_eq!(stats.escalations, 0);
}

#[test]
fn slots_swap_exactly_once_per_frame() {
    let mut session = session(scene(), 512, 6);
    let mut slots = Vec::new();
    for _ in 0..8 {
        slots.push(session.render_frame(&Camera::default()).unwrap().slot);
    }
    assert_eq!(
        slots,
        vec![
            SlotId::A,
            SlotId::B,
            SlotId::A,
            SlotId::B,
            SlotId::A,
            SlotId::B,
            SlotId::A,
            SlotId::B
        ]
    );
}

#[test]
fn invalid_camera_skips_the_frame() {
    let mut session = session(scene(), 512, 6);
    session.render_frame(&Camera::default()).unwrap();
    let before = session.scheduler_state().clone();

    let broken = Camera {
        eye: Vec3::new(f32::NAN, 0.0, 3.0),
        ..Camera::default()
    };
    assert!(matches!(
        session.render_frame(&broken),
        Err(SortError::InvalidCamera(_))
    ));
    assert_eq!(session.scheduler_state(), &before);
    assert_eq!(session.stats().skipped_frames, 1);

    let report = session.render_frame(&Camera::default()).unwrap();
    assert_eq!(report.frame, 1);
    assert_eq!(report.phase, Phase::Reuse);
    assert_eq!(report.slot, SlotId::B);
}

#[test]
fn overflowing_tile_fails_the_frame_instead_of_truncating() {
    let stacked = SplatCloud::new(
        (0..10)
            .map(|i| Splat {
                position: Vec3::new(0.0, 0.0, i as f32 * 0.01),
                radius: 0.02,
                opacity: 0.5,
                color: [1.0; 3],
            })
            .collect(),
    );
    let mut session = session(stacked, 4, 6);

    let err = session.render_frame(&Camera::default()).unwrap_err();
    assert!(matches!(
        err,
        SortError::CapacityViolation { count: 10, capacity: 4, .. }
    ));
    assert_eq!(session.scheduler_state().frame_index, 0);
    assert!(session.scheduler_state().force_initial);
    assert!(!session.generation(SlotId::A).is_built());
    assert_eq!(session.generation(SlotId::A).entry_count(), 0);

    // Retrying still fails loudly.
    assert!(session.render_frame(&Camera::default()).is_err());
    assert_eq!(session.stats().failed_frames, 2);
}

#[test]
fn large_camera_jump_escalates_without_resetting_the_window() {
    // Spread wide enough to cover the whole screen from both viewpoints.
    let mut session = session(SplatCloud::random(400, 2.0, 3), 512, 6);
    for _ in 0..3 {
        session.render_frame(&Camera::default()).unwrap();
    }

    let side = Camera::orbit(Vec3::ZERO, 3.0, 0.0, 0.0);
    let report = session.render_frame(&side).unwrap();
    assert_eq!(report.frame, 3);
    assert_eq!(report.decided, Phase::Reuse);
    assert_eq!(report.phase, Phase::Initial);
    assert!(report.escalated);
    assert!(report.build.is_some());
    assert_eq!(session.scheduler_state().last_refresh_index, 0);

    let steady = session.render_frame(&side).unwrap();
    assert_eq!(steady.phase, Phase::Reuse);
    assert!(!steady.escalated);

    let stats = session.stats();
    assert_eq!(stats.escalations, 1);
}

#[test]
fn default_settings_describe_an_hd_session() {
    let config = SessionSettings::default().session_config().unwrap();
    assert_eq!(config.grid.tiles_x(), 80);
    assert_eq!(config.grid.tiles_y(), 45);
    assert_eq!(config.grid.tile_count(), 3600);
    assert_eq!(
        config.grid.tile_count() * config.max_element_of_tile,
        3600 * 32768
    );
}

/// Replays a fixed per-frame layout. The frame is read from the camera's
/// x offset.
struct Scripted {
    frames: Vec<Vec<(f32, ScreenRect)>>,
}

impl ProjectionProvider for Scripted {
    fn primitive_count(&self) -> usize {
        self.frames[0].len()
    }

    fn project(
        &self,
        camera: &Camera,
        _grid: &TileGrid,
        records: &mut [ProjectionRecord],
        rects: &mut [ScreenRect],
    ) -> SortResult<()> {
        let frame = camera.eye.x.round() as usize;
        for (i, &(depth, rect)) in self.frames[frame].iter().enumerate() {
            records[i] = ProjectionRecord {
                depth,
                visible: 1,
                ..ProjectionRecord::default()
            };
            rects[i] = rect;
        }
        Ok(())
    }
}

fn rect(min_x: u16, min_y: u16, max_x: u16, max_y: u16) -> ScreenRect {
    ScreenRect {
        min_x,
        min_y,
        max_x,
        max_y,
    }
}

fn shifted(frame: u64) -> Camera {
    Camera::default().translated(Vec3::new(frame as f32, 0.0, 0.0))
}

#[test]
fn merge_overflow_escalates_and_fails_when_the_rebuild_overflows_too() {
    let spread: Vec<(f32, ScreenRect)> = (0..5).map(|i| (1.0 + i as f32, rect(i, 0, i + 1, 1))).collect();
    let stacked: Vec<(f32, ScreenRect)> = (0..5u16).map(|i| (1.0 + i as f32, rect(0, 0, 1, 1))).collect();
    let provider: Arc<dyn ProjectionProvider> = Arc::new(Scripted {
        frames: vec![spread, stacked],
    });
    let mut session =
        RenderSession::new(SessionConfig::new(TileGrid::new(64, 64, 16), 4), provider).unwrap();

    let first = session.render_frame(&shifted(0)).unwrap();
    assert_eq!(first.phase, Phase::Initial);

    let err = session.render_frame(&shifted(1)).unwrap_err();
    assert_eq!(
        err,
        SortError::CapacityViolation {
            tile: 0,
            count: 5,
            capacity: 4
        }
    );
    let stats = session.stats();
    assert_eq!(stats.escalations, 1);
    assert_eq!(stats.failed_frames, 1);
    assert_eq!(stats.frames, 1);
    let state = session.scheduler_state();
    assert_eq!(state.frame_index, 1);
    assert!(state.force_initial);
    assert_eq!(session.current_generation().built_from(), Some(0));
    assert!(!session.generation(SlotId::B).is_built());
}

/// Fails any projection of a camera it has already projected while armed,
/// as a device would when re-running an old snapshot goes wrong.
struct FailsOnReprojection {
    inner: CpuProjector,
    seen: Mutex<Vec<Camera>>,
    armed: AtomicBool,
}

impl ProjectionProvider for FailsOnReprojection {
    fn primitive_count(&self) -> usize {
        self.inner.primitive_count()
    }

    fn project(
        &self,
        camera: &Camera,
        grid: &TileGrid,
        records: &mut [ProjectionRecord],
        rects: &mut [ScreenRect],
    ) -> SortResult<()> {
        let mut seen = self.seen.lock().unwrap();
        if self.armed.load(Ordering::SeqCst) && seen.contains(camera) {
            return Err(SortError::InvalidCamera("reprojection failed".into()));
        }
        seen.push(*camera);
        self.inner.project(camera, grid, records, rects)
    }
}

#[test]
fn failed_snapshot_refresh_keeps_the_committed_generation() {
    let provider = Arc::new(FailsOnReprojection {
        inner: CpuProjector::new(scene()),
        seen: Mutex::new(Vec::new()),
        armed: AtomicBool::new(true),
    });
    let mut config = SessionConfig::new(TileGrid::new(256, 256, 16), 512);
    config.refresh = RefreshSettings {
        window: 6,
        jitter: 3,
        ..RefreshSettings::default()
    };
    config.seed = Some(5);
    let mut session =
        RenderSession::new(config, Arc::clone(&provider) as Arc<dyn ProjectionProvider>).unwrap();
    let panned =
        |frame: u64| Camera::default().translated(Vec3::new(0.002 * frame as f32, 0.0, 0.0));

    let mut failures = 0;
    for frame in 0..60 {
        let camera = panned(frame);
        match session.render_frame(&camera) {
            Ok(report) => assert_eq!(report.frame, frame),
            Err(err) => {
                failures += 1;
                assert!(matches!(err, SortError::InvalidCamera(_)));
                assert_eq!(session.scheduler_state().frame_index, frame);

                let committed = session.current_generation();
                assert_eq!(committed.built_from(), Some(frame - 1));
                assert!(committed.entry_count() > 0);
                verify_generation(committed).unwrap();

                provider.armed.store(false, Ordering::SeqCst);
                let retry = session.render_frame(&camera).unwrap();
                assert_eq!(retry.frame, frame);
                assert_eq!(retry.phase, Phase::Initial);
            }
        }
    }
    assert_eq!(failures, 1);
    assert_eq!(session.stats().failed_frames, 1);
}

fn config_error(config: SessionConfig) -> SortError {
    let provider: Arc<dyn ProjectionProvider> = Arc::new(CpuProjector::new(scene()));
    match RenderSession::new(config, provider) {
        Ok(_) => panic!("session accepted an invalid config"),
        Err(err) => err,
    }
}

#[test]
fn invalid_configs_are_errors_not_panics() {
    let grid = TileGrid::new(256, 256, 16);

    let mut zero_window = SessionConfig::new(grid, 512);
    zero_window.refresh.window = 0;
    assert!(matches!(config_error(zero_window), SortError::InvalidConfig(_)));

    let mut zero_group = SessionConfig::new(grid, 512);
    zero_group.refresh = RefreshSettings {
        variant: RefreshVariant::Hierarchical,
        hierarchical: HierarchicalSettings {
            group_size: 0,
            ..HierarchicalSettings::default()
        },
        ..RefreshSettings::default()
    };
    assert!(matches!(config_error(zero_group), SortError::InvalidConfig(_)));

    let zero_capacity = SessionConfig::new(grid, 0);
    assert!(matches!(config_error(zero_capacity), SortError::InvalidConfig(_)));

    let provider: Arc<dyn ProjectionProvider> = Arc::new(CpuProjector::new(scene()));
    let mismatched = RenderSession::with_parts(
        SessionConfig::new(grid, 512),
        provider,
        TileSortBuilder::new(TileGrid::new(128, 128, 16), 512),
        Box::new(TileDigestRasterizer),
    );
    assert!(matches!(mismatched, Err(SortError::InvalidConfig(_))));
}
