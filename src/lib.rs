pub mod camera;
pub mod error;
pub mod generation;
pub mod raster;
pub mod scheduler;
pub mod session;
pub mod settings;
pub mod sorting;
pub mod splats;
pub mod stats;
pub mod tiles;

pub use camera::Camera;
pub use error::{SortError, SortResult};
pub use generation::{GenerationArena, GenerationBuffer, SlotId};
pub use scheduler::{Phase, RefreshAction};
pub use session::{FrameReport, RenderSession};
pub use settings::{SessionConfig, SessionSettings};
pub use splats::{CpuProjector, ProjectionProvider, SplatCloud};
pub use stats::SessionStats;
pub use tiles::TileGrid;

use std::sync::Arc;

use glam::Vec3;

/// Half extent of the cube the demo cloud is scattered in.
const DEMO_SCENE_HALF_SIZE: f32 = 2.0;

pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

/// Renders the demo pan described by `settings` and returns the session
/// statistics.
pub fn run(settings: SessionSettings) -> SortResult<SessionStats> {
    init_logging();

    let demo = settings.demo;
    log::info!(
        "Starting splat tile demo: {} splats, {} frames",
        demo.splats,
        demo.frames
    );

    let cloud = SplatCloud::random(demo.splats, DEMO_SCENE_HALF_SIZE, settings.seed.unwrap_or(0));
    let provider: Arc<dyn ProjectionProvider> = Arc::new(CpuProjector::new(cloud));
    let mut session = RenderSession::new(settings.session_config()?, provider)?;

    let base = Camera {
        eye: Vec3::new(0.0, 0.0, demo.distance),
        ..Camera::default()
    };
    for i in 0..demo.frames {
        let phase = std::f32::consts::TAU * i as f32 / demo.pan_period as f32;
        let camera = base.translated(Vec3::new(demo.pan_amplitude * phase.sin(), 0.0, 0.0));
        match session.render_frame(&camera) {
            Ok(_) => {}
            // A rebuild that overflows means the per-tile capacity is
            // misconfigured for this scene.
            Err(err) if err.is_capacity_violation() => {
                log::error!("Stopping demo: {}", err);
                return Err(err);
            }
            Err(_) => {}
        }
    }

    session.stats().log_summary();
    log::info!("Demo complete");
    Ok(session.stats().clone())
}
