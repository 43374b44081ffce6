use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::SortResult;
use crate::sorting::MergeParams;
use crate::tiles::TileGrid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default = "SessionSettings::default_tile_size")]
    pub tile_size: u32,
    #[serde(default = "SessionSettings::default_max_element_of_tile")]
    pub max_element_of_tile: usize,
    #[serde(default)]
    pub refresh: RefreshSettings,
    #[serde(default)]
    pub merge: MergeSettings,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub demo: DemoSettings,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            tile_size: Self::default_tile_size(),
            max_element_of_tile: Self::default_max_element_of_tile(),
            refresh: RefreshSettings::default(),
            merge: MergeSettings::default(),
            seed: None,
            demo: DemoSettings::default(),
        }
    }
}

impl SessionSettings {
    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<SessionSettings>(&contents) {
                Ok(settings) => {
                    info!("Loaded session settings from {:?}", path);
                    settings.validate()
                }
                Err(err) => {
                    warn!(
                        "Failed to parse {:?} ({}). Falling back to default session settings.",
                        path, err
                    );
                    SessionSettings::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Session settings file {:?} not found. Using default settings.",
                    path
                );
                SessionSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default session settings.",
                    path, err
                );
                SessionSettings::default()
            }
        }
    }

    pub fn validate(mut self) -> Self {
        let (width, height) = self.resolution.dimensions();
        if width == 0 || height == 0 {
            warn!("Resolution must be greater than zero. Using default resolution.");
            self.resolution = Resolution::default();
        }

        if self.tile_size == 0 {
            warn!("Tile size must be greater than zero. Using default value.");
            self.tile_size = Self::default_tile_size();
        }

        if self.max_element_of_tile == 0 {
            warn!("Per-tile capacity must be greater than zero. Using default value.");
            self.max_element_of_tile = Self::default_max_element_of_tile();
        }

        self.refresh = self.refresh.validate();
        self.merge = self.merge.validate();

        if self.demo.frames == 0 {
            warn!("Demo frame count must be greater than zero. Using default value.");
            self.demo.frames = DemoSettings::default().frames;
        }

        if self.demo.pan_period == 0 {
            warn!("Demo pan period must be greater than zero. Using default value.");
            self.demo.pan_period = DemoSettings::default().pan_period;
        }

        self
    }

    /// Immutable per-session configuration derived from these settings.
    pub fn session_config(&self) -> SortResult<SessionConfig> {
        let (width, height) = self.resolution.dimensions();
        Ok(SessionConfig {
            grid: TileGrid::try_new(width, height, self.tile_size)?,
            max_element_of_tile: self.max_element_of_tile,
            refresh: self.refresh.clone(),
            merge: MergeParams {
                max_touched_fraction: self.merge.max_touched_fraction,
                depth_tolerance: self.merge.depth_tolerance,
            },
            seed: self.seed,
        })
    }

    const fn default_tile_size() -> u32 {
        16
    }

    const fn default_max_element_of_tile() -> usize {
        32768
    }
}

/// Configuration handed to a session at construction; never mutated
/// afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub grid: TileGrid,
    pub max_element_of_tile: usize,
    pub refresh: RefreshSettings,
    pub merge: MergeParams,
    pub seed: Option<u64>,
}

impl SessionConfig {
    pub fn new(grid: TileGrid, max_element_of_tile: usize) -> Self {
        Self {
            grid,
            max_element_of_tile,
            refresh: RefreshSettings::default(),
            merge: MergeParams::default(),
            seed: None,
        }
    }
}

/// Either explicit dimensions or one of the named presets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Resolution {
    Preset(ResolutionPreset),
    Explicit { width: u32, height: u32 },
}

impl Resolution {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Resolution::Preset(preset) => preset.dimensions(),
            Resolution::Explicit { width, height } => (*width, *height),
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution::Preset(ResolutionPreset::Hd)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPreset {
    Hd,
    Fhd,
    Qhd,
}

impl ResolutionPreset {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            ResolutionPreset::Hd => (1280, 720),
            ResolutionPreset::Fhd => (1920, 1080),
            ResolutionPreset::Qhd => (2560, 1440),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshVariant {
    #[default]
    Periodic,
    Background,
    Hierarchical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshSettings {
    #[serde(default = "RefreshSettings::default_window")]
    pub window: u64,
    #[serde(default)]
    pub jitter: u64,
    #[serde(default)]
    pub variant: RefreshVariant,
    #[serde(default)]
    pub hierarchical: HierarchicalSettings,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            window: Self::default_window(),
            jitter: 0,
            variant: RefreshVariant::default(),
            hierarchical: HierarchicalSettings::default(),
        }
    }
}

impl RefreshSettings {
    pub fn validate(mut self) -> Self {
        if self.window == 0 {
            warn!("Refresh window must be greater than zero. Using default value.");
            self.window = Self::default_window();
        }

        if self.jitter > self.window / 2 {
            warn!(
                "Refresh jitter {} exceeds half the window ({}). Clamping.",
                self.jitter,
                self.window / 2
            );
            self.jitter = self.window / 2;
        }

        self.hierarchical = self.hierarchical.validate();
        self
    }

    const fn default_window() -> u64 {
        6
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchicalSettings {
    /// Tiles per group edge.
    #[serde(default = "HierarchicalSettings::default_group_size")]
    pub group_size: u32,
    #[serde(default = "HierarchicalSettings::default_coarse_window")]
    pub coarse_window: u64,
    #[serde(default = "HierarchicalSettings::default_fine_window")]
    pub fine_window: u64,
    #[serde(default = "HierarchicalSettings::default_coarse_groups_per_refresh")]
    pub coarse_groups_per_refresh: usize,
    #[serde(default = "HierarchicalSettings::default_fine_tiles_per_refresh")]
    pub fine_tiles_per_refresh: usize,
}

impl Default for HierarchicalSettings {
    fn default() -> Self {
        Self {
            group_size: Self::default_group_size(),
            coarse_window: Self::default_coarse_window(),
            fine_window: Self::default_fine_window(),
            coarse_groups_per_refresh: Self::default_coarse_groups_per_refresh(),
            fine_tiles_per_refresh: Self::default_fine_tiles_per_refresh(),
        }
    }
}

impl HierarchicalSettings {
    fn validate(mut self) -> Self {
        let defaults = Self::default();
        if self.group_size == 0 {
            warn!("Hierarchical group size must be greater than zero. Using default value.");
            self.group_size = defaults.group_size;
        }
        if self.coarse_window == 0 || self.fine_window == 0 {
            warn!("Hierarchical refresh windows must be greater than zero. Using defaults.");
            self.coarse_window = defaults.coarse_window;
            self.fine_window = defaults.fine_window;
        }
        if self.coarse_groups_per_refresh == 0 || self.fine_tiles_per_refresh == 0 {
            warn!("Hierarchical per-refresh counts must be greater than zero. Using defaults.");
            self.coarse_groups_per_refresh = defaults.coarse_groups_per_refresh;
            self.fine_tiles_per_refresh = defaults.fine_tiles_per_refresh;
        }
        self
    }

    const fn default_group_size() -> u32 {
        8
    }

    const fn default_coarse_window() -> u64 {
        12
    }

    const fn default_fine_window() -> u64 {
        3
    }

    const fn default_coarse_groups_per_refresh() -> usize {
        4
    }

    const fn default_fine_tiles_per_refresh() -> usize {
        16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergeSettings {
    #[serde(default = "MergeSettings::default_max_touched_fraction")]
    pub max_touched_fraction: f32,
    #[serde(default)]
    pub depth_tolerance: f32,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            max_touched_fraction: Self::default_max_touched_fraction(),
            depth_tolerance: 0.0,
        }
    }
}

impl MergeSettings {
    fn validate(mut self) -> Self {
        if !(self.max_touched_fraction > 0.0 && self.max_touched_fraction <= 1.0) {
            warn!(
                "Merge threshold {} is outside (0, 1]. Using default value.",
                self.max_touched_fraction
            );
            self.max_touched_fraction = Self::default_max_touched_fraction();
        }
        if !self.depth_tolerance.is_finite() || self.depth_tolerance < 0.0 {
            warn!("Depth tolerance must be finite and non-negative. Using 0.");
            self.depth_tolerance = 0.0;
        }
        self
    }

    const fn default_max_touched_fraction() -> f32 {
        0.5
    }
}

/// Synthetic scene driven by the demo binary. The camera pans sideways
/// in front of the cloud, so consecutive frames differ only in which tiles
/// splats cover.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DemoSettings {
    #[serde(default = "DemoSettings::default_frames")]
    pub frames: u64,
    #[serde(default = "DemoSettings::default_splats")]
    pub splats: usize,
    /// Camera distance from the cloud centre.
    #[serde(default = "DemoSettings::default_distance")]
    pub distance: f32,
    /// Peak sideways offset of the pan, in world units.
    #[serde(default = "DemoSettings::default_pan_amplitude")]
    pub pan_amplitude: f32,
    /// Frames per full pan cycle.
    #[serde(default = "DemoSettings::default_pan_period")]
    pub pan_period: u64,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            frames: Self::default_frames(),
            splats: Self::default_splats(),
            distance: Self::default_distance(),
            pan_amplitude: Self::default_pan_amplitude(),
            pan_period: Self::default_pan_period(),
        }
    }
}

impl DemoSettings {
    const fn default_frames() -> u64 {
        100
    }

    const fn default_splats() -> usize {
        10_000
    }

    const fn default_distance() -> f32 {
        6.0
    }

    const fn default_pan_amplitude() -> f32 {
        0.05
    }

    const fn default_pan_period() -> u64 {
        240
    }
}
