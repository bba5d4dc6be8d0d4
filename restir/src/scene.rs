use bitflags::bitflags;
use glam::{Vec2, Vec3};

/// Scene the resampler pulls lights, environment and camera from.
pub trait Scene {
    /// Active analytic lights, in the order the kernels index them.
    fn analytic_lights(&self) -> &[AnalyticLight];

    /// Active emissive triangles, in the order the kernels index them.
    fn emissive_triangles(&self) -> &[EmissiveTriangle];

    fn env_map(&self) -> Option<EnvMap<'_>>;

    fn camera(&self) -> CameraData;

    fn settings(&self) -> SceneSettings {
        SceneSettings::default()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnalyticLightKind {
    Point,
    Directional,
    Distant,
    Rect,
    Disc,
    Sphere,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnalyticLight {
    pub kind: AnalyticLightKind,
    pub active: bool,
}

impl AnalyticLight {
    pub fn new(kind: AnalyticLightKind) -> Self {
        Self { kind, active: true }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EmissiveTriangle {
    pub average_radiance: Vec3,
    pub area: f32,
}

/// Host-side readback of the environment map, row-major with `channels`
/// floats per texel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnvMap<'a> {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub texels: &'a [f32],
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CameraData {
    pub u: Vec3,
    pub v: Vec3,
    pub w: Vec3,
    pub jitter: Vec2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SceneSettings {
    pub use_analytic_lights: bool,
    pub use_emissive_lights: bool,
    pub use_env_light: bool,
}

impl Default for SceneSettings {
    fn default() -> Self {
        Self {
            use_analytic_lights: true,
            use_emissive_lights: true,
            use_env_light: true,
        }
    }
}

bitflags! {
    /// What happened to the scene since the previous frame.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SceneChanges: u32 {
        const RECOMPILE_NEEDED = 1 << 0;
        const GEOMETRY_CHANGED = 1 << 1;
        const LIGHT_COLLECTION_CHANGED = 1 << 2;
        const EMISSIVE_MATERIALS_CHANGED = 1 << 3;
        const LIGHT_COUNT_CHANGED = 1 << 4;
        const LIGHT_PROPERTIES_CHANGED = 1 << 5;
        const LIGHT_INTENSITY_CHANGED = 1 << 6;
        const ENV_MAP_CHANGED = 1 << 7;
        /// Env map's tint or intensity changed
        const ENV_MAP_INTENSITY_CHANGED = 1 << 8;
        const RENDER_SETTINGS_CHANGED = 1 << 9;
    }
}
