use bitflags::bitflags;

bitflags! {
    /// Reasons for rebuilding parts of the engine's state.
    ///
    /// Accumulated by [`crate::Engine::set_options()`] and
    /// [`crate::Engine::begin_frame()`], consumed while updating the frame.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Dirty: u32 {
        const EMISSIVE_LIGHTS = 1 << 0;
        const EMISSIVE_FLUX = 1 << 1;
        const ANALYTIC_LIGHTS = 1 << 2;
        const ANALYTIC_FLUX = 1 << 3;
        const ENV_LIGHT = 1 << 4;

        /// Reservoirs must be zeroed before the next resampling pass
        const RESERVOIRS = 1 << 5;
        /// Temporal history restarts (last frame's reservoir is forgotten)
        const HISTORY = 1 << 6;
        /// Context and every resolution-dependent resource gets recreated
        const CONTEXT = 1 << 7;
        /// Kernels must be reloaded with new defines
        const KERNELS = 1 << 8;

        const ALL_LIGHTS = Self::EMISSIVE_LIGHTS.bits()
            | Self::EMISSIVE_FLUX.bits()
            | Self::ANALYTIC_LIGHTS.bits()
            | Self::ANALYTIC_FLUX.bits()
            | Self::ENV_LIGHT.bits();
    }
}

impl Dirty {
    /// Flags consumed by the lights update; everything else is handled at
    /// the frame boundary.
    pub fn take_lights(&mut self) -> Dirty {
        let lights = *self & Dirty::ALL_LIGHTS;

        self.remove(Dirty::ALL_LIGHTS);

        lights
    }
}
