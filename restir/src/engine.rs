use std::mem;

use derivative::Derivative;
use glam::{uvec2, vec4, UVec2};
use log::{debug, info};

use crate::{
    analytic_weights, emissive_weights, env_luminance, env_weights, gpu,
    AliasTable, Bindings, BufferDesc, CameraData, Capability, Context,
    ContextParams, Defines, Dirty, EnvPdf, Error, FrameParams, FramePlan,
    Kernel, LightCategories, LightSampleBits, LightSamplingStructure,
    LightSelectionProbabilities, LightTaxonomy, Options, PdfTextureSize,
    RenderContext, Result, Scene, SceneChanges, SceneSettings, TextureDesc,
    TextureFormat,
};
use crate::gpu::KernelParams;

/// Size of a single packed light, as written by [`Kernel::UpdateLights`].
const PACKED_LIGHT_INFO_SIZE: u64 = 32;

/// Size of a single entry of the surface buffers.
const PACKED_SURFACE_DATA_SIZE: u64 = 32;

/// Width of the thread grid [`Kernel::UpdateLights`] gets dispatched with.
const UPDATE_LIGHTS_WIDTH: u32 = 8192;

/// Host-side driver of the resampler.
///
/// Owns every GPU resource (through the render context's handles), keeps
/// track of what has to be rebuilt and schedules resampling passes frame by
/// frame:
///
/// ```text
/// begin_frame() -> update() -> (final shading) -> end_frame()
/// ```
pub struct Engine<C>
where
    C: RenderContext,
{
    options: Options,
    dirty: Dirty,
    lights: LightTaxonomy,
    settings: SceneSettings,
    frame: Option<FrameResources<C>>,
    light_resources: LightResources<C>,
    local_light_pdf_size: PdfTextureSize,
    env_light_size: UVec2,
    env_light_pdf_mip_count: u32,
    selection: LightSelectionProbabilities,
    loaded_defines: Option<Defines>,
    frame_dim: UVec2,
    frame_index: u32,
    current_surface_buffer: u32,
    last_frame_reservoir: u32,
    camera: CameraData,
    prev_camera: CameraData,
}

/// Resources that depend on the frame's dimensions.
struct FrameResources<C>
where
    C: RenderContext,
{
    context: Context,
    runtime_params: C::Buffer,
    bridge_params: C::Buffer,
    light_tiles: C::Buffer,
    compact_light_info: C::Buffer,
    reservoirs: C::Buffer,
    neighbor_offsets: C::Buffer,
    surface_data: C::Buffer,
}

/// Resources that depend on the scene's lights.
#[derive(Derivative)]
#[derivative(Default(bound = ""))]
struct LightResources<C>
where
    C: RenderContext,
{
    light_info: Option<C::Buffer>,
    analytic_light_ids: Option<C::Buffer>,
    local_light_pdf: Option<C::Texture>,
    env_light_luminance: Option<C::Texture>,
    env_light_pdf: Option<C::Texture>,
    env_alias_table: Option<AliasResource<C>>,
    emissive_alias_table: Option<AliasResource<C>>,
    analytic_alias_table: Option<AliasResource<C>>,
}

struct AliasResource<C>
where
    C: RenderContext,
{
    buffer: C::Buffer,
    len: u32,
}

impl<C> Engine<C>
where
    C: RenderContext,
{
    pub fn new(ctx: &C, options: Options) -> Result<Self> {
        info!("Initializing engine");

        if let Some(capability) = Capability::ALL
            .into_iter()
            .find(|&capability| !ctx.is_supported(capability))
        {
            return Err(Error::UnsupportedCapability(capability));
        }

        Ok(Self {
            options: options.clamped(),
            dirty: Dirty::ALL_LIGHTS | Dirty::KERNELS,
            lights: Default::default(),
            settings: Default::default(),
            frame: None,
            light_resources: Default::default(),
            local_light_pdf_size: PdfTextureSize::for_items(0),
            env_light_size: UVec2::ZERO,
            env_light_pdf_mip_count: 0,
            selection: Default::default(),
            loaded_defines: None,
            frame_dim: UVec2::ZERO,
            frame_index: 0,
            current_surface_buffer: 0,
            last_frame_reservoir: 1,
            camera: Default::default(),
            prev_camera: Default::default(),
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Applies new options, scheduling whatever they invalidate.
    pub fn set_options(&mut self, options: Options) {
        let options = options.clamped();
        let dirty = self.options.invalidations(&options);

        if !dirty.is_empty() {
            debug!("Options changed; dirty={dirty:?}");
        }

        if dirty.contains(Dirty::HISTORY) {
            self.last_frame_reservoir = 0;
        }

        if dirty.contains(Dirty::KERNELS) {
            self.loaded_defines = None;
        }

        self.dirty |= dirty - Dirty::HISTORY;
        self.options = options;
    }

    /// Prepares the engine for a new frame.
    ///
    /// `changes` describes what happened to the scene since the previous
    /// frame.
    pub fn begin_frame(
        &mut self,
        ctx: &mut C,
        scene: &impl Scene,
        frame_dim: UVec2,
        changes: SceneChanges,
    ) -> Result<()> {
        if changes.intersects(
            SceneChanges::RECOMPILE_NEEDED | SceneChanges::GEOMETRY_CHANGED,
        ) {
            self.dirty |= Dirty::KERNELS;
        }

        self.camera = scene.camera();

        if self.frame_index == 0 {
            self.prev_camera = self.camera;
        }

        if frame_dim != self.frame_dim {
            debug!(
                "Frame size changed; old={}x{}, new={}x{}",
                self.frame_dim.x, self.frame_dim.y, frame_dim.x, frame_dim.y,
            );

            self.frame_dim = frame_dim;
            self.dirty |= Dirty::CONTEXT;
        }

        if self.dirty.contains(Dirty::CONTEXT) {
            self.frame = None;
            self.dirty.remove(Dirty::CONTEXT);
        }

        if self.frame.is_none() {
            self.frame = Some(self.prepare_resources(ctx)?);
        }

        if self.dirty.contains(Dirty::RESERVOIRS) {
            if let Some(frame) = &self.frame {
                debug!("Clearing reservoirs");

                ctx.clear_buffer(&frame.reservoirs);
            }

            self.dirty.remove(Dirty::RESERVOIRS);
        }

        self.settings = scene.settings();
        self.dirty |= Self::changes_to_dirty(changes);

        Ok(())
    }

    /// Refreshes lights and runs every resampling pass of the frame.
    pub fn update(
        &mut self,
        ctx: &mut C,
        scene: &impl Scene,
        motion_vectors: Option<&C::MotionVectors>,
    ) -> Result<()> {
        if self.frame.is_none() {
            self.frame = Some(self.prepare_resources(ctx)?);
        }

        let dirty = self.dirty.take_lights();

        self.update_lights(ctx, scene, dirty);
        self.update_env_light(ctx, scene, dirty)?;
        self.update_alias_tables(ctx, scene, dirty);

        self.selection = LightSelectionProbabilities::new(
            &self.options,
            self.light_categories(),
        );

        let defines = self.defines()?;

        if self.dirty.contains(Dirty::KERNELS)
            || self.loaded_defines.as_ref() != Some(&defines)
        {
            ctx.load_kernels(&defines)?;

            self.loaded_defines = Some(defines);
            self.dirty.remove(Dirty::KERNELS);
        }

        let plan = FramePlan::new(
            &self.options,
            self.last_frame_reservoir,
            self.lights.env_light_present(),
        );

        self.last_frame_reservoir = plan.output_reservoir();

        let Some(frame) = &self.frame else {
            return Ok(());
        };

        let runtime_params = self.runtime_params_of(&frame.context);
        let bridge_params = self.bridge_params();

        ctx.write_buffer(
            &frame.runtime_params,
            0,
            bytemuck::bytes_of(&runtime_params),
        );

        ctx.write_buffer(
            &frame.bridge_params,
            0,
            bytemuck::bytes_of(&bridge_params),
        );

        let bindings = self.bindings(motion_vectors);
        let context = frame.context.params();

        for pass in plan.passes() {
            let threads = match pass.kernel {
                Kernel::PresampleLocalLights => {
                    uvec2(context.tile_size, context.tile_count)
                }
                Kernel::PresampleEnvLight => {
                    uvec2(context.env_tile_size, context.env_tile_count)
                }
                _ => self.frame_dim,
            };

            let params = gpu::KernelParams {
                dispatch_width: threads.x,
                dispatch_height: threads.y,
                ..pass.kernel_params()
            };

            ctx.dispatch(pass.kernel, threads, params, &bindings);
        }

        Ok(())
    }

    /// Finishes the frame; must be called after final shading has read
    /// [`Self::output_reservoir()`].
    pub fn end_frame(&mut self, scene: &impl Scene) {
        self.frame_index = self.frame_index.wrapping_add(1);
        self.current_surface_buffer = 1 - self.current_surface_buffer;
        self.prev_camera = scene.camera();
    }

    /// Reservoir buffer holding the result of the most recent frame.
    pub fn output_reservoir(&self) -> u32 {
        self.last_frame_reservoir
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub fn lights(&self) -> &LightTaxonomy {
        &self.lights
    }

    pub fn context(&self) -> Option<&Context> {
        self.frame.as_ref().map(|frame| &frame.context)
    }

    pub fn selection_probabilities(&self) -> LightSelectionProbabilities {
        self.selection
    }

    /// Definitions the kernels have to be compiled with.
    pub fn defines(&self) -> Result<Defines> {
        let alias_tables = self.options.light_sampling_structure
            == LightSamplingStructure::AliasTable;

        let mut defines = Defines::default()
            .with("RESTIR_INSTALLED", 1)
            .with("USE_ALIAS_TABLES", alias_tables as u32)
            .with("USE_ENV_LIGHT", self.settings.use_env_light as u32)
            .with(
                "USE_EMISSIVE_LIGHTS",
                self.settings.use_emissive_lights as u32,
            )
            .with(
                "USE_ANALYTIC_LIGHTS",
                self.settings.use_analytic_lights as u32,
            )
            .with("UNBIASED", self.options.unbiased as u32)
            .with("USE_VISIBILITY", self.options.use_final_visibility as u32)
            .with(
                "REUSE_VISIBILITY",
                (self.options.use_final_visibility
                    && self.options.reuse_final_visibility)
                    as u32,
            )
            .with(
                "INITIAL_PATH_SAMPLE_COUNT",
                self.options.initial_path_sample_count,
            );

        let bits = [
            (
                "ENV",
                &self.light_resources.env_alias_table,
                LightSampleBits::ENV,
            ),
            (
                "EMISSIVE",
                &self.light_resources.emissive_alias_table,
                LightSampleBits::EMISSIVE,
            ),
            (
                "ANALYTIC",
                &self.light_resources.analytic_alias_table,
                LightSampleBits::ANALYTIC,
            ),
        ];

        for (name, table, fallback) in bits {
            let bits = match table {
                Some(table) => LightSampleBits::for_count(table.len)?,
                None => fallback,
            };

            defines.add(
                format!("LIGHT_SAMPLE_{name}_INDEX_BITS"),
                bits.index_bits,
            );

            defines.add(
                format!("LIGHT_SAMPLE_{name}_POSITION_BITS"),
                bits.position_bits,
            );
        }

        if alias_tables {
            let [env, emissive, analytic] = self
                .selection
                .sample_counts(self.options.presampled_tile_size);

            defines
                .add("LIGHT_TILE_COUNT", self.options.presampled_tile_count);
            defines.add("LIGHT_TILE_SIZE", self.options.presampled_tile_size);
            defines.add("ENV_LIGHT_SAMPLE_COUNT", env);
            defines.add("EMISSIVE_LIGHT_SAMPLE_COUNT", emissive);
            defines.add("ANALYTIC_LIGHT_SAMPLE_COUNT", analytic);
        }

        Ok(defines)
    }

    /// Runtime parameters of the current frame; `None` before the first
    /// [`Self::begin_frame()`].
    pub fn runtime_params(&self) -> Option<gpu::RuntimeParams> {
        self.frame
            .as_ref()
            .map(|frame| self.runtime_params_of(&frame.context))
    }

    /// Everything the kernels read about the current frame besides
    /// [`gpu::RuntimeParams`].
    pub fn bridge_params(&self) -> gpu::BridgeParams {
        let options = &self.options;
        let camera = &self.prev_camera;

        let jitter = self
            .frame
            .as_ref()
            .map(|frame| frame.context.jitter())
            .unwrap_or_default();

        let alias_len = |table: &Option<AliasResource<C>>| {
            table.as_ref().map_or(0, |table| table.len)
        };

        gpu::BridgeParams {
            prev_camera_u: camera.u.extend(0.0),
            prev_camera_v: camera.v.extend(0.0),
            prev_camera_w: camera.w.extend(0.0),
            prev_camera_jitter: vec4(
                camera.jitter.x,
                camera.jitter.y,
                0.0,
                0.0,
            ),
            light_selection_probabilities: self.selection.as_vec4(),

            frame_index: self.frame_index,
            frame_width: self.frame_dim.x,
            frame_height: self.frame_dim.y,
            ray_epsilon: options.ray_epsilon,

            current_surface_buffer: self.current_surface_buffer,
            previous_surface_buffer: 1 - self.current_surface_buffer,
            store_compact_light_info: options.store_compact_light_info as u32,
            use_emissive_textures: options.use_emissive_textures as u32,

            local_light_candidate_count: options.local_light_candidate_count,
            infinite_light_candidate_count: options
                .infinite_light_candidate_count,
            env_light_candidate_count: options.env_light_candidate_count,
            brdf_candidate_count: options.brdf_candidate_count,

            brdf_cutoff: options.brdf_cutoff,
            bias_correction: options.bias_correction as u32,
            depth_threshold: options.depth_threshold,
            normal_threshold: options.normal_threshold,

            sampling_radius: options.sampling_radius,
            spatial_sample_count: options.spatial_sample_count,
            max_history_length: options.max_history_length,
            boiling_filter_strength: options.boiling_filter_strength,

            enable_visibility_shortcut: options.enable_visibility_shortcut
                as u32,
            enable_permutation_sampling: options.enable_permutation_sampling
                as u32,
            final_reservoir: self.last_frame_reservoir,
            total_light_count: self.lights.total_light_count(),

            first_local_analytic_light: self
                .lights
                .first_local_analytic_light_index(),
            first_infinite_analytic_light: self
                .lights
                .first_infinite_analytic_light_index(),
            emissive_light_count: self.lights.emissive_light_count(),
            local_pdf_width: self.local_light_pdf_size.width,

            local_pdf_height: self.local_light_pdf_size.height,
            local_pdf_mip_count: self.local_light_pdf_size.mip_count,
            env_pdf_width: self.env_light_size.x,
            env_pdf_height: self.env_light_size.y,

            env_pdf_mip_count: self.env_light_pdf_mip_count,
            env_alias_count: alias_len(&self.light_resources.env_alias_table),
            emissive_alias_count: alias_len(
                &self.light_resources.emissive_alias_table,
            ),
            analytic_alias_count: alias_len(
                &self.light_resources.analytic_alias_table,
            ),

            restir_pass_count: options.restir_pass_count,
            initial_path_sample_count: options.initial_path_sample_count,
            temporal_shift_mapping: options.temporal_shift_mapping as u32,
            temporal_final_shift_mapping: options.temporal_final_shift_mapping
                as u32,

            spatial_shift_mapping: options.spatial_shift_mapping as u32,
            use_final_visibility: options.use_final_visibility as u32,
            reuse_final_visibility: (options.use_final_visibility
                && options.reuse_final_visibility)
                as u32,
            unbiased: options.unbiased as u32,

            use_m_factor: options.use_m_factor as u32,
            jitter_cubic_root_factor: jitter.cubic_root_factor,
            jitter_linear_factor: jitter.linear_factor,
            pad0: 0,
        }
    }

    fn changes_to_dirty(changes: SceneChanges) -> Dirty {
        let mut dirty = Dirty::empty();

        if changes.contains(SceneChanges::LIGHT_COLLECTION_CHANGED) {
            dirty |= Dirty::EMISSIVE_LIGHTS;
        }

        if changes.contains(SceneChanges::EMISSIVE_MATERIALS_CHANGED) {
            dirty |= Dirty::EMISSIVE_FLUX;
        }

        if changes.intersects(
            SceneChanges::LIGHT_COUNT_CHANGED
                | SceneChanges::LIGHT_PROPERTIES_CHANGED,
        ) {
            dirty |= Dirty::ANALYTIC_LIGHTS;
        }

        if changes.contains(SceneChanges::LIGHT_INTENSITY_CHANGED) {
            dirty |= Dirty::ANALYTIC_FLUX;
        }

        if changes.intersects(
            SceneChanges::ENV_MAP_CHANGED
                | SceneChanges::ENV_MAP_INTENSITY_CHANGED,
        ) {
            dirty |= Dirty::ENV_LIGHT;
        }

        if changes.contains(SceneChanges::RENDER_SETTINGS_CHANGED) {
            dirty |= Dirty::ALL_LIGHTS | Dirty::KERNELS;
        }

        dirty
    }

    fn prepare_resources(
        &mut self,
        ctx: &mut C,
    ) -> Result<FrameResources<C>> {
        let context = Context::new(ContextParams {
            render_size: self.frame_dim,
            tile_size: self.options.presampled_tile_size,
            tile_count: self.options.presampled_tile_count,
            env_tile_size: self.options.presampled_tile_size,
            env_tile_count: self.options.presampled_tile_count,
            ..Default::default()
        })?;

        let reservoir_count = context.layout().buffer_element_count() as u64
            * self.options.restir_pass_count as u64;
        let light_tile_count = context.light_tile_element_count() as u64;
        let pixel_count = self.frame_dim.x as u64 * self.frame_dim.y as u64;

        let mut buffer =
            |label, size| ctx.create_buffer(BufferDesc { label, size });

        let frame = FrameResources {
            runtime_params: buffer(
                "restir_runtime_params",
                mem::size_of::<gpu::RuntimeParams>() as u64,
            ),
            bridge_params: buffer(
                "restir_bridge_params",
                mem::size_of::<gpu::BridgeParams>() as u64,
            ),
            light_tiles: buffer(
                "restir_light_tiles",
                light_tile_count
                    * mem::size_of::<gpu::PresampledLight>() as u64,
            ),
            compact_light_info: buffer(
                "restir_compact_light_info",
                light_tile_count * PACKED_LIGHT_INFO_SIZE,
            ),
            reservoirs: buffer(
                "restir_reservoirs",
                reservoir_count
                    * mem::size_of::<gpu::PackedReservoir>() as u64,
            ),
            neighbor_offsets: buffer(
                "restir_neighbor_offsets",
                2 * context.params().neighbor_offset_count as u64,
            ),
            surface_data: buffer(
                "restir_surface_data",
                2 * pixel_count * PACKED_SURFACE_DATA_SIZE,
            ),
            context,
        };

        ctx.write_buffer(
            &frame.neighbor_offsets,
            0,
            bytemuck::cast_slice(&frame.context.fill_neighbor_offsets()),
        );

        self.dirty |= Dirty::ALL_LIGHTS | Dirty::RESERVOIRS;

        Ok(frame)
    }

    fn update_lights(
        &mut self,
        ctx: &mut C,
        scene: &impl Scene,
        mut dirty: Dirty,
    ) {
        if dirty.contains(Dirty::ANALYTIC_LIGHTS) {
            if self.settings.use_analytic_lights {
                self.lights.categorize(scene.analytic_lights());
            } else {
                self.lights.clear_analytic_lights();
            }

            self.upload_analytic_light_ids(ctx);
        }

        self.lights.set_emissive_light_count(
            if self.settings.use_emissive_lights {
                scene.emissive_triangles().len() as u32
            } else {
                0
            },
        );

        self.lights.set_env_light_present(
            self.settings.use_env_light && scene.env_map().is_some(),
        );

        let total = self.lights.total_light_count();
        let light_info_size = total.max(1) as u64 * PACKED_LIGHT_INFO_SIZE;

        if self
            .light_resources
            .light_info
            .as_ref()
            .map_or(true, |buffer| ctx.buffer_len(buffer) < light_info_size)
        {
            debug!("Creating light info; lights={total}");

            self.light_resources.light_info =
                Some(ctx.create_buffer(BufferDesc {
                    label: "restir_light_info",
                    size: light_info_size,
                }));

            // New buffer is empty
            dirty |= Dirty::ALL_LIGHTS;
        }

        if self.options.light_sampling_structure
            == LightSamplingStructure::PdfTexture
        {
            let size =
                PdfTextureSize::for_items(self.lights.local_light_count());

            let desc = TextureDesc {
                label: "restir_local_light_pdf",
                size: size.size(),
                mip_count: size.mip_count,
                format: TextureFormat::R16Float,
            };

            if self
                .light_resources
                .local_light_pdf
                .as_ref()
                .map_or(true, |pdf| ctx.texture_desc(pdf) != desc)
            {
                debug!("Creating local light pdf; size={size:?}");

                self.light_resources.local_light_pdf =
                    Some(ctx.create_texture(desc));

                dirty |= Dirty::EMISSIVE_FLUX | Dirty::ANALYTIC_FLUX;
            }

            self.local_light_pdf_size = size;
        } else {
            self.light_resources.local_light_pdf = None;
            self.local_light_pdf_size = PdfTextureSize::default();
        }

        if self.lights.local_layout_changed() {
            if let Some(pdf) = &self.light_resources.local_light_pdf {
                ctx.clear_texture(pdf);
            }

            dirty |= Dirty::EMISSIVE_FLUX | Dirty::ANALYTIC_FLUX;
        }

        if self.lights.emissive_count_changed() {
            dirty |= Dirty::ANALYTIC_LIGHTS;
        }

        if !self.lights.env_light_present() {
            dirty.remove(Dirty::ENV_LIGHT);
        }

        let update_flags = [
            (Dirty::EMISSIVE_LIGHTS, KernelParams::UPDATE_EMISSIVE_LIGHTS),
            (Dirty::EMISSIVE_FLUX, KernelParams::UPDATE_EMISSIVE_FLUX),
            (Dirty::ANALYTIC_LIGHTS, KernelParams::UPDATE_ANALYTIC_LIGHTS),
            (Dirty::ANALYTIC_FLUX, KernelParams::UPDATE_ANALYTIC_FLUX),
            (Dirty::ENV_LIGHT, KernelParams::UPDATE_ENV_LIGHT),
        ]
        .into_iter()
        .filter(|(flag, _)| dirty.contains(*flag))
        .fold(0, |flags, (_, flag)| flags | flag);

        if update_flags != 0 && total > 0 {
            debug!("Updating lights; total={total}, flags={update_flags:#x}");

            let bindings = self.bindings(None);

            let threads = uvec2(
                UPDATE_LIGHTS_WIDTH,
                total.div_ceil(UPDATE_LIGHTS_WIDTH),
            );

            ctx.dispatch(
                Kernel::UpdateLights,
                threads,
                gpu::KernelParams {
                    dispatch_width: threads.x,
                    dispatch_height: threads.y,
                    update_flags,
                    ..Default::default()
                },
                &bindings,
            );

            let flux_changed =
                dirty.intersects(Dirty::EMISSIVE_FLUX | Dirty::ANALYTIC_FLUX);

            if let (true, Some(pdf)) =
                (flux_changed, &self.light_resources.local_light_pdf)
            {
                let desc = ctx.texture_desc(pdf);

                for mip in 1..desc.mip_count {
                    let threads = desc.mip_size(mip);

                    ctx.dispatch(
                        Kernel::BuildLocalLightPdfMip,
                        threads,
                        gpu::KernelParams {
                            mip_level: mip,
                            dispatch_width: threads.x,
                            dispatch_height: threads.y,
                            ..Default::default()
                        },
                        &bindings,
                    );
                }
            }
        }

        self.lights.commit_frame();
    }

    /// Uploads the scene indices of analytic lights, local ones first, so
    /// that [`Kernel::UpdateLights`] can tell which scene light lands in
    /// which light info slot.
    fn upload_analytic_light_ids(&mut self, ctx: &mut C) {
        let ids = self.lights.analytic_light_ids();
        let size = (ids.len().max(1) * mem::size_of::<u32>()) as u64;

        if self
            .light_resources
            .analytic_light_ids
            .as_ref()
            .map_or(true, |buffer| ctx.buffer_len(buffer) < size)
        {
            debug!("Creating analytic light ids; lights={}", ids.len());

            self.light_resources.analytic_light_ids =
                Some(ctx.create_buffer(BufferDesc {
                    label: "restir_analytic_light_ids",
                    size,
                }));
        }

        if let (false, Some(buffer)) =
            (ids.is_empty(), &self.light_resources.analytic_light_ids)
        {
            ctx.write_buffer(buffer, 0, bytemuck::cast_slice(ids));
        }
    }

    fn update_env_light(
        &mut self,
        ctx: &mut C,
        scene: &impl Scene,
        dirty: Dirty,
    ) -> Result<()> {
        let map = if self.lights.env_light_present() {
            scene.env_map()
        } else {
            None
        };

        let Some(map) = map else {
            if self.light_resources.env_light_luminance.is_some() {
                debug!("Releasing env light");
            }

            self.light_resources.env_light_luminance = None;
            self.light_resources.env_light_pdf = None;
            self.light_resources.env_alias_table = None;
            self.env_light_size = UVec2::ZERO;
            self.env_light_pdf_mip_count = 0;

            return Ok(());
        };

        let alias_tables = self.options.light_sampling_structure
            == LightSamplingStructure::AliasTable;

        let missing = self.light_resources.env_light_luminance.is_none()
            || if alias_tables {
                self.light_resources.env_alias_table.is_none()
            } else {
                self.light_resources.env_light_pdf.is_none()
            };

        if !dirty.contains(Dirty::ENV_LIGHT) && !missing {
            return Ok(());
        }

        debug!(
            "Building env light; size={}x{}, alias_tables={alias_tables}",
            map.width, map.height,
        );

        if alias_tables {
            let luminance = env_luminance(&map)?;
            let size = uvec2(map.width, map.height);

            let luminance_tex = ctx.create_texture(TextureDesc {
                label: "restir_env_light_luminance",
                size,
                mip_count: 1,
                format: TextureFormat::R32Float,
            });

            ctx.write_texture(&luminance_tex, 0, &luminance);

            let table =
                AliasTable::new(&env_weights(size.x, size.y, &luminance));

            self.light_resources.env_light_luminance = Some(luminance_tex);
            self.light_resources.env_light_pdf = None;
            self.light_resources.env_alias_table = Some(
                Self::upload_alias_table(ctx, "restir_env_alias_table", &table),
            );

            self.env_light_size = size;
            self.env_light_pdf_mip_count = 0;
        } else {
            let env = EnvPdf::new(&map)?;
            let pdf = env.pdf();

            let luminance_tex = ctx.create_texture(TextureDesc {
                label: "restir_env_light_luminance",
                size: env.size(),
                mip_count: 1,
                format: TextureFormat::R16Float,
            });

            ctx.write_texture(&luminance_tex, 0, env.luminance());

            let pdf_tex = ctx.create_texture(TextureDesc {
                label: "restir_env_light_pdf",
                size: env.size(),
                mip_count: pdf.mip_count(),
                format: TextureFormat::R16Float,
            });

            for mip in 0..pdf.mip_count() {
                ctx.write_texture(&pdf_tex, mip, pdf.level(mip));
            }

            self.light_resources.env_light_luminance = Some(luminance_tex);
            self.light_resources.env_light_pdf = Some(pdf_tex);
            self.light_resources.env_alias_table = None;

            self.env_light_size = env.size();
            self.env_light_pdf_mip_count = pdf.mip_count();
        }

        Ok(())
    }

    fn update_alias_tables(
        &mut self,
        ctx: &mut C,
        scene: &impl Scene,
        dirty: Dirty,
    ) {
        if self.options.light_sampling_structure
            != LightSamplingStructure::AliasTable
        {
            self.light_resources.emissive_alias_table = None;
            self.light_resources.analytic_alias_table = None;

            return;
        }

        if self.lights.emissive_light_count() == 0 {
            self.light_resources.emissive_alias_table = None;
        } else if self.light_resources.emissive_alias_table.is_none()
            || dirty.intersects(Dirty::EMISSIVE_LIGHTS | Dirty::EMISSIVE_FLUX)
        {
            let table =
                AliasTable::new(&emissive_weights(scene.emissive_triangles()));

            self.light_resources.emissive_alias_table =
                Some(Self::upload_alias_table(
                    ctx,
                    "restir_emissive_alias_table",
                    &table,
                ));
        }

        if self.lights.analytic_light_ids().is_empty() {
            self.light_resources.analytic_alias_table = None;
        } else if self.light_resources.analytic_alias_table.is_none()
            || dirty.contains(Dirty::ANALYTIC_LIGHTS)
        {
            let lights: Vec<_> = self
                .lights
                .analytic_light_ids()
                .iter()
                .filter_map(|&id| scene.analytic_lights().get(id as usize))
                .copied()
                .collect();

            let table = AliasTable::new(&analytic_weights(&lights));

            self.light_resources.analytic_alias_table =
                Some(Self::upload_alias_table(
                    ctx,
                    "restir_analytic_alias_table",
                    &table,
                ));
        }
    }

    fn upload_alias_table(
        ctx: &mut C,
        label: &'static str,
        table: &AliasTable,
    ) -> AliasResource<C> {
        debug!("Uploading alias table; label={label}, len={}", table.len());

        let buffer = ctx.create_buffer(BufferDesc {
            label,
            size: (table.len().max(1) * mem::size_of::<gpu::AliasEntry>())
                as u64,
        });

        ctx.write_buffer(&buffer, 0, bytemuck::cast_slice(table.entries()));

        AliasResource {
            buffer,
            len: table.len() as u32,
        }
    }

    fn light_categories(&self) -> LightCategories {
        let resources = &self.light_resources;

        match self.options.light_sampling_structure {
            LightSamplingStructure::PdfTexture => LightCategories {
                env: resources.env_light_pdf.is_some(),
                emissive: self.lights.emissive_light_count() > 0,
                analytic: !self.lights.analytic_light_ids().is_empty(),
            },

            LightSamplingStructure::AliasTable => LightCategories {
                env: resources.env_alias_table.is_some(),
                emissive: resources.emissive_alias_table.is_some(),
                analytic: resources.analytic_alias_table.is_some(),
            },
        }
    }

    fn runtime_params_of(&self, context: &Context) -> gpu::RuntimeParams {
        context.fill_runtime_params(&FrameParams {
            frame_index: self.frame_index,
            first_local_light: self.lights.first_local_light_index(),
            num_local_lights: self.lights.local_light_count(),
            first_infinite_light: self.lights.first_infinite_light_index(),
            num_infinite_lights: self.lights.infinite_light_count(),
            environment_light_present: self.lights.env_light_present(),
            environment_light_index: self.lights.env_light_index(),
            enable_local_light_importance_sampling: self
                .light_resources
                .local_light_pdf
                .is_some()
                && self.lights.local_light_count() > 0,
        })
    }

    fn bindings<'a>(
        &'a self,
        motion_vectors: Option<&'a C::MotionVectors>,
    ) -> Bindings<'a, C> {
        let frame = self.frame.as_ref();
        let lights = &self.light_resources;

        let alias = |table: &'a Option<AliasResource<C>>| {
            table.as_ref().map(|table| &table.buffer)
        };

        Bindings {
            runtime_params: frame.map(|frame| &frame.runtime_params),
            bridge_params: frame.map(|frame| &frame.bridge_params),
            light_info: lights.light_info.as_ref(),
            analytic_light_ids: lights.analytic_light_ids.as_ref(),
            light_tiles: frame.map(|frame| &frame.light_tiles),
            compact_light_info: frame.map(|frame| &frame.compact_light_info),
            reservoirs: frame.map(|frame| &frame.reservoirs),
            neighbor_offsets: frame.map(|frame| &frame.neighbor_offsets),
            surface_data: frame.map(|frame| &frame.surface_data),
            local_light_pdf: lights.local_light_pdf.as_ref(),
            env_light_luminance: lights.env_light_luminance.as_ref(),
            env_light_pdf: lights.env_light_pdf.as_ref(),
            env_alias_table: alias(&lights.env_alias_table),
            emissive_alias_table: alias(&lights.emissive_alias_table),
            analytic_alias_table: alias(&lights.analytic_alias_table),
            motion_vectors,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use approx::assert_relative_eq;
    use glam::{vec3, Vec3};

    use super::*;
    use crate::{
        AnalyticLight, AnalyticLightKind, EmissiveTriangle, EnvMap, Mode,
        ShiftMapping,
    };

    #[derive(Clone, Debug, PartialEq)]
    enum Event {
        CreateBuffer(&'static str),
        CreateTexture(TextureDesc),
        WriteBuffer(&'static str),
        WriteTexture(&'static str, u32),
        ClearBuffer(&'static str),
        ClearTexture(&'static str),
        LoadKernels(Defines),
        Dispatch(Kernel, UVec2, gpu::KernelParams),
    }

    /// Render context that records everything it's asked to do.
    #[derive(Default)]
    struct MockContext {
        unsupported: Option<Capability>,
        buffers: Vec<BufferDesc>,
        contents: HashMap<usize, Vec<u8>>,
        textures: Vec<TextureDesc>,
        events: Vec<Event>,
    }

    impl MockContext {
        fn take_events(&mut self) -> Vec<Event> {
            mem::take(&mut self.events)
        }

        /// Contents of the most recently created buffer with given label.
        fn contents(&self, label: &str) -> Option<&[u8]> {
            let buffer = self
                .buffers
                .iter()
                .rposition(|desc| desc.label == label)?;

            self.contents.get(&buffer).map(|data| data.as_slice())
        }
    }

    impl RenderContext for MockContext {
        type Buffer = usize;
        type Texture = usize;
        type MotionVectors = ();

        fn is_supported(&self, capability: Capability) -> bool {
            self.unsupported != Some(capability)
        }

        fn create_buffer(&mut self, desc: BufferDesc) -> usize {
            self.events.push(Event::CreateBuffer(desc.label));
            self.buffers.push(desc);
            self.buffers.len() - 1
        }

        fn create_texture(&mut self, desc: TextureDesc) -> usize {
            self.events.push(Event::CreateTexture(desc));
            self.textures.push(desc);
            self.textures.len() - 1
        }

        fn buffer_len(&self, buffer: &usize) -> u64 {
            self.buffers[*buffer].size
        }

        fn texture_desc(&self, texture: &usize) -> TextureDesc {
            self.textures[*texture]
        }

        fn write_buffer(&mut self, buffer: &usize, offset: u64, data: &[u8]) {
            assert!(offset + data.len() as u64 <= self.buffers[*buffer].size);

            let contents = self.contents.entry(*buffer).or_default();
            let end = offset as usize + data.len();

            if contents.len() < end {
                contents.resize(end, 0);
            }

            contents[offset as usize..end].copy_from_slice(data);

            self.events
                .push(Event::WriteBuffer(self.buffers[*buffer].label));
        }

        fn write_texture(&mut self, texture: &usize, mip: u32, data: &[f32]) {
            let desc = self.textures[*texture];
            let size = desc.mip_size(mip);

            assert!(mip < desc.mip_count);
            assert_eq!((size.x * size.y) as usize, data.len());

            self.events.push(Event::WriteTexture(desc.label, mip));
        }

        fn clear_buffer(&mut self, buffer: &usize) {
            self.events
                .push(Event::ClearBuffer(self.buffers[*buffer].label));
        }

        fn clear_texture(&mut self, texture: &usize) {
            self.events
                .push(Event::ClearTexture(self.textures[*texture].label));
        }

        fn load_kernels(&mut self, defines: &Defines) -> Result<()> {
            self.events.push(Event::LoadKernels(defines.clone()));

            Ok(())
        }

        fn dispatch(
            &mut self,
            kernel: Kernel,
            threads: UVec2,
            params: gpu::KernelParams,
            bindings: &Bindings<'_, Self>,
        ) {
            assert!(bindings.runtime_params.is_some());
            assert!(bindings.reservoirs.is_some());

            self.events.push(Event::Dispatch(kernel, threads, params));
        }
    }

    #[derive(Default)]
    struct TestScene {
        analytic: Vec<AnalyticLight>,
        emissive: Vec<EmissiveTriangle>,
        env: Option<(u32, u32, Vec<f32>)>,
        camera: CameraData,
        settings: SceneSettings,
    }

    impl Scene for TestScene {
        fn analytic_lights(&self) -> &[AnalyticLight] {
            &self.analytic
        }

        fn emissive_triangles(&self) -> &[EmissiveTriangle] {
            &self.emissive
        }

        fn env_map(&self) -> Option<EnvMap<'_>> {
            self.env.as_ref().map(|(width, height, texels)| EnvMap {
                width: *width,
                height: *height,
                channels: 1,
                texels,
            })
        }

        fn camera(&self) -> CameraData {
            self.camera
        }

        fn settings(&self) -> SceneSettings {
            self.settings
        }
    }

    const FRAME_DIM: UVec2 = uvec2(64, 32);

    fn triangles(count: usize) -> Vec<EmissiveTriangle> {
        (0..count)
            .map(|i| EmissiveTriangle {
                average_radiance: Vec3::ONE,
                area: 1.0 + i as f32,
            })
            .collect()
    }

    fn env(width: u32, height: u32) -> Option<(u32, u32, Vec<f32>)> {
        Some((width, height, vec![1.0; (width * height) as usize]))
    }

    fn engine(options: Options) -> (Engine<MockContext>, MockContext) {
        let ctx = MockContext::default();
        let engine = Engine::new(&ctx, options).unwrap();

        (engine, ctx)
    }

    fn render(
        engine: &mut Engine<MockContext>,
        ctx: &mut MockContext,
        scene: &TestScene,
        changes: SceneChanges,
    ) -> Vec<Event> {
        engine.begin_frame(ctx, scene, FRAME_DIM, changes).unwrap();
        engine.update(ctx, scene, None).unwrap();
        engine.end_frame(scene);

        ctx.take_events()
    }

    fn dispatches(
        events: &[Event],
    ) -> Vec<(Kernel, UVec2, gpu::KernelParams)> {
        events
            .iter()
            .filter_map(|event| match event {
                Event::Dispatch(kernel, threads, params) => {
                    Some((*kernel, *threads, *params))
                }
                _ => None,
            })
            .collect()
    }

    fn kernels(events: &[Event]) -> Vec<Kernel> {
        dispatches(events)
            .into_iter()
            .map(|(kernel, _, _)| kernel)
            .collect()
    }

    fn loaded_defines(events: &[Event]) -> Vec<Defines> {
        events
            .iter()
            .filter_map(|event| match event {
                Event::LoadKernels(defines) => Some(defines.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn unsupported_capability() {
        let ctx = MockContext {
            unsupported: Some(Capability::KernelParams),
            ..Default::default()
        };

        let actual = Engine::new(&ctx, Options::default()).err();

        assert!(matches!(
            actual,
            Some(Error::UnsupportedCapability(Capability::KernelParams))
        ));
    }

    #[test]
    fn no_resampling() {
        let (mut target, mut ctx) = engine(Options {
            mode: Mode::NoResampling,
            ..Default::default()
        });

        let scene = TestScene {
            analytic: vec![AnalyticLight::new(AnalyticLightKind::Point)],
            ..Default::default()
        };

        let events = render(&mut target, &mut ctx, &scene, Default::default());

        assert_eq!(
            vec![
                Kernel::UpdateLights,
                Kernel::PresampleLocalLights,
                Kernel::GenerateCandidates,
            ],
            kernels(&events)
        );

        assert_eq!(gpu::CANDIDATE_RESERVOIR_ID, target.output_reservoir());
        assert_eq!(
            gpu::CANDIDATE_RESERVOIR_ID,
            target.bridge_params().final_reservoir
        );
    }

    #[test]
    fn first_frame_prepares_resources() {
        let (mut target, mut ctx) = engine(Options::default());
        let scene = TestScene::default();

        let events = render(&mut target, &mut ctx, &scene, Default::default());

        for label in [
            "restir_runtime_params",
            "restir_bridge_params",
            "restir_light_tiles",
            "restir_compact_light_info",
            "restir_reservoirs",
            "restir_neighbor_offsets",
            "restir_surface_data",
            "restir_light_info",
            "restir_analytic_light_ids",
        ] {
            assert!(
                events.contains(&Event::CreateBuffer(label)),
                "missing {label}"
            );
        }

        assert!(events.contains(&Event::ClearBuffer("restir_reservoirs")));
        assert!(
            events.contains(&Event::WriteBuffer("restir_neighbor_offsets"))
        );
        assert!(events.contains(&Event::WriteBuffer("restir_runtime_params")));
        assert!(events.contains(&Event::WriteBuffer("restir_bridge_params")));

        let reservoirs = ctx
            .buffers
            .iter()
            .find(|desc| desc.label == "restir_reservoirs")
            .unwrap();

        // 64x32 pixels = 4x2 blocks of 256 reservoirs, 3 buffers, 24 bytes
        assert_eq!(4 * 2 * 256 * 3 * 24, reservoirs.size);

        // No lights, so nothing to update
        assert!(!kernels(&events).contains(&Kernel::UpdateLights));

        let events = render(&mut target, &mut ctx, &scene, Default::default());

        assert!(!events
            .iter()
            .any(|event| matches!(event, Event::CreateBuffer(_))));

        assert!(!events.contains(&Event::ClearBuffer("restir_reservoirs")));
    }

    #[test]
    fn spatiotemporal_alternates_reservoirs() {
        let (mut target, mut ctx) = engine(Options::default());
        let scene = TestScene::default();

        let mut outputs = Vec::new();
        let mut temporals = Vec::new();

        for _ in 0..4 {
            let events =
                render(&mut target, &mut ctx, &scene, Default::default());

            let (kernel, threads, params) =
                *dispatches(&events).last().unwrap();

            assert_eq!(Kernel::SpatiotemporalResampling, kernel);
            assert_eq!(FRAME_DIM, threads);
            assert_eq!(gpu::CANDIDATE_RESERVOIR_ID, params.input_reservoir);

            outputs.push(target.output_reservoir());
            temporals.push(params.temporal_reservoir);
        }

        assert_eq!(vec![0, 1, 0, 1], outputs);
        assert_eq!(vec![1, 0, 1, 0], temporals);
    }

    #[test]
    fn spatial_iteration_parity() {
        for (iterations, expected) in [(0, 2), (1, 1), (2, 2), (5, 1)] {
            let (mut target, mut ctx) = engine(Options {
                mode: Mode::SpatialResampling,
                spatial_iterations: iterations,
                ..Default::default()
            });

            let events = render(
                &mut target,
                &mut ctx,
                &TestScene::default(),
                Default::default(),
            );

            let spatial = kernels(&events)
                .into_iter()
                .filter(|kernel| *kernel == Kernel::SpatialResampling)
                .count();

            assert_eq!(iterations as usize, spatial);
            assert_eq!(expected, target.output_reservoir());
        }
    }

    #[test]
    fn mode_change_restarts_history() {
        let (mut target, mut ctx) = engine(Options::default());
        let scene = TestScene::default();

        render(&mut target, &mut ctx, &scene, Default::default());
        render(&mut target, &mut ctx, &scene, Default::default());

        assert_eq!(1, target.output_reservoir());

        target.set_options(Options {
            mode: Mode::TemporalResampling,
            ..Default::default()
        });

        assert_eq!(0, target.output_reservoir());

        let events = render(&mut target, &mut ctx, &scene, Default::default());

        assert!(events.contains(&Event::ClearBuffer("restir_reservoirs")));

        let (kernel, _, params) = *dispatches(&events).last().unwrap();

        assert_eq!(Kernel::TemporalResampling, kernel);
        assert_eq!(0, params.temporal_reservoir);
        assert_eq!(1, params.output_reservoir);
        assert_eq!(1, target.output_reservoir());
    }

    #[test]
    fn multiple_restir_passes() {
        let (mut target, mut ctx) = engine(Options {
            restir_pass_count: 2,
            ..Default::default()
        });

        let scene = TestScene::default();
        let events = render(&mut target, &mut ctx, &scene, Default::default());

        let reservoirs = ctx
            .buffers
            .iter()
            .rfind(|desc| desc.label == "restir_reservoirs")
            .unwrap();

        assert_eq!(2 * 4 * 2 * 256 * 3 * 24, reservoirs.size);

        let temporal: Vec<_> = dispatches(&events)
            .into_iter()
            .filter(|(kernel, _, _)| {
                *kernel == Kernel::SpatiotemporalResampling
            })
            .map(|(_, _, params)| params.restir_pass)
            .collect();

        assert_eq!(vec![0, 1], temporal);
        assert_eq!(2, target.bridge_params().restir_pass_count);

        target.set_options(Options {
            restir_pass_count: 3,
            ..Default::default()
        });

        assert_eq!(0, target.output_reservoir());

        let events = render(&mut target, &mut ctx, &scene, Default::default());

        assert!(events.contains(&Event::CreateBuffer("restir_reservoirs")));
        assert!(events.contains(&Event::ClearBuffer("restir_reservoirs")));

        let reservoirs = ctx
            .buffers
            .iter()
            .rfind(|desc| desc.label == "restir_reservoirs")
            .unwrap();

        assert_eq!(3 * 4 * 2 * 256 * 3 * 24, reservoirs.size);
    }

    #[test]
    fn resampling_policy_reaches_kernels() {
        let (mut target, mut ctx) = engine(Options::default());
        let scene = TestScene::default();

        let events = render(&mut target, &mut ctx, &scene, Default::default());
        let defines = loaded_defines(&events);

        assert_eq!(Some("1"), defines[0].get("UNBIASED"));
        assert_eq!(Some("1"), defines[0].get("USE_VISIBILITY"));
        assert_eq!(Some("0"), defines[0].get("REUSE_VISIBILITY"));
        assert_eq!(Some("0"), defines[0].get("INITIAL_PATH_SAMPLE_COUNT"));

        target.set_options(Options {
            unbiased: false,
            reuse_final_visibility: true,
            use_m_factor: true,
            spatial_shift_mapping: ShiftMapping::Reconnection,
            initial_path_sample_count: 2,
            ..Default::default()
        });

        let events = render(&mut target, &mut ctx, &scene, Default::default());
        let defines = loaded_defines(&events);

        assert_eq!(1, defines.len());
        assert_eq!(Some("0"), defines[0].get("UNBIASED"));
        assert_eq!(Some("1"), defines[0].get("REUSE_VISIBILITY"));
        assert_eq!(Some("2"), defines[0].get("INITIAL_PATH_SAMPLE_COUNT"));

        let bridge = target.bridge_params();

        assert_eq!(0, bridge.unbiased);
        assert_eq!(1, bridge.use_final_visibility);
        assert_eq!(1, bridge.reuse_final_visibility);
        assert_eq!(1, bridge.use_m_factor);
        assert_eq!(2, bridge.initial_path_sample_count);
        assert_eq!(
            ShiftMapping::RandomReplay as u32,
            bridge.temporal_shift_mapping
        );
        assert_eq!(
            ShiftMapping::Mis as u32,
            bridge.temporal_final_shift_mapping
        );
        assert_eq!(
            ShiftMapping::Reconnection as u32,
            bridge.spatial_shift_mapping
        );

        // Reusing visibility requires having it in the first place
        target.set_options(Options {
            use_final_visibility: false,
            reuse_final_visibility: true,
            ..Default::default()
        });

        assert_eq!(0, target.bridge_params().reuse_final_visibility);
        let defines = target.defines().unwrap();

        assert_eq!(Some("0"), defines.get("REUSE_VISIBILITY"));
    }

    #[test]
    fn bridge_params_carry_onion_jitter() {
        let (mut target, mut ctx) = engine(Options::default());

        assert_eq!(0.0, target.bridge_params().jitter_linear_factor);

        let scene = TestScene::default();

        render(&mut target, &mut ctx, &scene, Default::default());

        let jitter = target.context().unwrap().jitter();
        let bridge = target.bridge_params();

        assert_eq!(jitter.cubic_root_factor, bridge.jitter_cubic_root_factor);
        assert_eq!(jitter.linear_factor, bridge.jitter_linear_factor);
    }

    #[test]
    fn context_follows_frame_size_and_tiles() {
        let (mut target, mut ctx) = engine(Options::default());
        let scene = TestScene::default();

        render(&mut target, &mut ctx, &scene, Default::default());

        target
            .begin_frame(&mut ctx, &scene, uvec2(128, 64), Default::default())
            .unwrap();

        let events = ctx.take_events();

        assert!(events.contains(&Event::CreateBuffer("restir_reservoirs")));
        assert!(events.contains(&Event::ClearBuffer("restir_reservoirs")));
        assert_eq!(
            uvec2(128, 64),
            target.context().unwrap().params().render_size
        );

        target.set_options(Options {
            presampled_tile_count: 64,
            ..Default::default()
        });

        target
            .begin_frame(&mut ctx, &scene, uvec2(128, 64), Default::default())
            .unwrap();

        let events = ctx.take_events();

        assert!(events.contains(&Event::CreateBuffer("restir_light_tiles")));
        assert_eq!(64, target.context().unwrap().params().tile_count);
    }

    #[test]
    fn invalid_frame_size() {
        let (mut target, mut ctx) = engine(Options::default());

        let actual = target.begin_frame(
            &mut ctx,
            &TestScene::default(),
            uvec2(0, 32),
            Default::default(),
        );

        assert!(matches!(actual, Err(Error::InvalidContextParams(_))));
    }

    #[test]
    fn lights_get_updated_when_dirty() {
        let (mut target, mut ctx) = engine(Options::default());

        let scene = TestScene {
            analytic: vec![
                AnalyticLight::new(AnalyticLightKind::Point),
                AnalyticLight::new(AnalyticLightKind::Directional),
                AnalyticLight::new(AnalyticLightKind::Point),
            ],
            emissive: triangles(5),
            ..Default::default()
        };

        // 5 emissive + 2 local analytic = 7 local lights -> 4x2 pdf, 2 mips
        let events = render(&mut target, &mut ctx, &scene, Default::default());

        assert!(events.contains(&Event::CreateTexture(TextureDesc {
            label: "restir_local_light_pdf",
            size: uvec2(4, 2),
            mip_count: 2,
            format: TextureFormat::R16Float,
        })));

        let updates: Vec<_> = dispatches(&events)
            .into_iter()
            .filter(|(kernel, _, _)| {
                matches!(
                    kernel,
                    Kernel::UpdateLights | Kernel::BuildLocalLightPdfMip
                )
            })
            .collect();

        assert_eq!(2, updates.len());
        assert_eq!(Kernel::UpdateLights, updates[0].0);
        assert_eq!(uvec2(8192, 1), updates[0].1);
        assert_eq!(0b1111, updates[0].2.update_flags);
        assert_eq!(Kernel::BuildLocalLightPdfMip, updates[1].0);
        assert_eq!(uvec2(2, 1), updates[1].1);
        assert_eq!(1, updates[1].2.mip_level);

        assert_eq!(8, target.lights().total_light_count());
        assert_eq!(7, target.lights().local_light_count());

        let params = target.runtime_params().unwrap();

        assert_eq!(7, params.num_local_lights);
        assert_eq!(7, params.first_infinite_light);
        assert_eq!(1, params.num_infinite_lights);
        assert_eq!(1, params.enable_local_light_importance_sampling);

        // Nothing changed, nothing to update
        let events = render(&mut target, &mut ctx, &scene, Default::default());

        assert!(!kernels(&events).contains(&Kernel::UpdateLights));

        let events = render(
            &mut target,
            &mut ctx,
            &scene,
            SceneChanges::LIGHT_INTENSITY_CHANGED,
        );

        let updates = dispatches(&events);

        assert_eq!(Kernel::UpdateLights, updates[0].0);
        assert_eq!(
            gpu::KernelParams::UPDATE_ANALYTIC_FLUX,
            updates[0].2.update_flags
        );
        assert_eq!(Kernel::BuildLocalLightPdfMip, updates[1].0);
    }

    #[test]
    fn analytic_light_ids_get_uploaded() {
        let (mut target, mut ctx) = engine(Options::default());

        let mut scene = TestScene {
            analytic: vec![
                AnalyticLight::new(AnalyticLightKind::Directional),
                AnalyticLight::new(AnalyticLightKind::Rect),
                AnalyticLight::new(AnalyticLightKind::Point),
            ],
            ..Default::default()
        };

        let events = render(&mut target, &mut ctx, &scene, Default::default());

        assert_eq!(&[2, 0], target.lights().analytic_light_ids());
        assert!(
            events.contains(&Event::WriteBuffer("restir_analytic_light_ids"))
        );

        let ids: &[u32] = bytemuck::cast_slice(
            ctx.contents("restir_analytic_light_ids").unwrap(),
        );

        assert_eq!(&[2, 0], ids);

        // Untouched lights don't get re-uploaded
        let events = render(&mut target, &mut ctx, &scene, Default::default());

        assert!(
            !events.contains(&Event::WriteBuffer("restir_analytic_light_ids"))
        );

        scene.analytic.extend([
            AnalyticLight::new(AnalyticLightKind::Distant),
            AnalyticLight::new(AnalyticLightKind::Point),
        ]);

        let events = render(
            &mut target,
            &mut ctx,
            &scene,
            SceneChanges::LIGHT_COUNT_CHANGED,
        );

        assert!(
            events.contains(&Event::CreateBuffer("restir_analytic_light_ids"))
        );

        let ids: &[u32] = bytemuck::cast_slice(
            ctx.contents("restir_analytic_light_ids").unwrap(),
        );

        assert_eq!(&[2, 4, 0, 3], ids);
    }

    #[test]
    fn env_light_change_updates_lights() {
        let (mut target, mut ctx) = engine(Options::default());

        let mut scene = TestScene {
            analytic: vec![AnalyticLight::new(AnalyticLightKind::Point)],
            ..Default::default()
        };

        render(&mut target, &mut ctx, &scene, Default::default());

        scene.env = env(2, 2);

        let events = render(
            &mut target,
            &mut ctx,
            &scene,
            SceneChanges::ENV_MAP_CHANGED,
        );

        assert_eq!(2, target.lights().total_light_count());
        assert_eq!(1, target.lights().env_light_index());

        // Light info grew, so everything gets rewritten
        assert!(events.contains(&Event::CreateBuffer("restir_light_info")));

        let (kernel, _, params) = dispatches(&events)[0];

        assert_eq!(Kernel::UpdateLights, kernel);
        assert_eq!(0b11111, params.update_flags);

        // Light info is large enough now; only the env light gets refreshed
        let events = render(
            &mut target,
            &mut ctx,
            &scene,
            SceneChanges::ENV_MAP_INTENSITY_CHANGED,
        );

        assert!(!events.contains(&Event::CreateBuffer("restir_light_info")));

        let (kernel, _, params) = dispatches(&events)[0];

        assert_eq!(Kernel::UpdateLights, kernel);
        assert_eq!(gpu::KernelParams::UPDATE_ENV_LIGHT, params.update_flags);
    }

    #[test]
    fn local_layout_change_clears_pdf() {
        let (mut target, mut ctx) = engine(Options::default());

        let mut scene = TestScene {
            emissive: triangles(3),
            ..Default::default()
        };

        render(&mut target, &mut ctx, &scene, Default::default());

        scene.emissive = triangles(2);

        let events = render(
            &mut target,
            &mut ctx,
            &scene,
            SceneChanges::LIGHT_COLLECTION_CHANGED,
        );

        assert!(
            events.contains(&Event::ClearTexture("restir_local_light_pdf"))
        );

        let (kernel, _, params) = dispatches(&events)[0];

        assert_eq!(Kernel::UpdateLights, kernel);
        assert_eq!(0b1111, params.update_flags);
    }

    #[test]
    fn env_light_pdf() {
        let (mut target, mut ctx) = engine(Options::default());

        let scene = TestScene {
            env: env(3, 2),
            ..Default::default()
        };

        let events = render(&mut target, &mut ctx, &scene, Default::default());

        assert!(events.contains(&Event::CreateTexture(TextureDesc {
            label: "restir_env_light_pdf",
            size: uvec2(4, 2),
            mip_count: 3,
            format: TextureFormat::R16Float,
        })));

        for mip in 0..3 {
            assert!(events
                .contains(&Event::WriteTexture("restir_env_light_pdf", mip)));
        }

        assert!(kernels(&events).contains(&Kernel::PresampleEnvLight));

        let bridge = target.bridge_params();

        assert_eq!(4, bridge.env_pdf_width);
        assert_eq!(2, bridge.env_pdf_height);
        assert_eq!(3, bridge.env_pdf_mip_count);
        assert_eq!(1, bridge.total_light_count);
        assert_relative_eq!(1.0, bridge.light_selection_probabilities.x);

        // Env light doesn't get rebuilt unless it changes
        let events = render(&mut target, &mut ctx, &scene, Default::default());

        assert!(!events
            .iter()
            .any(|event| matches!(event, Event::CreateTexture(_))));

        let events = render(
            &mut target,
            &mut ctx,
            &scene,
            SceneChanges::ENV_MAP_INTENSITY_CHANGED,
        );

        assert!(events
            .contains(&Event::WriteTexture("restir_env_light_luminance", 0)));
    }

    #[test]
    fn env_light_can_be_disabled() {
        let (mut target, mut ctx) = engine(Options::default());

        let mut scene = TestScene {
            env: env(4, 2),
            ..Default::default()
        };

        render(&mut target, &mut ctx, &scene, Default::default());

        scene.settings.use_env_light = false;

        let events = render(
            &mut target,
            &mut ctx,
            &scene,
            SceneChanges::RENDER_SETTINGS_CHANGED,
        );

        assert!(!kernels(&events).contains(&Kernel::PresampleEnvLight));
        assert_eq!(0, target.bridge_params().env_pdf_width);

        let defines = loaded_defines(&events);

        assert_eq!(1, defines.len());
        assert_eq!(Some("0"), defines[0].get("USE_ENV_LIGHT"));
    }

    #[test]
    fn alias_tables() {
        let (mut target, mut ctx) = engine(Options {
            light_sampling_structure: LightSamplingStructure::AliasTable,
            emissive_light_weight: 0.5,
            ..Default::default()
        });

        let scene = TestScene {
            analytic: vec![
                AnalyticLight::new(AnalyticLightKind::Point),
                AnalyticLight::new(AnalyticLightKind::Distant),
            ],
            emissive: triangles(3),
            env: env(4, 2),
            ..Default::default()
        };

        let events = render(&mut target, &mut ctx, &scene, Default::default());

        for label in [
            "restir_env_alias_table",
            "restir_emissive_alias_table",
            "restir_analytic_alias_table",
        ] {
            assert!(events.contains(&Event::CreateBuffer(label)));
            assert!(events.contains(&Event::WriteBuffer(label)));
        }

        assert!(!events.iter().any(|event| matches!(
            event,
            Event::CreateTexture(TextureDesc {
                label: "restir_local_light_pdf" | "restir_env_light_pdf",
                ..
            })
        )));

        let bridge = target.bridge_params();

        assert_eq!(8, bridge.env_alias_count);
        assert_eq!(3, bridge.emissive_alias_count);
        assert_eq!(2, bridge.analytic_alias_count);

        assert_relative_eq!(0.4, bridge.light_selection_probabilities.x);
        assert_relative_eq!(0.2, bridge.light_selection_probabilities.y);
        assert_relative_eq!(0.4, bridge.light_selection_probabilities.z);

        let defines = loaded_defines(&events);

        assert_eq!(1, defines.len());

        let defines = &defines[0];

        assert_eq!(Some("1"), defines.get("USE_ALIAS_TABLES"));
        assert_eq!(Some("4"), defines.get("LIGHT_SAMPLE_ENV_INDEX_BITS"));
        assert_eq!(
            Some("26"),
            defines.get("LIGHT_SAMPLE_ENV_POSITION_BITS")
        );
        assert_eq!(
            Some("2"),
            defines.get("LIGHT_SAMPLE_EMISSIVE_INDEX_BITS")
        );
        assert_eq!(
            Some("2"),
            defines.get("LIGHT_SAMPLE_ANALYTIC_INDEX_BITS")
        );
        assert_eq!(Some("1024"), defines.get("LIGHT_TILE_SIZE"));
        assert_eq!(Some("128"), defines.get("LIGHT_TILE_COUNT"));

        let counts: u32 = [
            "ENV_LIGHT_SAMPLE_COUNT",
            "EMISSIVE_LIGHT_SAMPLE_COUNT",
            "ANALYTIC_LIGHT_SAMPLE_COUNT",
        ]
        .into_iter()
        .map(|name| defines.get(name).unwrap().parse::<u32>().unwrap())
        .sum();

        assert_eq!(1024, counts);

        let params = target.runtime_params().unwrap();

        assert_eq!(0, params.enable_local_light_importance_sampling);
    }

    #[test]
    fn switching_structure_reloads_kernels() {
        let (mut target, mut ctx) = engine(Options::default());

        let scene = TestScene {
            emissive: triangles(3),
            ..Default::default()
        };

        let events = render(&mut target, &mut ctx, &scene, Default::default());

        assert_eq!(1, loaded_defines(&events).len());

        let events = render(&mut target, &mut ctx, &scene, Default::default());

        assert!(loaded_defines(&events).is_empty());

        target.set_options(Options {
            light_sampling_structure: LightSamplingStructure::AliasTable,
            ..Default::default()
        });

        let events = render(&mut target, &mut ctx, &scene, Default::default());
        let defines = loaded_defines(&events);

        assert_eq!(1, defines.len());
        assert_eq!(Some("1"), defines[0].get("USE_ALIAS_TABLES"));
        assert_eq!(0, target.bridge_params().local_pdf_width);
        assert!(events
            .contains(&Event::CreateBuffer("restir_emissive_alias_table")));

        let events = render(
            &mut target,
            &mut ctx,
            &scene,
            SceneChanges::RECOMPILE_NEEDED,
        );

        assert_eq!(1, loaded_defines(&events).len());
    }

    #[test]
    fn bridge_params_track_previous_camera() {
        let (mut target, mut ctx) = engine(Options::default());

        let mut scene = TestScene {
            camera: CameraData {
                u: vec3(1.0, 0.0, 0.0),
                ..Default::default()
            },
            ..Default::default()
        };

        target
            .begin_frame(&mut ctx, &scene, FRAME_DIM, Default::default())
            .unwrap();

        assert_eq!(
            vec3(1.0, 0.0, 0.0),
            target.bridge_params().prev_camera_u.truncate()
        );

        target.update(&mut ctx, &scene, None).unwrap();
        target.end_frame(&scene);

        scene.camera.u = vec3(0.0, 2.0, 0.0);

        target
            .begin_frame(&mut ctx, &scene, FRAME_DIM, Default::default())
            .unwrap();

        let bridge = target.bridge_params();

        assert_eq!(vec3(1.0, 0.0, 0.0), bridge.prev_camera_u.truncate());
        assert_eq!(1, bridge.frame_index);
        assert_eq!(1, bridge.current_surface_buffer);
        assert_eq!(0, bridge.previous_surface_buffer);
        assert_eq!(64, bridge.frame_width);
        assert_eq!(32, bridge.frame_height);
    }
}
