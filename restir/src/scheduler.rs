use log::debug;

use crate::{gpu, Kernel, Mode, Options};

/// Single kernel dispatch of a frame, together with the reservoir buffers it
/// reads and writes.
///
/// Reservoir slots are relative to the resampling chain given by
/// `restir_pass`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassInvocation {
    pub kernel: Kernel,
    pub input_reservoir: u32,
    pub output_reservoir: u32,
    pub temporal_reservoir: u32,
    pub spatial_iteration: u32,
    pub restir_pass: u32,
}

impl PassInvocation {
    fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            input_reservoir: gpu::CANDIDATE_RESERVOIR_ID,
            output_reservoir: gpu::CANDIDATE_RESERVOIR_ID,
            temporal_reservoir: 0,
            spatial_iteration: 0,
            restir_pass: 0,
        }
    }

    pub fn kernel_params(&self) -> gpu::KernelParams {
        gpu::KernelParams {
            input_reservoir: self.input_reservoir,
            output_reservoir: self.output_reservoir,
            temporal_reservoir: self.temporal_reservoir,
            spatial_iteration: self.spatial_iteration,
            restir_pass: self.restir_pass,
            ..Default::default()
        }
    }
}

/// Ordered list of passes run in a frame and the reservoir buffer that ends
/// up holding the frame's result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramePlan {
    passes: Vec<PassInvocation>,
    output_reservoir: u32,
}

impl FramePlan {
    pub fn new(
        options: &Options,
        last_frame_reservoir: u32,
        env_light_present: bool,
    ) -> Self {
        let mut passes =
            vec![PassInvocation::new(Kernel::PresampleLocalLights)];

        if env_light_present {
            passes.push(PassInvocation::new(Kernel::PresampleEnvLight));
        }

        let restir_passes = options.restir_pass_count;
        let mut push = |pass| passes.extend(per_pass(pass, restir_passes));

        push(PassInvocation::new(Kernel::GenerateCandidates));

        if options.mode.resamples() && options.test_candidate_visibility {
            push(PassInvocation::new(Kernel::TestCandidateVisibility));
        }

        let output_reservoir = match options.mode {
            Mode::NoResampling => gpu::CANDIDATE_RESERVOIR_ID,

            Mode::SpatialResampling => {
                let (iterations, output) = spatial_ping_pong(
                    gpu::CANDIDATE_RESERVOIR_ID,
                    options.spatial_iterations,
                );

                for pass in iterations {
                    push(pass);
                }

                output
            }

            Mode::TemporalResampling | Mode::SpatiotemporalResampling => {
                let kernel = if options.mode == Mode::TemporalResampling {
                    Kernel::TemporalResampling
                } else {
                    Kernel::SpatiotemporalResampling
                };

                let output = temporal_output(last_frame_reservoir);

                push(PassInvocation {
                    output_reservoir: output,
                    temporal_reservoir: last_frame_reservoir,
                    ..PassInvocation::new(kernel)
                });

                output
            }
        };

        debug!(
            "Planned frame; mode={:?}, restir_passes={restir_passes}, \
             dispatches={}, output={output_reservoir}",
            options.mode,
            passes.len(),
        );

        Self {
            passes,
            output_reservoir,
        }
    }

    pub fn passes(&self) -> &[PassInvocation] {
        &self.passes
    }

    pub fn output_reservoir(&self) -> u32 {
        self.output_reservoir
    }
}

/// Runs given number of spatial iterations starting at `input`, swapping
/// input and output buffers after each one; returns the iterations and the
/// buffer holding the final result.
pub fn spatial_ping_pong(
    mut input: u32,
    iterations: u32,
) -> (Vec<PassInvocation>, u32) {
    let mut output = if input != 1 { 1 } else { 0 };

    let passes = (0..iterations)
        .map(|spatial_iteration| {
            let pass = PassInvocation {
                input_reservoir: input,
                output_reservoir: output,
                spatial_iteration,
                ..PassInvocation::new(Kernel::SpatialResampling)
            };

            std::mem::swap(&mut input, &mut output);

            pass
        })
        .collect();

    (passes, input)
}

/// Repeats given invocation once for each resampling chain.
fn per_pass(
    pass: PassInvocation,
    restir_passes: u32,
) -> impl Iterator<Item = PassInvocation> {
    (0..restir_passes).map(move |restir_pass| PassInvocation {
        restir_pass,
        ..pass
    })
}

/// Buffer written by a temporal pass; alternates between 0 and 1 so that the
/// previous frame's result stays readable.
pub fn temporal_output(last_frame_reservoir: u32) -> u32 {
    if last_frame_reservoir == 1 {
        0
    } else {
        1
    }
}
