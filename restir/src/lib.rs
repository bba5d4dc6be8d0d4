//! Host-side orchestration of ReSTIR direct lighting: reservoir layout, light
//! bookkeeping, light sampling structures and the per-frame sequence of
//! resampling passes.
//!
//! Kernels themselves are provided by the caller (see [`RenderContext`]);
//! types they share with the host live in [`gpu`].

mod alias_table;
#[cfg(feature = "wgpu")]
mod buffers;
mod context;
mod device;
mod dirty;
mod engine;
mod error;
mod layout;
mod light_sampling;
mod lights;
mod onion;
mod options;
mod pdf;
mod scene;
mod scheduler;

pub use restir_gpu as gpu;

pub use self::alias_table::*;
#[cfg(feature = "wgpu")]
pub use self::buffers::*;
pub use self::context::*;
pub use self::device::*;
pub use self::dirty::*;
pub use self::engine::*;
pub use self::error::*;
pub use self::layout::*;
pub use self::light_sampling::*;
pub use self::lights::*;
pub use self::onion::*;
pub use self::options::*;
pub use self::pdf::*;
pub use self::scene::*;
pub use self::scheduler::*;
