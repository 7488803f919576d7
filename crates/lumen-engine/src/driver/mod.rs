//! Graphics-driver seam.
//!
//! `ShaderProgram` never talks to a graphics API directly; it drives a
//! `ShaderDriver`, which mirrors the object model of a GL-style context:
//! integer handles for stage and program objects, a single "current" program,
//! and uniform writes that target whatever program is current.
//!
//! Two implementations ship:
//! - [`SoftDriver`]: headless, CPU-only (WGSL interpreter + rasterizer)
//! - [`GpuDriver`]: wgpu-backed, used by windowed applications
//!
//! Both share the WGSL front end in [`front`].

use std::fmt;
use std::num::NonZeroU32;

use thiserror::Error;

use crate::shader::{ShaderStage, UniformLocation, UniformValue};

pub mod front;
mod gpu;
pub mod soft;

pub use gpu::{GpuDriver, GpuMesh};
pub use soft::{DrawStats, EvalError, Framebuffer, SoftDriver};

/// Driver-issued id of a linked-program object.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ProgramHandle(NonZeroU32);

/// Driver-issued id of a single-stage shader object.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct StageHandle(NonZeroU32);

impl ProgramHandle {
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl StageHandle {
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for ProgramHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "program#{}", self.0)
    }
}

impl fmt::Display for StageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage#{}", self.0)
    }
}

/// Failure while issuing a draw with the current program.
#[derive(Debug, Error)]
pub enum DrawError {
    #[error("no program is current")]
    NoProgram,

    #[error("{0} is not linked and validated")]
    NotLinked(ProgramHandle),

    #[error("{stage} entry point returned no value")]
    NoOutput { stage: ShaderStage },

    #[error("vertex entry point did not write @builtin(position)")]
    NoPosition,

    #[error("fragment entry point did not write @location(0)")]
    NoColor,

    #[error("mesh has no attribute for shader input @location({location})")]
    MissingAttribute { location: u32 },

    #[error("all {capacity} uniform slots of this frame are in use")]
    UniformSlotsExhausted { capacity: u32 },

    #[error("{0}")]
    Unsupported(String),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Object model shared by every backend.
///
/// Methods take `&self`: a driver is a shared context, and implementations
/// keep their object tables behind interior mutability. All calls happen on
/// the thread that owns the context.
pub trait ShaderDriver {
    /// Allocates an empty program object. `None` if the driver refuses.
    fn create_program(&self) -> Option<ProgramHandle>;

    /// Allocates an empty stage object. `None` if the driver refuses.
    fn create_stage(&self, stage: ShaderStage) -> Option<StageHandle>;

    /// Compiles `source` into the stage object; `Err` carries the info log.
    fn compile_stage(&self, stage: StageHandle, source: &str) -> Result<(), String>;

    fn attach_stage(&self, program: ProgramHandle, stage: StageHandle);

    /// Deletes a stage object. Programs it was attached to keep their copy.
    fn delete_stage(&self, stage: StageHandle);

    /// Links attached stages; `Err` carries the info log.
    fn link_program(&self, program: ProgramHandle) -> Result<(), String>;

    /// Checks the linked program can execute on this driver.
    fn validate_program(&self, program: ProgramHandle) -> Result<(), String>;

    /// Location of `name` in a linked program, `ABSENT` otherwise.
    fn uniform_location(&self, program: ProgramHandle, name: &str) -> UniformLocation;

    /// Makes `program` current; `None` unbinds.
    fn use_program(&self, program: Option<ProgramHandle>);

    fn current_program(&self) -> Option<ProgramHandle>;

    /// Writes a uniform of the current program.
    ///
    /// An absent location or a missing current program is a silent no-op.
    fn set_uniform(&self, location: UniformLocation, value: UniformValue);

    /// Deletes a program object; deleting the current program unbinds it.
    fn delete_program(&self, program: ProgramHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_not_a_handle() {
        assert!(ProgramHandle::new(0).is_none());
        assert!(StageHandle::new(0).is_none());
        assert_eq!(ProgramHandle::new(4).map(ProgramHandle::get), Some(4));
    }
}
