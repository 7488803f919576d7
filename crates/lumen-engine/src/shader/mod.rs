//! Shader-program lifecycle.
//!
//! `ShaderProgram` compiles a vertex + fragment pair through a `ShaderDriver`,
//! tracks link status, caches uniform locations and owns the resulting
//! program handle.

mod error;
mod program;
mod source;
mod stage;
pub mod uniform;

pub use error::{MAX_INFO_LOG_LEN, ShaderError};
pub use program::ShaderProgram;
pub use source::{FsSourceReader, SourceReader};
pub use stage::{LinkStatus, PipelineStage, ShaderStage};
pub use uniform::{UniformLocation, UniformValue};
