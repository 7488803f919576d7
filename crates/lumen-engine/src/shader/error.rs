use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::stage::{LinkStatus, PipelineStage, ShaderStage};

/// Driver info logs are cut to this many characters before being surfaced.
pub const MAX_INFO_LOG_LEN: usize = 1024;

/// Failure while building or using a shader program.
///
/// Every variant is recoverable: the program is left inert and the caller
/// decides whether to fall back, retry with other source, or abort.
#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("failed to compile {stage} shader: {log}")]
    Compile { stage: ShaderStage, log: String },

    #[error("failed to link shader program: {log}")]
    Link { log: String },

    #[error("failed to validate shader program: {log}")]
    Validate { log: String },

    #[error("failed to read {stage} shader source '{}': {source}", path.display())]
    FileRead {
        stage: ShaderStage,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("driver could not allocate a {0} object")]
    Allocation(&'static str),

    #[error("shader program is not linked (status: {status:?})")]
    NotLinked { status: LinkStatus },
}

impl ShaderError {
    pub(crate) fn compile(stage: ShaderStage, log: impl AsRef<str>) -> Self {
        ShaderError::Compile { stage, log: truncate_log(log.as_ref()) }
    }

    pub(crate) fn link(log: impl AsRef<str>) -> Self {
        ShaderError::Link { log: truncate_log(log.as_ref()) }
    }

    pub(crate) fn validate(log: impl AsRef<str>) -> Self {
        ShaderError::Validate { log: truncate_log(log.as_ref()) }
    }

    /// Build step that failed, when the error came from building a program.
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            ShaderError::Compile { stage, .. } => Some(PipelineStage::Compile(*stage)),
            ShaderError::FileRead { stage, .. } => Some(PipelineStage::Compile(*stage)),
            ShaderError::Link { .. } => Some(PipelineStage::Link),
            ShaderError::Validate { .. } => Some(PipelineStage::Validate),
            ShaderError::Allocation(_) | ShaderError::NotLinked { .. } => None,
        }
    }

    /// Shader stage the error is attributed to, if any.
    pub fn shader_stage(&self) -> Option<ShaderStage> {
        match self.stage() {
            Some(PipelineStage::Compile(stage)) => Some(stage),
            _ => None,
        }
    }

    /// Driver-provided diagnostic text, if this error carries one.
    pub fn log(&self) -> Option<&str> {
        match self {
            ShaderError::Compile { log, .. }
            | ShaderError::Link { log }
            | ShaderError::Validate { log } => Some(log),
            _ => None,
        }
    }
}

/// Cuts `log` to `MAX_INFO_LOG_LEN` characters on a char boundary.
pub(crate) fn truncate_log(log: &str) -> String {
    let log = log.trim_end();
    match log.char_indices().nth(MAX_INFO_LOG_LEN) {
        Some((cut, _)) => log[..cut].to_string(),
        None => log.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_log_is_kept() {
        assert_eq!(truncate_log("error: x\n"), "error: x");
    }

    #[test]
    fn long_log_is_bounded() {
        let long = "é".repeat(MAX_INFO_LOG_LEN + 50);
        let cut = truncate_log(&long);
        assert_eq!(cut.chars().count(), MAX_INFO_LOG_LEN);
    }

    #[test]
    fn compile_error_names_stage() {
        let err = ShaderError::compile(ShaderStage::Fragment, "expected ';'");
        assert_eq!(err.stage(), Some(PipelineStage::Compile(ShaderStage::Fragment)));
        assert_eq!(err.shader_stage(), Some(ShaderStage::Fragment));
        assert!(err.to_string().contains("fragment"));
        assert_eq!(err.log(), Some("expected ';'"));
    }

    #[test]
    fn file_read_is_attributed_to_its_stage() {
        let err = ShaderError::FileRead {
            stage: ShaderStage::Vertex,
            path: PathBuf::from("missing.wgsl"),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        assert_eq!(err.shader_stage(), Some(ShaderStage::Vertex));
        assert!(err.to_string().contains("missing.wgsl"));
    }

    #[test]
    fn link_and_validate_stages() {
        assert_eq!(ShaderError::link("x").stage(), Some(PipelineStage::Link));
        assert_eq!(ShaderError::validate("x").stage(), Some(PipelineStage::Validate));
        assert_eq!(ShaderError::Allocation("program").stage(), None);
    }
}
