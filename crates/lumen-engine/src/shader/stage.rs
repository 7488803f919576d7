use std::fmt;

/// One compilable unit of a program.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 2] = [ShaderStage::Vertex, ShaderStage::Fragment];

    pub fn as_str(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }

    pub(crate) fn to_naga(self) -> naga::ShaderStage {
        match self {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step of the build pipeline that produced an error.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PipelineStage {
    Compile(ShaderStage),
    Link,
    Validate,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Compile(stage) => write!(f, "{stage} compile"),
            PipelineStage::Link => f.write_str("link"),
            PipelineStage::Validate => f.write_str("validate"),
        }
    }
}

/// Lifecycle state of a `ShaderProgram`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum LinkStatus {
    #[default]
    Uninitialized,
    Compiling,
    Linked,
    Failed,
}
