//! WGSL front end shared by all drivers.
//!
//! Compiling a stage means: parse, validate, and locate the entry point for
//! that stage. Linking two compiled stages means: check the inter-stage
//! interface and merge the uniform tables into one location space.

use std::collections::BTreeMap;
use std::fmt;

use naga::valid::{Capabilities, ModuleInfo, ValidationFlags, Validator};

use crate::shader::{ShaderStage, UniformLocation, UniformValue};

/// A parsed and validated single-stage module.
#[derive(Debug)]
pub struct CompiledStage {
    pub stage: ShaderStage,
    pub module: naga::Module,
    pub info: ModuleInfo,
    /// Index into `module.entry_points`.
    pub entry_point: usize,
    pub source: String,
}

impl CompiledStage {
    pub fn entry(&self) -> &naga::EntryPoint {
        &self.module.entry_points[self.entry_point]
    }

    pub fn entry_name(&self) -> &str {
        &self.entry().name
    }
}

/// Parses and validates `source` as the `stage` half of a program.
///
/// `Err` carries a diagnostic rendered against the source text.
pub fn compile(stage: ShaderStage, source: &str) -> Result<CompiledStage, String> {
    if source.trim().is_empty() {
        return Err(format!("{stage} shader source is empty"));
    }

    let module =
        naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;

    let info = Validator::new(ValidationFlags::all(), Capabilities::default())
        .validate(&module)
        .map_err(|e| e.emit_to_string(source))?;

    let wanted = stage.to_naga();
    let mut candidates = module
        .entry_points
        .iter()
        .enumerate()
        .filter(|(_, ep)| ep.stage == wanted)
        .map(|(i, _)| i);

    let entry_point = candidates
        .next()
        .ok_or_else(|| format!("no @{stage} entry point found"))?;

    if candidates.next().is_some() {
        return Err(format!("more than one @{stage} entry point; expected exactly one"));
    }

    Ok(CompiledStage {
        stage,
        module,
        info,
        entry_point,
        source: source.to_string(),
    })
}

/// Coarse type description used to compare types across modules.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Shape {
    Scalar { float: bool },
    Vector { size: u32, float: bool },
    Matrix { columns: u32, rows: u32 },
    Struct(String),
    Other(String),
}

impl Shape {
    pub fn of(module: &naga::Module, ty: naga::Handle<naga::Type>) -> Shape {
        let is_f32 = |s: naga::Scalar| s.kind == naga::ScalarKind::Float && s.width == 4;
        let ty = &module.types[ty];
        match ty.inner {
            naga::TypeInner::Scalar(s) => Shape::Scalar { float: is_f32(s) },
            naga::TypeInner::Vector { size, scalar } => Shape::Vector {
                size: vector_len(size) as u32,
                float: is_f32(scalar),
            },
            naga::TypeInner::Matrix { columns, rows, .. } => Shape::Matrix {
                columns: vector_len(columns) as u32,
                rows: vector_len(rows) as u32,
            },
            naga::TypeInner::Struct { .. } => {
                Shape::Struct(ty.name.clone().unwrap_or_else(|| "<anonymous>".to_string()))
            }
            ref other => Shape::Other(format!("{other:?}")),
        }
    }

    /// Number of `f32` components for plain float types.
    pub fn float_components(&self) -> Option<u32> {
        match *self {
            Shape::Scalar { float: true } => Some(1),
            Shape::Vector { size, float: true } => Some(size),
            Shape::Matrix { columns, rows } => Some(columns * rows),
            _ => None,
        }
    }

    /// Whether a CPU value of this kind may be written to a uniform of this shape.
    pub fn accepts(&self, value: &UniformValue) -> bool {
        match (self, value.shape()) {
            (Shape::Scalar { float: true }, (1, 1)) => true,
            (Shape::Vector { size, float: true }, (1, n)) => *size as usize == n,
            (Shape::Matrix { columns, rows }, (c, r)) => {
                *columns as usize == c && *rows as usize == r
            }
            _ => false,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Scalar { float: true } => f.write_str("f32"),
            Shape::Scalar { float: false } => f.write_str("non-f32 scalar"),
            Shape::Vector { size, float: true } => write!(f, "vec{size}<f32>"),
            Shape::Vector { size, float: false } => write!(f, "vec{size}<non-f32>"),
            Shape::Matrix { columns, rows } => write!(f, "mat{columns}x{rows}<f32>"),
            Shape::Struct(name) => write!(f, "struct {name}"),
            Shape::Other(desc) => f.write_str(desc),
        }
    }
}

pub(crate) fn vector_len(size: naga::VectorSize) -> usize {
    match size {
        naga::VectorSize::Bi => 2,
        naga::VectorSize::Tri => 3,
        naga::VectorSize::Quad => 4,
    }
}

/// `@location` attribute consumed by the vertex entry point.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct VertexInput {
    pub location: u32,
    pub name: String,
    pub shape: Shape,
}

/// `@location` value passed between stages (or written by the fragment stage).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Varying {
    pub location: u32,
    pub shape: Shape,
}

/// One uniform of a linked program.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UniformInfo {
    pub name: String,
    pub location: UniformLocation,
    pub group: u32,
    pub binding: u32,
    pub shape: Shape,
    /// Size in bytes as laid out in a uniform buffer.
    pub size: u32,
    pub vertex: bool,
    pub fragment: bool,
}

/// Reflection of a linked vertex + fragment pair.
#[derive(Debug, Clone, Default)]
pub struct ProgramInterface {
    pub vertex_inputs: Vec<VertexInput>,
    pub varyings: Vec<Varying>,
    pub fragment_outputs: Vec<Varying>,
    pub uniforms: Vec<UniformInfo>,
}

impl ProgramInterface {
    pub fn uniform(&self, name: &str) -> Option<&UniformInfo> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    pub fn uniform_at(&self, location: UniformLocation) -> Option<&UniformInfo> {
        location.index().and_then(|i| self.uniforms.get(i))
    }

    pub fn location_of(&self, name: &str) -> UniformLocation {
        self.uniform(name).map(|u| u.location).unwrap_or(UniformLocation::ABSENT)
    }
}

/// Flattened entry-point bindings of one stage.
#[derive(Debug, Default)]
struct StageIo {
    inputs: Vec<(u32, String, Shape)>,
    outputs: Vec<(u32, Shape)>,
    writes_position: bool,
}

fn collect_binding(
    module: &naga::Module,
    binding: Option<&naga::Binding>,
    name: Option<&str>,
    ty: naga::Handle<naga::Type>,
    out: &mut Vec<(u32, String, Shape)>,
    position: &mut bool,
) {
    match binding {
        Some(naga::Binding::Location { location, .. }) => {
            out.push((*location, name.unwrap_or("").to_string(), Shape::of(module, ty)));
        }
        Some(naga::Binding::BuiltIn(naga::BuiltIn::Position { .. })) => *position = true,
        Some(naga::Binding::BuiltIn(_)) => {}
        None => {
            if let naga::TypeInner::Struct { ref members, .. } = module.types[ty].inner {
                for m in members {
                    collect_binding(module, m.binding.as_ref(), m.name.as_deref(), m.ty, out, position);
                }
            }
        }
    }
}

fn stage_io(stage: &CompiledStage) -> StageIo {
    let module = &stage.module;
    let function = &stage.entry().function;
    let mut io = StageIo::default();

    let mut unused = false;
    for arg in &function.arguments {
        collect_binding(module, arg.binding.as_ref(), arg.name.as_deref(), arg.ty, &mut io.inputs, &mut unused);
    }

    if let Some(result) = function.result.as_ref() {
        let mut outputs = Vec::new();
        collect_binding(module, result.binding.as_ref(), None, result.ty, &mut outputs, &mut io.writes_position);
        io.outputs = outputs.into_iter().map(|(loc, _, shape)| (loc, shape)).collect();
    }

    io.inputs.sort_by_key(|(loc, ..)| *loc);
    io.outputs.sort_by_key(|(loc, _)| *loc);
    io
}

/// Checks the interface between `vertex` and `fragment` and merges uniforms.
///
/// `Err` carries a link log naming the first mismatch.
pub fn link(vertex: &CompiledStage, fragment: &CompiledStage) -> Result<ProgramInterface, String> {
    if vertex.stage != ShaderStage::Vertex {
        return Err(format!("expected a vertex stage, got {}", vertex.stage));
    }
    if fragment.stage != ShaderStage::Fragment {
        return Err(format!("expected a fragment stage, got {}", fragment.stage));
    }

    let vs = stage_io(vertex);
    let fs = stage_io(fragment);

    if !vs.writes_position {
        return Err(format!(
            "vertex entry point '{}' does not write @builtin(position)",
            vertex.entry_name()
        ));
    }

    for (location, name, shape) in &fs.inputs {
        match vs.outputs.iter().find(|(l, _)| l == location) {
            None => {
                return Err(format!(
                    "fragment input '{name}' at @location({location}) has no matching vertex output"
                ));
            }
            Some((_, out_shape)) if out_shape != shape => {
                return Err(format!(
                    "type mismatch at @location({location}): vertex writes {out_shape}, fragment reads {shape}"
                ));
            }
            Some(_) => {}
        }
    }

    let mut merged: BTreeMap<String, UniformInfo> = BTreeMap::new();
    for stage in [vertex, fragment] {
        let module = &stage.module;
        for (_, var) in module.global_variables.iter() {
            if var.space != naga::AddressSpace::Uniform {
                continue;
            }
            let name = var.name.clone().unwrap_or_default();
            let Some(rb) = var.binding.as_ref() else {
                return Err(format!("uniform '{name}' has no @group/@binding"));
            };
            let shape = Shape::of(module, var.ty);
            let size = module.types[var.ty].inner.size(module.to_ctx());

            let key = name.clone();
            match merged.get_mut(&key) {
                Some(existing) => {
                    if existing.shape != shape {
                        return Err(format!(
                            "uniform '{name}' declared as {} and {shape}",
                            existing.shape
                        ));
                    }
                    if (existing.group, existing.binding) != (rb.group, rb.binding) {
                        return Err(format!(
                            "uniform '{name}' bound at @group({}) @binding({}) and @group({}) @binding({})",
                            existing.group, existing.binding, rb.group, rb.binding
                        ));
                    }
                }
                None => {
                    merged.insert(
                        name.clone(),
                        UniformInfo {
                            name,
                            location: UniformLocation::ABSENT,
                            group: rb.group,
                            binding: rb.binding,
                            shape,
                            size,
                            vertex: false,
                            fragment: false,
                        },
                    );
                }
            }

            if let Some(entry) = merged.get_mut(&key) {
                match stage.stage {
                    ShaderStage::Vertex => entry.vertex = true,
                    ShaderStage::Fragment => entry.fragment = true,
                }
            }
        }
    }

    let mut uniforms: Vec<UniformInfo> = merged.into_values().collect();
    uniforms.sort_by_key(|u| (u.group, u.binding));

    for pair in uniforms.windows(2) {
        if (pair[0].group, pair[0].binding) == (pair[1].group, pair[1].binding) {
            return Err(format!(
                "uniforms '{}' and '{}' share @group({}) @binding({})",
                pair[0].name, pair[1].name, pair[0].group, pair[0].binding
            ));
        }
    }

    for (i, u) in uniforms.iter_mut().enumerate() {
        u.location = UniformLocation::new(i as i32);
    }

    Ok(ProgramInterface {
        vertex_inputs: vs
            .inputs
            .into_iter()
            .map(|(location, name, shape)| VertexInput { location, name, shape })
            .collect(),
        varyings: vs
            .outputs
            .into_iter()
            .map(|(location, shape)| Varying { location, shape })
            .collect(),
        fragment_outputs: fs
            .outputs
            .into_iter()
            .map(|(location, shape)| Varying { location, shape })
            .collect(),
        uniforms,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const VS: &str = r#"
@group(0) @binding(0) var<uniform> model: mat4x4<f32>;
@group(0) @binding(1) var<uniform> view: mat4x4<f32>;
@group(0) @binding(2) var<uniform> projection: mat4x4<f32>;

struct VertexOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) colour: vec4<f32>,
};

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> VertexOut {
    var out: VertexOut;
    out.clip = projection * view * model * vec4<f32>(position, 1.0);
    out.colour = vec4<f32>(clamp(position, vec3<f32>(0.0), vec3<f32>(1.0)), 1.0);
    return out;
}
"#;

    pub(crate) const FS: &str = r#"
@group(1) @binding(0) var<uniform> tint: vec4<f32>;

@fragment
fn fs_main(@location(0) colour: vec4<f32>) -> @location(0) vec4<f32> {
    return colour * tint;
}
"#;

    fn pair(vs: &str, fs: &str) -> (CompiledStage, CompiledStage) {
        (
            compile(ShaderStage::Vertex, vs).unwrap(),
            compile(ShaderStage::Fragment, fs).unwrap(),
        )
    }

    // ── compile ───────────────────────────────────────────────────────────

    #[test]
    fn compiles_valid_stages() {
        let (vs, fs) = pair(VS, FS);
        assert_eq!(vs.entry_name(), "vs_main");
        assert_eq!(fs.entry_name(), "fs_main");
    }

    #[test]
    fn syntax_error_is_reported() {
        let log = compile(ShaderStage::Vertex, &VS.replace("var out: VertexOut;", "var out VertexOut"))
            .unwrap_err();
        assert!(!log.is_empty());
    }

    #[test]
    fn empty_source_is_rejected() {
        let log = compile(ShaderStage::Fragment, "  \n ").unwrap_err();
        assert!(log.contains("empty"));
    }

    #[test]
    fn missing_entry_point_is_rejected() {
        let log = compile(ShaderStage::Vertex, FS).unwrap_err();
        assert!(log.contains("@vertex"));
    }

    // ── link ──────────────────────────────────────────────────────────────

    #[test]
    fn link_assigns_dense_locations_in_binding_order() {
        let (vs, fs) = pair(VS, FS);
        let iface = link(&vs, &fs).unwrap();

        let names: Vec<&str> = iface.uniforms.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["model", "view", "projection", "tint"]);
        for (i, u) in iface.uniforms.iter().enumerate() {
            assert_eq!(u.location, UniformLocation::new(i as i32));
        }

        let model = iface.uniform("model").unwrap();
        assert_eq!(model.shape, Shape::Matrix { columns: 4, rows: 4 });
        assert_eq!(model.size, 64);
        assert!(model.vertex && !model.fragment);
        assert!(iface.uniform("tint").unwrap().fragment);
        assert_eq!(iface.location_of("nope"), UniformLocation::ABSENT);
    }

    #[test]
    fn link_reflects_vertex_inputs_and_varyings() {
        let (vs, fs) = pair(VS, FS);
        let iface = link(&vs, &fs).unwrap();
        assert_eq!(
            iface.vertex_inputs,
            [VertexInput {
                location: 0,
                name: "position".into(),
                shape: Shape::Vector { size: 3, float: true },
            }]
        );
        assert_eq!(iface.varyings.len(), 1);
        assert_eq!(iface.fragment_outputs[0].location, 0);
    }

    #[test]
    fn link_rejects_unmatched_fragment_input() {
        let fs = r#"
@fragment
fn fs_main(@location(3) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return vec4<f32>(uv, 0.0, 1.0);
}
"#;
        let (vs, fs) = pair(VS, fs);
        let log = link(&vs, &fs).unwrap_err();
        assert!(log.contains("@location(3)"));
    }

    #[test]
    fn link_rejects_type_mismatch() {
        let fs = r#"
@fragment
fn fs_main(@location(0) colour: vec3<f32>) -> @location(0) vec4<f32> {
    return vec4<f32>(colour, 1.0);
}
"#;
        let (vs, fs) = pair(VS, fs);
        let log = link(&vs, &fs).unwrap_err();
        assert!(log.contains("type mismatch"));
    }

    #[test]
    fn link_rejects_conflicting_uniform_types() {
        let fs = r#"
@group(0) @binding(0) var<uniform> model: vec4<f32>;

@fragment
fn fs_main(@location(0) colour: vec4<f32>) -> @location(0) vec4<f32> {
    return colour * model;
}
"#;
        let (vs, fs) = pair(VS, fs);
        let log = link(&vs, &fs).unwrap_err();
        assert!(log.contains("'model'"));
    }

    #[test]
    fn shared_uniform_is_visible_to_both_stages() {
        let fs = r#"
@group(0) @binding(0) var<uniform> model: mat4x4<f32>;

@fragment
fn fs_main(@location(0) colour: vec4<f32>) -> @location(0) vec4<f32> {
    return model * colour;
}
"#;
        let (vs, fs) = pair(VS, fs);
        let iface = link(&vs, &fs).unwrap();
        let model = iface.uniform("model").unwrap();
        assert!(model.vertex && model.fragment);
        assert_eq!(iface.uniforms.len(), 3);
    }

    #[test]
    fn shape_accepts_matching_values() {
        let m4 = Shape::Matrix { columns: 4, rows: 4 };
        assert!(m4.accepts(&UniformValue::Mat4([0.0; 16])));
        assert!(!m4.accepts(&UniformValue::Vec4([0.0; 4])));
        let v3 = Shape::Vector { size: 3, float: true };
        assert!(v3.accepts(&UniformValue::Vec3([0.0; 3])));
        assert!(!v3.accepts(&UniformValue::Float(0.0)));
    }
}
