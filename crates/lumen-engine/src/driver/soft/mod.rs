//! Headless software driver.
//!
//! Stages are compiled by the shared WGSL front end; drawing interprets the
//! linked entry points on the CPU and rasterizes into an owned `Framebuffer`.

use std::cell::{Cell, Ref, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use naga::{AddressSpace, Binding, BuiltIn, Handle, Module, TypeInner};

use crate::driver::front::{self, CompiledStage, ProgramInterface, Shape};
use crate::driver::{DrawError, ProgramHandle, ShaderDriver, StageHandle};
use crate::mesh::Mesh;
use crate::shader::{ShaderStage, UniformLocation, UniformValue};

mod eval;
mod raster;

pub use eval::EvalError;
pub use raster::Framebuffer;

use eval::{Invocation, Outcome, Value};
use raster::{ClipVertex, Fragment};

/// Counters for one `draw` call.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct DrawStats {
    pub triangles: usize,
    /// Triangles dropped before scan conversion (behind the eye or degenerate).
    pub culled: usize,
    pub fragments: usize,
}

#[derive(Debug)]
struct StageObject {
    kind: ShaderStage,
    compiled: Option<Rc<CompiledStage>>,
}

#[derive(Debug)]
struct LinkedProgram {
    vertex: Rc<CompiledStage>,
    fragment: Rc<CompiledStage>,
    interface: ProgramInterface,
    values: Vec<Option<UniformValue>>,
}

#[derive(Debug, Default)]
struct ProgramObject {
    /// Compiled stage snapshots taken at attach time.
    attached: Vec<(ShaderStage, Option<Rc<CompiledStage>>)>,
    linked: Option<LinkedProgram>,
}

#[derive(Debug, Default)]
struct Objects {
    next_id: u32,
    stages: HashMap<StageHandle, StageObject>,
    programs: HashMap<ProgramHandle, ProgramObject>,
    current: Option<ProgramHandle>,
}

impl Objects {
    fn next_id(&mut self) -> Option<u32> {
        self.next_id = self.next_id.checked_add(1)?;
        Some(self.next_id)
    }

    fn live(&self) -> usize {
        self.stages.len() + self.programs.len()
    }
}

/// CPU-only `ShaderDriver` with its own colour + depth target.
#[derive(Debug)]
pub struct SoftDriver {
    objects: RefCell<Objects>,
    target: RefCell<Framebuffer>,
    depth_test: Cell<bool>,
    object_limit: Option<usize>,
}

impl SoftDriver {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            objects: RefCell::new(Objects::default()),
            target: RefCell::new(Framebuffer::new(width, height)),
            depth_test: Cell::new(false),
            object_limit: None,
        }
    }

    /// Refuses allocations once `limit` stage + program objects are alive.
    pub fn with_object_limit(mut self, limit: usize) -> Self {
        self.object_limit = Some(limit);
        self
    }

    pub fn set_depth_test(&self, enabled: bool) {
        self.depth_test.set(enabled);
    }

    pub fn clear(&self, color: [f32; 4]) {
        self.target.borrow_mut().clear(color);
    }

    pub fn framebuffer(&self) -> Ref<'_, Framebuffer> {
        self.target.borrow()
    }

    pub fn live_programs(&self) -> usize {
        self.objects.borrow().programs.len()
    }

    pub fn live_stages(&self) -> usize {
        self.objects.borrow().stages.len()
    }

    /// Reflection of a linked program.
    pub fn interface(&self, program: ProgramHandle) -> Option<ProgramInterface> {
        let objects = self.objects.borrow();
        let linked = objects.programs.get(&program)?.linked.as_ref()?;
        Some(linked.interface.clone())
    }

    /// Draws `mesh` with the current program.
    pub fn draw(&self, mesh: &Mesh) -> Result<DrawStats, DrawError> {
        let objects = self.objects.borrow();
        let handle = objects.current.ok_or(DrawError::NoProgram)?;
        let linked = objects
            .programs
            .get(&handle)
            .and_then(|p| p.linked.as_ref())
            .ok_or(DrawError::NotLinked(handle))?;

        if let Some(input) = linked
            .interface
            .vertex_inputs
            .iter()
            .find(|input| mesh.layout().attribute(input.location).is_none())
        {
            return Err(DrawError::MissingAttribute { location: input.location });
        }

        let vertex_globals = globals(&linked.vertex.module, linked)?;
        let fragment_globals = globals(&linked.fragment.module, linked)?;

        let clip = (0..mesh.vertex_count())
            .map(|i| run_vertex(&linked.vertex, &vertex_globals, mesh, i))
            .collect::<Result<Vec<_>, _>>()?;

        let mut target = self.target.borrow_mut();
        let depth_test = self.depth_test.get();
        let mut stats = DrawStats::default();

        for [a, b, c] in mesh.triangles() {
            let triangle = [
                clip[a as usize].clone(),
                clip[b as usize].clone(),
                clip[c as usize].clone(),
            ];
            let written = raster::rasterize(&mut target, &triangle, depth_test, |fragment| {
                run_fragment(&linked.fragment, &fragment_globals, fragment)
            })?;

            stats.triangles += 1;
            if written == 0 && triangle.iter().any(|v| v.position[3] <= 0.0) {
                stats.culled += 1;
            }
            stats.fragments += written;
        }

        log::trace!("soft draw with {handle}: {stats:?}");
        Ok(stats)
    }

    fn allocate(&self) -> Option<u32> {
        let mut objects = self.objects.borrow_mut();
        if self.object_limit.is_some_and(|limit| objects.live() >= limit) {
            return None;
        }
        objects.next_id()
    }
}

/// Uniform values of `linked` keyed by the globals of `module`.
///
/// Uniforms never written read as zero.
fn globals(
    module: &Module,
    linked: &LinkedProgram,
) -> Result<HashMap<Handle<naga::GlobalVariable>, Value>, DrawError> {
    let mut out = HashMap::new();
    for (handle, var) in module.global_variables.iter() {
        if var.space != AddressSpace::Uniform {
            continue;
        }
        let name = var.name.as_deref().unwrap_or("");
        let set = linked
            .interface
            .location_of(name)
            .index()
            .and_then(|i| linked.values.get(i))
            .and_then(Option::as_ref);

        let value = match set {
            Some(v) => Value::from_uniform(v),
            None => Value::zero(module, var.ty)?,
        };
        out.insert(handle, value);
    }
    Ok(out)
}

/// Builds an entry-point argument, recursing into struct members.
fn gather(
    module: &Module,
    binding: Option<&Binding>,
    ty: Handle<naga::Type>,
    source: &impl Fn(&Binding) -> Vec<f32>,
) -> Result<Value, DrawError> {
    match binding {
        Some(binding) => Ok(Value::from_floats(module, ty, &source(binding))?),
        None => match module.types[ty].inner {
            TypeInner::Struct { ref members, .. } => members
                .iter()
                .map(|m| gather(module, m.binding.as_ref(), m.ty, source))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Composite),
            _ => Err(DrawError::Unsupported("entry-point argument without a binding".into())),
        },
    }
}

#[derive(Debug, Default)]
struct Outputs {
    position: Option<[f32; 4]>,
    locations: BTreeMap<u32, Vec<f32>>,
}

/// Routes an entry-point result to its bindings.
fn scatter(
    module: &Module,
    binding: Option<&Binding>,
    ty: Handle<naga::Type>,
    value: Value,
    out: &mut Outputs,
) -> Result<(), DrawError> {
    match binding {
        Some(Binding::BuiltIn(BuiltIn::Position { .. })) => {
            let v = value.floats()?;
            let mut position = [0.0, 0.0, 0.0, 1.0];
            for (dst, src) in position.iter_mut().zip(v) {
                *dst = src;
            }
            out.position = Some(position);
        }
        Some(Binding::Location { location, .. }) => {
            out.locations.insert(*location, value.floats()?);
        }
        Some(Binding::BuiltIn(_)) => {}
        None => match (&module.types[ty].inner, value) {
            (TypeInner::Struct { members, .. }, Value::Composite(items)) => {
                for (member, item) in members.iter().zip(items) {
                    scatter(module, member.binding.as_ref(), member.ty, item, out)?;
                }
            }
            _ => return Err(DrawError::Unsupported("entry-point result without a binding".into())),
        },
    }
    Ok(())
}

fn returned(outcome: Outcome, stage: ShaderStage) -> Result<Option<Value>, DrawError> {
    match outcome {
        Outcome::Returned(Some(value)) => Ok(Some(value)),
        Outcome::Returned(None) => Err(DrawError::NoOutput { stage }),
        Outcome::Discarded => Ok(None),
    }
}

fn run_vertex(
    stage: &CompiledStage,
    globals: &HashMap<Handle<naga::GlobalVariable>, Value>,
    mesh: &Mesh,
    index: usize,
) -> Result<ClipVertex, DrawError> {
    let module = &stage.module;
    let info = stage.info.get_entry_point(stage.entry_point);
    let function = &stage.entry().function;

    let source = |binding: &Binding| match *binding {
        Binding::Location { location, .. } => mesh
            .layout()
            .attribute(location)
            .map(|a| mesh.attribute_values(index, a).to_vec())
            .unwrap_or_default(),
        Binding::BuiltIn(BuiltIn::VertexIndex) => vec![index as f32],
        Binding::BuiltIn(_) => Vec::new(),
    };
    let args = function
        .arguments
        .iter()
        .map(|arg| gather(module, arg.binding.as_ref(), arg.ty, &source))
        .collect::<Result<Vec<_>, _>>()?;

    let outcome = Invocation::new(module, info, function, args, globals).run()?;
    let value = returned(outcome, ShaderStage::Vertex)?.ok_or(DrawError::NoOutput {
        stage: ShaderStage::Vertex,
    })?;

    let result = function
        .result
        .as_ref()
        .ok_or(DrawError::NoOutput { stage: ShaderStage::Vertex })?;
    let mut outputs = Outputs::default();
    scatter(module, result.binding.as_ref(), result.ty, value, &mut outputs)?;

    Ok(ClipVertex {
        position: outputs.position.ok_or(DrawError::NoPosition)?,
        varyings: outputs.locations,
    })
}

fn run_fragment(
    stage: &CompiledStage,
    globals: &HashMap<Handle<naga::GlobalVariable>, Value>,
    fragment: &Fragment,
) -> Result<Option<[f32; 4]>, DrawError> {
    let module = &stage.module;
    let info = stage.info.get_entry_point(stage.entry_point);
    let function = &stage.entry().function;

    let source = |binding: &Binding| match *binding {
        Binding::Location { location, .. } => {
            fragment.varyings.get(&location).cloned().unwrap_or_default()
        }
        Binding::BuiltIn(BuiltIn::Position { .. }) => fragment.frag_coord.to_vec(),
        Binding::BuiltIn(BuiltIn::FrontFacing) => vec![if fragment.front_facing { 1.0 } else { 0.0 }],
        Binding::BuiltIn(_) => Vec::new(),
    };
    let args = function
        .arguments
        .iter()
        .map(|arg| gather(module, arg.binding.as_ref(), arg.ty, &source))
        .collect::<Result<Vec<_>, _>>()?;

    let outcome = Invocation::new(module, info, function, args, globals).run()?;
    let Some(value) = returned(outcome, ShaderStage::Fragment)? else {
        return Ok(None);
    };

    let result = function
        .result
        .as_ref()
        .ok_or(DrawError::NoOutput { stage: ShaderStage::Fragment })?;
    let mut outputs = Outputs::default();
    scatter(module, result.binding.as_ref(), result.ty, value, &mut outputs)?;

    let color = outputs.locations.remove(&0).ok_or(DrawError::NoColor)?;
    let mut rgba = [0.0, 0.0, 0.0, 1.0];
    for (dst, src) in rgba.iter_mut().zip(color) {
        *dst = src;
    }
    Ok(Some(rgba))
}

impl ShaderDriver for SoftDriver {
    fn create_program(&self) -> Option<ProgramHandle> {
        let handle = ProgramHandle::new(self.allocate()?)?;
        self.objects.borrow_mut().programs.insert(handle, ProgramObject::default());
        Some(handle)
    }

    fn create_stage(&self, stage: ShaderStage) -> Option<StageHandle> {
        let handle = StageHandle::new(self.allocate()?)?;
        self.objects
            .borrow_mut()
            .stages
            .insert(handle, StageObject { kind: stage, compiled: None });
        Some(handle)
    }

    fn compile_stage(&self, stage: StageHandle, source: &str) -> Result<(), String> {
        let mut objects = self.objects.borrow_mut();
        let object = objects
            .stages
            .get_mut(&stage)
            .ok_or_else(|| format!("{stage} does not exist"))?;

        match front::compile(object.kind, source) {
            Ok(compiled) => {
                object.compiled = Some(Rc::new(compiled));
                Ok(())
            }
            Err(log) => {
                object.compiled = None;
                Err(log)
            }
        }
    }

    fn attach_stage(&self, program: ProgramHandle, stage: StageHandle) {
        let mut objects = self.objects.borrow_mut();
        let Some(snapshot) = objects.stages.get(&stage).map(|s| (s.kind, s.compiled.clone())) else {
            log::warn!("attach of unknown {stage} to {program}");
            return;
        };
        match objects.programs.get_mut(&program) {
            Some(p) => p.attached.push(snapshot),
            None => log::warn!("attach of {stage} to unknown {program}"),
        }
    }

    fn delete_stage(&self, stage: StageHandle) {
        self.objects.borrow_mut().stages.remove(&stage);
    }

    fn link_program(&self, program: ProgramHandle) -> Result<(), String> {
        let mut objects = self.objects.borrow_mut();
        let object = objects
            .programs
            .get_mut(&program)
            .ok_or_else(|| format!("{program} does not exist"))?;
        object.linked = None;

        let find = |kind: ShaderStage| -> Result<Rc<CompiledStage>, String> {
            let mut matching = object.attached.iter().filter(|(k, _)| *k == kind);
            let (_, compiled) = matching
                .next()
                .ok_or_else(|| format!("no {kind} shader attached"))?;
            if matching.next().is_some() {
                return Err(format!("more than one {kind} shader attached"));
            }
            compiled.clone().ok_or_else(|| format!("{kind} shader is not compiled"))
        };
        let vertex = find(ShaderStage::Vertex)?;
        let fragment = find(ShaderStage::Fragment)?;

        let interface = front::link(&vertex, &fragment)?;
        let values = vec![None; interface.uniforms.len()];
        object.linked = Some(LinkedProgram { vertex, fragment, interface, values });
        Ok(())
    }

    fn validate_program(&self, program: ProgramHandle) -> Result<(), String> {
        let objects = self.objects.borrow();
        let linked = objects
            .programs
            .get(&program)
            .and_then(|p| p.linked.as_ref())
            .ok_or_else(|| format!("{program} is not linked"))?;
        let interface = &linked.interface;

        for input in &interface.vertex_inputs {
            if !matches!(input.shape, Shape::Scalar { float: true } | Shape::Vector { float: true, .. }) {
                return Err(format!(
                    "vertex input '{}' at location {} has unsupported type {}",
                    input.name, input.location, input.shape
                ));
            }
        }
        for uniform in &interface.uniforms {
            if uniform.shape.float_components().is_none() {
                return Err(format!(
                    "uniform '{}' has unsupported type {}",
                    uniform.name, uniform.shape
                ));
            }
        }
        if !interface.fragment_outputs.iter().any(|o| o.location == 0) {
            return Err("fragment shader does not write @location(0)".into());
        }
        Ok(())
    }

    fn uniform_location(&self, program: ProgramHandle, name: &str) -> UniformLocation {
        self.objects
            .borrow()
            .programs
            .get(&program)
            .and_then(|p| p.linked.as_ref())
            .map(|l| l.interface.location_of(name))
            .unwrap_or(UniformLocation::ABSENT)
    }

    fn use_program(&self, program: Option<ProgramHandle>) {
        self.objects.borrow_mut().current = program;
    }

    fn current_program(&self) -> Option<ProgramHandle> {
        self.objects.borrow().current
    }

    fn set_uniform(&self, location: UniformLocation, value: UniformValue) {
        let Some(index) = location.index() else { return };
        let mut objects = self.objects.borrow_mut();
        let Some(current) = objects.current else { return };
        let Some(linked) = objects.programs.get_mut(&current).and_then(|p| p.linked.as_mut()) else {
            return;
        };

        match linked.interface.uniforms.get(index) {
            Some(info) if info.shape.accepts(&value) => linked.values[index] = Some(value),
            Some(info) => log::warn!(
                "uniform '{}' is {}, ignoring {} value",
                info.name,
                info.shape,
                value.type_name()
            ),
            None => log::warn!("uniform location {location} out of range for {current}"),
        }
    }

    fn delete_program(&self, program: ProgramHandle) {
        let mut objects = self.objects.borrow_mut();
        objects.programs.remove(&program);
        if objects.current == Some(program) {
            objects.current = None;
        }
    }
}
