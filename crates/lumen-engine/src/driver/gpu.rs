//! wgpu-backed driver.
//!
//! Program objects become a render pipeline per vertex layout plus one
//! dynamic-offset uniform buffer per uniform. Each draw snapshots the current
//! uniform values into the next 256-byte slot, so consecutive draws in one
//! pass can use different values.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU64;
use std::rc::Rc;

use wgpu::util::DeviceExt;

use crate::driver::front::{self, CompiledStage, ProgramInterface, Shape};
use crate::driver::{DrawError, ProgramHandle, ShaderDriver, StageHandle};
use crate::mesh::{Mesh, VertexAttribute, VertexLayout};
use crate::shader::{ShaderStage, UniformLocation, UniformValue};

/// Distance between per-draw uniform snapshots; wgpu's default offset alignment.
const SLOT_STRIDE: u64 = 256;

/// Draws per frame before `begin_frame` must be called again.
const SLOTS_PER_FRAME: u32 = 256;

/// Mesh uploaded to vertex + index buffers.
#[derive(Debug)]
pub struct GpuMesh {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
    layout: VertexLayout,
}

impl GpuMesh {
    pub fn upload(device: &wgpu::Device, mesh: &Mesh) -> Self {
        let vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("lumen mesh vbo"),
            contents: bytemuck::cast_slice(mesh.vertices()),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("lumen mesh ibo"),
            contents: bytemuck::cast_slice(mesh.indices()),
            usage: wgpu::BufferUsages::INDEX,
        });

        Self {
            vertices,
            indices,
            index_count: mesh.index_count() as u32,
            layout: mesh.layout().clone(),
        }
    }

    pub fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

struct StageObject {
    kind: ShaderStage,
    compiled: Option<Rc<CompiledStage>>,
}

struct UniformSlot {
    buffer: wgpu::Buffer,
    /// CPU copy laid out for the uniform buffer.
    bytes: Vec<u8>,
}

struct UniformGroup {
    bind_group: wgpu::BindGroup,
    /// Dynamic offsets this group expects, one per uniform.
    bindings: usize,
}

struct LinkedProgram {
    interface: ProgramInterface,
    vertex_entry: String,
    fragment_entry: String,
    vertex_module: wgpu::ShaderModule,
    fragment_module: wgpu::ShaderModule,
    pipeline_layout: wgpu::PipelineLayout,
    groups: Vec<UniformGroup>,
    uniforms: Vec<UniformSlot>,
    pipelines: HashMap<VertexLayout, wgpu::RenderPipeline>,
    validated: bool,
}

#[derive(Default)]
struct ProgramObject {
    attached: Vec<(ShaderStage, Option<Rc<CompiledStage>>)>,
    linked: Option<LinkedProgram>,
}

#[derive(Default)]
struct Objects {
    next_id: u32,
    stages: HashMap<StageHandle, StageObject>,
    programs: HashMap<ProgramHandle, ProgramObject>,
    current: Option<ProgramHandle>,
}

/// `ShaderDriver` over a wgpu device and queue.
pub struct GpuDriver {
    device: wgpu::Device,
    queue: wgpu::Queue,
    color_format: wgpu::TextureFormat,
    depth_format: Option<wgpu::TextureFormat>,
    objects: RefCell<Objects>,
    slot: Cell<u32>,
}

impl GpuDriver {
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        color_format: wgpu::TextureFormat,
        depth_format: Option<wgpu::TextureFormat>,
    ) -> Self {
        Self {
            device,
            queue,
            color_format,
            depth_format,
            objects: RefCell::new(Objects::default()),
            slot: Cell::new(0),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn upload(&self, mesh: &Mesh) -> GpuMesh {
        GpuMesh::upload(&self.device, mesh)
    }

    /// Starts a new frame of uniform snapshots.
    pub fn begin_frame(&self) {
        self.slot.set(0);
    }

    /// Records an indexed draw of `mesh` with the current program.
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>, mesh: &GpuMesh) -> Result<(), DrawError> {
        let mut objects = self.objects.borrow_mut();
        let handle = objects.current.ok_or(DrawError::NoProgram)?;
        let program = objects
            .programs
            .get_mut(&handle)
            .and_then(|p| p.linked.as_mut())
            .filter(|l| l.validated)
            .ok_or(DrawError::NotLinked(handle))?;

        let slot = self.slot.get();
        if slot >= SLOTS_PER_FRAME {
            return Err(DrawError::UniformSlotsExhausted { capacity: SLOTS_PER_FRAME });
        }
        self.slot.set(slot + 1);
        let offset = u64::from(slot) * SLOT_STRIDE;

        if !program.pipelines.contains_key(&mesh.layout) {
            let pipeline = self.create_pipeline(program, &mesh.layout)?;
            program.pipelines.insert(mesh.layout.clone(), pipeline);
        }
        let Some(pipeline) = program.pipelines.get(&mesh.layout) else {
            return Err(DrawError::NotLinked(handle));
        };

        for uniform in &program.uniforms {
            self.queue.write_buffer(&uniform.buffer, offset, &uniform.bytes);
        }

        pass.set_pipeline(pipeline);
        for (index, group) in program.groups.iter().enumerate() {
            let offsets = vec![offset as u32; group.bindings];
            pass.set_bind_group(index as u32, &group.bind_group, &offsets);
        }
        pass.set_vertex_buffer(0, mesh.vertices.slice(..));
        pass.set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..mesh.index_count, 0, 0..1);
        Ok(())
    }

    fn allocate(&self) -> Option<u32> {
        let mut objects = self.objects.borrow_mut();
        objects.next_id = objects.next_id.checked_add(1)?;
        Some(objects.next_id)
    }

    fn link(&self, vertex: &CompiledStage, fragment: &CompiledStage) -> Result<LinkedProgram, String> {
        let interface = front::link(vertex, fragment)?;

        let create_module = |stage: &CompiledStage| {
            self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&format!("lumen {} shader", stage.stage)),
                source: wgpu::ShaderSource::Wgsl(stage.source.clone().into()),
            })
        };
        let vertex_module = create_module(vertex);
        let fragment_module = create_module(fragment);

        let uniforms = interface
            .uniforms
            .iter()
            .map(|info| UniformSlot {
                buffer: self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("lumen uniform '{}'", info.name)),
                    size: SLOT_STRIDE * u64::from(SLOTS_PER_FRAME),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                }),
                bytes: vec![0; info.size as usize],
            })
            .collect::<Vec<_>>();

        // Bind groups must be contiguous from 0; missing groups stay empty.
        let group_count = interface.uniforms.iter().map(|u| u.group + 1).max().unwrap_or(0);
        let mut by_group: BTreeMap<u32, Vec<usize>> = (0..group_count).map(|g| (g, Vec::new())).collect();
        for (i, info) in interface.uniforms.iter().enumerate() {
            by_group.entry(info.group).or_default().push(i);
        }

        let mut layouts = Vec::new();
        let mut groups = Vec::new();
        for (group, members) in &by_group {
            let entries = members
                .iter()
                .map(|&i| {
                    let info = &interface.uniforms[i];
                    let mut visibility = wgpu::ShaderStages::NONE;
                    if info.vertex {
                        visibility |= wgpu::ShaderStages::VERTEX;
                    }
                    if info.fragment {
                        visibility |= wgpu::ShaderStages::FRAGMENT;
                    }
                    wgpu::BindGroupLayoutEntry {
                        binding: info.binding,
                        visibility,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: true,
                            min_binding_size: NonZeroU64::new(u64::from(info.size)),
                        },
                        count: None,
                    }
                })
                .collect::<Vec<_>>();

            let layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("lumen group {group} bgl")),
                entries: &entries,
            });

            let bindings = members
                .iter()
                .map(|&i| wgpu::BindGroupEntry {
                    binding: interface.uniforms[i].binding,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &uniforms[i].buffer,
                        offset: 0,
                        size: NonZeroU64::new(u64::from(interface.uniforms[i].size)),
                    }),
                })
                .collect::<Vec<_>>();

            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("lumen group {group} bind group")),
                layout: &layout,
                entries: &bindings,
            });

            groups.push(UniformGroup { bind_group, bindings: members.len() });
            layouts.push(layout);
        }

        let layout_refs = layouts.iter().collect::<Vec<_>>();
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("lumen program pipeline layout"),
            bind_group_layouts: &layout_refs,
            immediate_size: 0,
        });

        Ok(LinkedProgram {
            interface,
            vertex_entry: vertex.entry_name().to_owned(),
            fragment_entry: fragment.entry_name().to_owned(),
            vertex_module,
            fragment_module,
            pipeline_layout,
            groups,
            uniforms,
            pipelines: HashMap::new(),
            validated: false,
        })
    }

    fn create_pipeline(
        &self,
        program: &LinkedProgram,
        layout: &VertexLayout,
    ) -> Result<wgpu::RenderPipeline, DrawError> {
        let attributes = program
            .interface
            .vertex_inputs
            .iter()
            .map(|input| {
                let attribute = layout
                    .attribute(input.location)
                    .ok_or(DrawError::MissingAttribute { location: input.location })?;
                Ok(wgpu::VertexAttribute {
                    format: vertex_format(attribute),
                    offset: u64::from(attribute.offset) * std::mem::size_of::<f32>() as u64,
                    shader_location: input.location,
                })
            })
            .collect::<Result<Vec<_>, DrawError>>()?;

        let buffers = [wgpu::VertexBufferLayout {
            array_stride: layout.stride_bytes(),
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        }];

        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("lumen program pipeline"),
            layout: Some(&program.pipeline_layout),

            vertex: wgpu::VertexState {
                module: &program.vertex_module,
                entry_point: Some(program.vertex_entry.as_str()),
                compilation_options: Default::default(),
                buffers: &buffers,
            },

            fragment: Some(wgpu::FragmentState {
                module: &program.fragment_module,
                entry_point: Some(program.fragment_entry.as_str()),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.color_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),

            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },

            depth_stencil: self.depth_format.map(|format| wgpu::DepthStencilState {
                format,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        log::debug!("created pipeline for vertex stride {}", layout.stride);
        Ok(pipeline)
    }
}

fn vertex_format(attribute: &VertexAttribute) -> wgpu::VertexFormat {
    match attribute.components {
        1 => wgpu::VertexFormat::Float32,
        2 => wgpu::VertexFormat::Float32x2,
        3 => wgpu::VertexFormat::Float32x3,
        _ => wgpu::VertexFormat::Float32x4,
    }
}

/// Lays `value` out the way WGSL expects it in a uniform buffer of `size` bytes.
///
/// `mat3x3` columns are padded to 16 bytes.
fn uniform_bytes(value: &UniformValue, size: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; size];
    match value {
        UniformValue::Mat3(m) => {
            for (c, column) in m.chunks_exact(3).enumerate() {
                let start = c * 16;
                if start + 12 <= size {
                    bytes[start..start + 12].copy_from_slice(bytemuck::cast_slice(column));
                }
            }
        }
        other => {
            let src: &[u8] = bytemuck::cast_slice(other.components());
            let n = src.len().min(size);
            bytes[..n].copy_from_slice(&src[..n]);
        }
    }
    bytes
}

/// Packed layout covering every vertex input, used to validate a program.
fn packed_layout(interface: &ProgramInterface) -> VertexLayout {
    let mut offset = 0;
    let attributes = interface
        .vertex_inputs
        .iter()
        .map(|input| {
            let components = input.shape.float_components().unwrap_or(4);
            let attribute = VertexAttribute { location: input.location, components, offset };
            offset += components;
            attribute
        })
        .collect();
    VertexLayout { stride: offset.max(1), attributes }
}

impl ShaderDriver for GpuDriver {
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
        let (vertex, fragment) = {
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
            (find(ShaderStage::Vertex)?, find(ShaderStage::Fragment)?)
        };

        let linked = self.link(&vertex, &fragment)?;
        if let Some(object) = self.objects.borrow_mut().programs.get_mut(&program) {
            object.linked = Some(linked);
        }
        Ok(())
    }

    fn validate_program(&self, program: ProgramHandle) -> Result<(), String> {
        let mut objects = self.objects.borrow_mut();
        let linked = objects
            .programs
            .get_mut(&program)
            .and_then(|p| p.linked.as_mut())
            .ok_or_else(|| format!("{program} is not linked"))?;
        let interface = &linked.interface;
        let limits = self.device.limits();

        for input in &interface.vertex_inputs {
            if !matches!(input.shape, Shape::Scalar { float: true } | Shape::Vector { float: true, .. }) {
                return Err(format!(
                    "vertex input '{}' at location {} has unsupported type {}",
                    input.name, input.location, input.shape
                ));
            }
        }
        if let Some(big) = interface.uniforms.iter().find(|u| u64::from(u.size) > SLOT_STRIDE) {
            return Err(format!("uniform '{}' is larger than {SLOT_STRIDE} bytes", big.name));
        }
        if linked.groups.len() > limits.max_bind_groups as usize {
            return Err(format!(
                "program uses {} bind groups, device allows {}",
                linked.groups.len(),
                limits.max_bind_groups
            ));
        }
        if interface.uniforms.len() > limits.max_dynamic_uniform_buffers_per_pipeline_layout as usize {
            return Err(format!(
                "program uses {} uniforms, device allows {} per pipeline",
                interface.uniforms.len(),
                limits.max_dynamic_uniform_buffers_per_pipeline_layout
            ));
        }
        for (stage, count) in [
            (ShaderStage::Vertex, interface.uniforms.iter().filter(|u| u.vertex).count()),
            (ShaderStage::Fragment, interface.uniforms.iter().filter(|u| u.fragment).count()),
        ] {
            if count > limits.max_uniform_buffers_per_shader_stage as usize {
                return Err(format!(
                    "{stage} stage uses {count} uniforms, device allows {}",
                    limits.max_uniform_buffers_per_shader_stage
                ));
            }
        }
        if !interface.fragment_outputs.iter().any(|o| o.location == 0) {
            return Err("fragment shader does not write @location(0)".into());
        }

        let layout = packed_layout(interface);
        let pipeline = self.create_pipeline(linked, &layout).map_err(|e| e.to_string())?;
        linked.pipelines.insert(layout, pipeline);
        linked.validated = true;
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
            Some(info) if info.shape.accepts(&value) => {
                linked.uniforms[index].bytes = uniform_bytes(&value, info.size as usize);
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::front::tests::{FS, VS};

    fn floats(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn mat3_columns_are_padded() {
        let m = UniformValue::Mat3([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let bytes = uniform_bytes(&m, 48);
        let floats = floats(&bytes);
        assert_eq!(&floats[0..4], &[1.0, 2.0, 3.0, 0.0]);
        assert_eq!(&floats[8..12], &[7.0, 8.0, 9.0, 0.0]);
    }

    #[test]
    fn vec3_fills_its_size() {
        let bytes = uniform_bytes(&UniformValue::Vec3([1.0, 2.0, 3.0]), 12);
        assert_eq!(floats(&bytes), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn packed_layout_follows_inputs() {
        let vertex = front::compile(ShaderStage::Vertex, VS).unwrap();
        let fragment = front::compile(ShaderStage::Fragment, FS).unwrap();
        let interface = front::link(&vertex, &fragment).unwrap();
        assert_eq!(packed_layout(&interface), VertexLayout::position_only());
    }

    #[test]
    fn vertex_formats_match_component_count() {
        let attr = |components| VertexAttribute { location: 0, components, offset: 0 };
        assert_eq!(vertex_format(&attr(2)), wgpu::VertexFormat::Float32x2);
        assert_eq!(vertex_format(&attr(3)), wgpu::VertexFormat::Float32x3);
    }
}
