use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use glam::{Mat4, Vec3, Vec4};

use crate::driver::{ProgramHandle, ShaderDriver};

use super::error::ShaderError;
use super::source::{FsSourceReader, SourceReader};
use super::stage::{LinkStatus, ShaderStage};
use super::uniform::{self, UniformLocation, UniformValue};

/// A vertex + fragment program owned by one driver.
///
/// The program handle is exclusively owned: `ShaderProgram` is move-only and
/// releases the handle on `Drop`. Build failures leave the program `Failed`
/// with no handle allocated; nothing here panics or retries.
pub struct ShaderProgram<D: ShaderDriver> {
    driver: Rc<D>,
    handle: Option<ProgramHandle>,
    status: LinkStatus,
    /// Name -> location, including absent results.
    locations: RefCell<HashMap<String, UniformLocation>>,
}

impl<D: ShaderDriver> ShaderProgram<D> {
    /// An empty program; nothing is allocated until a `create_*` call.
    pub fn new(driver: Rc<D>) -> Self {
        Self {
            driver,
            handle: None,
            status: LinkStatus::Uninitialized,
            locations: RefCell::new(HashMap::new()),
        }
    }

    pub fn from_source(driver: Rc<D>, vertex: &str, fragment: &str) -> Result<Self, ShaderError> {
        let mut program = Self::new(driver);
        program.create_from_source(vertex, fragment)?;
        Ok(program)
    }

    pub fn from_files(
        driver: Rc<D>,
        vertex: impl AsRef<Path>,
        fragment: impl AsRef<Path>,
    ) -> Result<Self, ShaderError> {
        let mut program = Self::new(driver);
        program.create_from_files(vertex, fragment)?;
        Ok(program)
    }

    /// Compiles both stages, links and validates.
    ///
    /// Any previous program is released first. On success `model`, `view` and
    /// `projection` are resolved up front.
    pub fn create_from_source(&mut self, vertex: &str, fragment: &str) -> Result<(), ShaderError> {
        self.release();
        self.status = LinkStatus::Compiling;

        match self.build(vertex, fragment) {
            Ok(handle) => {
                self.handle = Some(handle);
                self.status = LinkStatus::Linked;
                for name in uniform::WELL_KNOWN {
                    self.uniform_location(name);
                }
                log::debug!("linked shader {handle}");
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Reads both stages from disk, then behaves like `create_from_source`.
    pub fn create_from_files(
        &mut self,
        vertex: impl AsRef<Path>,
        fragment: impl AsRef<Path>,
    ) -> Result<(), ShaderError> {
        self.create_from_files_with(&FsSourceReader, vertex, fragment)
    }

    /// Like `create_from_files`, reading through `reader`.
    ///
    /// An unreadable file fails fast: the other file is not read and the
    /// program is left `Failed`.
    pub fn create_from_files_with(
        &mut self,
        reader: &impl SourceReader,
        vertex: impl AsRef<Path>,
        fragment: impl AsRef<Path>,
    ) -> Result<(), ShaderError> {
        self.release();
        self.status = LinkStatus::Compiling;

        let read = |stage: ShaderStage, path: &Path| {
            reader.read_source(path).map_err(|source| ShaderError::FileRead {
                stage,
                path: path.to_path_buf(),
                source,
            })
        };

        let vertex = match read(ShaderStage::Vertex, vertex.as_ref()) {
            Ok(src) => src,
            Err(err) => return Err(self.fail(err)),
        };
        let fragment = match read(ShaderStage::Fragment, fragment.as_ref()) {
            Ok(src) => src,
            Err(err) => return Err(self.fail(err)),
        };

        self.create_from_source(&vertex, &fragment)
    }

    /// Makes this program current. Refused unless `Linked`.
    pub fn bind(&self) -> Result<(), ShaderError> {
        match self.linked_handle() {
            Some(handle) => {
                self.driver.use_program(Some(handle));
                Ok(())
            }
            None => {
                log::warn!("refusing to bind shader program in state {:?}", self.status);
                Err(ShaderError::NotLinked { status: self.status })
            }
        }
    }

    /// Leaves no program current.
    pub fn unbind(&self) {
        self.driver.use_program(None);
    }

    /// Cached location of `name`; `ABSENT` if the program has no such uniform.
    pub fn uniform_location(&self, name: &str) -> UniformLocation {
        let Some(handle) = self.linked_handle() else {
            return UniformLocation::ABSENT;
        };
        if let Some(&location) = self.locations.borrow().get(name) {
            return location;
        }

        let location = self.driver.uniform_location(handle, name);
        log::trace!("uniform '{name}' of {handle} -> {location}");
        self.locations.borrow_mut().insert(name.to_owned(), location);
        location
    }

    pub fn model_location(&self) -> UniformLocation {
        self.uniform_location(uniform::MODEL)
    }

    pub fn view_location(&self) -> UniformLocation {
        self.uniform_location(uniform::VIEW)
    }

    pub fn projection_location(&self) -> UniformLocation {
        self.uniform_location(uniform::PROJECTION)
    }

    /// Writes `value` through `location`.
    ///
    /// The program must be linked and current; absent locations are skipped.
    pub fn set_uniform_at(
        &self,
        location: UniformLocation,
        value: impl Into<UniformValue>,
    ) -> Result<(), ShaderError> {
        let handle = self
            .linked_handle()
            .ok_or(ShaderError::NotLinked { status: self.status })?;
        if location.is_absent() {
            return Ok(());
        }
        if self.driver.current_program() != Some(handle) {
            log::warn!("uniform write to {handle} while it is not bound; skipped");
            return Ok(());
        }
        self.driver.set_uniform(location, value.into());
        Ok(())
    }

    pub fn set_uniform(&self, name: &str, value: impl Into<UniformValue>) -> Result<(), ShaderError> {
        self.set_uniform_at(self.uniform_location(name), value)
    }

    pub fn set_mat4(&self, name: &str, value: Mat4) -> Result<(), ShaderError> {
        self.set_uniform(name, value)
    }

    pub fn set_vec4(&self, name: &str, value: Vec4) -> Result<(), ShaderError> {
        self.set_uniform(name, value)
    }

    pub fn set_vec3(&self, name: &str, value: Vec3) -> Result<(), ShaderError> {
        self.set_uniform(name, value)
    }

    pub fn set_float(&self, name: &str, value: f32) -> Result<(), ShaderError> {
        self.set_uniform(name, value)
    }

    /// Frees the driver program and clears the location cache. Idempotent.
    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.driver.delete_program(handle);
            log::debug!("released shader {handle}");
        }
        self.locations.get_mut().clear();
        self.status = LinkStatus::Uninitialized;
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn is_linked(&self) -> bool {
        self.status == LinkStatus::Linked
    }

    pub fn handle(&self) -> Option<ProgramHandle> {
        self.handle
    }

    /// Raw program id, `0` when nothing is allocated.
    pub fn id(&self) -> u32 {
        self.handle.map_or(0, ProgramHandle::get)
    }

    pub fn driver(&self) -> &Rc<D> {
        &self.driver
    }

    fn linked_handle(&self) -> Option<ProgramHandle> {
        self.handle.filter(|_| self.status == LinkStatus::Linked)
    }

    fn fail(&mut self, err: ShaderError) -> ShaderError {
        self.status = LinkStatus::Failed;
        let detail = match err.log().and_then(|l| l.lines().next()) {
            Some(line) => line.to_owned(),
            None => err.to_string(),
        };
        match err.stage() {
            Some(stage) => log::warn!("shader {stage} failed: {detail}"),
            None => log::warn!("shader build failed: {detail}"),
        }
        err
    }

    fn build(&self, vertex: &str, fragment: &str) -> Result<ProgramHandle, ShaderError> {
        for (stage, source) in [(ShaderStage::Vertex, vertex), (ShaderStage::Fragment, fragment)] {
            if source.trim().is_empty() {
                return Err(ShaderError::compile(stage, "empty shader source"));
            }
        }

        let program = self
            .driver
            .create_program()
            .ok_or(ShaderError::Allocation("program"))?;

        match self.assemble(program, vertex, fragment) {
            Ok(()) => Ok(program),
            Err(err) => {
                self.driver.delete_program(program);
                Err(err)
            }
        }
    }

    fn assemble(&self, program: ProgramHandle, vertex: &str, fragment: &str) -> Result<(), ShaderError> {
        self.add_stage(program, ShaderStage::Vertex, vertex)?;
        self.add_stage(program, ShaderStage::Fragment, fragment)?;
        self.driver.link_program(program).map_err(ShaderError::link)?;
        self.driver.validate_program(program).map_err(ShaderError::validate)
    }

    /// Compiles one stage and attaches it. The stage object is always deleted.
    fn add_stage(&self, program: ProgramHandle, stage: ShaderStage, source: &str) -> Result<(), ShaderError> {
        let unit = self
            .driver
            .create_stage(stage)
            .ok_or(ShaderError::Allocation(stage.as_str()))?;

        let compiled = self.driver.compile_stage(unit, source);
        if compiled.is_ok() {
            self.driver.attach_stage(program, unit);
        }
        self.driver.delete_stage(unit);
        compiled.map_err(|log| ShaderError::compile(stage, log))
    }
}

impl<D: ShaderDriver> Drop for ShaderProgram<D> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<D: ShaderDriver> std::fmt::Debug for ShaderProgram<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderProgram")
            .field("handle", &self.handle)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::fs;
    use std::io;
    use std::path::PathBuf;

    use super::*;
    use crate::driver::front::tests::{FS, VS};
    use crate::driver::{SoftDriver, StageHandle};
    use crate::mesh::Mesh;
    use crate::shader::PipelineStage;

    /// `SoftDriver` wrapper that counts location queries.
    struct Counting {
        inner: SoftDriver,
        lookups: Cell<usize>,
    }

    impl Counting {
        fn new() -> Rc<Self> {
            Rc::new(Self { inner: SoftDriver::new(8, 8), lookups: Cell::new(0) })
        }
    }

    impl ShaderDriver for Counting {
        fn create_program(&self) -> Option<ProgramHandle> {
            self.inner.create_program()
        }
        fn create_stage(&self, stage: ShaderStage) -> Option<StageHandle> {
            self.inner.create_stage(stage)
        }
        fn compile_stage(&self, stage: StageHandle, source: &str) -> Result<(), String> {
            self.inner.compile_stage(stage, source)
        }
        fn attach_stage(&self, program: ProgramHandle, stage: StageHandle) {
            self.inner.attach_stage(program, stage)
        }
        fn delete_stage(&self, stage: StageHandle) {
            self.inner.delete_stage(stage)
        }
        fn link_program(&self, program: ProgramHandle) -> Result<(), String> {
            self.inner.link_program(program)
        }
        fn validate_program(&self, program: ProgramHandle) -> Result<(), String> {
            self.inner.validate_program(program)
        }
        fn uniform_location(&self, program: ProgramHandle, name: &str) -> UniformLocation {
            self.lookups.set(self.lookups.get() + 1);
            self.inner.uniform_location(program, name)
        }
        fn use_program(&self, program: Option<ProgramHandle>) {
            self.inner.use_program(program)
        }
        fn current_program(&self) -> Option<ProgramHandle> {
            self.inner.current_program()
        }
        fn set_uniform(&self, location: UniformLocation, value: UniformValue) {
            self.inner.set_uniform(location, value)
        }
        fn delete_program(&self, program: ProgramHandle) {
            self.inner.delete_program(program)
        }
    }

    fn soft() -> Rc<SoftDriver> {
        Rc::new(SoftDriver::new(8, 8))
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("lumen-{}-{name}", std::process::id()))
    }

    #[test]
    fn valid_pair_links_with_declared_uniforms() {
        let program = ShaderProgram::from_source(soft(), VS, FS).unwrap();
        assert_eq!(program.status(), LinkStatus::Linked);
        assert_ne!(program.id(), 0);
        for name in ["model", "view", "projection", "tint"] {
            assert!(program.uniform_location(name).raw() >= 0, "{name}");
        }
        assert_eq!(program.model_location().raw(), 0);
        assert_eq!(program.view_location().raw(), 1);
        assert_eq!(program.projection_location().raw(), 2);
    }

    #[test]
    fn syntax_error_fails_named_stage() {
        let driver = soft();
        let broken = FS.replace("return colour * tint;", "return colour * ;");
        let mut program = ShaderProgram::new(driver.clone());
        let err = program.create_from_source(VS, &broken).unwrap_err();

        assert_eq!(err.stage(), Some(PipelineStage::Compile(ShaderStage::Fragment)));
        assert!(!err.log().unwrap_or_default().is_empty());
        assert_eq!(program.status(), LinkStatus::Failed);
        assert_eq!(program.handle(), None);
        assert_eq!(driver.live_programs(), 0);
        assert_eq!(driver.live_stages(), 0);
        assert!(program.bind().is_err());
    }

    #[test]
    fn empty_source_never_reaches_the_driver() {
        let driver = Counting::new();
        let mut program = ShaderProgram::new(driver.clone());
        let err = program.create_from_source("  \n", FS).unwrap_err();
        assert_eq!(err.shader_stage(), Some(ShaderStage::Vertex));
        assert_eq!(driver.inner.live_programs(), 0);
        assert_eq!(program.status(), LinkStatus::Failed);
    }

    #[test]
    fn link_failure_is_reported_and_released() {
        let driver = soft();
        let fs = r#"
@fragment
fn fs_main(@location(5) missing: vec2<f32>) -> @location(0) vec4<f32> {
    return vec4<f32>(missing, 0.0, 1.0);
}
"#;
        let err = ShaderProgram::from_source(driver.clone(), VS, fs).unwrap_err();
        assert_eq!(err.stage(), Some(PipelineStage::Link));
        assert_eq!(driver.live_programs(), 0);
    }

    #[test]
    fn unknown_uniform_is_absent_and_cached() {
        let driver = Counting::new();
        let program = ShaderProgram::from_source(driver.clone(), VS, FS).unwrap();
        let after_link = driver.lookups.get();
        assert_eq!(after_link, 3);

        assert_eq!(program.uniform_location("nonexistent_name"), UniformLocation::ABSENT);
        assert_eq!(program.uniform_location("nonexistent_name").raw(), -1);
        program.model_location();
        assert_eq!(driver.lookups.get(), after_link + 1);
    }

    #[test]
    fn unlinked_program_has_no_locations() {
        let program = ShaderProgram::new(soft());
        assert!(program.uniform_location("model").is_absent());
        assert!(matches!(
            program.bind(),
            Err(ShaderError::NotLinked { status: LinkStatus::Uninitialized })
        ));
    }

    #[test]
    fn release_is_idempotent() {
        let driver = soft();
        let mut program = ShaderProgram::from_source(driver.clone(), VS, FS).unwrap();
        program.release();
        assert_eq!(program.status(), LinkStatus::Uninitialized);
        assert_eq!(program.id(), 0);
        assert_eq!(driver.live_programs(), 0);

        program.release();
        assert_eq!(program.id(), 0);
        assert_eq!(program.status(), LinkStatus::Uninitialized);
    }

    #[test]
    fn recreate_releases_previous_program() {
        let driver = soft();
        let mut program = ShaderProgram::from_source(driver.clone(), VS, FS).unwrap();
        let first = program.id();
        program.create_from_source(VS, FS).unwrap();
        assert_ne!(program.id(), first);
        assert_eq!(driver.live_programs(), 1);
    }

    #[test]
    fn drop_releases_handle() {
        let driver = soft();
        {
            let program = ShaderProgram::from_source(driver.clone(), VS, FS).unwrap();
            program.bind().unwrap();
            assert_eq!(driver.current_program(), program.handle());
        }
        assert_eq!(driver.live_programs(), 0);
        assert_eq!(driver.current_program(), None);
    }

    #[test]
    fn missing_vertex_file_fails_fast() {
        let driver = soft();
        let fragment = temp_path("fast.frag.wgsl");
        fs::write(&fragment, FS).unwrap();

        let reads = Cell::new(0);
        let reader = |path: &Path| {
            reads.set(reads.get() + 1);
            fs::read_to_string(path)
        };

        let mut program = ShaderProgram::new(driver.clone());
        let err = program
            .create_from_files_with(&reader, temp_path("does-not-exist.vert.wgsl"), &fragment)
            .unwrap_err();

        match &err {
            ShaderError::FileRead { stage, source, .. } => {
                assert_eq!(*stage, ShaderStage::Vertex);
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(reads.get(), 1);
        assert_eq!(program.status(), LinkStatus::Failed);
        assert_eq!(driver.live_programs(), 0);

        let _ = fs::remove_file(fragment);
    }

    #[test]
    fn loads_from_files() {
        let vertex = temp_path("load.vert.wgsl");
        let fragment = temp_path("load.frag.wgsl");
        fs::write(&vertex, VS).unwrap();
        fs::write(&fragment, FS).unwrap();

        let program = ShaderProgram::from_files(soft(), &vertex, &fragment).unwrap();
        assert!(program.is_linked());

        let _ = fs::remove_file(vertex);
        let _ = fs::remove_file(fragment);
    }

    #[test]
    fn allocation_refusal_is_an_error() {
        let driver = Rc::new(SoftDriver::new(4, 4).with_object_limit(1));
        let err = ShaderProgram::from_source(driver.clone(), VS, FS).unwrap_err();
        assert!(matches!(err, ShaderError::Allocation("vertex")));
        assert_eq!(driver.live_programs(), 0);
    }

    #[test]
    fn setters_require_binding() {
        let driver = soft();
        let program = ShaderProgram::from_source(driver.clone(), VS, FS).unwrap();
        // Not bound: skipped without error.
        program.set_mat4("model", Mat4::IDENTITY).unwrap();
        program.bind().unwrap();
        program.set_mat4("model", Mat4::IDENTITY).unwrap();
        program.set_vec4("tint", Vec4::ONE).unwrap();
        program.set_float("nonexistent_name", 1.0).unwrap();

        let unlinked = ShaderProgram::new(driver);
        assert!(unlinked.set_float("model", 1.0).is_err());
    }

    #[test]
    fn draws_constant_colour_triangle() {
        let vs = r#"
@group(0) @binding(0) var<uniform> model: mat4x4<f32>;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return model * vec4<f32>(position, 1.0);
}
"#;
        let fs = r#"
@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.5, 0.25, 1.0);
}
"#;
        let driver = Rc::new(SoftDriver::new(32, 32));
        let program = ShaderProgram::from_source(driver.clone(), vs, fs).unwrap();
        assert_eq!(program.status(), LinkStatus::Linked);
        assert!(program.view_location().is_absent());

        program.bind().unwrap();
        program
            .set_mat4("model", Mat4::from_translation(Vec3::new(0.25, 0.0, 0.0)))
            .unwrap();

        let mesh = Mesh::from_positions(
            &[[-0.5, -0.5, 0.0], [0.5, -0.5, 0.0], [0.0, 0.5, 0.0]],
            vec![0, 1, 2],
        )
        .unwrap();
        driver.clear([0.0, 0.0, 0.0, 1.0]);
        driver.draw(&mesh).unwrap();

        // Centroid (0.25, -1/6) in NDC.
        let x = ((0.25 * 0.5 + 0.5) * 32.0) as u32;
        let y = ((1.0 - (-1.0 / 6.0 * 0.5 + 0.5)) * 32.0) as u32;
        let fb = driver.framebuffer();
        assert_eq!(fb.pixel(x, y), Some([1.0, 0.5, 0.25, 1.0]));
        assert_eq!(fb.pixel(0, 0), Some([0.0, 0.0, 0.0, 1.0]));
        drop(fb);

        program.unbind();
        assert_eq!(driver.current_program(), None);
    }
}
