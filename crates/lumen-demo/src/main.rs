use std::rc::Rc;

use anyhow::{Context, Result};
use glam::{Mat4, Vec3};

use lumen_engine::camera::{Camera, CameraConfig, Projection, Transform};
use lumen_engine::core::{App, AppControl, FrameCtx, WindowCtx};
use lumen_engine::device::{Gpu, GpuInit, DEPTH_FORMAT};
use lumen_engine::driver::{GpuDriver, GpuMesh};
use lumen_engine::logging::{init_logging, LoggingConfig};
use lumen_engine::mesh::Mesh;
use lumen_engine::shader::ShaderProgram;
use lumen_engine::window::{Runtime, RuntimeConfig};

const VERTEX_SHADER: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/shader.vert.wgsl");
const FRAGMENT_SHADER: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/shader.frag.wgsl");

const CLEAR: wgpu::Color = wgpu::Color::BLACK;

/// Everything that needs the GPU, built once the window exists.
struct Scene {
    driver: Rc<GpuDriver>,
    program: ShaderProgram<GpuDriver>,
    pyramid: GpuMesh,
    models: [Mat4; 2],
    camera: Camera,
    projection: Projection,
}

impl Scene {
    fn load(gpu: &Gpu<'_>) -> Result<Self> {
        let driver = Rc::new(GpuDriver::new(
            gpu.device().clone(),
            gpu.queue().clone(),
            gpu.surface_format(),
            Some(DEPTH_FORMAT),
        ));

        let program = ShaderProgram::from_files(Rc::clone(&driver), VERTEX_SHADER, FRAGMENT_SHADER)
            .context("failed to build the pyramid shader")?;
        log::info!("shader program {} ready", program.id());

        let pyramid = driver.upload(&Mesh::pyramid());

        let models = [
            Transform::from_xyz(0.0, 0.0, -2.5)
                .rotated(Vec3::ONE, 45f32.to_radians())
                .scaled(0.4)
                .matrix(),
            Transform::from_xyz(0.0, 0.5, -2.5)
                .rotated(Vec3::ONE, 90f32.to_radians())
                .scaled(0.4)
                .matrix(),
        ];

        Ok(Self {
            driver,
            program,
            pyramid,
            models,
            camera: Camera::new(CameraConfig::default()),
            projection: Projection::default(),
        })
    }

    fn update(&mut self, ctx: &FrameCtx<'_, '_>) {
        self.camera.key_control(&ctx.input, ctx.time.dt);
        let (dx, dy) = ctx.input.mouse_delta();
        self.camera.mouse_control(dx, dy);
    }

    /// Binds the program and uploads the per-frame uniforms.
    fn prepare(&self, aspect: f32) -> Result<()> {
        self.driver.begin_frame();
        self.program.bind()?;

        let projection = self.projection.matrix(aspect);
        self.program.set_uniform_at(self.program.projection_location(), projection)?;
        self.program.set_uniform_at(self.program.view_location(), self.camera.view_matrix())?;
        Ok(())
    }

    fn draw(&self, pass: &mut wgpu::RenderPass<'_>) -> Result<()> {
        let model = self.program.model_location();
        for m in &self.models {
            self.program.set_uniform_at(model, *m)?;
            self.driver.draw(pass, &self.pyramid)?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct PyramidDemo {
    scene: Option<Scene>,
}

impl App for PyramidDemo {
    fn on_start(&mut self, _window: &WindowCtx<'_>, gpu: &Gpu<'_>) -> AppControl {
        match Scene::load(gpu) {
            Ok(scene) => {
                self.scene = Some(scene);
                AppControl::Continue
            }
            Err(err) => {
                log::error!("{err:#}");
                AppControl::Exit
            }
        }
    }

    fn on_frame(&mut self, ctx: &mut FrameCtx<'_, '_>) -> AppControl {
        let Some(scene) = self.scene.as_mut() else {
            return AppControl::Exit;
        };

        scene.update(ctx);

        if let Err(err) = scene.prepare(ctx.gpu.aspect_ratio()) {
            log::error!("frame setup failed: {err:#}");
            return AppControl::Exit;
        }

        let mut failure = None;
        let control = ctx.render(CLEAR, |pass| {
            if let Err(err) = scene.draw(pass) {
                failure = Some(err);
            }
        });
        scene.program.unbind();

        if let Some(err) = failure {
            log::error!("draw failed: {err:#}");
            return AppControl::Exit;
        }
        control
    }
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    Runtime::run(
        RuntimeConfig {
            title: "lumen: pyramids".to_string(),
            ..RuntimeConfig::default()
        },
        GpuInit::default(),
        PyramidDemo::default(),
    )
}
