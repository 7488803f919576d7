//! lumen engine crate.
//!
//! The core is `shader::ShaderProgram`: compile, link and validate a vertex +
//! fragment pair through a `driver::ShaderDriver`, cache uniform locations
//! and release the program when done. Around it sit a CPU reference driver,
//! a wgpu driver, and the window/input/camera plumbing the demo uses.

pub mod camera;
pub mod core;
pub mod device;
pub mod driver;
pub mod input;
pub mod logging;
pub mod mesh;
pub mod shader;
pub mod time;
pub mod window;
