use std::path::{Path, PathBuf};

use crate::error::{FractalError, Result};

/// Width of the window and of the shared texture, in pixels.
pub const WINDOW_WIDTH: u32 = 900;
/// Height of the window and of the shared texture, in pixels.
pub const WINDOW_HEIGHT: u32 = 600;
pub const WINDOW_TITLE: &str = "Fractal";

/// Name of the compute entry point inside the kernel source.
pub const KERNEL_ENTRY_POINT: &str = "fractal_generation";

/// Work-group shape the kernel declares with `@workgroup_size`.
pub const LOCAL_WORK_SIZE: [u32; 2] = [20, 10];

/// Storage format of the shared texture: four 32-bit float channels.
pub const SHARED_TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

pub const VERTEX_SHADER_FILE: &str = "fractal.vert";
pub const FRAGMENT_SHADER_FILE: &str = "fractal.frag";
pub const KERNEL_FILE: &str = "fractal_generation.wgsl";

/// Directory holding the bundled shader and kernel sources.
pub const SHADER_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/shaders");

/// Background colour the display loop clears to before drawing the quad.
pub const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.0,
    g: 0.0,
    b: 0.0,
    a: 0.0,
};

/// Source files for the graphics stages and the compute program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderPaths {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
    /// Kernel sources, concatenated in order into one compute program.
    pub kernel: Vec<PathBuf>,
}

impl ShaderPaths {
    /// Resolves the fixed file names against `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            vertex: dir.join(VERTEX_SHADER_FILE),
            fragment: dir.join(FRAGMENT_SHADER_FILE),
            kernel: vec![dir.join(KERNEL_FILE)],
        }
    }

    /// The sources shipped with this crate.
    pub fn bundled() -> Self {
        Self::in_dir(SHADER_DIR)
    }
}

impl Default for ShaderPaths {
    fn default() -> Self {
        Self::bundled()
    }
}

/// Numeric relaxations requested from the compute program build.
///
/// The backend has no fast-math switch, so each flag is handed to the kernel
/// as a pipeline-overridable boolean constant of the same name (when the
/// kernel declares one) and lets the kernel skip NaN and signed-zero handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    pub finite_math_only: bool,
    pub no_signed_zeros: bool,
}

impl BuildOptions {
    pub(crate) const FINITE_MATH_ONLY: &'static str = "FINITE_MATH_ONLY";
    pub(crate) const NO_SIGNED_ZEROS: &'static str = "NO_SIGNED_ZEROS";

    /// Override constants in `(name, value)` form.
    pub fn constants(&self) -> [(&'static str, f64); 2] {
        [
            (Self::FINITE_MATH_ONLY, flag(self.finite_math_only)),
            (Self::NO_SIGNED_ZEROS, flag(self.no_signed_zeros)),
        ]
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            finite_math_only: true,
            no_signed_zeros: true,
        }
    }
}

fn flag(enabled: bool) -> f64 {
    if enabled {
        1.0
    } else {
        0.0
    }
}

/// Global and local shape of the 2D kernel dispatch.
///
/// The global index space always equals the texture size; the local shape must
/// tile it exactly so no invocation falls outside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGeometry {
    global: [u32; 2],
    local: [u32; 2],
}

impl DispatchGeometry {
    pub fn new(global: [u32; 2], local: [u32; 2]) -> Result<Self> {
        if global.contains(&0) {
            return Err(FractalError::Config(format!(
                "global work size {global:?} has a zero dimension"
            )));
        }
        if local.contains(&0) {
            return Err(FractalError::Config(format!(
                "local work size {local:?} has a zero dimension"
            )));
        }
        if global[0] % local[0] != 0 || global[1] % local[1] != 0 {
            return Err(FractalError::Config(format!(
                "local work size {local:?} does not evenly divide global work size {global:?}"
            )));
        }
        Ok(Self { global, local })
    }

    pub fn global(&self) -> [u32; 2] {
        self.global
    }

    pub fn local(&self) -> [u32; 2] {
        self.local
    }

    /// Number of invocations in one work group.
    pub fn invocations_per_group(&self) -> u32 {
        self.local[0] * self.local[1]
    }

    /// Work-group counts along x and y.
    pub fn groups(&self) -> [u32; 2] {
        [self.global[0] / self.local[0], self.global[1] / self.local[1]]
    }
}

/// Immutable parameters for one fractal session.
///
/// Everything here is a compile-time constant in the shipped binary; tests
/// build smaller variants to keep headless sessions cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct FractalConfig {
    /// Window and shared texture size in physical pixels.
    pub size: (u32, u32),
    pub title: String,
    /// Entry point looked up in the compute program.
    pub kernel_entry: String,
    pub local_work_size: [u32; 2],
    pub clear_color: wgpu::Color,
    pub shaders: ShaderPaths,
    pub build_options: BuildOptions,
}

impl FractalConfig {
    /// Checks the fixed parameters and derives the dispatch shape.
    pub fn validate(&self) -> Result<DispatchGeometry> {
        let (width, height) = self.size;
        if self.kernel_entry.is_empty() {
            return Err(FractalError::Config("kernel entry point is empty".into()));
        }
        DispatchGeometry::new([width, height], self.local_work_size)
    }
}

impl Default for FractalConfig {
    fn default() -> Self {
        Self {
            size: (WINDOW_WIDTH, WINDOW_HEIGHT),
            title: WINDOW_TITLE.to_string(),
            kernel_entry: KERNEL_ENTRY_POINT.to_string(),
            local_work_size: LOCAL_WORK_SIZE,
            clear_color: CLEAR_COLOR,
            shaders: ShaderPaths::bundled(),
            build_options: BuildOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn default_config_tiles_the_texture_exactly() {
        let geometry = FractalConfig::default().validate().expect("valid defaults");
        assert_eq!(geometry.global(), [WINDOW_WIDTH, WINDOW_HEIGHT]);
        assert_eq!(geometry.groups(), [45, 60]);
        assert!(geometry.invocations_per_group() <= 256);
    }

    #[test]
    fn uneven_local_size_is_rejected() {
        let err = DispatchGeometry::new([900, 600], [16, 16]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        assert!(DispatchGeometry::new([0, 600], [20, 10]).is_err());
        assert!(DispatchGeometry::new([900, 600], [0, 10]).is_err());
    }

    #[test]
    fn bundled_paths_use_fixed_file_names() {
        let paths = ShaderPaths::in_dir("/assets");
        assert_eq!(paths.vertex, Path::new("/assets/fractal.vert"));
        assert_eq!(paths.fragment, Path::new("/assets/fractal.frag"));
        assert_eq!(paths.kernel, vec![PathBuf::from("/assets/fractal_generation.wgsl")]);
    }

    #[test]
    fn build_options_map_to_override_flags() {
        let relaxed = BuildOptions::default().constants();
        assert_eq!(relaxed, [("FINITE_MATH_ONLY", 1.0), ("NO_SIGNED_ZEROS", 1.0)]);

        let strict = BuildOptions {
            finite_math_only: false,
            no_signed_zeros: false,
        };
        assert!(strict.constants().iter().all(|(_, value)| *value == 0.0));
    }
}
