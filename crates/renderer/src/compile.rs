//! Front half of both pipeline builders: read sources, parse and validate them
//! with naga, and report failures with the full diagnostic text.
//!
//! Running naga ourselves (instead of letting the device swallow the source)
//! gives every failure a readable log pointing at the offending line, and lets
//! the build and link rules be exercised without a GPU.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use wgpu::naga::front::{glsl, wgsl};
use wgpu::naga::valid::{Capabilities, ValidationFlags, Validator};
use wgpu::naga::{Binding, Handle, Module, ShaderStage, Type, TypeInner};

use crate::error::{BuildError, BuildStage, FractalError, Result};

/// Entry point every GLSL stage must define.
const GLSL_ENTRY_POINT: &str = "main";

/// Reads one source file fully into memory.
pub fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|err| FractalError::io(path, err))
}

/// Source text of one file together with where it came from.
#[derive(Debug, Clone)]
pub struct SourceText {
    pub name: String,
    pub text: String,
}

/// All source buffers that make up one compute program.
///
/// The set is consumed by [`compile_kernel`], so the per-file buffers are
/// released as soon as the build finishes, whichever way it goes.
#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    units: Vec<SourceText>,
}

impl SourceSet {
    /// Reads every file before anything is built; a missing file is fatal.
    pub fn read(paths: &[PathBuf]) -> Result<Self> {
        let mut units = Vec::with_capacity(paths.len());
        for path in paths {
            let text = read_source(path)?;
            tracing::debug!(path = %path.display(), bytes = text.len(), "loaded kernel source");
            units.push(SourceText {
                name: display_name(path),
                text,
            });
        }
        Ok(Self { units })
    }

    pub fn push(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.units.push(SourceText {
            name: name.into(),
            text: text.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Comma-separated file names, used to label diagnostics.
    pub fn label(&self) -> String {
        self.units
            .iter()
            .map(|unit| unit.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Concatenates the buffers in order into one program text.
    fn joined(&self) -> String {
        let mut program = String::new();
        for unit in &self.units {
            program.push_str(&unit.text);
            if !unit.text.ends_with('\n') {
                program.push('\n');
            }
        }
        program
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Graphics stage kinds the display pipeline is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphicsStage {
    Vertex,
    Fragment,
}

impl GraphicsStage {
    pub(crate) fn naga_stage(self) -> ShaderStage {
        match self {
            GraphicsStage::Vertex => ShaderStage::Vertex,
            GraphicsStage::Fragment => ShaderStage::Fragment,
        }
    }
}

/// A GLSL stage that parsed and validated.
#[derive(Debug)]
pub struct CompiledStage {
    pub(crate) stage: GraphicsStage,
    pub(crate) unit: String,
    pub(crate) source: String,
    module: Module,
}

impl CompiledStage {
    pub fn stage(&self) -> GraphicsStage {
        self.stage
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    fn entry_point(&self) -> Option<&wgpu::naga::EntryPoint> {
        self.module
            .entry_points
            .iter()
            .find(|entry| entry.name == GLSL_ENTRY_POINT && entry.stage == self.stage.naga_stage())
    }

    /// Locations read by the entry point, with their types.
    fn inputs(&self) -> BTreeMap<u32, TypeInner> {
        let mut locations = BTreeMap::new();
        if let Some(entry) = self.entry_point() {
            for argument in &entry.function.arguments {
                collect_locations(
                    &self.module,
                    argument.binding.as_ref(),
                    argument.ty,
                    &mut locations,
                );
            }
        }
        locations
    }

    /// Locations written by the entry point, with their types.
    fn outputs(&self) -> BTreeMap<u32, TypeInner> {
        let mut locations = BTreeMap::new();
        if let Some(result) = self.entry_point().and_then(|entry| entry.function.result.as_ref()) {
            collect_locations(
                &self.module,
                result.binding.as_ref(),
                result.ty,
                &mut locations,
            );
        }
        locations
    }
}

fn collect_locations(
    module: &Module,
    binding: Option<&Binding>,
    ty: Handle<Type>,
    out: &mut BTreeMap<u32, TypeInner>,
) {
    match binding {
        Some(Binding::Location { location, .. }) => {
            out.insert(*location, module.types[ty].inner.clone());
        }
        Some(Binding::BuiltIn(_)) => {}
        None => {
            if let TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_locations(module, member.binding.as_ref(), member.ty, out);
                }
            }
        }
    }
}

fn validate(module: &Module, source: &str) -> std::result::Result<(), String> {
    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(module)
        .map(|_| ())
        .map_err(|err| err.emit_to_string(source))
}

/// Compiles one GLSL stage, returning the complete diagnostic log on failure.
pub fn compile_stage(
    stage: GraphicsStage,
    unit: impl Into<String>,
    source: impl Into<String>,
) -> Result<CompiledStage, BuildError> {
    let unit = unit.into();
    let source = source.into();

    let options = glsl::Options::from(stage.naga_stage());
    let module = glsl::Frontend::default()
        .parse(&options, &source)
        .map_err(|errors| {
            BuildError::new(BuildStage::Compile, &unit, errors.emit_to_string(&source))
        })?;
    validate(&module, &source).map_err(|log| BuildError::new(BuildStage::Compile, &unit, log))?;

    let compiled = CompiledStage {
        stage,
        unit,
        source,
        module,
    };
    if compiled.entry_point().is_none() {
        return Err(BuildError::new(
            BuildStage::Compile,
            &compiled.unit,
            format!("no {:?} entry point named `{GLSL_ENTRY_POINT}`", stage),
        ));
    }
    tracing::debug!(unit = %compiled.unit, ?stage, "compiled shader stage");
    Ok(compiled)
}

/// Vertex and fragment stages whose interfaces agree.
#[derive(Debug)]
pub struct LinkedStages {
    pub(crate) vertex: CompiledStage,
    pub(crate) fragment: CompiledStage,
}

/// Checks that the two stages form one program.
///
/// `attributes` lists the vertex attribute locations the geometry supplies.
/// Every vertex input must be fed, every fragment input must be written by the
/// vertex stage with the same type, and the fragment stage must write colour
/// target 0. All mismatches are reported together in the link log.
pub fn link_stages(
    program: &str,
    vertex: CompiledStage,
    fragment: CompiledStage,
    attributes: &BTreeMap<u32, TypeInner>,
) -> Result<LinkedStages, BuildError> {
    let mut log = String::new();

    if vertex.stage != GraphicsStage::Vertex {
        let _ = writeln!(log, "error: {} is not a vertex stage", vertex.unit);
    }
    if fragment.stage != GraphicsStage::Fragment {
        let _ = writeln!(log, "error: {} is not a fragment stage", fragment.unit);
    }

    for (location, ty) in vertex.inputs() {
        match attributes.get(&location) {
            None => {
                let _ = writeln!(
                    log,
                    "error: vertex input at location {location} is not supplied by the geometry"
                );
            }
            Some(supplied) if *supplied != ty => {
                let _ = writeln!(
                    log,
                    "error: vertex input at location {location} expects {ty:?} but the geometry supplies {supplied:?}"
                );
            }
            Some(_) => {}
        }
    }

    let varyings = vertex.outputs();
    for (location, ty) in fragment.inputs() {
        match varyings.get(&location) {
            None => {
                let _ = writeln!(
                    log,
                    "error: fragment input at location {location} is not written by {}",
                    vertex.unit
                );
            }
            Some(written) if *written != ty => {
                let _ = writeln!(
                    log,
                    "error: location {location} is {written:?} in {} but {ty:?} in {}",
                    vertex.unit, fragment.unit
                );
            }
            Some(_) => {}
        }
    }

    if !fragment.outputs().contains_key(&0) {
        let _ = writeln!(
            log,
            "error: {} does not write colour output location 0",
            fragment.unit
        );
    }

    if !log.is_empty() {
        return Err(BuildError::new(BuildStage::Link, program, log));
    }
    Ok(LinkedStages { vertex, fragment })
}

/// A validated compute program with its single entry point resolved.
#[derive(Debug)]
pub struct CompiledKernel {
    pub(crate) unit: String,
    pub(crate) source: String,
    pub(crate) entry: String,
    overrides: Vec<String>,
}

impl CompiledKernel {
    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Whether the program declares a pipeline-overridable constant `name`.
    pub fn declares_override(&self, name: &str) -> bool {
        self.overrides.iter().any(|declared| declared == name)
    }
}

/// Builds the compute program from `sources` and resolves `entry`.
///
/// The kernel's declared work-group shape must match `local_work_size`, since
/// the dispatch is sized from that constant.
pub fn compile_kernel(
    sources: SourceSet,
    entry: &str,
    local_work_size: [u32; 2],
) -> Result<CompiledKernel, BuildError> {
    let unit = sources.label();
    let source = sources.joined();
    drop(sources);

    if source.trim().is_empty() {
        return Err(BuildError::new(
            BuildStage::ProgramBuild,
            &unit,
            "compute program has no source text",
        ));
    }

    let module = wgsl::parse_str(&source).map_err(|err| {
        BuildError::new(BuildStage::ProgramBuild, &unit, err.emit_to_string(&source))
    })?;
    validate(&module, &source)
        .map_err(|log| BuildError::new(BuildStage::ProgramBuild, &unit, log))?;

    let Some(entry_point) = module.entry_points.iter().find(|ep| ep.name == entry) else {
        let available = module
            .entry_points
            .iter()
            .map(|ep| ep.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(BuildError::new(
            BuildStage::KernelLookup,
            &unit,
            format!("kernel `{entry}` not found (entry points: [{available}])"),
        ));
    };
    if entry_point.stage != ShaderStage::Compute {
        return Err(BuildError::new(
            BuildStage::KernelLookup,
            &unit,
            format!("`{entry}` is a {:?} entry point, not a kernel", entry_point.stage),
        ));
    }
    let expected = [local_work_size[0], local_work_size[1], 1];
    if entry_point.workgroup_size != expected {
        return Err(BuildError::new(
            BuildStage::KernelLookup,
            &unit,
            format!(
                "kernel `{entry}` declares work-group size {:?}, dispatch expects {expected:?}",
                entry_point.workgroup_size
            ),
        ));
    }

    let overrides = module
        .overrides
        .iter()
        .filter_map(|(_, value)| value.name.clone())
        .collect();

    tracing::debug!(%unit, entry, "built compute program");
    Ok(CompiledKernel {
        unit,
        source,
        entry: entry.to_string(),
        overrides,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgpu::naga::{Scalar, VectorSize};

    const VERTEX: &str = r"#version 450
layout(location = 0) in vec3 a_position;
layout(location = 1) in vec2 a_texcoord;
layout(location = 0) out vec2 v_texcoord;
void main() {
    v_texcoord = a_texcoord;
    gl_Position = vec4(a_position, 1.0);
}
";

    const FRAGMENT: &str = r"#version 450
layout(location = 0) in vec2 v_texcoord;
layout(location = 0) out vec4 out_color;
void main() {
    out_color = vec4(v_texcoord, 0.0, 1.0);
}
";

    const KERNEL: &str = r"
override FINITE_MATH_ONLY: bool = false;
@group(0) @binding(0) var target_image: texture_storage_2d<rgba32float, write>;
@compute @workgroup_size(8, 4, 1)
fn fractal_generation(@builtin(global_invocation_id) id: vec3<u32>) {
    textureStore(target_image, vec2<i32>(id.xy), vec4<f32>(0.0, 0.0, 0.0, 1.0));
}
";

    fn quad_attributes() -> BTreeMap<u32, TypeInner> {
        BTreeMap::from([
            (
                0,
                TypeInner::Vector {
                    size: VectorSize::Tri,
                    scalar: Scalar::F32,
                },
            ),
            (
                1,
                TypeInner::Vector {
                    size: VectorSize::Bi,
                    scalar: Scalar::F32,
                },
            ),
        ])
    }

    fn kernel_sources(text: &str) -> SourceSet {
        let mut sources = SourceSet::default();
        sources.push("fractal_generation.wgsl", text);
        sources
    }

    #[test]
    fn valid_stages_compile_and_link() {
        let vertex = compile_stage(GraphicsStage::Vertex, "fractal.vert", VERTEX).expect("vertex");
        let fragment =
            compile_stage(GraphicsStage::Fragment, "fractal.frag", FRAGMENT).expect("fragment");
        let linked = link_stages("fractal", vertex, fragment, &quad_attributes()).expect("link");
        assert_eq!(linked.vertex.unit(), "fractal.vert");
        assert_eq!(linked.fragment.unit(), "fractal.frag");
    }

    #[test]
    fn syntax_error_reports_a_compile_log() {
        let broken = "#version 450\nvoid main() { this is not glsl }\n";
        let err = compile_stage(GraphicsStage::Fragment, "broken.frag", broken).unwrap_err();
        assert_eq!(err.stage, BuildStage::Compile);
        assert_eq!(err.unit, "broken.frag");
        assert!(!err.log.trim().is_empty());
    }

    #[test]
    fn missing_varying_fails_link() {
        let fragment_src = r"#version 450
layout(location = 0) in vec2 v_texcoord;
layout(location = 3) in vec4 v_tint;
layout(location = 0) out vec4 out_color;
void main() {
    out_color = vec4(v_texcoord, 0.0, 1.0) * v_tint;
}
";
        let vertex = compile_stage(GraphicsStage::Vertex, "fractal.vert", VERTEX).expect("vertex");
        let fragment =
            compile_stage(GraphicsStage::Fragment, "tint.frag", fragment_src).expect("fragment");
        let err = link_stages("fractal", vertex, fragment, &quad_attributes()).unwrap_err();
        assert_eq!(err.stage, BuildStage::Link);
        assert!(err.log.contains("location 3"));
    }

    #[test]
    fn unsupplied_attribute_fails_link() {
        let vertex = compile_stage(GraphicsStage::Vertex, "fractal.vert", VERTEX).expect("vertex");
        let fragment =
            compile_stage(GraphicsStage::Fragment, "fractal.frag", FRAGMENT).expect("fragment");
        let mut attributes = quad_attributes();
        attributes.remove(&1);
        let err = link_stages("fractal", vertex, fragment, &attributes).unwrap_err();
        assert!(err.log.contains("vertex input at location 1"));
    }

    #[test]
    fn swapped_stages_fail_link() {
        let vertex = compile_stage(GraphicsStage::Vertex, "fractal.vert", VERTEX).expect("vertex");
        let fragment =
            compile_stage(GraphicsStage::Fragment, "fractal.frag", FRAGMENT).expect("fragment");
        let err = link_stages("fractal", fragment, vertex, &quad_attributes()).unwrap_err();
        assert!(err.log.contains("is not a vertex stage"));
    }

    #[test]
    fn kernel_builds_and_reports_overrides() {
        let kernel =
            compile_kernel(kernel_sources(KERNEL), "fractal_generation", [8, 4]).expect("kernel");
        assert_eq!(kernel.entry(), "fractal_generation");
        assert!(kernel.declares_override("FINITE_MATH_ONLY"));
        assert!(!kernel.declares_override("NO_SIGNED_ZEROS"));
    }

    #[test]
    fn kernel_sources_are_concatenated_in_order() {
        let mut sources = SourceSet::default();
        sources.push("header.wgsl", "const SHADE: f32 = 0.5;");
        sources.push(
            "body.wgsl",
            KERNEL.replace("vec4<f32>(0.0, 0.0, 0.0, 1.0)", "vec4<f32>(SHADE, SHADE, SHADE, 1.0)"),
        );
        assert_eq!(sources.label(), "header.wgsl, body.wgsl");
        let kernel = compile_kernel(sources, "fractal_generation", [8, 4]).expect("kernel");
        assert!(kernel.source.starts_with("const SHADE"));
    }

    #[test]
    fn unknown_kernel_name_is_a_lookup_failure() {
        let err = compile_kernel(kernel_sources(KERNEL), "julia", [8, 4]).unwrap_err();
        assert_eq!(err.stage, BuildStage::KernelLookup);
        assert!(err.log.contains("fractal_generation"));
    }

    #[test]
    fn mismatched_workgroup_is_a_lookup_failure() {
        let err = compile_kernel(kernel_sources(KERNEL), "fractal_generation", [20, 10])
            .unwrap_err();
        assert_eq!(err.stage, BuildStage::KernelLookup);
        assert!(err.log.contains("work-group size"));
    }

    #[test]
    fn invalid_kernel_reports_a_build_log() {
        let err = compile_kernel(
            kernel_sources("fn fractal_generation( {"),
            "fractal_generation",
            [8, 4],
        )
        .unwrap_err();
        assert_eq!(err.stage, BuildStage::ProgramBuild);
        assert!(!err.log.trim().is_empty());
    }

    #[test]
    fn missing_source_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("fractal_generation.wgsl");
        let err = SourceSet::read(&[missing]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }

    #[test]
    fn sources_are_read_fully() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fractal_generation.wgsl");
        std::fs::write(&path, KERNEL).expect("write kernel");
        let sources = SourceSet::read(&[path]).expect("read");
        assert_eq!(sources.len(), 1);
        assert_eq!(sources.joined(), KERNEL);
    }

    #[test]
    fn bundled_sources_build() {
        let paths = crate::types::ShaderPaths::bundled();
        let vertex = compile_stage(
            GraphicsStage::Vertex,
            "fractal.vert",
            read_source(&paths.vertex).expect("vertex source"),
        )
        .expect("bundled vertex");
        let fragment = compile_stage(
            GraphicsStage::Fragment,
            "fractal.frag",
            read_source(&paths.fragment).expect("fragment source"),
        )
        .expect("bundled fragment");
        link_stages("fractal", vertex, fragment, &quad_attributes()).expect("bundled link");

        let sources = SourceSet::read(&paths.kernel).expect("kernel source");
        compile_kernel(
            sources,
            crate::types::KERNEL_ENTRY_POINT,
            crate::types::LOCAL_WORK_SIZE,
        )
        .expect("bundled kernel");
    }
}
