//! Pipeline orchestration: load, resolve, compile, link.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context};
use log::{debug, info};

use compiler::arena::use_arena;
use compiler::resolve::Resolver;

/// The compiler's output once the C side is settled.
pub struct BuildPlan {
    /// Generated C source text.
    pub c_source: String,
    /// `pragma link` libraries for the link line.
    pub links: Vec<String>,
}

/// Runs the whole front half of the pipeline: parse the entry file, resolve
/// imports, check, optimize, generate C.
pub fn build_c(entry: &Path) -> anyhow::Result<BuildPlan> {
    let source = std::fs::read_to_string(entry)
        .with_context(|| format!("reading {}", entry.display()))?;
    let base_dir = entry
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let result = use_arena(|arena| {
        let module = parser::parse_module(arena, &source)?;
        let mut resolver = Resolver::new(arena);
        resolver.resolve(&module, &base_dir, &|arena, text| {
            parser::parse_module(arena, text)
        })?;
        let output = compiler::compile(arena, &module)?;
        Ok::<_, compiler::error::Error>((output.source, output.links))
    });

    match result {
        Ok((c_source, links)) => Ok(BuildPlan { c_source, links }),
        Err(err) => Err(CompileFailure(err).into()),
    }
}

/// A located compile error carried through anyhow to the toplevel printer.
#[derive(Debug)]
pub struct CompileFailure(pub compiler::error::Error);

impl std::fmt::Display for CompileFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for CompileFailure {}

/// Hands the generated C to the host toolchain and links the runtime.
pub fn invoke_cc(
    c_path: &Path,
    out_path: &Path,
    cc: &str,
    runtime_lib: &Path,
    links: &[String],
) -> anyhow::Result<()> {
    let mut cmd = Command::new(cc);
    cmd.arg(c_path)
        .arg("-o")
        .arg(out_path)
        .arg(runtime_lib)
        .arg("-lpthread")
        .arg("-ldl")
        .arg("-lm");
    for lib in links {
        cmd.arg(format!("-l{lib}"));
    }
    info!("running {cmd:?}");
    let status = cmd
        .status()
        .with_context(|| format!("spawning host C compiler {cc}"))?;
    if !status.success() {
        bail!("host C compiler failed with {status}");
    }
    debug!("linked {}", out_path.display());
    Ok(())
}

/// Locates the runtime static library next to the compiler binary or under
/// the cargo target directory.
pub fn find_runtime_lib(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        bail!("runtime library {} not found", path.display());
    }
    let exe = std::env::current_exe().context("locating compiler binary")?;
    let mut candidates = Vec::new();
    if let Some(dir) = exe.parent() {
        candidates.push(dir.join("libruntime.a"));
        candidates.push(dir.join("../libruntime.a"));
    }
    candidates.push(PathBuf::from("target/release/libruntime.a"));
    candidates.push(PathBuf::from("target/debug/libruntime.a"));
    for candidate in candidates {
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    bail!("runtime library not found; build it with `cargo build -p runtime` or pass --runtime-lib")
}
