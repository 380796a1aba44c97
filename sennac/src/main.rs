use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use sennac::driver::{self, CompileFailure};

/// Command line arguments, interpreted with `clap`.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// the entry .sn module
    file: PathBuf,
    /// output path (executable, or C file with --emit-c)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// stop after generating the C translation unit
    #[arg(long)]
    emit_c: bool,
    /// host C compiler to invoke
    #[arg(long)]
    cc: Option<String>,
    /// path to the runtime static library
    #[arg(long)]
    runtime_lib: Option<PathBuf>,
    /// remove color from diagnostics
    #[arg(long)]
    no_color: bool,
    /// print the pipeline's progress
    #[arg(short, long)]
    verbose: bool,
}

/// The version of the program
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The name of the program
const NAME: &str = env!("CARGO_PKG_NAME");

fn main() {
    let args = Args::parse();
    let mut builder = env_logger::Builder::from_default_env();
    if args.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();
    if args.no_color {
        colored::control::set_override(false);
    }
    log::debug!("{NAME} {VERSION}");

    match run(&args) {
        Ok(()) => {}
        Err(err) => {
            if let Some(CompileFailure(compile_err)) = err.downcast_ref::<CompileFailure>() {
                sennac::display_error(
                    compile_err,
                    &args.file.display().to_string(),
                    !args.no_color,
                );
            } else {
                let mark = if args.no_color {
                    "\u{2717}".to_owned()
                } else {
                    "\u{2717}".red().to_string()
                };
                eprintln!("{mark} {err:#}");
            }
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let plan = driver::build_c(&args.file)?;

    let stem = args
        .file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("out")
        .to_owned();

    if args.emit_c {
        let c_path = args
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{stem}.c")));
        std::fs::write(&c_path, &plan.c_source)?;
        println!("{}", c_path.display());
        return Ok(());
    }

    let c_path = std::env::temp_dir().join(format!("{stem}.sennac.c"));
    std::fs::write(&c_path, &plan.c_source)?;
    let out_path = args.output.clone().unwrap_or_else(|| PathBuf::from(&stem));
    let cc = args.cc.clone().unwrap_or_else(|| {
        std::env::var("CC").unwrap_or_else(|_| "cc".to_owned())
    });
    let runtime_lib = driver::find_runtime_lib(args.runtime_lib.as_deref())?;
    driver::invoke_cc(&c_path, &out_path, &cc, &runtime_lib, &plan.links)?;
    Ok(())
}
