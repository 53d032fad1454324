use std::io::{Read, Write};
use std::path::Path;

use nailang::cli::{self, CliArgs, USAGE};
use nailang::config::{Defines, EngineConfig};
use nailang::nailang::NailangError;
use nailang::xcomp;

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_defines(args: &CliArgs) -> Result<Defines, String> {
    let mut defines = Defines::new();
    if let Some(path) = args.config.resolve() {
        let (loaded, errors) = Defines::load_file(&path).map_err(|e| format!("{}: {e}", path.display()))?;
        for err in errors {
            tracing::warn!("{}: {err}", path.display());
        }
        tracing::debug!(count = loaded.len(), "loaded defines from {}", path.display());
        defines = loaded;
    }
    let mut cli = Defines::new();
    for def in &args.defines {
        cli.define(def)?;
    }
    defines.merge(cli);
    Ok(defines)
}

fn read_source(path: &Path) -> Result<String, String> {
    if path == Path::new("-") {
        let mut src = String::new();
        std::io::stdin().read_to_string(&mut src).map_err(|e| format!("stdin: {e}"))?;
        Ok(src)
    } else {
        std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))
    }
}

fn run(args: &CliArgs) -> Result<(), String> {
    let defines = load_defines(args)?;
    let src = read_source(&args.source)?;
    let file = args.source.display().to_string();
    let out = xcomp::render(&src, &file, &EngineConfig::default(), &defines).map_err(|e| match e {
        NailangError::Runtime(err) => err.report(),
        NailangError::Parse(err) => err.to_string(),
    })?;
    match &args.output {
        Some(path) => {
            let written = out.write_to(path).map_err(|e| format!("{}: {e}", path.display()))?;
            tracing::info!(files = written.len(), "wrote {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(out.source.as_bytes()).map_err(|e| format!("stdout: {e}"))?;
        }
    }
    Ok(())
}

fn main() {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("nailang: {e}");
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };
    init_tracing(args.verbose);

    if let Err(e) = run(&args) {
        eprintln!("nailang: {e}");
        std::process::exit(1);
    }
}
