use std::env;
use std::error::Error;
use std::io::{self, Write};

use clap::Parser;
use tracing::{Level, debug, error, info};

use poly_log::{LogConfig, init_logging, parse_level};
use poly_scope::{
    EngineScope, ExitEngineScope, MemoryEngine, QuickJsEngine, RuntimeType, StackFrameScope,
    StringHolder, Validatable,
};

mod config;
use config::HostConfig;

const VERSION: &str = "0.1.0";

/// Get default config path based on executable location
fn default_config_path() -> Option<String> {
    let exe_path = env::current_exe().ok()?;
    let stem = exe_path.file_stem()?;
    let path = exe_path.parent()?.join(stem).with_extension("json");
    path.exists().then(|| path.to_str().map(str::to_string)).flatten()
}

/// Polyscript host - evaluates expressions inside scoped engine frames
#[derive(Parser, Debug)]
#[command(name = "poly_host")]
#[command(version = VERSION)]
#[command(about = "Evaluate expressions through the Polyscript scope system", long_about = None)]
struct Args {
    /// Path to configuration file (JSON)
    #[arg(short, long, env = "POLY_CONFIG")]
    config: Option<String>,

    /// Engine family to use, overriding the configuration
    #[arg(short, long)]
    runtime: Option<String>,

    /// Enable logging to file (poly_host.log in current directory)
    #[arg(long, env = "POLY_LOG_FILE")]
    log_file: bool,

    /// Print the configuration JSON Schema and exit
    #[arg(long)]
    print_schema: bool,

    /// Expressions to evaluate, one frame each
    expressions: Vec<String>,
}

fn main() {
    let args = Args::parse();

    if args.print_schema {
        match HostConfig::schema_json() {
            Ok(schema) => println!("{}", schema),
            Err(e) => {
                eprintln!("Failed to generate schema: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    // Logging is not up yet, early failures go to stderr
    let config_path = args.config.clone().or_else(default_config_path);
    let config = match &config_path {
        Some(path) => match HostConfig::from_json_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config from '{}': {}", path, e);
                std::process::exit(1);
            }
        },
        None => HostConfig::default(),
    };

    let log_level = parse_level(&config.log_level).unwrap_or_else(|| {
        eprintln!("Warning: Invalid log level '{}', using INFO", config.log_level);
        Level::INFO
    });

    let log_config = if args.log_file {
        match std::fs::File::create("poly_host.log") {
            Ok(file) => LogConfig::new("poly_host::")
                .with_level(log_level)
                .with_log_file(file),
            Err(e) => {
                eprintln!("Unable to create poly_host.log: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        LogConfig::<std::fs::File>::new("poly_host::").with_level(log_level)
    };

    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!("Polyscript host v{}", VERSION);
    match &config_path {
        Some(path) => info!("Configuration: {}", path),
        None => info!("Configuration: defaults"),
    }

    let runtime = match args.runtime.as_deref().map(RuntimeType::from_name) {
        Some(Ok(runtime)) => runtime,
        Some(Err(e)) => {
            error!("{}", e);
            std::process::exit(1);
        }
        None => config.runtime,
    };
    info!("Runtime: {}", runtime.name());

    let mut out = io::stdout();
    let result = match runtime {
        RuntimeType::JavaScript => QuickJsEngine::with_config(config.engine.clone())
            .map_err(Into::into)
            .and_then(|engine| run_javascript(&engine, &args.expressions, &mut out)),
        RuntimeType::Memory => {
            let engine = MemoryEngine::with_config(config.engine.clone());
            run_memory(&engine, &args.expressions, &mut out)
        }
    };

    match result {
        Ok(0) => debug!("all expressions evaluated"),
        Ok(failed) => {
            error!("{} expression(s) failed", failed);
            std::process::exit(1);
        }
        Err(e) => {
            error!("Engine failure: {}", e);
            std::process::exit(1);
        }
    }
}

/// Evaluate each expression in its own frame, returning the failure count
///
/// Everything an expression allocates, its copied result included, is
/// released with its frame, so locals do not accumulate across expressions.
fn run_javascript(
    engine: &QuickJsEngine,
    expressions: &[String],
    out: &mut impl Write,
) -> Result<usize, Box<dyn Error>> {
    let scope = EngineScope::new(engine)?;
    let mut failed = 0;

    for expression in expressions {
        let copied = {
            let frame = StackFrameScope::new(&scope)?;
            QuickJsEngine::eval(&frame, expression)
                .and_then(|value| QuickJsEngine::stringify(&frame, value))
                .and_then(|text| StringHolder::new(engine, text))
        };

        match copied {
            // host I/O runs with the engine suspended
            Ok(holder) => ExitEngineScope::with(&scope, || writeln!(out, "{}", holder))??,
            Err(e) => {
                error!("{}: {}", expression, e);
                failed += 1;
            }
        }
    }

    debug!("{} locals live after evaluation", engine.live_locals());
    Ok(failed)
}

/// Pass each argument through the memory engine and print the copy
fn run_memory(
    engine: &MemoryEngine,
    expressions: &[String],
    out: &mut impl Write,
) -> Result<usize, Box<dyn Error>> {
    let scope = EngineScope::new(engine)?;
    let mut failed = 0;

    for expression in expressions {
        let copied = {
            let frame = StackFrameScope::new(&scope)?;
            MemoryEngine::new_string(&frame, expression)
                .and_then(|local| StringHolder::new(engine, local))
        };

        match copied {
            Ok(holder) => ExitEngineScope::with(&scope, || writeln!(out, "{}", holder))??,
            Err(e) => {
                error!("{}: {}", expression, e);
                failed += 1;
            }
        }
    }

    debug!(
        "{} string copies made, {} locals live",
        engine.string_reads(),
        engine.live_locals()
    );
    Ok(failed)
}
