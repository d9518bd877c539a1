use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::debug;
use viper::vm::{ConfigError, DebugCtrl, DispatchKind, LoadError};
use viper::{Module, RegistryError, RunConfig, Runner, Value};

#[derive(Parser, Debug)]
#[command(name = "viper", about = "Run Viper IL modules")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a module (`.json` text form, anything else is read as binary)
    Run {
        module: PathBuf,

        /// Function to execute
        #[arg(long, default_value = "main")]
        entry: String,

        /// Dispatch strategy; overrides VIPER_DISPATCH
        #[arg(long)]
        dispatch: Option<DispatchKind>,

        /// Per-frame alloca budget in bytes (0 = default)
        #[arg(long)]
        stack_bytes: Option<usize>,

        /// Trap after this many instructions
        #[arg(long)]
        max_steps: Option<u64>,

        /// Maximum nesting of IL calls
        #[arg(long)]
        max_call_depth: Option<usize>,

        /// Pause on entry to blocks with this label (repeatable)
        #[arg(long = "break", value_name = "LABEL")]
        break_labels: Vec<String>,

        /// Pause before instructions on this source line (repeatable)
        #[arg(long = "break-line", value_name = "LINE")]
        break_lines: Vec<u32>,

        /// Pause after this many instructions
        #[arg(long, value_name = "N")]
        step: Option<u64>,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("failed to read `{path}`: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli { command } = Cli::parse();
    let Command::Run {
        module,
        entry,
        dispatch,
        stack_bytes,
        max_steps,
        max_call_depth,
        break_labels,
        break_lines,
        step,
    } = command;

    let setup = load(&module).and_then(|module| {
        let mut config = RunConfig::from_env();
        if let Some(dispatch) = dispatch {
            config = config.with_dispatch(dispatch);
        }
        if let Some(bytes) = stack_bytes {
            config = config.with_stack_bytes(bytes);
        }
        if let Some(steps) = max_steps {
            config = config.with_max_steps(steps);
        }
        if let Some(depth) = max_call_depth {
            config = config.with_max_call_depth(depth)?;
        }
        let mut debug = DebugCtrl::new();
        for label in break_labels {
            debug = debug.break_at_label(label);
        }
        for line in break_lines {
            debug = debug.break_at_line(line);
        }
        if let Some(steps) = step {
            debug = debug.with_step_budget(steps);
        }
        config = config.with_debug(debug);
        Ok((Runner::new(config)?, module))
    });
    let (runner, module) = match setup {
        Ok(ready) => ready,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(2);
        }
    };

    let module = Arc::new(module);
    if entry == "main" {
        match runner.run_main(module) {
            Ok(code) => process::exit(viper::exit_status(code)),
            Err(trap) => Runner::report_and_exit(&trap),
        }
    }
    match runner.run(module, &entry, Vec::new()) {
        Ok(Value::Void) => {}
        Ok(value) => println!("{value}"),
        Err(trap) => Runner::report_and_exit(&trap),
    }
}

fn load(path: &Path) -> Result<Module, CliError> {
    let read_err = |source| CliError::Read {
        path: path.display().to_string(),
        source,
    };
    let module = if path.extension().is_some_and(|ext| ext == "json") {
        let text = fs::read_to_string(path).map_err(read_err)?;
        viper::vm::load_module_json(&text)?
    } else {
        let bytes = fs::read(path).map_err(read_err)?;
        viper::vm::load_module(&bytes)?
    };
    debug!(
        path = %path.display(),
        module = %module.name,
        functions = module.functions.len(),
        "module loaded"
    );
    Ok(module)
}
