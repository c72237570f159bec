//! Prompt Kernel CLI
//!
//! Usage:
//!   prompt-kernel [OPTIONS] [FILE]
//!
//! Options:
//!   -v, --var <NAME=VALUE>  Template variable (repeatable)
//!   -c, --config <FILE>     Kernel configuration (TOML format)
//!   -t, --trust             Do not escape variables or function output
//!   -b, --blocks            Print the parsed blocks instead of rendering
//!       --tools             Print the built-in functions' tool schemas as JSON
//!   -h, --help              Print help

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use prompt_kernel::{plugins, KernelArguments, KernelConfig, KernelError, Kernel, Template};

#[derive(Parser)]
#[command(name = "prompt-kernel")]
#[command(about = "Render prompt templates with built-in functions")]
struct Cli {
    /// Template file (reads from stdin if not provided)
    input: Option<PathBuf>,

    /// Template variable as NAME=VALUE
    #[arg(short, long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
    vars: Vec<(String, String)>,

    /// Kernel configuration file (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Trust all content: nothing is escaped
    #[arg(short, long)]
    trust: bool,

    /// Print the parsed block tree instead of rendering
    #[arg(short, long)]
    blocks: bool,

    /// Print the tool schemas advertised to models and exit
    #[arg(long)]
    tools: bool,
}

fn parse_var(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{}'", s)),
    }
}

fn print_tools(config: KernelConfig) -> ExitCode {
    let mut kernel = Kernel::with_config(config);
    if let Err(e) = plugins::register_builtins(&mut kernel) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }
    match serde_json::to_string_pretty(&kernel.functions().tool_schemas()) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match KernelConfig::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config '{}': {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => KernelConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with_writer(io::stderr)
        .init();

    if cli.tools {
        return print_tools(config);
    }

    let (source, filename) = match &cli.input {
        Some(path) => match fs::read_to_string(path) {
            Ok(content) => (content, path.display().to_string()),
            Err(e) => {
                eprintln!("Error reading file '{}': {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => {
            let mut buffer = String::new();
            if let Err(e) = io::stdin().read_to_string(&mut buffer) {
                eprintln!("Error reading from stdin: {}", e);
                return ExitCode::FAILURE;
            }
            (buffer, "<stdin>".to_string())
        }
    };

    let template = match Template::parse(&source) {
        Ok(t) => t,
        Err(e) => {
            eprint!("{}", e.format(&source, &filename));
            return ExitCode::FAILURE;
        }
    };

    if cli.blocks {
        for block in template.blocks() {
            println!("{:>4}..{:<4} {:?}", block.span.start, block.span.end, block.node);
        }
        return ExitCode::SUCCESS;
    }

    let config = if cli.trust {
        config.with_allow_unsafe_content(true)
    } else {
        config
    };
    let mut kernel = Kernel::with_config(config);
    if let Err(e) = plugins::register_builtins(&mut kernel) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let arguments: KernelArguments = cli.vars.into_iter().collect();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error starting runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let rendered = runtime.block_on(prompt_kernel::renderer::render(
        &kernel,
        &template,
        &arguments,
        &kernel.render_options(),
    ));
    match rendered {
        Ok(text) => {
            print!("{}", text);
            ExitCode::SUCCESS
        }
        Err(KernelError::Syntax(e)) => {
            eprint!("{}", e.format(&source, &filename));
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
