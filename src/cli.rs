use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::compiler::typescript::{self, CompileOptions};
use crate::config::settings::SandboxConfig;
use crate::config::types::{ExecutionContext, Language};
use crate::exec::executor::CodeSandbox;
use crate::observability::metrics::get_metrics;
use crate::utils::html::render_safe_html;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./scriptbox.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Audit log path (JSON lines)
    #[arg(long, global = true)]
    audit_log: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a JavaScript or TypeScript snippet in the sandbox
    Run {
        /// Source file, or '-' for stdin
        input: String,
        /// Snippet language (javascript, typescript); inferred from the extension when absent
        #[arg(long)]
        language: Option<Language>,
        /// Deadline in milliseconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Engine heap limit in bytes
        #[arg(long)]
        memory_limit: Option<u64>,
        /// Request network access (never granted)
        #[arg(long)]
        allow_network: bool,
        /// Request filesystem access (never granted)
        #[arg(long)]
        allow_file_system: bool,
    },
    /// Transpile TypeScript to JavaScript
    Compile {
        /// Source file, or '-' for stdin
        input: String,
        /// Parse as TSX
        #[arg(long)]
        jsx: bool,
    },
    /// Check TypeScript syntax without emitting code
    Check {
        /// Source file, or '-' for stdin
        input: String,
        #[arg(long)]
        jsx: bool,
    },
    /// Pretty-print TypeScript source
    Format {
        /// Source file, or '-' for stdin
        input: String,
    },
    /// Strip script-capable tags and inline handlers from HTML
    Sanitize {
        /// HTML file, or '-' for stdin
        input: String,
    },
    /// Run the given snippets, then print Prometheus metrics for this process
    Metrics {
        /// Source files to execute first
        inputs: Vec<String>,
    },
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    if let Err(e) = crate::observability::audit::init_audit_logger(cli.audit_log.clone()) {
        eprintln!("Failed to initialize audit logger: {}", e);
        std::process::exit(1);
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            input,
            language,
            timeout,
            memory_limit,
            allow_network,
            allow_file_system,
        } => {
            let source = read_input(&input)?;
            let context = ExecutionContext {
                timeout,
                memory_limit,
                allow_network,
                allow_file_system,
                language: language.unwrap_or_else(|| infer_language(&input)),
            };

            let mut sandbox = CodeSandbox::new(config);
            let result = sandbox.execute_code(&source, &context);
            println!("{}", serde_json::to_string_pretty(&result)?);

            if !result.success {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Compile { input, jsx } => {
            let source = read_input(&input)?;
            let result = typescript::compile(&source, &compile_options(&input, jsx));
            println!("{}", serde_json::to_string_pretty(&result)?);

            if !result.success {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Check { input, jsx } => {
            let source = read_input(&input)?;
            let result = typescript::check_syntax(&source, &compile_options(&input, jsx));
            println!("{}", serde_json::to_string_pretty(&result)?);

            if !result.success {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Format { input } => {
            let source = read_input(&input)?;
            print!("{}", typescript::format(&source, &compile_options(&input, false)));
            Ok(())
        }
        Commands::Sanitize { input } => {
            let html = read_input(&input)?;
            print!("{}", render_safe_html(&html));
            Ok(())
        }
        Commands::Metrics { inputs } => {
            let mut sandbox = CodeSandbox::new(config);
            for input in &inputs {
                let source = read_input(input)?;
                let mut context = ExecutionContext::default();
                context.language = infer_language(input);
                let result = sandbox.execute_code(&source, &context);
                eprintln!("{}: {}", input, result.status);
            }
            print!("{}", get_metrics().export_prometheus());
            Ok(())
        }
    }
}

const DEFAULT_CONFIG_FILE: &str = "scriptbox.json";

fn load_config(path: Option<&Path>) -> Result<SandboxConfig> {
    match path {
        Some(path) => load_config_file(path),
        None => {
            let default_path = std::env::current_dir()
                .context("resolving current directory")?
                .join(DEFAULT_CONFIG_FILE);
            load_config_if_present(&default_path)
        }
    }
}

/// Built-in defaults when `path` is absent; a present file must load
fn load_config_if_present(path: &Path) -> Result<SandboxConfig> {
    if !path.exists() {
        log::debug!("{} not found, using built-in configuration", path.display());
        return Ok(SandboxConfig::default());
    }
    load_config_file(path)
}

fn load_config_file(path: &Path) -> Result<SandboxConfig> {
    SandboxConfig::load_from_file(path)
        .with_context(|| format!("loading config from {}", path.display()))
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("reading source from stdin")?;
        return Ok(buffer);
    }
    std::fs::read_to_string(input).with_context(|| format!("reading {}", input))
}

fn infer_language(input: &str) -> Language {
    match Path::new(input).extension().and_then(|e| e.to_str()) {
        Some("ts" | "tsx" | "mts" | "cts") => Language::TypeScript,
        _ => Language::JavaScript,
    }
}

fn compile_options(input: &str, jsx: bool) -> CompileOptions {
    let jsx = jsx || input.ends_with(".tsx");
    let mut options = CompileOptions::default();
    if input != "-" {
        options.filename = input.to_string();
    }
    options.jsx = jsx;
    options
}
