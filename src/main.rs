use anyhow::Context;
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, error, trace};
use tracing_subscriber::EnvFilter;

use logging_util::capture::signal::setup_interrupt_handlers;
use logging_util::capture::{quit, Console, InputCapturer, LogFormat, LogWriter, Supervisor};
use logging_util::config::LoggerConfig;
use logging_util::subprocess::{ProcessCommandBuilder, TokioProcessLauncher};

const LOG_FILTER_ENV: &str = "LOGGING_UTIL_LOG";

/// Long options that consume the following argument as their value
const VALUE_OPTIONS: &[&str] = &[
    "--log-file",
    "--format",
    "--keep",
    "--skip",
    "--encoding",
    "--input-encoding",
    "--config",
];

/// Short flags that take a value
const VALUE_SHORT_FLAGS: &[char] = &['o', 'c'];

/// Run a program (or read standard input) and log its output
#[derive(Parser, Debug)]
#[command(name = "logging-util", version)]
#[command(
    about = "Log the output of a command-line program while passing it through",
    long_about = None,
    override_usage = "logging-util [OPTIONS] [: | --] [PROGRAM [ARGS...]]"
)]
struct Cli {
    /// Log file path (default: <program>.<date>.<log|html>)
    #[arg(short = 'o', long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Append to an existing log file instead of replacing it
    #[arg(short, long)]
    append: bool,

    /// Log record format: plain, verbose or html
    #[arg(long, value_name = "FORMAT", conflicts_with_all = ["html", "plain"])]
    format: Option<LogFormat>,

    /// Shorthand for --format html
    #[arg(long, conflicts_with = "plain")]
    html: bool,

    /// Shorthand for --format plain
    #[arg(long)]
    plain: bool,

    /// Only log lines matching this regular expression
    #[arg(long, value_name = "REGEX")]
    keep: Option<String>,

    /// Never log lines matching this regular expression
    #[arg(long, value_name = "REGEX")]
    skip: Option<String>,

    /// Collapse whitespace runs and trim each line
    #[arg(short, long)]
    simplify: bool,

    /// Do not log the program's standard output
    #[arg(long)]
    no_stdout: bool,

    /// Do not log the program's standard error
    #[arg(long)]
    no_stderr: bool,

    /// Text encoding of the program's output
    #[arg(long, value_name = "ENCODING")]
    encoding: Option<String>,

    /// Text encoding of standard input
    #[arg(long, value_name = "ENCODING")]
    input_encoding: Option<String>,

    /// Path to configuration file
    #[arg(short = 'c', long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Program to run and its arguments; standard input is logged if omitted
    #[arg(
        value_name = "PROGRAM",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<String>,
}

impl Cli {
    /// Flags override whatever the file and environment configured
    fn apply_to(&self, config: &mut LoggerConfig) {
        if let Some(path) = &self.log_file {
            config.log_file = Some(path.clone());
        }
        if self.append {
            config.append = true;
        }
        if self.html {
            config.format = LogFormat::Html;
        } else if self.plain {
            config.format = LogFormat::Plain;
        } else if let Some(format) = self.format {
            config.format = format;
        }
        if let Some(keep) = &self.keep {
            config.keep = Some(keep.clone());
        }
        if let Some(skip) = &self.skip {
            config.skip = Some(skip.clone());
        }
        if self.simplify {
            config.simplify = true;
        }
        if self.no_stdout {
            config.capture_stdout = false;
        }
        if self.no_stderr {
            config.capture_stderr = false;
        }
        if let Some(encoding) = &self.encoding {
            config.encoding = encoding.clone();
        }
        if let Some(encoding) = &self.input_encoding {
            config.input_encoding = encoding.clone();
        }
    }
}

/// Whether `arg` leaves its value to the next argument, as in `--keep X`,
/// `-o X` or a short-flag cluster such as `-ao X`
fn consumes_next(arg: &str) -> bool {
    if VALUE_OPTIONS.contains(&arg) {
        return true;
    }
    let Some(cluster) = arg.strip_prefix('-') else {
        return false;
    };
    if cluster.starts_with('-') || cluster.contains('=') {
        return false;
    }
    // The first value flag in a cluster takes the rest of it, if any
    match cluster.char_indices().find(|(_, c)| VALUE_SHORT_FLAGS.contains(c)) {
        Some((index, flag)) => index + flag.len_utf8() == cluster.len(),
        None => false,
    }
}

/// Accept a standalone `:` as the separator in front of the program
fn normalize_separator(args: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    let mut separated = false;

    for arg in args {
        let takes_value = normalized.last().is_some_and(|prev| consumes_next(prev));
        if !separated && !takes_value && !normalized.is_empty() {
            if arg == ":" {
                separated = true;
                normalized.push("--".to_string());
                continue;
            }
            // Anything after the program belongs to the program
            if arg == "--" || !arg.starts_with('-') {
                separated = true;
            }
        }
        normalized.push(arg);
    }
    normalized
}

fn init_tracing(verbose: u8) {
    let log_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2)
        .with_thread_ids(verbose >= 3)
        .with_line_number(verbose >= 3)
        .init();
}

fn build_config(cli: &Cli) -> anyhow::Result<LoggerConfig> {
    let mut config = match &cli.config {
        Some(path) => LoggerConfig::load(path)?,
        None => LoggerConfig::new(),
    };
    config.merge_env_vars();
    cli.apply_to(&mut config);
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = build_config(&cli)?;
    let options = config.capture_options()?;
    debug!("Effective configuration: {:?}", config);

    let program = cli.command.first().map(String::as_str);
    let path = config.log_path(program, Local::now().date_naive());
    let writer = LogWriter::open(&path, config.append, config.format)
        .with_context(|| format!("cannot open log file {}", path.display()))?;

    let mut supervisor = Supervisor::new(options, writer, Console::inherit());
    let _active = quit::activate(supervisor.quit_handle());
    setup_interrupt_handlers()?;

    match cli.command.split_first() {
        Some((program, args)) => {
            let command = ProcessCommandBuilder::new(program).args(args).build();
            supervisor
                .start_child_process(&TokioProcessLauncher, &command)
                .await?;
        }
        None => supervisor.start_input_capture(InputCapturer::stdin()?)?,
    }

    Ok(supervisor.run().await?)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse_from(normalize_separator(std::env::args()));
    init_tracing(cli.verbose);

    debug!("logging-util started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
