use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use taskpipe_transport::{pipe_path, DEFAULT_PIPE_PREFIX};
use taskpipe_worker::{KeyConvention, TaskCodec, WireFormat, DEFAULT_SENTINEL};

use crate::exit::{transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod dispatch;
pub mod version;
pub mod work;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a worker that echoes every task back.
    Work(WorkArgs),
    /// Act as a host: wait for a worker, send tasks and print the replies.
    Dispatch(DispatchArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Work(args) => work::run(args, format),
        Command::Dispatch(args) => dispatch::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum WireFormatArg {
    Msgpack,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum KeysArg {
    Positional,
    Named,
}

#[derive(Args, Debug)]
pub struct CodecArgs {
    /// Payload serialization format.
    #[arg(long, value_name = "FORMAT", default_value = "msgpack", env = "TASKPIPE_WIRE_FORMAT")]
    pub wire_format: WireFormatArg,
    /// Field key convention used when encoding.
    #[arg(long, value_name = "KEYS", default_value = "positional", env = "TASKPIPE_KEYS")]
    pub keys: KeysArg,
}

impl CodecArgs {
    pub fn codec(&self) -> TaskCodec {
        let format = match self.wire_format {
            WireFormatArg::Msgpack => WireFormat::MsgPack,
            WireFormatArg::Json => WireFormat::Json,
        };
        let keys = match self.keys {
            KeysArg::Positional => KeyConvention::Positional,
            KeysArg::Named => KeyConvention::Named,
        };
        TaskCodec::new(format, keys)
    }
}

#[derive(Args, Debug)]
pub struct WorkArgs {
    /// Pipe name or socket path. Read from the first line of stdin when
    /// omitted.
    pub pipe: Option<String>,
    /// Prefix turning a bare pipe name into a socket path.
    #[arg(long, default_value = DEFAULT_PIPE_PREFIX, env = "TASKPIPE_PIPE_PREFIX")]
    pub prefix: String,
    /// Stdin line that stops the worker.
    #[arg(long, default_value = DEFAULT_SENTINEL, env = "TASKPIPE_SENTINEL")]
    pub sentinel: String,
    /// How often an idle worker re-checks for shutdown (e.g. 250ms, 1s).
    #[arg(long, default_value = "250ms")]
    pub poll_interval: String,
    /// Route every reply to this queue (status DONE_WITH_REPLY).
    #[arg(long, value_name = "QUEUE")]
    pub reply_queue: Option<String>,
    #[command(flatten)]
    pub codec: CodecArgs,
}

#[derive(Args, Debug)]
pub struct DispatchArgs {
    /// Pipe name or socket path to bind.
    pub pipe: String,
    /// Prefix turning a bare pipe name into a socket path.
    #[arg(long, default_value = DEFAULT_PIPE_PREFIX, env = "TASKPIPE_PIPE_PREFIX")]
    pub prefix: String,
    /// Task message; repeat to send several tasks in order.
    #[arg(long = "message", short = 'm', value_name = "TEXT", required = true)]
    pub messages: Vec<String>,
    /// Correlation id prefix; each task gets `<prefix>-<n>`.
    #[arg(long, value_name = "ID")]
    pub correlation_id: Option<String>,
    /// Original queue name to stamp on every task.
    #[arg(long, value_name = "QUEUE")]
    pub queue: Option<String>,
    /// Header to attach, as KEY=VALUE; repeatable.
    #[arg(long = "header", short = 'H', value_name = "KEY=VALUE")]
    pub headers: Vec<String>,
    /// Maximum time to wait for each reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
    #[command(flatten)]
    pub codec: CodecArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// A value containing `/` is a socket path; anything else is a pipe name
/// resolved against `prefix`.
pub(crate) fn resolve_socket(pipe: &str, prefix: &str) -> CliResult<PathBuf> {
    let pipe = pipe.trim();
    if pipe.contains('/') {
        return Ok(PathBuf::from(pipe));
    }
    pipe_path(prefix, pipe).map_err(|err| transport_error("invalid pipe name", err))
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
