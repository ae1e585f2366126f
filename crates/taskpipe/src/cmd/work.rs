use taskpipe_worker::{FdLineSource, InputTask, OutputTask, ShutdownFlag, Worker, WorkerConfig};
use tracing::info;

use crate::cmd::{parse_duration, resolve_socket, WorkArgs};
use crate::exit::{io_error, worker_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_work_summary, OutputFormat};

pub fn run(args: WorkArgs, format: OutputFormat) -> CliResult<i32> {
    let poll_interval = parse_duration(&args.poll_interval)?;

    // Stdin carries the handshake line first, then the shutdown sentinel.
    let mut control = FdLineSource::stdin();
    let pipe = match args.pipe {
        Some(pipe) => pipe,
        None => control
            .read_line()
            .map_err(|err| io_error("failed to read pipe name", err))?
            .ok_or_else(|| CliError::new(USAGE, "no pipe name given and stdin is closed"))?,
    };
    let socket = resolve_socket(&pipe, &args.prefix)?;

    let config = WorkerConfig {
        codec: args.codec.codec(),
        sentinel: args.sentinel,
        poll_interval,
        ..WorkerConfig::default()
    };
    let mut worker =
        Worker::connect(&socket, config).map_err(|err| worker_error("connect failed", err))?;
    install_ctrlc_handler(worker.shutdown_flag())?;
    worker
        .initial(control)
        .map_err(|err| worker_error("worker setup failed", err))?;
    info!(socket = %socket.display(), "worker connected");

    let reply_queue = args.reply_queue;
    let mut handled = 0u64;
    let termination = worker
        .do_work(|task: InputTask| {
            handled += 1;
            echo(task, reply_queue.as_deref())
        })
        .map_err(|err| worker_error("worker failed", err))?;

    print_work_summary(&socket, termination, handled, format);
    Ok(SUCCESS)
}

fn echo(task: InputTask, reply_queue: Option<&str>) -> OutputTask {
    let message = format!("Processed: {}", task.message);
    let reply = match reply_queue {
        Some(queue) => OutputTask::reply_to(message, queue),
        None => OutputTask::done(message),
    };
    reply.with_headers(task.headers)
}

fn install_ctrlc_handler(flag: ShutdownFlag) -> CliResult<()> {
    ctrlc::set_handler(move || {
        flag.trigger();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
