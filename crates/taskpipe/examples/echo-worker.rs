//! Host and worker in one process: a worker thread connects to a socket the
//! host binds, the host dispatches a few tasks and then closes the stream.
//!
//! Run with:
//!   cargo run --example echo-worker
//!
//! The same worker can be driven by the CLI host:
//!   cargo run --features cli -- dispatch /tmp/taskpipe-demo.sock -m hello

use std::fs;
use std::thread;

use taskpipe::transport::UnixDomainSocket;
use taskpipe::worker::{ChannelSource, TIMEOUT_HEADER};
use taskpipe::{
    with_context, Dispatcher, InputTask, OutputTask, TaskCodec, TaskContext, Worker, WorkerConfig,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_dir = std::env::temp_dir().join(format!("taskpipe-echo-{}", std::process::id()));
    fs::create_dir_all(&sock_dir)?;
    let sock_path = sock_dir.join("echo.sock");

    let listener = UnixDomainSocket::bind(&sock_path)?;
    eprintln!("Listening on {}", sock_path.display());

    let worker_path = sock_path.clone();
    let worker = thread::spawn(move || -> Result<_, taskpipe::WorkerError> {
        let mut worker = Worker::connect(&worker_path, WorkerConfig::default())?;
        // No side channel in this demo; the host ends the session by closing.
        let (_control, source) = ChannelSource::channel();
        worker.initial(source)?;
        worker.do_work(with_context(|task: InputTask, ctx: &TaskContext| {
            if ctx.is_cancelled() {
                return OutputTask::ignore(task.message);
            }
            OutputTask::done(format!("Processed: {}", task.message))
        }))
    });

    let stream = listener.accept()?;
    let mut host = Dispatcher::from_stream(stream, TaskCodec::default(), Default::default())?;

    for (n, message) in ["hello", "world"].into_iter().enumerate() {
        let task = InputTask::new(message)
            .with_correlation_id(n.to_string())
            .with_header(TIMEOUT_HEADER, "1000");
        let reply = host.dispatch(&task)?;
        eprintln!("{} -> {} [{}]", task.message, reply.message, reply.status);
    }
    drop(host);

    let termination = worker.join().map_err(|_| "worker thread panicked")??;
    eprintln!("Worker finished: {termination:?}");

    let _ = fs::remove_dir_all(&sock_dir);
    Ok(())
}
