//! Async worker over a socket pair, driven by a blocking host thread and
//! stopped with the shutdown sentinel.
//!
//! Run with:
//!   cargo run --example async-echo-worker --features async

use std::thread;
use std::time::Duration;

use taskpipe::transport::IpcStream;
use taskpipe::{AsyncWorker, Dispatcher, InputTask, OutputTask, TaskCodec, WorkerConfig};
use tokio::io::{AsyncWriteExt, BufReader};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (host_end, worker_end) = IpcStream::pair()?;

    let host = thread::spawn(move || -> Result<(), taskpipe::WorkerError> {
        let mut host = Dispatcher::from_stream(host_end, TaskCodec::default(), Default::default())?;
        for message in ["one", "two", "three"] {
            let reply = host.dispatch(&InputTask::new(message))?;
            eprintln!("{message} -> {} [{}]", reply.message, reply.status);
        }
        // Keep the stream open; the sentinel ends the session.
        thread::sleep(Duration::from_millis(500));
        Ok(())
    });

    let (mut control_tx, control_rx) = tokio::io::duplex(64);
    let mut worker = AsyncWorker::new(worker_end.into_tokio()?, WorkerConfig::default());
    worker.initial(BufReader::new(control_rx))?;

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = control_tx.write_all(b"__quit__\n").await;
        // Hold the writer so the listener sees the sentinel, not EOF.
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    let termination = worker
        .do_work(|task: InputTask| async move {
            OutputTask::done(format!("Processed: {}", task.message))
        })
        .await?;
    eprintln!("Worker finished: {termination:?}");

    host.join().map_err(|_| "host thread panicked")??;
    Ok(())
}
