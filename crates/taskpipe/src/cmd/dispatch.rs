use taskpipe_frame::FrameConfig;
use taskpipe_transport::UnixDomainSocket;
use taskpipe_worker::{Dispatcher, Headers, InputTask};
use tracing::info;

use crate::cmd::{parse_duration, resolve_socket, DispatchArgs};
use crate::exit::{transport_error, worker_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_reply, OutputFormat};

pub fn run(args: DispatchArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let headers = parse_headers(&args.headers)?;
    let socket = resolve_socket(&args.pipe, &args.prefix)?;

    let listener =
        UnixDomainSocket::bind(&socket).map_err(|err| transport_error("bind failed", err))?;
    info!(socket = %socket.display(), "waiting for a worker");
    let stream = listener
        .accept()
        .map_err(|err| transport_error("accept failed", err))?;

    let frame = FrameConfig {
        read_timeout: Some(timeout),
        ..FrameConfig::default()
    };
    let mut dispatcher = Dispatcher::from_stream(stream, args.codec.codec(), frame)
        .map_err(|err| worker_error("stream setup failed", err))?;

    let id_prefix = args
        .correlation_id
        .unwrap_or_else(|| std::process::id().to_string());

    for (n, message) in args.messages.into_iter().enumerate() {
        let task = InputTask {
            message,
            correlation_id: Some(format!("{id_prefix}-{n}")),
            original_queue_name: args.queue.clone(),
            headers: headers.clone(),
        };
        let reply = dispatcher
            .dispatch(&task)
            .map_err(|err| worker_error("dispatch failed", err))?;
        print_reply(&task, &reply, format);
    }

    Ok(SUCCESS)
}

fn parse_headers(raw: &[String]) -> CliResult<Option<Headers>> {
    if raw.is_empty() {
        return Ok(None);
    }
    let mut headers = Headers::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| CliError::new(USAGE, format!("header must be KEY=VALUE: {entry}")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::new(USAGE, format!("header key is empty: {entry}")));
        }
        headers.insert(key.to_string(), value.to_string());
    }
    Ok(Some(headers))
}
