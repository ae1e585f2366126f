use taskpipe_frame::DEFAULT_MAX_PAYLOAD;
use taskpipe_transport::DEFAULT_PIPE_PREFIX;
use taskpipe_worker::{DEFAULT_POLL_INTERVAL, DEFAULT_SENTINEL};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("taskpipe {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: taskpipe");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("TASKPIPE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("features: async={}, cli=true", cfg!(feature = "async"));
    println!("wire: msgpack, positional keys");
    println!("max_payload: {DEFAULT_MAX_PAYLOAD}");
    println!("pipe_prefix: {DEFAULT_PIPE_PREFIX}");
    println!("sentinel: {DEFAULT_SENTINEL}");
    println!("poll_interval_ms: {}", DEFAULT_POLL_INTERVAL.as_millis());

    Ok(SUCCESS)
}
