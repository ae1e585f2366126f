use std::io::{IsTerminal, Write};
use std::path::Path;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use taskpipe_worker::{Headers, InputTask, OutputTask, Termination};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyOutput<'a> {
    correlation_id: Option<&'a str>,
    request: &'a str,
    message: &'a str,
    status: i32,
    status_name: Option<&'static str>,
    done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    headers: Option<&'a Headers>,
    reply_queue_name: Option<&'a str>,
}

impl<'a> ReplyOutput<'a> {
    fn new(request: &'a InputTask, reply: &'a OutputTask) -> Self {
        Self {
            correlation_id: request.correlation_id.as_deref(),
            request: &request.message,
            message: &reply.message,
            status: reply.status.code(),
            status_name: reply.status.name(),
            done: reply.status.is_done(),
            headers: reply.headers.as_ref(),
            reply_queue_name: reply.reply_queue_name.as_deref(),
        }
    }
}

/// Print one worker reply next to the request it answers.
pub fn print_reply(request: &InputTask, reply: &OutputTask, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ReplyOutput::new(request, reply);
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CORRELATION", "STATUS", "REPLY QUEUE", "MESSAGE"])
                .add_row(vec![
                    request.correlation_id.clone().unwrap_or_default(),
                    reply.status.to_string(),
                    reply.reply_queue_name.clone().unwrap_or_else(|| "-".into()),
                    reply.message.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "correlation={} status={} reply_queue={} headers={} message={}",
                request.correlation_id.as_deref().unwrap_or("-"),
                reply.status,
                reply.reply_queue_name.as_deref().unwrap_or("-"),
                headers_preview(reply.headers.as_ref()),
                reply.message
            );
        }
        OutputFormat::Raw => {
            print_raw(reply.message.as_bytes());
            print_raw(b"\n");
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkSummary<'a> {
    socket: String,
    termination: &'a str,
    tasks_handled: u64,
}

/// Print how a `work` session ended.
pub fn print_work_summary(
    socket: &Path,
    termination: Termination,
    tasks_handled: u64,
    format: OutputFormat,
) {
    let termination = match termination {
        Termination::Shutdown => "shutdown",
        Termination::PeerClosed => "peer_closed",
    };
    match format {
        OutputFormat::Json => {
            let out = WorkSummary {
                socket: socket.display().to_string(),
                termination,
                tasks_handled,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SOCKET", "TERMINATION", "TASKS"])
                .add_row(vec![
                    socket.display().to_string(),
                    termination.to_string(),
                    tasks_handled.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!(
                "socket={} termination={termination} tasks={tasks_handled}",
                socket.display()
            );
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn headers_preview(headers: Option<&Headers>) -> String {
    match headers {
        None => "-".to_string(),
        Some(map) if map.is_empty() => "{}".to_string(),
        Some(map) => map
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(","),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_json_shape() {
        let request = InputTask::new("hi").with_correlation_id("c-1");
        let reply = OutputTask::reply_to("Processed: hi", "replies");
        let json = serde_json::to_value(ReplyOutput::new(&request, &reply)).unwrap();

        assert_eq!(json["correlationId"], "c-1");
        assert_eq!(json["status"], 201);
        assert_eq!(json["statusName"], "DONE_WITH_REPLY");
        assert_eq!(json["done"], true);
        assert_eq!(json["replyQueueName"], "replies");
        assert!(json.get("headers").is_none());
    }

    #[test]
    fn headers_preview_formats() {
        assert_eq!(headers_preview(None), "-");
        assert_eq!(headers_preview(Some(&Headers::new())), "{}");
        let headers: Headers = [("a".to_string(), "1".to_string())].into_iter().collect();
        assert_eq!(headers_preview(Some(&headers)), "a=1");
    }
}
