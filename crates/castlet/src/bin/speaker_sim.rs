//! Simulated speaker-control worker.
//!
//! Implements the collaborator contract: one JSON command per line on
//! stdin, one JSON response per line on stdout (echoing `requestId` unless
//! told not to), diagnostics on stderr only. Used by the integration tests
//! and for developing against the daemon without real speakers.
//!
//! Flags:
//! - `--no-request-id`        never echo `requestId` (legacy FIFO mode)
//! - `--ping-delay-ms <n>`    answer `ping` after a delay, concurrently
//! - `--garbage-before-reply` write a non-JSON line before every reply

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

struct Options {
    echo_request_id: bool,
    ping_delay: Duration,
    garbage_before_reply: bool,
}

fn parse_args() -> Options {
    let mut options = Options {
        echo_request_id: true,
        ping_delay: Duration::ZERO,
        garbage_before_reply: false,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--no-request-id" => options.echo_request_id = false,
            "--ping-delay-ms" => {
                let millis = args.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                options.ping_delay = Duration::from_millis(millis);
            }
            "--garbage-before-reply" => options.garbage_before_reply = true,
            other => tracing::warn!(flag = other, "Ignoring unknown flag"),
        }
    }
    options
}

/// Serializes replies onto stdout. Shared with delayed-reply tasks.
struct Responder {
    out: Mutex<Stdout>,
    echo_request_id: bool,
    garbage_before_reply: bool,
}

impl Responder {
    async fn send(&self, request_id: Option<u64>, mut reply: Value) -> std::io::Result<()> {
        if self.echo_request_id
            && let Some(id) = request_id
        {
            reply["requestId"] = json!(id);
        }
        let mut line = serde_json::to_vec(&reply)?;
        line.push(b'\n');

        let mut out = self.out.lock().await;
        if self.garbage_before_reply {
            out.write_all(b"### simulator noise, not a frame ###\n").await?;
        }
        out.write_all(&line).await?;
        out.flush().await
    }
}

#[derive(Default)]
struct Speakers {
    volumes: BTreeMap<String, f64>,
    connected: BTreeMap<String, bool>,
}

impl Speakers {
    fn set_volume(&mut self, target: &str, level: f64) -> Value {
        if !(0.0..=1.0).contains(&level) {
            return json!({"success": false, "error": format!("volume out of range: {level}")});
        }
        self.volumes.insert(target.to_string(), level);
        json!({"success": true, "target": target, "volume": level})
    }

    fn get_volume(&self, target: &str) -> Value {
        let level = self.volumes.get(target).copied().unwrap_or(0.5);
        json!({"success": true, "target": target, "volume": level})
    }

    fn connect(&mut self, target: &str) -> Value {
        self.connected.insert(target.to_string(), true);
        json!({"success": true, "target": target})
    }

    fn disconnect(&mut self, target: &str) -> Value {
        match self.connected.remove(target) {
            Some(_) => json!({"success": true, "target": target}),
            None => json!({"success": false, "error": format!("not connected: {target}")}),
        }
    }

    fn status(&self) -> Value {
        let names: std::collections::BTreeSet<&String> =
            self.volumes.keys().chain(self.connected.keys()).collect();
        let speakers: Vec<Value> = names
            .into_iter()
            .map(|name| {
                json!({
                    "name": name,
                    "connected": self.connected.get(name).copied().unwrap_or(false),
                    "volume": self.volumes.get(name).copied().unwrap_or(0.5),
                })
            })
            .collect();
        json!({"success": true, "speakers": speakers})
    }
}

fn str_field<'a>(request: &'a Value, field: &str) -> Option<&'a str> {
    request.get(field).and_then(Value::as_str)
}

fn missing(field: &str) -> Value {
    json!({"success": false, "error": format!("missing field: {field}")})
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries protocol frames only; all logging goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let options = parse_args();
    let responder = std::sync::Arc::new(Responder {
        out: Mutex::new(tokio::io::stdout()),
        echo_request_id: options.echo_request_id,
        garbage_before_reply: options.garbage_before_reply,
    });
    let mut speakers = Speakers::default();

    tracing::info!(
        echo_request_id = options.echo_request_id,
        "speaker_sim started"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let request: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed request line");
                continue;
            }
        };
        let request_id = request.get("requestId").and_then(Value::as_u64);
        let cmd = str_field(&request, "cmd").unwrap_or("").to_string();
        tracing::debug!(cmd = %cmd, request_id, "Command received");

        let reply = match cmd.as_str() {
            "set_volume" => match (str_field(&request, "target"), request.get("level")) {
                (Some(target), Some(level)) => match level.as_f64() {
                    Some(level) => speakers.set_volume(target, level),
                    None => json!({"success": false, "error": "level must be a number"}),
                },
                (None, _) => missing("target"),
                (_, None) => missing("level"),
            },
            "get_volume" => match str_field(&request, "target") {
                Some(target) => speakers.get_volume(target),
                None => missing("target"),
            },
            "ping" => match str_field(&request, "target") {
                Some(target) => {
                    let latency_ms = options.ping_delay.as_millis().max(1) as f64;
                    let reply = json!({"success": true, "target": target, "latencyMs": latency_ms});
                    if options.ping_delay > Duration::ZERO {
                        let responder = std::sync::Arc::clone(&responder);
                        let delay = options.ping_delay;
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            if let Err(e) = responder.send(request_id, reply).await {
                                tracing::error!(error = %e, "Failed to write delayed ping reply");
                            }
                        });
                        continue;
                    }
                    reply
                }
                None => missing("target"),
            },
            "connect" => match str_field(&request, "target") {
                Some(target) => speakers.connect(target),
                None => missing("target"),
            },
            "disconnect" => match str_field(&request, "target") {
                Some(target) => speakers.disconnect(target),
                None => missing("target"),
            },
            "status" => speakers.status(),
            "quit" => {
                responder.send(request_id, json!({"success": true})).await?;
                tracing::info!("Quit acknowledged, exiting");
                return Ok(());
            }
            other => json!({"success": false, "error": format!("unknown command: {other}")}),
        };

        responder.send(request_id, reply).await?;
    }

    tracing::info!("stdin closed, exiting");
    Ok(())
}
