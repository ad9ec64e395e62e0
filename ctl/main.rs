#![forbid(unsafe_code)]

//! `agent-dispatch-ctl`: command-line client for `agent-dispatch`.
//!
//! Talks to the server's HTTP API: submit and poll jobs, cancel them,
//! stream a prompt live, and inspect or clear conversation history.

use std::io::Write;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};

type CtlResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Delay between status polls with `submit --wait`.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(
    name = "agent-dispatch-ctl",
    about = "CLI client for the agent-dispatch server",
    version,
    long_about = None
)]
struct Cli {
    /// Base URL of the server.
    #[arg(long, env = "AGENT_DISPATCH_URL", default_value = "http://127.0.0.1:3000")]
    url: String,

    /// API key sent in the `x-api-key` header.
    #[arg(long, env = "AGENT_DISPATCH_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit a prompt as a background job.
    Submit {
        /// Prompt text.
        prompt: String,
        /// Working directory for the agent.
        #[arg(long)]
        cwd: Option<String>,
        /// Timeout override in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Conversation session id.
        #[arg(long)]
        session: Option<String>,
        /// Environment override, repeatable.
        #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,
        /// Poll until the job finishes and print the final record.
        #[arg(long)]
        wait: bool,
    },

    /// Show the current record of a job.
    Status {
        /// Request id.
        id: String,
    },

    /// Cancel a queued or running job.
    Cancel {
        /// Request id.
        id: String,
    },

    /// Show queue counters.
    Stats,

    /// Check server health.
    Health,

    /// Run a prompt and print its output as it arrives.
    Stream {
        /// Prompt text.
        prompt: String,
        /// Working directory for the agent.
        #[arg(long)]
        cwd: Option<String>,
        /// Conversation session id.
        #[arg(long)]
        session: Option<String>,
    },

    /// Print the stored history of a session.
    History {
        /// Session id.
        session: String,
    },

    /// Clear the stored history of a session.
    ClearHistory {
        /// Session id.
        session: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Cli::parse();
    let ctl = Ctl::new(args.url.trim_end_matches('/'), args.api_key.clone());

    if let Err(err) = dispatch(&ctl, args.command).await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn dispatch(ctl: &Ctl, command: Command) -> CtlResult<()> {
    match command {
        Command::Submit {
            prompt,
            cwd,
            timeout_ms,
            session,
            env,
            wait,
        } => {
            let mut context = json!({});
            if let Some(cwd) = cwd {
                context["workingDirectory"] = Value::String(cwd);
            }
            if let Some(timeout_ms) = timeout_ms {
                context["timeoutMs"] = json!(timeout_ms);
            }
            if !env.is_empty() {
                context["environment"] = env
                    .into_iter()
                    .map(|(key, value)| (key, Value::String(value)))
                    .collect::<serde_json::Map<_, _>>()
                    .into();
            }
            let mut body = json!({ "prompt": prompt, "context": context });
            if let Some(session) = session {
                body["sessionId"] = Value::String(session);
            }

            let accepted = ctl.send(Method::POST, "/api/agent/requests", Some(&body)).await?;
            let data = accepted.get("data").cloned().unwrap_or(Value::Null);
            if !wait {
                print_json(&data);
                return Ok(());
            }

            let id = data
                .get("requestId")
                .and_then(Value::as_str)
                .ok_or("server response carried no requestId")?
                .to_owned();
            eprintln!("submitted {id}; waiting");
            loop {
                let current = ctl.send(Method::GET, &format!("/api/agent/requests/{id}"), None).await?;
                let data = current.get("data").cloned().unwrap_or(Value::Null);
                let status = data.get("status").and_then(Value::as_str).unwrap_or_default();
                if matches!(status, "completed" | "failed") {
                    print_json(&data);
                    if status == "failed" {
                        std::process::exit(2);
                    }
                    return Ok(());
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
        Command::Status { id } => {
            let value = ctl.send(Method::GET, &format!("/api/agent/requests/{id}"), None).await?;
            print_data(&value);
        }
        Command::Cancel { id } => {
            let value = ctl
                .send(Method::DELETE, &format!("/api/agent/requests/{id}"), None)
                .await?;
            print_data(&value);
        }
        Command::Stats => {
            let value = ctl.send(Method::GET, "/api/agent/stats", None).await?;
            print_data(&value);
        }
        Command::Health => {
            let value = ctl.send(Method::GET, "/api/agent/health", None).await?;
            print_json(&value);
        }
        Command::Stream {
            prompt,
            cwd,
            session,
        } => {
            let mut body = json!({ "prompt": prompt });
            if let Some(cwd) = cwd {
                body["context"] = json!({ "workingDirectory": cwd });
            }
            if let Some(session) = session {
                body["sessionId"] = Value::String(session);
            }
            ctl.stream(&body).await?;
        }
        Command::History { session } => {
            let value = ctl
                .send(Method::GET, &format!("/api/agent/sessions/{session}/history"), None)
                .await?;
            print_data(&value);
        }
        Command::ClearHistory { session } => {
            let value = ctl
                .send(Method::DELETE, &format!("/api/agent/sessions/{session}/history"), None)
                .await?;
            print_data(&value);
        }
    }
    Ok(())
}

/// Thin HTTP wrapper carrying the base URL and API key.
struct Ctl {
    client: Client,
    base: String,
    api_key: Option<String>,
}

impl Ctl {
    fn new(base: &str, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base: base.to_owned(),
            api_key,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}{path}", self.base));
        match &self.api_key {
            Some(key) => builder.header("x-api-key", key),
            None => builder,
        }
    }

    /// Send a JSON request and return the decoded body, turning the error
    /// envelope into an `Err`.
    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> CtlResult<Value> {
        let mut builder = self.request(method, path);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        let status = response.status();
        let value: Value = response.json().await.unwrap_or(Value::Null);

        if status.is_success() || status == StatusCode::SERVICE_UNAVAILABLE {
            return Ok(value);
        }

        let message = value
            .pointer("/error/message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        let code = value
            .pointer("/error/code")
            .and_then(Value::as_str)
            .unwrap_or("HTTP_ERROR");
        Err(format!("{code} ({status}): {message}").into())
    }

    /// Post to the SSE endpoint and print chunk text as it arrives.
    async fn stream(&self, body: &Value) -> CtlResult<()> {
        let response = self
            .request(Method::POST, "/api/agent/stream")
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let value: Value = response.json().await.unwrap_or(Value::Null);
            let message = value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(format!("{status}: {message}").into());
        }

        let mut bytes = response.bytes_stream();
        let mut pending = String::new();
        let mut failure = None;
        let mut stdout = std::io::stdout();

        while let Some(next) = bytes.next().await {
            pending.push_str(&String::from_utf8_lossy(&next?));
            while let Some(end) = pending.find("\n\n") {
                let frame: String = pending.drain(..end + 2).collect();
                for line in frame.lines() {
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim_start();
                    if data == "[DONE]" {
                        return failure.map_or(Ok(()), |msg: String| Err(msg.into()));
                    }
                    let Ok(event) = serde_json::from_str::<Value>(data) else {
                        continue;
                    };
                    match event.get("type").and_then(Value::as_str) {
                        Some("chunk") => {
                            let content = event.get("content").and_then(Value::as_str);
                            print!("{}", content.unwrap_or_default());
                            stdout.flush()?;
                        }
                        Some("error") => {
                            let error = event.get("error").and_then(Value::as_str);
                            failure = Some(error.unwrap_or("stream failed").to_owned());
                        }
                        _ => {}
                    }
                }
            }
        }

        failure.map_or(Ok(()), |msg| Err(msg.into()))
    }
}

fn print_data(value: &Value) {
    print_json(value.get("data").unwrap_or(value));
}

fn print_json(value: &Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))
}
