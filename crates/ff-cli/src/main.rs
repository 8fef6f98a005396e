// SPDX-License-Identifier: MIT OR Apache-2.0
//! `ff`, the thin client for the Function Fabric gateway.
//!
//! The gateway owns all semantics; this binary shapes requests and prints
//! responses. Exit codes: 0 success, 1 validation/configuration failure,
//! 2 transport failure.

#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "ff", version, about = "Function Fabric client")]
struct Cli {
    /// Gateway base URL.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    endpoint: String,

    /// API key sent as X-API-Key.
    #[arg(long)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy a function from a JSON manifest (optionally with a code file).
    Deploy {
        /// Path to the metadata manifest.
        manifest: PathBuf,
        /// Path to the source file embedded as `code`.
        #[arg(long)]
        code: Option<PathBuf>,
    },
    /// Invoke a function.
    Invoke {
        /// Function id.
        id: String,
        /// JSON input (defaults to `{}`).
        #[arg(long)]
        input: Option<String>,
    },
    /// Show a function's metadata.
    Info {
        /// Function id.
        id: String,
    },
    /// List deployed functions.
    List,
    /// Delete a function.
    Delete {
        /// Function id.
        id: String,
    },
    /// Roll a function back to a pinned version.
    Rollback {
        /// Function id.
        id: String,
        /// Target version.
        version: String,
    },
}

enum Failure {
    /// Bad local input or a 4xx from the gateway.
    Usage,
    /// Could not reach the gateway, or it answered 5xx.
    Transport,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err((failure, error)) => {
            eprintln!("error: {error:#}");
            match failure {
                Failure::Usage => ExitCode::from(1),
                Failure::Transport => ExitCode::from(2),
            }
        }
    }
}

async fn run(cli: Cli) -> std::result::Result<(), (Failure, anyhow::Error)> {
    let client = reqwest::Client::new();
    let usage = |e: anyhow::Error| (Failure::Usage, e);

    let (method, path, body): (reqwest::Method, String, Option<Value>) = match &cli.command {
        Command::Deploy { manifest, code } => {
            let mut payload = read_manifest(manifest).map_err(usage)?;
            if let Some(code_path) = code {
                let source = std::fs::read_to_string(code_path)
                    .with_context(|| format!("read code file {}", code_path.display()))
                    .map_err(usage)?;
                payload["code"] = Value::String(source);
            }
            (reqwest::Method::POST, "/v1/api/functions".into(), Some(payload))
        }
        Command::Invoke { id, input } => {
            let input = match input {
                Some(raw) => serde_json::from_str(raw)
                    .context("--input is not valid JSON")
                    .map_err(usage)?,
                None => Value::Object(serde_json::Map::new()),
            };
            (
                reqwest::Method::POST,
                format!("/v1/functions/{id}"),
                Some(input),
            )
        }
        Command::Info { id } => (
            reqwest::Method::GET,
            format!("/v1/api/functions/{id}"),
            None,
        ),
        Command::List => (reqwest::Method::GET, "/v1/api/functions".into(), None),
        Command::Delete { id } => (
            reqwest::Method::DELETE,
            format!("/v1/api/functions/{id}"),
            None,
        ),
        Command::Rollback { id, version } => (
            reqwest::Method::POST,
            format!("/v1/api/functions/{id}/rollback"),
            Some(serde_json::json!({ "version": version })),
        ),
    };

    let url = format!("{}{}", cli.endpoint.trim_end_matches('/'), path);
    let mut request = client.request(method, &url);
    if let Some(key) = &cli.api_key {
        request = request.header("X-API-Key", key);
    }
    if let Some(body) = &body {
        request = request.json(body);
    }

    let response = request
        .send()
        .await
        .with_context(|| format!("request {url}"))
        .map_err(|e| (Failure::Transport, e))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .context("read response body")
        .map_err(|e| (Failure::Transport, e))?;
    let pretty = serde_json::from_str::<Value>(&text)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or(text);

    if status.is_success() {
        println!("{pretty}");
        Ok(())
    } else if status.is_client_error() {
        Err((
            Failure::Usage,
            anyhow::anyhow!("gateway rejected the request ({status}):\n{pretty}"),
        ))
    } else {
        Err((
            Failure::Transport,
            anyhow::anyhow!("gateway failed ({status}):\n{pretty}"),
        ))
    }
}

fn read_manifest(path: &PathBuf) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read manifest {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&raw).with_context(|| format!("parse manifest {}", path.display()))?;
    anyhow::ensure!(value.is_object(), "manifest must be a JSON object");
    Ok(value)
}
