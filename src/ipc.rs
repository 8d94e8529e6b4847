//! The desktop IPC loop.
//!
//! On desktop the engine runs as a child process of the front-end and is driven over
//! stdin/stdout with newline-delimited JSON: one request `{id, method, args}` per line, one
//! response `{id, success, error?, data?}` per request. The methods map one to one onto the
//! control surface. EOF on stdin means the front-end is gone; the tunnel is stopped and the
//! process exits cleanly.

use crate::config::{ProxyType, TunnelConfig};
use crate::engine::Engine;
use crate::link;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize)]
struct Response {
    id: Value,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl Response {
    fn failure(id: Value, error: String) -> Self {
        Self {
            id,
            success: false,
            error: Some(error),
            data: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartArgs {
    local_port: String,
    server: String,
    password: String,
    proxy_type: String,
}

#[derive(Debug, Deserialize)]
struct ServerArgs {
    server: String,
}

#[derive(Debug, Deserialize)]
struct LinkArgs {
    link: String,
}

#[derive(Debug, Deserialize)]
struct RulesArgs {
    paths: String,
}

/// Serves requests from stdin until it closes, then stops the engine.
///
/// # Errors
///
/// Will return an error only for failures on the stdio pipes themselves; request-level problems
/// are answered with failure responses.
pub async fn serve(engine: std::sync::Arc<Engine>) -> Result<(), std::io::Error> {
    let mut requests = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = requests.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(&engine, &line).await;
        let mut encoded = serde_json::to_vec(&response).map_err(std::io::Error::other)?;
        encoded.push(b'\n');
        stdout.write_all(&encoded).await?;
        stdout.flush().await?;
    }

    debug!("stdin closed, shutting down");
    engine.stop().await;
    Ok(())
}

async fn handle_line(engine: &Engine, line: &str) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            return Response::failure(Value::Null, format!("invalid request: {err}"));
        }
    };

    let id = request.id.clone();
    match dispatch(engine, request).await {
        Ok(data) => Response {
            id,
            success: true,
            error: None,
            data,
        },
        Err(error) => Response::failure(id, error),
    }
}

async fn dispatch(engine: &Engine, request: Request) -> Result<Option<Value>, String> {
    match request.method.as_str() {
        "start" => {
            let args: StartArgs = parse_args(request.args)?;
            let local_port = args
                .local_port
                .parse::<u16>()
                .map_err(|_| format!("invalid local port: {}", args.local_port))?;
            let proxy_type = args
                .proxy_type
                .parse::<ProxyType>()
                .map_err(|err| err.to_string())?;

            engine
                .start(TunnelConfig {
                    local_port,
                    server: args.server,
                    password: args.password,
                    proxy_type,
                })
                .await
                .map_err(|err| err.to_string())?;
            Ok(None)
        }
        "stop" => {
            engine.stop().await;
            Ok(None)
        }
        "isActive" => Ok(Some(json!(engine.is_active().await))),
        "ping" => {
            let args: ServerArgs = parse_args(request.args)?;
            Ok(Some(json!(engine.ping(&args.server).await)))
        }
        "parseLink" => {
            let args: LinkArgs = parse_args(request.args)?;
            let profile = link::parse_link(&args.link).map_err(|err| err.to_string())?;
            serde_json::to_value(profile)
                .map(Some)
                .map_err(|err| err.to_string())
        }
        "updateSplitRules" => {
            let args: RulesArgs = parse_args(request.args)?;
            let paths: Vec<PathBuf> = args
                .paths
                .split(',')
                .map(str::trim)
                .filter(|path| !path.is_empty())
                .map(PathBuf::from)
                .collect();
            engine.update_split_rules(&paths).await;
            Ok(None)
        }
        other => Err(format!("unknown method: {other}")),
    }
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|err| format!("invalid arguments: {err}"))
}
