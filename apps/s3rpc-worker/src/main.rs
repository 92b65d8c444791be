//! s3rpc worker - serve or call s3rpc operations.
//!
//! # Usage
//!
//! ```text
//! s3rpc-worker serve
//! s3rpc-worker call <operation> <file> [dest]
//! ```
//!
//! `serve` answers the built-in operations until Ctrl-C:
//!
//! | Operation | Response |
//! |-----------|----------|
//! | `echo` | the request payload, with `handled-at` metadata |
//! | `sha256` | the hex SHA-256 digest of the payload, also as `sha256` metadata |
//!
//! `call` runs one operation and copies the response to `dest`
//! (default `<file>.<operation>`).
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `S3RPC_BUCKET` | *(required)* | Bucket holding payloads |
//! | `S3RPC_REGION` | `eu-north-1` | AWS region |
//! | `S3RPC_ENDPOINT_URL` | *(unset)* | AWS-compatible endpoint, e.g. LocalStack |
//! | `S3RPC_SERVER_QUEUE` | *(required for serve)* | Request queue URL |
//! | `S3RPC_SERVER_ACCESS_KEY_ID` / `S3RPC_SERVER_SECRET_ACCESS_KEY` | *(required for serve)* | Server credentials |
//! | `S3RPC_CLIENT_QUEUE` | *(required for call)* | Response queue URL |
//! | `S3RPC_CLIENT_ACCESS_KEY_ID` / `S3RPC_CLIENT_SECRET_ACCESS_KEY` | *(required for call)* | Client credentials |
//! | `S3RPC_TIMEOUT_SECS` | `300` | Call timeout |
//! | `S3RPC_POLL_INTERVAL_SECS` | `10` | Pause between server polls |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use s3rpc::{
    Client, ClientOptions, ConnectionConfig, HandlerContext, Handlers, Input, Output, Role,
    Server, ServerOptions,
};
use sha2::{Digest, Sha256};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Serve,
    Call {
        operation: String,
        file: PathBuf,
        dest: PathBuf,
    },
}

const USAGE: &str = "usage: s3rpc-worker serve | s3rpc-worker call <operation> <file> [dest]";

fn parse_args(args: &[String]) -> Result<Command> {
    match args {
        [cmd] if cmd == "serve" => Ok(Command::Serve),
        [cmd, operation, file, rest @ ..] if cmd == "call" && rest.len() <= 1 => {
            let file = PathBuf::from(file);
            let dest = rest.first().map_or_else(
                || {
                    let mut name = file.clone().into_os_string();
                    name.push(format!(".{operation}"));
                    PathBuf::from(name)
                },
                PathBuf::from,
            );
            Ok(Command::Call {
                operation: operation.clone(),
                file,
                dest,
            })
        }
        _ => bail!(USAGE),
    }
}

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to `LOG_LEVEL`.
fn init_tracing() -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
        EnvFilter::try_new(&log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

fn env_secs(name: &str, default: u64) -> Result<Duration> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => v
            .parse::<u64>()
            .map(Duration::from_secs)
            .with_context(|| format!("invalid {name}: {v:?}")),
        _ => Ok(Duration::from_secs(default)),
    }
}

async fn echo(_ctx: HandlerContext, input: Input) -> anyhow::Result<Output> {
    let mut output = Output::new(input.filename);
    output.metadata = input.metadata;
    output
        .metadata
        .insert("handled-at".to_owned(), chrono::Utc::now().to_rfc3339());
    Ok(output)
}

async fn sha256(ctx: HandlerContext, input: Input) -> anyhow::Result<Output> {
    let data = tokio::fs::read(&input.filename)
        .await
        .with_context(|| format!("read {}", input.filename.display()))?;
    let digest = hex::encode(Sha256::digest(&data));

    let name = input
        .filename
        .file_name()
        .map_or_else(|| "payload".into(), |n| n.to_string_lossy());
    let path = ctx.scratch_dir().join(format!("{name}.sha256"));
    tokio::fs::write(&path, format!("{digest}\n"))
        .await
        .with_context(|| format!("write {}", path.display()))?;

    Ok(Output::new(path).with_metadata("sha256", digest))
}

fn builtin_handlers() -> Result<Handlers> {
    let mut handlers = Handlers::new();
    handlers.register("echo", echo)?.register("sha256", sha256)?;
    Ok(handlers)
}

async fn serve() -> Result<()> {
    let server = Server::new(
        ServerOptions::builder()
            .handlers(builtin_handlers()?)
            .queue(Role::Server.queue_from_env())
            .poll_interval(env_secs("S3RPC_POLL_INTERVAL_SECS", 10)?)
            .connection(ConnectionConfig::from_env(Role::Server))
            .build(),
    )
    .context("failed to create server")?;

    info!("serving echo and sha256, press Ctrl-C to stop");
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
    };
    let served = server.listen_and_serve_with_shutdown(shutdown).await;
    let closed = server.close().await;

    served.context("server loop failed")?;
    closed.context("failed to close server")?;
    Ok(())
}

async fn call(operation: &str, file: &Path, dest: &Path) -> Result<()> {
    let client = Client::new(
        ClientOptions::builder()
            .queue(Role::Client.queue_from_env())
            .timeout(env_secs("S3RPC_TIMEOUT_SECS", 300)?)
            .connection(ConnectionConfig::from_env(Role::Client))
            .build(),
    )
    .context("failed to create client")?;

    let result = async {
        let output = client
            .execute(operation, file)
            .await
            .with_context(|| format!("call {operation} with {}", file.display()))?;
        tokio::fs::copy(&output.filename, dest)
            .await
            .with_context(|| format!("copy response to {}", dest.display()))?;
        anyhow::Ok(output)
    }
    .await;
    client.close().context("failed to close client")?;
    let output = result?;

    println!("{}", dest.display());
    let mut metadata: Vec<_> = output.metadata.iter().collect();
    metadata.sort();
    for (key, value) in metadata {
        println!("{key}: {value}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;
    init_tracing()?;

    match command {
        Command::Serve => serve().await,
        Command::Call {
            operation,
            file,
            dest,
        } => call(&operation, &file, &dest).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_should_parse_serve() {
        assert_eq!(parse_args(&args(&["serve"])).ok(), Some(Command::Serve));
    }

    #[test]
    fn test_should_parse_call_with_default_dest() {
        let command = parse_args(&args(&["call", "sha256", "data/a.bin"])).ok();
        assert_eq!(
            command,
            Some(Command::Call {
                operation: "sha256".to_owned(),
                file: PathBuf::from("data/a.bin"),
                dest: PathBuf::from("data/a.bin.sha256"),
            })
        );
    }

    #[test]
    fn test_should_parse_call_with_dest() {
        let command = parse_args(&args(&["call", "echo", "a.txt", "/tmp/b.txt"])).ok();
        assert!(matches!(
            command,
            Some(Command::Call { dest, .. }) if dest == Path::new("/tmp/b.txt")
        ));
    }

    #[test]
    fn test_should_reject_unknown_usage() {
        let cases: [&[&str]; 4] = [
            &[],
            &["call", "echo"],
            &["serve", "now"],
            &["call", "a", "b", "c", "d"],
        ];
        for bad in cases {
            let err = parse_args(&args(bad)).expect_err("usage error");
            assert_eq!(err.to_string(), USAGE);
        }
    }

    #[test]
    fn test_should_register_builtin_operations() {
        let handlers = builtin_handlers().expect("handlers");
        assert_eq!(handlers.operations(), ["echo", "sha256"]);
    }

    #[tokio::test]
    async fn test_should_hash_payload_into_scratch_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let payload = dir.path().join("abc.txt");
        std::fs::write(&payload, "abc").expect("write");

        let (_tx, rx) = tokio::sync::watch::channel(false);
        let ctx = HandlerContext::new("sha256", "to_server/sha256/id_abc.txt", dir.path(), rx);
        let output = sha256(ctx, Input::new(&payload)).await.expect("handle");

        let expected = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        assert_eq!(output.metadata.get("sha256").map(String::as_str), Some(expected));
        let written = std::fs::read_to_string(&output.filename).expect("read");
        assert_eq!(written.trim(), expected);
        assert!(output.filename.starts_with(dir.path()));
    }
}
