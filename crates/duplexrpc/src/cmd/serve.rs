use std::sync::Arc;
use std::time::Duration;

use duplexrpc_host::{Envelope, HandlerError, Host, MethodTable, Response};
use duplexrpc_registry::{AnyMessage, TypeRegistry};
use serde_json::{json, Value};

use crate::cmd::{runtime, ServeArgs};
use crate::exit::{CliError, CliResult, INTERNAL, SUCCESS};

/// Upper bound on `count`, so one call cannot flood the connection.
const MAX_COUNT: u64 = 10_000;

const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let registry = Arc::new(TypeRegistry::with_builtins());
    let methods = demo_methods()
        .map_err(|err| CliError::new(INTERNAL, format!("demo service setup failed: {err}")))?;
    let runtime = runtime()?;
    let result = runtime.block_on(async move {
        match args.socket {
            Some(path) => serve_socket(path, args.once, registry, methods).await,
            None => serve_stdio(registry, methods).await,
        }
    });
    // A stdin read parked on the blocking pool must not hold up exit.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn serve_stdio(registry: Arc<TypeRegistry>, methods: MethodTable) -> CliResult<i32> {
    let host = Host::builder(registry)
        .methods(methods)
        .spawn(duplexrpc_transport::stdio());
    tracing::info!("serving on stdio");

    tokio::select! {
        _ = host.closed() => tracing::info!(stats = ?host.stats(), "stdin closed"),
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
    }
    host.close().await;
    Ok(SUCCESS)
}

#[cfg(unix)]
async fn serve_socket(
    path: std::path::PathBuf,
    once: bool,
    registry: Arc<TypeRegistry>,
    methods: MethodTable,
) -> CliResult<i32> {
    use duplexrpc_transport::UnixDomainSocket;

    use crate::exit::transport_error;

    let listener = UnixDomainSocket::bind(&path).map_err(|err| transport_error("bind failed", err))?;
    tracing::info!(path = %listener.path().display(), "listening");

    let mut next_peer = 1u64;
    loop {
        let transport = tokio::select! {
            accepted = listener.accept() => accepted.map_err(|err| transport_error("accept failed", err))?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                return Ok(SUCCESS);
            }
        };

        let peer = next_peer;
        next_peer += 1;
        let host = Host::builder(Arc::clone(&registry))
            .methods(methods.clone())
            .spawn(transport);
        tracing::info!(peer, "peer connected");

        let session = tokio::spawn(async move {
            host.closed().await;
            host.close().await;
            tracing::info!(peer, stats = ?host.stats(), "peer disconnected");
        });
        if once {
            let _ = session.await;
            return Ok(SUCCESS);
        }
    }
}

#[cfg(not(unix))]
async fn serve_socket(
    path: std::path::PathBuf,
    _once: bool,
    _registry: Arc<TypeRegistry>,
    _methods: MethodTable,
) -> CliResult<i32> {
    Err(CliError::new(
        crate::exit::USAGE,
        format!(
            "--socket {} requires Unix domain sockets; use stdio on this platform",
            path.display()
        ),
    ))
}

/// Methods served by `duplexrpc serve`. All arguments and replies are
/// free-form JSON.
pub(crate) fn demo_methods() -> duplexrpc_host::Result<MethodTable> {
    let mut methods = MethodTable::new();
    methods.unary("echo", |value: Value| Ok::<_, HandlerError>(value))?;
    methods.stream("count", |value: Value| {
        let upto = number_arg(&value, "upto").unwrap_or(0).min(MAX_COUNT);
        futures_util::stream::iter((1..=upto).map(|n| Ok::<_, HandlerError>(Value::from(n))))
    })?;
    methods.unary("fail", |value: Value| {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("requested failure");
        Err::<Value, _>(HandlerError::new(message))
    })?;
    methods.future("sleep", |value: Value| async move {
        let ms = number_arg(&value, "ms").unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok::<_, HandlerError>(json!({ "slept_ms": ms }))
    })?;

    let mut names: Vec<String> = methods.names().into_iter().map(str::to_string).collect();
    names.push("methods".to_string());
    names.sort();
    methods.register("methods", move |_: AnyMessage, _: &Envelope| {
        Ok(Response::value(Value::from(names.clone())))
    })?;
    Ok(methods)
}

/// Accepts either a bare number or `{"<field>": number}`.
fn number_arg(value: &Value, field: &str) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.get(field).and_then(Value::as_u64))
}
