use std::sync::Arc;
use std::time::Duration;

use duplexrpc_host::{AnyMessage, CallError, Host, HostConfig};
use duplexrpc_registry::TypeRegistry;
use futures_util::StreamExt;
use serde_json::Value;

use crate::cmd::{parse_duration, runtime, CallArgs};
use crate::exit::{call_error, host_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{OutputFormat, ReplyPrinter};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let argument = parse_argument(args.json.as_deref())?;
    runtime()?.block_on(call(args, argument, timeout, format))
}

async fn call(args: CallArgs, argument: Value, timeout: Duration, format: OutputFormat) -> CliResult<i32> {
    let transport = connect(&args.socket).await?;
    let host = Host::builder(Arc::new(TypeRegistry::with_builtins()))
        .config(HostConfig {
            call_timeout: timeout,
            ..HostConfig::default()
        })
        .spawn(transport);

    let pending = host
        .call(&args.method, argument)
        .map_err(|err| host_error("call failed", err))?;
    tracing::debug!(id = pending.id(), method = %args.method, "call sent");

    let mut printer = ReplyPrinter::new(&args.method, pending.id(), format);
    let outcome = if args.stream {
        let mut stream = host.expect_many(pending);
        loop {
            let next = match tokio::time::timeout(timeout, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    break Err(CliError::new(
                        TIMEOUT,
                        format!("stream stalled: no item within {timeout:?}"),
                    ))
                }
            };
            match next {
                Some(Ok(item)) => match into_json(item) {
                    Ok(value) => printer.print(&value),
                    Err(err) => break Err(err),
                },
                Some(Err(err)) => break Err(call_error("stream failed", err)),
                None => break Ok(()),
            }
        }
    } else {
        match host.expect_one(pending).await {
            Ok(reply) => reply
                .map_or(Ok(Value::Null), into_json)
                .map(|value| printer.print(&value)),
            Err(err) => Err(call_error("call failed", err)),
        }
    };

    printer.finish();
    tracing::debug!(replies = printer.count(), stats = ?host.stats(), "call finished");
    host.close().await;
    outcome.map(|()| SUCCESS)
}

#[cfg(unix)]
async fn connect(path: &std::path::Path) -> CliResult<duplexrpc_transport::Transport> {
    duplexrpc_transport::UnixDomainSocket::connect(path)
        .await
        .map_err(|err| crate::exit::transport_error("connect failed", err))
}

#[cfg(not(unix))]
async fn connect(path: &std::path::Path) -> CliResult<duplexrpc_transport::Transport> {
    Err(CliError::new(
        USAGE,
        format!("cannot connect to {}: Unix domain sockets are unavailable", path.display()),
    ))
}

fn parse_argument(json: Option<&str>) -> CliResult<Value> {
    match json {
        Some(text) => serde_json::from_str(text)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}"))),
        None => Ok(Value::Null),
    }
}

fn into_json(reply: AnyMessage) -> CliResult<Value> {
    reply.downcast::<Value>().map_err(|reply| {
        call_error(
            "unexpected reply",
            CallError::UnexpectedType {
                expected: "serde_json::Value",
                found: reply.rust_type(),
            },
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::DATA_INVALID;

    #[test]
    fn argument_defaults_to_null_and_rejects_bad_json() {
        assert_eq!(parse_argument(None).unwrap(), Value::Null);
        assert_eq!(
            parse_argument(Some(r#"{"a":1}"#)).unwrap(),
            serde_json::json!({ "a": 1 })
        );
        assert_eq!(parse_argument(Some("{oops")).unwrap_err().code, USAGE);
    }

    #[test]
    fn non_json_reply_is_invalid_data() {
        let err = into_json(AnyMessage::new(7u32)).unwrap_err();
        assert_eq!(err.code, DATA_INVALID);
        assert_eq!(
            into_json(AnyMessage::new(Value::from("ok"))).unwrap(),
            Value::from("ok")
        );
    }
}
