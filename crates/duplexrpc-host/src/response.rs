use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use duplexrpc_registry::{AnyMessage, Payload};
use futures_core::future::BoxFuture;
use futures_core::stream::{BoxStream, Stream};
use futures_util::{FutureExt, StreamExt};

use crate::error::HandlerError;
use crate::host::Replier;

/// What a method handler hands back.
///
/// ```text
///   Value(v)     ──► callback(v)
///   Future(f)    ──► callback(await f)        | callback(Error)
///   Stream(s)    ──► callback(item)* callback(Close) | callback(Error)
///   Undefined    ──► callback(Undefined)
/// ```
pub enum Response {
    Value(AnyMessage),
    Future(BoxFuture<'static, Result<AnyMessage, HandlerError>>),
    Stream(BoxStream<'static, Result<AnyMessage, HandlerError>>),
    Undefined,
}

impl Response {
    pub fn value<T: Send + Sync + 'static>(value: T) -> Self {
        Self::Value(AnyMessage::new(value))
    }

    /// Reply once `future` resolves.
    pub fn future<T, F>(future: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Future<Output = Result<T, HandlerError>> + Send + 'static,
    {
        Self::Future(Box::pin(async move { future.await.map(AnyMessage::new) }))
    }

    /// Send every item of `stream`, then `Close`. The first error ends the
    /// stream with an `Error` reply instead.
    pub fn stream<T, S>(stream: S) -> Self
    where
        T: Send + Sync + 'static,
        S: Stream<Item = Result<T, HandlerError>> + Send + 'static,
    {
        Self::Stream(Box::pin(stream.map(|item| item.map(AnyMessage::new))))
    }

    /// Stream a fixed set of items.
    pub fn items<T, I>(items: I) -> Self
    where
        T: Send + Sync + 'static,
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::stream(futures_util::stream::iter(items.into_iter().map(Ok)))
    }

    pub fn undefined() -> Self {
        Self::Undefined
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Response::Value(_) => "value",
            Response::Future(_) => "future",
            Response::Stream(_) => "stream",
            Response::Undefined => "undefined",
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Value(value) => f.debug_tuple("Value").field(value).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// Turn a handler's response into callback frames for `replier`'s call.
pub(crate) fn dispatch(response: Response, replier: Replier) {
    match response {
        Response::Value(value) => {
            replier.reply(Payload::Message(value));
        }
        Response::Undefined => {
            replier.reply(Payload::Undefined);
        }
        Response::Future(future) => {
            replier.responders().spawn(async move {
                match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(Ok(value)) => {
                        replier.reply(Payload::Message(value));
                    }
                    Ok(Err(err)) => replier.fail(&err),
                    Err(panic) => replier.panicked(&*panic),
                }
            });
        }
        Response::Stream(mut stream) => {
            replier.responders().spawn(async move {
                let mut sent = 0usize;
                loop {
                    let item = match AssertUnwindSafe(stream.next()).catch_unwind().await {
                        Ok(Some(item)) => item,
                        Ok(None) => break,
                        Err(panic) => {
                            replier.panicked(&*panic);
                            return;
                        }
                    };
                    let delivered = match item {
                        Ok(value) => replier.reply(Payload::Message(value)),
                        Err(err) => {
                            replier.fail(&err);
                            false
                        }
                    };
                    if !delivered {
                        tracing::debug!(parent_id = replier.parent_id(), sent, "stream ended early");
                        return;
                    }
                    sent += 1;
                }
                replier.reply(Payload::Close);
                tracing::trace!(parent_id = replier.parent_id(), sent, "stream closed");
            });
        }
    }
}
