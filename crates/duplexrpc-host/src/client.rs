use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use duplexrpc_registry::AnyMessage;
use futures_core::stream::Stream;

use crate::error::CallError;
use crate::host::{CallStream, Host};

/// Typed convenience layer over [`Host::call`] and `expect_one`/`expect_many`.
#[derive(Debug, Clone)]
pub struct Client {
    host: Host,
}

impl Client {
    pub fn new(host: Host) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Call `method` and wait for a reply of type `Resp`.
    pub async fn unary<Req, Resp>(&self, method: &str, request: Req) -> Result<Resp, CallError>
    where
        Req: Send + Sync + 'static,
        Resp: 'static,
    {
        let call = self.host.call(method, request)?;
        let reply = self.host.expect_one(call).await?;
        expect_reply(reply)
    }

    pub async fn unary_with_timeout<Req, Resp>(
        &self,
        method: &str,
        request: Req,
        timeout: Duration,
    ) -> Result<Resp, CallError>
    where
        Req: Send + Sync + 'static,
        Resp: 'static,
    {
        let call = self.host.call(method, request)?;
        let reply = self.host.expect_one_with_timeout(call, timeout).await?;
        expect_reply(reply)
    }

    /// Call `method` and wait for it to finish, ignoring any reply value.
    pub async fn invoke<Req>(&self, method: &str, request: Req) -> Result<(), CallError>
    where
        Req: Send + Sync + 'static,
    {
        let call = self.host.call(method, request)?;
        self.host.expect_one(call).await.map(drop)
    }

    /// Call a streaming `method` and receive its items as `Resp`.
    pub fn streaming<Req, Resp>(&self, method: &str, request: Req) -> Result<TypedStream<Resp>, CallError>
    where
        Req: Send + Sync + 'static,
        Resp: 'static,
    {
        let call = self.host.call(method, request)?;
        Ok(TypedStream {
            inner: self.host.expect_many(call),
            _marker: PhantomData,
        })
    }
}

/// A [`CallStream`] whose items are downcast to `T`.
pub struct TypedStream<T> {
    inner: CallStream,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedStream<T> {
    pub fn id(&self) -> u32 {
        self.inner.id()
    }

    pub fn into_inner(self) -> CallStream {
        self.inner
    }
}

impl<T: 'static> Stream for TypedStream<T> {
    type Item = Result<T, CallError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_next(cx)
            .map(|item| item.map(|result| result.and_then(downcast)))
    }
}

impl<T> fmt::Debug for TypedStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedStream")
            .field("inner", &self.inner)
            .field("item", &type_name::<T>())
            .finish()
    }
}

fn expect_reply<T: 'static>(reply: Option<AnyMessage>) -> Result<T, CallError> {
    match reply {
        Some(value) => downcast(value),
        None => Err(CallError::UnexpectedType {
            expected: type_name::<T>(),
            found: "undefined",
        }),
    }
}

fn downcast<T: 'static>(value: AnyMessage) -> Result<T, CallError> {
    value.downcast::<T>().map_err(|value| CallError::UnexpectedType {
        expected: type_name::<T>(),
        found: value.rust_type(),
    })
}
