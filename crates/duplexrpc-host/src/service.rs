use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use duplexrpc_registry::AnyMessage;
use futures_core::stream::Stream;

use crate::envelope::{Envelope, CALLBACK_METHOD};
use crate::error::{HandlerError, HostError, Result};
use crate::response::Response;

/// A locally registered RPC method.
///
/// Invoked on the host's read task with the decoded argument and the
/// envelope that carried it. Long-running work belongs in a
/// [`Response::Future`] or [`Response::Stream`], not in `call` itself.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, arg: AnyMessage, envelope: &Envelope) -> std::result::Result<Response, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(AnyMessage, &Envelope) -> std::result::Result<Response, HandlerError> + Send + Sync + 'static,
{
    fn call(&self, arg: AnyMessage, envelope: &Envelope) -> std::result::Result<Response, HandlerError> {
        self(arg, envelope)
    }
}

/// Method name to handler map served by a host.
#[derive(Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, Arc<dyn Handler>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an untyped handler closure. Re-registering a name replaces
    /// the previous handler.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F) -> Result<&mut Self>
    where
        F: Fn(AnyMessage, &Envelope) -> std::result::Result<Response, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.register_handler(name, handler)
    }

    pub fn register_handler<H: Handler>(
        &mut self,
        name: impl Into<String>,
        handler: H,
    ) -> Result<&mut Self> {
        let name = name.into();
        if name.is_empty() || name == CALLBACK_METHOD {
            return Err(HostError::ReservedMethod(name));
        }
        if self.methods.insert(name.clone(), Arc::new(handler)).is_some() {
            tracing::debug!(method = %name, "replaced method handler");
        }
        Ok(self)
    }

    /// Register a handler that maps one typed request to one typed reply.
    pub fn unary<Req, Resp, F>(&mut self, name: impl Into<String>, handler: F) -> Result<&mut Self>
    where
        Req: 'static,
        Resp: Send + Sync + 'static,
        F: Fn(Req) -> std::result::Result<Resp, HandlerError> + Send + Sync + 'static,
    {
        self.register(name, move |arg: AnyMessage, _: &Envelope| {
            handler(take_arg(arg)?).map(Response::value)
        })
    }

    /// Register an async handler.
    pub fn future<Req, Resp, F, Fut>(&mut self, name: impl Into<String>, handler: F) -> Result<&mut Self>
    where
        Req: 'static,
        Resp: Send + Sync + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Resp, HandlerError>> + Send + 'static,
    {
        self.register(name, move |arg: AnyMessage, _: &Envelope| {
            Ok(Response::future(handler(take_arg(arg)?)))
        })
    }

    /// Register a handler that replies with a stream of items.
    pub fn stream<Req, Item, F, S>(&mut self, name: impl Into<String>, handler: F) -> Result<&mut Self>
    where
        Req: 'static,
        Item: Send + Sync + 'static,
        F: Fn(Req) -> S + Send + Sync + 'static,
        S: Stream<Item = std::result::Result<Item, HandlerError>> + Send + 'static,
    {
        self.register(name, move |arg: AnyMessage, _: &Envelope| {
            Ok(Response::stream(handler(take_arg(arg)?)))
        })
    }

    /// Add every method of `service` under `prefix/`, e.g. `chat/send`.
    pub fn mount(&mut self, prefix: &str, service: MethodTable) -> Result<&mut Self> {
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return Err(HostError::ReservedMethod(prefix.to_string()));
        }
        for (name, handler) in service.methods {
            self.methods.insert(format!("{prefix}/{name}"), handler);
        }
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Handler>> {
        self.methods.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Registered method names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.names())
            .finish()
    }
}

fn take_arg<Req: 'static>(arg: AnyMessage) -> std::result::Result<Req, HandlerError> {
    arg.downcast::<Req>().map_err(|arg| {
        HandlerError::new(format!(
            "invalid argument: expected {}, got {}",
            std::any::type_name::<Req>(),
            arg.rust_type()
        ))
    })
}

#[cfg(test)]
mod tests {
    use duplexrpc_registry::TypedPayload;

    use super::*;

    fn envelope(method: &str) -> Envelope {
        Envelope::call(1, method, TypedPayload::new("demo.v1.Echo", Vec::new()))
    }

    #[test]
    fn callback_and_empty_names_are_reserved() {
        let mut table = MethodTable::new();
        let err = table
            .register("callback", |_: AnyMessage, _: &Envelope| Ok(Response::undefined()))
            .unwrap_err();
        assert!(matches!(err, HostError::ReservedMethod(name) if name == "callback"));
        assert!(table.register("", |_: AnyMessage, _: &Envelope| Ok(Response::undefined())).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn unary_helper_downcasts_argument() {
        let mut table = MethodTable::new();
        table
            .unary("double", |n: u32| Ok::<_, HandlerError>(n * 2))
            .unwrap();

        let handler = table.get("double").unwrap();
        let response = handler.call(AnyMessage::new(21u32), &envelope("double")).unwrap();
        match response {
            Response::Value(value) => assert_eq!(value.downcast::<u32>().unwrap(), 42),
            other => panic!("unexpected response {other:?}"),
        }

        let err = handler
            .call(AnyMessage::new("text".to_string()), &envelope("double"))
            .unwrap_err();
        assert!(err.message().contains("invalid argument"));
    }

    #[test]
    fn mount_prefixes_method_names() {
        let mut chat = MethodTable::new();
        chat.unary("send", |text: String| Ok::<_, HandlerError>(text))
            .unwrap()
            .register("leave", |_: AnyMessage, _: &Envelope| Ok(Response::undefined()))
            .unwrap();

        let mut table = MethodTable::new();
        table.mount("chat", chat).unwrap();
        assert_eq!(table.names(), ["chat/leave", "chat/send"]);
        assert!(!table.contains("send"));
    }

    #[test]
    fn reregistering_replaces_handler() {
        let mut table = MethodTable::new();
        table.unary("v", |_: u8| Ok::<_, HandlerError>(1u8)).unwrap();
        table.unary("v", |_: u8| Ok::<_, HandlerError>(2u8)).unwrap();
        assert_eq!(table.len(), 1);

        let response = table.get("v").unwrap().call(AnyMessage::new(0u8), &envelope("v")).unwrap();
        let Response::Value(value) = response else {
            panic!("expected a value");
        };
        assert_eq!(value.downcast::<u8>().unwrap(), 2);
    }
}
