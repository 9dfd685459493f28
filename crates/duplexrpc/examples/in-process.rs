//! Two hosts on an in-memory pipe calling each other.
//!
//! Run with:
//!   cargo run -p duplexrpc --example in-process

use std::sync::Arc;

use duplexrpc::transport::{memory_pair, DEFAULT_PIPE_CAPACITY};
use duplexrpc::{Client, HandlerError, Host, MethodTable, TypeRegistry};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Greeting {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Countdown {
    from: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut registry = TypeRegistry::with_builtins();
    registry.register_json::<Greeting>("example.v1.Greeting")?;
    registry.register_json::<Countdown>("example.v1.Countdown")?;
    registry.register_json::<String>("example.v1.Text")?;
    registry.register_json::<u32>("example.v1.Number")?;
    let registry = Arc::new(registry);

    let mut server_methods = MethodTable::new();
    server_methods.unary("greet", |greeting: Greeting| {
        Ok::<_, HandlerError>(format!("hello, {}", greeting.name))
    })?;
    server_methods.stream("countdown", |countdown: Countdown| {
        futures_util::stream::iter((0..=countdown.from).rev().map(Ok::<_, HandlerError>))
    })?;

    let mut client_methods = MethodTable::new();
    client_methods.unary("whoami", |_: String| Ok::<_, HandlerError>("client".to_string()))?;

    let (near, far) = memory_pair(DEFAULT_PIPE_CAPACITY);
    let server = Host::spawn(far, Arc::clone(&registry), server_methods);
    let client = Client::new(Host::spawn(near, registry, client_methods));

    let reply: String = client
        .unary("greet", Greeting { name: "duplex".into() })
        .await?;
    println!("{reply}");

    let mut ticks = client.streaming::<_, u32>("countdown", Countdown { from: 3 })?;
    while let Some(tick) = ticks.next().await {
        println!("tick {}", tick?);
    }

    // The server side can call back into the client over the same pipe.
    let who: String = Client::new(server.clone())
        .unary("whoami", String::new())
        .await?;
    println!("server is talking to the {who}");

    client.host().close().await;
    server.closed().await;
    Ok(())
}
