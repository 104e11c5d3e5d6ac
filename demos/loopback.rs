//! Two channels wired through an in-process loopback pair.
//!
//! Run with: cargo run --example loopback

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crosscall::{
    CallError, Channel, EnvelopeTransportAdapter, LoopbackConfig, LoopbackFrameTransport,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EchoRequest {
    message: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crosscall=debug".into()),
        )
        .init();

    let (left, right) = LoopbackFrameTransport::create_pair("demo", LoopbackConfig::default())?;
    let a = Channel::create(EnvelopeTransportAdapter::new(left));
    let b = Channel::create(EnvelopeTransportAdapter::new(right));

    // Either side may answer; either side may call.
    b.answer("ping", |_: ()| async move { Ok("pong".to_string()) });
    b.answer("boom", |_: ()| async move {
        Err::<(), _>(CallError::Handler("nope".to_string()))
    });
    b.answer("void", |_: ()| async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(())
    });
    a.answer("echo", |req: EchoRequest| async move { Ok(req.message) });

    let reply: String = a.call("ping", &()).await?;
    println!("a.call(ping) -> {}", reply);

    match a.call::<(), ()>("missing", &()).await {
        Err(CallError::NoHandler(event)) => println!("a.call(missing) -> no handler for '{}'", event),
        other => println!("a.call(missing) -> unexpected: {:?}", other),
    }

    match a.call::<(), ()>("boom", &()).await {
        Err(CallError::Handler(description)) => println!("a.call(boom) -> {}", description),
        other => println!("a.call(boom) -> unexpected: {:?}", other),
    }

    let echoed: String = b
        .call(
            "echo",
            &EchoRequest {
                message: "hi".to_string(),
            },
        )
        .await?;
    println!("b.call(echo) -> {}", echoed);

    match a
        .call_with_timeout::<(), ()>("void", &(), Duration::from_millis(100))
        .await
    {
        Err(CallError::Timeout { event, duration_ms }) => {
            println!("a.call(void) -> timed out '{}' after {}ms", event, duration_ms)
        }
        other => println!("a.call(void) -> unexpected: {:?}", other),
    }

    if let Some(stats) = a.stats() {
        println!("{}", stats);
    }

    a.close().await;
    b.close().await;

    Ok(())
}
