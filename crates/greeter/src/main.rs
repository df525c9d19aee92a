//! Greeter demo.
//!
//! Runs a host and a peer runtime in one process, joined by a
//! [`MemoryChannel`]. The peer binds before the host has exposed anything,
//! so the first bind rides out the startup race through discovery.
//!
//! ```text
//! RUST_LOG=debug cargo run -p greeter
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use exobind::ApiError;
use exobind::CallError;
use exobind::ClassLookup;
use exobind::ClassRegistry;
use exobind::Config;
use exobind::MemoryChannel;
use exobind::RelayedError;
use exobind::Runtime;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, PartialEq)]
struct Visitor {
    name: String,
    visits: u32,
}

neorestore::class!(Visitor { name, visits });

struct Greeter;

impl Greeter {
    async fn hello(&self, name: String) -> Result<String, ApiError> {
        if name.is_empty() {
            return Err(RelayedError::from("bad name").into());
        }
        Ok(format!("Hi, {name}"))
    }

    async fn welcome_back(&self, visitor: Visitor) -> Result<Visitor, ApiError> {
        Ok(Visitor {
            visits: visitor.visits + 1,
            ..visitor
        })
    }
}

exobind::api!(impl Greeter as "Greeter" {
    async fn hello(&self, name: String) -> String;
    async fn welcome_back(&self, visitor: Visitor) -> Visitor;
});

struct Console;

impl Console {
    async fn print(&self, line: String) -> Result<(), ApiError> {
        tracing::info!(target: "peer.console", "{line}");
        Ok(())
    }
}

exobind::api!(impl Console as "Console" {
    async fn print(&self, line: String);
});

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    let lookup: Arc<dyn ClassLookup> = Arc::new(ClassRegistry::new().register::<Visitor>());

    let (host_end, peer_end) = MemoryChannel::named_pair("host", "peer");

    let host = Runtime::builder()
        .config(config)
        .error_logger(|report| {
            tracing::error!(class = report.class_name, method = report.method, "host fault: {:#}", report.error);
        })
        .build();
    let peer = Runtime::builder().config(config).build();

    let to_peer = host.attach(Arc::new(host_end));
    let to_host = peer.attach(Arc::new(peer_end));

    peer.expose_oneway(Arc::new(Console), None)
        .context("exposing console")?;

    let exposer = host.clone();
    let host_lookup = lookup.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if let Err(e) = exposer.expose(Arc::new(Greeter), Some(host_lookup)) {
            tracing::error!(error = %e, "failed to expose greeter");
        }
    });

    let greeter = peer
        .bind(to_host, "Greeter", Some(lookup))
        .await
        .context("binding greeter")?;
    tracing::info!(methods = ?greeter.method_names(), "bound greeter");

    let reply: String = greeter.call_as("hello", ("Ada".to_string(),)).await?;
    tracing::info!(%reply, "hello");

    match greeter.call("hello", ("".to_string(),)).await {
        Err(CallError::Relayed(reason)) => tracing::info!(%reason, "hello rejected"),
        other => anyhow::bail!("expected a relayed rejection, got {other:?}"),
    }

    let visitor = Visitor {
        name: "Ada".to_string(),
        visits: 1,
    };
    let back: Visitor = greeter.call_as("welcome_back", (visitor,)).await?;
    tracing::info!(?back, "welcome back");

    let console = host
        .bind_oneway(to_peer, "Console", None)
        .await
        .context("binding console")?;
    console.send("print", ("greetings from the host".to_string(),))?;

    // Let the one-way message drain before tearing down.
    tokio::time::sleep(Duration::from_millis(20)).await;

    host.close();
    peer.close();
    Ok(())
}
