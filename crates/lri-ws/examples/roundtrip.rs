// SPDX-License-Identifier: Apache-2.0
//! Start a local LHS server, connect a client, and exchange one envelope
//! in each direction.
//!
//! ```sh
//! RUST_LOG=info cargo run -p lri-ws --example roundtrip
//! ```

use anyhow::Result;
use lri_envelope::{Consent, Intent, IntentKind, Lce, Policy};
use lri_ws::{WsClient, WsServer, WsServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let server = WsServer::new(WsServerConfig::default());
    let addr = server.start().await?;
    server.on_message(|lce, session_id, thread_id| {
        info!(%session_id, %thread_id, intent = %lce.intent.kind, "server received envelope");
    });

    let mut client = WsClient::new(format!("ws://{addr}")).with_thread("demo-thread");
    client.connect().await?;
    info!(
        session_id = client.session_id().unwrap_or(""),
        encoding = %client.negotiated_encoding().map(|e| e.as_str()).unwrap_or(""),
        "client sealed"
    );

    client
        .send(&Lce::new(
            Intent::with_goal(IntentKind::Tell, "hello from the demo client"),
            Policy::new(Consent::Private),
        ))
        .await?;

    let session_id = client.session_id().unwrap_or("").to_owned();
    server
        .send(
            &session_id,
            &Lce::new(Intent::new(IntentKind::Notify), Policy::new(Consent::Private)),
        )
        .await?;
    let echoed = client.receive().await?;
    info!(intent = %echoed.intent.kind, "client received envelope");

    client.close().await?;
    server.stop().await;
    Ok(())
}
