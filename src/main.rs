//! CLI for air-hub
//!
//! Subcommands:
//! - `server`: run the WebSocket hub
//! - `client`: connect, subscribe, ping and chat once (useful for smoke tests)

use std::sync::Arc;

use air_hub::bridge::Bridge;
use air_hub::config::load_config;
use air_hub::files::UploadDir;
use air_hub::hub::Hub;
use air_hub::jobs::JobRunner;
use air_hub::llm;
use air_hub::router::Router;
use air_hub::transport::websocket::start_websocket_server;
use air_hub::utils::logging;
use clap::Parser;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "air-hub")]
enum Command {
    /// Start the WebSocket hub
    Server,
    /// Run the smoke-test client against a running hub
    Client {
        /// WebSocket URL to connect to
        #[arg(long, default_value = "ws://127.0.0.1:8080/chat?user_id=smoke")]
        url: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    match cmd {
        Command::Server => {
            if let Err(e) = run_server().await {
                error!("Server failed: {}", e);
                std::process::exit(1);
            }
        }
        Command::Client { url } => {
            logging::init("info");
            if let Err(e) = run_client(&url).await {
                error!("Client failed: {}", e);
                std::process::exit(1);
            }
        }
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            return Err(e.into());
        }
    };
    logging::init(&config.logging.level);

    let bridge = Bridge::from_settings(&config.bus);
    if bridge.is_none() {
        warn!("no pub/sub bus, running single-process");
    }
    let mut hub = Hub::new(&config.hub);
    if let Some(bridge) = &bridge {
        hub = hub.with_bridge(bridge.clone());
    }
    let hub = Arc::new(hub);

    let files = Arc::new(UploadDir::from_settings(&config.files));
    let jobs = JobRunner::new(
        hub.clone(),
        llm::from_settings(&config.llm),
        files.clone(),
        config.jobs.clone(),
    );
    let router = Router::new(hub.clone(), jobs, files);

    let subscriber = bridge.map(|bridge| tokio::spawn(bridge.run(hub.clone(), hub.shutdown_token())));

    let result = tokio::select! {
        result = start_websocket_server(&config, hub.clone(), router) => {
            if result.is_ok() {
                error!("WebSocket server exited unexpectedly.");
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            Ok(())
        }
    };

    hub.shutdown(config.hub.shutdown_grace()).await;
    if let Some(subscriber) = subscriber {
        let _ = subscriber.await;
    }
    result.map_err(Into::into)
}

async fn run_client(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use std::time::Duration;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    let (mut ws_stream, _response) = connect_async(url).await?;
    info!("connected to {url}");

    let requests = [
        json!({ "type": "subscribe", "channel": "chat:room1" }),
        json!({ "type": "ping" }),
        json!({ "type": "chat_message", "payload": { "content": "hello" } }),
    ];
    for request in requests {
        ws_stream
            .send(WsMessage::Text(request.to_string().into()))
            .await?;
    }

    // print everything until the chat turn settles or the hub goes quiet
    loop {
        let next = tokio::time::timeout(Duration::from_secs(35), ws_stream.next()).await;
        let Ok(Some(message)) = next else {
            break;
        };
        let WsMessage::Text(text) = message? else {
            continue;
        };
        let mut settled = false;
        for frame in text.split('\n') {
            println!("Incoming: {frame}");
            let v: serde_json::Value = serde_json::from_str(frame)?;
            settled |= v["type"] == "chat_typing" && v["payload"]["is_typing"] == false;
        }
        if settled {
            break;
        }
    }

    ws_stream.close(None).await?;
    Ok(())
}
