//! Example WebSocket client that subscribes to Bybit's public trade stream.
//!
//! The endpoint reconnects on its own; the main thread only pings every 3 seconds.
use std::{thread, time::Duration};

use tether::{CompressionLevel, DeflateOptions, Options, WebSocket, WebSocketMessage};

fn main() -> anyhow::Result<()> {
    simple_logger::init_with_level(log::Level::Debug).expect("log");

    let client = WebSocket::new();
    client.set_url("wss://stream.bybit.com/v5/public/linear");
    client.set_per_message_deflate_options(Some(
        DeflateOptions::default().with_level(CompressionLevel::fast()),
    ));
    client.set_options(
        Options::default()
            .with_reconnection_wait(Duration::from_millis(500), Duration::from_secs(30)),
    );

    // the subscription has to be renewed on every connection
    let subscription = r#"{
        "req_id": "1",
        "op": "subscribe",
        "args": [
            "publicTrade.BTCUSDT"
        ]
    }"#;

    client.set_on_message_callback(move |msg| match msg {
        WebSocketMessage::Open { uri, .. } => log::info!("Connected to {uri}"),
        WebSocketMessage::Message { payload, .. } => {
            match serde_json::from_slice::<serde_json::Value>(payload) {
                Ok(value) => log::info!("{value}"),
                Err(err) => log::warn!("invalid json: {err}"),
            }
        }
        WebSocketMessage::Pong { payload, .. } => {
            log::debug!("Pong: {}", String::from_utf8_lossy(payload));
        }
        WebSocketMessage::Close { info, .. } => log::debug!("Disconnected: {}", info.reason),
        WebSocketMessage::Error(err) => {
            log::warn!("{} (retry {} in {:?})", err.reason, err.retries, err.wait_time);
        }
        WebSocketMessage::Ping { .. } => {}
    });
    client.start();

    let mut subscribed = false;
    loop {
        thread::sleep(Duration::from_secs(3));

        if !subscribed {
            subscribed = client.send(subscription).success;
        }

        log::debug!("Tick");
        if !client.ping("idk").success {
            subscribed = false;
        }
    }
}
