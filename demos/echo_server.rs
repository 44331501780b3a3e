//! A WebSocket echo server.
//! Every accepted connection gets its own endpoint, which echoes back text and binary messages.
//! Endpoints are kept until their connection has closed.
use std::{net::TcpListener, sync::Arc};

use tether::{socket::TcpSocket, DeflateOptions, Options, ReadyState, WebSocket, WebSocketMessage};

/// Starts an endpoint serving one accepted connection.
fn handle_client(socket: TcpSocket) -> Arc<WebSocket> {
    let ws = Arc::new(WebSocket::from_socket(
        Arc::new(socket),
        Options::default()
            .with_utf8()
            .with_max_payload_read(100 * 1024 * 1024)
            .with_max_read_buffer(200 * 1024 * 1024),
    ));
    ws.set_per_message_deflate_options(Some(DeflateOptions::default()));

    let endpoint = Arc::downgrade(&ws);
    ws.set_on_message_callback(move |msg| match msg {
        WebSocketMessage::Message {
            payload, binary, ..
        } => {
            let Some(endpoint) = endpoint.upgrade() else {
                return;
            };
            if *binary {
                endpoint.send_binary(payload);
            } else {
                endpoint.send(String::from_utf8_lossy(payload));
            }
        }
        WebSocketMessage::Close { info, .. } => {
            log::debug!("Client disconnected: {} {}", info.code, info.reason);
        }
        WebSocketMessage::Error(err) => log::error!("Error in websocket connection: {}", err.reason),
        _ => {}
    });
    ws.start();

    ws
}

fn main() -> anyhow::Result<()> {
    simple_logger::init_with_level(log::Level::Debug).expect("log");

    let listener = TcpListener::bind("0.0.0.0:8080")?;
    log::debug!("Listening on {}", listener.local_addr()?);

    let mut clients = Vec::new();
    for stream in listener.incoming() {
        let stream = stream?;
        log::info!("Client connected");

        clients.retain(|ws: &Arc<WebSocket>| ws.ready_state() != ReadyState::Closed);
        match TcpSocket::from_stream(stream) {
            Ok(socket) => clients.push(handle_client(socket)),
            Err(err) => log::error!("An error occurred: {err:?}"),
        }
    }

    Ok(())
}
