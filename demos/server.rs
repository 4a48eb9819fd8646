use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::signal::unix::{SignalKind, signal};
use tracing_subscriber::EnvFilter;
use xml_datagram::{FieldParser, HandlerEvent, Server, ServerConfig, TracingLogger, escape};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server_socket: SocketAddr = "127.0.0.1:12345".parse()?;
    println!("SERVER ENDPOINT IS {}", server_socket);

    // Schema: default to the bundled demo schema, allow override via GAME_SCHEMA
    let schema_path = std::env::var("GAME_SCHEMA")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/demos/game.xsd"))
        });

    let mut config = ServerConfig::new(server_socket, FieldParser, TracingLogger);
    config.schema_path = Some(schema_path);
    config.max_in_flight = Some(64);
    let server = Server::new(config).await?;

    let store = server.store();
    server.add_handler(move |event: &HandlerEvent| {
        if event.shutdown {
            return Ok(None);
        }
        let name = escape(
            event
                .session
                .as_ref()
                .and_then(|s| s.get("name"))
                .unwrap_or("stranger"),
        );
        let reply = format!(
            "<joined><name>{name}</name><players>{}</players></joined>",
            store.len()
        );
        Ok(Some(reply.into_bytes()))
    });
    server.add_handler(|event: &HandlerEvent| {
        Ok(event
            .shutdown
            .then(|| br#"<bye reason="server stopping"/>"#.to_vec()))
    });

    server.start()?;
    println!("{} handlers registered", server.handler_count());

    let mut interrupt_signal = signal(SignalKind::interrupt())?;
    let mut quit_signal = signal(SignalKind::quit())?;

    tokio::select! {
        v = interrupt_signal.recv() => if v.is_some() {
            eprintln!("SIGINT");
        },
        v = quit_signal.recv() => if v.is_some() {
            eprintln!("SIGQUIT");
        },
    }

    server.stop().await?;

    Ok(())
}
