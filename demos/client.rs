use std::net::SocketAddr;
use std::path::PathBuf;

use tracing_subscriber::EnvFilter;
use xml_datagram::{Client, ClientConfig, TracingLogger};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server_socket: SocketAddr = "127.0.0.1:12345".parse()?;
    let name = std::env::args().nth(1).unwrap_or_else(|| "alice".to_owned());

    let mut client_config = ClientConfig::new(server_socket, TracingLogger);
    client_config.schema_path = Some(PathBuf::from(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/demos/game.xsd"
    )));
    let client = Client::new(client_config).await?;
    println!("Client bound to {}", client.local_addr());

    let message = format!(r#"<join team="red"><name>{name}</name></join>"#);
    match client.send(message.as_bytes()).await {
        Ok(reply) => {
            let players = reply.child("players").map(|p| p.text()).unwrap_or("?");
            eprintln!("Reply <{}>: {players} player(s) connected", reply.name());
        }
        Err(e) => {
            eprintln!("No reply: {e}");
        }
    }

    client.close().await;

    Ok(())
}
