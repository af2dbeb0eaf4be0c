//! # qumbed
//!
//! CLI for driving Qumbed nodes against a relay.
//!
//! ## Commands
//!
//! - `keygen`: generate and print a key pair
//! - `sub`: subscribe to a topic and print received messages
//! - `pub`: publish one message to a topic
//!
//! ## Example
//!
//! ```bash
//! # terminal 1: a subscriber (prints its public key on startup)
//! qumbed sub --relay localhost:6121 --topic sensors/temp --schema sensor.Temperature
//!
//! # terminal 2: publish to it
//! qumbed pub --relay localhost:6121 --topic sensors/temp \
//!     --schema sensor.Temperature \
//!     --payload '{"celsius":22.5,"timestamp_ms":1000,"sensor_id":"a"}' \
//!     --recipient-key <subscriber public key>
//! ```

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use clap::{Parser, Subcommand};
use qumbed_node::{KeyPair, Node, NodeConfig, PUBLIC_KEY_SIZE};

/// End-to-end encrypted pub/sub over a zero-knowledge relay.
#[derive(Parser, Debug)]
#[command(name = "qumbed", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a key pair and print it (base64)
    Keygen,

    /// Subscribe to a topic and print received messages
    Sub {
        /// Relay address
        #[arg(long, default_value = "localhost:6121")]
        relay: String,

        /// Topic to subscribe to
        #[arg(long)]
        topic: String,

        /// Schema filter (empty accepts any payload)
        #[arg(long, default_value = "")]
        schema: String,

        /// Node identifier
        #[arg(long, default_value = "node-1")]
        id: String,
    },

    /// Publish one message to a topic
    Pub {
        /// Relay address
        #[arg(long, default_value = "localhost:6121")]
        relay: String,

        /// Topic to publish on
        #[arg(long)]
        topic: String,

        /// Schema the payload conforms to
        #[arg(long)]
        schema: String,

        /// Payload (JSON matching the schema)
        #[arg(long)]
        payload: String,

        /// Recipient public key (base64); defaults to self for loopback demos
        #[arg(long)]
        recipient_key: Option<String>,

        /// Node identifier
        #[arg(long, default_value = "node-1")]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Commands::Keygen => keygen(),
        Commands::Sub {
            relay,
            topic,
            schema,
            id,
        } => subscribe(&relay, &topic, &schema, &id).await,
        Commands::Pub {
            relay,
            topic,
            schema,
            payload,
            recipient_key,
            id,
        } => publish(&relay, &topic, &schema, &payload, recipient_key.as_deref(), &id).await,
    }
}

fn keygen() -> Result<()> {
    let keys = KeyPair::generate();
    // the private buffer zeroes itself when this scope ends
    let private = keys.private_bytes();
    println!("public key:  {}", STANDARD.encode(keys.public_bytes()));
    println!("private key: {}", STANDARD.encode(private.as_slice()));
    Ok(())
}

async fn subscribe(relay: &str, topic: &str, schema: &str, id: &str) -> Result<()> {
    let node = Node::new(NodeConfig::new(id).with_relay(relay))
        .await
        .context("starting node")?;
    println!("public key: {}", STANDARD.encode(node.public_key()));

    node.subscribe(topic, schema)
        .await
        .with_context(|| format!("subscribing to {topic}"))?;
    println!("subscribed to {topic}, waiting for messages (ctrl-c to exit)");

    let messages = node.messages();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = async {
            while let Some(message) = messages.recv().await {
                println!(
                    "[{}] {}",
                    message.topic,
                    String::from_utf8_lossy(&message.payload)
                );
            }
        } => {}
    }

    node.close().await;
    Ok(())
}

async fn publish(
    relay: &str,
    topic: &str,
    schema: &str,
    payload: &str,
    recipient_key: Option<&str>,
    id: &str,
) -> Result<()> {
    let node = Node::new(NodeConfig::new(id).with_relay(relay))
        .await
        .context("starting node")?;

    let recipient: [u8; PUBLIC_KEY_SIZE] = match recipient_key {
        Some(encoded) => {
            let bytes = STANDARD
                .decode(encoded)
                .context("recipient key is not valid base64")?;
            match bytes.try_into() {
                Ok(key) => key,
                Err(bytes) => bail!(
                    "recipient key must be {PUBLIC_KEY_SIZE} bytes, got {}",
                    bytes.len()
                ),
            }
        }
        None => node.public_key(),
    };

    node.publish(topic, schema, payload.as_bytes(), &recipient)
        .await
        .with_context(|| format!("publishing to {topic}"))?;
    println!("published to {topic}");

    node.close().await;
    Ok(())
}
