//! Command-line client for a dynamo-node.

use clap::{Parser, Subcommand};

use dynamo_cluster::client::Client;

#[derive(Parser, Debug)]
#[command(name = "kvctl", version, about = "Talk to a dynamo-node")]
struct Cli {
    /// External endpoint of any node (host:port).
    #[arg(short, long, default_value = "127.0.0.1:7000")]
    endpoint: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Put { key: String, value: String },
    Get { key: String },
    Delete { key: String },
    /// Ask the node to leave the ring.
    Shutdown,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut client = Client::connect(&cli.endpoint).await?;

    let reply = match &cli.command {
        Command::Put { key, value } => client.put(key, value).await?,
        Command::Get { key } => client.get(key).await?,
        Command::Delete { key } => client.delete(key).await?,
        Command::Shutdown => client.shutdown().await?,
    };

    match reply.value {
        Some(value) if reply.error_code.is_success() => println!("{}", value),
        _ => println!("{}", reply.error_code),
    }

    if !reply.error_code.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
