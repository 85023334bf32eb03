use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use trickle::{Config, Receiver, Sender, DEFAULT_PORT};

#[derive(Parser)]
#[command(name = "trickle")]
#[command(about = "Paced raw TCP streaming with Nagle and delayed-ACK control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a file to a receiver in paced chunks
    Send {
        /// Receiver address to connect to
        #[arg(default_value = "127.0.0.1")]
        server: String,

        /// Port to connect to
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// File to send
        #[arg(short, long, default_value = "file.txt")]
        file: PathBuf,

        /// Chunk size in bytes
        #[arg(short = 'l', long, default_value = "40")]
        length: usize,

        /// Pause after every chunk, in milliseconds
        #[arg(long, default_value = "1000")]
        delay_ms: u64,

        /// Disable Nagle's algorithm (set TCP_NODELAY)
        #[arg(long)]
        no_nagle: bool,

        /// Output the final report in JSON format
        #[arg(short = 'J', long)]
        json: bool,

        /// Width of the throughput buckets in seconds
        #[arg(short, long, default_value = "1")]
        interval: u64,
    },

    /// Accept one connection and drain it
    Receive {
        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Bind to specific address
        #[arg(short, long)]
        bind: Option<String>,

        /// Chunk size in bytes
        #[arg(short = 'l', long, default_value = "40")]
        length: usize,

        /// Pending-connection backlog
        #[arg(long, default_value = "3")]
        backlog: i32,

        /// Disable Nagle's algorithm on the receiver's sockets
        #[arg(long)]
        no_nagle: bool,

        /// Disable delayed ACKs (set TCP_QUICKACK)
        #[arg(long)]
        no_delayed_ack: bool,

        /// Do not echo received bytes
        #[arg(short, long)]
        quiet: bool,

        /// Output the final report in JSON format (implies --quiet)
        #[arg(short = 'J', long)]
        json: bool,

        /// Width of the throughput buckets in seconds
        #[arg(short, long, default_value = "1")]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Send {
            server,
            port,
            file,
            length,
            delay_ms,
            no_nagle,
            json,
            interval,
        } => {
            let config = Config::sender(server, port)
                .with_source(file)
                .with_chunk_size(length)
                .with_delay(Duration::from_millis(delay_ms))
                .with_nagle(!no_nagle)
                .with_json(json)
                .with_interval(Duration::from_secs(interval));

            let sender = Sender::new(config)?;
            sender.run().await?;
        }

        Commands::Receive {
            port,
            bind,
            length,
            backlog,
            no_nagle,
            no_delayed_ack,
            quiet,
            json,
            interval,
        } => {
            let mut config = Config::receiver(port)
                .with_chunk_size(length)
                .with_backlog(backlog)
                .with_nagle(!no_nagle)
                .with_delayed_ack(!no_delayed_ack)
                .with_echo(!quiet && !json)
                .with_json(json)
                .with_interval(Duration::from_secs(interval));

            if let Some(bind_addr) = bind {
                config.bind_addr = Some(bind_addr.parse()?);
            }

            let receiver = Receiver::bind(config)?;
            let measurements = receiver.run().await?;

            // Totals are already printed; a read error still fails the run.
            if let Some(message) = measurements.receive_error {
                anyhow::bail!(message);
            }
        }
    }

    Ok(())
}
