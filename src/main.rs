use clap::Parser as _;
use postchain::miner::Miner;
use postchain::tracker::Tracker;
use postchain::user::User;

#[derive(Debug, clap::Parser)]
#[command(name = "postchain", about = "A proof-of-work log of signed posts")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run the tracker that miners heartbeat into
    Tracker {
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },
    /// Run a miner node
    Miner {
        #[arg(short, long)]
        port: u16,
        #[arg(short, long, default_value_t = 8080)]
        tracker_port: u16,
    },
    /// Sign a post and publish it through the miners
    Post {
        #[arg(short, long, default_value_t = 8080)]
        tracker_port: u16,
        content: String,
    },
    /// Read the agreed history
    Read {
        #[arg(short, long, default_value_t = 8080)]
        tracker_port: u16,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env()?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match Args::parse().command {
        Command::Tracker { port } => {
            let tracker = Tracker::new(port);
            tracker.start().await?;
            tokio::signal::ctrl_c().await?;
            tracker.shutdown().await;
        }
        Command::Miner { port, tracker_port } => {
            let miner = Miner::new(port, tracker_port);
            miner.start().await?;
            tokio::signal::ctrl_c().await?;
            miner.shutdown().await;
        }
        Command::Post {
            tracker_port,
            content,
        } => {
            User::new(tracker_port).write_post(&content).await?;
        }
        Command::Read { tracker_port } => {
            for post in User::new(tracker_port).read_posts().await? {
                println!("{}  {}", post.body.timestamp, post.body.content);
            }
        }
    }
    Ok(())
}
