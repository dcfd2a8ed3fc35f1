use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use geoquest::auth;
use geoquest::feed::{self, ChannelFeed, VoidFeed, FEED_CAPACITY};
use geoquest::protocol::{Fort, WildCreature};
use geoquest::sign::NullCrypto;
use geoquest::{Location, Session, StatusError};

#[derive(Parser)]
#[command(name = "geoquest")]
#[command(about = "Command line client for the GeoQuest RPC API")]
#[command(version)]
struct Cli {
    #[arg(short, long, env = "GEOQUEST_ACCOUNT_USERNAME")]
    username: String,

    #[arg(short, long, env = "GEOQUEST_ACCOUNT_PASSWORD")]
    password: String,

    /// Account provider ("ptc")
    #[arg(long, env = "GEOQUEST_ACCOUNT_PROVIDER", default_value = "ptc")]
    provider: String,

    #[arg(long, env = "GEOQUEST_DEFAULT_LATITUDE", default_value_t = 0.0)]
    latitude: f64,

    #[arg(long, env = "GEOQUEST_DEFAULT_LONGITUDE", default_value_t = 0.0)]
    longitude: f64,

    #[arg(long, env = "GEOQUEST_DEFAULT_ALTITUDE", default_value_t = 0.0)]
    altitude: f64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Retrieves an API access token from your credentials
    AccessToken,
    /// Retrieves the player profile
    Player,
    /// Retrieves the player inventory
    Inventory,
    /// Retrieves map data for the current location
    Map,
}

/// Reporter that logs what the dispatch loop extracts from map responses.
struct LogReporter;

impl feed::Reporter for LogReporter {
    fn wild_creatures(&self, creatures: &[WildCreature]) {
        for creature in creatures {
            info!(
                creature = creature.creature_id,
                lat = creature.latitude,
                lon = creature.longitude,
                "wild creature sighted"
            );
        }
    }

    fn forts(&self, forts: &[Fort]) {
        info!(count = forts.len(), "forts in range");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut provider = auth::new_provider(&cli.provider, &cli.username, &cli.password)?;
    let location = Location::new(cli.latitude, cli.longitude, cli.altitude);

    match cli.command {
        Command::AccessToken => {
            let token = provider.login().await?;
            println!("{token}");
            Ok(())
        }
        Command::Player => {
            let mut session =
                Session::new(provider, location, Box::new(VoidFeed), Box::new(NullCrypto));
            session.init().await?;
            let (player, status) = session.get_player().await?;
            report(&player, status)
        }
        Command::Inventory => {
            let mut session =
                Session::new(provider, location, Box::new(VoidFeed), Box::new(NullCrypto));
            session.init().await?;
            let (inventory, status) = session.get_inventory().await?;
            report(&inventory, status)
        }
        Command::Map => {
            let (feed, rx) = ChannelFeed::new(FEED_CAPACITY);
            let dispatcher = tokio::spawn(feed::dispatch(rx, LogReporter));

            let mut session =
                Session::new(provider, location, Box::new(feed), Box::new(NullCrypto));
            session.init().await?;
            let (map, status) = session.announce().await?;

            // Dropping the session closes the feed, letting the dispatch
            // loop drain and finish. A crashed dispatcher is a fatal error.
            drop(session);
            dispatcher
                .await
                .context("the map dispatch loop failed")?;

            report(&map, status)
        }
    }
}

/// Prints the decoded response as JSON and exits non-zero on any fatal
/// status. The new-endpoint signal is treated as success.
fn report<T: Serialize>(value: &T, status: Option<StatusError>) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    match status {
        None | Some(StatusError::NewRpcEndpoint) => Ok(()),
        Some(err) => Err(err.into()),
    }
}
