use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use futures::{Stream, StreamExt};
use picolight::client::Target;
use picolight::schedule::ScheduleBlock;
use picolight::*;
use tokio::time::{timeout, Duration, Instant};
use tracing::{debug, error, info, instrument};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Connect to this address or id instead of scanning by name
    #[arg(short, long, global = true)]
    address: Option<String>,

    /// Advertised name prefix to scan for
    #[arg(short, long, global = true, default_value = "PicoLightSen")]
    name: String,

    /// Seconds to scan before giving up
    #[arg(long, global = true, default_value_t = 10)]
    scan_timeout: u64,

    /// Minimum gap between writes in milliseconds
    #[arg(long, global = true, default_value_t = 50)]
    command_delay: u64,

    /// Seconds to wait for replies after a command
    #[arg(short, long, global = true, default_value_t = 2)]
    wait: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the recipe catalog
    Recipes,
    /// Switch to a recipe
    Recipe {
        /// Recipe key, e.g. veg_growth
        name: String,
    },
    /// Fade to a custom RGBW colour
    Color {
        /// Red value (0-255)
        #[arg(short, long, default_value_t = 0)]
        red: u8,
        /// Green value (0-255)
        #[arg(short, long, default_value_t = 0)]
        green: u8,
        /// Blue value (0-255)
        #[arg(short, long, default_value_t = 0)]
        blue: u8,
        /// White value (0-255)
        #[arg(short, long, default_value_t = 255)]
        white: u8,
    },
    /// Turn the light on with the active recipe
    On,
    /// Turn the light off
    Off,
    /// Toggle schedule-driven changes
    Auto,
    /// Request every status notification
    Status,
    /// Request the current RGBW output
    Light,
    /// Set the recipe used by "on"
    ActiveRecipe {
        /// Recipe key
        name: String,
    },
    /// Set the controller clock to this machine's local time
    SyncClock,
    /// Replace the daily schedule
    Schedule {
        /// Schedule version stamp
        #[arg(long, default_value_t = 1)]
        version: u8,
        /// Blocks as HH:MM-HH:MM=recipe, later blocks win on overlap
        blocks: Vec<ScheduleBlock>,
    },
    /// Print notifications until interrupted or the duration ends
    Monitor {
        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },
}

#[tokio::main]
#[instrument]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("picolight=info")),
        )
        .compact()
        .init();

    color_eyre::install()?;

    let cli = Cli::parse();
    debug!("Parsed command line arguments");

    if let Commands::Recipes = cli.command {
        for (index, key) in RECIPE_KEYS.iter().enumerate() {
            let color = recipes::color_of(key).unwrap_or(Color::OFF);
            println!("{:>2}  {:<16} {}", index, key, color);
        }
        return Ok(());
    }

    let command = match build_command(&cli.command) {
        Ok(command) => command,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    let target = match cli.address {
        Some(addr) => Target::Address(addr),
        None => Target::Name(cli.name),
    };
    let client = match LightClient::connect(
        target,
        Duration::from_secs(cli.scan_timeout),
        cli.command_delay,
    )
    .await
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to connect: {}", e);
            return Err(e.into());
        }
    };

    let notifications = client.notifications().await?;
    futures::pin_mut!(notifications);

    match command {
        Some(command) => {
            info!("Sending {:?}", command);
            client.send(&command).await?;
            print_notifications(&mut notifications, Some(Duration::from_secs(cli.wait))).await;
        }
        None => {
            let window = match cli.command {
                Commands::Monitor { duration } => duration.map(Duration::from_secs),
                _ => None,
            };
            info!("Monitoring notifications");
            print_notifications(&mut notifications, window).await;
        }
    }

    client.disconnect().await?;
    Ok(())
}

/// Wire command for a subcommand. `None` for monitor.
fn build_command(command: &Commands) -> picolight::Result<Option<Command>> {
    let command = match command {
        Commands::Recipes | Commands::Monitor { .. } => return Ok(None),
        Commands::Recipe { name } => Command::SelectRecipe(recipe_index(name)?),
        Commands::Color {
            red,
            green,
            blue,
            white,
        } => Command::CustomColor(Color::new(*red, *green, *blue, *white)),
        Commands::On => Command::LightsOn,
        Commands::Off => Command::LightsOff,
        Commands::Auto => Command::ToggleAutoCycle,
        Commands::Status => Command::RequestStatus,
        Commands::Light => Command::RequestLightStatus,
        Commands::ActiveRecipe { name } => Command::SetActiveRecipe(recipe_index(name)?),
        Commands::SyncClock => Command::SetClock(chrono::Local::now().naive_local()),
        Commands::Schedule { version, blocks } => Command::UploadSchedule {
            version: *version,
            blocks: blocks.iter().map(schedule::WireBlock::from_block).collect(),
        },
    };
    Ok(Some(command))
}

fn recipe_index(name: &str) -> picolight::Result<u8> {
    recipes::index_of(name).ok_or_else(|| Error::UnknownRecipe(name.to_string()))
}

/// Prints decoded notifications until the stream ends or `window` elapses
async fn print_notifications<S>(notifications: &mut S, window: Option<Duration>)
where
    S: Stream<Item = Notification> + Unpin,
{
    let deadline = window.map(|window| Instant::now() + window);
    loop {
        let next = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match timeout(remaining, notifications.next()).await {
                    Ok(next) => next,
                    Err(_) => break,
                }
            }
            None => notifications.next().await,
        };
        match next {
            Some(notification) => println!("{:?}", notification),
            None => break,
        }
    }
}
