use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::Result;
use picolight::hal::RadioEvent;
use picolight::sim::{self, SimMemory};
use picolight::store::{FileStorage, ScheduleStore};
use picolight::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, error::TryRecvError, Receiver};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Runs the light controller on this machine with simulated hardware.
///
/// Reads one command per line on stdin:
///   connect [handle] | disconnect [handle] | write <characteristic> <hex> | mem <bytes> | quit
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// RON configuration file; defaults apply when it does not exist
    #[arg(short, long, default_value = "picolight.ron")]
    config: PathBuf,

    /// Directory holding the schedule and settings documents
    #[arg(short, long, default_value = ".")]
    data_dir: PathBuf,

    /// Simulated free memory in bytes
    #[arg(short, long, default_value_t = 64 * 1024)]
    free_memory: u32,
}

/// Messages from the stdin reader to the control loop
#[derive(Debug, PartialEq)]
enum Input {
    Event(RadioEvent),
    Memory(u32),
    Shutdown,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("picolight=info")),
        )
        .compact()
        .init();

    color_eyre::install()?;

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    let store = ScheduleStore::new(Box::new(FileStorage::new(&args.data_dir)), &config);
    let memory = Arc::new(SimMemory::new(args.free_memory));

    let (tx, rx) = mpsc::channel(32);
    let worker = tokio::task::spawn_blocking({
        let memory = memory.clone();
        move || {
            let controller = Controller::boot(
                config,
                sim::host_services(memory.clone()),
                Box::new(sim::LogActuator::default()),
                Box::new(sim::StaticSensor::default()),
                Box::new(sim::StdoutRadio),
                store,
            );
            run(controller, rx, &memory);
        }
    });

    println!("OK");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
        };
        let Some(line) = line else {
            break;
        };

        match parse_line(&line) {
            Ok(Some(Input::Shutdown)) => break,
            Ok(Some(input)) => {
                if tx.send(input).await.is_err() {
                    warn!("Control loop has stopped");
                    break;
                }
                println!("OK");
            }
            Ok(None) => {}
            Err(e) => eprintln!("ERR {e}"),
        }
    }

    // The loop turns the lights off once it sees the shutdown
    let _ = tx.send(Input::Shutdown).await;
    drop(tx);
    worker.await?;
    Ok(())
}

/// The cooperative control loop: drain pending events, then run the
/// periodic tasks and pause.
fn run(mut controller: Controller, mut rx: Receiver<Input>, memory: &SimMemory) {
    loop {
        loop {
            match rx.try_recv() {
                Ok(Input::Event(event)) => controller.handle_event(event),
                Ok(Input::Memory(bytes)) => memory.set_free(bytes),
                Ok(Input::Shutdown) | Err(TryRecvError::Disconnected) => {
                    controller.shutdown();
                    return;
                }
                Err(TryRecvError::Empty) => break,
            }
        }
        controller.poll();
        std::thread::sleep(controller.loop_delay());
    }
}

fn parse_line(line: &str) -> std::result::Result<Option<Input>, String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(None);
    };
    debug!("stdin command: {}", command);

    let handle = |word: Option<&str>| -> std::result::Result<u16, String> {
        word.map_or(Ok(1), |w| w.parse().map_err(|_| format!("Invalid handle: {w}")))
    };

    let input = match command {
        "connect" => Input::Event(RadioEvent::Connected(handle(words.next())?)),
        "disconnect" => Input::Event(RadioEvent::Disconnected(handle(words.next())?)),
        "write" => {
            let name = words.next().ok_or("Usage: write <characteristic> <hex>")?;
            let characteristic =
                Characteristic::from_name(name).ok_or(format!("Unknown characteristic: {name}"))?;
            let data = parse_hex(words.next().unwrap_or_default())?;
            Input::Event(RadioEvent::Write {
                characteristic,
                data,
            })
        }
        "mem" => {
            let bytes = words.next().ok_or("Usage: mem <bytes>")?;
            Input::Memory(bytes.parse().map_err(|_| format!("Invalid byte count: {bytes}"))?)
        }
        "quit" | "exit" => Input::Shutdown,
        other => return Err(format!("Unknown command: {other}")),
    };
    Ok(Some(input))
}

fn parse_hex(hex: &str) -> std::result::Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err(format!("Odd number of hex digits: {hex}"));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|byte| u8::from_str_radix(byte, 16).ok())
                .ok_or(format!("Invalid hex: {hex}"))
        })
        .collect()
}
