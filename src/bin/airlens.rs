//! AirLens terminal client
//!
//! Connects to a phone, keeps the latest frame flowing into any active
//! recording, and takes commands from stdin.
//!
//! Usage: `airlens <host> [config.toml]`

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use airlens::{
    audio::list_devices,
    client::ControlCommand,
    config::AppConfig,
    recording::format_elapsed,
    DeviceLink,
};

const STATS_INTERVAL: Duration = Duration::from_secs(10);

const HELP: &str = "\
commands:
  zoom <0..1>   set zoom level
  zoom+ zoom-   step zoom
  switch        switch camera
  flash         toggle flash
  rotate        rotate view by 90 degrees
  photo         save the current frame
  rec           start/stop recording
  talk          start/stop talking to the phone
  send <text>   send a raw command
  status        show link status
  quit          disconnect and exit";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(host) = args.next() else {
        bail!("usage: airlens <host> [config.toml]");
    };
    let config = match args.next() {
        Some(path) => AppConfig::load(&PathBuf::from(path))?,
        None => AppConfig::load_default()?,
    };
    config
        .storage
        .ensure_dirs()
        .context("storage directories unavailable")?;

    tracing::info!("Starting AirLens client for {}", host);

    println!("\n=== Audio Devices ===");
    for device in list_devices() {
        let kind = if device.is_input { "input " } else { "output" };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} {}{}", kind, device.name, default_marker);
    }
    println!();

    let poll_interval = config.view.poll_interval();
    let link = Arc::new(DeviceLink::new(config));

    {
        let link = link.clone();
        let target = host.clone();
        tokio::task::spawn_blocking(move || link.connect(&target))
            .await?
            .with_context(|| format!("cannot connect to {}", host))?;
    }
    println!("Connected to {}. Type `help` for commands.", host);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_stats = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                link.poll_frame();

                if !link.is_connected() {
                    tracing::warn!("Link to {} lost", host);
                    break;
                }

                if last_stats.elapsed() >= STATS_INTERVAL {
                    let stats = link.status().video_stats;
                    tracing::info!(
                        "Video: {} decoded, {} dropped, {} oversized",
                        stats.frames_decoded,
                        stats.frames_dropped,
                        stats.frames_oversized
                    );
                    last_stats = Instant::now();
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let link = link.clone();
                let keep_going =
                    tokio::task::spawn_blocking(move || handle_command(&link, line.trim())).await?;
                if !keep_going {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    tokio::task::spawn_blocking(move || link.shutdown()).await?;
    tracing::info!("AirLens client stopped");
    Ok(())
}

/// Run one stdin command. Returns `false` to quit.
fn handle_command(link: &DeviceLink, line: &str) -> bool {
    let (word, rest) = line
        .split_once(char::is_whitespace)
        .map(|(w, r)| (w, r.trim()))
        .unwrap_or((line, ""));

    match word {
        "" => {}
        "help" => println!("{}", HELP),
        "zoom" => match rest.parse::<f32>() {
            Ok(level) => report(link.set_zoom(level).map(|z| format!("zoom {:.2}", z))),
            Err(_) => println!("usage: zoom <0..1>"),
        },
        "zoom+" => report(link.zoom_by(1).map(|z| format!("zoom {:.2}", z))),
        "zoom-" => report(link.zoom_by(-1).map(|z| format!("zoom {:.2}", z))),
        "switch" => report(
            link.switch_camera()
                .map(|_| format!("camera switched, view {}°", link.rotation().degrees())),
        ),
        "flash" => report(link.toggle_flash().map(|_| "flash toggled".to_string())),
        "rotate" => println!("view {}°", link.rotate().degrees()),
        "photo" => report(link.take_photo().map(|p| format!("saved {}", p.display()))),
        "rec" => {
            if link.is_recording() {
                println!("muxing...");
                report(link.stop_recording().map(|p| format!("saved {}", p.display())));
            } else {
                report(
                    link.start_recording()
                        .map(|info| format!("recording {}x{}", info.width, info.height)),
                );
            }
        }
        "talk" => {
            if link.is_talking() {
                link.stop_talk();
                println!("talk off");
            } else {
                report(link.start_talk().map(|_| "talk on".to_string()));
            }
        }
        "send" if !rest.is_empty() => {
            report(link.send(&ControlCommand::Raw(rest.to_string())).map(|_| "sent".to_string()))
        }
        "status" => {
            let status = link.status();
            println!(
                "host {}  video {:?}  audio {:?}  talk {}  zoom {:.2}  view {}°",
                status.host.as_deref().unwrap_or("-"),
                status.video,
                status.audio,
                if status.talking { "on" } else { "off" },
                status.zoom,
                status.rotation.degrees()
            );
            if let Some(elapsed) = status.recording {
                println!("recording {}", format_elapsed(elapsed));
            }
            println!(
                "frames: {} received, {} decoded, {} dropped, {} oversized, {} bytes skipped",
                status.video_stats.frames_received,
                status.video_stats.frames_decoded,
                status.video_stats.frames_dropped,
                status.video_stats.frames_oversized,
                status.video_stats.bytes_skipped
            );
        }
        "quit" | "exit" => return false,
        _ => println!("unknown command {:?}; try `help`", line),
    }
    true
}

fn report<E: std::fmt::Display>(result: std::result::Result<String, E>) {
    match result {
        Ok(message) => println!("{}", message),
        Err(e) => println!("error: {}", e),
    }
}
