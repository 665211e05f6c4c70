mod animation;
mod app;
mod board;
mod calibrate;
mod capture;
mod config;
mod geometry;
mod history;
mod input;
mod preview;
mod router;
mod scheduler;
mod window;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use dialoguer::Select;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::board::TileBoard;
use crate::capture::{capture_virtual_screen, XcapBackend};
use crate::config::{load_config, save_config, Config, GridParams, DEFAULT_CONFIG_PATH};
use crate::geometry::Point;
use crate::input::{ControlKey, InputEvent, InputListener};
use crate::preview::board_limits;
use crate::window::{
    detect_pixel_ratio, game_candidates, resolve_target, work_area, WindowFilter, WindowInfo,
    XcapLocator,
};

fn cli() -> Command {
    Command::new("memory-lens")
        .version("0.1.0")
        .about("Watches a memory board in a game window and replays each revealed tile")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Config file")
                .default_value(DEFAULT_CONFIG_PATH)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("window-title")
                .long("window-title")
                .value_name("TITLE")
                .help("Partial title of the game window, used when none is picked"),
        )
        // Grid values are taken as raw text so bad input falls back instead of aborting.
        .arg(Arg::new("rows").long("rows").value_name("N").help("Board cells vertically"))
        .arg(Arg::new("cols").long("cols").value_name("M").help("Board cells horizontally"))
        .arg(
            Arg::new("cell-size")
                .long("cell-size")
                .value_name("PX")
                .help("Side of each capture square"),
        )
        .arg(
            Arg::new("frames")
                .long("frames")
                .value_name("COUNT")
                .help("Frames captured per click")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("capture-interval")
                .long("capture-interval")
                .value_name("SECS")
                .help("Delay between captured frames")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("animation-interval")
                .long("animation-interval")
                .value_name("SECS")
                .help("Delay between replayed frames")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("workers")
                .long("workers")
                .value_name("COUNT")
                .help("Captures running at the same time")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("out-dir")
                .long("out-dir")
                .value_name("DIR")
                .help("Where board.png, click_map.png and corners.png are written")
                .default_value("memory_board")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("defaults")
                .long("defaults")
                .help("Start with the default corners instead of asking")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("skip-gate")
                .long("skip-gate")
                .help("Do not list game windows; look the target up by title")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("save-config")
                .long("save-config")
                .help("Write the effective config back to the config file")
                .action(ArgAction::SetTrue),
        )
}

/// Command-line values override the file; everything is sanitized afterwards.
fn apply_overrides(mut config: Config, matches: &ArgMatches) -> Config {
    if let Some(title) = matches.get_one::<String>("window-title") {
        config.target_window_title = title.clone();
    }
    let raw = |name: &str| matches.get_one::<String>(name).map(String::as_str);
    let params =
        GridParams::parse(raw("rows"), raw("cols"), raw("cell-size"), config.grid_params());
    config.set_grid_params(params);
    if let Some(frames) = matches.get_one::<usize>("frames") {
        config.capture_frames = *frames;
    }
    if let Some(secs) = matches.get_one::<f64>("capture-interval") {
        config.capture_interval_secs = *secs;
    }
    if let Some(secs) = matches.get_one::<f64>("animation-interval") {
        config.animation_interval_secs = *secs;
    }
    if let Some(workers) = matches.get_one::<usize>("workers") {
        config.max_capture_workers = *workers;
    }
    config.sanitized()
}

/// Lets the user pick a running game client. `None` means "anchor by title or screen".
fn select_game_window(locator: &XcapLocator, filter: &WindowFilter) -> Result<Option<WindowInfo>> {
    loop {
        let candidates = game_candidates(locator, filter);
        if !candidates.is_empty() {
            let labels: Vec<String> = candidates.iter().map(WindowInfo::label).collect();
            let picked = Select::new()
                .with_prompt("Game window")
                .items(&labels)
                .default(0)
                .interact()
                .context("Window selection aborted")?;
            return Ok(candidates.into_iter().nth(picked));
        }
        let choice = Select::new()
            .with_prompt(format!(
                "No '{}' window with '{}' in its title",
                filter.process_name, filter.title_marker
            ))
            .items(&["Retry", "Continue without a game window", "Quit"])
            .default(0)
            .interact()
            .context("Window selection aborted")?;
        match choice {
            0 => continue,
            1 => return Ok(None),
            _ => anyhow::bail!("No game window selected"),
        }
    }
}

fn ask_use_defaults() -> Result<bool> {
    let choice = Select::new()
        .with_prompt("Board corners")
        .items(&["Use default corners", "Configure the 4 corners"])
        .default(0)
        .interact()
        .context("Start choice aborted")?;
    Ok(choice == 0)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = cli().get_matches();
    let config_path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = apply_overrides(load_config(&config_path)?, &matches);
    if matches.get_flag("save-config") {
        save_config(&config_path, &config)?;
    }

    let pixel_ratio = detect_pixel_ratio();
    info!("Pixel ratio {}", pixel_ratio);

    // Gate
    let locator = XcapLocator::new(pixel_ratio);
    let selected = if matches.get_flag("skip-gate") {
        None
    } else {
        let filter = WindowFilter {
            process_name: config.process_name.clone(),
            title_marker: config.window_marker.clone(),
        };
        select_game_window(&locator, &filter)?
    };
    let target = resolve_target(&locator, selected.as_ref(), &config.target_window_title, || {
        capture_virtual_screen(pixel_ratio)
    })?;
    if target.window.is_none() {
        warn!("Window '{}' not found, using the whole screen", config.target_window_title);
    }

    let screen = work_area(pixel_ratio).unwrap_or(target.rect);
    let limits = board_limits(screen, config.memory_window_ratio);
    let out_dir = matches.get_one::<PathBuf>("out-dir").cloned();
    if let Some(dir) = &out_dir {
        info!("Writing board images to {}", dir.display());
    }
    let board = TileBoard::new(target.image, target.rect, out_dir)?;
    let backend = Arc::new(XcapBackend::new(pixel_ratio));

    let (mut app, mut inbox) = App::new(config, target.rect, pixel_ratio, backend, board, limits)?;
    app.window_selected()?;

    // Start
    if matches.get_flag("defaults") || ask_use_defaults()? {
        app.use_defaults()?;
    } else {
        app.enter_config()?;
    }

    // Hooked only now, so keys typed into the prompts are not replayed.
    let listener = InputListener::spawn(inbox.input_sender());
    let interrupt = inbox.input_sender();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let quit = InputEvent::Key { key: ControlKey::Quit, pointer: Point::default() };
            let _ = interrupt.send(quit);
        }
    });

    let result = app::run(&mut app, &mut inbox).await;
    listener.stop();
    info!("Stopped");
    result
}
