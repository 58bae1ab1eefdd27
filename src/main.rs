//! Chromium Bridge - Main Entry Point
//!
//! Drives one browser session end to end: load configuration, create the
//! browser, report lifecycle events, then close and shut the engine down on
//! Ctrl+C or after `--hold` seconds.

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::LocalSet;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chromium_bridge::{
    browser::{BrowserHost, BrowserObserver, CloseOutcome, Engine, LifecycleEvent},
    config::{BridgeSettings, CliArgs},
    process::HelperProcessReaper,
    PresentationMode, NAME, VERSION,
};

/// ANSI color codes for terminal output
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const BLUE: &str = "\x1b[34m";
}

/// Print configuration summary
fn print_config_summary(settings: &BridgeSettings) {
    eprintln!(
        "{bold}{blue}{} {}{reset}",
        NAME,
        VERSION,
        bold = colors::BOLD,
        blue = colors::BLUE,
        reset = colors::RESET
    );
    eprintln!(
        "  {dim}Start URL:{reset}      {}",
        settings.start_url,
        dim = colors::DIM,
        reset = colors::RESET
    );
    eprintln!(
        "  {dim}Mode:{reset}           {}",
        settings.default_mode,
        dim = colors::DIM,
        reset = colors::RESET
    );
    eprintln!(
        "  {dim}Window Size:{reset}    {}x{}",
        settings.window_width,
        settings.window_height,
        dim = colors::DIM,
        reset = colors::RESET
    );
    eprintln!(
        "  {dim}Pump:{reset}           {} Hz",
        settings.pump_hz,
        dim = colors::DIM,
        reset = colors::RESET
    );
    eprintln!(
        "  {dim}Close Timeout:{reset}  {}ms",
        settings.close_timeout_ms,
        dim = colors::DIM,
        reset = colors::RESET
    );
    eprintln!(
        "  {dim}Helper Reaping:{reset} {}",
        if settings.reap_enabled {
            format!(
                "{green}enabled ({}ms grace){reset}",
                settings.reap_grace_ms,
                green = colors::GREEN,
                reset = colors::RESET
            )
        } else {
            format!("{yellow}disabled{reset}", yellow = colors::YELLOW, reset = colors::RESET)
        },
        dim = colors::DIM,
        reset = colors::RESET
    );
    eprintln!();
}

/// Build the CLI command parser
fn build_cli() -> Command {
    Command::new(NAME)
        .version(VERSION)
        .about("Hosts one embedded browser with bounded, leak-free teardown")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to configuration file (TOML or JSON)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("url")
                .short('u')
                .long("url")
                .value_name("URL")
                .help("URL to open"),
        )
        .arg(
            Arg::new("standalone")
                .long("standalone")
                .help("Open the browser in its own top-level window")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("hold")
                .long("hold")
                .value_name("SECS")
                .help("Close after this many seconds instead of waiting for Ctrl+C")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("close-timeout")
                .long("close-timeout")
                .value_name("MS")
                .help("Graceful close deadline in milliseconds (default: 3000)")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("pump-hz")
                .long("pump-hz")
                .value_name("HZ")
                .help("Message pump frequency (default: 30)")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("no-reap")
                .long("no-reap")
                .help("Do not terminate leftover helper processes after a force release")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .value_name("PIXELS")
                .help("Browser width")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("height")
                .long("height")
                .value_name("PIXELS")
                .help("Browser height")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("json-events")
                .long("json-events")
                .help("Print lifecycle events as JSON lines on stdout")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Suppress output except errors")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose"),
        )
}

/// Parse CLI arguments into CliArgs struct
fn parse_cli_args(matches: &clap::ArgMatches) -> CliArgs {
    let mut args = CliArgs::default();

    args.config_file = matches.get_one::<PathBuf>("config").cloned();
    args.url = matches.get_one::<String>("url").cloned();
    args.close_timeout_ms = matches.get_one::<u64>("close-timeout").copied();
    args.pump_hz = matches.get_one::<u32>("pump-hz").copied();
    args.width = matches.get_one::<u32>("width").copied();
    args.height = matches.get_one::<u32>("height").copied();

    if matches.get_flag("standalone") {
        args.mode = Some(PresentationMode::Standalone);
    }
    if matches.get_flag("no-reap") {
        args.reap_enabled = Some(false);
    }

    args
}

/// Initialize the tracing/logging subsystem
fn init_tracing(verbosity: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbosity {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so `--json-events` output stays machine-readable.
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

/// Reports lifecycle callbacks as log lines or JSON lines.
struct ConsoleObserver {
    json: bool,
}

impl ConsoleObserver {
    fn emit(&self, event: LifecycleEvent) {
        if self.json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to serialize lifecycle event: {}", e),
            }
        } else {
            info!("Browser event: {:?}", event);
        }
    }
}

impl BrowserObserver for ConsoleObserver {
    fn on_load_start(&self) {
        self.emit(LifecycleEvent::LoadStarted);
    }

    fn on_load_progress(&self, progress: f64) {
        self.emit(LifecycleEvent::LoadProgress { progress });
    }

    fn on_load_finish(&self) {
        self.emit(LifecycleEvent::LoadFinished);
    }

    fn on_url_changed(&self, url: &str) {
        self.emit(LifecycleEvent::UrlChanged {
            url: url.to_string(),
        });
    }

    fn on_title_changed(&self, title: &str) {
        self.emit(LifecycleEvent::TitleChanged {
            title: title.to_string(),
        });
    }

    fn on_browser_closed(&self) {
        self.emit(LifecycleEvent::BrowserClosed);
    }
}

#[cfg(feature = "cef-browser")]
fn build_engine() -> Rc<dyn Engine> {
    info!("Using CEF engine backend");
    Rc::new(chromium_bridge::browser::CefEngine::new())
}

#[cfg(not(feature = "cef-browser"))]
fn build_engine() -> Rc<dyn Engine> {
    warn!("Built without the cef-browser feature; using the mock engine");
    Rc::new(chromium_bridge::browser::MockEngine::new())
}

fn build_reaper(settings: &BridgeSettings) -> HelperProcessReaper {
    let reaper = HelperProcessReaper::new();
    match settings.helper_executable {
        Some(ref path) => reaper.with_helper_executable(path.to_string_lossy().into_owned()),
        None => reaper,
    }
}

/// Waits for Ctrl+C, or for `hold` if given (Ctrl+C still wins earlier).
async fn wait_for_close(hold: Option<Duration>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };

    match hold {
        Some(hold) => {
            info!("Holding the browser open for {:?}", hold);
            tokio::select! {
                _ = tokio::time::sleep(hold) => info!("Hold period elapsed"),
                _ = ctrl_c => info!("Received shutdown signal"),
            }
        }
        None => {
            info!("Browser is running. Press Ctrl+C to close it.");
            ctrl_c.await;
            info!("Received shutdown signal");
        }
    }
}

async fn run_session(settings: BridgeSettings, hold: Option<Duration>, json: bool) -> Result<()> {
    let host = BrowserHost::new(
        build_engine(),
        Arc::new(build_reaper(&settings)),
        settings.lifecycle_options(),
    );

    let observer: Rc<dyn BrowserObserver> = Rc::new(ConsoleObserver { json });
    host.set_observer(Rc::downgrade(&observer));

    let view = host
        .create_browser(
            &settings.start_url,
            settings.initial_frame(),
            settings.default_mode,
        )
        .await;

    let Some(view) = view else {
        host.shutdown().await;
        anyhow::bail!("Failed to create a browser for {}", settings.start_url);
    };
    info!("Browser ready (session {})", view.session());

    wait_for_close(hold).await;

    match host.close_browser().await {
        CloseOutcome::Completed => info!("Browser closed gracefully"),
        CloseOutcome::ForceReleased => warn!(
            "Browser did not close within {}ms and was force-released",
            settings.close_timeout_ms
        ),
        CloseOutcome::NoBrowser => info!("Browser was already gone"),
        CloseOutcome::Coalesced => info!("Close already in progress"),
    }

    host.shutdown().await;
    drop(observer);
    Ok(())
}

/// Main application entry point
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    let verbosity = matches.get_count("verbose");
    let quiet = matches.get_flag("quiet");
    init_tracing(verbosity, quiet);

    let cli_args = parse_cli_args(&matches);
    let settings = cli_args
        .load_settings()
        .context("Failed to load configuration")?;

    if !quiet {
        print_config_summary(&settings);
    }

    let hold = matches.get_one::<u64>("hold").copied().map(Duration::from_secs);
    let json = matches.get_flag("json-events");

    LocalSet::new()
        .run_until(run_session(settings, hold, json))
        .await?;

    info!("{} stopped", NAME);
    Ok(())
}
