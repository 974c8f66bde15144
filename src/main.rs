//! YantraIO - cube robot fleet daemon
//!
//! ## Control Protocol
//!
//! - **stdin/stdout**: one JSON request per line in, one JSON reply per line out.
//!   Fleet events are interleaved as `{"event": {...}}` lines.
//! - **TCP (optional, `[control] tcp_bind_address`)**: the same JSON-lines
//!   protocol, one thread per client.

use std::env;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};
use yantra_io::control::ControlHub;
use yantra_io::{AppConfig, Error, Result};

/// Parse config path from command line arguments.
///
/// Supports:
/// - `yantra-io <path>` (positional)
/// - `yantra-io --config <path>` (flag-based)
/// - `yantra-io -c <path>` (short flag)
///
/// Without a path the built-in defaults are used.
fn parse_config_path() -> Option<String> {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return Some(args[1].clone());
    }

    None
}

/// Write one JSON line to stdout.
fn print_line(value: &Value) {
    let mut out = io::stdout().lock();
    if writeln!(out, "{}", value).and_then(|_| out.flush()).is_err() {
        log::warn!("stdout closed, dropping output");
    }
}

fn serve_client(stream: TcpStream, hub: Arc<ControlHub>, running: Arc<AtomicBool>) -> Result<()> {
    let peer = stream.peer_addr()?;
    let mut writer = stream.try_clone()?;
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        if !running.load(Ordering::Relaxed) {
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = hub.handle_line(&line);
        writeln!(writer, "{}", reply)?;
        writer.flush()?;
    }
    log::info!("Control client disconnected: {}", peer);
    Ok(())
}

fn main() -> Result<()> {
    let config_path = parse_config_path();
    let config = match AppConfig::load(config_path.as_deref().map(Path::new)) {
        Ok(config) => config,
        Err(e) => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .init();
            log::error!("Failed to load config: {}", e);
            return Err(e);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("YantraIO v{} starting...", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => log::info!("Using config: {}", path),
        None => log::info!("Using built-in configuration"),
    }

    let hub = Arc::new(ControlHub::from_config(&config)?);

    // Set up shutdown signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    // Fleet events → stdout
    let events = hub.subscribe();
    let events_running = Arc::clone(&running);
    thread::Builder::new()
        .name("fleet-events".to_string())
        .spawn(move || {
            while events_running.load(Ordering::Relaxed) {
                if let Some(event) = events.recv_timeout(Duration::from_millis(100)) {
                    print_line(&json!({ "event": event }));
                }
            }
        })
        .map_err(|e| Error::Other(format!("Failed to spawn event thread: {}", e)))?;

    // stdin requests
    let tcp_enabled = config.control.tcp_enabled();
    let stdin_hub = Arc::clone(&hub);
    let stdin_running = Arc::clone(&running);
    thread::Builder::new()
        .name("stdin-control".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                print_line(&stdin_hub.handle_line(&line));
            }
            log::info!("stdin closed");
            if !tcp_enabled {
                stdin_running.store(false, Ordering::Relaxed);
            }
        })
        .map_err(|e| Error::Other(format!("Failed to spawn stdin thread: {}", e)))?;

    if tcp_enabled {
        let bind_addr = &config.control.tcp_bind_address;
        let listener = TcpListener::bind(bind_addr)
            .map_err(|e| Error::Other(format!("Failed to bind to {}: {}", bind_addr, e)))?;
        if let Err(e) = listener.set_nonblocking(true) {
            log::warn!("Failed to set nonblocking mode: {}", e);
        }
        log::info!("Control server listening on {}", bind_addr);
        log::info!("YantraIO running. Press Ctrl-C to stop.");

        while running.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nonblocking(false) {
                        log::error!("Failed to set socket to blocking mode: {}", e);
                        continue;
                    }
                    log::info!("Control client connected: {}", addr);
                    let client_hub = Arc::clone(&hub);
                    let client_running = Arc::clone(&running);
                    let spawned = thread::Builder::new()
                        .name("control-client".to_string())
                        .spawn(move || {
                            if let Err(e) = serve_client(stream, client_hub, client_running) {
                                log::error!("Control client error: {}", e);
                            }
                        });
                    if let Err(e) = spawned {
                        log::error!("Failed to spawn client thread: {}", e);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    log::error!("Accept error: {}", e);
                }
            }
        }
    } else {
        log::info!("YantraIO running on stdin/stdout. Press Ctrl-C to stop.");
        while running.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(50));
        }
    }

    log::info!("Shutting down...");
    hub.shutdown();
    log::info!("YantraIO stopped");
    Ok(())
}
