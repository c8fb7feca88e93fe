//! Broker demo serving simulated signals over the line protocol
//!
//! Run with: cargo run --example simple_server [BIND_ADDR] [NOTIFY_CONFIG]
//!
//! Examples:
//!   cargo run --example simple_server                    # binds to 0.0.0.0:8787
//!   cargo run --example simple_server localhost          # binds to 127.0.0.1:8787
//!   cargo run --example simple_server 127.0.0.1:9000     # binds to 127.0.0.1:9000
//!   cargo run --example simple_server localhost notify.ini
//!
//! ## Talking to it
//!
//! With netcat:
//!   nc localhost 8787
//!   SUB sim:sine?rate=1&precision=2
//!   SUB sim:counter?scale=10&offset=-1
//!   GET sim:square
//!   UNSUB sim:sine?rate=1&precision=2
//!
//! Every update comes back as one JSON line keyed by the requested URL.
//!
//! ## Signals
//!
//! `sim:sine`, `sim:square`, `sim:sawtooth` (alias `sim:ramp`) and
//! `sim:counter`, all updating every 100ms.
//!
//! ## Notifications
//!
//! Pass an INI file to log updates through the `log` channel, e.g.
//!
//! ```text
//! [sim:counter?rate=0.2]
//! log = ops, oncall (2030-01-01)
//! ```

use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use pvbroker::device::SimulatedDriver;
use pvbroker::notify::{ConfigWatcher, LogChannel, Notifier};
use pvbroker::server::DEFAULT_PORT;
use pvbroker::{Broker, BrokerServer, ServerConfig};
use tokio::task::LocalSet;

/// Parse bind address from command line argument
///
/// Accepts formats:
/// - "localhost" -> 127.0.0.1:8787
/// - "localhost:9000" -> 127.0.0.1:9000
/// - "127.0.0.1" -> 127.0.0.1:8787
/// - "0.0.0.0:9000" -> 0.0.0.0:9000
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: simple_server [BIND_ADDR] [NOTIFY_CONFIG]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR      Address to bind to (default: 0.0.0.0:{})", DEFAULT_PORT);
    eprintln!("  NOTIFY_CONFIG  Notifier configuration file, reloaded when it changes");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  simple_server                     # binds to 0.0.0.0:{}", DEFAULT_PORT);
    eprintln!("  simple_server localhost           # binds to 127.0.0.1:{}", DEFAULT_PORT);
    eprintln!("  simple_server 127.0.0.1:9000      # binds to 127.0.0.1:9000");
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let config = match args.get(1) {
        Some(addr_str) => match parse_bind_addr(addr_str) {
            Ok(addr) => ServerConfig::with_addr(addr),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };
    let notify_config = args.get(2).cloned();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pvbroker=debug".parse()?)
                .add_directive("simple_server=debug".parse()?),
        )
        .init();

    println!("Starting broker on {}", config.bind_addr);
    println!();
    println!("nc {} {}", config.bind_addr.ip(), config.bind_addr.port());
    println!("SUB sim:sine?rate=1&precision=2");
    println!();

    let local = LocalSet::new();
    local
        .run_until(async move {
            let broker = Rc::new(Broker::new());
            let driver = SimulatedDriver::new()
                .update_interval(Duration::from_millis(100))
                .amplitude(10.0)
                .precision(3)
                .units("mA");
            broker.add_driver("sim", Rc::new(driver))?;

            let watcher = notify_config.map(|path| {
                let mut watcher = ConfigWatcher::new(path);
                watcher.add_notifier(Notifier::new(
                    Rc::clone(&broker),
                    Rc::new(LogChannel::default()),
                ));
                watcher.spawn()
            });

            let server = BrokerServer::new(config, Rc::clone(&broker));

            tokio::select! {
                result = server.run() => {
                    if let Err(e) = result {
                        eprintln!("Server error: {}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    println!("\nShutting down...");
                }
            }

            if let Some(watcher) = watcher {
                watcher.abort();
            }
            broker.shutdown();
            Ok::<_, Box<dyn std::error::Error>>(())
        })
        .await
}
