// Duochat Linux: line-based chat with one peer over TCP.

mod config;
mod transport;
mod ui;

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::Context;
use duochat_core::{ConnectionState, Hello, SessionController};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::transport::TcpTransport;
use crate::ui::Command;

const VERSION: &str = env!("CARGO_PKG_VERSION");

type Controller = SessionController<TcpTransport>;

fn main() -> anyhow::Result<()> {
    let mut config_path = None;
    let mut connect = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("duochat-linux {}", VERSION);
                return Ok(());
            }
            "--config" | "-c" => {
                config_path = Some(PathBuf::from(args.next().context("--config needs a path")?));
            }
            "--connect" => connect = Some(args.next().context("--connect needs a peer")?),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    // Chat goes to stdout; logs stay on stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load(config_path.as_deref())?;
    let session = cfg.session_config();
    let hello = Hello::new(session.service_id, session.service_name.clone());
    let transport = TcpTransport::new(cfg.bind_addr(), hello);

    let rt = tokio::runtime::Runtime::new()?;
    let (controller, mut events) =
        SessionController::with_runtime(transport, session, rt.handle().clone());
    tracing::info!(name = %cfg.name, addr = %cfg.bind_addr(), "duochat starting");
    println!("{}", ui::status_line(ConnectionState::Idle, None));
    controller.start();
    if let Some(target) = connect {
        controller.connect(cfg.resolve_peer(&target));
    }

    let (quit_tx, mut quit_rx) = mpsc::unbounded_channel::<()>();
    let input = controller.clone();
    std::thread::Builder::new()
        .name("duochat-input".into())
        .spawn(move || read_input(input, cfg, quit_tx))
        .context("spawning input thread")?;

    rt.block_on(async {
        let mut transcript = ui::Transcript::new();
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    for line in transcript.render(&event) {
                        println!("{line}");
                    }
                }
                // Sent on /quit, or dropped when stdin closes.
                _ = quit_rx.recv() => break,
                res = &mut shutdown => {
                    res?;
                    break;
                }
            }
        }
        anyhow::Ok(())
    })?;

    controller.stop();
    Ok(())
}

/// Blocking stdin loop. Controller calls are synchronous, so this thread drives it directly.
fn read_input(controller: Controller, cfg: config::Config, quit: mpsc::UnboundedSender<()>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                break;
            }
        };
        match Command::parse(&line) {
            Command::Empty => println!("{}", ui::EMPTY_INPUT_NOTICE),
            Command::Send(text) => {
                if controller.state() != ConnectionState::Connected {
                    println!("{}", ui::NOT_CONNECTED_NOTICE);
                } else {
                    controller.write(text.as_bytes());
                }
            }
            Command::Connect(target) => controller.connect(cfg.resolve_peer(&target)),
            Command::Peers => {
                for entry in ui::peer_list(&cfg.peers) {
                    println!("{entry}");
                }
            }
            Command::Status => {
                let peer = controller.peer();
                println!(
                    "{}",
                    ui::status_line(controller.state(), peer.as_ref().map(|p| p.name()))
                );
            }
            Command::Start => controller.start(),
            Command::Stop => controller.stop(),
            Command::Help => println!("{}", ui::HELP),
            Command::Unknown(cmd) => println!("unknown command {cmd}; try /help"),
            Command::Quit => break,
        }
    }
    let _ = quit.send(());
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
