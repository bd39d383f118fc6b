use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tether_client::connect::{SpawnLauncher, connect};
use tether_client::session::Session;
use tether_client::{default_socket_path, flags, handshake, signals};

#[derive(Parser)]
#[command(name = "tether", about = "Attach to a tether session")]
struct Args {
    /// Server socket path (defaults to the per-user socket directory)
    #[arg(short = 'S', long)]
    socket: Option<PathBuf>,
    /// Do not start a server when none is running
    #[arg(long)]
    no_start: bool,
    /// Server program to launch when autostarting
    #[arg(long, default_value = "tetherd")]
    server: PathBuf,
    /// Attach without sending input to the session
    #[arg(short = 'r', long)]
    read_only: bool,
    /// Treat the terminal as UTF-8 capable regardless of locale
    #[arg(short = 'u', long)]
    utf8: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match run(Args::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("tether: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    signals::init().context("signal setup failed")?;

    let path = args.socket.unwrap_or_else(default_socket_path);
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).context("failed to create socket directory")?;
        }
    }

    let launcher = SpawnLauncher::new(&args.server);
    let stream = connect(&path, !args.no_start, &launcher)?;

    let mut client_flags = 0;
    if args.read_only {
        client_flags |= flags::READ_ONLY;
    }
    if args.utf8 {
        client_flags |= flags::FORCE_UTF8;
    }

    let mut session = Session::new(path, stream, &signals::FLAGS);
    handshake::send_identify(client_flags, session.outbound_mut())?;
    session.run()?;

    println!("{}", session.status_line());
    Ok(ExitCode::from(session.exit_code()))
}
