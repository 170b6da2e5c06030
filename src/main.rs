// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Command-line entry point: `vest-daemon start|stop|status|ping`.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info};
use tokio::signal;

use vest_daemon::lifecycle::{self, DEFAULT_HOST, DEFAULT_PORT};
use vest_daemon::service::spawn_service;
use vest_daemon::Daemon;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    about = "Centralized haptic-vest control daemon"
)]
struct Cli {
    /// Host the daemon listens on (or targets, for stop/status/ping).
    #[arg(long, global = true, default_value = DEFAULT_HOST)]
    host: String,

    /// Port the daemon listens on (or targets, for stop/status/ping).
    #[arg(long, global = true, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon in the foreground.
    Start,
    /// Stop a running daemon.
    Stop {
        /// Send SIGKILL immediately instead of waiting for graceful SIGTERM shutdown.
        #[arg(long)]
        force: bool,
    },
    /// Report whether a daemon is running.
    Status,
    /// Send a `ping` command to a running daemon and print its response.
    Ping,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match &cli.command {
        Command::Start => cmd_start(&cli.host, cli.port).await,
        Command::Stop { force } => cmd_stop(&cli.host, cli.port, *force),
        Command::Status => cmd_status(&cli.host, cli.port),
        Command::Ping => cmd_ping(&cli.host, cli.port),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn cmd_start(host: &str, port: u16) -> anyhow::Result<()> {
    lifecycle::acquire(host, port)?;

    let host_owned = host.to_owned();
    let handle = spawn_service(move |stop| async move {
        let daemon = Daemon::new();
        if let Err(e) = daemon.run(&host_owned, port, stop).await {
            error!("daemon exited with error: {e}");
        }
    });

    signal::ctrl_c().await.ok();
    info!("ctrl-c received, shutting down");
    handle.shutdown_timeout(Duration::from_secs(2)).await.ok();
    lifecycle::release(port);
    Ok(())
}

fn cmd_stop(host: &str, port: u16, force: bool) -> anyhow::Result<()> {
    let (running, pid) = lifecycle::status(host, port);
    let Some(pid) = pid.filter(|_| running) else {
        println!("not running");
        return Ok(());
    };

    #[cfg(unix)]
    {
        let signal = if force { libc::SIGKILL } else { libc::SIGTERM };
        unsafe {
            libc::kill(pid as libc::pid_t, signal);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (pid, force);
        anyhow::bail!("stopping by pid is only supported on unix");
    }

    println!("stop signal sent to pid {pid}");
    Ok(())
}

fn cmd_status(host: &str, port: u16) -> anyhow::Result<()> {
    let (running, pid) = lifecycle::status(host, port);
    match pid {
        Some(pid) => println!("running={running} pid={pid}"),
        None => println!("running={running}"),
    }
    if running {
        Ok(())
    } else {
        anyhow::bail!("daemon not running")
    }
}

fn cmd_ping(host: &str, port: u16) -> anyhow::Result<()> {
    let mut stream = TcpStream::connect((host, port))?;
    stream.write_all(b"{\"cmd\":\"ping\"}\n")?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    println!("{}", line.trim());
    Ok(())
}
