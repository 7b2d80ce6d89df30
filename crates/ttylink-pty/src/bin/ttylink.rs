//! Drive an agent session from a local terminal.
//!
//! Stdin lines go to the agent through the engine; drained fragments print to
//! stdout. This is the manual exercise path for the engine — real transports
//! consume the library directly.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ttylink_pty::{
    AgentProfile, LaunchSpec, Phase, ProfileRegistry, SessionConfig, SessionEngine,
};

#[derive(Parser, Debug)]
#[command(name = "ttylink", about = "Bridge a terminal to an interactive CLI agent")]
struct Args {
    /// Agent profile key from the registry.
    #[arg(long, default_value = "cline")]
    agent: String,

    /// Extra profiles to load (JSON array of profile records).
    #[arg(long)]
    profiles: Option<PathBuf>,

    /// Working directory for the agent.
    #[arg(long, default_value = ".")]
    cwd: PathBuf,

    /// Override the agent command entirely (ignores the profile's launch
    /// spec; everything after `--` are arguments).
    #[arg(last = true)]
    command: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut registry = ProfileRegistry::with_builtins();
    if let Some(path) = &args.profiles {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading profiles from {}", path.display()))?;
        registry.load_json(&json).context("parsing profile JSON")?;
    }

    let profile = if args.command.is_empty() {
        registry
            .get(&args.agent)
            .cloned()
            .with_context(|| format!("unknown agent profile: {}", args.agent))?
    } else {
        let mut launch = LaunchSpec::new(args.command[0].clone());
        launch.args = args.command[1..].to_vec();
        AgentProfile::generic(launch)
    };

    let cwd = args.cwd.canonicalize().context("resolving --cwd")?;
    let mut engine = SessionEngine::new(SessionConfig::new(profile, cwd));
    let info = engine.start()?;
    eprintln!("session {} (pid {}) — /stop to quit", info.id, info.pid);

    // Stdin lines arrive on a channel so the main loop can keep draining.
    let (line_tx, line_rx) = mpsc::channel::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    loop {
        for chunk in engine.drain() {
            print!("{}", chunk.text);
            if !chunk.text.ends_with('\n') {
                println!();
            }
        }

        let status = engine.status();
        if status.phase == Phase::Stopped {
            match status.exit_code {
                Some(0) | None => break,
                Some(code) => bail!("agent exited with code {code}"),
            }
        }

        match line_rx.recv_timeout(Duration::from_millis(250)) {
            Ok(line) => match line.trim() {
                "/stop" => {
                    engine.stop();
                    break;
                }
                "/cancel" => engine.cancel()?,
                "/status" => {
                    eprintln!("{}", serde_json::to_string(&engine.status())?);
                }
                _ => engine.send(&line)?,
            },
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                engine.stop();
                break;
            }
        }
    }

    Ok(())
}
