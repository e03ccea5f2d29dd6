// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! socketley: CLI client for the Socketley daemon.
//!
//! Thin by design: every subcommand renders one control line, sends it
//! over the daemon socket, prints the reply body, and exits with the
//! reply's status byte.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod daemon_cmd;

use anyhow::Result;
use clap::{Parser, Subcommand};
use socketley_wire::Command;

use client::DaemonClient;

#[derive(Parser)]
#[command(name = "socketley", version, about = "Manage the Socketley runtime fleet")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Create a runtime (server | client | proxy | cache)
    Create {
        #[arg(value_name = "TYPE")]
        kind: String,
        name: String,
        /// Initial configuration as key=value pairs
        #[arg(value_name = "KEY=VALUE")]
        options: Vec<String>,
    },
    /// Start runtimes (name accepts globs)
    Start {
        name: String,
        /// Attach interactively after starting
        #[arg(short = 'i', long)]
        interactive: bool,
    },
    /// Stop runtimes
    Stop { name: String },
    /// Stop and delete runtimes
    Remove { name: String },
    /// List all runtimes
    Ls,
    /// List running runtimes with counters
    Ps,
    /// Send a line into a runtime
    Send {
        name: String,
        #[arg(trailing_var_arg = true, required = true)]
        text: Vec<String>,
    },
    /// Change configuration (key=value pairs; name=<new> renames)
    Edit {
        name: String,
        #[arg(value_name = "KEY=VALUE", required = true)]
        options: Vec<String>,
    },
    /// Print one runtime's configuration as JSON
    Show { name: String },
    /// Print configurations as a JSON array
    Dump { pattern: Option<String> },
    /// Create a runtime from a spec file
    Import { path: String },
    /// Run a runtime-specific action
    Action {
        name: String,
        verb: String,
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Show counters
    Stats { pattern: Option<String> },
    /// Re-read persisted configuration from disk
    Reload,
    /// Reload scripting hooks
    ReloadLua,
    /// Set a runtime's owner (use '-' to clear) and child policy
    Owner {
        child: String,
        owner: String,
        #[arg(value_parser = ["stop", "remove"])]
        policy: Option<String>,
    },
    /// Register an external (foreign-process) runtime
    Attach { name: String, port: u16, pid: u32 },
    /// Manage the daemon process
    Daemon {
        #[command(subcommand)]
        command: daemon_cmd::DaemonCommand,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("socketley: {:#}", error);
            std::process::exit(2);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let command = match cli.command {
        Cmd::Daemon { command } => return daemon_cmd::run(command).await,
        Cmd::Create { kind, name, options } => {
            Command::Create { kind, name, options: parse_pairs(&options)? }
        }
        Cmd::Start { name, interactive } => Command::Start { pattern: name, interactive },
        Cmd::Stop { name } => Command::Stop { pattern: name },
        Cmd::Remove { name } => Command::Remove { pattern: name },
        Cmd::Ls => Command::Ls,
        Cmd::Ps => Command::Ps,
        Cmd::Send { name, text } => Command::Send { name, text: text.join(" ") },
        Cmd::Edit { name, options } => {
            Command::Edit { pattern: name, options: parse_pairs(&options)? }
        }
        Cmd::Show { name } => Command::Show { name },
        Cmd::Dump { pattern } => Command::Dump { pattern },
        Cmd::Import { path } => Command::Import { path },
        Cmd::Action { name, verb, args } => {
            Command::Action { name, verb, args: args.join(" ") }
        }
        Cmd::Stats { pattern } => Command::Stats { pattern },
        Cmd::Reload => Command::Reload,
        Cmd::ReloadLua => Command::ReloadLua,
        Cmd::Owner { child, owner, policy } => Command::Owner { child, owner, policy },
        Cmd::Attach { name, port, pid } => Command::Attach { name, port, pid },
    };

    let line = command.encode();
    if matches!(command, Command::Start { interactive: true, .. }) {
        let client = DaemonClient::connect().await?;
        let status = client.interactive(&line).await?;
        return Ok(status.byte() as i32);
    }

    let mut client = DaemonClient::connect().await?;
    let (status, body) = client.exec(&line).await?;
    if !body.is_empty() {
        if status == socketley_wire::CmdStatus::Ok {
            println!("{}", body.trim_end_matches('\n'));
        } else {
            eprintln!("{}", body.trim_end_matches('\n'));
        }
    }
    Ok(status.byte() as i32)
}

fn parse_pairs(options: &[String]) -> Result<Vec<(String, String)>> {
    options
        .iter()
        .map(|option| match option.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                Ok((key.to_string(), value.to_string()))
            }
            _ => anyhow::bail!("expected key=value, got: {}", option),
        })
        .collect()
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
