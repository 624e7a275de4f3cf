// src/cli.rs

use crate::core::capabilities::{AccessError, Capabilities, capability_location};
use crate::core::override_resolver::EnvOverrides;
use crate::core::settings::Settings;
use crate::state;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::io::Write;
use std::path::PathBuf;

/// atd: inspect the capabilities a distributed Appium run will see.
///
/// Capabilities are read from `caps/capabilities.json` in the working directory,
/// or from the file named by the `CAPS` setting (environment or `atd.toml`).
/// Every leaf can be replaced by an `atd_<path>` environment variable, e.g.
/// `atd_android_app_local=/tmp/app.apk`.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Read this capability file instead of locating one.
    #[arg(long, short, global = true)]
    pub file: Option<PathBuf>,

    /// What to show.
    #[command(subcommand)]
    pub command: Command,
}

/// The subcommands of `atd`.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Prints the resolved capability tree as JSON.
    Caps,
    /// Shows the Appium server settings of a host machine.
    Host {
        /// The `machineIP` of the host.
        ip: String,
        /// Print only this property.
        property: Option<String>,
    },
    /// Lists the `atd*` environment variables that override capabilities.
    Overrides,
    /// Prints the path of the capability file that would be loaded.
    Where,
}

/// Runs one command, writing its output to `out`.
pub fn run(cli: Cli, out: &mut dyn Write) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);
    match &cli.command {
        Command::Overrides => return print_overrides(&EnvOverrides::from_env(), out),
        Command::Where => {
            let path = match cli.file {
                Some(path) => path,
                None => {
                    let working_dir = std::env::current_dir()
                        .context("Could not determine the working directory")?;
                    capability_location(&working_dir, &Settings::load(&working_dir)?)?
                }
            };
            writeln!(out, "{}", path.display())?;
            return Ok(());
        }
        Command::Caps | Command::Host { .. } => {}
    }

    let loaded;
    let caps = match &cli.file {
        Some(path) => {
            loaded = Capabilities::load(path, &EnvOverrides::from_env())?;
            &loaded
        }
        None => state::capabilities()?,
    };

    match cli.command {
        Command::Caps => print_tree(caps, out),
        Command::Host {
            ip,
            property: Some(property),
        } => {
            writeln!(out, "{}", caps.server_property(&ip, &property)?)?;
            Ok(())
        }
        Command::Host { ip, property: None } => print_host(caps, &ip, out),
        Command::Overrides | Command::Where => Ok(()),
    }
}

fn print_tree(caps: &Capabilities, out: &mut dyn Write) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, caps.tree())?;
    writeln!(out)?;
    Ok(())
}

fn print_host(caps: &Capabilities, ip: &str, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "\n--- Host '{}' ---", ip.yellow())?;
    let show = |value: Result<String, AccessError>| match value {
        Ok(v) => v,
        Err(AccessError::HostPropertyNotFound { .. }) => {
            "<not set>".dimmed().to_string()
        }
        Err(e) => e.to_string().red().to_string(),
    };
    writeln!(
        out,
        "  {:<22} {}",
        "Appium server path:".blue(),
        show(caps.appium_server_path(ip))
    )?;
    writeln!(
        out,
        "  {:<22} {}",
        "Appium port:".blue(),
        show(caps.appium_server_port(ip))
    )?;
    writeln!(
        out,
        "  {:<22} {}",
        "Remote manager port:".blue(),
        caps.remote_manager_port(ip)
    )?;
    writeln!(out, "  {:<22} {}", "Cloud:".blue(), caps.is_cloud(ip))?;
    Ok(())
}

fn print_overrides(overrides: &EnvOverrides, out: &mut dyn Write) -> Result<()> {
    if overrides.is_empty() {
        writeln!(out, "{}", "No capability overrides are set.".dimmed())?;
        return Ok(());
    }
    for (name, value) in overrides.sorted() {
        writeln!(out, "{}={}", name.green(), value)?;
    }
    Ok(())
}
