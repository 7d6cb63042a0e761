// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{CommandFactory, FromArgMatches, Parser};

#[derive(Parser)]
#[command(
    name = "jobserverd",
    version,
    about,
    long_about = None,
    after_help = "jobserverd server\n\
\n\
Configuration precedence: defaults < config file < command-line flags.\n\
Config path precedence: defaults < JOBSERVER_CONFIG_PATH < command-line flags.\n\
If --config is omitted, jobserverd tries JOBSERVER_CONFIG_PATH, then the default config file location; a missing default config is OK."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, jobserverd uses JOBSERVER_CONFIG_PATH if set, otherwise the default config file location if available."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Path to the SQLite database file. Overrides `database_path` from the config file."
    )]
    pub database_path: Option<PathBuf>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Directory for stored job outputs. Overrides `storage_path` from the config file."
    )]
    pub storage_path: Option<PathBuf>,
    #[arg(
        long,
        value_name = "PORT",
        help = "Port to bind the RPC surface on. Overrides `port` from the config file."
    )]
    pub port: Option<u16>,
    #[arg(
        short,
        long,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging and include logs from dependencies. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
}

pub fn parse_opts() -> ParsedOpts {
    let cmd = Opts::command();
    let matches = cmd.get_matches();
    let verbose_override = if matches.get_flag("verbose") {
        Some(true)
    } else {
        None
    };
    let opts = Opts::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    ParsedOpts {
        opts,
        verbose_override,
    }
}
