//! `config get`, `config set`, `config list` and `config path`.

use std::fmt::Write as _;

use assetpatch::config::{config_file_path, ConfigFile, ConfigKey};
use clap::Subcommand;

use super::load_config;
use crate::error::CliError;

const NOT_SET: &str = "(not set)";

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print one setting
    Get {
        /// Setting as section.key (e.g. remote.main_url)
        key: String,
    },

    /// Change one setting and save config.ini
    Set {
        /// Setting as section.key (e.g. remote.main_url)
        key: String,

        /// New value; empty clears optional settings
        value: String,
    },

    /// Print every setting grouped by section
    List,

    /// Print where config.ini lives
    Path,
}

pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Get { key } => {
            let key = parse_key(&key)?;
            println!("{}", or_not_set(&key.get(&load_config())));
        }
        ConfigCommands::Set { key, value } => {
            let key = parse_key(&key)?;
            let mut config = load_config();
            key.set(&mut config, &value)?;
            config.save()?;
            println!("{} = {}", key.name(), or_not_set(&value));
        }
        ConfigCommands::List => print!("{}", render_listing(&load_config())),
        ConfigCommands::Path => println!("{}", config_file_path().display()),
    }
    Ok(())
}

fn parse_key(key: &str) -> Result<ConfigKey, CliError> {
    key.parse().map_err(|_| {
        CliError::Config(format!(
            "unknown setting '{}' (see 'assetpatch config list')",
            key
        ))
    })
}

fn or_not_set(value: &str) -> &str {
    if value.is_empty() {
        NOT_SET
    } else {
        value
    }
}

/// INI-style dump of every key, one `[section]` header per group.
fn render_listing(config: &ConfigFile) -> String {
    let mut out = String::new();
    let mut section = None;
    for key in ConfigKey::all() {
        if section != Some(key.section()) {
            if section.is_some() {
                out.push('\n');
            }
            let _ = writeln!(out, "[{}]", key.section());
            section = Some(key.section());
        }
        let _ = writeln!(out, "  {} = {}", key.key_name(), or_not_set(&key.get(config)));
    }
    out
}
