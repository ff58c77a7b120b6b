// SPDX-License-Identifier: GPL-2.0-or-later

use common::{EnvConfig, LogLevel};
use serde::Deserialize;
use std::{
    collections::HashMap,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Main config. Generated on first run if missing.
#[derive(Clone, Debug, PartialEq)]
pub struct EnvConf {
    spfs_root: PathBuf,
    thread_count: u8,
    cooldown_secs: u64,
    log_level: LogLevel,
    port: u16,
    raw: String,
}

#[derive(Debug, Deserialize)]
struct RawEnvConf {
    spfs_root: PathBuf,
    #[serde(default = "default_thread_count")]
    thread_count: u8,
    #[serde(default = "default_cooldown_secs")]
    cooldown_secs: u64,
    #[serde(default = "default_log_level")]
    log_level: LogLevel,
    #[serde(default = "default_port")]
    port: u16,
}

fn default_thread_count() -> u8 {
    4
}

fn default_cooldown_secs() -> u64 {
    5
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_port() -> u16 {
    2020
}

pub const MIN_THREAD_COUNT: u8 = 1;
pub const MAX_THREAD_COUNT: u8 = 16;

impl EnvConf {
    pub fn new(config_path: &PathBuf) -> Result<EnvConf, EnvConfigNewError> {
        use EnvConfigNewError::*;
        if !config_path.exists() {
            print!(
                "\n\nGenerating '{}' and exiting..\n\n\n",
                config_path.to_string_lossy()
            );

            let cwd = std::env::current_dir().map_err(GetCwd)?;
            generate_config(config_path, &cwd)?;
            std::process::exit(0);
        }

        let env_toml = fs::read_to_string(config_path).map_err(ReadFile)?;
        parse_config(env_toml)
    }

    #[must_use]
    pub fn thread_count_bounded(&self) -> u8 {
        self.thread_count.clamp(MIN_THREAD_COUNT, MAX_THREAD_COUNT)
    }
}

impl EnvConfig for EnvConf {
    fn thread_count(&self) -> u8 {
        self.thread_count_bounded()
    }
    fn cooldown_secs(&self) -> u64 {
        self.cooldown_secs
    }
    fn spfs_root(&self) -> &Path {
        &self.spfs_root
    }
    fn log_level(&self) -> LogLevel {
        self.log_level
    }
    fn port(&self) -> u16 {
        self.port
    }
    fn raw(&self) -> &str {
        &self.raw
    }
}

#[derive(Debug, Error)]
pub enum EnvConfigNewError {
    #[error("read env config file: {0}")]
    ReadFile(std::io::Error),

    #[error("generate env config: {0}")]
    Generate(#[from] GenerateEnvConfigError),

    #[error("parse env config: {0}")]
    Parse(#[from] ParseEnvConfigError),

    #[error("get current working directory: {0}")]
    GetCwd(std::io::Error),
}

#[derive(Debug, Error)]
pub enum GenerateEnvConfigError {
    #[error("create file: {0}")]
    CreateFile(std::io::Error),

    #[error("templater error: {0}")]
    AddTemplate(upon::Error),

    #[error("render template: {0}")]
    RenderTemplate(upon::Error),

    #[error("get parent directory")]
    GetParentDir(),

    #[error("create directory: {0}")]
    CreateDir(std::io::Error),

    #[error("write file: {0}")]
    WriteFile(std::io::Error),
}

fn generate_config(path: &Path, cwd: &Path) -> Result<(), GenerateEnvConfigError> {
    use GenerateEnvConfigError::*;

    let data = HashMap::from([("cwd", cwd)]);

    let mut engine = upon::Engine::new();
    engine
        .add_template("config", CONFIG_TEMPLATE)
        .map_err(AddTemplate)?;

    let config = engine
        .get_template("config")
        .expect("template should just have been added")
        .render(data)
        .to_string()
        .map_err(RenderTemplate)?;

    let config_dir = path.parent().ok_or(GetParentDir())?;
    fs::create_dir_all(config_dir).map_err(CreateDir)?;

    let mut file = File::create(path).map_err(CreateFile)?;
    write!(file, "{config}").map_err(WriteFile)?;

    Ok(())
}

const CONFIG_TEMPLATE: &str = include_str!("./default_config.tpl");

#[derive(Debug, Error)]
pub enum ParseEnvConfigError {
    #[error("{0}")]
    DeserializeToml(#[from] toml::de::Error),

    #[error("{0} path is not absolute '{1}'")]
    PathNotAbsolute(String, PathBuf),

    #[error("create spfs root: {0} {1}")]
    CreateSpfsRoot(PathBuf, std::io::Error),

    #[error("canonicalize path: {0:?} {1}")]
    Canonicalize(PathBuf, std::io::Error),
}

fn parse_config(env_toml: String) -> Result<EnvConf, ParseEnvConfigError> {
    use ParseEnvConfigError::*;
    let raw: RawEnvConf = toml::from_str(&env_toml)?;

    if !raw.spfs_root.is_absolute() {
        return Err(PathNotAbsolute("spfs_root".to_owned(), raw.spfs_root));
    }

    std::fs::create_dir_all(&raw.spfs_root)
        .map_err(|e| CreateSpfsRoot(raw.spfs_root.clone(), e))?;
    let spfs_root = raw
        .spfs_root
        .canonicalize()
        .map_err(|e| Canonicalize(raw.spfs_root, e))?;

    Ok(EnvConf {
        spfs_root,
        thread_count: raw.thread_count,
        cooldown_secs: raw.cooldown_secs,
        log_level: raw.log_level,
        port: raw.port,
        raw: env_toml,
    })
}
