use std::fs;

use anyhow::Context;
use teloxide::adaptors::throttle::Limits;
use teloxide::prelude::*;

mod api;
mod common;
mod config;
mod logging;
mod media;
mod processing;
mod regexp;
mod session;
mod transfer;

use config::{Config, LogSettings};
use processing::{bot, Services, PROCESS_TIMES};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = config::load_env_file(config::CONFIG_FILE);
    logging::init(&LogSettings::from_env())?;
    match env_file {
        Ok(path) => log::info!("Loaded settings from {}", path.display()),
        Err(e) => log::warn!("{} not loaded ({}), using the environment", config::CONFIG_FILE, e),
    }
    lazy_static::initialize(&PROCESS_TIMES);

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {:#}", e);
            return Err(e);
        }
    };
    log::info!("Starting with {:?}", config);
    fs::create_dir_all(&config.downloads_dir).with_context(|| {
        format!("couldn't create downloads directory {}", config.downloads_dir.display())
    })?;

    let mut bot = Bot::new(&config.bot_token);
    if let Some(url) = config.bot_api_url.clone() {
        bot = bot.set_api_url(url);
    }
    let bot = bot.throttle(Limits::default());

    Dispatcher::builder(bot.clone(), bot::schema())
        .dependencies(dptree::deps![Services::new(bot, config)])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    log::info!("Stopped after {}", processing::format_uptime(processing::uptime()));
    Ok(())
}
