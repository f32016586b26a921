use anyhow::Context;
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::config::LogSettings;

const MAX_LOG_SIZE: u64 = 50_000_000;
const LOG_BACKUPS: u32 = 10;
const PATTERN: &str = "[{d(%d-%b-%y %H:%M:%S)} - {l}] - {M} - {m}{n}";

/// Logs to stderr and to a size-capped rolling file. The bot library itself
/// only gets to report errors.
pub(crate) fn init(settings: &LogSettings) -> anyhow::Result<()> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();

    let backups = format!("{}.{{}}", settings.file.display());
    let roller = FixedWindowRoller::builder()
        .base(1)
        .build(&backups, LOG_BACKUPS)
        .context("invalid log backup pattern")?;
    let policy = CompoundPolicy::new(
        Box::new(SizeTrigger::new(MAX_LOG_SIZE)),
        Box::new(roller),
    );
    let file = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(&settings.file, Box::new(policy))
        .with_context(|| format!("couldn't open log file {}", settings.file.display()))?;

    let config = log4rs::Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .appender(Appender::builder().build("file", Box::new(file)))
        .logger(Logger::builder().build("teloxide", LevelFilter::Error))
        .logger(Logger::builder().build("teloxide_core", LevelFilter::Error))
        .build(
            Root::builder()
                .appender("stderr")
                .appender("file")
                .build(settings.level),
        )
        .context("invalid logging configuration")?;
    log4rs::init_config(config).context("logger is already initialised")?;
    Ok(())
}
