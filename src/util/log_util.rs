use std::sync::Once;

use log::LevelFilter;
use log4rs::{
    append::console::{ConsoleAppender, Target},
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};

/// Config file looked up in the working directory.
pub const LOG_CONFIG_FILE: &str = "log4rs.yaml";

static LOGGER_INIT: Once = Once::new();

/// Initializes `log4rs` from `log4rs.yaml`, or falls back to an `Info`
/// console logger on stderr. Stdout is reserved for result envelopes.
/// Safe to call more than once.
pub fn init() {
    LOGGER_INIT.call_once(|| {
        match log4rs::init_file(LOG_CONFIG_FILE, Default::default()) {
            Ok(()) => log::debug!("Logging initialized from {LOG_CONFIG_FILE}"),
            Err(_) => {
                if let Err(e) = init_stderr(LevelFilter::Info) {
                    eprintln!(
                        "ERROR: failed to initialize fallback logger: {e}"
                    );
                }
            }
        }
    });
}

fn init_stderr(level: LevelFilter) -> anyhow::Result<()> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)(utc)} - {l}: {m}{n}",
        )))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))?;
    log4rs::init_config(config)?;
    Ok(())
}
