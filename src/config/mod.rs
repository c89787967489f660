//! Configuration loading.
//!
//! Settings are read from `config/default.*` (optional) and then from
//! `AIRHUB__SECTION__KEY` environment variables; anything not provided keeps
//! its default.

mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BusBackend, BusSettings, FileSettings, HubSettings, JobSettings, LlmSettings,
    LoggingSettings, ServerSettings, Settings,
};

/// Loads the configuration from the default file and environment variables.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("AIRHUB")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("bus.patterns")
                .try_parsing(true),
        );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests;
