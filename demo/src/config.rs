use charlcd_gpio::lcd::hd44780::LcdConfig;
use dotenv::var;
use serde::{Deserialize, Serialize};
use std::env::var_os;
use std::ffi::OsStr;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Which GPIO backend drives the pins.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, Default, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// `/sys/class/gpio`
    #[default]
    Sysfs,
    /// `/dev/gpiochipN`
    Gpiod,
    /// Nothing is driven, writes are only recorded.
    Mock,
}

#[derive(Debug, Error, Eq, PartialEq)]
#[error("unknown GPIO backend: {0}")]
pub struct UnknownBackend(String);

impl FromStr for Backend {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sysfs" => Ok(Backend::Sysfs),
            "gpiod" => Ok(Backend::Gpiod),
            "mock" => Ok(Backend::Mock),
            _ => Err(UnknownBackend(s.to_string())),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_gpiochip")]
    pub gpiochip: String,
    pub pin_rs: usize,
    pub pin_e: usize,
    pub pins_data: [usize; 4],
    #[serde(default = "default_columns")]
    pub columns: u8,
    #[serde(default = "default_rows")]
    pub rows: u8,
    #[serde(default)]
    pub large_font: bool,
    /// Stop after this many seconds instead of running forever.
    #[serde(default)]
    pub run_seconds: Option<u64>,
}

fn default_gpiochip() -> String {
    "/dev/gpiochip0".to_string()
}

fn default_columns() -> u8 {
    16
}

fn default_rows() -> u8 {
    1
}

impl Config {
    /// Loads the config file named by `CONFIG_FILE` (`charlcd.json` by default) if it exists,
    /// otherwise reads the `CHARLCD_*` environment variables.
    pub fn load() -> eyre::Result<Self> {
        match Self::try_load()? {
            Some(config) => Ok(config),
            None => Self::from_lookup(|name| var(name).ok()),
        }
    }

    fn try_load() -> eyre::Result<Option<Self>> {
        let config_str = var_os("CONFIG_FILE");
        let config_str: &OsStr = config_str.as_deref().unwrap_or(OsStr::new("charlcd.json"));
        let config_path = Path::new(config_str);
        if config_path.exists() {
            let file = std::fs::File::open(config_path)?;
            let reader = std::io::BufReader::new(file);
            Ok(Some(serde_json::from_reader(reader)?))
        } else {
            Ok(None)
        }
    }

    /// Builds the config from variables looked up by `lookup`.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> eyre::Result<Self> {
        let required = |name: &str| {
            lookup(name).ok_or_else(|| eyre::eyre!("{} is not set", name))
        };

        Ok(Config {
            backend: lookup("CHARLCD_BACKEND")
                .map(|s| s.parse::<Backend>())
                .transpose()?
                .unwrap_or_default(),
            gpiochip: lookup("CHARLCD_GPIOCHIP").unwrap_or_else(default_gpiochip),
            pin_rs: required("CHARLCD_PIN_RS")?.trim().parse::<usize>()?,
            pin_e: required("CHARLCD_PIN_E")?.trim().parse::<usize>()?,
            pins_data: parse_pin_bus(&required("CHARLCD_PINS_DATA")?)?,
            columns: parse_or(lookup("CHARLCD_COLUMNS"), default_columns())?,
            rows: parse_or(lookup("CHARLCD_ROWS"), default_rows())?,
            large_font: parse_or(lookup("CHARLCD_LARGE_FONT"), false)?,
            run_seconds: lookup("CHARLCD_RUN_SECONDS")
                .map(|s| s.trim().parse::<u64>())
                .transpose()?,
        })
    }

    pub fn lcd_config(&self) -> LcdConfig {
        LcdConfig::new(self.pin_rs, self.pin_e, self.pins_data)
            .with_columns(self.columns)
            .with_rows(self.rows)
            .with_large_font(self.large_font)
    }
}

fn parse_or<T>(value: Option<String>, default: T) -> eyre::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(value) => Ok(value.trim().parse()?),
        None => Ok(default),
    }
}

/// Parses four pin numbers separated by commas, spaces or semicolons.
pub fn parse_pin_bus(pin_str: &str) -> eyre::Result<[usize; 4]> {
    pin_str
        .split([',', ' ', ';'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse())
        .collect::<Result<Vec<_>, _>>()?
        .try_into()
        .map_err(|_| eyre::eyre!("Invalid number of data pins"))
}
