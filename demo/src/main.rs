mod config;

use crate::config::{Backend, Config};
use charlcd_gpio::GpioDriver;
use charlcd_gpio::gpiod::GpiodDriver;
use charlcd_gpio::lcd::hd44780::notify::{LcdEvent, LcdWorker};
use charlcd_gpio::mock::MockGpioDriver;
use charlcd_gpio::sysfs::SysfsGpioDriver;
use dotenv::dotenv;
use log::{debug, info, warn};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::System;
use tokio::sync::broadcast::error::RecvError;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

const UNKNOWN_STR: &str = "???";

fn open_backend(config: &Config) -> eyre::Result<Box<dyn GpioDriver>> {
    Ok(match config.backend {
        Backend::Sysfs => Box::new(SysfsGpioDriver::new()?),
        Backend::Gpiod => Box::new(GpiodDriver::open(Path::new(&config.gpiochip))?),
        Backend::Mock => Box::new(MockGpioDriver::new(64)),
    })
}

fn main() -> eyre::Result<()> {
    // Has to be read while the process is still single-threaded
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    // Initialize environment and logger
    dotenv().ok();
    pretty_env_logger::init();

    info!("charlcd demo starting...");
    info!(
        "Running on {} ({}), kernel ver {}",
        System::host_name().as_deref().unwrap_or(UNKNOWN_STR),
        System::cpu_arch(),
        System::kernel_version().as_deref().unwrap_or(UNKNOWN_STR),
    );

    let config = Config::load()?;
    info!(
        "LCD @ RS: {}, E: {}, Data: {:?}, {}x{}",
        config.pin_rs, config.pin_e, config.pins_data, config.columns, config.rows
    );

    debug!("Initializing GPIO driver...");
    let gpio = open_backend(&config)?;
    debug!("{:?} initialized.", gpio);

    debug!("Initializing LCD...");
    let lcd = LcdWorker::open(&*gpio, config.lcd_config())?;

    let mut events = lcd.subscribe();
    thread::spawn(move || {
        loop {
            match events.blocking_recv() {
                Ok(LcdEvent::Error(err)) => warn!("LCD error: {}", err),
                Ok(event) => debug!("LCD event: {:?}", event),
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} LCD events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let host = System::host_name().unwrap_or_else(|| UNKNOWN_STR.to_string());
    lcd.print(host).wait()?;

    // The clock goes on the second row, or right-aligned on the only one
    const CLOCK_WIDTH: u8 = 8;
    let (clock_col, clock_row) = if config.rows > 1 {
        (0, 1)
    } else {
        (config.columns.saturating_sub(CLOCK_WIDTH), 0)
    };
    let format = format_description!("[hour]:[minute]:[second]");

    info!("Starting main loop...");

    let start = Instant::now();
    loop {
        if let Some(seconds) = config.run_seconds {
            if start.elapsed() >= Duration::from_secs(seconds) {
                break;
            }
        }

        let now = OffsetDateTime::now_utc().to_offset(offset);
        lcd.set_cursor(clock_col, clock_row).wait()?;
        // Nobody waits for this one, failures end up in the event log
        drop(lcd.print(now.format(&format)?));

        thread::sleep(Duration::from_secs(1));
    }

    lcd.close().wait()?;
    info!("Done.");

    Ok(())
}
