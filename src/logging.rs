//! Log setup. Lines are stamped with seconds since startup rather than
//! wall-clock time so they line up with scheduled event offsets when
//! debugging timing (a note planned 667ms into a bar should appear
//! ~0.667s after the firing that planned it).

use env_logger::{Builder, Env};
use log::LevelFilter;
use once_cell::sync::Lazy;
use std::io::Write;
use std::time::Instant;

pub use log::{debug, error, info, trace, warn};

static STARTED: Lazy<Instant> = Lazy::new(Instant::now);

pub fn init_logger() {
    let started = *STARTED;
    Builder::from_env(Env::default().default_filter_or("ostinato=info"))
        .filter_module("websocket", LevelFilter::Warn)
        .format(move |buf, record| {
            let target = record
                .target()
                .strip_prefix("ostinato::")
                .unwrap_or_else(|| record.target());
            writeln!(
                buf,
                "{:>9.3} {:<5} {} {}",
                started.elapsed().as_secs_f64(),
                record.level(),
                target,
                record.args()
            )
        })
        .init();
}
