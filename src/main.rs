use std::env::args;
use std::str::FromStr;
use std::string::ToString;

use strum::IntoEnumIterator;
use strum_macros::{self, Display, EnumIter, EnumString};
use tracing_subscriber::EnvFilter;

mod demos;

fn main() -> Result<(), String> {
    // RUST_LOG=debug shows what the workers are up to
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    args()
        .nth(1)
        .ok_or(format!(
            "no demo supplied, use one of {} or see unit tests",
            Demo::iter()
                .map(|d| d.to_string())
                .collect::<Vec<String>>()
                .join(",")
        ))
        .and_then(|selector| Demo::from_str(&selector).map_err(|e| format!("{selector}: {e}")))
        .and_then(|demo| {
            let result = match demo {
                Demo::Rendezvous => demos::rendezvous(),
                Demo::Buffered => demos::buffered(),
                Demo::Select => demos::select(),
                Demo::Directions => demos::directions(),
                Demo::WaitGroup => demos::wait_group(),
                Demo::Counter => demos::counter(),
                Demo::FanOut => demos::fan_out(),
                Demo::Cancel => demos::cancel(),
                Demo::Files => demos::files(),
            };
            result.map_err(|e| e.to_string())
        })
}

#[derive(EnumIter, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
enum Demo {
    Rendezvous,
    Buffered,
    Select,
    Directions,
    WaitGroup,
    Counter,
    FanOut,
    Cancel,
    Files,
}
