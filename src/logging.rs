use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Log level for a `-v` count: warnings by default, then info, debug, trace.
pub fn level_for(verbosity: u8) -> log::LevelFilter {
    match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

/// Initialize the stderr logger. Each record is prefixed with the time elapsed
/// since initialisation: `[HH:MM:SS] LEVEL: message`. `RUST_LOG` is honoured
/// and overrides the verbosity for the modules it names.
pub fn init_logger(verbosity: u8) {
    START_TIME.set(Instant::now()).ok();

    let _ = env_logger::Builder::new()
        .filter_level(level_for(verbosity))
        .parse_default_env()
        .format(|buf, record| {
            let elapsed = START_TIME
                .get()
                .map(|t| t.elapsed())
                .unwrap_or_default()
                .as_secs();
            writeln!(
                buf,
                "[{:02}:{:02}:{:02}] {}: {}",
                elapsed / 3600,
                (elapsed % 3600) / 60,
                elapsed % 60,
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr)
        .try_init();
}
