use log::{LevelFilter, Log, Metadata, Record};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};

const LOG_CAPACITY: usize = 500;
const LIBRARY_PREFIX: &str = "callmix_lib::";

/// Levels parsed from `RUST_LOG`: a default plus per-target overrides.
///
/// Accepts `info`, `bridge=debug` or mixes such as
/// `warn,technology::softmix=trace`. Targets may omit the `callmix_lib::`
/// prefix; the longest matching target wins.
#[derive(Debug, Clone, PartialEq)]
struct LevelSpec {
    default: LevelFilter,
    targets: Vec<(String, LevelFilter)>,
}

impl LevelSpec {
    fn parse(spec: &str) -> Self {
        let mut parsed = Self {
            default: LevelFilter::Info,
            targets: Vec::new(),
        };
        for directive in spec.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            match directive.split_once('=') {
                Some((target, level)) => {
                    let target = target.trim().trim_start_matches(LIBRARY_PREFIX);
                    parsed.targets.push((target.to_string(), parse_level(level)));
                }
                None => parsed.default = parse_level(directive),
            }
        }
        parsed
    }

    fn level_for(&self, target: &str) -> LevelFilter {
        let target = short_target(target);
        self.targets
            .iter()
            .filter(|(prefix, _)| target.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, level)| *level)
            .unwrap_or(self.default)
    }

    fn max_level(&self) -> LevelFilter {
        self.targets
            .iter()
            .map(|(_, level)| *level)
            .chain(std::iter::once(self.default))
            .max()
            .unwrap_or(self.default)
    }
}

fn parse_level(level: &str) -> LevelFilter {
    match level.trim().to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

fn short_target(target: &str) -> &str {
    target.strip_prefix(LIBRARY_PREFIX).unwrap_or(target)
}

struct SharedLogger {
    levels: LevelSpec,
    buffer: Arc<Mutex<VecDeque<String>>>,
    echo_stderr: bool,
}

impl Log for SharedLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.levels.level_for(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let thread = std::thread::current();
        let line = format!(
            "[{}] [{}] {}: {}",
            record.level(),
            thread.name().unwrap_or("unnamed"),
            short_target(record.target()),
            record.args()
        );
        if self.echo_stderr {
            eprintln!("{}", line);
        }

        let mut buffer = self.buffer.lock().unwrap();
        if buffer.len() >= LOG_CAPACITY {
            buffer.pop_front();
        }
        buffer.push_back(line);
    }

    fn flush(&self) {}
}

static LOG_BUFFER: OnceLock<Arc<Mutex<VecDeque<String>>>> = OnceLock::new();
static LOGGER: OnceLock<SharedLogger> = OnceLock::new();

/// Install the process logger and return the buffer of recent lines.
///
/// Levels come from `RUST_LOG` (see [`LevelSpec`]); `CALLMIX_LOG_STDERR`
/// set to anything but `0` also echoes each line to stderr.
pub fn init() -> Arc<Mutex<VecDeque<String>>> {
    let buffer = LOG_BUFFER
        .get_or_init(|| Arc::new(Mutex::new(VecDeque::with_capacity(LOG_CAPACITY))))
        .clone();

    let levels = std::env::var("RUST_LOG")
        .map(|spec| LevelSpec::parse(&spec))
        .unwrap_or_else(|_| LevelSpec::parse("info"));
    let max_level = levels.max_level();

    let echo_stderr = std::env::var("CALLMIX_LOG_STDERR")
        .map(|value| value != "0")
        .unwrap_or(false);

    let logger = SharedLogger {
        levels,
        buffer: buffer.clone(),
        echo_stderr,
    };

    let logger_ref = LOGGER.get_or_init(|| logger);
    if log::set_logger(logger_ref).is_ok() {
        log::set_max_level(max_level);
    }

    buffer
}

pub fn snapshot(buffer: &Arc<Mutex<VecDeque<String>>>) -> Vec<String> {
    buffer.lock().unwrap().iter().cloned().collect()
}
