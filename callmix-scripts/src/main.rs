mod logging;

use std::env;
use std::f32::consts::TAU;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use callmix_lib::audio::{Format, Frame};
use callmix_lib::technology::Capabilities;
use callmix_lib::{Bridge, BridgeChannel, BridgeCore, BridgeFeatures, BridgeFlags, Channel, ChannelEndpoint, CoreConfig};

fn main() {
    let mut args = env::args().skip(1);
    let Some(cmd) = args.next() else {
        print_help();
        return;
    };

    let result = match cmd.as_str() {
        "conference" => conference_cmd(args.collect()),
        "config" => config_cmd(args.collect()),
        "-h" | "--help" => {
            print_help();
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", cmd);
            print_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        eprintln!("{}", err);
        process::exit(1);
    }
}

struct ConferenceOptions {
    parties: usize,
    seconds: f32,
    rate: u32,
    interval_ms: Option<u32>,
    out_dir: PathBuf,
    config: Option<PathBuf>,
    show_log: bool,
}

impl Default for ConferenceOptions {
    fn default() -> Self {
        Self {
            parties: 3,
            seconds: 2.0,
            rate: 8000,
            interval_ms: None,
            out_dir: PathBuf::from("."),
            config: None,
            show_log: false,
        }
    }
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("{} requires a value", flag))?;
    value
        .parse::<T>()
        .map_err(|_| format!("Invalid {} value: {}", flag, value))
}

fn parse_conference_args(args: Vec<String>) -> Result<Option<ConferenceOptions>, String> {
    let mut options = ConferenceOptions::default();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--parties" => options.parties = parse_value(&arg, iter.next())?,
            "--seconds" => options.seconds = parse_value(&arg, iter.next())?,
            "--rate" => options.rate = parse_value(&arg, iter.next())?,
            "--interval" => options.interval_ms = Some(parse_value(&arg, iter.next())?),
            "--out" => {
                let path = iter.next().ok_or("--out requires a path")?;
                options.out_dir = PathBuf::from(path);
            }
            "--config" => {
                let path = iter.next().ok_or("--config requires a path")?;
                options.config = Some(PathBuf::from(path));
            }
            "--show-log" => options.show_log = true,
            "-h" | "--help" => {
                print_conference_help();
                return Ok(None);
            }
            _ => {
                print_conference_help();
                return Err(format!("Unknown conference arg: {}", arg));
            }
        }
    }
    if options.parties == 0 {
        return Err("--parties must be at least 1".to_string());
    }
    if options.rate == 0 || options.seconds <= 0.0 {
        return Err("--rate and --seconds must be positive".to_string());
    }
    Ok(Some(options))
}

fn load_config(path: Option<&Path>) -> Result<CoreConfig, String> {
    match path {
        Some(path) => CoreConfig::from_json_file(path)
            .map_err(|err| format!("Failed to load {}: {}", path.display(), err)),
        None => Ok(CoreConfig::default()),
    }
}

/// Sine generator with a running phase so consecutive frames join cleanly.
struct Tone {
    frequency: f32,
    phase: f32,
}

impl Tone {
    fn next_frame(&mut self, rate: u32, samples: usize) -> Vec<i16> {
        let step = TAU * self.frequency / rate as f32;
        (0..samples)
            .map(|_| {
                let sample = (self.phase.sin() * 4000.0) as i16;
                self.phase = (self.phase + step) % TAU;
                sample
            })
            .collect()
    }
}

struct Party {
    name: String,
    endpoint: ChannelEndpoint,
    bridge_channel: Arc<BridgeChannel>,
    tone: Tone,
    heard: Vec<i16>,
}

impl Party {
    fn collect(&mut self) {
        for frame in self.endpoint.drain() {
            if let Some(samples) = frame.linear() {
                self.heard.extend_from_slice(samples);
            }
        }
    }
}

fn conference_cmd(args: Vec<String>) -> Result<(), String> {
    let Some(options) = parse_conference_args(args)? else {
        return Ok(());
    };
    let log_buffer = logging::init();

    let mut config = load_config(options.config.as_deref())?;
    if let Some(interval_ms) = options.interval_ms {
        config.mixing_interval_ms = interval_ms;
    }
    let core = BridgeCore::with_default_technologies(config);
    let interval_ms = core.config().mixing_interval_ms;
    let bridge = Bridge::new(&core, Capabilities::MULTI_MIX, BridgeFlags::DISSOLVE_EMPTY)
        .map_err(|err| err.to_string())?;
    log::info!(
        "conference bridge {} using {} with {} parties",
        bridge.id(),
        bridge.technology_name(),
        options.parties
    );

    let mut parties = Vec::with_capacity(options.parties);
    for index in 0..options.parties {
        let name = format!("party-{}", index + 1);
        let (channel, endpoint) = Channel::pair(&format!("Local/{}", name), Format::slin(options.rate));
        let bridge_channel = bridge
            .impart(channel, None, BridgeFeatures::new())
            .map_err(|err| err.to_string())?;
        parties.push(Party {
            name,
            endpoint,
            bridge_channel,
            tone: Tone {
                frequency: 300.0 + 150.0 * index as f32,
                phase: 0.0,
            },
            heard: Vec::new(),
        });
    }

    let samples = options.rate as usize * interval_ms as usize / 1000;
    let ticks = (options.seconds * 1000.0 / interval_ms as f32).ceil() as usize;
    let start = Instant::now();
    for tick in 0..ticks {
        for party in parties.iter_mut() {
            let audio = party.tone.next_frame(options.rate, samples);
            party.endpoint.send(Frame::voice(options.rate, audio));
            party.collect();
        }
        let deadline = start + Duration::from_millis((tick as u64 + 1) * interval_ms as u64);
        if let Some(wait) = deadline.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }

    for party in parties.iter_mut() {
        if let Err(err) = bridge.depart(&party.bridge_channel) {
            log::warn!("{} did not depart cleanly: {}", party.name, err);
        }
        party.collect();
    }

    fs::create_dir_all(&options.out_dir)
        .map_err(|err| format!("Failed to create {}: {}", options.out_dir.display(), err))?;
    for party in &parties {
        let path = options.out_dir.join(format!("{}.wav", party.name));
        write_wav(&path, options.rate, &party.heard)
            .map_err(|err| format!("Failed to write {}: {}", path.display(), err))?;
        let peak = party
            .heard
            .iter()
            .map(|sample| sample.unsigned_abs())
            .max()
            .unwrap_or(0);
        println!(
            "{}: heard {:.2}s, peak {} -> {}",
            party.name,
            party.heard.len() as f32 / options.rate as f32,
            peak,
            path.display()
        );
    }

    if options.show_log {
        for line in logging::snapshot(&log_buffer) {
            println!("{}", line);
        }
    }
    Ok(())
}

fn write_wav(path: &Path, rate: u32, samples: &[i16]) -> Result<(), hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for sample in samples {
        writer.write_sample(*sample)?;
    }
    writer.finalize()
}

fn config_cmd(args: Vec<String>) -> Result<(), String> {
    let mut from: Option<PathBuf> = None;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--from" => {
                let path = iter.next().ok_or("--from requires a path")?;
                from = Some(PathBuf::from(path));
            }
            "-h" | "--help" => {
                print_config_help();
                return Ok(());
            }
            _ => {
                print_config_help();
                return Err(format!("Unknown config arg: {}", arg));
            }
        }
    }

    let config = load_config(from.as_deref())?;
    let json = serde_json::to_string_pretty(&config).map_err(|err| err.to_string())?;
    println!("{}", json);
    Ok(())
}

fn print_help() {
    println!(
        "callmix-scripts\n\nCommands:\n  conference   Mix synthetic parties through a softmix bridge and record what each hears\n  config       Print the effective core configuration as JSON\n\nRun 'callmix-scripts <command> --help' for options."
    );
}

fn print_conference_help() {
    println!(
        "Usage: callmix-scripts conference [options]\n\nOptions:\n  --parties <n>      Number of parties (default 3)\n  --seconds <s>      Length of the call (default 2)\n  --rate <hz>        Native sample rate of every party (default 8000)\n  --interval <ms>    Mixing interval (10, 20 or 40)\n  --out <dir>        Directory for party-N.wav files (default .)\n  --config <path>    Core configuration JSON\n  --show-log         Print the captured log after the run\n  -h, --help         Show this help"
    );
}

fn print_config_help() {
    println!(
        "Usage: callmix-scripts config [options]\n\nOptions:\n  --from <path>      Load and normalise this file instead of the defaults\n  -h, --help         Show this help"
    );
}
