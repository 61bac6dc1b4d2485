use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::fs::File;
use std::io::{Read, Write};
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use surface_ec_lib::constants::{DEFAULT_BAUD_RATE, DEFAULT_DEVICE};
use surface_ec_lib::decode::field;
use surface_ec_lib::{
    BatterySummary, CounterStore, DecodedPayload, ECError, Request, SequenceState, SerialConfig, Session,
    SessionConfig,
};

mod report;

/// Surface Book 2 / Surface Pro (2017) embedded controller requests.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The UART device.
    #[arg(short, long, value_name = "DEV", default_value = DEFAULT_DEVICE)]
    device: String,
    /// The baud rate.
    #[arg(short, long, value_name = "BAUD", default_value_t = DEFAULT_BAUD_RATE, value_parser = parse_u32)]
    baud: u32,
    /// Overwrite the stored CNT before running the request.
    #[arg(short, long, value_parser = parse_u16)]
    cnt: Option<u16>,
    /// Overwrite the stored SEQ before running the request.
    #[arg(short, long, value_parser = parse_u8)]
    seq: Option<u8>,
    /// Where SEQ/CNT are kept between runs (defaults to .counters.json next to the executable).
    #[arg(long, value_name = "FILE")]
    state_file: Option<PathBuf>,
    /// Longest wait for the EC in each stage of a request, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
    /// Optional path to a file to write logs to, in addition to stderr.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,
    #[command(subcommand)]
    query: Query,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Query {
    /// Run request 'LID0.GBOS'.
    #[command(name = "lid0.gbos")]
    Lid0Gbos,
    /// Run request 'ADP1._PSR'.
    #[command(name = "adp1._psr")]
    Adp1Psr,
    /// Run request 'BAT1._STA'.
    #[command(name = "bat1._sta")]
    Bat1Sta,
    /// Run request 'BAT1._BST'.
    #[command(name = "bat1._bst")]
    Bat1Bst,
    /// Run request 'BAT1._BIX'.
    #[command(name = "bat1._bix")]
    Bat1Bix,
    /// Run request 'BAT2._STA'.
    #[command(name = "bat2._sta")]
    Bat2Sta,
    /// Run request 'BAT2._BST'.
    #[command(name = "bat2._bst")]
    Bat2Bst,
    /// Run request 'BAT2._BIX'.
    #[command(name = "bat2._bix")]
    Bat2Bix,
    /// Short battery 1 report.
    #[command(name = "bat1.pretty")]
    Bat1Pretty,
    /// Short battery 2 report.
    #[command(name = "bat2.pretty")]
    Bat2Pretty,
    /// AC adapter properties in uevent format.
    #[command(name = "adp1.uevent")]
    Adp1Uevent,
    /// Battery 1 properties in uevent format.
    #[command(name = "bat1.uevent")]
    Bat1Uevent,
    /// Battery 2 properties in uevent format.
    #[command(name = "bat2.uevent")]
    Bat2Uevent,
}

/// What a query sends and how its answer is shown.
enum Plan {
    Fields(Request),
    PowerSource(Request),
    PowerUevent(Request),
    BatteryPretty(u8),
    BatteryUevent(u8),
}

impl Query {
    fn plan(self) -> Plan {
        match self {
            Query::Lid0Gbos => Plan::Fields(Request::BaseStatus),
            Query::Adp1Psr => Plan::PowerSource(Request::PowerSource(1)),
            Query::Bat1Sta => Plan::Fields(Request::BatteryStatus(1)),
            Query::Bat1Bst => Plan::Fields(Request::BatteryDynamic(1)),
            Query::Bat1Bix => Plan::Fields(Request::BatteryStatic(1)),
            Query::Bat2Sta => Plan::Fields(Request::BatteryStatus(2)),
            Query::Bat2Bst => Plan::Fields(Request::BatteryDynamic(2)),
            Query::Bat2Bix => Plan::Fields(Request::BatteryStatic(2)),
            Query::Bat1Pretty => Plan::BatteryPretty(1),
            Query::Bat2Pretty => Plan::BatteryPretty(2),
            Query::Adp1Uevent => Plan::PowerUevent(Request::PowerSource(1)),
            Query::Bat1Uevent => Plan::BatteryUevent(1),
            Query::Bat2Uevent => Plan::BatteryUevent(2),
        }
    }

    /// Device part of the command name, e.g. `bat1`.
    fn device_name(self) -> &'static str {
        match self {
            Query::Lid0Gbos => "lid0",
            Query::Adp1Psr | Query::Adp1Uevent => "adp1",
            Query::Bat1Sta | Query::Bat1Bst | Query::Bat1Bix | Query::Bat1Pretty | Query::Bat1Uevent => "bat1",
            Query::Bat2Sta | Query::Bat2Bst | Query::Bat2Bix | Query::Bat2Pretty | Query::Bat2Uevent => "bat2",
        }
    }
}

fn parse_number(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        s.parse().map_err(|e: std::num::ParseIntError| e.to_string())
    }
}

fn parse_u32(s: &str) -> Result<u32, String> {
    u32::try_from(parse_number(s)?).map_err(|e| e.to_string())
}

fn parse_u16(s: &str) -> Result<u16, String> {
    u16::try_from(parse_number(s)?).map_err(|e| e.to_string())
}

fn parse_u8(s: &str) -> Result<u8, String> {
    u8::try_from(parse_number(s)?).map_err(|e| e.to_string())
}

/// Counters that are written back exactly once, whichever way the run ends.
struct PersistentCounters {
    store: CounterStore,
    state: SequenceState,
}

impl PersistentCounters {
    fn load(store: CounterStore) -> Result<Self> {
        let state = SequenceState::load(&store)
            .with_context(|| format!("Failed to load counters from {}", store.path().display()))?;
        Ok(Self { store, state })
    }
}

impl Deref for PersistentCounters {
    type Target = SequenceState;

    fn deref(&self) -> &SequenceState {
        &self.state
    }
}

impl DerefMut for PersistentCounters {
    fn deref_mut(&mut self) -> &mut SequenceState {
        &mut self.state
    }
}

impl Drop for PersistentCounters {
    fn drop(&mut self) {
        if let Err(e) = self.state.save(&self.store) {
            error!(path = %self.store.path().display(), "Failed to store counters: {}", e);
        }
    }
}

fn setup_logging(log_file_path: Option<PathBuf>, verbosity: &Verbosity<WarnLevel>) -> Result<Option<WorkerGuard>> {
    // stdout carries the report, logs go to stderr
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file =
            File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    if let Err(e) = run(cli) {
        if e.downcast_ref::<ECError>().is_some_and(ECError::is_recoverable) {
            warn!("{:#}", e);
            eprintln!("Communication failure: invalid ACK, try again");
            return Ok(());
        }
        error!("Request failed: {:#}", e);
        drop(guard);
        process::exit(1);
    }

    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let store = match cli.state_file {
        Some(path) => CounterStore::new(path),
        None => CounterStore::beside_executable().context("Failed to locate the counter file")?,
    };
    let mut counters = PersistentCounters::load(store)?;
    if let Some(seq) = cli.seq {
        counters.seq = seq;
    }
    if let Some(cnt) = cli.cnt {
        counters.cnt = cnt;
    }

    let mut port = SerialConfig::new(&cli.device, cli.baud)
        .open()
        .with_context(|| format!("Failed to open serial device {}", cli.device))?;
    let config = SessionConfig {
        timeout: Duration::from_millis(cli.timeout_ms),
    };

    let output = execute(cli.query, &mut port, config, &mut counters)?;
    print!("{}", output);
    Ok(())
}

fn query<L: Read + Write>(
    link: &mut L,
    config: SessionConfig,
    request: Request,
    counters: &mut SequenceState,
) -> Result<DecodedPayload> {
    info!(%request, seq = counters.seq, cnt = counters.cnt, "Running request");
    let mut session = Session::new(link, config);
    let payload = session
        .exchange(&request.descriptor(), counters)
        .with_context(|| format!("{} failed while {}", request, session.state()))?;
    debug!(%request, payload = hex::encode(&payload), "Response payload");
    request
        .decode(&payload)
        .with_context(|| format!("Failed to decode {} response", request))
}

fn battery_summary<L: Read + Write>(
    link: &mut L,
    config: SessionConfig,
    battery: u8,
    counters: &mut SequenceState,
) -> Result<BatterySummary> {
    let static_info = query(link, config, Request::BatteryStatic(battery), counters)?;
    let dynamic_info = query(link, config, Request::BatteryDynamic(battery), counters)?;
    BatterySummary::from_payloads(&static_info, &dynamic_info)
        .with_context(|| format!("Failed to summarize battery {}", battery))
}

fn power_online(decoded: &DecodedPayload) -> Result<u64> {
    decoded
        .unsigned(field::POWER_SOURCE)
        .context("Power source field missing from response")
}

/// Run `q` and render its report.
fn execute<L: Read + Write>(
    q: Query,
    link: &mut L,
    config: SessionConfig,
    counters: &mut SequenceState,
) -> Result<String> {
    let output = match q.plan() {
        Plan::Fields(request) => query(link, config, request, counters)?.to_string(),
        Plan::PowerSource(request) => {
            let decoded = query(link, config, request, counters)?;
            report::power_online(power_online(&decoded)?) + &decoded.to_string()
        }
        Plan::PowerUevent(request) => {
            let decoded = query(link, config, request, counters)?;
            report::power_online(power_online(&decoded)?) + &report::power_supply_name(q.device_name())
        }
        Plan::BatteryPretty(battery) => {
            report::battery_pretty(&battery_summary(link, config, battery, counters)?)
        }
        Plan::BatteryUevent(battery) => {
            let summary = battery_summary(link, config, battery, counters)?;
            report::battery_uevent(&summary) + &report::power_supply_name(q.device_name())
        }
    };
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use surface_ec_lib::frame;

    /// UART stand-in: each queued reply becomes readable after the next host write.
    #[derive(Default)]
    struct ScriptedPort {
        rx: VecDeque<u8>,
        replies: VecDeque<Vec<u8>>,
        writes: usize,
    }

    impl ScriptedPort {
        fn reply(mut self, bytes: &[u8]) -> Self {
            self.replies.push_back(bytes.to_vec());
            self
        }

        /// One full request: acknowledgement plus response, then nothing after the host's ack.
        fn answer(self, request: Request, counters: SequenceState, data: &[u8]) -> Self {
            let reply = [
                frame::encode_ack(counters.seq).to_vec(),
                frame::encode_response(&request.descriptor(), 0x40, counters.cnt, data).to_vec(),
            ]
            .concat();
            self.reply(&reply).reply(&[])
        }
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.rx.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }
            let n = buf.len().min(self.rx.len());
            for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes += 1;
            if let Some(reply) = self.replies.pop_front() {
                self.rx.extend(reply);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            timeout: Duration::from_millis(20),
        }
    }

    fn bst(state: u32, rate: u32, remaining: u32, voltage: u32) -> Vec<u8> {
        [state, rate, remaining, voltage]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect()
    }

    fn bix(design: u32, last_full: u32, cycles: u32) -> Vec<u8> {
        let mut payload = vec![0u8; 119];
        for (offset, value) in [(5, design), (9, last_full), (13, 1), (17, 7_660), (29, cycles)] {
            payload[offset..offset + 4].copy_from_slice(&u32::to_le_bytes(value));
        }
        payload[61..66].copy_from_slice(b"DYN01");
        payload[93..97].copy_from_slice(b"LION");
        payload[98..106].copy_from_slice(b"SMP-SDI2");
        payload
    }

    fn battery_port(battery: u8) -> ScriptedPort {
        ScriptedPort::default()
            .answer(Request::BatteryStatic(battery), SequenceState::new(0, 0), &bix(45_000, 200, 12))
            .answer(Request::BatteryDynamic(battery), SequenceState::new(1, 1), &bst(1, 10, 50, 8_000))
    }

    #[test]
    fn battery_uevent_runs_two_requests() {
        let mut port = battery_port(1);
        let mut counters = SequenceState::new(0, 0);

        let output = execute(Query::Bat1Uevent, &mut port, config(), &mut counters).unwrap();
        assert!(output.contains("POWER_SUPPLY_STATUS=Discharging\n"));
        assert!(output.contains("POWER_SUPPLY_CAPACITY=25\n"));
        assert!(output.contains("POWER_SUPPLY_TECHNOLOGY=LION\n"));
        assert!(output.ends_with("POWER_SUPPLY_NAME=BAT1\n"));
        assert_eq!(counters, SequenceState::new(2, 2));
        assert_eq!(port.writes, 4);
    }

    #[test]
    fn battery_pretty_report() {
        let mut port = battery_port(2);
        let mut counters = SequenceState::new(0, 0);

        let output = execute(Query::Bat2Pretty, &mut port, config(), &mut counters).unwrap();
        assert_eq!(
            output,
            "State: Discharging\nVoltage: 8.0V\nPercentage: 25%\nRemaining: 5.00h\n"
        );
        assert_eq!(counters, SequenceState::new(2, 2));
    }

    #[test]
    fn adapter_views() {
        let counters = SequenceState::new(7, 300);
        let mut port = ScriptedPort::default().answer(Request::PowerSource(1), counters, &[1, 0, 0, 0]);
        let mut state = counters;
        let output = execute(Query::Adp1Uevent, &mut port, config(), &mut state).unwrap();
        assert_eq!(output, "POWER_SUPPLY_ONLINE=1\nPOWER_SUPPLY_NAME=ADP1\n");

        let mut port = ScriptedPort::default().answer(Request::PowerSource(1), state, &[0, 0, 0, 0]);
        let output = execute(Query::Adp1Psr, &mut port, config(), &mut state).unwrap();
        assert_eq!(output, "POWER_SUPPLY_ONLINE=0\nPower Source: 0x0\n");
        assert_eq!(state, SequenceState::new(9, 302));
    }

    fn guarded(dir: &tempfile::TempDir, seq: u8, cnt: u16) -> (CounterStore, PersistentCounters) {
        let store = CounterStore::new(dir.path().join(".counters.json"));
        let mut counters = PersistentCounters::load(store.clone()).unwrap();
        counters.seq = seq;
        counters.cnt = cnt;
        (store, counters)
    }

    #[test]
    fn counters_saved_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let (store, mut counters) = guarded(&dir, 3, 4);
        let mut port = ScriptedPort::default().answer(Request::BaseStatus, *counters, &[0x2A]);

        let output = execute(Query::Lid0Gbos, &mut port, config(), &mut counters).unwrap();
        assert_eq!(output, "Base Status: 0x2a\n");
        drop(counters);
        assert_eq!(store.load().unwrap(), SequenceState::new(4, 5));
    }

    #[test]
    fn counters_saved_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (store, mut counters) = guarded(&dir, 3, 4);
        // The EC acknowledges but never answers
        let mut port = ScriptedPort::default().reply(&frame::encode_ack(3));

        let err = execute(Query::Lid0Gbos, &mut port, config(), &mut counters).unwrap_err();
        assert!(!err.downcast_ref::<ECError>().is_some_and(ECError::is_recoverable));
        drop(counters);
        assert_eq!(store.load().unwrap(), SequenceState::new(4, 5));
    }

    #[test]
    fn counters_saved_after_retry_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let (store, mut counters) = guarded(&dir, 3, 4);
        let nak = frame::encode_ack_with_type(frame::AckType::Nak, 3);
        let mut port = ScriptedPort::default().reply(&nak).reply(&nak);

        let err = execute(Query::Bat1Sta, &mut port, config(), &mut counters).unwrap_err();
        assert!(err.downcast_ref::<ECError>().is_some_and(ECError::is_recoverable));
        drop(counters);
        // Overrides are kept even though nothing advanced
        assert_eq!(store.load().unwrap(), SequenceState::new(3, 4));
    }

    #[test]
    fn number_overrides() {
        assert_eq!(parse_u8("0x1f"), Ok(0x1F));
        assert_eq!(parse_u16(" 0X0201 "), Ok(0x0201));
        assert_eq!(parse_u16("513"), Ok(513));
        assert_eq!(parse_u32("3000000"), Ok(3_000_000));
        assert!(parse_u8("0x100").is_err());
        assert!(parse_u16("65536").is_err());
        assert!(parse_u8("seven").is_err());
    }

    #[test]
    fn cli_parses_catalog_names() {
        let cli = Cli::try_parse_from(["surface-ec", "-s", "0x10", "-c", "42", "bat1.uevent"]).unwrap();
        assert_eq!(cli.query, Query::Bat1Uevent);
        assert_eq!(cli.seq, Some(0x10));
        assert_eq!(cli.cnt, Some(42));
        assert_eq!(cli.device, DEFAULT_DEVICE);
        assert!(Cli::try_parse_from(["surface-ec", "-s", "256", "bat1._sta"]).is_err());
    }
}
