#![doc = include_str!("lib.md")]
use pnet::datalink::MacAddr;
use prettytable::Cell;
use prettytable::Row;
use prettytable::Table;
use prettytable::row;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::time::Duration;
use tracing::Level;

pub mod error;
pub mod layer;
pub mod scan;
pub mod utils;

pub use error::ScanError;
pub use layer::DatalinkHandle;
pub use layer::FrameIo;
pub use scan::CountPolicy;
pub use scan::InspectionCounter;
pub use scan::ScanConfig;
pub use scan::tcp_syn_scan;
pub use scan::tcp_syn_scan_input;
pub use scan::tcp_syn_scan_with_seed;
pub use scan::tcp::ProbeSeed;
pub use scan::tcp::SynResponse;
pub use scan::tcp::build_syn_probe;
pub use scan::tcp::classify_syn_response;

/// Per call capture timeout of the live handle, in milliseconds.
pub const DEFAULT_READ_TIMEOUT: u64 = 1000;
/// Frames inspected for one request before it is reported as filtered.
pub const INSPECTION_CEILING: usize = 1024;
/// Ephemeral range the probe source port is drawn from.
pub const SRC_PORT_RANGE: RangeInclusive<u16> = 50000..=58999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Logger {
    Debug,
    Warn,
    Info,
    Trace,
    None,
}

impl Logger {
    /// Install a global `tracing` subscriber printing to stderr.
    pub fn init(self) -> Result<(), ScanError> {
        let level = match self {
            Logger::Trace => Level::TRACE,
            Logger::Debug => Level::DEBUG,
            Logger::Info => Level::INFO,
            Logger::Warn => Level::WARN,
            Logger::None => return Ok(()),
        };
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .finish();
        match tracing::subscriber::set_global_default(subscriber) {
            Ok(_) => Ok(()),
            Err(e) => Err(ScanError::InitLoggerError { e: e.to_string() }),
        }
    }
}

impl std::str::FromStr for Logger {
    type Err = ScanError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Logger::Trace),
            "debug" => Ok(Logger::Debug),
            "info" => Ok(Logger::Info),
            "warn" => Ok(Logger::Warn),
            "none" | "off" => Ok(Logger::None),
            _ => Err(ScanError::InitLoggerError {
                e: format!("unknown log level [{}]", s),
            }),
        }
    }
}

/// Operator supplied addressing, resolved once before the first scan.
/// The probe always leaves through the gateway, so the target mac is never needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AddressingContext {
    pub src_ipv4: Ipv4Addr,
    pub src_mac: MacAddr,
    pub gateway_mac: MacAddr,
    pub dst_ipv4: Ipv4Addr,
}

impl AddressingContext {
    pub fn new(
        src_ipv4: Ipv4Addr,
        src_mac: MacAddr,
        gateway_mac: MacAddr,
        dst_ipv4: Ipv4Addr,
    ) -> AddressingContext {
        AddressingContext {
            src_ipv4,
            src_mac,
            gateway_mac,
            dst_ipv4,
        }
    }
    /// Build the context from raw operator input.
    /// Every field is validated before anything touches the wire.
    pub fn parse(
        src_ipv4: &str,
        src_mac: &str,
        gateway_mac: &str,
        dst_ipv4: &str,
    ) -> Result<AddressingContext, ScanError> {
        let src_ipv4 = utils::parse_ipv4(src_ipv4)?;
        let src_mac = utils::parse_mac(src_mac)?;
        let gateway_mac = utils::parse_mac(gateway_mac)?;
        let dst_ipv4 = utils::parse_ipv4(dst_ipv4)?;
        let ctx = AddressingContext::new(src_ipv4, src_mac, gateway_mac, dst_ipv4);
        ctx.check()?;
        Ok(ctx)
    }
    /// Unspecified addresses mean the operator never resolved them.
    pub fn check(&self) -> Result<(), ScanError> {
        if self.src_ipv4.is_unspecified() {
            return Err(ScanError::UnresolvedAddress { field: "src ipv4" });
        }
        if self.src_mac == MacAddr::zero() {
            return Err(ScanError::UnresolvedAddress { field: "src mac" });
        }
        if self.gateway_mac == MacAddr::zero() {
            return Err(ScanError::UnresolvedAddress {
                field: "gateway mac",
            });
        }
        if self.dst_ipv4.is_unspecified() {
            return Err(ScanError::UnresolvedAddress { field: "dst ipv4" });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Open,
    Closed,
    FilteredOrTimedOut,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Verdict::Open => "OPEN",
            Verdict::Closed => "CLOSED",
            Verdict::FilteredOrTimedOut => "BLOCKED by firewall(or timeout)",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub target: Ipv4Addr,
    pub port: u16,
    pub verdict: Verdict,
    /// Captured frames examined before the verdict.
    pub inspected: usize,
    pub rtt: Duration,
}

impl ScanReport {
    pub fn new(
        target: Ipv4Addr,
        port: u16,
        verdict: Verdict,
        inspected: usize,
        rtt: Duration,
    ) -> ScanReport {
        ScanReport {
            target,
            port,
            verdict,
            inspected,
            rtt,
        }
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}:{}] {}", self.target, self.port, self.verdict)
    }
}

/// Every report produced during one run, in request order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSession {
    pub reports: Vec<ScanReport>,
}

impl ScanSession {
    pub fn new() -> ScanSession {
        ScanSession {
            reports: Vec::new(),
        }
    }
    pub fn push(&mut self, report: ScanReport) {
        self.reports.push(report);
    }
    pub fn len(&self) -> usize {
        self.reports.len()
    }
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
    pub fn count(&self, verdict: Verdict) -> usize {
        self.reports.iter().filter(|r| r.verdict == verdict).count()
    }
}

impl fmt::Display for ScanSession {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut table = Table::new();
        table.add_row(Row::new(vec![
            Cell::new("SYN Scan Results").style_spec("c").with_hspan(5),
        ]));
        table.add_row(row![c -> "target", c -> "port", c -> "verdict", c -> "frames", c -> "rtt"]);
        for report in &self.reports {
            let ip = report.target;
            let port = report.port;
            let verdict_str = report.verdict.to_string();
            let inspected = report.inspected;
            let rtt_str = format!("{:.3}ms", report.rtt.as_secs_f64() * 1000.0);
            table.add_row(row![c -> ip, c -> port, c -> verdict_str, c -> inspected, c -> rtt_str]);
        }
        let summary = format!(
            "open: {}, closed: {}, filtered: {}",
            self.count(Verdict::Open),
            self.count(Verdict::Closed),
            self.count(Verdict::FilteredOrTimedOut)
        );
        table.add_row(Row::new(vec![
            Cell::new(&summary).style_spec("c").with_hspan(5),
        ]));
        write!(f, "{}", table)
    }
}
