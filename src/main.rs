use clap::Parser;
use pnet::datalink::NetworkInterface;
use std::io;
use std::io::BufRead;
use std::io::Write;
use std::time::Duration;
use tracing::debug;
use tracing::warn;

use synscan::AddressingContext;
use synscan::CountPolicy;
use synscan::DEFAULT_READ_TIMEOUT;
use synscan::DatalinkHandle;
use synscan::INSPECTION_CEILING;
use synscan::Logger;
use synscan::ScanConfig;
use synscan::ScanError;
use synscan::ScanReport;
use synscan::ScanSession;
use synscan::layer;
use synscan::tcp_syn_scan;
use synscan::tcp_syn_scan_input;
use synscan::utils;

/// Half-open (SYN) port scanner for a single target, routed through the default gateway.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Interface used to send and capture, defaults to the one owning --src-ip
    #[arg(short, long)]
    interface: Option<String>,

    /// Our own ipv4 address
    #[arg(short, long)]
    src_ip: Option<String>,

    /// Our own mac address, defaults to the interface mac
    #[arg(long)]
    src_mac: Option<String>,

    /// Mac address of the default gateway
    #[arg(short, long)]
    gateway_mac: Option<String>,

    /// Target ipv4 address
    #[arg(short, long)]
    target: Option<String>,

    /// Ports to scan, repeatable; without it ports are read from stdin one per line
    #[arg(short, long)]
    port: Vec<String>,

    /// Capture poll timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_READ_TIMEOUT)]
    timeout_ms: u64,

    /// Captured frames inspected before a port is reported as filtered
    #[arg(long, default_value_t = INSPECTION_CEILING)]
    ceiling: usize,

    /// Only frames sent by the target consume the inspection budget
    #[arg(long, default_value_t = false)]
    count_target_only: bool,

    /// Print every report as one json object per line
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Log level: trace, debug, info, warn or none
    #[arg(long, default_value = "warn")]
    log: String,

    /// Print the interfaces and exit
    #[arg(long, default_value_t = false)]
    list_interfaces: bool,
}

/// Ask the operator for one line, `None` on end of input.
fn prompt(msg: &str) -> Result<Option<String>, ScanError> {
    print!(" {} > ", msg);
    io::stdout().flush()?;
    let mut line = String::new();
    let n = io::stdin().lock().read_line(&mut line)?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn arg_or_prompt(arg: Option<String>, msg: &str, field: &'static str) -> Result<String, ScanError> {
    match arg {
        Some(a) => Ok(a),
        None => match prompt(msg)? {
            Some(a) => Ok(a),
            None => Err(ScanError::UnresolvedAddress { field }),
        },
    }
}

fn print_interfaces() {
    for interface in layer::list_interfaces() {
        let mac = match interface.mac {
            Some(m) => m.to_string(),
            None => String::from("-"),
        };
        let ips: Vec<String> = interface.ips.iter().map(|ip| ip.to_string()).collect();
        println!("{:<16} {:<18} {}", interface.name, mac, ips.join(", "));
    }
}

fn resolve(args: &Args) -> Result<(AddressingContext, NetworkInterface), ScanError> {
    let interface = match &args.interface {
        Some(name) => Some(layer::find_interface_by_name(name)?),
        None => None,
    };
    let src_ip = match (&args.src_ip, &interface) {
        (Some(s), _) => s.clone(),
        // the interface already tells us who we are
        (None, Some(i)) => match layer::interface_ipv4(i) {
            Some(ipv4) => ipv4.to_string(),
            None => arg_or_prompt(None, "own ip", "src ipv4")?,
        },
        (None, None) => arg_or_prompt(None, "own ip", "src ipv4")?,
    };
    let src_ipv4 = utils::parse_ipv4(&src_ip)?;
    let interface = match interface {
        Some(i) => i,
        None => layer::find_interface_by_src(src_ipv4)?,
    };
    let src_mac = match &args.src_mac {
        Some(m) => utils::parse_mac(m)?,
        None => layer::interface_mac(&interface)?,
    };
    let gateway_mac = arg_or_prompt(args.gateway_mac.clone(), "gateway mac", "gateway mac")?;
    let gateway_mac = utils::parse_mac(&gateway_mac)?;
    let target = arg_or_prompt(args.target.clone(), "target ip", "dst ipv4")?;
    let dst_ipv4 = utils::parse_ipv4(&target)?;

    let ctx = AddressingContext::new(src_ipv4, src_mac, gateway_mac, dst_ipv4);
    ctx.check()?;
    Ok((ctx, interface))
}

fn report(report: &ScanReport, json: bool) -> Result<(), ScanError> {
    if json {
        println!("{}", serde_json::to_string(report)?);
    } else {
        println!(" {}\n", report);
    }
    Ok(())
}

fn run(args: Args) -> Result<(), ScanError> {
    let logger: Logger = args.log.parse()?;
    logger.init()?;

    if args.list_interfaces {
        print_interfaces();
        return Ok(());
    }

    let (ctx, interface) = resolve(&args)?;
    debug!("addressing: {:?}, interface: {}", ctx, interface.name);
    let mut handle = DatalinkHandle::open(interface, Duration::from_millis(args.timeout_ms))?;
    let config = ScanConfig {
        inspection_ceiling: args.ceiling.max(1),
        count_policy: if args.count_target_only {
            CountPolicy::TargetOnly
        } else {
            CountPolicy::EveryFrame
        },
    };

    let mut session = ScanSession::new();
    if !args.port.is_empty() {
        // validate the whole list before the first probe leaves
        let mut ports = Vec::new();
        for p in &args.port {
            ports.push(utils::parse_port(p)?);
        }
        for dst_port in ports {
            let r = tcp_syn_scan(&mut handle, &ctx, dst_port, &config)?;
            report(&r, args.json)?;
            session.push(r);
        }
    } else {
        loop {
            let line = match prompt("target port")? {
                Some(l) => l,
                None => break,
            };
            match line.as_str() {
                "" => continue,
                "q" | "quit" | "exit" => break,
                _ => (),
            }
            match tcp_syn_scan_input(&mut handle, &ctx, &line, &config) {
                Ok(r) => {
                    report(&r, args.json)?;
                    session.push(r);
                }
                Err(ScanError::InvalidPort { input }) => {
                    warn!("skip invalid port [{}]", input);
                    eprintln!(" invalid port [{}], expect 0-65535", input);
                }
                Err(e) => return Err(e),
            }
        }
    }

    if !args.json && !session.is_empty() {
        println!("{}", session);
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("synscan: {}", e);
        std::process::exit(1);
    }
}
