use std::time::Instant;
use tracing::Level;
use tracing::debug;
use tracing::trace;

use crate::AddressingContext;
use crate::INSPECTION_CEILING;
use crate::ScanReport;
use crate::Verdict;
use crate::error::ScanError;
use crate::layer::FrameIo;
use crate::utils::parse_port;

pub mod tcp;

use tcp::ProbeSeed;
use tcp::SynResponse;
use tcp::build_syn_probe;
use tcp::classify_syn_response;
use tcp::is_from_target;

/// Which captured frames consume the inspection budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountPolicy {
    /// Every frame the interface delivers, background traffic included.
    #[default]
    EveryFrame,
    /// Only ipv4 frames sent by the target.
    TargetOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    pub inspection_ceiling: usize,
    pub count_policy: CountPolicy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            inspection_ceiling: INSPECTION_CEILING,
            count_policy: CountPolicy::EveryFrame,
        }
    }
}

/// Frames examined since the current request was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InspectionCounter {
    count: usize,
    ceiling: usize,
}

impl InspectionCounter {
    pub fn new(ceiling: usize) -> InspectionCounter {
        InspectionCounter { count: 0, ceiling }
    }
    /// Count one frame, returns true once the ceiling is reached.
    pub fn inspect(&mut self) -> bool {
        self.count += 1;
        self.count >= self.ceiling
    }
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Send one SYN probe with fresh random fields and wait for the verdict.
pub fn tcp_syn_scan<H: FrameIo + ?Sized>(
    handle: &mut H,
    ctx: &AddressingContext,
    dst_port: u16,
    config: &ScanConfig,
) -> Result<ScanReport, ScanError> {
    tcp_syn_scan_with_seed(handle, ctx, dst_port, ProbeSeed::random(), config)
}

/// Same as [`tcp_syn_scan`] but the port comes straight from the operator.
/// Malformed input is rejected before any frame is built or sent.
pub fn tcp_syn_scan_input<H: FrameIo + ?Sized>(
    handle: &mut H,
    ctx: &AddressingContext,
    input: &str,
    config: &ScanConfig,
) -> Result<ScanReport, ScanError> {
    let dst_port = parse_port(input)?;
    tcp_syn_scan(handle, ctx, dst_port, config)
}

pub fn tcp_syn_scan_with_seed<H: FrameIo + ?Sized>(
    handle: &mut H,
    ctx: &AddressingContext,
    dst_port: u16,
    seed: ProbeSeed,
    config: &ScanConfig,
) -> Result<ScanReport, ScanError> {
    let dst_ipv4 = ctx.dst_ipv4;
    let frame = build_syn_probe(ctx, dst_port, seed)?;

    let start = Instant::now();
    handle.send_frame(&frame)?;
    debug!(
        "syn sent to {}:{} from port {}, seq {:#010x}, ip id {}",
        dst_ipv4, dst_port, seed.src_port, seed.sequence, seed.ip_id
    );

    let mut counter = InspectionCounter::new(config.inspection_ceiling);
    let verdict = loop {
        let captured = match handle.next_frame()? {
            Some(c) => c,
            None => continue,
        };
        if config.count_policy == CountPolicy::TargetOnly && !is_from_target(captured, dst_ipv4)
        {
            continue;
        }
        if counter.inspect() {
            break Verdict::FilteredOrTimedOut;
        }
        if tracing::enabled!(Level::TRACE) {
            trace!("frame #{}: {}", counter.count(), hex::encode(captured));
        }
        match classify_syn_response(captured, dst_ipv4, dst_port) {
            SynResponse::Open => break Verdict::Open,
            SynResponse::Closed => break Verdict::Closed,
            SynResponse::NotThisPacket => (),
        }
    };
    let rtt = start.elapsed();
    let inspected = counter.count();
    debug!(
        "{}:{} decided {:?} after {} frames in {:?}",
        dst_ipv4, dst_port, verdict, inspected, rtt
    );
    Ok(ScanReport::new(dst_ipv4, dst_port, verdict, inspected, rtt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::tcp::tests::reply_frame;
    use crate::scan::tcp::tests::test_ctx;
    use pnet::packet::Packet;
    use pnet::packet::ethernet::EthernetPacket;
    use pnet::packet::ipv4::Ipv4Packet;
    use pnet::packet::tcp::TcpFlags;
    use pnet::packet::tcp::TcpPacket;
    use std::collections::HashSet;
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;

    enum Capture {
        Frame(Vec<u8>),
        Miss,
        Fatal,
    }

    /// Replays a fixed capture script, then behaves like a silent network.
    struct ScriptedHandle {
        sent: Vec<Vec<u8>>,
        script: VecDeque<Capture>,
        current: Vec<u8>,
        polls: usize,
        max_polls: usize,
        fail_send: bool,
    }

    impl ScriptedHandle {
        fn new(script: Vec<Capture>) -> ScriptedHandle {
            ScriptedHandle {
                sent: Vec::new(),
                script: script.into(),
                current: Vec::new(),
                polls: 0,
                max_polls: 100_000,
                fail_send: false,
            }
        }
    }

    impl FrameIo for ScriptedHandle {
        fn send_frame(&mut self, frame: &[u8]) -> Result<(), ScanError> {
            if self.fail_send {
                return Err(ScanError::SendFailed {
                    interface: String::from("test0"),
                    e: String::from("network is down"),
                });
            }
            self.sent.push(frame.to_vec());
            Ok(())
        }
        fn next_frame(&mut self) -> Result<Option<&[u8]>, ScanError> {
            self.polls += 1;
            assert!(self.polls <= self.max_polls, "scan loop never finished");
            match self.script.pop_front() {
                Some(Capture::Frame(f)) => {
                    self.current = f;
                    Ok(Some(self.current.as_slice()))
                }
                Some(Capture::Miss) | None => Ok(None),
                Some(Capture::Fatal) => Err(ScanError::FatalCapture {
                    interface: String::from("test0"),
                    e: String::from("no such device"),
                }),
            }
        }
    }

    fn noise() -> Vec<u8> {
        let ctx = test_ctx();
        reply_frame(&ctx, Ipv4Addr::new(192, 168, 5, 77), 443, TcpFlags::ACK)
    }

    #[test]
    fn test_scan_open() {
        let ctx = test_ctx();
        let script = vec![
            Capture::Miss,
            Capture::Frame(noise()),
            Capture::Frame(reply_frame(&ctx, ctx.dst_ipv4, 80, TcpFlags::ACK)),
            Capture::Frame(reply_frame(&ctx, ctx.dst_ipv4, 80, TcpFlags::SYN | TcpFlags::ACK)),
        ];
        let mut handle = ScriptedHandle::new(script);
        let report = tcp_syn_scan(&mut handle, &ctx, 80, &ScanConfig::default()).unwrap();
        assert_eq!(report.verdict, Verdict::Open);
        assert_eq!(report.inspected, 3);
        assert_eq!(report.to_string(), "[10.0.0.5:80] OPEN");
        assert_eq!(handle.sent.len(), 1);
    }
    #[test]
    fn test_scan_closed() {
        let ctx = test_ctx();
        let script = vec![
            Capture::Frame(reply_frame(&ctx, ctx.dst_ipv4, 23, TcpFlags::RST | TcpFlags::ACK)),
            Capture::Frame(reply_frame(&ctx, ctx.dst_ipv4, 22, TcpFlags::RST | TcpFlags::ACK)),
        ];
        let mut handle = ScriptedHandle::new(script);
        let report = tcp_syn_scan(&mut handle, &ctx, 22, &ScanConfig::default()).unwrap();
        assert_eq!(report.verdict, Verdict::Closed);
        assert_eq!(report.inspected, 2);
        assert_eq!(report.to_string(), "[10.0.0.5:22] CLOSED");
    }
    #[test]
    fn test_scan_timeout() {
        let ctx = test_ctx();
        let mut script = Vec::new();
        for i in 0..INSPECTION_CEILING {
            if i % 2 == 0 {
                script.push(Capture::Frame(noise()));
            } else {
                script.push(Capture::Frame(reply_frame(&ctx, ctx.dst_ipv4, 443, TcpFlags::ACK)));
            }
            // misses never count
            script.push(Capture::Miss);
        }
        let mut handle = ScriptedHandle::new(script);
        let report = tcp_syn_scan(&mut handle, &ctx, 443, &ScanConfig::default()).unwrap();
        assert_eq!(report.verdict, Verdict::FilteredOrTimedOut);
        assert_eq!(report.inspected, INSPECTION_CEILING);
        assert_eq!(
            report.to_string(),
            "[10.0.0.5:443] BLOCKED by firewall(or timeout)"
        );

        // the next request starts with a fresh budget
        let script = vec![Capture::Frame(reply_frame(
            &ctx,
            ctx.dst_ipv4,
            443,
            TcpFlags::SYN | TcpFlags::ACK,
        ))];
        handle.script = script.into();
        let report = tcp_syn_scan(&mut handle, &ctx, 443, &ScanConfig::default()).unwrap();
        assert_eq!(report.verdict, Verdict::Open);
        assert_eq!(report.inspected, 1);
        assert_eq!(handle.sent.len(), 2);
    }
    #[test]
    fn test_scan_ceiling_boundary() {
        let ctx = test_ctx();
        let open = || reply_frame(&ctx, ctx.dst_ipv4, 80, TcpFlags::SYN | TcpFlags::ACK);
        let config = ScanConfig {
            inspection_ceiling: 8,
            count_policy: CountPolicy::EveryFrame,
        };

        // the decisive frame is the last one classified
        let mut script: Vec<Capture> = (0..6).map(|_| Capture::Frame(noise())).collect();
        script.push(Capture::Frame(open()));
        let mut handle = ScriptedHandle::new(script);
        let report = tcp_syn_scan(&mut handle, &ctx, 80, &config).unwrap();
        assert_eq!(report.verdict, Verdict::Open);
        assert_eq!(report.inspected, 7);

        // the frame reaching the ceiling is not classified any more
        let mut script: Vec<Capture> = (0..7).map(|_| Capture::Frame(noise())).collect();
        script.push(Capture::Frame(open()));
        let mut handle = ScriptedHandle::new(script);
        let report = tcp_syn_scan(&mut handle, &ctx, 80, &config).unwrap();
        assert_eq!(report.verdict, Verdict::FilteredOrTimedOut);
        assert_eq!(report.inspected, 8);
    }
    #[test]
    fn test_scan_target_only_policy() {
        let ctx = test_ctx();
        let config = ScanConfig {
            inspection_ceiling: 4,
            count_policy: CountPolicy::TargetOnly,
        };
        let mut script: Vec<Capture> = (0..100).map(|_| Capture::Frame(noise())).collect();
        script.push(Capture::Frame(reply_frame(&ctx, ctx.dst_ipv4, 80, TcpFlags::ACK)));
        script.push(Capture::Frame(reply_frame(
            &ctx,
            ctx.dst_ipv4,
            80,
            TcpFlags::SYN | TcpFlags::ACK,
        )));
        let mut handle = ScriptedHandle::new(script);
        let report = tcp_syn_scan(&mut handle, &ctx, 80, &config).unwrap();
        assert_eq!(report.verdict, Verdict::Open);
        assert_eq!(report.inspected, 2);

        // with the default policy the background traffic exhausts the budget
        let mut script: Vec<Capture> = (0..100).map(|_| Capture::Frame(noise())).collect();
        script.push(Capture::Frame(reply_frame(
            &ctx,
            ctx.dst_ipv4,
            80,
            TcpFlags::SYN | TcpFlags::ACK,
        )));
        let mut handle = ScriptedHandle::new(script);
        let config = ScanConfig {
            count_policy: CountPolicy::EveryFrame,
            ..config
        };
        let report = tcp_syn_scan(&mut handle, &ctx, 80, &config).unwrap();
        assert_eq!(report.verdict, Verdict::FilteredOrTimedOut);
    }
    #[test]
    fn test_scan_same_verdict_fresh_probe() {
        let ctx = test_ctx();
        let mut handle = ScriptedHandle::new(Vec::new());
        let mut reports = Vec::new();
        for _ in 0..4 {
            handle.script = vec![Capture::Frame(reply_frame(
                &ctx,
                ctx.dst_ipv4,
                8080,
                TcpFlags::RST | TcpFlags::ACK,
            ))]
            .into();
            reports.push(tcp_syn_scan(&mut handle, &ctx, 8080, &ScanConfig::default()).unwrap());
        }
        assert_eq!(handle.sent.len(), 4);
        for report in &reports {
            assert_eq!(report.verdict, Verdict::Closed);
        }

        // (src port, sequence, ip id) of every probe sent
        let fields: Vec<(u16, u32, u16)> = handle
            .sent
            .iter()
            .map(|frame| {
                let ethernet_packet = EthernetPacket::new(frame).unwrap();
                let ipv4_packet = Ipv4Packet::new(ethernet_packet.payload()).unwrap();
                let tcp_packet = TcpPacket::new(ipv4_packet.payload()).unwrap();
                assert_eq!(tcp_packet.get_destination(), 8080);
                (
                    tcp_packet.get_source(),
                    tcp_packet.get_sequence(),
                    ipv4_packet.get_identification(),
                )
            })
            .collect();
        let sequences: HashSet<u32> = fields.iter().map(|f| f.1).collect();
        assert_eq!(sequences.len(), fields.len());
        let ip_ids: HashSet<u16> = fields.iter().map(|f| f.2).collect();
        assert!(ip_ids.len() > 1);
        let src_ports: HashSet<u16> = fields.iter().map(|f| f.0).collect();
        assert!(src_ports.len() > 1);
        for (src_port, _, _) in &fields {
            assert!((50000..=58999).contains(src_port));
        }
    }
    #[test]
    fn test_scan_with_seed() {
        let ctx = test_ctx();
        let seed = ProbeSeed {
            src_port: 50123,
            sequence: 0x9037d2b8,
            ip_id: 4242,
        };
        let script = vec![Capture::Frame(reply_frame(
            &ctx,
            ctx.dst_ipv4,
            80,
            TcpFlags::SYN | TcpFlags::ACK,
        ))];
        let mut handle = ScriptedHandle::new(script);
        tcp_syn_scan_with_seed(&mut handle, &ctx, 80, seed, &ScanConfig::default()).unwrap();
        assert_eq!(handle.sent[0], build_syn_probe(&ctx, 80, seed).unwrap());
    }
    #[test]
    fn test_scan_invalid_input() {
        let ctx = test_ctx();
        let mut handle = ScriptedHandle::new(Vec::new());
        let ret = tcp_syn_scan_input(&mut handle, &ctx, "99999", &ScanConfig::default());
        assert!(matches!(ret, Err(ScanError::InvalidPort { .. })));
        assert!(handle.sent.is_empty());
        assert_eq!(handle.polls, 0);

        handle.script = vec![Capture::Frame(reply_frame(
            &ctx,
            ctx.dst_ipv4,
            80,
            TcpFlags::SYN | TcpFlags::ACK,
        ))]
        .into();
        let report = tcp_syn_scan_input(&mut handle, &ctx, " 80\n", &ScanConfig::default()).unwrap();
        assert_eq!(report.verdict, Verdict::Open);
    }
    #[test]
    fn test_scan_fatal_errors() {
        let ctx = test_ctx();
        let script = vec![Capture::Frame(noise()), Capture::Miss, Capture::Fatal];
        let mut handle = ScriptedHandle::new(script);
        let ret = tcp_syn_scan(&mut handle, &ctx, 80, &ScanConfig::default());
        assert!(matches!(ret, Err(ScanError::FatalCapture { .. })));

        let mut handle = ScriptedHandle::new(Vec::new());
        handle.fail_send = true;
        let ret = tcp_syn_scan(&mut handle, &ctx, 80, &ScanConfig::default());
        assert!(matches!(ret, Err(ScanError::SendFailed { .. })));
        // nothing is read when the probe never left
        assert_eq!(handle.polls, 0);
    }
    #[test]
    fn test_inspection_counter() {
        let mut counter = InspectionCounter::new(3);
        assert!(!counter.inspect());
        assert!(!counter.inspect());
        assert!(counter.inspect());
        assert_eq!(counter.count(), 3);
        // past the ceiling it keeps reporting exhaustion
        assert!(counter.inspect());
        assert_eq!(counter.count(), 4);
    }
}
