use pnet::packet::Packet;
use pnet::packet::ethernet::EtherTypes;
use pnet::packet::ethernet::EthernetPacket;
use pnet::packet::ethernet::MutableEthernetPacket;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4;
use pnet::packet::ipv4::Ipv4Flags;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv4::MutableIpv4Packet;
use pnet::packet::tcp;
use pnet::packet::tcp::MutableTcpPacket;
use pnet::packet::tcp::TcpFlags;
use pnet::packet::tcp::TcpOption;
use pnet::packet::tcp::TcpPacket;
use rand::Rng;
use std::net::Ipv4Addr;
use std::panic::Location;

use crate::AddressingContext;
use crate::error::ScanError;
use crate::layer::ETHERNET_HEADER_SIZE;
use crate::layer::ETHERNET_MIN_FRAME_SIZE;
use crate::layer::IPV4_HEADER_SIZE;
use crate::layer::TCP_HEADER_SIZE;
use crate::utils::random_src_port;

// same values as nmap's default syn probe
pub const PROBE_WINDOW: u16 = 1024;
pub const PROBE_MSS: u16 = 1460;
pub const PROBE_TTL: u8 = 128;

const TCP_DATA_SIZE: usize = 0;
// TCP options size
const MSS_SIZE: usize = 4;
// options are padded up to a 32 bit boundary
const TCP_OPTIONS_SIZE: usize = (MSS_SIZE + 3) / 4 * 4;
const IPV4_PACKET_SIZE: usize = IPV4_HEADER_SIZE + TCP_HEADER_SIZE + TCP_OPTIONS_SIZE + TCP_DATA_SIZE;

/// The per probe random fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSeed {
    pub src_port: u16,
    pub sequence: u32,
    pub ip_id: u16,
}

impl ProbeSeed {
    pub fn random() -> ProbeSeed {
        let mut rng = rand::rng();
        ProbeSeed::from_rng(&mut rng)
    }
    pub fn from_rng<R: Rng>(rng: &mut R) -> ProbeSeed {
        ProbeSeed {
            src_port: random_src_port(rng),
            sequence: rng.random(),
            ip_id: rng.random(),
        }
    }
}

/// Build the ethernet frame carrying one SYN probe to `dst_port`.
/// The frame goes to the gateway mac, never to the target mac.
pub fn build_syn_probe(
    ctx: &AddressingContext,
    dst_port: u16,
    seed: ProbeSeed,
) -> Result<Vec<u8>, ScanError> {
    let src_ipv4 = ctx.src_ipv4;
    let dst_ipv4 = ctx.dst_ipv4;

    // ip header
    let mut ip_buff = [0u8; IPV4_PACKET_SIZE];
    let mut ip_header = match MutableIpv4Packet::new(&mut ip_buff) {
        Some(p) => p,
        None => {
            return Err(ScanError::BuildPacketError {
                location: format!("{}", Location::caller()),
            });
        }
    };
    ip_header.set_version(4);
    ip_header.set_header_length(5);
    ip_header.set_dscp(0);
    ip_header.set_ecn(0);
    ip_header.set_source(src_ipv4);
    ip_header.set_destination(dst_ipv4);
    ip_header.set_total_length(IPV4_PACKET_SIZE as u16);
    ip_header.set_identification(seed.ip_id);
    ip_header.set_flags(Ipv4Flags::DontFragment);
    ip_header.set_fragment_offset(0);
    ip_header.set_ttl(PROBE_TTL);
    ip_header.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
    let c = ipv4::checksum(&ip_header.to_immutable());
    ip_header.set_checksum(c);

    // tcp header
    let mut tcp_header = match MutableTcpPacket::new(&mut ip_buff[IPV4_HEADER_SIZE..]) {
        Some(p) => p,
        None => {
            return Err(ScanError::BuildPacketError {
                location: format!("{}", Location::caller()),
            });
        }
    };
    tcp_header.set_source(seed.src_port);
    tcp_header.set_destination(dst_port);
    tcp_header.set_sequence(seed.sequence);
    tcp_header.set_acknowledgement(0);
    tcp_header.set_reserved(0);
    tcp_header.set_flags(TcpFlags::SYN);
    tcp_header.set_urgent_ptr(0);
    tcp_header.set_window(PROBE_WINDOW);
    tcp_header.set_data_offset(((TCP_HEADER_SIZE + TCP_OPTIONS_SIZE) / 4) as u8);
    tcp_header.set_options(&[TcpOption::mss(PROBE_MSS)]);
    let checksum = tcp::ipv4_checksum(&tcp_header.to_immutable(), &src_ipv4, &dst_ipv4);
    tcp_header.set_checksum(checksum);

    // ethernet header, short frames get zero padding up to the minimum size
    let frame_len = (ETHERNET_HEADER_SIZE + IPV4_PACKET_SIZE).max(ETHERNET_MIN_FRAME_SIZE);
    let mut buff = vec![0u8; frame_len];
    let mut ethernet_packet = match MutableEthernetPacket::new(&mut buff) {
        Some(p) => p,
        None => {
            return Err(ScanError::BuildPacketError {
                location: format!("{}", Location::caller()),
            });
        }
    };
    ethernet_packet.set_destination(ctx.gateway_mac);
    ethernet_packet.set_source(ctx.src_mac);
    ethernet_packet.set_ethertype(EtherTypes::Ipv4);
    buff[ETHERNET_HEADER_SIZE..ETHERNET_HEADER_SIZE + IPV4_PACKET_SIZE].copy_from_slice(&ip_buff);
    Ok(buff)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynResponse {
    Open,
    Closed,
    NotThisPacket,
}

/// Decide whether a captured frame answers our SYN to `dst_ipv4:dst_port`.
pub fn classify_syn_response(frame: &[u8], dst_ipv4: Ipv4Addr, dst_port: u16) -> SynResponse {
    let ethernet_packet = match EthernetPacket::new(frame) {
        Some(p) => p,
        None => return SynResponse::NotThisPacket,
    };
    if ethernet_packet.get_ethertype() != EtherTypes::Ipv4 {
        return SynResponse::NotThisPacket;
    }
    let ipv4_packet = match Ipv4Packet::new(ethernet_packet.payload()) {
        Some(p) => p,
        None => return SynResponse::NotThisPacket,
    };
    if ipv4_packet.get_next_level_protocol() != IpNextHeaderProtocols::Tcp {
        return SynResponse::NotThisPacket;
    }
    let tcp_packet = match TcpPacket::new(ipv4_packet.payload()) {
        Some(p) => p,
        None => return SynResponse::NotThisPacket,
    };
    if ipv4_packet.get_source() != dst_ipv4 {
        return SynResponse::NotThisPacket;
    }
    if tcp_packet.get_source() != dst_port {
        return SynResponse::NotThisPacket;
    }

    let flags = tcp_packet.get_flags();
    // a reply to our syn must acknowledge it
    if flags & TcpFlags::ACK == 0 {
        return SynResponse::NotThisPacket;
    }
    if flags & TcpFlags::SYN != 0 {
        SynResponse::Open
    } else if flags & TcpFlags::RST != 0 {
        SynResponse::Closed
    } else {
        SynResponse::NotThisPacket
    }
}

/// Whether the frame is an ipv4 datagram sent by `dst_ipv4`, whatever it carries.
pub fn is_from_target(frame: &[u8], dst_ipv4: Ipv4Addr) -> bool {
    match EthernetPacket::new(frame) {
        Some(ethernet_packet) if ethernet_packet.get_ethertype() == EtherTypes::Ipv4 => {
            match Ipv4Packet::new(ethernet_packet.payload()) {
                Some(ipv4_packet) => ipv4_packet.get_source() == dst_ipv4,
                None => false,
            }
        }
        _ => false,
    }
}
