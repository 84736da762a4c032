use pnet::datalink;
use pnet::datalink::Channel::Ethernet;
use pnet::datalink::ChannelType;
use pnet::datalink::Config;
use pnet::datalink::DataLinkReceiver;
use pnet::datalink::DataLinkSender;
use pnet::datalink::MacAddr;
use pnet::datalink::NetworkInterface;
use pnet::datalink::interfaces;
use std::io;
use std::io::ErrorKind;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::debug;
use tracing::warn;

use crate::error::ScanError;

pub const ETHERNET_HEADER_SIZE: usize = 14;
pub const IPV4_HEADER_SIZE: usize = 20;
pub const TCP_HEADER_SIZE: usize = 20;
/// 14 bytes of header and 46 bytes of data, the FCS is appended by the nic.
pub const ETHERNET_MIN_FRAME_SIZE: usize = 60;
// big enough to store all data
pub const ETHERNET_BUFF_SIZE: usize = 4096;
/// Same snaplen as a libpcap live capture.
pub const SNAPLEN: usize = 65536;

// linux errno values meaning the interface or the socket is gone
#[cfg(target_os = "linux")]
const FATAL_ERRNO: [i32; 4] = [libc::ENXIO, libc::EBADF, libc::ENODEV, libc::ENETDOWN];
#[cfg(not(target_os = "linux"))]
const FATAL_ERRNO: [i32; 0] = [];

/// A live handle able to inject and capture whole ethernet frames.
pub trait FrameIo {
    /// Inject one frame. Any failure here is fatal for the handle.
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), ScanError>;
    /// Pull the next captured frame.
    /// `Ok(None)` means nothing arrived within the poll timeout and the caller should retry.
    fn next_frame(&mut self) -> Result<Option<&[u8]>, ScanError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureErrorKind {
    /// Poll timeout, nothing to read.
    Miss,
    /// Read failed but the handle is still usable.
    Transient,
    /// The handle can not be read any more.
    Fatal,
}

pub fn capture_error_kind(e: &io::Error) -> CaptureErrorKind {
    match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted => {
            CaptureErrorKind::Miss
        }
        ErrorKind::NotFound
        | ErrorKind::PermissionDenied
        | ErrorKind::BrokenPipe
        | ErrorKind::NotConnected
        | ErrorKind::ConnectionAborted
        | ErrorKind::UnexpectedEof
        | ErrorKind::NetworkDown => CaptureErrorKind::Fatal,
        _ => match e.raw_os_error() {
            Some(errno) if FATAL_ERRNO.contains(&errno) => CaptureErrorKind::Fatal,
            _ => CaptureErrorKind::Transient,
        },
    }
}

/// Promiscuous layer 2 channel bound to one interface.
pub struct DatalinkHandle {
    interface: NetworkInterface,
    sender: Box<dyn DataLinkSender>,
    receiver: Box<dyn DataLinkReceiver>,
}

impl DatalinkHandle {
    pub fn open(
        interface: NetworkInterface,
        read_timeout: Duration,
    ) -> Result<DatalinkHandle, ScanError> {
        let config = Config {
            write_buffer_size: ETHERNET_BUFF_SIZE,
            read_buffer_size: SNAPLEN,
            read_timeout: Some(read_timeout),
            write_timeout: Some(read_timeout),
            channel_type: ChannelType::Layer2,
            promiscuous: true,
            ..Default::default()
        };

        let (sender, receiver) = match datalink::channel(&interface, config) {
            Ok(Ethernet(tx, rx)) => (tx, rx),
            Ok(_) => return Err(ScanError::CreateDatalinkChannelFailed),
            Err(e) => return Err(e.into()),
        };
        debug!(
            "datalink channel opened on {}, read timeout {:?}",
            interface.name, read_timeout
        );
        Ok(DatalinkHandle {
            interface,
            sender,
            receiver,
        })
    }
    pub fn interface(&self) -> &NetworkInterface {
        &self.interface
    }
}

impl FrameIo for DatalinkHandle {
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), ScanError> {
        match self.sender.send_to(frame, None) {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(ScanError::SendFailed {
                interface: self.interface.name.clone(),
                e: e.to_string(),
            }),
            None => Err(ScanError::SendFailed {
                interface: self.interface.name.clone(),
                e: String::from("write buffer too small"),
            }),
        }
    }
    fn next_frame(&mut self) -> Result<Option<&[u8]>, ScanError> {
        match self.receiver.next() {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => match capture_error_kind(&e) {
                CaptureErrorKind::Miss => Ok(None),
                CaptureErrorKind::Transient => {
                    warn!("capture on {} failed, retry: {}", self.interface.name, e);
                    Ok(None)
                }
                CaptureErrorKind::Fatal => Err(ScanError::FatalCapture {
                    interface: self.interface.name.clone(),
                    e: e.to_string(),
                }),
            },
        }
    }
}

pub fn list_interfaces() -> Vec<NetworkInterface> {
    interfaces()
}

pub fn find_interface_by_name(name: &str) -> Result<NetworkInterface, ScanError> {
    for interface in interfaces() {
        if interface.name == name {
            return Ok(interface);
        }
    }
    Err(ScanError::CanNotFoundInterface {
        name: name.to_string(),
    })
}

/// Use source IP address to find local interface
pub fn find_interface_by_src(src_ipv4: Ipv4Addr) -> Result<NetworkInterface, ScanError> {
    let src_addr = IpAddr::V4(src_ipv4);
    for interface in interfaces() {
        for ip in &interface.ips {
            if ip.ip() == src_addr {
                return Ok(interface);
            }
        }
    }
    Err(ScanError::CanNotFoundInterfaceByAddr { addr: src_ipv4 })
}

pub fn interface_mac(interface: &NetworkInterface) -> Result<MacAddr, ScanError> {
    match interface.mac {
        Some(m) if m != MacAddr::zero() => Ok(m),
        _ => Err(ScanError::CanNotFoundMacAddress {
            name: interface.name.clone(),
        }),
    }
}

/// First ipv4 address configured on the interface.
pub fn interface_ipv4(interface: &NetworkInterface) -> Option<Ipv4Addr> {
    for ipn in &interface.ips {
        if let IpAddr::V4(ipv4) = ipn.ip() {
            return Some(ipv4);
        }
    }
    None
}
