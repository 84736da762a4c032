use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    /* INPUT ERROR */
    #[error("invalid port [{input}], expect an integer in 0-65535")]
    InvalidPort { input: String },
    #[error("invalid ipv4 address [{input}]")]
    InvalidIpv4 { input: String },
    #[error("invalid mac address [{input}]")]
    InvalidMac { input: String },
    #[error("the addressing context is incomplete, missing {field}")]
    UnresolvedAddress { field: &'static str },

    /* LAYERS ERROR */
    #[error("create datalink channel failed")]
    CreateDatalinkChannelFailed,
    #[error("can not found the interface [{name}]")]
    CanNotFoundInterface { name: String },
    #[error("can not found the interface which owns {addr}")]
    CanNotFoundInterfaceByAddr { addr: Ipv4Addr },
    #[error("can not found the mac address of interface [{name}]")]
    CanNotFoundMacAddress { name: String },
    #[error("build packet error occurret at [{location}]")]
    BuildPacketError { location: String },
    #[error("send frame on interface [{interface}] failed: {e}")]
    SendFailed { interface: String, e: String },
    #[error("capture on interface [{interface}] failed: {e}")]
    FatalCapture { interface: String, e: String },

    /* OTHER ERROR */
    #[error("std error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error("init the logger error: {e}")]
    InitLoggerError { e: String },
}
