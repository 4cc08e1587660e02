//! The records kuang persists.

use std::net::IpAddr;

/// How a [`Host`] first became known to kuang.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HostSource {
    User = 1,
    Generator = 2,
    Xfr = 3,
    Mx = 4,
    Ns = 5,
}

impl HostSource {
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(HostSource::User),
            2 => Some(HostSource::Generator),
            3 => Some(HostSource::Xfr),
            4 => Some(HostSource::Mx),
            5 => Some(HostSource::Ns),
            _ => None,
        }
    }
}

/// A system discovered somewhere on the Internet.
#[derive(Clone, Debug)]
pub struct Host {
    pub id: i64,
    pub name: String,
    pub addr: IpAddr,
    pub src: HostSource,
    pub added: i64,
    pub last_contact: Option<i64>,
    pub sysname: String,
    pub location: String,
    pub xfr: bool,
}

impl Host {
    /// The DNS zone this host's name belongs to, i.e. everything after the
    /// first label.
    pub fn zone(&self) -> Option<&str> {
        self.name.split_once('.').map(|(_, rest)| rest)
    }
}

/// A banner-scanned service discovered on a [`Host`].
#[derive(Clone, Debug)]
pub struct Service {
    pub id: i64,
    pub host_id: i64,
    pub port: u16,
    pub added: i64,
    pub response: Option<String>,
}

/// The state of a single zone-transfer attempt.
#[derive(Clone, Debug)]
pub struct Xfr {
    pub id: i64,
    pub name: String,
    pub added: i64,
    pub started: i64,
    pub finished: i64,
    pub status: bool,
}
