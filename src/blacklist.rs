//! Self-sorting blacklists for IP addresses and PTR names.
//!
//! Both lists keep their entries ordered by descending hit count so that the
//! networks and patterns that match most often are checked first.

use std::net::IpAddr;
use std::sync::Mutex;

use ipnetwork::IpNetwork;
use regex::Regex;
use tracing::warn;

/// Reserved, private, and documentation networks that never carry a host
/// worth probing.
const FORBIDDEN_NETWORKS: &[&str] = &[
    "0.0.0.0/8",
    "10.0.0.0/8",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.2.0/24",
    "192.88.99.0/24",
    "192.168.0.0/16",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
    "224.0.0.0/4",
    "240.0.0.0/4",
    "255.0.0.0/8",
];

/// Fragments of PTR names that, taken together, identify dynamic,
/// unassigned, or otherwise uninteresting reverse-DNS entries.
const FORBIDDEN_NAMES: &[&str] = &[
    r"\bdiu?p-?\d*\.",
    r"(?:versanet|telekom|uni-paderborn|upb)\.(?:de|net|com|biz|eu)\.?$",
    r"[.]?nothing[.]",
    r"[.]example[.](?:org|net|com)[.]?$",
    r"[avs]?dsl",
    r"\.in-addr\.",
    r"\.invalid\.?",
    r"\b(?:wireless|wlan|wimax|wan|vpn|vlan)",
    r"\b\d{1,3}.\d{1,3}.\d{1,3}.\d{1,3}\b",
    r"\bincorrect(?:ly)?\b",
    r"\bnot.configured\b",
    r"\bpools?\b",
    r"\bunn?ass?igned\b",
    r"^(?:client|host)(?:-?\d+)?",
    r"^(?:un|not-)(?:known|ass?igned|alloc(?:ated)?|registered|provisioned|used|defined|delegated)",
    r"^[.]$",
    r"^[*]",
    r"^\w*eth(?:ernet)[^.]*\.",
    r"^\w\d+\[\-.]",
    r"^customer-",
    r"^customer\.",
    r"^dyn\d+",
    r"^generic-?host",
    r"^h\d+s\d+",
    r"^host\d+\.",
    r"^illegal",
    r"^internal-host",
    r"^ip(?:-?\d+|addr)",
    r"^mobile",
    r"^no(?:-reverse)?-dns",
    r"^(?:no-?)?reverse",
    r"^no.ptr",
    r"^softbank\d+\.bbtec",
    r"^this.ip",
    r"^user-?\d+\.",
    r"aol\.com\.?$",
    r"cable",
    r"dhcp",
    r"dial-?(?:in|up)?",
    r"dyn(?:amic)?[-.0-9]",
    r"dyn(?:amic)ip",
    r"early.registration",
    r"(?:edu)?roam",
    r"localhost",
    r"myvzw\.com",
    r"no-dns(?:-yet)?",
    r"non-routed",
    r"ppp",
    r"rr\.com\.?$",
    r"umts",
    r"wanadoo\.[a-z]{2,3}\.?$",
    r"^\w*[.]$",
    r"reverse-not-set",
    r"uu[.]net[.]?$",
    r"(?:ne|ad)[.]jp[.]?$",
    r"[.](?:cn|mil)[.]?$",
    r"^noname[.]",
];

/// Address classes that are never worth scanning, checked before consulting
/// either the default or any caller-supplied network blacklist.
fn is_well_known_class(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            v4.is_multicast()
                || v4.is_private()
                || v4.is_reserved()
                || v4.is_loopback()
                || v4.is_link_local()
        }
        IpAddr::V6(v6) => v6.is_multicast() || v6.is_loopback() || v6.is_unspecified(),
    }
}

//----------- IpBlacklist ----------------------------------------------------------

struct IpBlacklistItem {
    net: IpNetwork,
    hit_cnt: u64,
}

/// Matches addresses against a list of networks that should never be
/// scanned.
pub struct IpBlacklist {
    networks: Mutex<Vec<IpBlacklistItem>>,
}

impl IpBlacklist {
    /// Build a blacklist from a list of CIDR strings. Entries that fail to
    /// parse are logged and skipped.
    pub fn from_list(nets: &[&str]) -> Self {
        let mut networks = Vec::with_capacity(nets.len());
        for raw in nets {
            match raw.parse::<IpNetwork>() {
                Ok(net) => networks.push(IpBlacklistItem { net, hit_cnt: 0 }),
                Err(err) => warn!("Cannot parse blacklisted network '{raw}': {err}"),
            }
        }
        Self {
            networks: Mutex::new(networks),
        }
    }

    /// The default blacklist, covering reserved, private, and documentation
    /// address ranges.
    pub fn default_list() -> Self {
        Self::from_list(FORBIDDEN_NETWORKS)
    }

    /// Return whether `addr` falls within a blacklisted network.
    ///
    /// Multicast, private, reserved, loopback, and link-local addresses are
    /// always treated as blacklisted, regardless of what the configured
    /// network list says; since no item in that list "owns" the hit, the
    /// self-sorting counters are untouched for this path.
    pub fn is_match(&self, addr: IpAddr) -> bool {
        if is_well_known_class(addr) {
            return true;
        }

        let mut networks = self.networks.lock().unwrap();
        let mut hit = None;
        for (idx, item) in networks.iter_mut().enumerate() {
            if item.net.contains(addr) {
                item.hit_cnt += 1;
                hit = Some(idx);
                break;
            }
        }
        if hit.is_some() {
            networks.sort_by(|a, b| b.hit_cnt.cmp(&a.hit_cnt));
            true
        } else {
            false
        }
    }
}

//----------- NameBlacklist --------------------------------------------------------

struct NameBlacklistItem {
    pat: Regex,
    hit_cnt: u64,
}

/// Matches PTR names against a list of patterns that identify uninteresting
/// hosts (dynamic pools, unassigned delegations, and the like).
pub struct NameBlacklist {
    patterns: Mutex<Vec<NameBlacklistItem>>,
}

impl NameBlacklist {
    /// Build a blacklist from a list of regex fragments, compiled
    /// case-insensitively. Entries that fail to compile are logged and
    /// skipped.
    pub fn from_list(patterns: &[&str]) -> Self {
        let mut compiled = Vec::with_capacity(patterns.len());
        for raw in patterns {
            match regex::RegexBuilder::new(raw).case_insensitive(true).build() {
                Ok(pat) => compiled.push(NameBlacklistItem { pat, hit_cnt: 0 }),
                Err(err) => warn!("Cannot compile blacklisted name pattern '{raw}': {err}"),
            }
        }
        Self {
            patterns: Mutex::new(compiled),
        }
    }

    /// The default blacklist of PTR name patterns.
    pub fn default_list() -> Self {
        Self::from_list(FORBIDDEN_NAMES)
    }

    /// Return whether `name` matches any blacklisted pattern.
    pub fn is_match(&self, name: &str) -> bool {
        let mut patterns = self.patterns.lock().unwrap();
        let mut hit = None;
        for (idx, item) in patterns.iter_mut().enumerate() {
            if item.pat.is_match(name) {
                item.hit_cnt += 1;
                hit = Some(idx);
                break;
            }
        }
        if hit.is_some() {
            patterns.sort_by(|a, b| b.hit_cnt.cmp(&a.hit_cnt));
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_blacklist_matches_private_ranges() {
        let bl = IpBlacklist::default_list();
        assert!(bl.is_match("10.1.2.3".parse().unwrap()));
        assert!(bl.is_match("192.168.0.1".parse().unwrap()));
        assert!(!bl.is_match("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn ip_blacklist_sorts_by_hits() {
        // Neither range is a well-known class (private/loopback/etc.), so
        // these hits exercise the self-sorting list itself rather than the
        // short-circuit.
        let bl = IpBlacklist::from_list(&["198.51.100.0/24", "203.0.113.0/24"]);
        for _ in 0..3 {
            bl.is_match("203.0.113.1".parse().unwrap());
        }
        bl.is_match("198.51.100.1".parse().unwrap());
        let networks = bl.networks.lock().unwrap();
        assert_eq!(networks[0].net.to_string(), "203.0.113.0/24");
    }

    #[test]
    fn well_known_classes_are_always_blacklisted() {
        let bl = IpBlacklist::from_list(&[]);
        assert!(bl.is_match("127.0.0.1".parse().unwrap()));
        assert!(bl.is_match("169.254.1.1".parse().unwrap()));
        assert!(bl.is_match("224.0.0.1".parse().unwrap()));
        assert!(!bl.is_match("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn name_blacklist_matches_dynamic_hosts() {
        let bl = NameBlacklist::default_list();
        assert!(bl.is_match("dhcp-client-17.example.net"));
        assert!(bl.is_match("host123.some-isp.net"));
        assert!(!bl.is_match("mail.krylon.net"));
    }
}
