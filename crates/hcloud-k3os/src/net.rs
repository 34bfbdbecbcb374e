//! Local interface lookup and address arithmetic.

use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};

use ipnet::{IpNet, Ipv6Net};
use thiserror::Error;
use tracing::debug;

/// Default location of the kernel's network device directory.
pub const SYS_CLASS_NET: &str = "/sys/class/net";

/// Errors from local interface lookups.
#[derive(Error, Debug)]
pub enum NetError {
    /// The device directory could not be read.
    #[error("error listing interfaces in {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No device carries the requested hardware address.
    #[error("did not find interface with MAC {0}")]
    NoDeviceForMac(String),
}

/// Find the name of the local device whose hardware address is `mac`.
///
/// `root` is normally [`SYS_CLASS_NET`]; each device is a subdirectory
/// holding an `address` file. Comparison ignores case.
///
/// # Errors
/// Returns an error if `root` cannot be listed or no device matches.
pub fn find_device_for_mac(root: &Path, mac: &str) -> Result<String, NetError> {
    let entries = std::fs::read_dir(root).map_err(|source| NetError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();

    for name in names {
        let Ok(address) = std::fs::read_to_string(root.join(&name).join("address")) else {
            continue;
        };
        if address.trim().eq_ignore_ascii_case(mac.trim()) {
            debug!(device = %name, mac = %mac, "found device for MAC");
            return Ok(name);
        }
    }

    Err(NetError::NoDeviceForMac(mac.to_string()))
}

/// Network enclosing a host address, e.g. `10.0.0.5/24` -> `10.0.0.0/24`.
#[must_use]
pub fn canonical_net(addr: IpNet) -> IpNet {
    addr.trunc()
}

/// First usable address of an IPv6 subnet, keeping the prefix:
/// `2001:db8:1234::/64` -> `2001:db8:1234::1/64`.
#[must_use]
pub fn first_usable_v6(subnet: Ipv6Net) -> Ipv6Net {
    let mut octets = subnet.network().octets();
    octets[15] = 1;
    Ipv6Net::new(Ipv6Addr::from(octets), subnet.prefix_len()).unwrap_or(subnet)
}
