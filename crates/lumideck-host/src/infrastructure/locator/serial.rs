//! Serial port enumeration and probe ordering.
//!
//! Enumeration cannot tell a Lumideck apart from any other USB-serial
//! gadget, so the result is an ordered candidate list: the last port that
//! carried a session first, then ports matching the configured USB
//! vendor/product id, then other USB ports, then everything else.  The
//! link manager probes them in order and keeps the first one that answers
//! the handshake.

use serialport::SerialPortType;

use super::LocatorError;

/// One enumerated port, reduced to what ordering needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCandidate {
    pub name: String,
    /// `(vid, pid)` for USB ports, `None` for built-in ones.
    pub usb_ids: Option<(u16, u16)>,
}

/// Enumerates the system's serial ports.
///
/// # Errors
///
/// Returns [`LocatorError::SerialEnumeration`] when the OS enumeration
/// call fails.
pub fn enumerate_ports() -> Result<Vec<PortCandidate>, LocatorError> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| PortCandidate {
            usb_ids: match p.port_type {
                SerialPortType::UsbPort(info) => Some((info.vid, info.pid)),
                _ => None,
            },
            name: p.port_name,
        })
        .collect())
}

/// Parses the configured hex vendor/product id pair.  Both must be
/// present and parseable for the filter to apply.
pub fn parse_usb_filter(vid: Option<&str>, pid: Option<&str>) -> Option<(u16, u16)> {
    let vid = u16::from_str_radix(vid?.trim(), 16).ok()?;
    let pid = u16::from_str_radix(pid?.trim(), 16).ok()?;
    Some((vid, pid))
}

/// Orders enumerated ports for probing.
///
/// The last known port goes first even when enumeration missed it (it may
/// reappear between enumeration and probe).  Then ports whose USB ids
/// match `usb_filter`, then other USB ports, then built-in ones, each
/// group in enumeration order.
pub fn order_candidates(
    ports: Vec<PortCandidate>,
    last_port: Option<&str>,
    usb_filter: Option<(u16, u16)>,
) -> Vec<String> {
    let mut ordered = Vec::with_capacity(ports.len() + 1);
    if let Some(last) = last_port {
        ordered.push(last.to_string());
    }

    let tier = |p: &PortCandidate| match p.usb_ids {
        Some(ids) if usb_filter == Some(ids) => 0,
        Some(_) => 1,
        None => 2,
    };
    for wanted in 0..3 {
        for port in ports.iter().filter(|p| tier(p) == wanted) {
            if !ordered.iter().any(|n| n == &port.name) {
                ordered.push(port.name.clone());
            }
        }
    }
    ordered
}

/// Convenience wrapper: enumerate then order.
pub fn probe_order(
    last_port: Option<&str>,
    usb_filter: Option<(u16, u16)>,
) -> Result<Vec<String>, LocatorError> {
    Ok(order_candidates(enumerate_ports()?, last_port, usb_filter))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
