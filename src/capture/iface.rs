use std::fmt;
use std::net::IpAddr;

/// A capture-capable network interface as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    pub description: Option<String>,
    pub addresses: Vec<IpAddr>,
    pub is_up: bool,
    pub is_loopback: bool,
}

impl NetworkInterface {
    pub fn has_ipv4(&self) -> bool {
        self.addresses.iter().any(IpAddr::is_ipv4)
    }
}

impl fmt::Display for NetworkInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.is_up {
            write!(f, "  [up]")?;
        }
        if self.is_loopback {
            write!(f, "  [loopback]")?;
        }
        for addr in &self.addresses {
            write!(f, "  {addr}")?;
        }
        if let Some(desc) = self.description.as_deref().filter(|d| !d.is_empty()) {
            write!(f, "  ({desc})")?;
        }
        Ok(())
    }
}

/// Picks the interface to capture on when none was requested.
///
/// Preference order: non-loopback, up and IPv4-capable; then non-loopback
/// and up; then whatever comes first.
pub fn select_interface(interfaces: &[NetworkInterface]) -> Option<&NetworkInterface> {
    interfaces
        .iter()
        .find(|i| !i.is_loopback && i.is_up && i.has_ipv4())
        .or_else(|| interfaces.iter().find(|i| !i.is_loopback && i.is_up))
        .or_else(|| interfaces.first())
}
