//! Link address builders and parsers for the hub device namespace.
//!
//! Address structure:
//! ```text
//! /devices/{device_id}/messages/events        (device → hub)
//! /devices/{device_id}/messages/deviceBound   (hub → device)
//! $cbs                                        (claims-based security node)
//! {host}/devices/                             (resource root for SAS audiences)
//! ```

const PREFIX: &str = "/devices";

/// Reserved claims-based-security node both CBS links attach to.
pub const CBS_NODE: &str = "$cbs";

/// Link name (and reply-to address) of the CBS response receiver.
pub const CBS_REPLY_TO: &str = "cbs-reply-to";

/// Link name of the CBS request sender.
pub const CBS_SENDER_NAME: &str = "cbs-sender";

/// Link name of the device's outbound sender.
pub const EVENTS_LINK_NAME: &str = "sender-link";

/// Link name of the device's inbound receiver.
pub const DEVICE_BOUND_LINK_NAME: &str = "receiver-link";

// ─── Device links ───

/// Outbound telemetry/event address for a device.
pub fn events(device_id: &str) -> String {
    format!("{PREFIX}/{device_id}/messages/events")
}

/// Inbound cloud-to-device command address for a device.
pub fn device_bound(device_id: &str) -> String {
    format!("{PREFIX}/{device_id}/messages/deviceBound")
}

// ─── Resource URIs ───

/// Resource root every device audience hangs off.
pub fn resource_root(host: &str) -> String {
    format!("{host}{PREFIX}/")
}

/// Full resource URI of a device, used as the SAS audience.
pub fn device_resource_uri(host: &str, device_id: &str) -> String {
    format!("{}{device_id}", resource_root(host))
}

// ─── Address parsing ───

/// Direction of a device message link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Events,
    DeviceBound,
}

/// Parsed device link address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    pub device_id: String,
    pub kind: LinkKind,
}

/// Parse a device link address into its components.
/// Returns `None` if the address is not a device messaging address.
pub fn parse_address(address: &str) -> Option<ParsedAddress> {
    let rest = address.strip_prefix(PREFIX)?.strip_prefix('/')?;
    let parts: Vec<&str> = rest.split('/').collect();

    match parts.as_slice() {
        [device_id, "messages", kind] if !device_id.is_empty() => {
            let kind = match *kind {
                "events" => LinkKind::Events,
                "deviceBound" => LinkKind::DeviceBound,
                _ => return None,
            };
            Some(ParsedAddress {
                device_id: (*device_id).to_string(),
                kind,
            })
        }
        _ => None,
    }
}
