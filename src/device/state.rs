use serde::{Deserialize, Serialize};

/// One discoverable serial endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortDescriptor {
    pub name: String,
    pub kind: String,
}

impl PortDescriptor {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
        }
    }
}

/// Ports in the order the transport reported them. Refreshed on demand, never persisted.
pub type PortCatalog = Vec<PortDescriptor>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum DeviceConnection {
    Disconnected,
    Connecting {
        port: String,
    },
    #[serde(rename_all = "camelCase")]
    Connected {
        port: String,
        last_reply: String,
    },
}

impl Default for DeviceConnection {
    fn default() -> Self {
        DeviceConnection::Disconnected
    }
}

impl DeviceConnection {
    pub fn is_connected(&self) -> bool {
        matches!(self, DeviceConnection::Connected { .. })
    }

    pub fn port(&self) -> Option<&str> {
        match self {
            DeviceConnection::Disconnected => None,
            DeviceConnection::Connecting { port } | DeviceConnection::Connected { port, .. } => {
                Some(port)
            }
        }
    }
}

/// What the presentation layer sees of the device link.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub connection: DeviceConnection,
    /// Last status line: a device reply, or a diagnostic for the last failed operation.
    pub message: String,
    pub catalog: PortCatalog,
}
