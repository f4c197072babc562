use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

use crate::error::DeviceError;

use super::state::{DeviceConnection, DeviceSnapshot, PortCatalog, PortDescriptor};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Byte-level access to one serial port. The transport owns the open port;
/// `close_port` on an already-closed transport must succeed.
#[async_trait]
pub trait SerialTransport: Send + Sync {
    async fn enumerate_ports(&self) -> anyhow::Result<Vec<PortDescriptor>>;
    async fn open_port(&self, name: &str) -> anyhow::Result<()>;
    async fn close_port(&self) -> anyhow::Result<()>;
    /// Writes one command and returns exactly one reply line.
    async fn write_command(&self, command: &str) -> anyhow::Result<String>;
}

/// Connection state machine for the external indicator device.
///
/// Only this type transitions the connection; everybody else reads
/// [`DeviceLink::snapshot`] or subscribes. Transport I/O is serialized through
/// one lock so a command never interleaves with an open or close.
#[derive(Clone)]
pub struct DeviceLink {
    inner: Arc<LinkInner>,
}

struct LinkInner {
    transport: Arc<dyn SerialTransport>,
    io: Mutex<()>,
    /// Bumped by every connect and disconnect; a connect only commits its
    /// outcome if no newer transition happened while it was opening the port.
    attempt: AtomicU64,
    state: watch::Sender<DeviceSnapshot>,
}

impl DeviceLink {
    pub fn new(transport: Arc<dyn SerialTransport>) -> Self {
        let (state, _) = watch::channel(DeviceSnapshot::default());
        Self {
            inner: Arc::new(LinkInner {
                transport,
                io: Mutex::new(()),
                attempt: AtomicU64::new(0),
                state,
            }),
        }
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DeviceSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn connection(&self) -> DeviceConnection {
        self.inner.state.borrow().connection.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.borrow().connection.is_connected()
    }

    /// Refreshes the port catalog. Transport failures yield an empty catalog.
    pub async fn enumerate(&self) -> PortCatalog {
        match self.inner.transport.enumerate_ports().await {
            Ok(ports) => {
                log_info!("found {} serial port(s)", ports.len());
                self.inner.state.send_modify(|snapshot| {
                    snapshot.catalog = ports.clone();
                });
                ports
            }
            Err(err) => {
                log_warn!("failed to list serial ports: {err:#}");
                self.inner.state.send_modify(|snapshot| {
                    snapshot.catalog.clear();
                    snapshot.message = format!("Failed to list serial ports: {err:#}");
                });
                Vec::new()
            }
        }
    }

    /// `Disconnected → Connecting → {Connected | Disconnected}`.
    ///
    /// Connecting while already connected closes the current port first.
    pub async fn connect(&self, port: &str) -> Result<DeviceConnection, DeviceError> {
        let port = port.trim();
        if port.is_empty() {
            return Err(DeviceError::InvalidPort);
        }

        let mut previous = DeviceConnection::Disconnected;
        let mut in_flight = false;
        let mut attempt = 0;
        self.inner.state.send_if_modified(|snapshot| {
            if matches!(snapshot.connection, DeviceConnection::Connecting { .. }) {
                in_flight = true;
                return false;
            }
            attempt = self.inner.attempt.fetch_add(1, Ordering::SeqCst) + 1;
            previous = std::mem::replace(
                &mut snapshot.connection,
                DeviceConnection::Connecting {
                    port: port.to_string(),
                },
            );
            snapshot.message = format!("Connecting to {port}");
            true
        });
        if in_flight {
            return Err(DeviceError::AlreadyConnecting);
        }

        let _io = self.inner.io.lock().await;

        if let DeviceConnection::Connected { port: old_port, .. } = &previous {
            if let Err(err) = self.inner.transport.close_port().await {
                log_warn!("closing {old_port} before reconnect failed: {err:#}");
            }
        }

        let opened = self.inner.transport.open_port(port).await;

        let mut superseded = false;
        self.inner.state.send_if_modified(|snapshot| {
            if self.inner.attempt.load(Ordering::SeqCst) != attempt {
                superseded = true;
                return false;
            }
            match &opened {
                Ok(()) => {
                    snapshot.connection = DeviceConnection::Connected {
                        port: port.to_string(),
                        last_reply: String::new(),
                    };
                    snapshot.message = format!("Connected to {port}");
                }
                Err(err) => {
                    snapshot.connection = DeviceConnection::Disconnected;
                    snapshot.message = format!("Connection failed: {err:#}");
                }
            }
            true
        });

        if superseded {
            // The disconnect that superseded us is queued on the io lock and closes the port.
            log_warn!("connect to {port} was superseded by a disconnect");
            return Err(DeviceError::Connection {
                port: port.to_string(),
                reason: "cancelled by disconnect".into(),
            });
        }

        match opened {
            Ok(()) => {
                log_info!("device connected on {port}");
                Ok(self.connection())
            }
            Err(err) => {
                log_warn!("device connection to {port} failed: {err:#}");
                Err(DeviceError::Connection {
                    port: port.to_string(),
                    reason: format!("{err:#}"),
                })
            }
        }
    }

    /// Always ends in `Disconnected`; transport errors are only recorded.
    pub async fn disconnect(&self) {
        let mut attempt = 0;
        let mut was = DeviceConnection::Disconnected;
        self.inner.state.send_modify(|snapshot| {
            attempt = self.inner.attempt.fetch_add(1, Ordering::SeqCst) + 1;
            was = std::mem::take(&mut snapshot.connection);
            snapshot.message = "Disconnected".into();
        });

        let _io = self.inner.io.lock().await;
        if self.inner.attempt.load(Ordering::SeqCst) != attempt {
            // A newer connect already owns the transport.
            return;
        }

        if let Err(err) = self.inner.transport.close_port().await {
            log_warn!("closing serial port failed: {err:#}");
            self.inner.state.send_modify(|snapshot| {
                snapshot.message = format!("Disconnected (close failed: {err:#})");
            });
        }

        if let Some(port) = was.port() {
            log_info!("device disconnected from {port}");
        }
    }

    /// Writes `command` and returns the device's reply verbatim.
    ///
    /// A failed write leaves the connection as it was; the caller decides
    /// whether to retry or disconnect.
    pub async fn send_command(&self, command: &str) -> Result<String, DeviceError> {
        if !self.is_connected() {
            return Err(DeviceError::NotConnected);
        }

        let _io = self.inner.io.lock().await;
        let attempt = self.inner.attempt.load(Ordering::SeqCst);
        if !self.is_connected() {
            return Err(DeviceError::NotConnected);
        }

        match self.inner.transport.write_command(command).await {
            Ok(reply) => {
                self.inner.state.send_if_modified(|snapshot| {
                    if self.inner.attempt.load(Ordering::SeqCst) != attempt {
                        return false;
                    }
                    match &mut snapshot.connection {
                        DeviceConnection::Connected { last_reply, .. } => {
                            *last_reply = reply.clone();
                            snapshot.message = reply.clone();
                            true
                        }
                        _ => false,
                    }
                });
                Ok(reply)
            }
            Err(err) => {
                log_warn!("command {command:?} failed: {err:#}");
                self.inner.state.send_if_modified(|snapshot| {
                    // A disconnect that raced this write keeps its own status.
                    if self.inner.attempt.load(Ordering::SeqCst) != attempt {
                        return false;
                    }
                    snapshot.message = format!("Command failed: {err:#}");
                    true
                });
                Err(DeviceError::Send {
                    command: command.to_string(),
                    reason: format!("{err:#}"),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Default)]
    struct FakeTransport {
        ports: Vec<PortDescriptor>,
        fail_enumerate: bool,
        fail_open: bool,
        fail_write: AtomicBool,
        fail_close: bool,
        open_gate: Option<Arc<Notify>>,
        write_gate: Option<Arc<Notify>>,
        calls: StdMutex<Vec<String>>,
    }

    impl FakeTransport {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl SerialTransport for FakeTransport {
        async fn enumerate_ports(&self) -> anyhow::Result<Vec<PortDescriptor>> {
            if self.fail_enumerate {
                return Err(anyhow!("no permission"));
            }
            Ok(self.ports.clone())
        }

        async fn open_port(&self, name: &str) -> anyhow::Result<()> {
            if let Some(gate) = &self.open_gate {
                gate.notified().await;
            }
            self.record(format!("open {name}"));
            if self.fail_open {
                return Err(anyhow!("port busy"));
            }
            Ok(())
        }

        async fn close_port(&self) -> anyhow::Result<()> {
            self.record("close".into());
            if self.fail_close {
                return Err(anyhow!("device vanished"));
            }
            Ok(())
        }

        async fn write_command(&self, command: &str) -> anyhow::Result<String> {
            self.record(format!("write {command}"));
            if let Some(gate) = &self.write_gate {
                gate.notified().await;
            }
            if self.fail_write.load(Ordering::SeqCst) {
                return Err(anyhow!("write timed out"));
            }
            Ok(format!("LED {command}"))
        }
    }

    fn link_with(transport: FakeTransport) -> (DeviceLink, Arc<FakeTransport>) {
        let transport = Arc::new(transport);
        (DeviceLink::new(transport.clone()), transport)
    }

    #[tokio::test]
    async fn enumerate_keeps_transport_order() {
        let (link, _) = link_with(FakeTransport {
            ports: vec![
                PortDescriptor::new("COM3", "USB"),
                PortDescriptor::new("COM5", "Bluetooth"),
            ],
            ..Default::default()
        });

        let catalog = link.enumerate().await;
        assert_eq!(
            catalog,
            vec![
                PortDescriptor::new("COM3", "USB"),
                PortDescriptor::new("COM5", "Bluetooth"),
            ]
        );
        assert_eq!(link.snapshot().catalog, catalog);
    }

    #[tokio::test]
    async fn enumerate_failure_yields_empty_catalog() {
        let (link, _) = link_with(FakeTransport {
            fail_enumerate: true,
            ..Default::default()
        });

        assert!(link.enumerate().await.is_empty());
        assert!(link.snapshot().message.contains("no permission"));
    }

    #[tokio::test]
    async fn empty_port_is_rejected_without_transition() {
        let (link, transport) = link_with(FakeTransport::default());

        assert_eq!(link.connect("").await, Err(DeviceError::InvalidPort));
        assert_eq!(link.connect("   ").await, Err(DeviceError::InvalidPort));
        assert_eq!(link.connection(), DeviceConnection::Disconnected);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_open_returns_to_disconnected() {
        let (link, _) = link_with(FakeTransport {
            fail_open: true,
            ..Default::default()
        });

        let err = assert_err!(link.connect("COM3").await);
        assert!(matches!(err, DeviceError::Connection { ref port, .. } if port == "COM3"));
        assert_eq!(link.connection(), DeviceConnection::Disconnected);
        assert!(link.snapshot().message.starts_with("Connection failed"));
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let (link, transport) = link_with(FakeTransport::default());

        assert_eq!(link.send_command("ON").await, Err(DeviceError::NotConnected));
        assert_eq!(link.connection(), DeviceConnection::Disconnected);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn reply_is_recorded_on_connection() {
        let (link, _) = link_with(FakeTransport::default());
        assert_ok!(link.connect("COM3").await);

        let reply = assert_ok!(link.send_command("ON").await);
        assert_eq!(reply, "LED ON");
        assert_eq!(
            link.connection(),
            DeviceConnection::Connected {
                port: "COM3".into(),
                last_reply: "LED ON".into(),
            }
        );
    }

    #[tokio::test]
    async fn send_failure_keeps_connection() {
        let (link, transport) = link_with(FakeTransport::default());
        assert_ok!(link.connect("COM3").await);
        transport.fail_write.store(true, Ordering::SeqCst);

        let err = assert_err!(link.send_command("OFF").await);
        assert!(matches!(err, DeviceError::Send { .. }));
        assert!(link.is_connected());

        transport.fail_write.store(false, Ordering::SeqCst);
        assert_ok!(link.send_command("OFF").await);
    }

    #[tokio::test]
    async fn failed_write_after_disconnect_keeps_disconnected_status() {
        let gate = Arc::new(Notify::new());
        let (link, transport) = link_with(FakeTransport {
            write_gate: Some(gate.clone()),
            ..Default::default()
        });
        assert_ok!(link.connect("COM3").await);
        transport.fail_write.store(true, Ordering::SeqCst);

        let pending = tokio::spawn({
            let link = link.clone();
            async move { link.send_command("OFF").await }
        });
        while !transport.calls().contains(&"write OFF".to_string()) {
            tokio::task::yield_now().await;
        }

        let disconnect = tokio::spawn({
            let link = link.clone();
            async move { link.disconnect().await }
        });
        while link.connection() != DeviceConnection::Disconnected {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        assert!(matches!(pending.await.unwrap(), Err(DeviceError::Send { .. })));
        disconnect.await.unwrap();

        assert_eq!(link.connection(), DeviceConnection::Disconnected);
        assert_eq!(link.snapshot().message, "Disconnected");
        assert_eq!(
            transport.calls(),
            vec!["open COM3".to_string(), "write OFF".into(), "close".into()]
        );
    }

    #[tokio::test]
    async fn concurrent_connect_is_rejected() {
        let gate = Arc::new(Notify::new());
        let (link, _) = link_with(FakeTransport {
            open_gate: Some(gate.clone()),
            ..Default::default()
        });

        let first = tokio::spawn({
            let link = link.clone();
            async move { link.connect("COM3").await }
        });
        while !matches!(link.connection(), DeviceConnection::Connecting { .. }) {
            tokio::task::yield_now().await;
        }

        assert_eq!(link.connect("COM5").await, Err(DeviceError::AlreadyConnecting));

        gate.notify_one();
        let connected = first.await.unwrap().unwrap();
        assert_eq!(connected.port(), Some("COM3"));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_survives_close_errors() {
        let (link, transport) = link_with(FakeTransport {
            fail_close: true,
            ..Default::default()
        });
        assert_ok!(link.connect("COM3").await);

        link.disconnect().await;
        assert_eq!(link.connection(), DeviceConnection::Disconnected);
        assert!(link.snapshot().message.contains("device vanished"));

        link.disconnect().await;
        assert_eq!(link.connection(), DeviceConnection::Disconnected);
        assert_eq!(
            transport.calls(),
            vec!["open COM3".to_string(), "close".into(), "close".into()]
        );
    }

    #[tokio::test]
    async fn disconnect_during_connect_wins() {
        let gate = Arc::new(Notify::new());
        let (link, transport) = link_with(FakeTransport {
            open_gate: Some(gate.clone()),
            ..Default::default()
        });

        let pending = tokio::spawn({
            let link = link.clone();
            async move { link.connect("COM3").await }
        });
        while !matches!(link.connection(), DeviceConnection::Connecting { .. }) {
            tokio::task::yield_now().await;
        }

        let disconnect = tokio::spawn({
            let link = link.clone();
            async move { link.disconnect().await }
        });
        while link.connection() != DeviceConnection::Disconnected {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(DeviceError::Connection { .. })));
        disconnect.await.unwrap();

        assert_eq!(link.connection(), DeviceConnection::Disconnected);
        assert_eq!(transport.calls(), vec!["open COM3".to_string(), "close".into()]);
    }

    #[tokio::test]
    async fn reconnect_closes_previous_port() {
        let (link, transport) = link_with(FakeTransport::default());
        assert_ok!(link.connect("COM3").await);
        assert_ok!(link.connect("COM5").await);

        assert_eq!(link.connection().port(), Some("COM5"));
        assert_eq!(
            transport.calls(),
            vec!["open COM3".to_string(), "close".into(), "open COM5".into()]
        );
    }
}
