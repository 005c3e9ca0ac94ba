//! Device transports.
//!
//! An [`Endpoint`] names where the device is: a serial port (`/dev/ttyUSB0`,
//! `COM3`) or a TCP bridge (`tcp:host:port`, e.g. `ser2net` or a simulator).
//! [`open`] turns it into a boxed duplex byte stream; everything above this
//! module only sees [`DeviceStream`].
//!
//! Serial ports are always opened 8N1 with no flow control.

use std::fmt;
use std::io;
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialPortType, StopBits};

use crate::baud::BaudRate;

/// Any duplex byte stream the connection manager can drive.
pub trait DeviceStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> DeviceStream for T {}

pub type BoxedStream = Box<dyn DeviceStream>;

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// Where the device lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A serial device path or port name.
    Serial(String),
    /// A TCP bridge, `host:port`.
    Tcp { host: String, port: u16 },
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty port name".to_owned());
        }
        let Some(addr) = s.strip_prefix("tcp:") else {
            return Ok(Endpoint::Serial(s.to_owned()));
        };
        let addr = addr.trim_start_matches("//");
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| format!("expected tcp:host:port, got {s:?}"))?;
        let port = port
            .parse()
            .map_err(|_| format!("invalid TCP port number: {port}"))?;
        if host.is_empty() {
            return Err(format!("missing host in {s:?}"));
        }
        Ok(Endpoint::Tcp { host: host.to_owned(), port })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Serial(path) => f.write_str(path),
            Endpoint::Tcp { host, port } => write!(f, "tcp:{host}:{port}"),
        }
    }
}

// ── Opening ───────────────────────────────────────────────────────────────────

/// Open `endpoint`.  `baud` only matters for serial ports.
pub async fn open(endpoint: &Endpoint, baud: BaudRate) -> io::Result<BoxedStream> {
    match endpoint {
        Endpoint::Serial(path) => {
            let port = tokio_serial::new(path, baud.get())
                .data_bits(DataBits::Eight)
                .stop_bits(StopBits::One)
                .parity(Parity::None)
                .flow_control(FlowControl::None)
                .open_native_async()
                .map_err(io::Error::from)?;
            Ok(Box::new(port))
        }
        Endpoint::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
    }
}

// ── Port listing ──────────────────────────────────────────────────────────────

/// A serial port found on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    /// Human-readable details (USB vendor/product), if known.
    pub description: Option<String>,
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(d) => write!(f, "{:<20} {d}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Enumerate serial ports, sorted by name.
pub fn available_ports() -> io::Result<Vec<PortInfo>> {
    let mut ports: Vec<PortInfo> = tokio_serial::available_ports()
        .map_err(io::Error::from)?
        .into_iter()
        .map(|p| PortInfo {
            description: describe(&p.port_type),
            name: p.port_name,
        })
        .collect();
    ports.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(ports)
}

fn describe(kind: &SerialPortType) -> Option<String> {
    match kind {
        SerialPortType::UsbPort(usb) => {
            let mut parts: Vec<String> = [usb.manufacturer.as_deref(), usb.product.as_deref()]
                .into_iter()
                .flatten()
                .map(str::to_owned)
                .collect();
            parts.push(format!("[{:04x}:{:04x}]", usb.vid, usb.pid));
            Some(parts.join(" "))
        }
        SerialPortType::BluetoothPort => Some("Bluetooth".to_owned()),
        SerialPortType::PciPort => Some("PCI".to_owned()),
        SerialPortType::Unknown => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn serial_endpoint() {
        assert_eq!(
            "/dev/ttyUSB0".parse::<Endpoint>(),
            Ok(Endpoint::Serial("/dev/ttyUSB0".into()))
        );
        assert_eq!("COM3".parse::<Endpoint>(), Ok(Endpoint::Serial("COM3".into())));
    }

    #[test]
    fn tcp_endpoint() {
        assert_eq!(
            "tcp:localhost:2000".parse::<Endpoint>(),
            Ok(Endpoint::Tcp { host: "localhost".into(), port: 2000 })
        );
        assert_eq!(
            "tcp://10.0.0.5:7000".parse::<Endpoint>(),
            Ok(Endpoint::Tcp { host: "10.0.0.5".into(), port: 7000 })
        );
    }

    #[test]
    fn bad_endpoints() {
        assert!("".parse::<Endpoint>().is_err());
        assert!("tcp:localhost".parse::<Endpoint>().is_err());
        assert!("tcp:host:notaport".parse::<Endpoint>().is_err());
        assert!("tcp::2000".parse::<Endpoint>().is_err());
    }

    #[test]
    fn endpoint_display() {
        let e: Endpoint = "tcp://h:1".parse().unwrap();
        assert_eq!(e.to_string(), "tcp:h:1");
        assert_eq!(Endpoint::Serial("/dev/ttyACM0".into()).to_string(), "/dev/ttyACM0");
    }

    #[test]
    fn port_info_display() {
        let p = PortInfo { name: "/dev/ttyUSB0".into(), description: None };
        assert_eq!(p.to_string(), "/dev/ttyUSB0");
        let p = PortInfo {
            name: "/dev/ttyACM0".into(),
            description: Some("Arduino Uno".into()),
        };
        assert!(p.to_string().ends_with("Arduino Uno"));
    }

    #[tokio::test]
    async fn open_tcp_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(b"pong").await.unwrap();
            buf
        });

        let ep = Endpoint::Tcp { host: "127.0.0.1".into(), port: addr.port() };
        let mut stream = open(&ep, BaudRate::DEFAULT).await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        let mut reply = [0u8; 4];
        stream.read_exact(&mut reply).await.unwrap();

        assert_eq!(&server.await.unwrap(), b"ping");
        assert_eq!(&reply, b"pong");
    }

    #[tokio::test]
    async fn open_missing_serial_port_fails() {
        let ep = Endpoint::Serial("/dev/knight-does-not-exist".into());
        assert!(open(&ep, BaudRate::DEFAULT).await.is_err());
    }
}
