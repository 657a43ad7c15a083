//! Register bridge: a line-oriented TCP protocol giving out-of-process
//! clients (alternate-language SDK bindings) the same register access an
//! in-process consumer gets through [`crate::bus`].
//!
//! One listener task accepts connections; each client gets its own task.
//! The bus lock is acquired per command and released before the next
//! socket read, never held across I/O.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::bus::{self, BusHandle};
use crate::config::BridgeConfig;
use crate::error::{EmuError, EmuResult, ProtocolErrorKind};

const VERSION: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));
const HELP: &str = "v h q p<addr> l<addr> r<addr> w<addr><value> i<addr><expected>[<mask>[<cycles>[<millis>]]]";

/// Bind the listener and serve connections until the process exits or the
/// listener errors. Each accepted socket is handed to its own task.
pub async fn serve(bus: BusHandle, config: BridgeConfig) -> EmuResult<()> {
    let listener = TcpListener::bind((config.bind_addr, config.port)).await?;
    log::info!("register bridge listening on {}:{}", config.bind_addr, config.port);

    loop {
        let (socket, peer) = listener.accept().await?;
        log::debug!("accepted bridge client {peer}");
        let bus = bus.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(socket, bus).await {
                log::warn!("bridge client {peer} disconnected: {e}");
            }
        });
    }
}

/// Serve one already-accepted connection. Exposed for callers (and tests)
/// that want to run the bridge protocol over a socket they bound
/// themselves rather than through [`serve`]'s own listener loop.
pub async fn handle_client(socket: TcpStream, bus: BusHandle) -> EmuResult<()> {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            continue;
        }

        match dispatch(line, &bus).await {
            Dispatch::Response(resp) => {
                write_half.write_all(resp.as_bytes()).await?;
                write_half.write_all(b"\n").await?;
            }
            Dispatch::Quit => break,
        }
    }
    Ok(())
}

enum Dispatch {
    Response(String),
    Quit,
}

async fn dispatch(line: &str, bus: &BusHandle) -> Dispatch {
    let mut tokens = line.split_whitespace();
    let Some(cmd) = tokens.next() else {
        return Dispatch::Response(error_line(ProtocolErrorKind::UnknownCommand));
    };

    let result = match cmd {
        "v" => Ok(format!("101 OK: {VERSION}")),
        "h" | "?" => Ok(format!("101 OK: {HELP}")),
        "q" => return Dispatch::Quit,
        "p" => handle_provides(tokens, bus),
        "l" => handle_label(tokens, bus),
        "r" => handle_read(tokens, bus),
        "w" => handle_write(tokens, bus),
        "i" => handle_wait(tokens, bus).await,
        _ => Err(ProtocolErrorKind::UnknownCommand),
    };

    Dispatch::Response(result.unwrap_or_else(error_line))
}

fn error_line(kind: ProtocolErrorKind) -> String {
    format!("{} {}", kind.code(), kind.to_string().to_uppercase())
}

fn next_addr<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Result<u32, ProtocolErrorKind> {
    let tok = tokens.next().ok_or(ProtocolErrorKind::MissingOperand)?;
    parse_u32(tok).ok_or(ProtocolErrorKind::NumberExpected)
}

fn parse_u32(tok: &str) -> Option<u32> {
    if let Some(hex) = tok.strip_prefix("0x").or_else(|| tok.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        tok.parse().ok()
    }
}

fn expect_exhausted<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Result<(), ProtocolErrorKind> {
    if tokens.next().is_some() {
        Err(ProtocolErrorKind::UnparsedInput)
    } else {
        Ok(())
    }
}

fn handle_provides<'a>(mut tokens: impl Iterator<Item = &'a str>, bus: &BusHandle) -> Result<String, ProtocolErrorKind> {
    let addr = next_addr(&mut tokens)?;
    expect_exhausted(&mut tokens)?;
    let v = bus.lock().unwrap().provides(addr);
    Ok(format!("101 OK: {v}"))
}

fn handle_label<'a>(mut tokens: impl Iterator<Item = &'a str>, bus: &BusHandle) -> Result<String, ProtocolErrorKind> {
    let addr = next_addr(&mut tokens)?;
    expect_exhausted(&mut tokens)?;
    let label = bus.lock().unwrap().get_label(addr).unwrap_or("unmapped");
    Ok(format!("101 OK: {label}"))
}

fn handle_read<'a>(mut tokens: impl Iterator<Item = &'a str>, bus: &BusHandle) -> Result<String, ProtocolErrorKind> {
    let addr = next_addr(&mut tokens)?;
    expect_exhausted(&mut tokens)?;
    let v = bus.lock().unwrap().read(addr);
    Ok(format!("101 OK: {v}"))
}

fn handle_write<'a>(mut tokens: impl Iterator<Item = &'a str>, bus: &BusHandle) -> Result<String, ProtocolErrorKind> {
    let addr = next_addr(&mut tokens)?;
    let value_tok = tokens.next().ok_or(ProtocolErrorKind::MissingOperand)?;
    let value = parse_u32(value_tok).ok_or(ProtocolErrorKind::NumberExpected)?;
    expect_exhausted(&mut tokens)?;
    bus.lock().unwrap().write(addr, value);
    Ok("101 OK".to_string())
}

async fn handle_wait<'a>(mut tokens: impl Iterator<Item = &'a str>, bus: &BusHandle) -> Result<String, ProtocolErrorKind> {
    let addr = next_addr(&mut tokens)?;
    let expected = next_addr(&mut tokens)?;
    let mask = match tokens.next() {
        Some(tok) => parse_u32(tok).ok_or(ProtocolErrorKind::NumberExpected)?,
        None => 0xFFFF_FFFF,
    };
    let cycles = match tokens.next() {
        Some(tok) => parse_u32(tok).ok_or(ProtocolErrorKind::NumberExpected)?,
        None => 0,
    };
    let millis = match tokens.next() {
        Some(tok) => parse_u32(tok).ok_or(ProtocolErrorKind::NumberExpected)?,
        None => 0,
    };
    expect_exhausted(&mut tokens)?;

    match bus::wait(bus, addr, expected, mask, cycles, millis).await {
        Ok(v) => Ok(format!("101 OK: {v}")),
        Err(EmuError::Timeout) => Err(ProtocolErrorKind::Unexpected),
        Err(_) => Err(ProtocolErrorKind::Unexpected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::AddressBus;
    use crate::mmr::pio_facade::PioFacade;
    use crate::pio_block::PioBlock;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn spawn_bridge() -> (std::net::SocketAddr, BusHandle) {
        let mut bus = AddressBus::new();
        let block = Arc::new(Mutex::new(PioBlock::new()));
        bus.register(Box::new(PioFacade::new(0x5020_0000, block)));
        let bus: BusHandle = Arc::new(Mutex::new(bus));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let bus2 = bus.clone();
        tokio::spawn(async move {
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                let bus3 = bus2.clone();
                tokio::spawn(async move {
                    let _ = handle_client(socket, bus3).await;
                });
            }
        });
        (addr, bus)
    }

    #[tokio::test]
    async fn version_and_read_write_roundtrip() {
        let (addr, _bus) = spawn_bridge().await;
        let mut socket = TcpStream::connect(addr).await.unwrap();

        socket.write_all(b"v\n").await.unwrap();
        let mut buf = vec![0u8; 256];
        let n = socket.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("101 OK:"));

        socket.write_all(b"w 0x50200010 3735928559\n").await.unwrap();
        let n = socket.read(&mut buf).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&buf[..n]).trim(), "101 OK");

        socket.write_all(b"r 0x50200010\n").await.unwrap();
        let n = socket.read(&mut buf).await.unwrap();
        // TXFx reads as 0 on the user facade (write-only FIFO port); this
        // just confirms the command round-trips without protocol error.
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("101 OK:"));
    }

    #[tokio::test]
    async fn unknown_command_reports_400() {
        let (addr, _bus) = spawn_bridge().await;
        let mut socket = TcpStream::connect(addr).await.unwrap();
        socket.write_all(b"zz\n").await.unwrap();
        let mut buf = vec![0u8; 64];
        let n = socket.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("400"));
    }

    #[tokio::test]
    async fn quit_closes_without_response() {
        let (addr, _bus) = spawn_bridge().await;
        let mut socket = TcpStream::connect(addr).await.unwrap();
        socket.write_all(b"q\n").await.unwrap();
        let mut buf = vec![0u8; 16];
        let n = socket.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "socket should be closed with no bytes sent");
    }
}
