use crate::error::{BenchError, Result};
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time;
use tracing::debug;

/// Listening socket with SO_REUSEADDR and an explicit backlog.
pub fn bind_listener(addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
    let bind_err = |source| BenchError::Bind { addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(backlog).map_err(bind_err)?;

    let listener = TcpListener::from_std(socket.into()).map_err(bind_err)?;
    debug!("Bound {} with backlog {}", addr, backlog);
    Ok(listener)
}

pub async fn connect(addr: SocketAddr, limit: Option<Duration>) -> Result<TcpStream> {
    let connecting = TcpStream::connect(addr);
    let connected = match limit {
        Some(after) => time::timeout(after, connecting)
            .await
            .map_err(|_| BenchError::Timeout {
                operation: "connect",
                after,
            })?,
        None => connecting.await,
    };
    let stream = connected.map_err(|source| BenchError::Connect { addr, source })?;

    configure_stream(&stream)?;
    Ok(stream)
}

fn configure_stream(stream: &TcpStream) -> Result<()> {
    let sock_ref = SockRef::from(stream);

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(10));
    sock_ref.set_tcp_keepalive(&keepalive)?;

    // acks are tiny; don't let Nagle hold them back
    stream.set_nodelay(true)?;

    Ok(())
}

/// One read, bounded by `limit` when set. Returns the byte count, zero on EOF.
pub async fn read_some<S>(stream: &mut S, buf: &mut [u8], limit: Option<Duration>) -> Result<usize>
where
    S: AsyncRead + Unpin,
{
    let read = stream.read(buf);
    let result = match limit {
        Some(after) => time::timeout(after, read)
            .await
            .map_err(|_| BenchError::Timeout {
                operation: "read",
                after,
            })?,
        None => read.await,
    };
    result.map_err(BenchError::Receive)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bound_port_can_be_rebound_after_close() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), 5).unwrap();
        let addr = listener.local_addr().unwrap();

        let stream = connect(addr, Some(Duration::from_secs(1))).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();
        assert!(stream.nodelay().unwrap());
        drop(accepted);
        drop(stream);
        drop(listener);

        let again = bind_listener(addr, 5).unwrap();
        assert_eq!(again.local_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn connect_to_closed_port_is_a_connect_error() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), 5).unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect(addr, None).await.unwrap_err();
        assert!(matches!(err, BenchError::Connect { .. }));
    }

    #[tokio::test]
    async fn read_timeout_is_reported() {
        let (mut near, _far) = tokio::io::duplex(64);
        let mut buf = [0u8; 8];
        let err = read_some(&mut near, &mut buf, Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, BenchError::Timeout { operation: "read", .. }));
    }
}
