use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::TcpListener;

const LISTEN_BACKLOG: i32 = 1024;

/// Binds the HTTP listener. `*` means every interface, IPv6 dual-stack when
/// the host supports it and IPv4 otherwise.
pub async fn create_listener(host: &str, port: u16) -> std::io::Result<(String, TcpListener)> {
    if host == "*" {
        return create_wildcard_listener(port);
    }

    let addr = format!("{}:{}", host, port);
    tracing::info!("Attempting to bind server to {}...", addr);

    let listener = TcpListener::bind(&addr).await?;
    let bound = listener.local_addr()?.to_string();

    Ok((bound, listener))
}

fn bind_socket(domain: Domain, addr: SocketAddr, dual_stack: bool) -> std::io::Result<TcpListener> {
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    if dual_stack {
        if let Err(e) = socket.set_only_v6(false) {
            tracing::warn!(
                "Failed to set dual-stack mode for IPv6 socket: {}. Continuing anyway.",
                e
            );
        }
    }

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

fn create_wildcard_listener(port: u16) -> std::io::Result<(String, TcpListener)> {
    let v6 = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
    tracing::info!("Attempting to bind server to {}... (IPv6 + IPv4 dual-stack)", v6);

    match bind_socket(Domain::IPV6, v6, true) {
        Ok(listener) => {
            let bound = listener.local_addr()?.to_string();
            return Ok((bound, listener));
        }
        Err(e) => {
            tracing::warn!("Failed to bind IPv6 listener: {}. Attempting IPv4 only.", e);
        }
    }

    let v4 = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    tracing::info!("Attempting to bind server to {}... (IPv4)", v4);

    let listener = bind_socket(Domain::IPV4, v4, false)?;
    let bound = listener.local_addr()?.to_string();

    Ok((bound, listener))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_loopback_ephemeral_port() {
        let (addr, listener) = create_listener("127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert_ne!(port, 0);
        assert_eq!(addr, format!("127.0.0.1:{port}"));
    }

    #[tokio::test]
    async fn test_wildcard_listener_accepts_loopback() {
        let (_addr, listener) = create_listener("*", 0).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = tokio::net::TcpStream::connect(("127.0.0.1", port));
        let (connected, accepted) = tokio::join!(client, listener.accept());
        assert!(connected.is_ok());
        assert!(accepted.is_ok());
    }
}
