use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;

// Binds the server socket. A host of "*" asks for a wildcard listener that
// accepts both IPv4 and IPv6 where the platform allows it.
pub async fn create_listener(
    host: &str,
    port: u16,
) -> std::io::Result<(String, tokio::net::TcpListener)> {
    if host == "*" {
        return create_wildcard_listener(port);
    }

    let addr = format!("{}:{}", host, port);
    tracing::info!("Attempting to bind server to {}...", addr);

    let tokio_listener = tokio::net::TcpListener::bind(&addr).await?;

    Ok((addr, tokio_listener))
}

fn create_wildcard_listener(port: u16) -> std::io::Result<(String, tokio::net::TcpListener)> {
    // Prefer an IPv6 dual-stack socket; fall back to plain IPv4 on systems
    // without IPv6 support.
    match create_dual_stack_listener(port) {
        Ok(bound) => Ok(bound),
        Err(e) => {
            tracing::warn!("Failed to bind IPv6 listener ({}). Attempting IPv4 only.", e);

            let str_addr = format!("0.0.0.0:{}", port);
            let addr: SocketAddr = str_addr.parse().unwrap();

            tracing::info!("Attempting to bind server to {}... (IPv4)", str_addr);

            let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
            socket.set_reuse_address(true)?;
            socket.bind(&addr.into())?;
            socket.listen(1024)?;

            Ok((str_addr, into_tokio_listener(socket)?))
        }
    }
}

fn create_dual_stack_listener(port: u16) -> std::io::Result<(String, tokio::net::TcpListener)> {
    let str_addr = format!("[::]:{}", port);
    let addr: SocketAddr = str_addr.parse().unwrap();

    tracing::info!(
        "Attempting to bind server to {}... (IPv6 + IPv4 dual-stack)",
        str_addr
    );

    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;

    // Dual-stack mode can fail on some systems; single-stack IPv6 still works.
    if let Err(e) = socket.set_only_v6(false) {
        tracing::warn!(
            "Failed to set dual-stack mode for IPv6 socket: {}. Continuing anyway.",
            e
        );
    }

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok((str_addr, into_tokio_listener(socket)?))
}

fn into_tokio_listener(socket: Socket) -> std::io::Result<tokio::net::TcpListener> {
    // Tokio requires the socket to be non-blocking.
    socket.set_nonblocking(true)?;
    let std_listener: std::net::TcpListener = socket.into();
    tokio::net::TcpListener::from_std(std_listener)
}
