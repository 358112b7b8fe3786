//! PROXY protocol v1 header, emitted before the AMQP preamble to
//! proxy-protocol-enabled backends. Grounded on
//! `amqpprox_proxyprotocolheaderv1.cpp` and spec.md section 6.

use std::net::SocketAddr;

/// Render the ASCII PROXY v1 line for a client→backend hop.
///
/// `AMQP\x01\x01` legacy-preamble handling aside, this is the only place
/// the proxy writes bytes ahead of the AMQP protocol stream itself.
pub fn header_line(client: SocketAddr, backend: SocketAddr) -> String {
    match (client, backend) {
        (SocketAddr::V4(c), SocketAddr::V4(b)) => format!(
            "PROXY TCP4 {} {} {} {}\r\n",
            c.ip(),
            b.ip(),
            c.port(),
            b.port()
        ),
        (SocketAddr::V6(c), SocketAddr::V6(b)) => format!(
            "PROXY TCP6 {} {} {} {}\r\n",
            c.ip(),
            b.ip(),
            c.port(),
            b.port()
        ),
        _ => "PROXY UNKNOWN\r\n".to_string(),
    }
}
