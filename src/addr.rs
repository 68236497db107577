use std::net::{
    SocketAddr,
    ToSocketAddrs,
};

use crate::error::Error;

/// Resolves a local bind address (used by `Transport::bind`/`Server::bind`,
/// not the connect-time host/port pair spec.md validates separately).
pub(crate) fn resolve(addr: impl ToSocketAddrs) -> Result<SocketAddr, Error> {
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::InvalidAddress("does not resolve to any address".to_owned()))
}

/// Resolves a host/port pair to a single socket address, surfacing DNS and
/// parse failures as [`Error::InvalidAddress`] and an out-of-range port as
/// [`Error::InvalidPort`] rather than panicking.
///
/// Numeric IPs are resolved the same way as hostnames here, both go
/// through [`ToSocketAddrs`], which tries a direct parse first and falls
/// back to a DNS lookup, taking its first resolved address.
pub(crate) fn resolve_host_port(host: &str, port: u32) -> Result<SocketAddr, Error> {
    let port: u16 = port.try_into().map_err(|_| Error::InvalidPort(port))?;

    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::InvalidAddress(format!("{} does not resolve to any address", host)))
}
