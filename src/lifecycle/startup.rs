//! Startup banner.
//!
//! Tells the developer where the server is reachable and that it is not a
//! production server.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Addresses a browser can use to reach `local`.
///
/// A wildcard bind is listed as loopback first, then the wildcard itself.
pub fn display_urls(local: SocketAddr, tls: bool) -> Vec<String> {
    let scheme = if tls { "https" } else { "http" };
    let fmt = |ip: IpAddr| match ip {
        IpAddr::V6(v6) => format!("{scheme}://[{v6}]:{}", local.port()),
        IpAddr::V4(v4) => format!("{scheme}://{v4}:{}", local.port()),
    };

    if local.ip().is_unspecified() {
        let loopback = match local.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(_) => IpAddr::V6(std::net::Ipv6Addr::LOCALHOST),
        };
        vec![fmt(loopback), fmt(local.ip())]
    } else {
        vec![fmt(local.ip())]
    }
}

/// Log the development-server warning and the reachable URLs.
pub fn log_startup(local: SocketAddr, tls: bool) {
    tracing::warn!(
        "This is a development server. Do not use it in a production deployment."
    );
    let urls = display_urls(local, tls);
    if local.ip().is_unspecified() {
        tracing::info!("Running on all addresses ({})", local.ip());
    }
    for url in urls {
        tracing::info!("Running on {url}");
    }
    tracing::info!("Press CTRL+C to quit");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specific_address_is_listed_once() {
        let urls = display_urls("127.0.0.1:5000".parse().unwrap(), false);
        assert_eq!(urls, vec!["http://127.0.0.1:5000"]);
    }

    #[test]
    fn wildcard_lists_loopback_first() {
        let urls = display_urls("0.0.0.0:8443".parse().unwrap(), true);
        assert_eq!(urls, vec!["https://127.0.0.1:8443", "https://0.0.0.0:8443"]);
    }

    #[test]
    fn ipv6_is_bracketed() {
        let urls = display_urls("[::]:5000".parse().unwrap(), false);
        assert_eq!(urls, vec!["http://[::1]:5000", "http://[::]:5000"]);
    }
}
