use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, Extensions, HeaderMap},
};

use crate::models::DeviceInfo;
use crate::AppState;

pub const DEVICE_ID_HEADER: &str = "x-device-id";

/// The socket peer, unless it is one of `trusted_proxies`; then the
/// right-most `x-forwarded-for` hop that is not itself a trusted proxy.
/// `"unknown"` when there is no peer at all.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions, trusted_proxies: &[IpAddr]) -> String {
    let Some(peer) = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
    else {
        return "unknown".to_string();
    };
    if !trusted_proxies.contains(&peer) {
        return peer.to_string();
    }

    headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .map(|hop| hop.parse::<IpAddr>())
        .take_while(Result::is_ok)
        .filter_map(Result::ok)
        .find(|ip| !trusted_proxies.contains(ip))
        .unwrap_or(peer)
        .to_string()
}

/// Caller's network and client details, as recorded on sessions and audit events.
#[derive(Debug, Clone)]
pub struct RequestMeta(pub DeviceInfo);

#[axum::async_trait]
impl FromRequestParts<AppState> for RequestMeta {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header_value = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.chars().take(512).collect::<String>())
        };
        Ok(RequestMeta(DeviceInfo {
            ip_address: client_ip(
                &parts.headers,
                &parts.extensions,
                &state.config.security.trusted_proxies,
            ),
            user_agent: header_value(header::USER_AGENT.as_str()),
            device_id: header_value(DEVICE_ID_HEADER),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn from_peer(peer: [u8; 4]) -> Extensions {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from((peer, 4000))));
        extensions
    }

    fn forwarded(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(value));
        headers
    }

    fn proxies() -> Vec<IpAddr> {
        vec!["10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()]
    }

    #[test]
    fn untrusted_peer_cannot_spoof_forwarded_for() {
        let headers = forwarded("203.0.113.7");
        assert_eq!(client_ip(&headers, &from_peer([192, 0, 2, 44]), &proxies()), "192.0.2.44");
        assert_eq!(client_ip(&headers, &from_peer([192, 0, 2, 44]), &[]), "192.0.2.44");
    }

    #[test]
    fn trusted_peer_yields_rightmost_untrusted_hop() {
        let headers = forwarded("1.1.1.1, 203.0.113.7, 10.0.0.2");
        assert_eq!(client_ip(&headers, &from_peer([10, 0, 0, 1]), &proxies()), "203.0.113.7");
    }

    #[test]
    fn trusted_peer_without_usable_hops_is_the_client() {
        let headers = forwarded("10.0.0.2, not-an-ip");
        assert_eq!(client_ip(&headers, &from_peer([10, 0, 0, 1]), &proxies()), "10.0.0.1");
        assert_eq!(client_ip(&HeaderMap::new(), &from_peer([10, 0, 0, 1]), &proxies()), "10.0.0.1");
    }

    #[test]
    fn no_peer_is_unknown_even_with_forwarded_for() {
        let headers = forwarded("203.0.113.7");
        assert_eq!(client_ip(&headers, &Extensions::new(), &proxies()), "unknown");
    }
}
