//! Forwarding-header derivation (spec §4.2): `X-Forwarded-Host`,
//! `X-Forwarded-Proto`, `X-Real-IP`, and a propagated `X-Request-ID`.

use std::net::SocketAddr;

use http::HeaderMap;
use uuid::Uuid;

pub const HEADER_FORWARDED_HOST: &str = "x-forwarded-host";
pub const HEADER_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const HEADER_REAL_IP: &str = "x-real-ip";
pub const HEADER_REQUEST_ID: &str = "x-request-id";
pub const HEADER_FORWARDED_FOR: &str = "x-forwarded-for";

/// Picks the client's real IP per spec §4.2: the first entry of
/// `X-Forwarded-For` if present, else `X-Real-IP`, else the TCP peer
/// address.
#[must_use]
pub fn real_ip(headers: &HeaderMap, remote: SocketAddr) -> String {
    if let Some(forwarded_for) = headers.get(HEADER_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded_for.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get(HEADER_REAL_IP).and_then(|v| v.to_str().ok()) {
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    remote.ip().to_string()
}

/// Returns the inbound `X-Request-ID` if present and well-formed, else a
/// freshly generated one (spec §4.2: "propagated... generated if absent").
#[must_use]
pub fn request_id(headers: &HeaderMap) -> Uuid {
    headers
        .get(HEADER_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or_else(Uuid::new_v4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use pretty_assertions::assert_eq;

    fn remote() -> SocketAddr {
        "10.0.0.9:443".parse().expect("valid socket addr")
    }

    #[test]
    fn prefers_first_forwarded_for_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_FORWARDED_FOR, HeaderValue::from_static("203.0.113.4, 70.41.3.18"));
        assert_eq!(real_ip(&headers, remote()), "203.0.113.4");
    }

    #[test]
    fn falls_back_to_real_ip_header() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_REAL_IP, HeaderValue::from_static("198.51.100.2"));
        assert_eq!(real_ip(&headers, remote()), "198.51.100.2");
    }

    #[test]
    fn falls_back_to_connection_remote() {
        let headers = HeaderMap::new();
        assert_eq!(real_ip(&headers, remote()), "10.0.0.9");
    }

    #[test]
    fn generates_a_request_id_when_absent() {
        let headers = HeaderMap::new();
        let first = request_id(&headers);
        let second = request_id(&headers);
        assert_ne!(first, second);
    }

    #[test]
    fn propagates_a_well_formed_inbound_request_id() {
        let inbound = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_REQUEST_ID, HeaderValue::from_str(&inbound.to_string()).expect("valid header"));
        assert_eq!(request_id(&headers), inbound);
    }
}
