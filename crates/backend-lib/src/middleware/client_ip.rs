// crates/backend-lib/src/middleware/client_ip.rs

//! Caller address resolution.
//!
//! Forwarding headers are read only when the socket peer is a configured
//! proxy. From a trusted peer the order is `CF-Connecting-IP`, then the
//! right-most `X-Forwarded-For` entry that is not itself a trusted proxy.
//! Any other peer is the caller.
use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header::USER_AGENT, request::Parts, Extensions, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::auth::ClientContext;

const CF_CONNECTING_IP: &str = "cf-connecting-ip";
const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Proxy addresses allowed to report the caller address
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies(Arc<[IpAddr]>);

impl TrustedProxies {
    pub fn new(addresses: impl IntoIterator<Item = IpAddr>) -> Self {
        Self(addresses.into_iter().map(canonical).collect())
    }

    pub fn contains(&self, address: IpAddr) -> bool {
        self.0.contains(&canonical(address))
    }
}

/// Resolved caller address, inserted by [`resolve_client`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddress(pub Option<IpAddr>);

fn canonical(address: IpAddr) -> IpAddr {
    match address {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

fn cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(CF_CONNECTING_IP)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Walk the forwarded chain from the nearest hop, skipping our own proxies
fn forwarded_ip(headers: &HeaderMap, trusted: &TrustedProxies) -> Option<IpAddr> {
    let chain: Vec<IpAddr> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|entry| entry.trim().parse().ok())
        .collect();

    chain
        .iter()
        .rev()
        .find(|hop| !trusted.contains(**hop))
        .or_else(|| chain.first())
        .copied()
}

/// Resolve the caller address; without a socket peer the caller is unknown
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted: &TrustedProxies,
) -> Option<IpAddr> {
    let peer = canonical(peer?.ip());
    if !trusted.contains(peer) {
        return Some(peer);
    }
    cloudflare_ip(headers)
        .or_else(|| forwarded_ip(headers, trusted))
        .or(Some(peer))
}

/// Socket peer recorded by `into_make_service_with_connect_info`
pub fn peer_addr(extensions: &Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Address resolved earlier in the stack, or the bare socket peer
pub fn resolved_address(extensions: &Extensions) -> Option<IpAddr> {
    match extensions.get::<ClientAddress>() {
        Some(ClientAddress(address)) => *address,
        None => peer_addr(extensions).map(|addr| canonical(addr.ip())),
    }
}

/// Record the caller address once per request; use with `from_fn_with_state`
pub async fn resolve_client(
    State(trusted): State<TrustedProxies>,
    mut request: Request,
    next: Next,
) -> Response {
    let address = client_ip(request.headers(), peer_addr(request.extensions()), &trusted);
    request.extensions_mut().insert(ClientAddress(address));
    next.run(request).await
}

/// Extractor for the caller's address and user agent
#[derive(Debug, Clone)]
pub struct Client(pub ClientContext);

impl<S> FromRequestParts<S> for Client
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let address = resolved_address(&parts.extensions);
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        Ok(Client(ClientContext { address, user_agent }))
    }
}
