//! Per-connection login state.

use crate::config::LinkConfig;
use crate::protocol::LoginResult;
use std::net::IpAddr;

/// Where a connection is in the login exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Only a login exchange is accepted
    AwaitingAuth,
    /// The full message set is accepted
    Authenticated,
}

/// Checks address and credentials. Binding the single uplink is decided
/// separately, after this passes.
pub fn check_login(config: &LinkConfig, remote: IpAddr, username: &str, password: &str) -> LoginResult {
    if !config.is_address_allowed(remote) {
        LoginResult::InvalidAddress
    } else if username != config.username || password != config.password {
        LoginResult::InvalidPassword
    } else {
        LoginResult::Success
    }
}
