//! Client for the Porsche Connect vehicle API.
//!
//! The crate is organized around one [`connection::Connection`] per account:
//! it owns the OAuth2 token lifecycle (including the browser-emulating login
//! flow in [`auth`]) and dispatches authenticated requests. Remote vehicle
//! commands go through [`remote::RemoteServices`], which submits a command
//! and polls until the backend reports a terminal state.

pub mod account;
pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
mod http;
pub mod remote;
pub mod vehicle;

#[cfg(test)]
pub mod test_support;
