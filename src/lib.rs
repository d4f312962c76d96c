//! LDAP gateway serving the users and groups of an identity API to LDAP
//! clients, one provider per base DN.

#![forbid(unsafe_code)]

pub mod api;
pub mod bind;
pub mod config;
pub mod constants;
pub mod dn;
pub mod entry;
pub mod error;
pub mod filter;
pub mod provider;
pub mod registry;
pub mod router;
pub mod search;
pub mod server;
pub mod synthesis;
pub mod telemetry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use router::Gateway;
