//! Error handler for the gateway.

use ldap3_proto::proto::LdapResultCode;
use thiserror::Error;

use crate::dn::DnError;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Enum representing every failure a request or a refresh can hit.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no provider could handle the request")]
    NoProvider,

    #[error("no providers configured")]
    NoProvidersConfigured,

    #[error("anonymous bind not allowed for search")]
    AnonymousSearch,

    #[error("bind DN {bind_dn} is not in base DN {base_dn}")]
    OutsideBaseDn { bind_dn: String, base_dn: String },

    #[error("no username in DN {0}")]
    MissingUsername(String),

    #[error("access denied, {0} did not bind on this connection")]
    NotBound(String),

    #[error("invalid DN: {0}")]
    Dn(#[from] DnError),

    #[error("unsupported filter {0}")]
    UnsupportedFilter(String),

    #[error("API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned status {status} for {path}")]
    Api { status: u16, path: String },

    #[error("invalid API payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid API URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("flow `{slug}` failed, {details}")]
    Flow { slug: String, details: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("internal error, {details}")]
    Internal { details: String },
}

impl GatewayError {
    /// Shortcut for [`GatewayError::Internal`].
    pub fn internal(details: impl Into<String>) -> Self {
        Self::Internal {
            details: details.into(),
        }
    }

    /// LDAP result code sent to the client for this error.
    pub fn result_code(&self) -> LdapResultCode {
        match self {
            Self::NoProvider
            | Self::AnonymousSearch
            | Self::OutsideBaseDn { .. }
            | Self::MissingUsername(_)
            | Self::NotBound(_)
            | Self::Dn(_) => LdapResultCode::InsufficentAccessRights,
            Self::Flow { .. } => LdapResultCode::InvalidCredentials,
            _ => LdapResultCode::OperationsError,
        }
    }

    /// Label used on the rejection counter.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NoProvider
            | Self::NoProvidersConfigured
            | Self::MissingUsername(_) => "no_provider",
            Self::AnonymousSearch => "anonymous",
            Self::OutsideBaseDn { .. } | Self::Dn(_) => "bind_dn_outside_base",
            Self::NotBound(_) => "not_bound",
            Self::UnsupportedFilter(_) => "filter_error",
            Self::Flow { .. } => "flow_error",
            _ => "backend_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_codes() {
        assert_eq!(
            GatewayError::AnonymousSearch.result_code(),
            LdapResultCode::InsufficentAccessRights
        );
        assert_eq!(
            GatewayError::UnsupportedFilter("(a>=1)".into()).result_code(),
            LdapResultCode::OperationsError
        );
        assert_eq!(
            GatewayError::Api {
                status: 500,
                path: "/".into()
            }
            .result_code(),
            LdapResultCode::OperationsError
        );
        assert_eq!(
            GatewayError::Dn(DnError::MissingEquals("cn".into())).result_code(),
            LdapResultCode::InsufficentAccessRights
        );
    }

    #[test]
    fn test_messages() {
        assert!(
            GatewayError::NoProvidersConfigured
                .to_string()
                .contains("no provider")
        );
        assert!(
            GatewayError::AnonymousSearch
                .to_string()
                .contains("anonymous bind not allowed")
        );
    }
}
