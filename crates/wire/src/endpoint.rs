//! Service-URL handling. The operator accepts either "scheme://host:port" or
//! a bare "host:port"; the scheme picks the transport security.

use tonic::transport::Endpoint;
use url::Url;

use crate::WireError;

/// A parsed control-plane endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    authority: String,
    tls: bool,
}

impl ServiceEndpoint {
    /// Parse a service URL. Empty or `http` scheme (and bare authorities)
    /// select plaintext; any other scheme selects TLS.
    pub fn parse(raw: &str) -> Result<Self, WireError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(WireError::InvalidUrl {
                url: raw.to_string(),
                reason: "empty".to_string(),
            });
        }
        // `Url::parse` would happily treat "host:port" as scheme "host", so
        // only URLs with an explicit "://" go through it.
        if let Some((_scheme, _)) = raw.split_once("://") {
            let url = Url::parse(raw).map_err(|e| WireError::InvalidUrl {
                url: raw.to_string(),
                reason: e.to_string(),
            })?;
            let host = url.host_str().ok_or_else(|| WireError::InvalidUrl {
                url: raw.to_string(),
                reason: "missing host".to_string(),
            })?;
            let authority = match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            };
            Ok(Self { authority, tls: url.scheme() != "http" })
        } else {
            Ok(Self { authority: raw.to_string(), tls: false })
        }
    }

    /// URI handed to the transport; TLS is implied by the https scheme.
    pub fn uri(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}", self.authority)
    }

    /// Base URL for sibling HTTP endpoints (auth refresh).
    pub fn http_base(&self) -> String {
        self.uri()
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn endpoint(&self) -> Result<Endpoint, WireError> {
        Ok(Endpoint::from_shared(self.uri()).map_err(WireError::Transport)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_authority_is_plaintext() {
        let ep = ServiceEndpoint::parse("osmo.example.com:50051").unwrap();
        assert!(!ep.is_tls());
        assert_eq!(ep.uri(), "http://osmo.example.com:50051");
    }

    #[test]
    fn http_scheme_is_plaintext() {
        let ep = ServiceEndpoint::parse("http://10.0.0.4:8080").unwrap();
        assert!(!ep.is_tls());
        assert_eq!(ep.uri(), "http://10.0.0.4:8080");
    }

    #[test]
    fn any_other_scheme_is_tls() {
        for raw in ["https://osmo.example.com:443", "grpcs://osmo.example.com:443"] {
            let ep = ServiceEndpoint::parse(raw).unwrap();
            assert!(ep.is_tls(), "{raw} should select TLS");
            assert_eq!(ep.uri(), "https://osmo.example.com:443");
        }
    }

    #[test]
    fn port_is_optional_with_scheme() {
        let ep = ServiceEndpoint::parse("https://osmo.example.com").unwrap();
        assert_eq!(ep.uri(), "https://osmo.example.com");
    }

    #[test]
    fn empty_and_hostless_urls_are_rejected() {
        assert!(ServiceEndpoint::parse("").is_err());
        assert!(ServiceEndpoint::parse("https://").is_err());
    }
}
