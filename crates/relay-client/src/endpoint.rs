//! Relay addresses and the push → pull derivation.

use thiserror::Error;
use url::Url;

/// Named relays accepted by `join`.
pub const PRESETS: &[(&str, &str)] = &[("local", "ws://127.0.0.1:8080/ws")];

/// Path of the push transport on the relay.
const PUSH_PATH: &str = "/ws";

/// Address parsing error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("invalid address {0}: {1}")]
    Invalid(String, url::ParseError),
    #[error("unsupported scheme {0} (expected ws, wss, http or https)")]
    Scheme(String),
}

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// WebSocket address, with the pull base to fall back to.
    Push { url: Url, fallback: Url },
    /// HTTP base address for polling.
    Pull(Url),
}

impl Endpoint {
    /// Parse a relay address.
    ///
    /// # Errors
    /// Returns error if the address is malformed or its scheme is not one of
    /// `ws`, `wss`, `http`, `https`.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let url =
            Url::parse(input.trim()).map_err(|e| AddressError::Invalid(input.to_owned(), e))?;
        match url.scheme() {
            "ws" | "wss" => {
                let fallback = derive_pull_base(&url)?;
                Ok(Self::Push { url, fallback })
            }
            "http" | "https" => Ok(Self::Pull(normalize_base(url))),
            other => Err(AddressError::Scheme(other.to_owned())),
        }
    }

    /// Resolve a preset name, or parse the target as an address.
    ///
    /// # Errors
    /// Returns error if the target is neither a preset nor a valid address.
    pub fn resolve(target: &str) -> Result<Self, AddressError> {
        let address = PRESETS
            .iter()
            .find(|(name, _)| *name == target)
            .map_or(target, |(_, address)| *address);
        Self::parse(address)
    }

    /// The address as given (push) or the pull base.
    #[must_use]
    pub const fn url(&self) -> &Url {
        match self {
            Self::Push { url, .. } | Self::Pull(url) => url,
        }
    }

    /// HTTP base for guarded calls: the pull address itself, or the one
    /// derived from the push address.
    #[must_use]
    pub const fn pull_base(&self) -> &Url {
        match self {
            Self::Push { fallback, .. } => fallback,
            Self::Pull(base) => base,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self.url(), f)
    }
}

/// `ws` → `http`, `wss` → `https`, push path stripped.
fn derive_pull_base(push: &Url) -> Result<Url, AddressError> {
    let scheme = if push.scheme() == "wss" { "https" } else { "http" };
    let mut base = push.clone();
    base.set_scheme(scheme)
        .map_err(|()| AddressError::Scheme(push.scheme().to_owned()))?;
    let path = base.path().trim_end_matches('/');
    let path = path.strip_suffix(PUSH_PATH).unwrap_or(path).to_owned();
    base.set_path(&path);
    Ok(normalize_base(base))
}

/// Drop query and fragment and make sure the path ends with `/` so
/// [`Url::join`] appends to it.
fn normalize_base(mut base: Url) -> Url {
    base.set_query(None);
    base.set_fragment(None);
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fallback(input: &str) -> String {
        Endpoint::parse(input).unwrap().pull_base().to_string()
    }

    #[test]
    fn test_push_fallback_derivation() {
        assert_eq!(fallback("ws://localhost:8080/ws"), "http://localhost:8080/");
        assert_eq!(fallback("wss://relay.example.com/ws"), "https://relay.example.com/");
        assert_eq!(fallback("wss://relay.example.com"), "https://relay.example.com/");
        assert_eq!(
            fallback("ws://host/chat/ws?originId=x"),
            "http://host/chat/"
        );
    }

    #[test]
    fn test_pull_address_is_its_own_base() {
        let endpoint = Endpoint::parse("http://localhost:8080").unwrap();
        assert!(matches!(endpoint, Endpoint::Pull(_)));
        assert_eq!(endpoint.pull_base().as_str(), "http://localhost:8080/");
        assert_eq!(
            endpoint.pull_base().join("history").unwrap().as_str(),
            "http://localhost:8080/history"
        );
    }

    #[test]
    fn test_rejected_addresses() {
        assert!(matches!(
            Endpoint::parse("ftp://example.com"),
            Err(AddressError::Scheme(scheme)) if scheme == "ftp"
        ));
        assert!(matches!(
            Endpoint::parse("not an address"),
            Err(AddressError::Invalid(..))
        ));
    }

    #[test]
    fn test_presets() {
        let endpoint = Endpoint::resolve("local").unwrap();
        assert_eq!(endpoint.url().as_str(), "ws://127.0.0.1:8080/ws");
        assert!(Endpoint::resolve("ws://other:1/ws").is_ok());
    }
}
