//! Connectivity boundary types.
//!
//! The HTTP client layer is an external collaborator; this module only
//! defines what the core consumes from it: a [`Destination`] resolves to a
//! URI plus optional proxy and TLS-trust settings, and an outbound proxy
//! can be configured through an environment-sourced binding.

use http::Uri;

/// Environment variable carrying the outbound proxy URI binding.
pub const OUTBOUND_PROXY_ENV_VAR: &str = "CIRRUS_OUTBOUND_PROXY_URI";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures when reading platform-provided bindings from the environment.
#[derive(Debug, thiserror::Error)]
pub enum CloudPlatformError {
    /// The binding value is present but not a valid URI.
    #[error("outbound proxy binding '{value}' is not a valid URI")]
    MalformedProxyBinding {
        /// The offending binding value.
        value: String,
        #[source]
        source: http::uri::InvalidUri,
    },
    /// No outbound proxy binding is present in the environment.
    #[error("no outbound proxy binding is present in the environment")]
    MissingProxyBinding,
}

// ---------------------------------------------------------------------------
// ProxyConfiguration
// ---------------------------------------------------------------------------

/// Proxy settings for an outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfiguration {
    /// URI of the proxy endpoint.
    pub uri: Uri,
}

impl ProxyConfiguration {
    /// Parses a proxy configuration from an environment-sourced binding
    /// value.
    ///
    /// # Errors
    ///
    /// Returns [`CloudPlatformError::MalformedProxyBinding`] for values
    /// that are not valid URIs; raw parser errors never escape.
    pub fn from_binding_value(value: &str) -> Result<Self, CloudPlatformError> {
        let uri = value
            .parse::<Uri>()
            .map_err(|source| CloudPlatformError::MalformedProxyBinding {
                value: value.to_string(),
                source,
            })?;
        Ok(Self { uri })
    }
}

/// Reads the outbound proxy binding from the process environment.
///
/// # Errors
///
/// Returns [`CloudPlatformError::MissingProxyBinding`] when the variable is
/// unset and [`CloudPlatformError::MalformedProxyBinding`] when it does not
/// parse as a URI.
pub fn outbound_proxy_binding_or_err() -> Result<ProxyConfiguration, CloudPlatformError> {
    let value = std::env::var(OUTBOUND_PROXY_ENV_VAR)
        .map_err(|_| CloudPlatformError::MissingProxyBinding)?;
    ProxyConfiguration::from_binding_value(&value)
}

// ---------------------------------------------------------------------------
// Destination
// ---------------------------------------------------------------------------

/// A resolved target endpoint for an outbound call.
pub trait Destination: Send + Sync {
    /// Target URI of the destination.
    fn uri(&self) -> &Uri;

    /// Proxy to route the call through, if any.
    fn proxy_configuration(&self) -> Option<&ProxyConfiguration> {
        None
    }

    /// Whether TLS certificate validation is disabled for this destination.
    fn is_trusting_all_certificates(&self) -> bool {
        false
    }
}

/// Plain value implementation of [`Destination`].
#[derive(Debug, Clone)]
pub struct DefaultDestination {
    /// Target URI.
    pub uri: Uri,
    /// Optional proxy settings.
    pub proxy: Option<ProxyConfiguration>,
    /// TLS trust-all flag.
    pub trust_all_certificates: bool,
}

impl DefaultDestination {
    /// Creates a destination for `uri` with no proxy and strict TLS.
    #[must_use]
    pub fn new(uri: Uri) -> Self {
        Self { uri, proxy: None, trust_all_certificates: false }
    }
}

impl Destination for DefaultDestination {
    fn uri(&self) -> &Uri {
        &self.uri
    }

    fn proxy_configuration(&self) -> Option<&ProxyConfiguration> {
        self.proxy.as_ref()
    }

    fn is_trusting_all_certificates(&self) -> bool {
        self.trust_all_certificates
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
