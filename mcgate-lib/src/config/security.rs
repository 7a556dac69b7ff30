use serde::Deserialize;

/// Access policy mode
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Access control is disabled (allow all)
    #[default]
    #[serde(alias = "")]
    Disabled,
    /// Only identities found in one of the tagged lists are allowed
    Accept,
    /// Identities found in one of the tagged lists are blocked
    Deny,
}

/// Access policy referencing named lists from the `[lists]` table
#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct AccessPolicy {
    /// Filtering mode
    /// Default: "disabled"
    #[serde(default)]
    pub mode: AccessMode,
    /// Tags of the lists whose union is matched against the identity
    /// Example: ["staff", "friends"]
    #[serde(default)]
    pub list_tags: Vec<String>,
}

impl AccessPolicy {
    pub fn new(mode: AccessMode, list_tags: &[&str]) -> Self {
        Self { mode, list_tags: list_tags.iter().map(|t| t.to_string()).collect() }
    }
}

/// TLS ClientHello inspection policy
///
/// The presence of `[services.tls_sniffing]` enables sniffing for the service.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct TlsSniffPolicy {
    /// Close connections whose first bytes are not a TLS handshake
    /// Default: false (non-TLS traffic falls through to the next sniffer or is relayed as-is)
    #[serde(default)]
    pub reject_non_tls: bool,
    /// Close connections whose SNI is absent or not in the allow lists
    /// Default: false
    #[serde(default)]
    pub reject_if_non_match: bool,
    /// Tags of the lists holding the allowed server names (case-insensitive)
    #[serde(default)]
    pub sni_allow_list_tags: Vec<String>,
}
