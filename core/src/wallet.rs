//! Wallet kinds and chain addressing
//!
//! The set of supported wallets is small and fixed, so per-wallet behavior is
//! an exhaustive match on a closed enum rather than a trait hierarchy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a wallet keeps its session with us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionType {
    /// Addressed by a relay topic
    RelayBased,
    /// Request/response wallet addressed by a locally generated key pair
    DirectKeyBased,
}

impl std::fmt::Display for SessionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RelayBased => write!(f, "relayBased"),
            Self::DirectKeyBased => write!(f, "directKeyBased"),
        }
    }
}

/// Chain addressing for one attempt or session: an EVM chain id or a named cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChainTarget {
    Evm(u64),
    Cluster(String),
}

impl ChainTarget {
    pub fn chain_id(&self) -> Option<u64> {
        match self {
            Self::Evm(id) => Some(*id),
            Self::Cluster(_) => None,
        }
    }

    pub fn cluster(&self) -> Option<&str> {
        match self {
            Self::Evm(_) => None,
            Self::Cluster(name) => Some(name),
        }
    }

    /// Parse `"137"` as an EVM chain and anything else as a cluster name
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        match trimmed.parse::<u64>() {
            Ok(id) => Self::Evm(id),
            Err(_) => Self::Cluster(trimmed.to_ascii_lowercase()),
        }
    }
}

impl std::fmt::Display for ChainTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Evm(id) => write!(f, "eip155:{}", id),
            Self::Cluster(name) => write!(f, "solana:{}", name),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown wallet kind: {0}")]
pub struct UnknownWalletKind(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WalletKind {
    MetaMask,
    Trust,
    Rainbow,
    Coinbase,
    Phantom,
    Solflare,
}

impl WalletKind {
    pub const ALL: [WalletKind; 6] = [
        WalletKind::MetaMask,
        WalletKind::Trust,
        WalletKind::Rainbow,
        WalletKind::Coinbase,
        WalletKind::Phantom,
        WalletKind::Solflare,
    ];

    /// Stable identifier used in wallet ids and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MetaMask => "metamask",
            Self::Trust => "trust",
            Self::Rainbow => "rainbow",
            Self::Coinbase => "coinbase",
            Self::Phantom => "phantom",
            Self::Solflare => "solflare",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MetaMask => "MetaMask",
            Self::Trust => "Trust Wallet",
            Self::Rainbow => "Rainbow",
            Self::Coinbase => "Coinbase Wallet",
            Self::Phantom => "Phantom",
            Self::Solflare => "Solflare",
        }
    }

    pub fn deeplink_scheme(&self) -> &'static str {
        match self {
            Self::MetaMask => "metamask",
            Self::Trust => "trust",
            Self::Rainbow => "rainbow",
            Self::Coinbase => "cbwallet",
            Self::Phantom => "phantom",
            Self::Solflare => "solflare",
        }
    }

    pub fn default_target(&self) -> ChainTarget {
        match self {
            Self::MetaMask | Self::Trust | Self::Rainbow | Self::Coinbase => ChainTarget::Evm(1),
            Self::Phantom | Self::Solflare => ChainTarget::Cluster("mainnet-beta".to_string()),
        }
    }

    pub fn session_type(&self) -> SessionType {
        match self {
            Self::MetaMask | Self::Trust | Self::Rainbow | Self::Coinbase => SessionType::RelayBased,
            Self::Phantom | Self::Solflare => SessionType::DirectKeyBased,
        }
    }

    pub fn uses_relay(&self) -> bool {
        self.session_type() == SessionType::RelayBased
    }

    /// Deep link that hands a pairing URI to the wallet app
    pub fn connect_deeplink(&self, pairing_uri: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(pairing_uri.as_bytes()).collect();
        format!("{}://wc?uri={}", self.deeplink_scheme(), encoded)
    }
}

impl std::fmt::Display for WalletKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WalletKind {
    type Err = UnknownWalletKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize_kind(s);
        WalletKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
            .or(match normalized.as_str() {
                "trustwallet" => Some(WalletKind::Trust),
                "coinbasewallet" | "cbwallet" => Some(WalletKind::Coinbase),
                _ => None,
            })
            .ok_or_else(|| UnknownWalletKind(s.to_string()))
    }
}

/// Lower-case a wallet kind label and drop whitespace and separators
pub fn normalize_kind(kind: &str) -> String {
    kind.chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing_normalizes() {
        assert_eq!(" Meta Mask ".parse::<WalletKind>().unwrap(), WalletKind::MetaMask);
        assert_eq!("TRUST-wallet".parse::<WalletKind>().unwrap(), WalletKind::Trust);
        assert_eq!("phantom".parse::<WalletKind>().unwrap(), WalletKind::Phantom);
        assert!("ledger".parse::<WalletKind>().is_err());
    }

    #[test]
    fn test_every_kind_roundtrips_through_as_str() {
        for kind in WalletKind::ALL {
            assert_eq!(kind.as_str().parse::<WalletKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_default_targets_match_session_type() {
        for kind in WalletKind::ALL {
            match kind.session_type() {
                SessionType::RelayBased => assert!(kind.default_target().chain_id().is_some()),
                SessionType::DirectKeyBased => assert!(kind.default_target().cluster().is_some()),
            }
        }
    }

    #[test]
    fn test_connect_deeplink_encodes_uri() {
        let link = WalletKind::MetaMask.connect_deeplink("wc:abc@2?relay-protocol=irn&symKey=k");
        assert!(link.starts_with("metamask://wc?uri=wc%3Aabc%402%3F"));
        assert!(!link.contains('&'));
    }

    #[test]
    fn test_chain_target_serde_is_untagged() {
        assert_eq!(serde_json::to_string(&ChainTarget::Evm(137)).unwrap(), "137");
        let cluster: ChainTarget = serde_json::from_str("\"devnet\"").unwrap();
        assert_eq!(cluster, ChainTarget::Cluster("devnet".to_string()));
        assert_eq!(ChainTarget::parse("10"), ChainTarget::Evm(10));
        assert_eq!(ChainTarget::parse(" Devnet"), ChainTarget::Cluster("devnet".to_string()));
    }
}
