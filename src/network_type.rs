//! Network type definitions for the wallet daemon.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, Copy, PartialEq, Eq, Hash)]
pub enum NetworkType {
    Main,
    Test,
}

impl NetworkType {
    /// Accepts the four aliases named in the key-identity file contract:
    /// `main`, `mainnet`, `test`, `testnet`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "main" | "mainnet" => Some(NetworkType::Main),
            "test" | "testnet" => Some(NetworkType::Test),
            _ => None,
        }
    }

    /// Short tag used in the storage filename: `wallet-<identityKey>-<chain>.sqlite`.
    pub fn chain_tag(&self) -> &'static str {
        match self {
            NetworkType::Main => "main",
            NetworkType::Test => "test",
        }
    }
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkType::Main => write!(f, "main"),
            NetworkType::Test => write!(f, "test"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_aliases() {
        assert_eq!(NetworkType::parse("main"), Some(NetworkType::Main));
        assert_eq!(NetworkType::parse("mainnet"), Some(NetworkType::Main));
        assert_eq!(NetworkType::parse("test"), Some(NetworkType::Test));
        assert_eq!(NetworkType::parse("testnet"), Some(NetworkType::Test));
        assert_eq!(NetworkType::parse("bogus"), None);
    }
}
