//! # Address Derivation
//!
//! Litecoin native segwit addresses and the Electrum scripthash used to
//! look them up on the indexer.
//!
//! ## Scripthash
//!
//! Electrum servers index outputs by the SHA-256 of the locking script,
//! byte-reversed and hex encoded:
//!
//! ```text
//! ltc1q...  ──bech32 decode──▶  OP_0 <20-byte program>  (scriptPubKey)
//!                                        │
//!                                     sha256
//!                                        │
//!                                     reverse
//!                                        │
//!                                   hex encode  ──▶  scripthash
//! ```
//!
//! The derivation must match the server bit-for-bit, otherwise every lookup
//! silently returns an empty history.

use std::fmt;
use std::str::FromStr;

use bitcoin::bech32::{segwit, Hrp};
use bitcoin::hashes::Hash;
use bitcoin::key::CompressedPublicKey;
use bitcoin::{Script, ScriptBuf, WitnessProgram, WitnessVersion};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors produced while parsing or deriving addresses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// The string is not a valid segwit bech32 address.
    #[error("Invalid segwit address {0}: {1}")]
    Malformed(String, String),

    /// The address is valid but for another network.
    #[error("Address {address} has prefix {found}, expected {expected}")]
    WrongNetwork {
        address: String,
        expected: String,
        found: String,
    },

    /// Witness version or program length is not spendable.
    #[error("Unsupported witness program in {0}")]
    UnsupportedProgram(String),

    /// Encoding a freshly derived address failed.
    #[error("Failed to encode address: {0}")]
    Encode(String),
}

/// Litecoin network the service issues addresses for.
///
/// | Network | bech32 prefix |
/// |---------|---------------|
/// | Mainnet | `ltc` |
/// | Testnet | `tltc` |
/// | Regtest | `rltc` |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    /// Human readable part of bech32 addresses on this network.
    pub fn hrp_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "ltc",
            Network::Testnet => "tltc",
            Network::Regtest => "rltc",
        }
    }

    fn hrp(&self) -> Hrp {
        Hrp::parse_unchecked(self.hrp_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" | "ltc" => Ok(Network::Mainnet),
            "testnet" | "test" | "tltc" => Ok(Network::Testnet),
            "regtest" | "rltc" => Ok(Network::Regtest),
            other => Err(format!("unknown network '{}'", other)),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        };
        f.write_str(name)
    }
}

/// Encode the P2WPKH receiving address for a public key.
pub fn p2wpkh_address(
    public_key: &CompressedPublicKey,
    network: Network,
) -> Result<String, AddressError> {
    let program = public_key.wpubkey_hash();
    segwit::encode_v0(network.hrp(), program.as_byte_array())
        .map_err(|e| AddressError::Encode(e.to_string()))
}

/// The P2WPKH locking script for a public key.
///
/// Used as the script code when signing sweep inputs.
pub fn p2wpkh_script(public_key: &CompressedPublicKey) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&public_key.wpubkey_hash())
}

/// Decode a segwit address into its locking script.
///
/// Rejects addresses for a different network than `network`.
pub fn script_pubkey(address: &str, network: Network) -> Result<ScriptBuf, AddressError> {
    let (hrp, version, program) = segwit::decode(address)
        .map_err(|e| AddressError::Malformed(address.to_string(), e.to_string()))?;

    if hrp != network.hrp() {
        return Err(AddressError::WrongNetwork {
            address: address.to_string(),
            expected: network.hrp_str().to_string(),
            found: hrp.to_string(),
        });
    }

    let version = WitnessVersion::try_from(version)
        .map_err(|_| AddressError::UnsupportedProgram(address.to_string()))?;
    let program = WitnessProgram::new(version, &program)
        .map_err(|_| AddressError::UnsupportedProgram(address.to_string()))?;

    Ok(ScriptBuf::new_witness_program(&program))
}

/// Electrum scripthash of a locking script.
pub fn script_hash(script: &Script) -> String {
    let mut digest = Sha256::digest(script.as_bytes()).to_vec();
    digest.reverse();
    hex::encode(digest)
}

/// Electrum scripthash of an address.
pub fn address_script_hash(address: &str, network: Network) -> Result<String, AddressError> {
    Ok(script_hash(&script_pubkey(address, network)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};

    const GENERATOR_ADDRESS: &str = "ltc1qw508d6qejxtdg4y5r3zarvary0c5xw7kgmn4n9";

    fn generator_key() -> CompressedPublicKey {
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        let secret = SecretKey::from_slice(&bytes).unwrap();
        CompressedPublicKey(PublicKey::from_secret_key(&Secp256k1::new(), &secret))
    }

    #[test]
    fn test_p2wpkh_address_for_generator_point() {
        let address = p2wpkh_address(&generator_key(), Network::Mainnet).unwrap();
        assert_eq!(address, GENERATOR_ADDRESS);

        let testnet = p2wpkh_address(&generator_key(), Network::Testnet).unwrap();
        assert_eq!(testnet, "tltc1qw508d6qejxtdg4y5r3zarvary0c5xw7klfsuq0");
    }

    #[test]
    fn test_script_hash_matches_electrum() {
        let hash = address_script_hash(GENERATOR_ADDRESS, Network::Mainnet).unwrap();
        assert_eq!(
            hash,
            "9623df75239b5daa7f5f03042d325b51498c4bb7059c7748b17049bf96f73888"
        );
    }

    #[test]
    fn test_script_pubkey_roundtrips_with_derived_script() {
        let script = script_pubkey(GENERATOR_ADDRESS, Network::Mainnet).unwrap();
        assert_eq!(script, p2wpkh_script(&generator_key()));
        assert_eq!(
            hex::encode(script.as_bytes()),
            "0014751e76e8199196d454941c45d1b3a323f1433bd6"
        );
    }

    #[test]
    fn test_p2wsh_destination_is_accepted() {
        let address = "ltc1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3qmu8tk5";
        let script = script_pubkey(address, Network::Mainnet).unwrap();
        assert!(script.is_p2wsh());
        assert_eq!(
            script_hash(&script),
            "94ef09765c3092cd7a1d9f7a6e1ff861e446fd795d1e8a93f427c42df7ffe123"
        );
    }

    #[test]
    fn test_wrong_network_is_rejected() {
        let err = script_pubkey(
            "tltc1qw508d6qejxtdg4y5r3zarvary0c5xw7klfsuq0",
            Network::Mainnet,
        )
        .unwrap_err();
        assert!(matches!(err, AddressError::WrongNetwork { .. }));

        let err = script_pubkey("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4", Network::Mainnet)
            .unwrap_err();
        assert!(matches!(err, AddressError::WrongNetwork { .. }));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            script_pubkey("not-an-address", Network::Mainnet),
            Err(AddressError::Malformed(..))
        ));
        // Valid checksum alphabet but corrupted last character.
        assert!(script_pubkey("ltc1qw508d6qejxtdg4y5r3zarvary0c5xw7kgmn4n8", Network::Mainnet).is_err());
    }

    #[test]
    fn test_network_parsing() {
        assert_eq!("mainnet".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!("TESTNET".parse::<Network>().unwrap(), Network::Testnet);
        assert_eq!("rltc".parse::<Network>().unwrap(), Network::Regtest);
        assert!("dogecoin".parse::<Network>().is_err());
    }
}
