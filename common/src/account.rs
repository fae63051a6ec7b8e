use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use serde::de::Error as SerdeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer as SerdeSerializer};
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
    sync::atomic::{AtomicU8, Ordering},
};
use thiserror::Error;

pub const ADDRESS_SIZE: usize = 26;
pub const ADDRESS_VERSION: u8 = 1;

pub const ALIAS_MIN_LENGTH: usize = 4;
pub const ALIAS_MAX_LENGTH: usize = 30;

// Address scheme byte, set once at startup from the configured network.
// All subsequently parsed addresses must carry it.
static CHAIN_ID: AtomicU8 = AtomicU8::new(b'W');

pub fn set_chain_id(chain_id: u8) {
    CHAIN_ID.store(chain_id, Ordering::Relaxed);
}

pub fn chain_id() -> u8 {
    CHAIN_ID.load(Ordering::Relaxed)
}

#[derive(Error, Debug)]
pub enum AddressError {
    #[error("Invalid base58 string")]
    InvalidBase58,
    #[error("Invalid address size")]
    InvalidSize,
    #[error("Invalid address version")]
    InvalidVersion,
    #[error("Address belongs to another network")]
    WrongChainId,
}

// 26-byte account identifier: version byte, scheme byte, 20-byte key hash,
// 4-byte checksum. The checksum is carried opaque; the node is the authority.
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Debug, Hash)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    pub fn version(&self) -> u8 {
        self.0[0]
    }

    pub fn scheme(&self) -> u8 {
        self.0[1]
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|_| AddressError::InvalidBase58)?;
        let bytes: [u8; ADDRESS_SIZE] =
            bytes.try_into().map_err(|_| AddressError::InvalidSize)?;
        let address = Address(bytes);
        if address.version() != ADDRESS_VERSION {
            return Err(AddressError::InvalidVersion);
        }
        if address.scheme() != chain_id() {
            return Err(AddressError::WrongChainId);
        }
        Ok(address)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl Serializer for Address {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let bytes: [u8; ADDRESS_SIZE] = reader
            .read_bytes_ref(ADDRESS_SIZE)?
            .try_into()
            .map_err(|_| ReaderError::ErrorTryInto)?;
        Ok(Address(bytes))
    }

    fn size(&self) -> usize {
        ADDRESS_SIZE
    }
}

impl Serialize for Address {
    fn serialize<S: SerdeSerializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(SerdeError::custom)
    }
}

// Short account name, resolvable to an address on chain
#[derive(Eq, PartialEq, Clone, Debug, Hash)]
pub struct Alias(String);

impl Alias {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid_char(c: char) -> bool {
        matches!(c, 'a'..='z' | '0'..='9' | '-' | '.' | '@' | '_')
    }
}

impl FromStr for Alias {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() < ALIAS_MIN_LENGTH || s.len() > ALIAS_MAX_LENGTH {
            return Err("Invalid alias length");
        }
        if !s.chars().all(Self::is_valid_char) {
            return Err("Invalid alias character");
        }
        Ok(Alias(s.to_owned()))
    }
}

impl Display for Alias {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serializer for Alias {
    fn write(&self, writer: &mut Writer) {
        writer.write_string(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let value = reader.read_string()?;
        value.parse().map_err(|_| ReaderError::InvalidValue)
    }
}

impl Serialize for Alias {
    fn serialize<S: SerdeSerializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Alias {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(SerdeError::custom)
    }
}

// Active leasing totals of one account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LeaseBalance {
    #[serde(rename = "in")]
    pub lease_in: i64,
    #[serde(rename = "out")]
    pub lease_out: i64,
}

impl Serializer for LeaseBalance {
    fn write(&self, writer: &mut Writer) {
        writer.write_i64(&self.lease_in);
        writer.write_i64(&self.lease_out);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(LeaseBalance {
            lease_in: reader.read_i64()?,
            lease_out: reader.read_i64()?,
        })
    }

    fn size(&self) -> usize {
        16
    }
}

// Public key + compiled script of a dApp account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountScriptInfo {
    pub public_key: crate::crypto::PublicKey,
    #[serde(with = "crate::data::base64_blob")]
    pub script: Vec<u8>,
    // Callable name -> estimated complexity
    #[serde(default)]
    pub complexities: Vec<(String, u64)>,
}

impl Serializer for AccountScriptInfo {
    fn write(&self, writer: &mut Writer) {
        self.public_key.write(writer);
        writer.write_byte_vec(&self.script);
        writer.write_u16(self.complexities.len() as u16);
        for (name, complexity) in &self.complexities {
            writer.write_string(name);
            writer.write_u64(complexity);
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let public_key = crate::crypto::PublicKey::read(reader)?;
        let script = reader.read_byte_vec()?;
        let count = reader.read_u16()? as usize;
        let mut complexities = Vec::with_capacity(count);
        for _ in 0..count {
            let name = reader.read_string()?;
            let complexity = reader.read_u64()?;
            complexities.push((name, complexity));
        }
        Ok(AccountScriptInfo {
            public_key,
            script,
            complexities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_address() -> Address {
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes[0] = ADDRESS_VERSION;
        bytes[1] = chain_id();
        bytes[2] = 42;
        Address::new(bytes)
    }

    #[test]
    fn test_address_base58_roundtrip() {
        let address = test_address();
        let parsed: Address = address.to_base58().parse().unwrap();
        assert_eq!(parsed, address);
    }

    #[test]
    fn test_address_wrong_scheme_rejected() {
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes[0] = ADDRESS_VERSION;
        bytes[1] = b'?';
        let encoded = bs58::encode(&bytes).into_string();
        assert!(matches!(
            encoded.parse::<Address>(),
            Err(AddressError::WrongChainId)
        ));
    }

    #[test]
    fn test_alias_validation() {
        assert!("good-alias".parse::<Alias>().is_ok());
        assert!("abc".parse::<Alias>().is_err());
        assert!("UPPER".parse::<Alias>().is_err());
    }
}
