use crate::{
    account::Address,
    crypto::Hash,
    serializer::{Reader, ReaderError, Serializer, Writer},
};
use serde::{Deserialize, Deserializer, Serialize, Serializer as SerdeSerializer};
use std::fmt::{Display, Formatter};

// Either the native asset or a 32-byte issued-asset id.
// The wire convention is "null or missing id = native".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Asset {
    Waves,
    IssuedAsset(Hash),
}

impl Asset {
    pub fn from_id(id: Option<Hash>) -> Self {
        match id {
            Some(id) => Asset::IssuedAsset(id),
            None => Asset::Waves,
        }
    }

    pub fn id(&self) -> Option<&Hash> {
        match self {
            Asset::Waves => None,
            Asset::IssuedAsset(id) => Some(id),
        }
    }
}

impl Default for Asset {
    fn default() -> Self {
        Asset::Waves
    }
}

impl Display for Asset {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Asset::Waves => write!(f, "WAVES"),
            Asset::IssuedAsset(id) => write!(f, "{}", id),
        }
    }
}

impl Serializer for Asset {
    fn write(&self, writer: &mut Writer) {
        match self {
            Asset::Waves => writer.write_u8(0),
            Asset::IssuedAsset(id) => {
                writer.write_u8(1);
                id.write(writer);
            }
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(match reader.read_u8()? {
            0 => Asset::Waves,
            1 => Asset::IssuedAsset(Hash::read(reader)?),
            _ => return Err(ReaderError::InvalidValue),
        })
    }
}

impl Serialize for Asset {
    fn serialize<S: SerdeSerializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Asset::Waves => serializer.serialize_none(),
            Asset::IssuedAsset(id) => serializer.serialize_some(id),
        }
    }
}

impl<'de> Deserialize<'de> for Asset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = Option::<Hash>::deserialize(deserializer)?;
        Ok(Asset::from_id(id))
    }
}

// Full description of an issued asset as RIDE observes it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescription {
    pub issuer: Address,
    pub name: String,
    pub description: String,
    pub decimals: u8,
    pub reissuable: bool,
    pub total_volume: u64,
    // Minimum sponsored fee; zero disables sponsorship
    pub sponsorship: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<Vec<u8>>,
}

impl Serializer for AssetDescription {
    fn write(&self, writer: &mut Writer) {
        self.issuer.write(writer);
        writer.write_string(&self.name);
        writer.write_string(&self.description);
        writer.write_u8(self.decimals);
        writer.write_bool(self.reissuable);
        writer.write_u64(&self.total_volume);
        writer.write_u64(&self.sponsorship);
        self.script.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(AssetDescription {
            issuer: Address::read(reader)?,
            name: reader.read_string()?,
            description: reader.read_string()?,
            decimals: reader.read_u8()?,
            reissuable: reader.read_bool()?,
            total_volume: reader.read_u64()?,
            sponsorship: reader.read_u64()?,
            script: Option::<Vec<u8>>::read(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_serde_null_is_native() {
        let asset: Asset = serde_json::from_str("null").unwrap();
        assert_eq!(asset, Asset::Waves);

        let id = Hash::new([9u8; 32]);
        let json = serde_json::to_string(&Asset::IssuedAsset(id.clone())).unwrap();
        let back: Asset = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Asset::IssuedAsset(id));
    }
}
