use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use serde::{Deserialize, Serialize};

// Serde helper for raw byte blobs carried as "base64:..." strings,
// the node's JSON convention for binary payloads
pub mod base64_blob {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const PREFIX: &str = "base64:";

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}{}", PREFIX, STANDARD.encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let value = String::deserialize(deserializer)?;
        let encoded = value.strip_prefix(PREFIX).unwrap_or(&value);
        STANDARD.decode(encoded).map_err(Error::custom)
    }
}

// Account data entry; the key is carried inline so an entry is self-contained
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DataEntry {
    Binary {
        key: String,
        #[serde(with = "base64_blob")]
        value: Vec<u8>,
    },
    Boolean {
        key: String,
        value: bool,
    },
    Integer {
        key: String,
        value: i64,
    },
    String {
        key: String,
        value: String,
    },
}

impl DataEntry {
    pub fn key(&self) -> &str {
        match self {
            DataEntry::Binary { key, .. }
            | DataEntry::Boolean { key, .. }
            | DataEntry::Integer { key, .. }
            | DataEntry::String { key, .. } => key,
        }
    }
}

impl Serializer for DataEntry {
    fn write(&self, writer: &mut Writer) {
        match self {
            DataEntry::Binary { key, value } => {
                writer.write_u8(0);
                writer.write_string(key);
                writer.write_byte_vec(value);
            }
            DataEntry::Boolean { key, value } => {
                writer.write_u8(1);
                writer.write_string(key);
                writer.write_bool(*value);
            }
            DataEntry::Integer { key, value } => {
                writer.write_u8(2);
                writer.write_string(key);
                writer.write_i64(value);
            }
            DataEntry::String { key, value } => {
                writer.write_u8(3);
                writer.write_string(key);
                writer.write_string(value);
            }
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let tag = reader.read_u8()?;
        let key = reader.read_string()?;
        Ok(match tag {
            0 => DataEntry::Binary {
                key,
                value: reader.read_byte_vec()?,
            },
            1 => DataEntry::Boolean {
                key,
                value: reader.read_bool()?,
            },
            2 => DataEntry::Integer {
                key,
                value: reader.read_i64()?,
            },
            3 => DataEntry::String {
                key,
                value: reader.read_string()?,
            },
            _ => return Err(ReaderError::InvalidValue),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_entry_json_shape() {
        let entry = DataEntry::Integer {
            key: "counter".into(),
            value: 7,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "integer");
        assert_eq!(json["key"], "counter");
        assert_eq!(json["value"], 7);
    }

    #[test]
    fn test_binary_entry_base64_prefix() {
        let entry = DataEntry::Binary {
            key: "blob".into(),
            value: vec![1, 2, 3],
        };
        let json = serde_json::to_value(&entry).unwrap();
        let text = json["value"].as_str().unwrap();
        assert!(text.starts_with("base64:"));

        let back: DataEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_storage_roundtrip() {
        let entry = DataEntry::String {
            key: "name".into(),
            value: "value".into(),
        };
        assert_eq!(DataEntry::from_bytes(&entry.to_bytes()).unwrap(), entry);
    }
}
