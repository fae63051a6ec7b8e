use crate::{
    crypto::{Hash, PublicKey},
    serializer::{Reader, ReaderError, Serializer, Writer},
    time::TimestampMillis,
};
use serde::{Deserialize, Serialize};

// Monotone position on the chain
pub type Height = u64;

// 32-byte block identifier
pub type BlockId = Hash;

// The header fields script evaluation can observe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBlockHeader {
    pub version: u8,
    pub timestamp: TimestampMillis,
    pub reference: BlockId,
    pub generator: PublicKey,
    pub base_target: u64,
    #[serde(with = "crate::data::base64_blob")]
    pub generation_signature: Vec<u8>,
    #[serde(with = "crate::data::base64_blob")]
    pub signature: Vec<u8>,
}

impl Serializer for SignedBlockHeader {
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(self.version);
        writer.write_u64(&self.timestamp);
        self.reference.write(writer);
        self.generator.write(writer);
        writer.write_u64(&self.base_target);
        writer.write_byte_vec(&self.generation_signature);
        writer.write_byte_vec(&self.signature);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(SignedBlockHeader {
            version: reader.read_u8()?,
            timestamp: reader.read_u64()?,
            reference: BlockId::read(reader)?,
            generator: PublicKey::read(reader)?,
            base_target: reader.read_u64()?,
            generation_signature: reader.read_byte_vec()?,
            signature: reader.read_byte_vec()?,
        })
    }
}

// Header plus the VRF hit source revealed for its height
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeaderWithVrf {
    pub header: SignedBlockHeader,
    #[serde(with = "crate::data::base64_blob")]
    pub vrf: Vec<u8>,
}

impl Serializer for BlockHeaderWithVrf {
    fn write(&self, writer: &mut Writer) {
        self.header.write(writer);
        writer.write_byte_vec(&self.vrf);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(BlockHeaderWithVrf {
            header: SignedBlockHeader::read(reader)?,
            vrf: reader.read_byte_vec()?,
        })
    }
}

// Feature id -> activation height, loaded once at startup.
// Feature activation is assumed stable within one run of the service.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActivatedFeatures(pub Vec<(u16, Height)>);

impl ActivatedFeatures {
    pub fn activation_height(&self, feature: u16) -> Option<Height> {
        self.0
            .iter()
            .find(|(id, _)| *id == feature)
            .map(|(_, height)| *height)
    }

    pub fn is_active(&self, feature: u16, height: Height) -> bool {
        self.activation_height(feature)
            .is_some_and(|activated| activated <= height)
    }
}

impl Serializer for ActivatedFeatures {
    fn write(&self, writer: &mut Writer) {
        writer.write_u16(self.0.len() as u16);
        for (feature, height) in &self.0 {
            writer.write_u16(*feature);
            writer.write_u64(height);
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let count = reader.read_u16()? as usize;
        let mut features = Vec::with_capacity(count);
        for _ in 0..count {
            let feature = reader.read_u16()?;
            let height = reader.read_u64()?;
            features.push((feature, height));
        }
        Ok(ActivatedFeatures(features))
    }
}
