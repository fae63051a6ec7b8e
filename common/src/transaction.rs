use crate::{
    account::Address,
    asset::Asset,
    block::Height,
    serializer::{Reader, ReaderError, Serializer, Writer},
};
use serde::{Deserialize, Serialize};

// The part of a transfer transaction scripts can observe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPayload {
    pub sender: Address,
    pub recipient: Address,
    pub asset: Asset,
    pub amount: i64,
}

impl Serializer for TransferPayload {
    fn write(&self, writer: &mut Writer) {
        self.sender.write(writer);
        self.recipient.write(writer);
        self.asset.write(writer);
        writer.write_i64(&self.amount);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(TransferPayload {
            sender: Address::read(reader)?,
            recipient: Address::read(reader)?,
            asset: Asset::read(reader)?,
            amount: reader.read_i64()?,
        })
    }
}

// Height a transaction landed at, plus its payload when it is transfer-like
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub height: Height,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer: Option<TransferPayload>,
}

impl Serializer for TransactionInfo {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(&self.height);
        self.transfer.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(TransactionInfo {
            height: reader.read_u64()?,
            transfer: Option::<TransferPayload>::read(reader)?,
        })
    }
}
