use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Invalid size")]
    InvalidSize,
    #[error("Invalid value")]
    InvalidValue,
    #[error("Invalid hex")]
    InvalidHex,
    #[error("Invalid string: not valid UTF-8")]
    InvalidString,
    #[error("Error on try into")]
    ErrorTryInto,
}

// Reader over a borrowed byte slice, consuming from the front
pub struct Reader<'a> {
    bytes: &'a [u8],
    total: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, total: 0 }
    }

    pub fn read_bytes_ref(&mut self, n: usize) -> Result<&'a [u8], ReaderError> {
        if n > self.bytes.len() {
            return Err(ReaderError::InvalidSize);
        }
        let (bytes, rest) = self.bytes.split_at(n);
        self.bytes = rest;
        self.total += n;
        Ok(bytes)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, ReaderError> {
        Ok(self.read_bytes_ref(n)?.to_vec())
    }

    pub fn read_bytes_32(&mut self) -> Result<[u8; 32], ReaderError> {
        self.read_bytes_ref(32)?
            .try_into()
            .map_err(|_| ReaderError::ErrorTryInto)
    }

    pub fn read_u8(&mut self) -> Result<u8, ReaderError> {
        Ok(self.read_bytes_ref(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, ReaderError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ReaderError::InvalidValue),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16, ReaderError> {
        let bytes = self.read_bytes_ref(2)?;
        Ok(u16::from_be_bytes(
            bytes.try_into().map_err(|_| ReaderError::ErrorTryInto)?,
        ))
    }

    pub fn read_u32(&mut self) -> Result<u32, ReaderError> {
        let bytes = self.read_bytes_ref(4)?;
        Ok(u32::from_be_bytes(
            bytes.try_into().map_err(|_| ReaderError::ErrorTryInto)?,
        ))
    }

    pub fn read_u64(&mut self) -> Result<u64, ReaderError> {
        let bytes = self.read_bytes_ref(8)?;
        Ok(u64::from_be_bytes(
            bytes.try_into().map_err(|_| ReaderError::ErrorTryInto)?,
        ))
    }

    pub fn read_i64(&mut self) -> Result<i64, ReaderError> {
        let bytes = self.read_bytes_ref(8)?;
        Ok(i64::from_be_bytes(
            bytes.try_into().map_err(|_| ReaderError::ErrorTryInto)?,
        ))
    }

    // Length-prefixed (u16) UTF-8 string
    pub fn read_string(&mut self) -> Result<String, ReaderError> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| ReaderError::InvalidString)
    }

    // Length-prefixed (u32) byte vector
    pub fn read_byte_vec(&mut self) -> Result<Vec<u8>, ReaderError> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn total_read(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_primitives() {
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&42u64.to_be_bytes());
        bytes.extend_from_slice(&3u16.to_be_bytes());
        bytes.extend_from_slice(b"abc");

        let mut reader = Reader::new(&bytes);
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.read_u64().unwrap(), 42);
        assert_eq!(reader.read_string().unwrap(), "abc");
        assert_eq!(reader.size(), 0);
    }

    #[test]
    fn test_reader_out_of_bounds() {
        let mut reader = Reader::new(&[0u8; 4]);
        assert!(matches!(reader.read_u64(), Err(ReaderError::InvalidSize)));
    }
}
