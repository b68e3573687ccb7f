use crate::error::{Error, Result};

/// Forward-only reader over archive bytes. Every read is bounds-checked and
/// reports the offset it failed at.
pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn advance(&mut self, bytes: usize, what: &str) -> Result<&'a [u8]> {
        if bytes > self.remaining() {
            return Err(Error::corrupt(
                self.pos,
                format!(
                    "{what} needs {bytes} bytes, but only {} remain",
                    self.remaining()
                ),
            ));
        }

        let start: usize = self.pos;
        self.pos += bytes;
        Ok(&self.data[start..self.pos])
    }

    pub fn read_u32(&mut self, what: &str) -> Result<u32> {
        let chunk: &[u8] = self.advance(4, what)?;
        Ok(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    }

    pub fn read_byte(&mut self, what: &str) -> Result<u8> {
        Ok(self.advance(1, what)?[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian() {
        let mut cursor = Cursor::new(&[0x78, 0x56, 0x34, 0x12, 0xFF]);
        assert_eq!(cursor.read_u32("value").unwrap(), 0x1234_5678);
        assert_eq!(cursor.read_byte("tail").unwrap(), 0xFF);
        assert!(cursor.is_at_end());
    }

    #[test]
    fn overrun_reports_offset() {
        let mut cursor = Cursor::new(&[1, 2, 3, 4, 5, 6]);
        cursor.advance(4, "head").unwrap();

        match cursor.read_u32("size") {
            Err(Error::CorruptArchive { offset, .. }) => assert_eq!(offset, 4),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(cursor.pos(), 4);
    }
}
