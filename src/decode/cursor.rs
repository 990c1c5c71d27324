use crate::error_handling::types::DecodeError;

/// Bounds-checked forward cursor over a captured frame.
///
/// Every read is fallible and validated against the remaining buffer before
/// any byte is touched, so no decode step can read past the frame. Multi-byte
/// reads are big-endian, matching network byte order on the wire.
#[derive(Debug)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn check(&self, needed: usize) -> Result<(), DecodeError> {
        if self.remaining() < needed {
            return Err(DecodeError::Truncated {
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.check(1)?;
        let value = self.buf[self.pos];
        self.pos += 1;
        Ok(value)
    }

    pub fn read_u16_be(&mut self) -> Result<u16, DecodeError> {
        self.check(2)?;
        let value = u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        Ok(value)
    }

    pub fn read_u32_be(&mut self) -> Result<u32, DecodeError> {
        self.check(4)?;
        let value = u32::from_be_bytes([
            self.buf[self.pos],
            self.buf[self.pos + 1],
            self.buf[self.pos + 2],
            self.buf[self.pos + 3],
        ]);
        self.pos += 4;
        Ok(value)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.check(n)?;
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.check(n)?;
        self.pos += n;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_advance_in_order() {
        let buf = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let mut cur = ByteCursor::new(&buf);
        assert_eq!(cur.read_u8().unwrap(), 0x01);
        assert_eq!(cur.read_u16_be().unwrap(), 0x0203);
        assert_eq!(cur.read_u32_be().unwrap(), 0x04050607);
        assert_eq!(cur.remaining(), 1);
        assert_eq!(cur.position(), 7);
    }

    #[test]
    fn test_truncated_read_reports_sizes() {
        let buf = [0xaa];
        let mut cur = ByteCursor::new(&buf);
        match cur.read_u16_be() {
            Err(DecodeError::Truncated { needed, available }) => {
                assert_eq!(needed, 2);
                assert_eq!(available, 1);
            }
            other => panic!("expected truncation, got {:?}", other),
        }
        // A failed read must not consume anything.
        assert_eq!(cur.read_u8().unwrap(), 0xaa);
    }

    #[test]
    fn test_read_bytes_and_skip_bounds() {
        let buf = [1u8, 2, 3, 4];
        let mut cur = ByteCursor::new(&buf);
        assert_eq!(cur.read_bytes(2).unwrap(), &[1, 2]);
        assert!(cur.skip(3).is_err());
        cur.skip(2).unwrap();
        assert_eq!(cur.remaining(), 0);
    }
}
