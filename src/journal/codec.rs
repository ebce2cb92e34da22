//! Journal record encoding.
//!
//! ```text
//! enqueue: <id: 19 ASCII digits><payload: msgpack raw/bin><CR LF>
//! dequeue: <id: 19 ASCII digits><CR LF>
//! ```
//!
//! A dequeue record is exactly `DEQUEUE_RECORD_LEN` bytes; anything longer
//! carries a payload. Payloads are length-prefixed, so records are decoded
//! field by field rather than split on newlines.

use std::io::{self, Read};

use crate::item::QueuedItem;
use crate::{Error, Result};

/// Width of the decimal identifier at the start of every record.
pub const ID_WIDTH: usize = 19;
/// Record terminator.
pub const TERMINATOR: &[u8; 2] = b"\r\n";
/// Length of a dequeue record (identifier + terminator).
pub const DEQUEUE_RECORD_LEN: usize = ID_WIDTH + TERMINATOR.len();

const FIXRAW_MASK: u8 = 0xa0;
const FIXRAW_MAX: usize = 31;
const RAW16: u8 = 0xda;
const RAW32: u8 = 0xdb;
const BIN8: u8 = 0xc4;
const BIN16: u8 = 0xc5;
const BIN32: u8 = 0xc6;

/// A decoded journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Enqueue(QueuedItem),
    Dequeue(i64),
}

/// Why a record could not be decoded.
#[derive(Debug)]
pub enum DecodeError {
    Io(io::Error),
    /// The input ended inside a record.
    Truncated,
    /// A complete record is not valid.
    Malformed(&'static str),
}

impl From<io::Error> for DecodeError {
    fn from(value: io::Error) -> Self {
        DecodeError::Io(value)
    }
}

fn encode_id(id: i64, buf: &mut Vec<u8>) {
    buf.extend_from_slice(format!("{id:0width$}", width = ID_WIDTH).as_bytes());
}

/// Appends an enqueue record for `item` to `buf`.
pub fn encode_enqueue(item: &QueuedItem, buf: &mut Vec<u8>) -> Result<()> {
    let len = item.data.len();
    encode_id(item.id, buf);
    if len <= FIXRAW_MAX {
        buf.push(FIXRAW_MASK | len as u8);
    } else if let Ok(len16) = u16::try_from(len) {
        buf.push(RAW16);
        buf.extend_from_slice(&len16.to_be_bytes());
    } else if let Ok(len32) = u32::try_from(len) {
        buf.push(RAW32);
        buf.extend_from_slice(&len32.to_be_bytes());
    } else {
        return Err(Error::PayloadTooLarge(len));
    }
    buf.extend_from_slice(&item.data);
    buf.extend_from_slice(TERMINATOR);
    Ok(())
}

/// Appends a dequeue record for `id` to `buf`.
pub fn encode_dequeue(id: i64, buf: &mut Vec<u8>) {
    encode_id(id, buf);
    buf.extend_from_slice(TERMINATOR);
}

/// Reads records from a byte stream, counting bytes consumed.
pub struct RecordDecoder<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> RecordDecoder<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, offset: 0 }
    }

    /// Bytes consumed so far, i.e. the offset of the next record.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Decodes the next record. Returns `Ok(None)` at a clean end of input.
    pub fn next_record(&mut self) -> std::result::Result<Option<Record>, DecodeError> {
        let mut id_buf = [0u8; ID_WIDTH];
        match self.fill(&mut id_buf)? {
            0 => return Ok(None),
            n if id_buf[..n].contains(&b'\n') => {
                return Err(DecodeError::Malformed("record too short"))
            }
            n if n < ID_WIDTH => return Err(DecodeError::Truncated),
            _ => {}
        }
        let id = parse_id(&id_buf)?;

        let marker = self.read_u8()?;
        if marker == b'\r' {
            self.expect(b'\n')?;
            return Ok(Some(Record::Dequeue(id)));
        }
        if marker == b'\n' {
            return Err(DecodeError::Malformed("record too short"));
        }

        let len = self.payload_len(marker)?;
        let mut data = Vec::new();
        let read = (&mut self.inner).take(len).read_to_end(&mut data)?;
        self.offset += read as u64;
        if (read as u64) < len {
            return Err(DecodeError::Truncated);
        }
        self.expect(b'\r')?;
        self.expect(b'\n')?;
        Ok(Some(Record::Enqueue(QueuedItem::new(id, data))))
    }

    fn payload_len(&mut self, marker: u8) -> std::result::Result<u64, DecodeError> {
        let len = match marker {
            m if m & 0xe0 == FIXRAW_MASK => u64::from(m & 0x1f),
            BIN8 => u64::from(self.read_u8()?),
            RAW16 | BIN16 => {
                let mut buf = [0u8; 2];
                self.fill_exact(&mut buf)?;
                u64::from(u16::from_be_bytes(buf))
            }
            RAW32 | BIN32 => {
                let mut buf = [0u8; 4];
                self.fill_exact(&mut buf)?;
                u64::from(u32::from_be_bytes(buf))
            }
            _ => return Err(DecodeError::Malformed("unknown payload encoding")),
        };
        Ok(len)
    }

    fn expect(&mut self, byte: u8) -> std::result::Result<(), DecodeError> {
        if self.read_u8()? != byte {
            return Err(DecodeError::Malformed("bad record terminator"));
        }
        Ok(())
    }

    fn read_u8(&mut self) -> std::result::Result<u8, DecodeError> {
        let mut buf = [0u8; 1];
        self.fill_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn fill_exact(&mut self, buf: &mut [u8]) -> std::result::Result<(), DecodeError> {
        if self.fill(buf)? < buf.len() {
            return Err(DecodeError::Truncated);
        }
        Ok(())
    }

    /// Reads until `buf` is full or the input ends; returns bytes read.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        self.offset += filled as u64;
        Ok(filled)
    }
}

fn parse_id(bytes: &[u8; ID_WIDTH]) -> std::result::Result<i64, DecodeError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or(DecodeError::Malformed("unparsable identifier"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: i64 = 1_700_000_000_123_456_789;

    fn decode_all(bytes: &[u8]) -> std::result::Result<Vec<Record>, DecodeError> {
        let mut decoder = RecordDecoder::new(bytes);
        let mut records = Vec::new();
        while let Some(record) = decoder.next_record()? {
            records.push(record);
        }
        Ok(records)
    }

    #[test]
    fn dequeue_record_is_twenty_one_bytes() {
        let mut buf = Vec::new();
        encode_dequeue(ID, &mut buf);
        assert_eq!(buf.len(), DEQUEUE_RECORD_LEN);
        assert_eq!(&buf, b"1700000000123456789\r\n");
    }

    #[test]
    fn enqueue_record_layout() {
        let mut buf = Vec::new();
        encode_enqueue(&QueuedItem::new(ID, b"hello".to_vec()), &mut buf).expect("encode");
        assert_eq!(&buf, b"1700000000123456789\xa5hello\r\n");
    }

    #[test]
    fn empty_payload_is_still_an_enqueue() {
        let mut buf = Vec::new();
        encode_enqueue(&QueuedItem::new(ID, Vec::new()), &mut buf).expect("encode");
        assert!(buf.len() > DEQUEUE_RECORD_LEN);
        let records = decode_all(&buf).expect("decode");
        assert_eq!(records, vec![Record::Enqueue(QueuedItem::new(ID, Vec::new()))]);
    }

    #[test]
    fn small_ids_are_zero_padded() {
        let mut buf = Vec::new();
        encode_dequeue(42, &mut buf);
        assert_eq!(&buf[..ID_WIDTH], b"0000000000000000042");
        assert_eq!(decode_all(&buf).expect("decode"), vec![Record::Dequeue(42)]);
    }

    #[test]
    fn payload_with_newlines_and_long_prefix() {
        // 266 = 0x010a: the raw16 prefix itself contains a '\n' byte.
        let mut data = vec![b'x'; 266];
        data[10] = b'\n';
        data[11] = b'\r';
        let item = QueuedItem::new(ID, data);
        let mut buf = Vec::new();
        encode_enqueue(&item, &mut buf).expect("encode");
        encode_dequeue(ID, &mut buf);
        assert_eq!(buf[ID_WIDTH], RAW16);

        let records = decode_all(&buf).expect("decode");
        assert_eq!(records, vec![Record::Enqueue(item), Record::Dequeue(ID)]);
    }

    #[test]
    fn accepts_bin_family_prefixes() {
        let mut buf = b"1700000000123456789".to_vec();
        buf.extend_from_slice(&[BIN8, 3]);
        buf.extend_from_slice(b"abc\r\n");
        let records = decode_all(&buf).expect("decode");
        assert_eq!(
            records,
            vec![Record::Enqueue(QueuedItem::new(ID, b"abc".to_vec()))]
        );
    }

    #[test]
    fn short_line_is_malformed() {
        let err = decode_all(b"1700000000123456789\n").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn complete_short_line_at_end_is_malformed() {
        let err = decode_all(b"garbage-line\r\n").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed("record too short")));
    }

    #[test]
    fn non_numeric_id_is_malformed() {
        let err = decode_all(b"17000000001234567x9\r\n").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed("unparsable identifier")));
    }

    #[test]
    fn unknown_prefix_is_malformed() {
        let err = decode_all(b"1700000000123456789\x01abc\r\n").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed("unknown payload encoding")));
    }

    #[test]
    fn cut_off_record_is_truncated() {
        let mut buf = Vec::new();
        encode_enqueue(&QueuedItem::new(ID, b"payload".to_vec()), &mut buf).expect("encode");
        for cut in 1..buf.len() {
            let err = decode_all(&buf[..cut]).unwrap_err();
            assert!(matches!(err, DecodeError::Truncated), "cut at {cut}");
        }
    }

    #[test]
    fn offset_tracks_consumed_bytes() {
        let mut buf = Vec::new();
        encode_dequeue(1, &mut buf);
        encode_enqueue(&QueuedItem::new(2, b"ab".to_vec()), &mut buf).expect("encode");
        let mut decoder = RecordDecoder::new(&buf[..]);
        decoder.next_record().expect("first");
        assert_eq!(decoder.offset(), DEQUEUE_RECORD_LEN as u64);
        decoder.next_record().expect("second");
        assert_eq!(decoder.offset(), buf.len() as u64);
    }
}
