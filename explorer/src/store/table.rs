//! Sorted-table file format for the serving tier.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Header (8 bytes)                                            │
//! │  - Magic: "OXTB" (4 bytes)                                   │
//! │  - Version: u32 (4 bytes)                                    │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Data pages (~4 KiB each, keys ascending across pages)       │
//! │  - Entry count: u32                                          │
//! │  - Entries: [key_len u16][value_len u32][key][value]         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Page index (one entry per page)                             │
//! │  - [offset u64][len u32][crc u32][first_key_len u16][key]    │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Footer (56 bytes)                                           │
//! │  - index offset, index len, page count, entry count,         │
//! │    position count, move count (u64 each)                     │
//! │  - index CRC: u32                                            │
//! │  - Reverse magic: "BTXO"                                     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian.

use super::StoreError;

pub const MAGIC: [u8; 4] = *b"OXTB";
pub const MAGIC_REVERSE: [u8; 4] = *b"BTXO";
pub const VERSION: u32 = 1;

pub const HEADER_SIZE: usize = 8;
pub const FOOTER_SIZE: usize = 56;
pub const PAGE_TARGET_SIZE: usize = 4096;

const PAGE_COUNT_SIZE: usize = 4;
const ENTRY_HEADER_SIZE: usize = 6;

pub fn encode_header() -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    out[0..4].copy_from_slice(&MAGIC);
    out[4..8].copy_from_slice(&VERSION.to_le_bytes());
    out
}

pub fn check_header(bytes: &[u8]) -> Result<(), StoreError> {
    if bytes.len() < HEADER_SIZE || bytes[0..4] != MAGIC {
        return Err(StoreError::Corrupt("bad header magic".into()));
    }
    let version = read_u32(bytes, 4)?;
    if version != VERSION {
        return Err(StoreError::Corrupt(format!("unsupported version {version}")));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Footer {
    pub index_offset: u64,
    pub index_len: u64,
    pub page_count: u64,
    pub entry_count: u64,
    pub position_count: u64,
    pub move_count: u64,
    pub index_crc: u32,
}

impl Footer {
    pub fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut out = [0u8; FOOTER_SIZE];
        out[0..8].copy_from_slice(&self.index_offset.to_le_bytes());
        out[8..16].copy_from_slice(&self.index_len.to_le_bytes());
        out[16..24].copy_from_slice(&self.page_count.to_le_bytes());
        out[24..32].copy_from_slice(&self.entry_count.to_le_bytes());
        out[32..40].copy_from_slice(&self.position_count.to_le_bytes());
        out[40..48].copy_from_slice(&self.move_count.to_le_bytes());
        out[48..52].copy_from_slice(&self.index_crc.to_le_bytes());
        out[52..56].copy_from_slice(&MAGIC_REVERSE);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() != FOOTER_SIZE || bytes[52..56] != MAGIC_REVERSE {
            return Err(StoreError::Corrupt("bad footer".into()));
        }
        Ok(Self {
            index_offset: read_u64(bytes, 0)?,
            index_len: read_u64(bytes, 8)?,
            page_count: read_u64(bytes, 16)?,
            entry_count: read_u64(bytes, 24)?,
            position_count: read_u64(bytes, 32)?,
            move_count: read_u64(bytes, 40)?,
            index_crc: read_u32(bytes, 48)?,
        })
    }
}

/// Location and first key of one data page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRef {
    pub offset: u64,
    pub len: u32,
    pub crc: u32,
    pub first_key: Vec<u8>,
}

pub fn encode_index(pages: &[PageRef]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pages.len() * 40);
    for page in pages {
        out.extend_from_slice(&page.offset.to_le_bytes());
        out.extend_from_slice(&page.len.to_le_bytes());
        out.extend_from_slice(&page.crc.to_le_bytes());
        out.extend_from_slice(&(page.first_key.len() as u16).to_le_bytes());
        out.extend_from_slice(&page.first_key);
    }
    out
}

pub fn decode_index(bytes: &[u8], page_count: u64) -> Result<Vec<PageRef>, StoreError> {
    let mut pages = Vec::with_capacity(page_count.min(1 << 20) as usize);
    let mut pos = 0;
    for _ in 0..page_count {
        let offset = read_u64(bytes, pos)?;
        let len = read_u32(bytes, pos + 8)?;
        let crc = read_u32(bytes, pos + 12)?;
        let key_len = read_u16(bytes, pos + 16)? as usize;
        let first_key = slice(bytes, pos + 18, key_len)?.to_vec();
        pos += 18 + key_len;
        pages.push(PageRef {
            offset,
            len,
            crc,
            first_key,
        });
    }
    if pos != bytes.len() {
        return Err(StoreError::Corrupt("trailing bytes in page index".into()));
    }
    Ok(pages)
}

/// Accumulates entries for one data page.
#[derive(Debug)]
pub struct PageBuilder {
    buf: Vec<u8>,
    count: u32,
    first_key: Option<Vec<u8>>,
}

impl Default for PageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PageBuilder {
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(PAGE_TARGET_SIZE);
        buf.extend_from_slice(&0u32.to_le_bytes());
        Self {
            buf,
            count: 0,
            first_key: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether adding this entry would push a non-empty page past the target.
    pub fn would_overflow(&self, key: &[u8], value: &[u8]) -> bool {
        !self.is_empty()
            && self.buf.len() + ENTRY_HEADER_SIZE + key.len() + value.len() > PAGE_TARGET_SIZE
    }

    pub fn push(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let key_len = u16::try_from(key.len())
            .map_err(|_| StoreError::Corrupt(format!("key of {} bytes is too long", key.len())))?;
        let value_len = u32::try_from(value.len()).map_err(|_| {
            StoreError::Corrupt(format!("value of {} bytes is too long", value.len()))
        })?;

        if self.first_key.is_none() {
            self.first_key = Some(key.to_vec());
        }
        self.buf.extend_from_slice(&key_len.to_le_bytes());
        self.buf.extend_from_slice(&value_len.to_le_bytes());
        self.buf.extend_from_slice(key);
        self.buf.extend_from_slice(value);
        self.count += 1;
        Ok(())
    }

    /// Finished page bytes and its first key; resets the builder.
    pub fn finish(&mut self) -> (Vec<u8>, Vec<u8>) {
        let mut page = std::mem::replace(self, Self::new());
        page.buf[0..4].copy_from_slice(&page.count.to_le_bytes());
        (page.buf, page.first_key.unwrap_or_default())
    }
}

/// Entries of one encoded page, in order.
#[derive(Debug, Clone)]
pub struct PageIter<'a> {
    data: &'a [u8],
    pos: usize,
    remaining: u32,
}

impl<'a> PageIter<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self, StoreError> {
        let remaining = read_u32(data, 0)?;
        Ok(Self {
            data,
            pos: PAGE_COUNT_SIZE,
            remaining,
        })
    }

    fn read_entry(&mut self) -> Result<(&'a [u8], &'a [u8]), StoreError> {
        let key_len = read_u16(self.data, self.pos)? as usize;
        let value_len = read_u32(self.data, self.pos + 2)? as usize;
        let key_start = self.pos + ENTRY_HEADER_SIZE;
        let key = slice(self.data, key_start, key_len)?;
        let value = slice(self.data, key_start + key_len, value_len)?;
        self.pos = key_start + key_len + value_len;
        Ok((key, value))
    }
}

impl<'a> Iterator for PageIter<'a> {
    type Item = Result<(&'a [u8], &'a [u8]), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let entry = self.read_entry();
        if entry.is_err() {
            self.remaining = 0;
        }
        Some(entry)
    }
}

fn slice(bytes: &[u8], at: usize, len: usize) -> Result<&[u8], StoreError> {
    at.checked_add(len)
        .and_then(|end| bytes.get(at..end))
        .ok_or_else(|| StoreError::Corrupt(format!("read of {len} bytes at {at} out of bounds")))
}

fn read_u16(bytes: &[u8], at: usize) -> Result<u16, StoreError> {
    let mut buf = [0u8; 2];
    buf.copy_from_slice(slice(bytes, at, 2)?);
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, StoreError> {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(slice(bytes, at, 4)?);
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(bytes: &[u8], at: usize) -> Result<u64, StoreError> {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(slice(bytes, at, 8)?);
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_builder_and_iter() {
        let mut builder = PageBuilder::new();
        assert!(builder.is_empty());
        builder.push(b"a", b"1").unwrap();
        builder.push(b"bb", b"22").unwrap();
        let (page, first_key) = builder.finish();
        assert_eq!(first_key, b"a");
        assert!(builder.is_empty());

        let entries: Vec<(&[u8], &[u8])> = PageIter::new(&page)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(entries, vec![(&b"a"[..], &b"1"[..]), (&b"bb"[..], &b"22"[..])]);
    }

    #[test]
    fn test_overflow_only_for_non_empty_pages() {
        let mut builder = PageBuilder::new();
        let big = vec![0u8; PAGE_TARGET_SIZE * 2];
        assert!(!builder.would_overflow(b"k", &big));
        builder.push(b"k", b"v").unwrap();
        assert!(builder.would_overflow(b"k2", &big));
        assert!(!builder.would_overflow(b"k2", b"v"));
    }

    #[test]
    fn test_truncated_page_is_corrupt() {
        let mut builder = PageBuilder::new();
        builder.push(b"key", b"value").unwrap();
        let (page, _) = builder.finish();
        let mut iter = PageIter::new(&page[..page.len() - 2]).unwrap();
        assert!(matches!(iter.next(), Some(Err(StoreError::Corrupt(_)))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_footer_and_index_codec() {
        let footer = Footer {
            index_offset: 4104,
            index_len: 22,
            page_count: 1,
            entry_count: 9,
            position_count: 4,
            move_count: 5,
            index_crc: 0xdead_beef,
        };
        assert_eq!(Footer::decode(&footer.encode()).unwrap(), footer);

        let mut bad = footer.encode();
        bad[55] = b'X';
        assert!(Footer::decode(&bad).is_err());

        let pages = vec![PageRef {
            offset: 8,
            len: 4096,
            crc: 7,
            first_key: vec![1, 2, 3, 4],
        }];
        let index = encode_index(&pages);
        assert_eq!(decode_index(&index, 1).unwrap(), pages);
        assert!(decode_index(&index, 2).is_err());
    }

    #[test]
    fn test_header_check() {
        check_header(&encode_header()).unwrap();
        assert!(check_header(b"NOPE\x01\0\0\0").is_err());
        assert!(check_header(b"OXT").is_err());
    }
}
