//! Low-level RPM file structure parsing.
//!
//! An RPM is a 96-byte lead, a signature header, then the main header
//! (8-byte aligned), each header being a 16-byte preamble, `nindex` 16-byte
//! index entries, and a data store. Index entries address typed values
//! inside the store.

use std::collections::HashMap;

use crate::error::{AppError, Result};

pub(crate) const RPM_LEAD_MAGIC: [u8; 4] = [0xed, 0xab, 0xee, 0xdb];
pub(crate) const RPM_HEADER_MAGIC: [u8; 3] = [0x8e, 0xad, 0xe8];
pub(crate) const RPM_LEAD_SIZE: usize = 96;

// index entry data types
const TYPE_INT16: u32 = 3;
const TYPE_INT32: u32 = 4;
const TYPE_INT64: u32 = 5;
const TYPE_STRING: u32 = 6;
const TYPE_STRING_ARRAY: u32 = 8;
const TYPE_I18NSTRING: u32 = 9;

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    data_type: u32,
    offset: usize,
    count: usize,
}

/// A parsed header section: tag index plus its data store.
#[derive(Debug)]
pub(crate) struct Header {
    entries: HashMap<u32, IndexEntry>,
    store: Vec<u8>,
}

/// A parsed RPM: the main header and its byte range within the file.
#[derive(Debug)]
pub(crate) struct RpmFile {
    pub header: Header,
    pub header_start: u64,
    pub header_end: u64,
}

/// Parse the lead, skip the signature header, and index the main header.
pub(crate) fn parse_rpm(data: &[u8]) -> Result<RpmFile> {
    if data.len() < RPM_LEAD_SIZE {
        return Err(AppError::Parse("RPM file too small".to_string()));
    }
    if data[..4] != RPM_LEAD_MAGIC {
        return Err(AppError::Parse("invalid RPM lead magic".to_string()));
    }

    // Signature header follows the lead, padded to an 8-byte boundary.
    let sig_len = header_section_len(&data[RPM_LEAD_SIZE..])
        .map_err(|e| AppError::Parse(format!("signature header: {}", e)))?;
    let header_start = (RPM_LEAD_SIZE + sig_len + 7) & !7;

    if data.len() < header_start + 16 {
        return Err(AppError::Parse("RPM header truncated".to_string()));
    }
    let header_len = header_section_len(&data[header_start..])
        .map_err(|e| AppError::Parse(format!("main header: {}", e)))?;
    let header_end = header_start + header_len;

    let header = Header::parse(&data[header_start..header_end])?;
    Ok(RpmFile {
        header,
        header_start: header_start as u64,
        header_end: header_end as u64,
    })
}

/// Total byte length of a header section starting at `data[0]`.
fn header_section_len(data: &[u8]) -> std::result::Result<usize, String> {
    if data.len() < 16 {
        return Err("truncated preamble".to_string());
    }
    if data[..3] != RPM_HEADER_MAGIC {
        return Err("invalid header magic".to_string());
    }
    let nindex = be_u32(&data[8..12]) as usize;
    let hsize = be_u32(&data[12..16]) as usize;
    let total = 16 + nindex * 16 + hsize;
    if data.len() < total {
        return Err("truncated section".to_string());
    }
    Ok(total)
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

impl Header {
    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 16 || data[..3] != RPM_HEADER_MAGIC {
            return Err(AppError::Parse("invalid RPM header".to_string()));
        }
        let nindex = be_u32(&data[8..12]) as usize;
        let hsize = be_u32(&data[12..16]) as usize;
        let store_start = 16 + nindex * 16;
        if data.len() < store_start + hsize {
            return Err(AppError::Parse("RPM header truncated".to_string()));
        }
        let store = data[store_start..store_start + hsize].to_vec();

        let mut entries = HashMap::with_capacity(nindex);
        for i in 0..nindex {
            let at = 16 + i * 16;
            let tag = be_u32(&data[at..at + 4]);
            let data_type = be_u32(&data[at + 4..at + 8]);
            let offset = be_u32(&data[at + 8..at + 12]) as usize;
            let count = be_u32(&data[at + 12..at + 16]) as usize;
            if offset <= store.len() {
                entries.insert(
                    tag,
                    IndexEntry {
                        data_type,
                        offset,
                        count,
                    },
                );
            }
        }
        Ok(Self { entries, store })
    }

    fn cstring_at(&self, offset: usize) -> Option<String> {
        let slice = self.store.get(offset..)?;
        let end = slice.iter().position(|&b| b == 0)?;
        Some(String::from_utf8_lossy(&slice[..end]).into_owned())
    }

    /// Single string value (STRING or the first locale of an I18NSTRING).
    pub fn get_string(&self, tag: u32) -> Option<String> {
        let entry = self.entries.get(&tag)?;
        match entry.data_type {
            TYPE_STRING | TYPE_I18NSTRING => self.cstring_at(entry.offset),
            _ => None,
        }
    }

    /// All strings of a STRING_ARRAY (or a single STRING as a 1-element list).
    pub fn get_string_array(&self, tag: u32) -> Vec<String> {
        let Some(entry) = self.entries.get(&tag) else {
            return Vec::new();
        };
        match entry.data_type {
            TYPE_STRING_ARRAY | TYPE_I18NSTRING => {
                let mut out = Vec::with_capacity(entry.count);
                let mut offset = entry.offset;
                for _ in 0..entry.count {
                    let Some(s) = self.cstring_at(offset) else {
                        break;
                    };
                    offset += s.len() + 1;
                    out.push(s);
                }
                out
            }
            TYPE_STRING => self.cstring_at(entry.offset).into_iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn get_u32_array(&self, tag: u32) -> Vec<u32> {
        let Some(entry) = self.entries.get(&tag) else {
            return Vec::new();
        };
        if entry.data_type != TYPE_INT32 {
            return Vec::new();
        }
        (0..entry.count)
            .map_while(|i| {
                self.store
                    .get(entry.offset + i * 4..entry.offset + i * 4 + 4)
                    .map(be_u32)
            })
            .collect()
    }

    pub fn get_u32(&self, tag: u32) -> Option<u32> {
        self.get_u32_array(tag).first().copied()
    }

    /// INT64 value, or an INT32 widened.
    pub fn get_u64(&self, tag: u32) -> Option<u64> {
        let entry = self.entries.get(&tag)?;
        match entry.data_type {
            TYPE_INT64 => {
                let b = self.store.get(entry.offset..entry.offset + 8)?;
                Some(u64::from_be_bytes([
                    b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                ]))
            }
            TYPE_INT32 => self.get_u32(tag).map(u64::from),
            _ => None,
        }
    }

    pub fn get_u16_array(&self, tag: u32) -> Vec<u16> {
        let Some(entry) = self.entries.get(&tag) else {
            return Vec::new();
        };
        if entry.data_type != TYPE_INT16 {
            return Vec::new();
        }
        (0..entry.count)
            .map_while(|i| {
                self.store
                    .get(entry.offset + i * 2..entry.offset + i * 2 + 2)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]))
            })
            .collect()
    }
}
