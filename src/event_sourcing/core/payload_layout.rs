use super::error::{EventStoreError, Result};

// ============================================================================
// Payload Layout - directory of sub-records packed into one commit payload
// ============================================================================
//
// Wire format (little-endian), records joined by DELIM, none after the last:
//
//   [offset: u32][SEP][length: u32][SEP][type tag: ASCII ...] DELIM [...]
//
// Offsets are non-decreasing and entries never overlap; the writer guarantees
// this, the reader does not check it.
//
// ============================================================================

const DELIM: u8 = 0x10;
const SEP: u8 = 0x3A;
const INT_SIZE: usize = 4;
const HEADER_SIZE: usize = INT_SIZE + 1 + INT_SIZE + 1;

/// One packed sub-record: where it starts, how long it is, what it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutEntry {
    pub offset: u32,
    pub length: u32,
    pub type_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PayloadLayout {
    entries: Vec<LayoutEntry>,
}

impl PayloadLayout {
    pub fn new() -> Self {
        Self::with_capacity(4)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Parses the wire format; an empty buffer is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(EventStoreError::invalid_argument(
                "serialized",
                "payload layout bytes must not be empty",
            ));
        }

        let mut layout = Self::new();
        let mut pos = 0;
        loop {
            let (entry, next) = read_row(bytes, pos)?;
            layout.entries.push(entry);
            match next {
                Some(start) => pos = start,
                None => break,
            }
        }

        Ok(layout)
    }

    /// Appends an entry. The type tag ends up on the wire, so it must be
    /// ASCII and must not contain the record delimiter.
    pub fn add(&mut self, offset: u32, length: u32, type_id: impl Into<String>) -> Result<()> {
        let type_id = type_id.into();
        if !is_valid_type_id(&type_id) {
            return Err(EventStoreError::invalid_argument(
                "type_id",
                format!("'{type_id}' must be ASCII without the 0x10 delimiter"),
            ));
        }

        self.entries.push(LayoutEntry {
            offset,
            length,
            type_id,
        });
        Ok(())
    }

    pub fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * (HEADER_SIZE + 32));
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                out.push(DELIM);
            }
            out.extend_from_slice(&entry.offset.to_le_bytes());
            out.push(SEP);
            out.extend_from_slice(&entry.length.to_le_bytes());
            out.push(SEP);
            out.extend_from_slice(entry.type_id.as_bytes());
        }
        out
    }
}

pub(crate) fn is_valid_type_id(type_id: &str) -> bool {
    type_id.is_ascii() && !type_id.as_bytes().contains(&DELIM)
}

/// Reads the record starting at `start`; returns it together with the start
/// of the following record, if any.
fn read_row(bytes: &[u8], start: usize) -> Result<(LayoutEntry, Option<usize>)> {
    let header = bytes
        .get(start..start + HEADER_SIZE)
        .ok_or_else(|| malformed(start, "truncated record header"))?;

    if header[INT_SIZE] != SEP || header[HEADER_SIZE - 1] != SEP {
        return Err(malformed(start, "missing field separator"));
    }

    let offset = read_u32(&header[..INT_SIZE]);
    let length = read_u32(&header[INT_SIZE + 1..HEADER_SIZE - 1]);

    let tag_start = start + HEADER_SIZE;
    let tag_end = bytes[tag_start..]
        .iter()
        .position(|b| *b == DELIM)
        .map(|p| tag_start + p)
        .unwrap_or(bytes.len());

    let tag = &bytes[tag_start..tag_end];
    if !tag.is_ascii() {
        return Err(malformed(start, "type tag is not ASCII"));
    }
    // ASCII is always valid UTF-8
    let type_id = String::from_utf8_lossy(tag).into_owned();

    let next = if tag_end < bytes.len() {
        Some(tag_end + 1)
    } else {
        None
    };

    Ok((
        LayoutEntry {
            offset,
            length,
            type_id,
        },
        next,
    ))
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; INT_SIZE];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

fn malformed(at: usize, what: &str) -> EventStoreError {
    EventStoreError::InvalidPersistenceData(format!("malformed payload layout at byte {at}: {what}"))
}
