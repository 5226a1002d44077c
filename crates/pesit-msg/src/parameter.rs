//! Parameter (PI) and Parameter Group (PGI) model, and their TLV wire
//! encoding (§3, §4.1).
//!
//! A parameter area is a flat sequence of entries at the top level; an
//! entry is either a plain [`Parameter`] or a [`ParameterGroup`] wrapping a
//! nested sequence of `Parameter`s. Unknown ids are preserved byte-for-byte
//! as plain parameters so echo/relay stays lossless (§4.1 guarantee).

/// Well-known Parameter Identifiers (PI_xx of §3). Not exhaustive of the
/// wire range (ids 0-255 are all legal), but every id this engine interprets
/// is named here.
#[allow(non_upper_case_globals)]
pub mod pi {
    pub const CRC: u8 = 1;
    pub const DIAGNOSTIC: u8 = 2;
    pub const REQUESTER_NAME: u8 = 3;
    pub const SERVER_NAME: u8 = 4;
    pub const PASSWORD: u8 = 5;
    pub const PROTOCOL_VERSION: u8 = 6;
    pub const SYNC_POINT_CAPABILITY: u8 = 7;
    pub const FILE_TYPE: u8 = 11;
    pub const FILENAME: u8 = 12;
    pub const TRANSFER_ID: u8 = 13;
    pub const REQUESTED_ATTRIBUTES: u8 = 14;
    pub const RESTART_FLAG: u8 = 15;
    pub const PRIORITY: u8 = 17;
    pub const RESTART_POINT: u8 = 18;
    pub const END_OF_TRANSFER_REASON: u8 = 19;
    pub const SYNC_POINT_NUMBER: u8 = 20;
    pub const COMPRESSION: u8 = 21;
    pub const ACCESS_TYPE: u8 = 22;
    pub const RESYNC_ENABLE: u8 = 23;
    pub const MAX_ENTITY_SIZE: u8 = 25;
    pub const ARTICLE_FORMAT: u8 = 31;
    pub const ARTICLE_LENGTH: u8 = 32;
    pub const FILE_ORGANIZATION: u8 = 33;
    pub const FILE_SIZE_RESERVATION: u8 = 42;
    pub const FREE_MESSAGE_91: u8 = 91;
    pub const FREE_MESSAGE_99: u8 = 99;
}

/// Well-known Parameter Group Identifiers (PGI_xx of §3).
#[allow(non_upper_case_globals)]
pub mod pgi {
    pub const FILE_IDENTIFICATION: u8 = 9;
    pub const LOGICAL_ATTRIBUTES: u8 = 30;
    pub const PHYSICAL_ATTRIBUTES: u8 = 40;
}

/// String-typed PIs: the only ones EBCDIC translation applies to (§4.1).
pub fn is_string_pi(id: u8) -> bool {
    matches!(
        id,
        pi::REQUESTER_NAME | pi::SERVER_NAME | pi::PASSWORD | pi::FILENAME | pi::FREE_MESSAGE_91 | pi::FREE_MESSAGE_99
    )
}

fn known_pgi_ids() -> [u8; 3] {
    [pgi::FILE_IDENTIFICATION, pgi::LOGICAL_ATTRIBUTES, pgi::PHYSICAL_ATTRIBUTES]
}

/// A single `(id, value)` parameter. `value` is always the raw wire bytes;
/// typed accessors interpret it on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub id: u8,
    pub value: Vec<u8>,
}

impl Parameter {
    pub fn new(id: u8, value: impl Into<Vec<u8>>) -> Self {
        Parameter { id, value: value.into() }
    }

    pub fn u8(id: u8, value: u8) -> Self {
        Parameter::new(id, vec![value])
    }

    pub fn u16(id: u8, value: u16) -> Self {
        Parameter::new(id, value.to_be_bytes().to_vec())
    }

    pub fn u24(id: u8, value: u32) -> Self {
        let b = value.to_be_bytes();
        Parameter::new(id, vec![b[1], b[2], b[3]])
    }

    pub fn u32(id: u8, value: u32) -> Self {
        Parameter::new(id, value.to_be_bytes().to_vec())
    }

    pub fn str(id: u8, value: &str) -> Self {
        Parameter::new(id, value.as_bytes().to_vec())
    }

    pub fn as_u8(&self) -> Option<u8> {
        self.value.first().copied()
    }

    pub fn as_u16(&self) -> Option<u16> {
        if self.value.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.value[0], self.value[1]]))
    }

    pub fn as_u24(&self) -> Option<u32> {
        if self.value.len() < 3 {
            return None;
        }
        Some(u32::from_be_bytes([0, self.value[0], self.value[1], self.value[2]]))
    }

    pub fn as_u32(&self) -> Option<u32> {
        if self.value.len() < 4 {
            return None;
        }
        Some(u32::from_be_bytes([self.value[0], self.value[1], self.value[2], self.value[3]]))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.value
    }

    /// Decodes `value` as a string. By the time a [`Parameter`] reaches
    /// application code its value has already been normalized to ASCII by
    /// the codec (see `codec::parse`), regardless of the session's wire
    /// encoding, so no flag is needed here.
    pub fn as_str(&self) -> String {
        String::from_utf8_lossy(&self.value).trim_end().to_string()
    }
}

/// A Parameter Group: a PGI id wrapping a nested sequence of parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterGroup {
    pub id: u8,
    pub params: Vec<Parameter>,
}

impl ParameterGroup {
    pub fn new(id: u8, params: Vec<Parameter>) -> Self {
        ParameterGroup { id, params }
    }

    pub fn find(&self, pi_id: u8) -> Option<&Parameter> {
        self.params.iter().find(|p| p.id == pi_id)
    }
}

/// A top-level entry in a parameter area: either a plain parameter or a
/// group. Order is preserved on parse and re-emitted unchanged on encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamEntry {
    Single(Parameter),
    Group(ParameterGroup),
}

/// A full parameter area: an ordered sequence of entries, with convenience
/// lookups flattened across groups.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParameterArea(pub Vec<ParamEntry>);

impl ParameterArea {
    pub fn new(entries: Vec<ParamEntry>) -> Self {
        ParameterArea(entries)
    }

    pub fn push(&mut self, p: Parameter) {
        self.0.push(ParamEntry::Single(p));
    }

    pub fn push_group(&mut self, g: ParameterGroup) {
        self.0.push(ParamEntry::Group(g));
    }

    /// Finds a top-level (non-grouped) parameter by id.
    pub fn find(&self, id: u8) -> Option<&Parameter> {
        self.0.iter().find_map(|e| match e {
            ParamEntry::Single(p) if p.id == id => Some(p),
            _ => None,
        })
    }

    /// Finds a group by PGI id.
    pub fn find_group(&self, pgi_id: u8) -> Option<&ParameterGroup> {
        self.0.iter().find_map(|e| match e {
            ParamEntry::Group(g) if g.id == pgi_id => Some(g),
            _ => None,
        })
    }

    /// Finds a parameter anywhere (top level or inside any group).
    pub fn find_anywhere(&self, id: u8) -> Option<&Parameter> {
        for e in &self.0 {
            match e {
                ParamEntry::Single(p) if p.id == id => return Some(p),
                ParamEntry::Group(g) => {
                    if let Some(p) = g.find(id) {
                        return Some(p);
                    }
                }
                _ => {}
            }
        }
        None
    }

    pub fn has(&self, id: u8) -> bool {
        self.find_anywhere(id).is_some()
    }
}

/// Errors raised while decoding a parameter area. Framing errors around the
/// parameter area (short buffer etc.) are reported here and wrapped by
/// [`crate::codec::ParseError`].
#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    #[error("parameter area truncated: expected at least {needed} more byte(s)")]
    Truncated { needed: usize },
    #[error("parameter value length {length} exceeds remaining frame of {remaining} byte(s)")]
    ValueTooLong { length: usize, remaining: usize },
}

/// Reads the TLV length-of-length convention: a first byte with the high
/// bit clear is a 1-byte length (0-127); a first byte with the high bit set
/// combines its low 7 bits with a second byte into a 15-bit length.
fn read_len(buf: &[u8], offset: usize) -> Result<(usize, usize), ParamError> {
    if offset >= buf.len() {
        return Err(ParamError::Truncated { needed: 1 });
    }
    let first = buf[offset];
    if first & 0x80 == 0 {
        Ok((first as usize, 1))
    } else {
        if offset + 1 >= buf.len() {
            return Err(ParamError::Truncated { needed: 1 });
        }
        let len = (((first & 0x7F) as usize) << 8) | buf[offset + 1] as usize;
        Ok((len, 2))
    }
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    if len <= 0x7F {
        out.push(len as u8);
    } else {
        let len = len as u16;
        out.push(0x80 | ((len >> 8) as u8 & 0x7F));
        out.push((len & 0xFF) as u8);
    }
}

/// Parses a full parameter area from `buf`.
pub fn parse_parameter_area(buf: &[u8]) -> Result<ParameterArea, ParamError> {
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        let id = buf[offset];
        offset += 1;
        let (len, len_size) = read_len(buf, offset)?;
        offset += len_size;
        if offset + len > buf.len() {
            return Err(ParamError::ValueTooLong { length: len, remaining: buf.len() - offset });
        }
        let value = buf[offset..offset + len].to_vec();
        offset += len;

        if known_pgi_ids().contains(&id) {
            let nested = parse_parameter_area(&value)?;
            let params = nested
                .0
                .into_iter()
                .filter_map(|e| match e {
                    ParamEntry::Single(p) => Some(p),
                    ParamEntry::Group(_) => None,
                })
                .collect();
            entries.push(ParamEntry::Group(ParameterGroup::new(id, params)));
        } else {
            entries.push(ParamEntry::Single(Parameter::new(id, value)));
        }
    }
    Ok(ParameterArea(entries))
}

/// Encodes a full parameter area to wire bytes.
pub fn encode_parameter_area(area: &ParameterArea) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in &area.0 {
        match entry {
            ParamEntry::Single(p) => {
                out.push(p.id);
                write_len(&mut out, p.value.len());
                out.extend_from_slice(&p.value);
            }
            ParamEntry::Group(g) => {
                let mut nested = Vec::new();
                for p in &g.params {
                    nested.push(p.id);
                    write_len(&mut nested, p.value.len());
                    nested.extend_from_slice(&p.value);
                }
                out.push(g.id);
                write_len(&mut out, nested.len());
                out.extend_from_slice(&nested);
            }
        }
    }
    out
}

impl ParameterArea {
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ParamError> {
        parse_parameter_area(buf)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode_parameter_area(self)
    }
}
