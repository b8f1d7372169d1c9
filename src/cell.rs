//! Minimal bag-of-cells reader.
//!
//! Only what the pool decoder needs: deserialize a `b5ee9c72` BOC into a tree
//! of cells and walk a cell's data with a forward-only bit cursor. Exotic cells
//! are loaded as plain data; hashes and depth are never computed.

use std::sync::Arc;

const BOC_GENERIC_MAGIC: u32 = 0xb5ee_9c72;
const MAX_CELL_BITS: usize = 1023;
const MAX_CELL_REFS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CellError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("unsupported bag-of-cells magic {0:#010x}")]
    UnsupportedMagic(u32),
    #[error("bag of cells truncated at byte {0}")]
    Truncated(usize),
    #[error("bag of cells has no root")]
    NoRoot,
    #[error("malformed cell {index}: {reason}")]
    Malformed { index: usize, reason: &'static str },
    #[error("cell underflow: wanted {wanted} bits, {remaining} left")]
    Underflow { wanted: usize, remaining: usize },
}

/// A single cell: up to 1023 data bits and up to four references.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
    exotic: bool,
}

impl Cell {
    /// `data` is cut or zero-extended to exactly the bytes `bit_len` covers.
    pub fn new(mut data: Vec<u8>, bit_len: usize, refs: Vec<Arc<Cell>>) -> Self {
        data.resize((bit_len + 7) / 8, 0);
        Self {
            data,
            bit_len,
            refs,
            exotic: false,
        }
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn refs(&self) -> &[Arc<Cell>] {
        &self.refs
    }

    pub fn is_exotic(&self) -> bool {
        self.exotic
    }

    pub fn begin_parse(&self) -> CellSlice<'_> {
        CellSlice { cell: self, pos: 0, next_ref: 0 }
    }

    /// Parses a serialized bag of cells and returns its first root.
    pub fn from_boc(bytes: &[u8]) -> Result<Cell, CellError> {
        let mut reader = ByteReader { bytes, pos: 0 };

        let magic = reader.read_uint(4)? as u32;
        if magic != BOC_GENERIC_MAGIC {
            return Err(CellError::UnsupportedMagic(magic));
        }

        let flags = reader.read_u8()?;
        let has_idx = flags & 0x80 != 0;
        let has_crc32c = flags & 0x40 != 0;
        let size = (flags & 0x07) as usize;
        let off_bytes = reader.read_u8()? as usize;
        if size == 0 || size > 4 || off_bytes == 0 || off_bytes > 8 {
            return Err(CellError::Malformed { index: 0, reason: "invalid size fields" });
        }

        let cell_count = reader.read_uint(size)? as usize;
        let root_count = reader.read_uint(size)? as usize;
        let _absent = reader.read_uint(size)?;
        let _total_size = reader.read_uint(off_bytes)?;

        if root_count == 0 {
            return Err(CellError::NoRoot);
        }
        // Header counts are untrusted: check them against the bytes left
        // before sizing any buffer from them.
        reader.ensure_room(root_count, size)?;
        let mut roots = Vec::with_capacity(root_count);
        for _ in 0..root_count {
            roots.push(reader.read_uint(size)? as usize);
        }
        if has_idx {
            reader.ensure_room(cell_count, off_bytes)?;
            reader.skip(cell_count * off_bytes)?;
        }
        // Every cell carries at least its two descriptor bytes.
        reader.ensure_room(cell_count, 2)?;

        let mut raw_cells = Vec::with_capacity(cell_count);
        for index in 0..cell_count {
            raw_cells.push(RawCell::read(&mut reader, size, index)?);
        }
        if has_crc32c {
            reader.skip(4)?;
        }

        // References always point forward, so build from the last cell back.
        let mut built: Vec<Option<Arc<Cell>>> = vec![None; cell_count];
        for index in (0..cell_count).rev() {
            let raw = &raw_cells[index];
            let mut refs = Vec::with_capacity(raw.refs.len());
            for &child in &raw.refs {
                if child <= index || child >= cell_count {
                    return Err(CellError::Malformed { index, reason: "reference does not point forward" });
                }
                let cell = built[child]
                    .clone()
                    .ok_or(CellError::Malformed { index, reason: "dangling reference" })?;
                refs.push(cell);
            }
            built[index] = Some(Arc::new(Cell {
                data: raw.data.clone(),
                bit_len: raw.bit_len,
                refs,
                exotic: raw.exotic,
            }));
        }

        let root = roots[0];
        built
            .get(root)
            .cloned()
            .flatten()
            .map(|cell| (*cell).clone())
            .ok_or(CellError::NoRoot)
    }

    pub fn from_boc_hex(raw: &str) -> Result<Cell, CellError> {
        let bytes = hex::decode(raw.trim()).map_err(|e| CellError::InvalidHex(e.to_string()))?;
        Self::from_boc(&bytes)
    }

    /// Serializes this cell tree as a single-root bag of cells without index or crc.
    pub fn to_boc(&self) -> Vec<u8> {
        let order = collect_breadth_first(self);

        let cell_count = order.len();
        let size = byte_len(cell_count as u64).max(1);

        let mut body = Vec::new();
        let mut next_index = 1usize;
        for cell in &order {
            body.push(cell.refs.len() as u8 | if cell.exotic { 8 } else { 0 });
            body.push(descriptor_d2(cell.bit_len));
            body.extend_from_slice(&padded_data(cell));
            for _ in &cell.refs {
                body.extend_from_slice(&to_be_bytes(next_index as u64, size));
                next_index += 1;
            }
        }
        let off_bytes = byte_len(body.len() as u64).max(1);

        let mut out = Vec::with_capacity(body.len() + 16);
        out.extend_from_slice(&BOC_GENERIC_MAGIC.to_be_bytes());
        out.push(size as u8);
        out.push(off_bytes as u8);
        out.extend_from_slice(&to_be_bytes(cell_count as u64, size));
        out.extend_from_slice(&to_be_bytes(1, size));
        out.extend_from_slice(&to_be_bytes(0, size));
        out.extend_from_slice(&to_be_bytes(body.len() as u64, off_bytes));
        out.extend_from_slice(&to_be_bytes(0, size));
        out.extend_from_slice(&body);
        out
    }
}

// Breadth-first numbering keeps every reference pointing forward. Shared
// subtrees are written once per parent, which is fine for builder-made trees.
fn collect_breadth_first(root: &Cell) -> Vec<&Cell> {
    let mut order = vec![root];
    let mut i = 0;
    while i < order.len() {
        let cell = order[i];
        order.extend(cell.refs.iter().map(|c| c.as_ref()));
        i += 1;
    }
    order
}

fn descriptor_d2(bit_len: usize) -> u8 {
    (bit_len / 8 + (bit_len + 7) / 8) as u8
}

fn padded_data(cell: &Cell) -> Vec<u8> {
    let full = cell.bit_len / 8;
    let rem = cell.bit_len % 8;
    let mut out = cell.data[..full].to_vec();
    if rem != 0 {
        let keep = 0xffu8 << (8 - rem);
        out.push((cell.data[full] & keep) | (1 << (7 - rem)));
    }
    out
}

fn byte_len(value: u64) -> usize {
    ((64 - value.leading_zeros() as usize) + 7) / 8
}

fn to_be_bytes(value: u64, width: usize) -> Vec<u8> {
    value.to_be_bytes()[8 - width..].to_vec()
}

struct RawCell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<usize>,
    exotic: bool,
}

impl RawCell {
    fn read(reader: &mut ByteReader<'_>, ref_size: usize, index: usize) -> Result<Self, CellError> {
        let d1 = reader.read_u8()?;
        let d2 = reader.read_u8()? as usize;
        let ref_count = (d1 & 0x07) as usize;
        let exotic = d1 & 0x08 != 0;
        if ref_count > MAX_CELL_REFS {
            return Err(CellError::Malformed { index, reason: "too many references" });
        }

        let data_len = (d2 + 1) / 2;
        let data = reader.take(data_len)?.to_vec();
        let bit_len = if d2 % 2 == 0 {
            data_len * 8
        } else {
            let last = *data.last().ok_or(CellError::Malformed { index, reason: "empty padded data" })?;
            if last == 0 {
                return Err(CellError::Malformed { index, reason: "missing completion tag" });
            }
            data_len * 8 - (last.trailing_zeros() as usize + 1)
        };
        if bit_len > MAX_CELL_BITS {
            return Err(CellError::Malformed { index, reason: "too many data bits" });
        }

        let mut refs = Vec::with_capacity(ref_count);
        for _ in 0..ref_count {
            refs.push(reader.read_uint(ref_size)? as usize);
        }

        Ok(Self { data, bit_len, refs, exotic })
    }
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CellError> {
        let end = self.pos.checked_add(n).ok_or(CellError::Truncated(self.pos))?;
        let slice = self.bytes.get(self.pos..end).ok_or(CellError::Truncated(self.pos))?;
        self.pos = end;
        Ok(slice)
    }

    /// Fails unless `count` items of `width` bytes could still be read.
    fn ensure_room(&self, count: usize, width: usize) -> Result<(), CellError> {
        let left = self.bytes.len().saturating_sub(self.pos);
        match count.checked_mul(width) {
            Some(needed) if needed <= left => Ok(()),
            _ => Err(CellError::Truncated(self.pos)),
        }
    }

    fn skip(&mut self, n: usize) -> Result<(), CellError> {
        self.take(n).map(|_| ())
    }

    fn read_u8(&mut self) -> Result<u8, CellError> {
        Ok(self.take(1)?[0])
    }

    fn read_uint(&mut self, width: usize) -> Result<u64, CellError> {
        Ok(self
            .take(width)?
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }
}

/// Forward-only bit cursor over a cell's data.
#[derive(Debug, Clone)]
pub struct CellSlice<'a> {
    cell: &'a Cell,
    pos: usize,
    next_ref: usize,
}

impl<'a> CellSlice<'a> {
    pub fn remaining_bits(&self) -> usize {
        self.cell.bit_len - self.pos
    }

    fn ensure(&self, wanted: usize) -> Result<(), CellError> {
        let remaining = self.remaining_bits();
        if wanted > remaining {
            return Err(CellError::Underflow { wanted, remaining });
        }
        Ok(())
    }

    pub fn load_bit(&mut self) -> Result<bool, CellError> {
        self.ensure(1)?;
        let byte = self.cell.data[self.pos / 8];
        let bit = (byte >> (7 - self.pos % 8)) & 1 == 1;
        self.pos += 1;
        Ok(bit)
    }

    pub fn load_uint(&mut self, bits: usize) -> Result<u64, CellError> {
        debug_assert!(bits <= 64);
        self.ensure(bits)?;
        let mut value = 0u64;
        for _ in 0..bits {
            value = (value << 1) | self.load_bit()? as u64;
        }
        Ok(value)
    }

    pub fn load_int(&mut self, bits: usize) -> Result<i64, CellError> {
        debug_assert!((1..=64).contains(&bits));
        let raw = self.load_uint(bits)?;
        let shift = 64 - bits as u32;
        Ok(((raw << shift) as i64) >> shift)
    }

    /// Loads `bits` bits, left-aligned into bytes (last byte zero padded).
    pub fn load_bits(&mut self, bits: usize) -> Result<Vec<u8>, CellError> {
        self.ensure(bits)?;
        let mut out = vec![0u8; (bits + 7) / 8];
        for i in 0..bits {
            if self.load_bit()? {
                out[i / 8] |= 1 << (7 - i % 8);
            }
        }
        Ok(out)
    }

    pub fn load_bytes(&mut self, n: usize) -> Result<Vec<u8>, CellError> {
        self.load_bits(n * 8)
    }

    pub fn load_ref(&mut self) -> Result<&'a Cell, CellError> {
        let cell = self
            .cell
            .refs
            .get(self.next_ref)
            .ok_or(CellError::Malformed { index: 0, reason: "no more references" })?;
        self.next_ref += 1;
        Ok(cell.as_ref())
    }
}

/// Writes bits into a fresh cell. Used for fixtures and to round-trip data.
#[derive(Debug, Default)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_bit(mut self, bit: bool) -> Self {
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            let last = self.data.len() - 1;
            self.data[last] |= 1 << (7 - self.bit_len % 8);
        }
        self.bit_len += 1;
        self
    }

    pub fn store_uint(mut self, value: u64, bits: usize) -> Self {
        for i in (0..bits).rev() {
            self = self.store_bit((value >> i) & 1 == 1);
        }
        self
    }

    pub fn store_int(self, value: i64, bits: usize) -> Self {
        let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
        self.store_uint(value as u64 & mask, bits)
    }

    pub fn store_bytes(mut self, bytes: &[u8]) -> Self {
        for byte in bytes {
            self = self.store_uint(*byte as u64, 8);
        }
        self
    }

    pub fn store_ref(mut self, cell: Cell) -> Self {
        self.refs.push(Arc::new(cell));
        self
    }

    pub fn build(self) -> Cell {
        Cell::new(self.data, self.bit_len, self.refs)
    }
}
