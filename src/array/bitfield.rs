//! BITLEAF - Bit-Field Accessor
//! Reads and writes fixed-width fields packed LSB-first into
//! little-endian 64-bit words.
//!
//! Field `i` of width `w` occupies bits `[i*w, i*w + w)` of the buffer,
//! counting from bit 0 of byte 0. A field may straddle two words. For
//! widths of 8 bits and more the resulting bytes are identical to plain
//! little-endian integer stores, so direct access and bit-field access
//! agree on the same payload.
//!
//! Callers guarantee that every field lies inside the buffer and that the
//! buffer length is a multiple of 8; slice indexing turns a violation into
//! a panic rather than a silent overrun.

#[inline]
fn load_word(data: &[u8], word: usize) -> u64 {
    let start = word * 8;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[start..start + 8]);
    u64::from_le_bytes(buf)
}

#[inline]
fn store_word(data: &mut [u8], word: usize, value: u64) {
    let start = word * 8;
    data[start..start + 8].copy_from_slice(&value.to_le_bytes());
}

/// All-ones mask of `width` bits. Width 0 yields 0.
#[inline]
pub fn low_mask(width: u8) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Read the unsigned field of `width` bits starting at bit `offset`.
#[inline]
pub fn read_bitfield(data: &[u8], offset: usize, width: u8) -> u64 {
    if width == 0 {
        return 0;
    }
    let word = offset >> 6;
    let in_word = (offset & 63) as u32;
    let bits_in_first = 64 - in_word;
    let mut value = load_word(data, word) >> in_word;
    if u32::from(width) > bits_in_first {
        value |= load_word(data, word + 1) << bits_in_first;
    }
    value & low_mask(width)
}

/// Write the low `width` bits of `value` at bit `offset`, leaving every
/// other bit untouched.
#[inline]
pub fn write_bitfield(data: &mut [u8], offset: usize, width: u8, value: u64) {
    if width == 0 {
        return;
    }
    let mask = low_mask(width);
    let value = value & mask;
    let word = offset >> 6;
    let in_word = (offset & 63) as u32;
    let bits_in_first = 64 - in_word;

    let first = load_word(data, word);
    store_word(data, word, (first & !(mask << in_word)) | (value << in_word));

    if u32::from(width) > bits_in_first {
        let rest_mask = (1u64 << (u32::from(width) - bits_in_first)) - 1;
        let second = load_word(data, word + 1);
        store_word(data, word + 1, (second & !rest_mask) | (value >> bits_in_first));
    }
}

/// Interpret the low `width` bits of `value` as two's complement.
#[inline]
pub fn sign_extend(value: u64, width: u8) -> i64 {
    match width {
        0 => 0,
        w if w >= 64 => value as i64,
        w => {
            let shift = 64 - u32::from(w);
            ((value << shift) as i64) >> shift
        }
    }
}

/// Cursor over a sequence of equally spaced bit-fields.
///
/// Constructed from `(buffer, start bit offset, field width, step width,
/// starting index)`; field `k` lives at `start + k * step`. Works over
/// shared buffers for reading and over `&mut [u8]` for writing.
#[derive(Debug)]
pub struct BfIterator<B> {
    data: B,
    base: usize,
    field_position: usize,
    field_size: u8,
    step_size: usize,
}

impl<B: AsRef<[u8]>> BfIterator<B> {
    pub fn new(data: B, offset: usize, width: u8, step: usize, index: usize) -> Self {
        Self {
            data,
            base: offset,
            field_position: offset + index * step,
            field_size: width,
            step_size: step,
        }
    }

    /// Value of the current field.
    #[inline]
    pub fn get_value(&self) -> u64 {
        read_bitfield(self.data.as_ref(), self.field_position, self.field_size)
    }

    /// Step to the next field (pre-increment).
    #[inline]
    pub fn advance(&mut self) -> &mut Self {
        self.field_position += self.step_size;
        self
    }

    /// Step to the next field, returning the value at the old position
    /// (post-increment).
    #[inline]
    pub fn post_advance(&mut self) -> u64 {
        let value = self.get_value();
        self.field_position += self.step_size;
        value
    }

    /// Reposition on field `index` relative to the starting offset.
    #[inline]
    pub fn move_to(&mut self, index: usize) {
        self.field_position = self.base + index * self.step_size;
    }

    /// Bit position of the current field.
    pub fn position(&self) -> usize {
        self.field_position
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> BfIterator<B> {
    /// Overwrite the current field.
    #[inline]
    pub fn set_value(&mut self, value: u64) {
        write_bitfield(self.data.as_mut(), self.field_position, self.field_size, value);
    }

    /// A value-like handle on the current field.
    pub fn field(&mut self) -> BfRef<'_> {
        BfRef {
            data: self.data.as_mut(),
            position: self.field_position,
            width: self.field_size,
        }
    }
}

/// Handle on a single field, readable and assignable.
pub struct BfRef<'a> {
    data: &'a mut [u8],
    position: usize,
    width: u8,
}

impl BfRef<'_> {
    pub fn get(&self) -> u64 {
        read_bitfield(&*self.data, self.position, self.width)
    }

    pub fn set(&mut self, value: u64) {
        write_bitfield(&mut *self.data, self.position, self.width, value);
    }
}
