//! Quantized tensor abstraction with on-the-fly dequantization
//!
//! One arithmetic contract over every physical encoding the loader accepts:
//!
//! - `F32`: 32-bit IEEE 754, 4 bytes per value
//! - `F16`: 16-bit IEEE 754 half-precision, 2 bytes per value
//! - `Q4_0`: blocks of 32 values, 18 bytes each (f16 scale + 16 nibble bytes),
//!   dequantization `value = scale * (quant - 8)`
//! - `Q8_0`: blocks of 32 values, 34 bytes each (f16 scale + 32 int8 values),
//!   dequantization `value = scale * quant`
//! - `Q4_K`: super-blocks of 256 values, 144 bytes each (f16 `d` + f16 `dmin`
//!   + 12 bytes of packed 6-bit sub-block scales + 128 nibble bytes),
//!   dequantization `value = d * scale * quant - dmin * min`
//!
//! Weights stay in their wire encoding behind [`QuantizedTensor::View`];
//! activations and logits live in the mutable [`QuantizedTensor::Owned`]
//! variant. Dot products decode whole blocks at a time with a scalar tail,
//! so random access cost is not uniform across variants.

use crate::gguf::store::TensorView;
use crate::gguf::types::QuantType;

// ============================================================================
// QuantizedTensor
// ============================================================================

/// Numeric container polymorphic over physical encoding
///
/// `Owned` is full-precision and mutable; `View` borrows quantized bytes
/// from a mapped checkpoint and is strictly read-only. Mutating a view is a
/// programming error and panics rather than returning an error.
#[derive(Debug, Clone)]
pub enum QuantizedTensor<'a> {
    /// Mutable full-precision values (activations, logits)
    Owned(Vec<f32>),
    /// Read-only quantized weights borrowed from a checkpoint
    View(TensorView<'a>),
}

impl QuantizedTensor<'static> {
    /// Zero-filled full-precision tensor of `len` elements
    #[must_use]
    pub fn zeros(len: usize) -> Self {
        Self::Owned(vec![0.0; len])
    }

    /// Wrap full-precision values
    #[must_use]
    pub fn from_f32(values: Vec<f32>) -> Self {
        Self::Owned(values)
    }
}

impl<'a> QuantizedTensor<'a> {
    /// Wrap a checkpoint view
    #[must_use]
    pub fn from_view(view: TensorView<'a>) -> Self {
        Self::View(view)
    }

    /// Logical element count
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Owned(values) => values.len(),
            Self::View(view) => view.len(),
        }
    }

    /// Whether the tensor holds zero elements
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`, dequantized for view variants.
    ///
    /// # Panics
    ///
    /// Panics when `index` is out of bounds, or on element access to an
    /// encoding without a per-element decoder (`Q5_K`, `Q6_K`).
    #[must_use]
    pub fn get(&self, index: usize) -> f32 {
        match self {
            Self::Owned(values) => values[index],
            Self::View(view) => {
                assert!(
                    index < view.len(),
                    "index {index} out of bounds for tensor of {} elements",
                    view.len()
                );
                decode_element(view.bytes(), view.qtype(), index)
            },
        }
    }

    /// Store `value` at `index`.
    ///
    /// # Panics
    ///
    /// Panics on read-only view variants and on out-of-bounds indices.
    pub fn set(&mut self, index: usize, value: f32) {
        self.values_mut("set")[index] = value;
    }

    /// Multiply `len` elements starting at `start` by `factor` in place.
    ///
    /// # Panics
    ///
    /// Panics on read-only view variants and out-of-range spans.
    pub fn scale_range(&mut self, start: usize, len: usize, factor: f32) {
        for v in &mut self.values_mut("scale")[start..start + len] {
            *v *= factor;
        }
    }

    /// Set `len` elements starting at `start` to `value` in place.
    ///
    /// # Panics
    ///
    /// Panics on read-only view variants and out-of-range spans.
    pub fn fill_range(&mut self, start: usize, len: usize, value: f32) {
        self.values_mut("fill")[start..start + len].fill(value);
    }

    /// In-place softmax over `len` elements starting at `start`.
    ///
    /// Subtracts the running maximum before exponentiating so large logits
    /// do not overflow; the span sums to 1.0 afterwards.
    ///
    /// # Panics
    ///
    /// Panics on read-only view variants and out-of-range spans.
    pub fn softmax_range(&mut self, start: usize, len: usize) {
        let span = &mut self.values_mut("softmax")[start..start + len];
        let max = span.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0f32;
        for v in span.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        for v in span.iter_mut() {
            *v /= sum;
        }
    }

    /// Index of the largest element, first occurrence winning ties.
    ///
    /// # Panics
    ///
    /// Panics on an empty tensor.
    #[must_use]
    pub fn argmax(&self) -> usize {
        assert!(!self.is_empty(), "argmax over an empty tensor");
        let mut best = 0;
        let mut best_val = f32::NEG_INFINITY;
        for i in 0..self.len() {
            let v = self.get(i);
            if v > best_val {
                best = i;
                best_val = v;
            }
        }
        best
    }

    /// Dot product of `len` elements starting at `offset` against a
    /// full-precision slice starting at `other_offset`.
    ///
    /// Quantized views decode whole blocks at a time when `offset` lands on
    /// a block boundary; otherwise a per-element scalar path produces the
    /// same result (up to float rounding).
    ///
    /// # Panics
    ///
    /// Panics when either span is out of range.
    #[must_use]
    pub fn dot(&self, offset: usize, other: &[f32], other_offset: usize, len: usize) -> f32 {
        assert!(
            offset + len <= self.len(),
            "dot span [{offset}, {}) out of bounds for {} elements",
            offset + len,
            self.len()
        );
        let x = &other[other_offset..other_offset + len];
        match self {
            Self::Owned(values) => dot_f32(&values[offset..offset + len], x),
            Self::View(view) => {
                let bytes = view.bytes();
                match view.qtype() {
                    QuantType::F32 => dot_view_f32(bytes, offset, x),
                    QuantType::F16 => dot_view_f16(bytes, offset, x),
                    QuantType::Q4_0 if offset % 32 == 0 => dot_q4_0(bytes, offset / 32, x),
                    QuantType::Q8_0 if offset % 32 == 0 => dot_q8_0(bytes, offset / 32, x),
                    QuantType::Q4K if offset % 256 == 0 => dot_q4_k(bytes, offset / 256, x),
                    qtype => dot_scalar(bytes, qtype, offset, x),
                }
            },
        }
    }

    /// Dequantize `dst.len()` elements starting at `offset` into `dst`.
    ///
    /// # Panics
    ///
    /// Panics when the span is out of range, or on encodings without a
    /// per-element decoder.
    pub fn copy_range_into(&self, offset: usize, dst: &mut [f32]) {
        match self {
            Self::Owned(values) => dst.copy_from_slice(&values[offset..offset + dst.len()]),
            Self::View(view) => {
                assert!(
                    offset + dst.len() <= view.len(),
                    "copy span [{offset}, {}) out of bounds for {} elements",
                    offset + dst.len(),
                    view.len()
                );
                for (i, out) in dst.iter_mut().enumerate() {
                    *out = decode_element(view.bytes(), view.qtype(), offset + i);
                }
            },
        }
    }

    /// Dequantize the whole tensor into a fresh `Vec<f32>`
    #[must_use]
    pub fn dequantize(&self) -> Vec<f32> {
        let mut out = vec![0.0; self.len()];
        self.copy_range_into(0, &mut out);
        out
    }

    /// Full-precision values as a slice.
    ///
    /// # Panics
    ///
    /// Panics on read-only view variants.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        match self {
            Self::Owned(values) => values,
            Self::View(_) => {
                panic!("as_slice requires a full-precision tensor, not a read-only mapped view")
            },
        }
    }

    /// Full-precision values as a mutable slice.
    ///
    /// # Panics
    ///
    /// Panics on read-only view variants.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        self.values_mut("as_mut_slice")
    }

    fn values_mut(&mut self, operation: &str) -> &mut Vec<f32> {
        match self {
            Self::Owned(values) => values,
            Self::View(_) => panic!(
                "{operation} requires a mutable full-precision tensor, \
                 not a read-only mapped view"
            ),
        }
    }
}

// ============================================================================
// Element decoders
// ============================================================================

#[inline]
fn read_f16(bytes: &[u8]) -> f32 {
    half::f16::from_le_bytes([bytes[0], bytes[1]]).to_f32()
}

/// 6-bit scale and min for sub-block `block_idx` of a `Q4_K` super-block.
///
/// Sub-blocks pack 12 bits apiece into the 12-byte scales array; both
/// halves are normalized to [0, 1].
#[inline]
fn extract_scale_min(scales: &[u8; 12], block_idx: usize) -> (f32, f32) {
    let bit_offset = block_idx * 12;
    let byte_offset = bit_offset / 8;
    let bit_in_byte = bit_offset % 8;

    let bits = if bit_in_byte <= 4 {
        let b0 = u16::from(scales[byte_offset]);
        let b1 = u16::from(scales[byte_offset + 1]);
        ((b1 << 8) | b0) >> bit_in_byte
    } else {
        let b0 = u32::from(scales[byte_offset]);
        let b1 = u32::from(scales[byte_offset + 1]);
        let b2 = u32::from(scales[byte_offset + 2]);
        #[allow(clippy::cast_possible_truncation)]
        {
            ((((b2 << 16) | (b1 << 8) | b0) >> bit_in_byte) & 0xFFF) as u16
        }
    };

    let scale_bits = bits & 0x3F;
    let min_bits = (bits >> 6) & 0x3F;
    (f32::from(scale_bits) / 63.0, f32::from(min_bits) / 63.0)
}

#[allow(clippy::cast_possible_wrap)]
fn decode_element(bytes: &[u8], qtype: QuantType, index: usize) -> f32 {
    match qtype {
        QuantType::F32 => {
            let at = index * 4;
            f32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        },
        QuantType::F16 => read_f16(&bytes[index * 2..index * 2 + 2]),
        QuantType::Q4_0 => {
            let block = &bytes[(index / 32) * 18..][..18];
            let scale = read_f16(&block[0..2]);
            let j = index % 32;
            let byte = block[2 + j % 16];
            let quant = if j < 16 { byte & 0x0F } else { byte >> 4 };
            scale * f32::from(quant as i8 - 8)
        },
        QuantType::Q8_0 => {
            let block = &bytes[(index / 32) * 34..][..34];
            let scale = read_f16(&block[0..2]);
            scale * f32::from(block[2 + index % 32] as i8)
        },
        QuantType::Q4K => {
            let block = &bytes[(index / 256) * 144..][..144];
            let d = read_f16(&block[0..2]);
            let dmin = read_f16(&block[2..4]);
            let mut scales = [0u8; 12];
            scales.copy_from_slice(&block[4..16]);
            let r = index % 256;
            let sub = r / 32;
            let j = r % 32;
            let (sc, mn) = extract_scale_min(&scales, sub);
            let byte = block[16 + sub * 16 + j / 2];
            let quant = if j % 2 == 0 { byte & 0x0F } else { byte >> 4 };
            d * sc * f32::from(quant) - dmin * mn
        },
        QuantType::Q5K | QuantType::Q6K => {
            panic!("element access not implemented for {qtype:?} tensors")
        },
    }
}

// ============================================================================
// Dot kernels - batched block decode with a scalar tail
// ============================================================================

/// Four-accumulator f32 dot, scalar remainder
fn dot_f32(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; 4];
    let lanes = a.len() / 4 * 4;
    let mut i = 0;
    while i < lanes {
        acc[0] = a[i].mul_add(b[i], acc[0]);
        acc[1] = a[i + 1].mul_add(b[i + 1], acc[1]);
        acc[2] = a[i + 2].mul_add(b[i + 2], acc[2]);
        acc[3] = a[i + 3].mul_add(b[i + 3], acc[3]);
        i += 4;
    }
    let mut sum = (acc[0] + acc[1]) + (acc[2] + acc[3]);
    while i < a.len() {
        sum += a[i] * b[i];
        i += 1;
    }
    sum
}

fn dot_view_f32(bytes: &[u8], offset: usize, x: &[f32]) -> f32 {
    #[inline]
    fn at(bytes: &[u8], idx: usize) -> f32 {
        let i = idx * 4;
        f32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]])
    }

    let mut acc = [0.0f32; 4];
    let lanes = x.len() / 4 * 4;
    let mut i = 0;
    while i < lanes {
        acc[0] = at(bytes, offset + i).mul_add(x[i], acc[0]);
        acc[1] = at(bytes, offset + i + 1).mul_add(x[i + 1], acc[1]);
        acc[2] = at(bytes, offset + i + 2).mul_add(x[i + 2], acc[2]);
        acc[3] = at(bytes, offset + i + 3).mul_add(x[i + 3], acc[3]);
        i += 4;
    }
    let mut sum = (acc[0] + acc[1]) + (acc[2] + acc[3]);
    while i < x.len() {
        sum += at(bytes, offset + i) * x[i];
        i += 1;
    }
    sum
}

fn dot_view_f16(bytes: &[u8], offset: usize, x: &[f32]) -> f32 {
    let mut acc = [0.0f32; 4];
    let lanes = x.len() / 4 * 4;
    let mut i = 0;
    while i < lanes {
        acc[0] = read_f16(&bytes[(offset + i) * 2..]).mul_add(x[i], acc[0]);
        acc[1] = read_f16(&bytes[(offset + i + 1) * 2..]).mul_add(x[i + 1], acc[1]);
        acc[2] = read_f16(&bytes[(offset + i + 2) * 2..]).mul_add(x[i + 2], acc[2]);
        acc[3] = read_f16(&bytes[(offset + i + 3) * 2..]).mul_add(x[i + 3], acc[3]);
        i += 4;
    }
    let mut sum = (acc[0] + acc[1]) + (acc[2] + acc[3]);
    while i < x.len() {
        sum += read_f16(&bytes[(offset + i) * 2..]) * x[i];
        i += 1;
    }
    sum
}

/// `Q4_0` block dot: low nibbles cover elements 0..16 of a block, high
/// nibbles elements 16..32.
#[allow(clippy::cast_possible_wrap)]
fn dot_q4_0(bytes: &[u8], start_block: usize, x: &[f32]) -> f32 {
    const BLOCK_BYTES: usize = 18;

    let full_blocks = x.len() / 32;
    let mut total = 0.0f32;
    for b in 0..full_blocks {
        let block = &bytes[(start_block + b) * BLOCK_BYTES..][..BLOCK_BYTES];
        let scale = read_f16(&block[0..2]);
        let xs = &x[b * 32..b * 32 + 32];

        let mut sum_lo = 0.0f32;
        let mut sum_hi = 0.0f32;
        for (j, &byte) in block[2..18].iter().enumerate() {
            sum_lo = f32::from((byte & 0x0F) as i8 - 8).mul_add(xs[j], sum_lo);
            sum_hi = f32::from((byte >> 4) as i8 - 8).mul_add(xs[j + 16], sum_hi);
        }
        total = scale.mul_add(sum_lo + sum_hi, total);
    }

    let tail = full_blocks * 32;
    for (i, &xv) in x[tail..].iter().enumerate() {
        total += decode_element(bytes, QuantType::Q4_0, start_block * 32 + tail + i) * xv;
    }
    total
}

#[allow(clippy::cast_possible_wrap)]
fn dot_q8_0(bytes: &[u8], start_block: usize, x: &[f32]) -> f32 {
    const BLOCK_BYTES: usize = 34;

    let full_blocks = x.len() / 32;
    let mut total = 0.0f32;
    for b in 0..full_blocks {
        let block = &bytes[(start_block + b) * BLOCK_BYTES..][..BLOCK_BYTES];
        let scale = read_f16(&block[0..2]);
        let quants = &block[2..34];
        let xs = &x[b * 32..b * 32 + 32];

        let mut acc = [0.0f32; 4];
        let mut j = 0;
        while j < 32 {
            acc[0] = f32::from(quants[j] as i8).mul_add(xs[j], acc[0]);
            acc[1] = f32::from(quants[j + 1] as i8).mul_add(xs[j + 1], acc[1]);
            acc[2] = f32::from(quants[j + 2] as i8).mul_add(xs[j + 2], acc[2]);
            acc[3] = f32::from(quants[j + 3] as i8).mul_add(xs[j + 3], acc[3]);
            j += 4;
        }
        total = scale.mul_add((acc[0] + acc[1]) + (acc[2] + acc[3]), total);
    }

    let tail = full_blocks * 32;
    for (i, &xv) in x[tail..].iter().enumerate() {
        total += decode_element(bytes, QuantType::Q8_0, start_block * 32 + tail + i) * xv;
    }
    total
}

/// `Q4_K` super-block dot using the factored form
/// `d * sc * sum(q*x) - dmin * min * sum(x)` per sub-block.
fn dot_q4_k(bytes: &[u8], start_super: usize, x: &[f32]) -> f32 {
    const SUPER_BLOCK_BYTES: usize = 144;

    let full_supers = x.len() / 256;
    let mut total = 0.0f32;
    for s in 0..full_supers {
        let block = &bytes[(start_super + s) * SUPER_BLOCK_BYTES..][..SUPER_BLOCK_BYTES];
        let d = read_f16(&block[0..2]);
        let dmin = read_f16(&block[2..4]);
        let mut scales = [0u8; 12];
        scales.copy_from_slice(&block[4..16]);
        let qs = &block[16..144];
        let xs = &x[s * 256..s * 256 + 256];

        for sub in 0..8 {
            let (sc, mn) = extract_scale_min(&scales, sub);
            let xb = &xs[sub * 32..sub * 32 + 32];
            let mut sum_qx = 0.0f32;
            let mut sum_x = 0.0f32;
            for (k, &byte) in qs[sub * 16..sub * 16 + 16].iter().enumerate() {
                let x0 = xb[2 * k];
                let x1 = xb[2 * k + 1];
                sum_qx = f32::from(byte & 0x0F).mul_add(x0, sum_qx);
                sum_qx = f32::from(byte >> 4).mul_add(x1, sum_qx);
                sum_x += x0 + x1;
            }
            total += d * sc * sum_qx - dmin * mn * sum_x;
        }
    }

    let tail = full_supers * 256;
    for (i, &xv) in x[tail..].iter().enumerate() {
        total += decode_element(bytes, QuantType::Q4K, start_super * 256 + tail + i) * xv;
    }
    total
}

/// Per-element fallback for offsets that do not land on a block boundary
fn dot_scalar(bytes: &[u8], qtype: QuantType, offset: usize, x: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    for (i, &xv) in x.iter().enumerate() {
        sum += decode_element(bytes, qtype, offset + i) * xv;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f16_bytes(value: f32) -> [u8; 2] {
        half::f16::from_f32(value).to_le_bytes()
    }

    /// One Q4_0 block from raw 4-bit codes (value = scale * (code - 8))
    fn q4_0_block(scale: f32, codes: &[u8; 32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(18);
        out.extend_from_slice(&f16_bytes(scale));
        for j in 0..16 {
            out.push((codes[j] & 0x0F) | ((codes[j + 16] & 0x0F) << 4));
        }
        out
    }

    /// One Q8_0 block from signed codes (value = scale * code)
    fn q8_0_block(scale: f32, codes: &[i8; 32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(34);
        out.extend_from_slice(&f16_bytes(scale));
        for &c in codes {
            out.push(c.to_le_bytes()[0]);
        }
        out
    }

    /// One Q4_K super-block with raw 12-byte scales and 128 nibble bytes
    fn q4_k_super_block(d: f32, dmin: f32, scales: &[u8; 12], qs: &[u8; 128]) -> Vec<u8> {
        let mut out = Vec::with_capacity(144);
        out.extend_from_slice(&f16_bytes(d));
        out.extend_from_slice(&f16_bytes(dmin));
        out.extend_from_slice(scales);
        out.extend_from_slice(qs);
        out
    }

    fn view(bytes: &[u8], qtype: QuantType, n: usize) -> TensorView<'_> {
        TensorView::new(bytes, qtype, n).unwrap()
    }

    fn assert_close(actual: f32, expected: f32) {
        let tolerance = 1e-3 + expected.abs() * 1e-3;
        assert!(
            (actual - expected).abs() < tolerance,
            "got {actual}, expected {expected}"
        );
    }

    #[test]
    fn test_owned_get_set() {
        let mut t = QuantizedTensor::zeros(4);
        t.set(2, 3.5);
        assert_eq!(t.get(2), 3.5);
        assert_eq!(t.get(0), 0.0);
        assert_eq!(t.len(), 4);
        assert!(!t.is_empty());
    }

    #[test]
    fn test_scale_and_fill_range() {
        let mut t = QuantizedTensor::from_f32(vec![1.0, 2.0, 3.0, 4.0]);
        t.scale_range(1, 2, 10.0);
        assert_eq!(t.as_slice(), &[1.0, 20.0, 30.0, 4.0]);
        t.fill_range(0, 2, -1.0);
        assert_eq!(t.as_slice(), &[-1.0, -1.0, 30.0, 4.0]);
    }

    #[test]
    fn test_softmax_range_sums_to_one() {
        let mut t = QuantizedTensor::from_f32(vec![0.0, 1.0, 2.0, 100.0]);
        t.softmax_range(0, 3);
        let sum: f32 = t.as_slice()[..3].iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        // Outside the span untouched
        assert_eq!(t.get(3), 100.0);
        // Monotone in the inputs
        assert!(t.get(2) > t.get(1) && t.get(1) > t.get(0));
    }

    #[test]
    fn test_softmax_large_logits_stable() {
        let mut t = QuantizedTensor::from_f32(vec![1000.0, 1000.0, 999.0]);
        t.softmax_range(0, 3);
        let sum: f32 = t.as_slice().iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(t.as_slice().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_argmax_first_occurrence_wins_ties() {
        let t = QuantizedTensor::from_f32(vec![1.0, 5.0, 5.0, 2.0]);
        assert_eq!(t.argmax(), 1);
    }

    #[test]
    fn test_q8_0_element_access() {
        let mut codes = [0i8; 32];
        for (i, c) in codes.iter_mut().enumerate() {
            *c = i as i8 - 16;
        }
        let bytes = q8_0_block(0.5, &codes);
        let t = QuantizedTensor::from_view(view(&bytes, QuantType::Q8_0, 32));
        assert_close(t.get(0), -8.0);
        assert_close(t.get(16), 0.0);
        assert_close(t.get(31), 7.5);
    }

    #[test]
    fn test_q4_0_element_access() {
        let mut codes = [8u8; 32]; // code 8 dequantizes to zero
        codes[0] = 0; // -8 * scale
        codes[15] = 15; // +7 * scale
        codes[16] = 12; // +4 * scale, first high-nibble element
        let bytes = q4_0_block(0.25, &codes);
        let t = QuantizedTensor::from_view(view(&bytes, QuantType::Q4_0, 32));
        assert_close(t.get(0), -2.0);
        assert_close(t.get(15), 1.75);
        assert_close(t.get(16), 1.0);
        assert_close(t.get(31), 0.0);
    }

    #[test]
    fn test_q4_k_element_access() {
        // Sub-block 0: scale bits 63 (-> 1.0), min bits 0; all others zero
        let mut scales = [0u8; 12];
        scales[0] = 0x3F;
        let mut qs = [0u8; 128];
        qs[0] = 0x21; // elements 0, 1 of sub-block 0
        let bytes = q4_k_super_block(2.0, 0.0, &scales, &qs);
        let t = QuantizedTensor::from_view(view(&bytes, QuantType::Q4K, 256));
        assert_close(t.get(0), 2.0); // d * 1.0 * 1
        assert_close(t.get(1), 4.0); // d * 1.0 * 2
        assert_close(t.get(64), 0.0); // sub-block 2 has zero scale
    }

    #[test]
    fn test_f16_element_access() {
        let mut bytes = Vec::new();
        for v in [0.5f32, -1.5, 2.0] {
            bytes.extend_from_slice(&f16_bytes(v));
        }
        let t = QuantizedTensor::from_view(view(&bytes, QuantType::F16, 3));
        assert_close(t.get(1), -1.5);
        assert_close(t.get(2), 2.0);
    }

    #[test]
    fn test_dot_owned() {
        let t = QuantizedTensor::from_f32(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let x = [4.0, 5.0, 6.0, 0.5, 1.0];
        // 4 + 10 + 18 + 2 + 5
        assert_close(t.dot(0, &x, 0, 5), 39.0);
        // Offset spans
        assert_close(t.dot(2, &x, 1, 2), 3.0 * 5.0 + 4.0 * 6.0);
    }

    /// Reference: per-element dot via get()
    fn reference_dot(t: &QuantizedTensor<'_>, offset: usize, x: &[f32]) -> f32 {
        x.iter()
            .enumerate()
            .map(|(i, &xv)| t.get(offset + i) * xv)
            .sum()
    }

    #[test]
    fn test_dot_q8_0_matches_reference() {
        let mut bytes = Vec::new();
        for b in 0..3 {
            let mut codes = [0i8; 32];
            for (i, c) in codes.iter_mut().enumerate() {
                *c = ((i * 7 + b * 13) % 51) as i8 - 25;
            }
            bytes.extend_from_slice(&q8_0_block(0.1 + b as f32 * 0.05, &codes));
        }
        let t = QuantizedTensor::from_view(view(&bytes, QuantType::Q8_0, 96));
        let x: Vec<f32> = (0..96).map(|i| (i as f32 * 0.37).sin()).collect();

        assert_close(t.dot(0, &x, 0, 96), reference_dot(&t, 0, &x));
        // Block-aligned offset takes the fused path
        assert_close(t.dot(32, &x, 0, 64), reference_dot(&t, 32, &x[..64]));
        // Unaligned offset falls back to the scalar path
        assert_close(t.dot(5, &x, 0, 40), reference_dot(&t, 5, &x[..40]));
    }

    #[test]
    fn test_dot_q4_0_matches_reference() {
        let mut bytes = Vec::new();
        for b in 0..2 {
            let mut codes = [0u8; 32];
            for (i, c) in codes.iter_mut().enumerate() {
                *c = ((i * 5 + b * 3) % 16) as u8;
            }
            bytes.extend_from_slice(&q4_0_block(0.2, &codes));
        }
        let t = QuantizedTensor::from_view(view(&bytes, QuantType::Q4_0, 64));
        let x: Vec<f32> = (0..64).map(|i| (i as f32 * 0.11).cos()).collect();

        assert_close(t.dot(0, &x, 0, 64), reference_dot(&t, 0, &x));
        // Partial final block exercises the tail path
        assert_close(t.dot(0, &x, 0, 50), reference_dot(&t, 0, &x[..50]));
    }

    #[test]
    fn test_dot_q4_k_matches_reference() {
        let mut bytes = Vec::new();
        for s in 0..2u8 {
            let mut scales = [0u8; 12];
            for (i, b) in scales.iter_mut().enumerate() {
                *b = (i as u8).wrapping_mul(37).wrapping_add(s);
            }
            let mut qs = [0u8; 128];
            for (i, b) in qs.iter_mut().enumerate() {
                *b = (i as u8).wrapping_mul(29).wrapping_add(s * 11);
            }
            bytes.extend_from_slice(&q4_k_super_block(0.03, 0.01, &scales, &qs));
        }
        let t = QuantizedTensor::from_view(view(&bytes, QuantType::Q4K, 512));
        let x: Vec<f32> = (0..512).map(|i| (i as f32 * 0.021).sin() - 0.3).collect();

        assert_close(t.dot(0, &x, 0, 512), reference_dot(&t, 0, &x));
        assert_close(t.dot(256, &x, 0, 256), reference_dot(&t, 256, &x[..256]));
    }

    #[test]
    fn test_dot_f32_view_matches_owned() {
        let values: Vec<f32> = (0..19).map(|i| i as f32 * 0.5 - 4.0).collect();
        let mut bytes = Vec::new();
        for v in &values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let owned = QuantizedTensor::from_f32(values.clone());
        let mapped = QuantizedTensor::from_view(view(&bytes, QuantType::F32, 19));
        let x: Vec<f32> = (0..19).map(|i| (i as f32).sqrt()).collect();

        assert_close(mapped.dot(0, &x, 0, 19), owned.dot(0, &x, 0, 19));
        assert_close(mapped.dot(3, &x, 2, 10), owned.dot(3, &x, 2, 10));
    }

    #[test]
    fn test_dequantize_matches_get() {
        let mut codes = [0i8; 32];
        for (i, c) in codes.iter_mut().enumerate() {
            *c = (i as i8).wrapping_mul(3);
        }
        let bytes = q8_0_block(0.25, &codes);
        let t = QuantizedTensor::from_view(view(&bytes, QuantType::Q8_0, 32));
        let values = t.dequantize();
        for (i, &v) in values.iter().enumerate() {
            assert_close(v, t.get(i));
        }
    }

    #[test]
    #[should_panic(expected = "read-only mapped view")]
    fn test_view_set_panics() {
        let bytes = vec![0u8; 34];
        let mut t = QuantizedTensor::from_view(view(&bytes, QuantType::Q8_0, 32));
        t.set(0, 1.0);
    }

    #[test]
    #[should_panic(expected = "read-only mapped view")]
    fn test_view_softmax_panics() {
        let bytes = vec![0u8; 34];
        let mut t = QuantizedTensor::from_view(view(&bytes, QuantType::Q8_0, 32));
        t.softmax_range(0, 32);
    }

    #[test]
    #[should_panic(expected = "element access not implemented")]
    fn test_q6_k_element_access_panics() {
        let bytes = vec![0u8; 210];
        let t = QuantizedTensor::from_view(view(&bytes, QuantType::Q6K, 256));
        let _ = t.get(0);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_view_get_out_of_bounds_panics() {
        let bytes = vec![0u8; 34];
        let t = QuantizedTensor::from_view(view(&bytes, QuantType::Q8_0, 32));
        let _ = t.get(32);
    }
}
