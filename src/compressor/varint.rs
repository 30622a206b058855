//! Delta + varint coding for the sorted flat indexes of a sparse matrix.
//!
//! Grounded in `matrix_compressor.cc`'s use of `streamvbyte_delta_encode`:
//! indexes are strictly increasing (row-major traversal order), so each one
//! is stored as the delta from its predecessor, then packed with a LEB128
//! varint. A fixed-size zero run pads the end of the stream so a scalar
//! decoder can always read one full varint past the last real byte without
//! a bounds check.

/// Trailing zero bytes appended after the real payload.
const END_PADDING: usize = 4;

/// Encodes a strictly increasing sequence of flat matrix indexes.
pub fn encode_indexes(indexes: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(indexes.len() * 2 + END_PADDING);
    let mut previous = 0u32;
    for (i, &index) in indexes.iter().enumerate() {
        let delta = if i == 0 { index } else { index - previous };
        encode_varint(delta, &mut out);
        previous = index;
    }
    out.extend(std::iter::repeat(0u8).take(END_PADDING));
    out
}

/// Decodes exactly `count` indexes previously produced by [`encode_indexes`].
pub fn decode_indexes(bytes: &[u8], count: usize) -> Vec<u32> {
    let mut out = Vec::with_capacity(count);
    let mut cursor = 0usize;
    let mut previous = 0u32;
    for i in 0..count {
        let (delta, consumed) = decode_varint(&bytes[cursor..]);
        cursor += consumed;
        let index = if i == 0 { delta } else { previous + delta };
        out.push(index);
        previous = index;
    }
    out
}

fn encode_varint(mut value: u32, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
            out.push(byte);
        } else {
            out.push(byte);
            break;
        }
    }
}

fn decode_varint(bytes: &[u8]) -> (u32, usize) {
    let mut value = 0u32;
    let mut shift = 0u32;
    let mut consumed = 0usize;
    for &byte in bytes {
        consumed += 1;
        value |= ((byte & 0x7f) as u32) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    (value, consumed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_sorted_indexes() {
        let indexes = vec![3u32, 5, 5000, 5001, 1_000_000];
        let encoded = encode_indexes(&indexes);
        let decoded = decode_indexes(&encoded, indexes.len());
        assert_eq!(decoded, indexes);
    }

    #[test]
    fn end_padding_is_present() {
        let encoded = encode_indexes(&[1, 2, 3]);
        assert!(encoded.len() >= END_PADDING);
        assert_eq!(&encoded[encoded.len() - END_PADDING..], &[0, 0, 0, 0]);
    }

    #[test]
    fn single_index_round_trips() {
        let encoded = encode_indexes(&[42]);
        let decoded = decode_indexes(&encoded, 1);
        assert_eq!(decoded, vec![42]);
    }
}
