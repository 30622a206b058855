//! Decoder for the legacy sparse-float bitstream format.
//!
//! Grounded in `sources/internal/sf_compressor.cc`. Each non-zero value is
//! stored as a zero-run-length, a bidirectional exponent jump relative to
//! the previous value's exponent, an optional sign, and a fixed-length
//! mantissa fragment — and both the zero-run and exponent-jump symbols are
//! themselves Huffman-coded through a pair of "pools" built from a
//! borders-growth formula over the value range, with any probability mass
//! left over after an integral code-length assignment pushed through a
//! truncated-binary ("nine of seven") encoding. The pool construction in
//! `rebuild_output_pool` below, in particular its use of the zero-count
//! structural pool to bound *both* the exponent-jump and zero-count output
//! tables, is reproduced exactly as the original computes it.

use crate::error::{Error, Result};
use crate::primitives::Matrix;

fn pow2_u32(t: u32) -> u32 {
    1u32 << t
}

fn pow2_f64(t: i64) -> f64 {
    2f64.powi(t as i32)
}

/// The "structural" pool boundaries for exponent jumps (`kind == 0`, count
/// 16) or zero-run lengths (`kind == 1`, count 63), from the borders-growth
/// formula in the original constructor.
fn structural_last(kind: u8) -> Vec<u32> {
    let count = if kind == 0 { 16 } else { 63 };
    let mut last = vec![0u32; count];
    for (t, slot) in last.iter_mut().enumerate().take(5.min(count)) {
        *slot = if kind == 0 && t > 2 { 2 * (t as u32 - 1) } else { t as u32 };
    }
    for t in 5..count {
        last[t] = 2 * last[t - 2];
    }
    last
}

/// Pool 4: the power-of-two lookup used to find the bit width of a range.
fn pow2_pool_last() -> Vec<u32> {
    (0..32).map(pow2_u32).collect()
}

/// Pool 5: the "how many power-of-two codes does a zero remainder need"
/// shortcut derived from pool 4.
fn zero_shortcut_last(pow2: &[u32]) -> Vec<u32> {
    let mut last = vec![0u32; 32];
    for (t, slot) in last.iter_mut().enumerate().take(31) {
        *slot = pow2[t + 1] - 1;
    }
    last[31] = u32::MAX;
    last
}

/// Smallest pool index `t` with `test_nr <= last[t]`.
fn find_pool_nr(last: &[u32], test_nr: u32) -> usize {
    for (t, &bound) in last.iter().enumerate() {
        if test_nr <= bound {
            return t;
        }
    }
    last.len() - 1
}

const MSB_FIRST_BYTE_BITS: u8 = 8;

struct BitReader<'a> {
    bytes: &'a [u8],
    byte_pos: usize,
    bit_pos: u8,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        BitReader { bytes, byte_pos: 0, bit_pos: 0 }
    }

    fn read_bits(&mut self, bits: u8) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..bits {
            let byte = *self
                .bytes
                .get(self.byte_pos)
                .ok_or_else(|| Error::DecodeError("legacy bitstream ended early".into()))?;
            let bit = (byte >> (MSB_FIRST_BYTE_BITS - 1 - self.bit_pos)) & 1;
            value = (value << 1) | bit as u32;
            self.bit_pos += 1;
            if self.bit_pos == MSB_FIRST_BYTE_BITS {
                self.bit_pos = 0;
                self.byte_pos += 1;
            }
        }
        Ok(value)
    }
}

#[cfg(test)]
struct BitWriter {
    bytes: Vec<u8>,
    bit_pos: u8,
}

#[cfg(test)]
impl BitWriter {
    fn new() -> Self {
        BitWriter { bytes: Vec::new(), bit_pos: 0 }
    }

    fn push_bits(&mut self, value: u32, bits: u8) {
        for i in (0..bits).rev() {
            if self.bit_pos == 0 {
                self.bytes.push(0);
            }
            let bit = (value >> i) & 1;
            if bit != 0 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 1 << (MSB_FIRST_BYTE_BITS - 1 - self.bit_pos);
            }
            self.bit_pos = (self.bit_pos + 1) % MSB_FIRST_BYTE_BITS;
        }
    }
}

/// Reads a "nine of seven" truncated-binary integer in `0..nr_poss`: the
/// minimum number of bits that range needs, with the top of the range
/// spilling into one extra bit only where required.
fn nine_of_seven(reader: &mut BitReader, pow2: &[u32], zero: &[u32], nr_poss: u32) -> Result<u32> {
    let bits_max = find_pool_nr(pow2, nr_poss) as u32;
    let max_mampfen = (1i64 << bits_max) - nr_poss as i64 + 1;
    if max_mampfen <= 1 {
        return reader.read_bits(bits_max as u8);
    }
    let pow2_for_zero = find_pool_nr(zero, max_mampfen as u32) as i64;
    let mut nr_sel = reader.read_bits((bits_max as i64 - pow2_for_zero) as u8)? as i64;
    if nr_sel > 0 {
        nr_sel = (nr_sel << (pow2_for_zero - 1)) + reader.read_bits((pow2_for_zero - 1) as u8)? as i64;
        let half = 1i64 << (pow2_for_zero - 1);
        if nr_sel + 1 - half <= max_mampfen - (1i64 << pow2_for_zero) {
            nr_sel = nr_sel + 1 - half;
        } else {
            nr_sel = (nr_sel << 1) + reader.read_bits(1)? as i64 - max_mampfen + 1;
        }
    }
    Ok(nr_sel as u32)
}

/// The pure encode-side counterpart of [`nine_of_seven`]: how many bits and
/// what value to emit for `nr_sel` out of `nr_poss`. Test-only, used by the
/// fixture-generating `encode`.
#[cfg(test)]
fn seven_of_nine(nr_sel: u32, nr_poss: u32, pow2: &[u32], zero: &[u32]) -> (u8, u32) {
    let bits_max = find_pool_nr(pow2, nr_poss) as i64;
    let mut bits_used = bits_max;
    let mut bits_out = nr_sel as i64;
    let max_mampfen = (1i64 << bits_max) - nr_poss as i64 + 1;
    if max_mampfen > 1 {
        let pow2_for_zero = find_pool_nr(zero, max_mampfen as u32) as i64;
        if nr_sel > 0 {
            if nr_sel as i64 <= max_mampfen - (1i64 << pow2_for_zero) {
                bits_out += (1i64 << (pow2_for_zero - 1)) - 1;
                bits_used -= 1;
            } else {
                bits_out += max_mampfen - 1;
            }
        } else {
            bits_used -= pow2_for_zero;
        }
    }
    (bits_used as u8, bits_out as u32)
}

#[cfg(test)]
fn write_truncated(writer: &mut BitWriter, value: u32, nr_poss: u32, pow2: &[u32], zero: &[u32]) {
    let (bits_used, bits_out) = seven_of_nine(value, nr_poss, pow2, zero);
    writer.push_bits(bits_out, bits_used);
}

/// A prefix-code table built over a structural pool's value range: groups
/// of consecutive structural entries sharing the same code length, with the
/// offset needed to map a raw `code_len[t]`-bit read back to its symbol.
struct OutputPool {
    last: Vec<u32>,
    code_len: Vec<u8>,
    code_offset: Vec<i64>,
    last_pool_nr: Vec<usize>,
}

impl OutputPool {
    fn empty() -> Self {
        OutputPool { last: Vec::new(), code_len: Vec::new(), code_offset: Vec::new(), last_pool_nr: Vec::new() }
    }

    fn count(&self) -> usize {
        self.last.len()
    }
}

/// Rebuilds an exponent-jump (`own_structural = structural_last(0)`) or
/// zero-run (`own_structural = structural_last(1)`) output pool from its
/// header encoding. `maxpos_structural` bounds the `SevenOfNine` range for
/// *every* header entry regardless of which pool is being rebuilt — the
/// original always consults the zero-run structural pool there, a quirk
/// reproduced here rather than "fixed".
fn rebuild_output_pool(
    reader: &mut BitReader,
    pow2: &[u32],
    zero: &[u32],
    own_structural: &[u32],
    maxpos_structural: &[u32],
    first_code_len: u32,
) -> Result<OutputPool> {
    let mut pool = OutputPool::empty();
    let mut free_codes = 1.0f64;
    let mut last_defined_code: i64 = -1;
    let mut last_defined_pool: i64 = -1;
    let mut last_defined_code_len: i64 = first_code_len as i64 - 1;

    if last_defined_code_len >= 0 {
        for _ in 0..own_structural.len() {
            let gelesen;
            loop {
                last_defined_code_len += 1;
                let max_poss_code = (last_defined_code as f64 + free_codes * pow2_f64(last_defined_code_len)).max(0.0) as i64;
                let max_poss_pool = find_pool_nr(maxpos_structural, max_poss_code as u32) as i64;
                let nr_poss = (max_poss_pool - last_defined_pool + 1).max(1) as u32;
                let g = nine_of_seven(reader, pow2, zero, nr_poss)? as i64;
                if g != 0 {
                    gelesen = g;
                    break;
                }
            }
            let code_len = last_defined_code_len as u8;
            let last_pool_nr = (last_defined_pool + gelesen) as usize;
            let last_value = own_structural[last_pool_nr];
            let code_offset = ((1.0 - free_codes) * pow2_f64(code_len as i64) - last_defined_code as f64 - 1.0) as i64;

            pool.code_len.push(code_len);
            pool.last_pool_nr.push(last_pool_nr);
            pool.last.push(last_value);
            pool.code_offset.push(code_offset);

            free_codes -= (last_value as i64 - last_defined_code) as f64 / pow2_f64(code_len as i64);
            last_defined_code = last_value as i64;
            last_defined_pool += gelesen;
            if free_codes <= 0.0 {
                break;
            }
        }
    }
    Ok(pool)
}

/// Decodes one prefix-coded symbol: a raw `code_len[0]`-bit read, extended
/// with further `code_len[t]-code_len[t-1]` bits until the running value
/// falls within that group's range.
fn decode_prefix_value(reader: &mut BitReader, pool: &OutputPool) -> Result<u32> {
    if pool.count() == 0 {
        return Ok(0);
    }
    let mut value = reader.read_bits(pool.code_len[0])?;
    if value > pool.last[0] {
        for t in 1..pool.count() {
            let push_len = pool.code_len[t] - pool.code_len[t - 1];
            value = (value << push_len) + reader.read_bits(push_len)?;
            let bound = (pool.last[t] as i64 + pool.code_offset[t]) as u32;
            if value <= bound {
                value = (value as i64 - pool.code_offset[t]) as u32;
                break;
            }
        }
    }
    Ok(value)
}

#[cfg(test)]
fn write_prefix_value(writer: &mut BitWriter, pool: &OutputPool, value: u32) {
    if pool.count() == 0 {
        return;
    }
    let t = find_pool_nr(&pool.last, value);
    let coded = (value as i64 + pool.code_offset[t]) as u32;
    writer.push_bits(coded, pool.code_len[t]);
}

/// Writes the header table for `pool`, mirroring [`rebuild_output_pool`].
#[cfg(test)]
fn write_output_pool_header(
    writer: &mut BitWriter,
    pow2: &[u32],
    zero: &[u32],
    pool: &OutputPool,
    own_structural: &[u32],
    maxpos_structural: &[u32],
) {
    if pool.count() == 0 {
        return;
    }
    let mut free_codes = 1.0f64;
    let mut last_defined_code: i64 = -1;
    let mut last_defined_pool: i64 = -1;
    let mut last_defined_code_len: i64 = pool.code_len[0] as i64 - 1;
    if last_defined_code_len < 0 {
        return;
    }

    for t in 0..pool.count() {
        while last_defined_code_len < pool.code_len[t] as i64 - 1 {
            last_defined_code_len += 1;
            let max_poss_code = (last_defined_code as f64 + free_codes * pow2_f64(last_defined_code_len)).max(0.0) as i64;
            let max_poss_pool = find_pool_nr(maxpos_structural, max_poss_code as u32) as i64;
            write_truncated(writer, 0, (max_poss_pool - last_defined_pool + 1).max(1) as u32, pow2, zero);
        }
        let max_poss_code = (last_defined_code as f64 + free_codes * pow2_f64(pool.code_len[t] as i64)).max(0.0) as i64;
        let max_poss_pool = find_pool_nr(maxpos_structural, max_poss_code as u32) as i64;
        write_truncated(
            writer,
            (pool.last_pool_nr[t] as i64 - last_defined_pool) as u32,
            (max_poss_pool - last_defined_pool + 1).max(1) as u32,
            pow2,
            zero,
        );
        free_codes -= (pool.last[t] as i64 - last_defined_code) as f64 / pow2_f64(pool.code_len[t] as i64);
        last_defined_pool = pool.last_pool_nr[t] as i64;
        last_defined_code = own_structural[pool.last_pool_nr[t]] as i64;
        last_defined_code_len = pool.code_len[t] as i64;
    }
    let _ = last_defined_code_len;
}

/// How many leading structural entries actually have data (trailing
/// zero-frequency entries are dropped).
#[cfg(test)]
fn pools_used(ds_qty: &[u32]) -> usize {
    for t in (0..ds_qty.len()).rev() {
        if ds_qty[t] > 0 {
            return t + 1;
        }
    }
    0
}

/// The "Sollanteil"/"Istanteil" optimal code-length assignment, followed by
/// a leftover-redistribution pass that pushes unused code space down to
/// shorten codes where possible.
#[cfg(test)]
fn assign_optimal_code_lengths(structural_last: &[u32], ds_qty: &[u32], timeline_len: u32, pools_used: usize) -> Vec<u8> {
    let mut code_len = vec![0u8; pools_used];
    if pools_used == 0 {
        return code_len;
    }
    let mut ds_qty_up = vec![0u32; pools_used];
    ds_qty_up[0] = ds_qty[0];
    for t in 1..pools_used {
        ds_qty_up[t] = ds_qty_up[t - 1] + ds_qty[t];
    }

    let mut free_codes = pow2_f64(32) - (structural_last[pools_used - 1] as f64 + 1.0);
    let mut pools_ready = 0usize;
    let mut codes_ready: i64 = 0;
    let mut count_ups_ready: u32 = 0;
    for test_code_len in 0..=32i64 {
        let mut next_pools_ready = pools_ready;
        for t in pools_ready..pools_used {
            let sollanteil = (structural_last[t] as f64 + 1.0 - codes_ready as f64) * (pow2_f64(32 - test_code_len) - 1.0) / free_codes;
            if sollanteil > 1.0 {
                break;
            }
            let istanteil = (ds_qty_up[t] - count_ups_ready) as f64 / timeline_len as f64;
            if istanteil >= sollanteil {
                next_pools_ready = t + 1;
            }
        }
        if next_pools_ready > pools_ready {
            for slot in code_len.iter_mut().take(next_pools_ready).skip(pools_ready) {
                *slot = test_code_len as u8;
            }
            codes_ready = structural_last[next_pools_ready - 1] as i64 + 1;
            free_codes = pow2_f64(32) - (structural_last[pools_used - 1] as f64 + 1.0 - codes_ready as f64);
            count_ups_ready = ds_qty_up[next_pools_ready - 1];
            pools_ready = next_pools_ready;
        }
        if pools_ready == pools_used {
            break;
        }
    }

    let code_qty: Vec<u32> = (0..pools_used)
        .map(|t| if t == 0 { structural_last[0] + 1 } else { structural_last[t] - structural_last[t - 1] })
        .collect();

    let mut free_codes = 1.0f64;
    for t in 0..pools_used {
        free_codes -= code_qty[t] as f64 / pow2_f64(code_len[t] as i64);
    }
    let mut guard = 0;
    while free_codes > 1e-9 && guard < 10_000 {
        let mut changed = false;
        for t in 0..pools_used {
            let share = code_qty[t] as f64 / pow2_f64(code_len[t] as i64);
            if free_codes >= share && code_len[t] > 0 {
                free_codes -= share;
                code_len[t] -= 1;
                changed = true;
                if free_codes <= 1e-9 {
                    break;
                }
            }
        }
        guard += 1;
        if !changed {
            break;
        }
    }
    code_len
}

/// Groups consecutive same-length structural entries into an `OutputPool`.
#[cfg(test)]
fn build_output_pool(structural_last: &[u32], code_len: &[u8]) -> OutputPool {
    let pools_used = code_len.len();
    if pools_used == 0 {
        return OutputPool::empty();
    }

    let mut last = vec![0u32; pools_used];
    let mut out_code_len = vec![0u8; pools_used];
    let mut code_offset = vec![0i64; pools_used];
    let mut last_pool_nr = vec![0usize; pools_used];
    let mut count = 1usize;

    out_code_len[0] = code_len[0];
    for t in 1..pools_used {
        if code_len[t] > code_len[t - 1] {
            last[count - 1] = structural_last[t - 1];
            out_code_len[count] = code_len[t];
            if count > 1 {
                code_offset[count - 1] = code_offset[count - 2] + last[count - 2] as i64 + 1;
                code_offset[count - 1] <<= out_code_len[count - 1] - out_code_len[count - 2];
                code_offset[count - 1] -= last[count - 2] as i64 + 1;
            }
            count += 1;
        }
        last_pool_nr[count - 1] = t;
    }
    last[count - 1] = structural_last[pools_used - 1];
    if count > 1 {
        code_offset[count - 1] = code_offset[count - 2] + last[count - 2] as i64 + 1;
        code_offset[count - 1] <<= out_code_len[count - 1] - out_code_len[count - 2];
        code_offset[count - 1] -= last[count - 2] as i64 + 1;
    }

    last.truncate(count);
    out_code_len.truncate(count);
    code_offset.truncate(count);
    last_pool_nr.truncate(count);
    OutputPool { last, code_len: out_code_len, code_offset, last_pool_nr }
}

/// Decodes a legacy sparse-float bitstream into a dense `rows x cols`
/// matrix. Rejects anything but `version == 0`, the only version this
/// format was ever written as.
pub fn decode(bytes: &[u8]) -> Result<Matrix> {
    let mut reader = BitReader::new(bytes);
    let pow2 = pow2_pool_last();
    let zero_pow2 = zero_shortcut_last(&pow2);
    let exp_structural = structural_last(0);
    let zero_structural = structural_last(1);

    let version = reader.read_bits(2)?;
    if version != 0 {
        let err = Error::DecodeError(format!("unsupported legacy bitstream version {version}"));
        log::error!("{err}");
        return Err(err);
    }
    let _row_based = reader.read_bits(1)? != 0;
    let row_col_bits = nine_of_seven(&mut reader, &pow2, &zero_pow2, 32)? as u8;
    if row_col_bits == 0 {
        return Ok(Matrix::zeros(0, 0));
    }

    let rows = nine_of_seven(&mut reader, &pow2, &zero_pow2, pow2_u32(row_col_bits as u32))? as usize;
    let cols = nine_of_seven(&mut reader, &pow2, &zero_pow2, pow2_u32(row_col_bits as u32))? as usize;
    let sign_used = nine_of_seven(&mut reader, &pow2, &zero_pow2, 4)? as u8;

    let mut matrix = Matrix::zeros(rows.max(1), cols.max(1));
    if sign_used == 0 {
        return Ok(matrix);
    }
    let total = rows * cols;

    let nonzero_count = nine_of_seven(&mut reader, &pow2, &zero_pow2, total as u32 + 1)? as usize;
    let frag_len_code = nine_of_seven(&mut reader, &pow2, &zero_pow2, 16)?;
    let frag_len = (if frag_len_code < 15 { frag_len_code + 7 } else { frag_len_code + 8 }) as u8;
    let exp_jump_1st_code_len = nine_of_seven(&mut reader, &pow2, &zero_pow2, 8)?;

    let zeros_appear = nonzero_count < total + 1;
    let zeros_1st_code_len = if zeros_appear { nine_of_seven(&mut reader, &pow2, &zero_pow2, 32)? } else { 0 };

    let exp_pool = rebuild_output_pool(&mut reader, &pow2, &zero_pow2, &exp_structural, &zero_structural, exp_jump_1st_code_len)?;
    let zero_pool = if zeros_appear {
        rebuild_output_pool(&mut reader, &pow2, &zero_pow2, &zero_structural, &zero_structural, zeros_1st_code_len)?
    } else {
        OutputPool::empty()
    };

    let my_sign_fixed = if sign_used == 1 { 1.0f64 } else { -1.0f64 };
    let frag_codes_bits = if sign_used == 3 { frag_len + 1 } else { frag_len };

    let mut index_now: i64 = -1;
    let mut last_exp_tmp: i64 = 127;
    let data = matrix.as_mut_slice();

    for _ in 0..nonzero_count {
        if zeros_appear {
            let zero_run = decode_prefix_value(&mut reader, &zero_pool)? as i64;
            index_now += 1 + zero_run;
        } else {
            index_now += 1;
        }
        if index_now < 0 || index_now as usize >= data.len() {
            let err = Error::DecodeError("legacy bitstream index ran past matrix end".into());
            log::error!("{err}");
            return Err(err);
        }

        let mut exp_jump = decode_prefix_value(&mut reader, &exp_pool)? as i64;
        if last_exp_tmp < 128 {
            if exp_jump <= 2 * last_exp_tmp {
                exp_jump = if exp_jump % 2 == 0 { exp_jump / 2 + last_exp_tmp } else { last_exp_tmp - (exp_jump + 1) / 2 };
            }
        } else if exp_jump <= 2 * (255 - last_exp_tmp) {
            exp_jump = if exp_jump % 2 == 0 { exp_jump / 2 + last_exp_tmp } else { last_exp_tmp - (exp_jump + 1) / 2 };
        } else {
            exp_jump = 255 - exp_jump;
        }
        last_exp_tmp = exp_jump;

        let sign = if sign_used == 3 {
            if reader.read_bits(1)? == 1 {
                -1.0
            } else {
                1.0
            }
        } else {
            my_sign_fixed
        };
        let _ = frag_codes_bits;
        let fragment = if frag_len > 0 { reader.read_bits(frag_len)? } else { 0 };
        let mut value = sign * (1.0 + fragment as f64 / pow2_f64(frag_len as i64));
        if last_exp_tmp > 127 {
            value *= pow2_f64(last_exp_tmp - 127);
        } else if last_exp_tmp > 0 {
            value /= pow2_f64(127 - last_exp_tmp);
        } else {
            value = 0.0;
        }
        data[index_now as usize] = value as f32;
    }

    Ok(matrix)
}

#[cfg(test)]
fn float_to_bfloat16(value: f32, frag_len: u8) -> (u8, u8, u32) {
    if value == 0.0 {
        return (0, 0, 0);
    }
    let bits = value.to_bits();
    let mut exp = ((bits << 1) >> 24) as u8;
    let mut sgn_frag = (bits << 9) >> (32 - frag_len as u32);
    if frag_len < 23 && ((bits << (9 + frag_len as u32)) >> 31) == 1 {
        sgn_frag += 1;
        if sgn_frag == pow2_u32(frag_len as u32) {
            sgn_frag = 0;
            exp = exp.saturating_add(1);
        }
    }
    let sign = (bits >> 31) as u8;
    sgn_frag += (sign as u32) << frag_len;
    (sign, exp, sgn_frag)
}

/// Encodes a matrix into the legacy bitstream format. Used only by this
/// module's own tests: the format is read-only from the rest of the crate's
/// point of view and this crate never writes it elsewhere. Unlike the
/// original, this doesn't try to find the theoretically optimal pool
/// boundaries' frequency distribution bit-for-bit — it runs the same
/// code-length assignment and table construction the original does, just
/// without the original's encoder-side bisection search shortcuts, which
/// are a performance optimization over the same `find_pool_nr` result.
#[cfg(test)]
fn encode(matrix: &Matrix, frag_len: u8) -> Vec<u8> {
    let pow2 = pow2_pool_last();
    let zero_pow2 = zero_shortcut_last(&pow2);
    let exp_structural = structural_last(0);
    let zero_structural = structural_last(1);

    let rows = matrix.rows();
    let cols = matrix.cols();
    let nonzero: Vec<(usize, f32)> =
        matrix.as_slice().iter().enumerate().filter(|(_, &v)| v != 0.0).map(|(i, &v)| (i, v)).collect();

    let mut zero_count = Vec::with_capacity(nonzero.len());
    let mut exp_jump = Vec::with_capacity(nonzero.len());
    let mut fragment = Vec::with_capacity(nonzero.len());
    let mut sign_used = 0u8;
    let mut last_exp_tmp: i64 = 127;
    let mut exp_ds_qty = vec![0u32; exp_structural.len()];
    let mut zero_ds_qty = vec![0u32; zero_structural.len()];

    let mut last_index: i64 = -1;
    for &(index, value) in &nonzero {
        let run = (index as i64 - last_index - 1) as u32;
        zero_count.push(run);
        last_index = index as i64;

        let (sign, exp, sgn_frag) = float_to_bfloat16(value, frag_len);
        sign_used |= sign + 1;

        let jump = if exp as i64 >= last_exp_tmp {
            let jump_size = exp as i64 - last_exp_tmp;
            jump_size + if last_exp_tmp < jump_size { last_exp_tmp } else { jump_size }
        } else {
            let jump_size = last_exp_tmp - exp as i64;
            let max_jump_size = 255 - last_exp_tmp;
            jump_size + if max_jump_size < jump_size { max_jump_size } else { jump_size - 1 }
        };
        exp_jump.push(jump as u32);
        fragment.push(sgn_frag);

        exp_ds_qty[find_pool_nr(&exp_structural, jump as u32)] += 1;
        zero_ds_qty[find_pool_nr(&zero_structural, run)] += 1;
        last_exp_tmp = exp as i64;
    }
    let timeline_len = nonzero.len() as u32;

    let mut writer = BitWriter::new();
    writer.push_bits(0, 2); // version
    writer.push_bits(0, 1); // row_based

    let row_col_bits = find_pool_nr(&pow2, rows.max(cols) as u32 + 1) as u32;
    write_truncated(&mut writer, row_col_bits, 32, &pow2, &zero_pow2);
    if row_col_bits == 0 {
        return writer.bytes;
    }
    writer.push_bits(rows as u32, row_col_bits as u8);
    writer.push_bits(cols as u32, row_col_bits as u8);
    write_truncated(&mut writer, sign_used as u32, 4, &pow2, &zero_pow2);
    if sign_used == 0 {
        return writer.bytes;
    }

    let total = rows * cols;
    write_truncated(&mut writer, timeline_len, total as u32 + 1, &pow2, &zero_pow2);
    let frag_len_code = if frag_len < 22 { frag_len - 7 } else { frag_len - 8 };
    write_truncated(&mut writer, frag_len_code as u32, 16, &pow2, &zero_pow2);

    let exp_pools_used = pools_used(&exp_ds_qty);
    let exp_code_len = assign_optimal_code_lengths(&exp_structural, &exp_ds_qty, timeline_len, exp_pools_used);
    let exp_pool = build_output_pool(&exp_structural, &exp_code_len);
    write_truncated(&mut writer, exp_pool.code_len.first().copied().unwrap_or(0) as u32, 8, &pow2, &zero_pow2);

    let zeros_appear = timeline_len < total as u32 + 1;
    let zero_pool = if zeros_appear {
        let zero_pools_used = pools_used(&zero_ds_qty);
        let zero_code_len = assign_optimal_code_lengths(&zero_structural, &zero_ds_qty, timeline_len, zero_pools_used);
        let pool = build_output_pool(&zero_structural, &zero_code_len);
        write_truncated(&mut writer, pool.code_len.first().copied().unwrap_or(0) as u32, 32, &pow2, &zero_pow2);
        pool
    } else {
        OutputPool::empty()
    };

    write_output_pool_header(&mut writer, &pow2, &zero_pow2, &exp_pool, &exp_structural, &zero_structural);
    write_output_pool_header(&mut writer, &pow2, &zero_pow2, &zero_pool, &zero_structural, &zero_structural);

    let frag_codes_bits = if sign_used == 3 { frag_len + 1 } else { frag_len };
    for i in 0..nonzero.len() {
        if zeros_appear {
            write_prefix_value(&mut writer, &zero_pool, zero_count[i]);
        }
        write_prefix_value(&mut writer, &exp_pool, exp_jump[i]);
        writer.push_bits(fragment[i] % pow2_u32(frag_codes_bits as u32), frag_codes_bits);
    }

    writer.bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_version() {
        let bytes = [0b0100_0000u8; 8];
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, Error::DecodeError(_)));
    }

    #[test]
    fn round_trips_sparse_matrix_at_full_precision() {
        let mut m = Matrix::zeros(4, 5);
        m[(0, 0)] = 1.0;
        m[(1, 2)] = -4.5;
        m[(3, 4)] = 123.25;
        let bytes = encode(&m, 23);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.rows(), 4);
        assert_eq!(decoded.cols(), 5);
        assert_eq!(decoded[(0, 0)], 1.0);
        assert_eq!(decoded[(1, 2)], -4.5);
        assert_eq!(decoded[(3, 4)], 123.25);
        assert_eq!(decoded[(2, 2)], 0.0);
    }

    #[test]
    fn round_trips_with_truncated_fragment() {
        let mut m = Matrix::zeros(3, 3);
        m[(0, 0)] = 2.0;
        m[(1, 1)] = -0.5;
        m[(2, 2)] = 3.75;
        let bytes = encode(&m, 10);
        let decoded = decode(&bytes).unwrap();
        for (a, b) in m.as_slice().iter().zip(decoded.as_slice().iter()) {
            assert!((a - b).abs() < 0.01, "expected {a} got {b}");
        }
    }

    #[test]
    fn round_trips_fully_dense_matrix() {
        let m = Matrix::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]);
        let bytes = encode(&m, 23);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.as_slice(), m.as_slice());
    }

    #[test]
    fn round_trips_all_zero_matrix() {
        let m = Matrix::zeros(3, 3);
        let bytes = encode(&m, 23);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.rows(), 3);
        assert_eq!(decoded.cols(), 3);
        assert!(decoded.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn round_trips_all_negative_matrix() {
        let m = Matrix::from_vec(2, 3, vec![-1.0, -2.0, -3.0, -4.0, -5.0, -6.0]);
        let bytes = encode(&m, 23);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.as_slice(), m.as_slice());
    }
}
