//! Binary container format: a version byte, the buffer's parameters, a
//! compression level, then each channel's subbands in turn.
//!
//! Grounded in `sources/wavelet_buffer.cc`'s `Parse`/`Serialize` and
//! `wavelet_buffer_serializer.cc`'s dual-dialect `Parse`. Version `3` is
//! this crate's current dialect; version `2` is read-only and reuses the
//! current dialect's dense framing whenever `compression == 0`, falling
//! back to the §4.5 bitstream codec only when a legacy container was
//! actually compressed.

use crate::buffer::WaveletBuffer;
use crate::compressor::{self, ArchivedMatrix};
use crate::error::{Error, Result};
use crate::legacy;
use crate::parameters::{WaveletParameters, WaveletType};
use crate::primitives::Matrix;

/// The dialect this crate writes.
pub const CURRENT_VERSION: u8 = 3;
/// The newest dialect this crate can still read, never written.
pub const LEGACY_VERSION: u8 = 2;

struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Writer { bytes: Vec::new() }
    }

    fn u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    fn u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn bytes_with_len(&mut self, data: &[u8]) {
        self.u32(data.len() as u32);
        self.bytes.extend_from_slice(data);
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn u8(&mut self) -> Result<u8> {
        let v = *self.bytes.get(self.pos).ok_or_else(eof)?;
        self.pos += 1;
        Ok(v)
    }

    fn u32(&mut self) -> Result<u32> {
        let slice = self.bytes.get(self.pos..self.pos + 4).ok_or_else(eof)?;
        self.pos += 4;
        Ok(u32::from_le_bytes(slice.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        let slice = self.bytes.get(self.pos..self.pos + 8).ok_or_else(eof)?;
        self.pos += 8;
        Ok(u64::from_le_bytes(slice.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32> {
        let slice = self.bytes.get(self.pos..self.pos + 4).ok_or_else(eof)?;
        self.pos += 4;
        Ok(i32::from_le_bytes(slice.try_into().unwrap()))
    }

    fn f32(&mut self) -> Result<f32> {
        let slice = self.bytes.get(self.pos..self.pos + 4).ok_or_else(eof)?;
        self.pos += 4;
        Ok(f32::from_le_bytes(slice.try_into().unwrap()))
    }

    fn bytes_with_len(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        let slice = self.bytes.get(self.pos..self.pos + len).ok_or_else(eof)?;
        self.pos += len;
        Ok(slice)
    }
}

fn eof() -> Error {
    Error::DecodeError("unexpected end of serialized buffer".into())
}

fn write_varuint(writer: &mut Writer, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
            writer.u8(byte);
        } else {
            writer.u8(byte);
            break;
        }
    }
}

fn read_varuint(reader: &mut Reader) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = reader.u8()?;
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(value)
}

fn write_parameters(writer: &mut Writer, parameters: &WaveletParameters) {
    write_varuint(writer, parameters.signal_shape().len() as u64);
    for &side in parameters.signal_shape() {
        writer.u64(side as u64);
    }
    writer.u64(parameters.signal_number() as u64);
    writer.u64(parameters.decomposition_steps() as u64);
    writer.i32(parameters.wavelet_type().order() as i32);
}

fn read_parameters(reader: &mut Reader) -> Result<WaveletParameters> {
    let dimension = read_varuint(reader)? as usize;
    let mut signal_shape = Vec::with_capacity(dimension);
    for _ in 0..dimension {
        signal_shape.push(reader.u64()? as usize);
    }
    let signal_number = reader.u64()? as usize;
    let decomposition_steps = reader.u64()? as usize;
    let wavelet_type = WaveletType::try_from(reader.i32()? as u8)?;
    WaveletParameters::new(signal_shape, signal_number, decomposition_steps, wavelet_type)
}

fn write_dense(writer: &mut Writer, subband: &Matrix) {
    writer.u64(subband.rows() as u64);
    writer.u64(subband.cols() as u64);
    for &value in subband.as_slice() {
        writer.f32(value);
    }
}

fn read_dense(reader: &mut Reader) -> Result<Matrix> {
    let rows = reader.u64()? as usize;
    let cols = reader.u64()? as usize;
    let mut data = Vec::with_capacity(rows * cols);
    for _ in 0..rows * cols {
        data.push(reader.f32()?);
    }
    Ok(Matrix::from_vec(rows, cols, data))
}

fn write_archived(writer: &mut Writer, archive: &ArchivedMatrix) {
    writer.u64(archive.nonzero as u64);
    writer.u64(archive.rows as u64);
    writer.u64(archive.cols as u64);
    writer.bytes_with_len(&archive.indexes);
    writer.bytes_with_len(&archive.values);
}

fn read_archived(reader: &mut Reader) -> Result<ArchivedMatrix> {
    let nonzero = reader.u64()? as usize;
    let rows = reader.u64()? as usize;
    let cols = reader.u64()? as usize;
    let indexes = reader.bytes_with_len()?.to_vec();
    let values = reader.bytes_with_len()?.to_vec();
    Ok(ArchivedMatrix { rows, cols, nonzero, indexes, values })
}

/// Serializes `buffer` at the given sparse-value `compression` level
/// (`0` = verbatim dense subbands, `1..=16` = compressed, clamped). An empty
/// buffer is always serialized uncompressed.
pub fn serialize(buffer: &WaveletBuffer, compression: u8) -> Result<Vec<u8>> {
    let compression = if buffer.is_empty() { 0 } else { compression.min(16) };

    let mut writer = Writer::new();
    writer.u8(CURRENT_VERSION);
    write_parameters(&mut writer, buffer.parameters());
    writer.u8(compression);

    for channel in buffer.decompositions() {
        for subband in channel {
            if compression == 0 || subband.nonzero_count() == 0 {
                writer.u8(0); // dense marker
                write_dense(&mut writer, subband);
            } else {
                match compressor::compress(subband, compression) {
                    Ok(archive) => {
                        writer.u8(1); // sparse marker
                        write_archived(&mut writer, &archive);
                    }
                    Err(_) => {
                        writer.u8(0);
                        write_dense(&mut writer, subband);
                    }
                }
            }
        }
    }

    Ok(writer.bytes)
}

/// Parses a container produced by [`serialize`], or a legacy (`version ==
/// 2`) container this crate never writes but still reads.
pub fn parse(bytes: &[u8]) -> Result<WaveletBuffer> {
    let mut reader = Reader::new(bytes);
    let version = reader.u8()?;
    if version != CURRENT_VERSION && version != LEGACY_VERSION {
        let err = Error::DecodeError(format!("unsupported container version {version}"));
        log::error!("{err}");
        return Err(err);
    }

    let parameters = read_parameters(&mut reader)?;
    let compression = reader.u8()?;
    let size = crate::utils::decomposition_size(&parameters);

    let mut decompositions = Vec::with_capacity(parameters.signal_number());
    for _ in 0..parameters.signal_number() {
        let mut channel = Vec::with_capacity(size);
        for _ in 0..size {
            let marker = reader.u8()?;
            let subband = if version == CURRENT_VERSION {
                match marker {
                    0 => read_dense(&mut reader)?,
                    1 => compressor::decompress(&read_archived(&mut reader)?)?,
                    other => return Err(Error::DecodeError(format!("unknown subband marker {other}"))),
                }
            } else {
                // Legacy dialect: compression == 0 reuses the dense framing;
                // otherwise the payload is a self-describing §4.5 bitstream.
                if compression == 0 {
                    match marker {
                        0 => read_dense(&mut reader)?,
                        other => return Err(Error::DecodeError(format!("unknown legacy subband marker {other}"))),
                    }
                } else {
                    let blob = reader.bytes_with_len()?;
                    legacy::decode(blob)?
                }
            };
            channel.push(subband);
        }
        decompositions.push(channel);
    }

    WaveletBuffer::from_decompositions(parameters, decompositions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denoise::NullDenoiser;
    use crate::parameters::WaveletType;

    #[test]
    fn serialize_parse_round_trip_dense() {
        let params = WaveletParameters::new(vec![8], 1, 2, WaveletType::D1).unwrap();
        let mut buffer = WaveletBuffer::new(params).unwrap();
        let signal = Matrix::from_column(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        buffer.decompose(&[signal], &NullDenoiser).unwrap();

        let bytes = serialize(&buffer, 0).unwrap();
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed, buffer);
    }

    #[test]
    fn serialize_parse_round_trip_compressed() {
        let params = WaveletParameters::new(vec![8], 1, 2, WaveletType::D1).unwrap();
        let mut buffer = WaveletBuffer::new(params).unwrap();
        let signal = Matrix::from_column(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        buffer.decompose(&[signal], &NullDenoiser).unwrap();

        let bytes = serialize(&buffer, 8).unwrap();
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.parameters(), buffer.parameters());
        // Lossy at compression=8, but shapes and rough magnitudes must match.
        for (a, b) in parsed.decompositions().iter().zip(buffer.decompositions().iter()) {
            for (sa, sb) in a.iter().zip(b.iter()) {
                assert_eq!(sa.rows(), sb.rows());
                assert_eq!(sa.cols(), sb.cols());
            }
        }
    }

    #[test]
    fn rejects_unsupported_version() {
        let bytes = [9u8, 1, 0, 0, 0, 8, 0, 0, 0, 1, 0, 0, 0, 1, 0];
        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err, Error::DecodeError(_)));
    }

    #[test]
    fn empty_buffer_forces_verbatim_compression() {
        let params = WaveletParameters::new(vec![8], 1, 1, WaveletType::D1).unwrap();
        let buffer = WaveletBuffer::new(params).unwrap();
        let bytes = serialize(&buffer, 10).unwrap();
        // version byte, then parameters... compression byte is right after;
        // recompute its offset instead of hardcoding it.
        let mut reader = Reader::new(&bytes);
        reader.u8().unwrap();
        read_parameters(&mut reader).unwrap();
        assert_eq!(reader.u8().unwrap(), 0);
    }
}
