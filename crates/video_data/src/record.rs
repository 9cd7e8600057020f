//! src/record.rs
//!
//! One parsed unit of labeled media. Records are pooled: a fixed population
//! is created up front per consumer, and each record cycles between a free
//! queue and a full queue by value, so the owning queue is always structurally
//! unambiguous. Decoding reuses the record's existing allocations.

use anyhow::{ensure, Result};

/// A labeled media record: either raw pixel planes or an encoded image in
/// `payload`, with an optional pre-decoded float array in `float_data`.
///
/// For flat layouts `channels` folds the temporal extent in
/// (`per_frame_channels * snippet_len * segments`) and `length` is 1; for
/// temporal layouts `channels` is the per-frame channel count and `length`
/// carries the frame count.
#[derive(Debug, Default, Clone)]
pub struct Record {
    pub payload: Vec<u8>,
    pub float_data: Vec<f32>,
    pub channels: u32,
    pub length: u32,
    pub height: u32,
    pub width: u32,
    pub label: i32,
    pub encoded: bool,
}

const WIRE_FLAG_ENCODED: u8 = 1;

impl Record {
    /// A blank record for pool construction.
    pub fn blank() -> Self {
        Self::default()
    }

    /// Number of scalar elements described by the dimension fields.
    pub fn element_count(&self) -> usize {
        self.channels as usize * self.length as usize * self.height as usize * self.width as usize
    }

    /// Resets metadata and empties buffers, keeping their allocations.
    pub fn clear(&mut self) {
        self.payload.clear();
        self.float_data.clear();
        self.channels = 0;
        self.length = 0;
        self.height = 0;
        self.width = 0;
        self.label = 0;
        self.encoded = false;
    }

    /// Serializes into the little-endian wire layout used by the record
    /// store. The schema itself is opaque to the rest of the pipeline; only
    /// this pair of calls touches it.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(29 + self.payload.len() + self.float_data.len() * 4);
        out.extend_from_slice(&self.channels.to_le_bytes());
        out.extend_from_slice(&self.length.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.label.to_le_bytes());
        out.push(if self.encoded { WIRE_FLAG_ENCODED } else { 0 });
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&(self.float_data.len() as u32).to_le_bytes());
        for v in &self.float_data {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Deserializes a stored entry into this record in place.
    pub fn decode_from(&mut self, bytes: &[u8]) -> Result<()> {
        ensure!(bytes.len() >= 25, "record entry truncated: {} bytes", bytes.len());
        self.channels = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        self.length = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        self.height = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        self.width = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        self.label = i32::from_le_bytes(bytes[16..20].try_into().unwrap());
        self.encoded = bytes[20] & WIRE_FLAG_ENCODED != 0;

        let payload_len = u32::from_le_bytes(bytes[21..25].try_into().unwrap()) as usize;
        let payload_end = 25 + payload_len;
        ensure!(
            bytes.len() >= payload_end + 4,
            "record entry truncated: payload of {} bytes does not fit in {}",
            payload_len,
            bytes.len()
        );
        self.payload.clear();
        self.payload.extend_from_slice(&bytes[25..payload_end]);

        let float_len =
            u32::from_le_bytes(bytes[payload_end..payload_end + 4].try_into().unwrap()) as usize;
        let float_end = payload_end + 4 + float_len * 4;
        ensure!(
            bytes.len() >= float_end,
            "record entry truncated: float array of {} values does not fit",
            float_len
        );
        self.float_data.clear();
        self.float_data.reserve(float_len);
        for chunk in bytes[payload_end + 4..float_end].chunks_exact(4) {
            self.float_data.push(f32::from_le_bytes(chunk.try_into().unwrap()));
        }
        Ok(())
    }

    /// Scalar at flat index `i`, preferring the float array when present.
    pub fn value_at(&self, i: usize) -> f32 {
        if self.float_data.is_empty() {
            self.payload[i] as f32
        } else {
            self.float_data[i]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> Record {
        Record {
            payload: vec![1, 2, 3, 4, 5, 6],
            float_data: vec![],
            channels: 3,
            length: 1,
            height: 1,
            width: 2,
            label: 17,
            encoded: false,
        }
    }

    #[test]
    fn test_wire_round_trip() -> Result<()> {
        let original = sample_record();
        let bytes = original.encode();

        let mut decoded = Record::blank();
        decoded.decode_from(&bytes)?;

        assert_eq!(decoded.payload, original.payload);
        assert_eq!(decoded.channels, 3);
        assert_eq!(decoded.width, 2);
        assert_eq!(decoded.label, 17);
        assert!(!decoded.encoded);
        Ok(())
    }

    #[test]
    fn test_float_data_round_trip() -> Result<()> {
        let mut original = sample_record();
        original.payload.clear();
        original.float_data = vec![0.5, -1.25, 3.0];
        let bytes = original.encode();

        let mut decoded = Record::blank();
        decoded.decode_from(&bytes)?;
        assert_eq!(decoded.float_data, vec![0.5, -1.25, 3.0]);
        assert_eq!(decoded.value_at(1), -1.25);
        Ok(())
    }

    #[test]
    fn test_truncated_entry_rejected() {
        let bytes = sample_record().encode();
        let mut decoded = Record::blank();
        assert!(decoded.decode_from(&bytes[..10]).is_err());
        assert!(decoded.decode_from(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_decode_reuses_buffers() -> Result<()> {
        let bytes = sample_record().encode();
        let mut record = Record::blank();
        record.payload = Vec::with_capacity(1024);
        let capacity_before = record.payload.capacity();

        record.decode_from(&bytes)?;
        assert!(record.payload.capacity() >= capacity_before);
        Ok(())
    }
}
