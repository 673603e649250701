use crate::components::{DemuxedPacket, Demultiplexor};
use crate::error::Result;
use crate::sync::lock;
use std::sync::Mutex;

/// Size of the `[identifier: u32][length: u32]` packet header, big endian
const HEADER_LEN: usize = 8;

/// Splits `[identifier][length][payload]` packets; a trailing partial
/// packet is kept for the next call
#[derive(Default)]
pub struct LoopbackDemultiplexor {
    pending: Mutex<Vec<u8>>,
}

impl LoopbackDemultiplexor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode one packet in the format `demux` reads
    pub fn packet(identifier: u32, payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.extend_from_slice(&identifier.to_be_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }
}

impl Demultiplexor for LoopbackDemultiplexor {
    fn demux(&self, data: &[u8]) -> Result<Vec<DemuxedPacket>> {
        let mut pending = lock(&self.pending);
        pending.extend_from_slice(data);

        let mut packets = Vec::new();
        let mut offset = 0;
        while pending.len() - offset >= HEADER_LEN {
            let header = &pending[offset..offset + HEADER_LEN];
            let identifier = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
            let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
            let start = offset + HEADER_LEN;
            if pending.len() - start < length {
                break;
            }
            packets.push(DemuxedPacket {
                identifier,
                data: pending[start..start + length].to_vec(),
            });
            offset = start + length;
        }
        pending.drain(..offset);
        Ok(packets)
    }
}
