use crate::Packet;

/// Largest datagram either side will send or accept.
pub const MAX_DATAGRAM_SIZE: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Encode error: {0}")]
    Encode(bincode::Error),
    #[error("Decode error: {0}")]
    Decode(bincode::Error),
    #[error("Packet too large: {0} bytes (max {1})")]
    TooLarge(usize, usize),
}

pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    let bytes = bincode::serialize(packet).map_err(CodecError::Encode)?;
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(CodecError::TooLarge(bytes.len(), MAX_DATAGRAM_SIZE));
    }
    Ok(bytes)
}

pub fn decode_packet(bytes: &[u8]) -> Result<Packet, CodecError> {
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(CodecError::TooLarge(bytes.len(), MAX_DATAGRAM_SIZE));
    }
    bincode::deserialize(bytes).map_err(CodecError::Decode)
}
