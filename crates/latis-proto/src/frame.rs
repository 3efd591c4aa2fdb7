//! Frame structure and serialization

use crate::ProtocolError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Frame flags for protocol control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFlags(pub u8);

impl FrameFlags {
    /// No special flags
    pub const NONE: Self = Self(0);
    /// Final frame of a reply stream
    pub const END_STREAM: Self = Self(1);
    /// Payload carries an `ErrorDetails`
    pub const ERROR: Self = Self(2);

    /// Check if a flag is set
    pub fn has_flag(self, flag: FrameFlags) -> bool {
        (self.0 & flag.0) != 0
    }

    /// Set a flag
    pub fn set_flag(&mut self, flag: FrameFlags) {
        self.0 |= flag.0;
    }
}

/// Protocol frame structure
///
/// Each RPC connection rides its own transport sub-stream, so frames
/// carry only an ordering sequence and terminality flags; there is no
/// in-band stream identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Sequence number within the connection
    pub sequence: u32,
    /// Frame flags
    pub flags: FrameFlags,
    /// Frame payload
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame
    pub fn new(sequence: u32, flags: FrameFlags, payload: Bytes) -> Self {
        Self {
            sequence,
            flags,
            payload,
        }
    }

    /// Create a data frame
    pub fn data(sequence: u32, payload: Bytes) -> Self {
        Self::new(sequence, FrameFlags::NONE, payload)
    }

    /// Create a final data frame (last frame of a reply stream)
    pub fn last(sequence: u32, payload: Bytes) -> Self {
        Self::new(sequence, FrameFlags::END_STREAM, payload)
    }

    /// Create an error frame; error frames always terminate the reply
    pub fn error(sequence: u32, payload: Bytes) -> Self {
        let mut flags = FrameFlags::ERROR;
        flags.set_flag(FrameFlags::END_STREAM);
        Self::new(sequence, flags, payload)
    }

    /// Serialize frame to MessagePack bytes
    pub fn to_msgpack(&self) -> Result<Vec<u8>, ProtocolError> {
        rmp_serde::to_vec(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize frame from MessagePack bytes
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, ProtocolError> {
        rmp_serde::from_slice(bytes).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Check if this is the last frame of the reply
    pub fn is_last(&self) -> bool {
        self.flags.has_flag(FrameFlags::END_STREAM)
    }

    /// Check if this is an error frame
    pub fn is_error(&self) -> bool {
        self.flags.has_flag(FrameFlags::ERROR)
    }
}
