//! Frames exchanged across the RX and TX handshake channels.

use bytes::Bytes;
use thiserror::Error;

/// Largest frame the MAC buffers will hold, in bytes.
pub const MAX_FRAME_LEN: usize = 1536;

/// Width of the `rx_len`/`tx_len` fields.
pub const LEN_BITS: u32 = 11;

const _: () = assert!(MAX_FRAME_LEN < (1 << LEN_BITS));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame of {len} bytes exceeds the {max} byte MTU")]
    TooLong { len: usize, max: usize },
}

/// An opaque frame with a known length.
///
/// Backed by [`Bytes`], so handing a frame from the producer's port to the
/// consumer moves a reference rather than the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Bytes);

impl Frame {
    /// Wrap a payload, rejecting anything above [`MAX_FRAME_LEN`].
    pub fn new(data: impl Into<Bytes>) -> Result<Self, FrameError> {
        let data = data.into();
        if data.len() > MAX_FRAME_LEN {
            return Err(FrameError::TooLong {
                len: data.len(),
                max: MAX_FRAME_LEN,
            });
        }
        Ok(Self(data))
    }

    /// A frame of `len` bytes counting up from `seed`, for stimulus.
    pub fn pattern(len: u16, seed: u8) -> Result<Self, FrameError> {
        let data: Vec<u8> = (0..len as usize)
            .map(|i| seed.wrapping_add(i as u8))
            .collect();
        Self::new(data)
    }

    /// Length as it appears on an `rx_len`/`tx_len` field.
    pub fn len(&self) -> u16 {
        // Bounded by MAX_FRAME_LEN at construction.
        self.0.len() as u16
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// The first `len` bytes, as read through a port of `len` bytes.
    ///
    /// Returns `None` when the frame holds fewer than `len` bytes.
    pub fn prefix(&self, len: u16) -> Option<Frame> {
        let len = len as usize;
        (len <= self.0.len()).then(|| Frame(self.0.slice(..len)))
    }
}

impl From<Frame> for Bytes {
    fn from(frame: Frame) -> Self {
        frame.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_oversize() {
        let err = Frame::new(vec![0u8; MAX_FRAME_LEN + 1]).unwrap_err();
        assert_eq!(
            err,
            FrameError::TooLong {
                len: MAX_FRAME_LEN + 1,
                max: MAX_FRAME_LEN
            }
        );
        assert!(Frame::new(vec![0u8; MAX_FRAME_LEN]).is_ok());
    }

    #[test]
    fn test_empty_frame_is_legal() {
        let frame = Frame::new(Vec::new()).unwrap();
        assert!(frame.is_empty());
        assert_eq!(frame.len(), 0);
    }

    #[test]
    fn test_pattern() {
        let frame = Frame::pattern(4, 0xfe).unwrap();
        assert_eq!(frame.as_bytes(), &[0xfe, 0xff, 0x00, 0x01]);
    }

    #[test]
    fn test_prefix() {
        let frame = Frame::pattern(10, 0).unwrap();
        assert_eq!(frame.prefix(10).unwrap(), frame);
        assert_eq!(frame.prefix(3).unwrap().as_bytes(), &[0, 1, 2]);
        assert!(frame.prefix(11).is_none());
    }
}
