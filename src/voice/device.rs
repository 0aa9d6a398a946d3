//! Microphone port
//!
//! A [`Microphone`] hands out exclusive [`MicStream`]s. A stream is released
//! when it is dropped, so every holder closes it on every exit path.

use async_trait::async_trait;

use super::AudioFrame;
use crate::Result;

/// Shape of the frames a consumer needs from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    /// Samples per second
    pub sample_rate: u32,
    /// Samples per frame
    pub frame_length: usize,
}

/// An open, exclusively owned microphone stream
#[async_trait(?Send)]
pub trait MicStream {
    /// Read exactly one frame of `frame_length` samples
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Device`] if the device fails or stalls
    async fn read_frame(&mut self) -> Result<AudioFrame>;
}

/// Audio input device that can open one stream at a time
pub trait Microphone {
    /// Open a stream delivering frames shaped by `spec`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Device`] if the device cannot be opened
    fn open(&self, spec: StreamSpec) -> Result<Box<dyn MicStream>>;
}
