//! Audio capture from microphone

use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig, SupportedStreamConfigRange};
use tokio::sync::mpsc;

use super::device::{MicStream, Microphone, StreamSpec};
use super::frame::{AudioFrame, to_i16};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// How long a frame read may wait for the device before failing
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Default system input device
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    /// Create a handle to the default input device
    ///
    /// # Errors
    ///
    /// Returns error if no input device is present
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Device("no input device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "input device found"
        );
        Ok(Self)
    }
}

impl Microphone for CpalMicrophone {
    fn open(&self, spec: StreamSpec) -> Result<Box<dyn MicStream>> {
        Ok(Box::new(CpalMicStream::open(spec)?))
    }
}

/// A live cpal input stream delivering 16-bit frames
///
/// The device stream stops when this value is dropped.
pub struct CpalMicStream {
    stream: Option<Stream>,
    chunks: mpsc::UnboundedReceiver<Vec<i16>>,
    pending: Vec<i16>,
    spec: StreamSpec,
}

impl CpalMicStream {
    /// Open the default input device and start streaming
    ///
    /// # Errors
    ///
    /// Returns error if the device has no usable config or fails to start
    pub fn open(spec: StreamSpec) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Device("no input device available".to_string()))?;

        let rate = SampleRate(spec.sample_rate);
        let supports = |c: &SupportedStreamConfigRange, channels: u16| {
            c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
        };

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Device(e.to_string()))?
            .find(|c| supports(c, 1))
            .or_else(|| {
                // Fallback: stereo, downmixed in the callback
                device
                    .supported_input_configs()
                    .ok()?
                    .find(|c| supports(c, 2))
            })
            .ok_or_else(|| Error::Device("no suitable audio config found".to_string()))?;

        let config: StreamConfig = supported_config.with_sample_rate(rate).config();
        let channels = usize::from(config.channels);

        let (tx, chunks) = mpsc::unbounded_channel();
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let chunk: Vec<i16> = data
                        .chunks(channels)
                        .map(|frame| {
                            #[allow(clippy::cast_precision_loss)]
                            let mixed = frame.iter().sum::<f32>() / frame.len() as f32;
                            to_i16(mixed)
                        })
                        .collect();
                    // Receiver gone means the stream is being torn down
                    let _ = tx.send(chunk);
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Device(e.to_string()))?;

        stream.play().map_err(|e| Error::Device(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = spec.sample_rate,
            frame_length = spec.frame_length,
            channels,
            "audio capture started"
        );

        Ok(Self {
            stream: Some(stream),
            chunks,
            pending: Vec::with_capacity(spec.frame_length * 2),
            spec,
        })
    }
}

#[async_trait(?Send)]
impl MicStream for CpalMicStream {
    async fn read_frame(&mut self) -> Result<AudioFrame> {
        while self.pending.len() < self.spec.frame_length {
            let chunk = tokio::time::timeout(READ_TIMEOUT, self.chunks.recv())
                .await
                .map_err(|_| Error::Device("input device stalled".to_string()))?
                .ok_or_else(|| Error::Device("input stream closed".to_string()))?;
            self.pending.extend_from_slice(&chunk);
        }

        let samples: Vec<i16> = self.pending.drain(..self.spec.frame_length).collect();
        Ok(AudioFrame::new(samples, self.spec.sample_rate))
    }
}

impl Drop for CpalMicStream {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Device(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(to_i16(sample))
                .map_err(|e| Error::Device(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Device(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
