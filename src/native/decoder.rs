//! Audio decoding with symphonia.
//!
//! Supported formats:
//! - MP3
//! - FLAC
//! - OGG Vorbis
//! - WAV/PCM
//! - AAC (in MP4 container)

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::error::{MediaError, MediaErrorKind};

/// Interleaved samples decoded from one packet.
#[derive(Debug, Clone)]
pub struct DecodedChunk {
    pub samples: Vec<f32>,
    pub channels: u16,
    /// Presentation time of the first frame, in seconds
    pub timestamp: f64,
}

/// A symphonia reader/decoder pair for the first audio track of a source.
pub struct AudioDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    duration: Option<f64>,
    time_base: Option<TimeBase>,
    buffer: Option<SampleBuffer<f32>>,
}

impl AudioDecoder {
    /// Open a file for decoding.
    pub fn open(path: &Path) -> Result<Self, MediaError> {
        let file = File::open(path).map_err(|e| {
            MediaError::new(
                MediaErrorKind::InvalidSource,
                format!("{}: {e}", path.display()),
            )
        })?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }
        Self::from_source(Box::new(file), &hint)
    }

    /// Decode an in-memory buffer (a fetched remote file or a registered blob).
    pub fn from_bytes(
        data: Vec<u8>,
        mime: Option<&str>,
        extension: Option<&str>,
    ) -> Result<Self, MediaError> {
        let mut hint = Hint::new();
        if let Some(mime) = mime {
            hint.mime_type(mime);
        }
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }
        Self::from_source(Box::new(Cursor::new(data)), &hint)
    }

    fn from_source(source: Box<dyn MediaSource>, hint: &Hint) -> Result<Self, MediaError> {
        let mss = MediaSourceStream::new(source, Default::default());
        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };

        let probed = symphonia::default::get_probe()
            .format(hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| MediaError::format(e.to_string()))?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| MediaError::format("no audio track found"))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| MediaError::decode("unknown sample rate"))?;
        let channels = params.channels.map(|c| c.count() as u16).unwrap_or(2);
        let time_base = params.time_base;
        let duration = params
            .n_frames
            .map(|frames| match time_base {
                Some(tb) => seconds(tb.calc_time(frames)),
                None => frames as f64 / f64::from(sample_rate),
            })
            .filter(|d| d.is_finite() && *d > 0.0);

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| MediaError::format(e.to_string()))?;

        Ok(Self {
            reader,
            decoder,
            track_id,
            sample_rate,
            channels,
            duration,
            time_base,
            buffer: None,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Total length in seconds, when the container declares it.
    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// Seek to `seconds`; returns where the reader actually landed.
    pub fn seek(&mut self, seconds: f64) -> Result<f64, MediaError> {
        let seeked = self
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::from(seconds.max(0.0)),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| MediaError::decode(format!("seek failed: {e}")))?;

        self.decoder.reset();
        Ok(self.time_of(seeked.actual_ts).unwrap_or(seconds))
    }

    /// Decode the next packet of the selected track.
    ///
    /// Returns `Ok(None)` at end of stream. Corrupt packets are skipped.
    pub fn decode_next(&mut self) -> Result<Option<DecodedChunk>, MediaError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(MediaError::decode(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }
            let timestamp = self.time_of(packet.ts()).unwrap_or(0.0);

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!(error = e, "Skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(MediaError::decode(e.to_string())),
            };

            let spec = *decoded.spec();
            let needed = decoded.capacity() * spec.channels.count();
            if self.buffer.as_ref().is_none_or(|b| b.capacity() < needed) {
                self.buffer = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
            }
            let Some(buffer) = self.buffer.as_mut() else {
                continue;
            };
            buffer.copy_interleaved_ref(decoded);

            return Ok(Some(DecodedChunk {
                samples: buffer.samples().to_vec(),
                channels: spec.channels.count() as u16,
                timestamp,
            }));
        }
    }

    fn time_of(&self, ts: u64) -> Option<f64> {
        self.time_base.map(|tb| seconds(tb.calc_time(ts)))
    }
}

fn seconds(time: Time) -> f64 {
    time.seconds as f64 + time.frac
}
