//! Decoded audio clips: multi-format decode, mono mixdown and resampling.

use crate::{NavarasaError, Result};
use std::path::Path;
use symphonia::core::io::MediaSource;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Sample rate of the descriptor / heuristic path.
pub const ANALYSIS_SAMPLE_RATE: u32 = 22_050;
/// Longest stretch of audio (from the start of the clip) any predictor analyzes.
pub const MAX_ANALYSIS_SECS: f32 = 30.0;

/// A fully buffered mono waveform. Never persisted; lives for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(NavarasaError::Invalid("sample rate must be positive".into()));
        }
        if samples.is_empty() {
            return Err(NavarasaError::Decode("clip contains no samples".into()));
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(NavarasaError::Decode("clip contains non-finite samples".into()));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Decode any supported container (wav, mp3, flac, ogg/vorbis, m4a/aac) to mono.
    /// Only the first [`MAX_ANALYSIS_SECS`] seconds are decoded.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (pcm, sample_rate) = decode_mono(bytes)?;
        Self::new(pcm, sample_rate)
    }

    /// Stream-decode a file; like [`AudioClip::decode`], reading stops at the analysis window.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }
        let (pcm, sample_rate) = decode_source(Box::new(file), &hint)?;
        Self::new(pcm, sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Truncate to `max_secs` and resample to `target_sr`. Shorter clips keep their full length.
    pub fn prepared(&self, target_sr: u32, max_secs: f32) -> AudioClip {
        let max_src = ((max_secs * self.sample_rate as f32) as usize).max(1);
        let src = &self.samples[..self.samples.len().min(max_src)];
        let mut samples = linear_resample(src, self.sample_rate, target_sr);
        let max_dst = ((max_secs * target_sr as f32) as usize).max(1);
        samples.truncate(max_dst);
        if samples.is_empty() {
            samples.push(0.0);
        }
        AudioClip {
            samples,
            sample_rate: target_sr,
        }
    }
}

/// Decode common audio formats to mono f32 PCM at the stream's native rate,
/// stopping once [`MAX_ANALYSIS_SECS`] of audio has been produced.
pub fn decode_mono(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let cursor = std::io::Cursor::new(bytes.to_vec());
    decode_source(Box::new(cursor), &Hint::new())
}

fn decode_source(source: Box<dyn MediaSource>, hint: &Hint) -> Result<(Vec<f32>, u32)> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
    use symphonia::core::errors::Error as SymphoniaError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::default::get_probe;

    let mss = MediaSourceStream::new(source, Default::default());
    let probed = get_probe()
        .format(
            hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| NavarasaError::Decode(format!("unrecognized audio data: {e}")))?;
    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .cloned()
        .ok_or_else(|| NavarasaError::Decode("no audio track".into()))?;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| NavarasaError::Decode(format!("unsupported codec: {e}")))?;

    let mut pcm: Vec<f32> = Vec::new();
    let mut src_sr = track.codec_params.sample_rate.unwrap_or(0);
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(NavarasaError::Decode(e.to_string())),
        };
        if packet.track_id() != track.id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let capacity = decoded.capacity() as u64;
                src_sr = spec.rate;
                let chans = spec.channels.count().max(1);
                let mut buf = SampleBuffer::<f32>::new(capacity, spec);
                buf.copy_interleaved_ref(decoded);
                for frame in buf.samples().chunks(chans) {
                    pcm.push(frame.iter().sum::<f32>() / chans as f32);
                }
                let limit = ((MAX_ANALYSIS_SECS * src_sr as f32) as usize).max(1);
                if src_sr > 0 && pcm.len() >= limit {
                    pcm.truncate(limit);
                    break;
                }
            }
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("skipping corrupt packet: {}", e);
                continue;
            }
            Err(e) => return Err(NavarasaError::Decode(e.to_string())),
        }
    }
    if pcm.is_empty() {
        return Err(NavarasaError::Decode("stream contained no samples".into()));
    }
    if src_sr == 0 {
        return Err(NavarasaError::Decode("stream has no sample rate".into()));
    }
    Ok((pcm, src_sr))
}

/// Simple linear resampler (mono)
pub fn linear_resample(input: &[f32], src_sr: u32, dst_sr: u32) -> Vec<f32> {
    if src_sr == dst_sr || input.is_empty() {
        return input.to_vec();
    }
    let ratio = dst_sr as f64 / src_sr as f64;
    let out_len = (input.len() as f64 * ratio).ceil() as usize;
    let last = input.len() - 1;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_pos = i as f64 / ratio;
        let idx0 = (src_pos.floor() as usize).min(last);
        if idx0 >= last {
            out.push(input[last]);
            continue;
        }
        let frac = (src_pos - idx0 as f64) as f32;
        out.push(input[idx0] * (1.0 - frac) + input[idx0 + 1] * frac);
    }
    out
}
