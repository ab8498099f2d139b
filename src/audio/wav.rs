//! WAV container encoding and decoding.
//!
//! The encoder writes the standard 44-byte RIFF/WAVE header by hand so the
//! output is byte-exact: `fmt` subtype 3 (IEEE float) or 1 (integer PCM),
//! byte rate and block align derived from the format, and a `data` chunk size
//! equal to the payload length. Decoding goes through hound, which accepts
//! both layouts.

use crate::error::{Result, VoxcapError};
use std::io::Read;
use std::path::Path;

/// Sample encoding for exported WAV files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavFormat {
    /// 32-bit IEEE float. Lossless for the captured f32 samples, larger.
    Float32,
    /// 16-bit integer PCM. Lossy, smaller; required by some cloud APIs.
    Pcm16,
}

impl WavFormat {
    fn format_tag(self) -> u16 {
        match self {
            WavFormat::Float32 => 3,
            WavFormat::Pcm16 => 1,
        }
    }

    fn bytes_per_sample(self) -> u32 {
        match self {
            WavFormat::Float32 => 4,
            WavFormat::Pcm16 => 2,
        }
    }
}

/// Result of writing a WAV file to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportInfo {
    pub bytes_written: u64,
    pub duration_ms: u64,
}

/// Encodes mono samples into an in-memory WAV container.
pub fn encode_wav(samples: &[f32], sample_rate: u32, format: WavFormat) -> Vec<u8> {
    let channels: u16 = 1;
    let bytes_per_sample = format.bytes_per_sample();
    let data_size = samples.len() as u32 * bytes_per_sample;
    let byte_rate = sample_rate * channels as u32 * bytes_per_sample;
    let block_align = channels * bytes_per_sample as u16;
    let bits_per_sample = (bytes_per_sample * 8) as u16;

    let mut out = Vec::with_capacity(44 + data_size as usize);

    // RIFF chunk descriptor
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_size).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    // fmt subchunk (16 bytes)
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&format.format_tag().to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data subchunk
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_size.to_le_bytes());

    match format {
        WavFormat::Float32 => {
            for &sample in samples {
                out.extend_from_slice(&sample.to_le_bytes());
            }
        }
        WavFormat::Pcm16 => {
            for &sample in samples {
                let clamped = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                out.extend_from_slice(&clamped.to_le_bytes());
            }
        }
    }

    out
}

/// Writes mono samples to `path` as a WAV file.
pub fn write_wav(
    path: &Path,
    samples: &[f32],
    sample_rate: u32,
    format: WavFormat,
) -> Result<ExportInfo> {
    let encoded = encode_wav(samples, sample_rate, format);
    std::fs::write(path, &encoded)?;

    Ok(ExportInfo {
        bytes_written: encoded.len() as u64,
        duration_ms: samples.len() as u64 * 1000 / sample_rate as u64,
    })
}

/// Decodes a WAV container into mono float32 samples.
///
/// Integer PCM is normalized into [-1, 1]; multi-channel input is averaged
/// down to mono.
pub fn decode_wav(reader: impl Read) -> Result<(Vec<f32>, u32)> {
    let mut wav_reader = hound::WavReader::new(reader).map_err(|e| VoxcapError::Corruption {
        message: format!("Failed to parse WAV data: {}", e),
    })?;

    let spec = wav_reader.spec();
    let channels = spec.channels as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => wav_reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| VoxcapError::Corruption {
                message: format!("Failed to read WAV samples: {}", e),
            })?,
        hound::SampleFormat::Int => wav_reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| VoxcapError::Corruption {
                message: format!("Failed to read WAV samples: {}", e),
            })?,
    };

    let samples = if channels > 1 {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        interleaved
    };

    Ok((samples, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn u16_at(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
    }

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ])
    }

    #[test]
    fn float32_header_is_byte_exact() {
        let samples = vec![0.25f32; 160];
        let encoded = encode_wav(&samples, 16000, WavFormat::Float32);

        assert_eq!(&encoded[0..4], b"RIFF");
        assert_eq!(u32_at(&encoded, 4), 36 + 160 * 4);
        assert_eq!(&encoded[8..12], b"WAVE");
        assert_eq!(&encoded[12..16], b"fmt ");
        assert_eq!(u32_at(&encoded, 16), 16);
        assert_eq!(u16_at(&encoded, 20), 3, "fmt subtype must be IEEE float");
        assert_eq!(u16_at(&encoded, 22), 1, "mono");
        assert_eq!(u32_at(&encoded, 24), 16000);
        assert_eq!(u32_at(&encoded, 28), 16000 * 4, "byte rate");
        assert_eq!(u16_at(&encoded, 32), 4, "block align");
        assert_eq!(u16_at(&encoded, 34), 32, "bits per sample");
        assert_eq!(&encoded[36..40], b"data");
        assert_eq!(u32_at(&encoded, 40), 160 * 4);
        assert_eq!(encoded.len(), 44 + 160 * 4);
    }

    #[test]
    fn pcm16_header_is_byte_exact() {
        let samples = vec![0.5f32; 320];
        let encoded = encode_wav(&samples, 16000, WavFormat::Pcm16);

        assert_eq!(u16_at(&encoded, 20), 1, "fmt subtype must be PCM");
        assert_eq!(u32_at(&encoded, 28), 16000 * 2, "byte rate");
        assert_eq!(u16_at(&encoded, 32), 2, "block align");
        assert_eq!(u16_at(&encoded, 34), 16, "bits per sample");
        assert_eq!(u32_at(&encoded, 40), 320 * 2);
        assert_eq!(encoded.len(), 44 + 320 * 2);
    }

    #[test]
    fn float32_round_trip_preserves_samples_exactly() {
        let samples: Vec<f32> = (0..1600).map(|i| (i as f32 / 1600.0) - 0.5).collect();
        let encoded = encode_wav(&samples, 16000, WavFormat::Float32);

        let (decoded, rate) = decode_wav(Cursor::new(encoded)).unwrap();

        assert_eq!(rate, 16000);
        assert_eq!(decoded.len(), samples.len());
        assert_eq!(decoded, samples);
    }

    #[test]
    fn pcm16_round_trip_preserves_count_and_rate() {
        let samples: Vec<f32> = (0..800).map(|i| ((i % 100) as f32 / 100.0) - 0.5).collect();
        let encoded = encode_wav(&samples, 16000, WavFormat::Pcm16);

        let (decoded, rate) = decode_wav(Cursor::new(encoded)).unwrap();

        assert_eq!(rate, 16000);
        assert_eq!(decoded.len(), samples.len());
        // Quantization error bounded by one 16-bit step
        for (orig, dec) in samples.iter().zip(decoded.iter()) {
            assert!((orig - dec).abs() < 1.0 / 32000.0, "{} vs {}", orig, dec);
        }
    }

    #[test]
    fn empty_input_still_produces_valid_header() {
        let encoded = encode_wav(&[], 16000, WavFormat::Pcm16);
        assert_eq!(encoded.len(), 44);
        assert_eq!(u32_at(&encoded, 40), 0);

        let (decoded, rate) = decode_wav(Cursor::new(encoded)).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(rate, 16000);
    }

    #[test]
    fn write_wav_reports_bytes_and_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let samples = vec![0.1f32; 16000]; // 1 second

        let info = write_wav(&path, &samples, 16000, WavFormat::Float32).unwrap();

        assert_eq!(info.bytes_written, 44 + 16000 * 4);
        assert_eq!(info.duration_ms, 1000);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), info.bytes_written);
    }

    #[test]
    fn decode_rejects_garbage() {
        let garbage = vec![0u8, 1, 2, 3, 4, 5];
        let result = decode_wav(Cursor::new(garbage));

        assert!(result.is_err());
        match result {
            Err(VoxcapError::Corruption { message }) => {
                assert!(message.contains("Failed to parse WAV"));
            }
            _ => panic!("Expected Corruption error"),
        }
    }

    #[test]
    fn decode_downmixes_stereo_written_by_hound() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            // Stereo pairs: (8192, 8192), (-8192, 8192)
            for s in [8192i16, 8192, -8192, 8192] {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }

        let (decoded, _) = decode_wav(Cursor::new(cursor.into_inner())).unwrap();

        assert_eq!(decoded.len(), 2);
        assert!((decoded[0] - 0.25).abs() < 0.001);
        assert!(decoded[1].abs() < 0.001);
    }
}
