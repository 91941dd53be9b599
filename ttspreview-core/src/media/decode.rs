//! Decodes clip bytes into 16-bit PCM according to their content type

use anyhow::{bail, Context, Result};
use std::io::Cursor;
use std::time::Duration;

use super::AudioClip;

const DEFAULT_PCM_RATE: u32 = 24000;

/// Interleaved little-endian i16 samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioData {
    pub pcm_data: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioData {
    pub fn frames(&self) -> usize {
        self.pcm_data.len() / (2 * self.channels.max(1) as usize)
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let nanos = self.frames() as u128 * 1_000_000_000 / self.sample_rate as u128;
        Duration::from_nanos(nanos as u64)
    }
}

/// Parsed `type/subtype; key=value` header
struct ContentType<'a> {
    essence: String,
    params: Vec<(String, &'a str)>,
}

impl<'a> ContentType<'a> {
    fn parse(raw: &'a str) -> Self {
        let mut parts = raw.split(';');
        let essence = parts.next().unwrap_or_default().trim().to_lowercase();
        let params = parts
            .filter_map(|p| p.split_once('='))
            .map(|(k, v)| (k.trim().to_lowercase(), v.trim().trim_matches('"')))
            .collect();
        Self { essence, params }
    }

    fn param(&self, key: &str) -> Option<&'a str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v)
    }
}

pub fn decode(clip: &AudioClip) -> Result<AudioData> {
    let content_type = ContentType::parse(&clip.content_type);

    match content_type.essence.as_str() {
        "audio/wav" | "audio/wave" | "audio/x-wav" | "audio/vnd.wave" => decode_wav(&clip.bytes),
        "audio/pcm" => decode_raw_pcm(&clip.bytes, &content_type),
        "" if clip.bytes.starts_with(b"RIFF") => decode_wav(&clip.bytes),
        "" => bail!("Missing content type and audio is not WAV"),
        other => bail!("Unsupported content type: {other}"),
    }
}

fn decode_wav(bytes: &[u8]) -> Result<AudioData> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).context("Malformed WAV data")?;
    let spec = reader.spec();

    let samples: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int => match spec.bits_per_sample {
            16 => reader.into_samples::<i16>().collect::<Result<_, _>>()?,
            8 => reader
                .into_samples::<i8>()
                .map(|s| s.map(|s| (s as i16) << 8))
                .collect::<Result<_, _>>()?,
            24 => reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| (s >> 8) as i16))
                .collect::<Result<_, _>>()?,
            32 => reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| (s >> 16) as i16))
                .collect::<Result<_, _>>()?,
            bits => bail!("Unsupported bit depth: {bits}"),
        },
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.map(|s| (s.clamp(-1.0, 1.0) * 32767.0) as i16))
            .collect::<Result<_, _>>()?,
    };

    Ok(AudioData {
        pcm_data: samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

fn decode_raw_pcm(bytes: &[u8], content_type: &ContentType<'_>) -> Result<AudioData> {
    let sample_rate = match content_type.param("rate") {
        Some(rate) => rate
            .parse::<u32>()
            .with_context(|| format!("Invalid PCM rate: {rate}"))?,
        None => DEFAULT_PCM_RATE,
    };
    let channels = match content_type.param("channels") {
        Some(channels) => channels
            .parse::<u16>()
            .with_context(|| format!("Invalid PCM channel count: {channels}"))?,
        None => 1,
    };

    if sample_rate == 0 || channels == 0 {
        bail!("PCM rate and channel count must be non-zero");
    }
    if bytes.len() % (2 * channels as usize) != 0 {
        bail!("PCM data is not a whole number of 16-bit frames");
    }

    Ok(AudioData {
        pcm_data: bytes.to_vec(),
        sample_rate,
        channels,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 16-bit WAV of `frames` frames of a constant sample
    pub(crate) fn wav_bytes(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..frames * channels as usize {
                writer.write_sample(1000i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_wav() {
        let clip = AudioClip::new(wav_bytes(24000, 1, 2400), "audio/wav");
        let audio = decode(&clip).unwrap();

        assert_eq!(audio.sample_rate, 24000);
        assert_eq!(audio.channels, 1);
        assert_eq!(audio.frames(), 2400);
        assert_eq!(audio.duration(), Duration::from_millis(100));
        assert_eq!(&audio.pcm_data[..2], &1000i16.to_le_bytes());
    }

    #[test]
    fn test_decode_float_wav() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..8 {
                writer.write_sample(0.5f32).unwrap();
            }
            writer.finalize().unwrap();
        }

        let audio = decode(&AudioClip::new(cursor.into_inner(), "audio/x-wav")).unwrap();
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.frames(), 4);
        assert_eq!(&audio.pcm_data[..2], &16383i16.to_le_bytes());
    }

    #[test]
    fn test_sniff_wav_without_content_type() {
        let clip = AudioClip::new(wav_bytes(22050, 1, 10), "");
        assert_eq!(decode(&clip).unwrap().sample_rate, 22050);
    }

    #[test]
    fn test_raw_pcm_params() {
        let clip = AudioClip::new(vec![0; 400], "audio/pcm; rate=16000; channels=2");
        let audio = decode(&clip).unwrap();
        assert_eq!(audio.sample_rate, 16000);
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.frames(), 100);

        let clip = AudioClip::new(vec![0; 480], "audio/pcm");
        assert_eq!(decode(&clip).unwrap().duration(), Duration::from_millis(10));

        let clip = AudioClip::new(vec![0; 3], "audio/pcm");
        assert!(decode(&clip).is_err());
    }

    #[test]
    fn test_rejects_unsupported_and_malformed() {
        let err = decode(&AudioClip::new(vec![0xff, 0xfb], "audio/mpeg")).unwrap_err();
        assert!(err.to_string().contains("Unsupported content type"));

        assert!(decode(&AudioClip::new(b"not a wav".to_vec(), "audio/wav")).is_err());
        assert!(decode(&AudioClip::new(b"garbage".to_vec(), "")).is_err());
    }
}
