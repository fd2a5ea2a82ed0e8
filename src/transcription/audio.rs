use std::fs::File;
use std::path::Path;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::types::TranscriptionError;

/// Sample rate Whisper expects
pub const WHISPER_SAMPLE_RATE: u32 = 16_000;

const RESAMPLE_CHUNK: usize = 1024;

/// Decodes an audio file into 16kHz mono f32 samples
///
/// The file extension is used as a probe hint; the container is still sniffed,
/// so a mislabelled upload decodes as long as symphonia recognises it.
///
/// # Errors
/// Returns error if the file can't be opened, has no audio track, or fails to decode
pub fn load_pcm_16k_mono(path: &Path) -> Result<Vec<f32>, TranscriptionError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| TranscriptionError::AudioDecode(format!("unrecognised format: {e}")))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| TranscriptionError::AudioDecode("no audio track".to_owned()))?;
    let track_id = track.id;
    let mut source_rate = track.codec_params.sample_rate.unwrap_or(WHISPER_SAMPLE_RATE);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| TranscriptionError::AudioDecode(format!("unsupported codec: {e}")))?;

    let mut mono = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(TranscriptionError::AudioDecode(format!("read packet: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Corrupt frame; skip it like ffmpeg would
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!(error = e, "skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(TranscriptionError::AudioDecode(format!("decode: {e}"))),
        };

        // Decoder output layout wins over track metadata
        source_rate = decoded.spec().rate;
        append_mono(decoded, &mut mono);
    }

    tracing::debug!(
        path = %path.display(),
        source_rate,
        samples = mono.len(),
        "decoded audio"
    );

    if mono.is_empty() || source_rate == WHISPER_SAMPLE_RATE {
        return Ok(mono);
    }
    resample(&mono, source_rate, WHISPER_SAMPLE_RATE)
}

/// Downmixes one decoded buffer using its own channel layout
fn append_mono(decoded: AudioBufferRef<'_>, mono: &mut Vec<f32>) {
    let spec = *decoded.spec();
    let channels = spec.channels.count().max(1);
    let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
    buf.copy_interleaved_ref(decoded);
    mono.extend(downmix(buf.samples(), channels));
}

/// Averages interleaved frames down to a single channel
#[allow(clippy::cast_precision_loss)]
fn downmix(interleaved: &[f32], channels: usize) -> impl Iterator<Item = f32> + '_ {
    interleaved
        .chunks(channels)
        .map(move |frame| frame.iter().sum::<f32>() / channels as f32)
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, TranscriptionError> {
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = f64::from(to_rate) / f64::from(from_rate);

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| TranscriptionError::Resample(e.to_string()))?;

    let expected = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(expected + RESAMPLE_CHUNK);

    for chunk in samples.chunks(RESAMPLE_CHUNK) {
        let mut block = chunk.to_vec();
        block.resize(RESAMPLE_CHUNK, 0.0);
        let resampled = resampler
            .process(&[block], None)
            .map_err(|e| TranscriptionError::Resample(e.to_string()))?;
        if let Some(channel) = resampled.into_iter().next() {
            output.extend(channel);
        }
    }

    // Drop the tail produced by zero padding the final chunk
    output.truncate(expected);
    Ok(output)
}

#[cfg(test)]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_wav(dir: &Path, name: &str, sample_rate: u32, channels: u16, frames: u32) -> PathBuf {
        let path = dir.join(name);
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let sample = ((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 8000.0) as i16;
            for _ in 0..channels {
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn test_decode_16k_mono_wav_keeps_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "tone.wav", 16_000, 1, 16_000);

        let samples = load_pcm_16k_mono(&path).unwrap();
        assert_eq!(samples.len(), 16_000);
        assert!(samples.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn test_decode_stereo_44k_resamples_to_16k_mono() {
        let dir = tempfile::tempdir().unwrap();
        // 0.5s of 44.1kHz stereo
        let path = write_wav(dir.path(), "stereo.wav", 44_100, 2, 22_050);

        let samples = load_pcm_16k_mono(&path).unwrap();
        let ratio = samples.len() as f64 / 8000.0;
        assert!((ratio - 1.0).abs() < 0.05, "got {} samples", samples.len());
    }

    #[test]
    fn test_decode_ignores_misleading_extension() {
        let dir = tempfile::tempdir().unwrap();
        let wav = write_wav(dir.path(), "real.wav", 16_000, 1, 1600);
        let renamed = dir.path().join("upload.mp3");
        std::fs::rename(&wav, &renamed).unwrap();

        let samples = load_pcm_16k_mono(&renamed).unwrap();
        assert_eq!(samples.len(), 1600);
    }

    #[test]
    fn test_decode_garbage_is_audio_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, b"definitely not a RIFF header").unwrap();

        let result = load_pcm_16k_mono(&path);
        assert!(matches!(result, Err(TranscriptionError::AudioDecode(_))));
    }

    #[test]
    fn test_decode_missing_file_is_io_error() {
        let result = load_pcm_16k_mono(Path::new("/tmp/whisper_server_missing_audio.wav"));
        assert!(matches!(result, Err(TranscriptionError::Io(_))));
    }

    #[test]
    fn test_downmix_averages_channels() {
        let interleaved = [1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        let mono: Vec<f32> = downmix(&interleaved, 2).collect();
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_append_mono_uses_decoded_channel_layout() {
        use symphonia::core::audio::{AsAudioBufferRef, AudioBuffer, Channels, Signal, SignalSpec};

        let spec = SignalSpec::new(22_050, Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
        let mut stereo = AudioBuffer::<f32>::new(4, spec);
        stereo.render_reserved(Some(4));
        stereo.chan_mut(0).fill(1.0);
        stereo.chan_mut(1).fill(0.0);

        let mut mono = Vec::new();
        append_mono(stereo.as_audio_buffer_ref(), &mut mono);

        assert_eq!(mono, vec![0.5; 4]);
    }

    #[test]
    fn test_resample_48k_to_16k() {
        let samples: Vec<f32> = (0..48_000).map(|i| (i as f32 / 48_000.0).sin()).collect();
        let out = resample(&samples, 48_000, 16_000).unwrap();
        assert_eq!(out.len(), 16_000);
    }
}
