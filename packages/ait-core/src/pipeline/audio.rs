//! Text-to-speech post-processing: uniform bitrate re-encode, ID3
//! tagging, and duration probing.
//!
//! Every generated reply is re-encoded to a single bitrate regardless of
//! what the provider returned, so direct-stream pacing (which assumes a
//! known, constant bitrate) and the broadcaster's duration-based queue
//! accounting both work off one predictable value.

use std::io::Cursor;
use std::path::Path;

use id3::TagLike;
use mp3lame_encoder::{Bitrate, Builder, FlushNoGap, MonoPcm};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{AitError, AitResult};
use crate::protocol_constants::MP3_BITRATE_KBPS;

/// Re-encodes raw MP3 bytes at a uniform bitrate.
///
/// Decodes with `symphonia` and re-encodes with `mp3lame_encoder`,
/// matching the bitrate every generated file should carry regardless of
/// what bitrate the provider returned.
pub fn reencode_mp3(input: &[u8]) -> AitResult<Vec<u8>> {
    let (samples, sample_rate) = decode_mp3_mono(input)?;

    let mut builder = Builder::new().ok_or_else(|| AitError::Internal("lame encoder init failed".into()))?;
    builder
        .set_num_channels(1)
        .map_err(|e| AitError::Internal(format!("lame channel config: {e:?}")))?;
    builder
        .set_sample_rate(sample_rate)
        .map_err(|e| AitError::Internal(format!("lame sample rate config: {e:?}")))?;
    builder
        .set_brate(bitrate_for(MP3_BITRATE_KBPS))
        .map_err(|e| AitError::Internal(format!("lame bitrate config: {e:?}")))?;
    let mut encoder = builder
        .build()
        .map_err(|e| AitError::Internal(format!("lame encoder build: {e:?}")))?;

    let mut output = Vec::with_capacity(samples.len() / 2);
    let input_pcm = MonoPcm(&samples);
    output.resize(mp3lame_encoder::max_required_buffer_size(samples.len()), 0);
    let encoded = encoder
        .encode(input_pcm, &mut output)
        .map_err(|e| AitError::Internal(format!("lame encode: {e:?}")))?;
    output.truncate(encoded);

    let mut tail = vec![0u8; 7200];
    let flushed = encoder
        .flush::<FlushNoGap>(&mut tail)
        .map_err(|e| AitError::Internal(format!("lame flush: {e:?}")))?;
    tail.truncate(flushed);
    output.extend_from_slice(&tail);

    Ok(output)
}

fn bitrate_for(kbps: u32) -> Bitrate {
    match kbps {
        320 => Bitrate::Kbps320,
        256 => Bitrate::Kbps256,
        224 => Bitrate::Kbps224,
        192 => Bitrate::Kbps192,
        160 => Bitrate::Kbps160,
        128 => Bitrate::Kbps128,
        _ => Bitrate::Kbps192,
    }
}

fn decode_mp3_mono(input: &[u8]) -> AitResult<(Vec<i16>, u32)> {
    let cursor = Cursor::new(input.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());
    let mut hint = Hint::new();
    hint.with_extension("mp3");

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AitError::Internal(format!("mp3 probe failed: {e}")))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| AitError::Internal("no decodable audio track".into()))?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.unwrap_or(24000);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AitError::Internal(format!("mp3 decoder init failed: {e}")))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(_)) => break,
            Err(e) => return Err(AitError::Internal(format!("mp3 demux error: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                let mut buf = symphonia::core::audio::SampleBuffer::<i16>::new(
                    decoded.capacity() as u64,
                    *decoded.spec(),
                );
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(e) => return Err(AitError::Internal(format!("mp3 decode error: {e}"))),
        }
    }

    Ok((samples, sample_rate))
}

/// Computes the duration in seconds of an MP3 file already on disk, for
/// the broadcaster's queue-ahead accounting.
pub fn probe_duration_secs(path: &Path) -> AitResult<f64> {
    let file = std::fs::File::open(path)
        .map_err(|e| AitError::Internal(format!("opening {} for duration probe: {e}", path.display())))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    hint.with_extension("mp3");

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AitError::Internal(format!("mp3 probe failed: {e}")))?;
    let format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| AitError::Internal("no decodable audio track".into()))?;

    let (Some(n_frames), Some(sample_rate)) = (track.codec_params.n_frames, track.codec_params.sample_rate)
    else {
        return Ok(0.0);
    };

    Ok(n_frames as f64 / sample_rate as f64)
}

/// Writes the standard ID3 tag set applied to every generated file:
/// title = join key, artist = `"AIT " + character_name`, album = join
/// key, genre = "Speech".
pub fn write_id3_tags(path: &Path, join_key: &str, character_name: &str) -> AitResult<()> {
    let mut tag = id3::Tag::read_from_path(path).unwrap_or_default();
    tag.set_title(join_key);
    tag.set_artist(format!("AIT {character_name}"));
    tag.set_album(join_key);
    tag.set_genre("Speech");
    tag.write_to_path(path, id3::Version::Id3v24)
        .map_err(|e| AitError::Internal(format!("writing id3 tags to {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitrate_for_known_value_maps_correctly() {
        assert!(matches!(bitrate_for(192), Bitrate::Kbps192));
    }

    #[test]
    fn bitrate_for_unknown_value_falls_back_to_192() {
        assert!(matches!(bitrate_for(999), Bitrate::Kbps192));
    }
}
