//! Mono 16-bit PCM WAV writer with the fixed RIFF/WAVE/fmt/LIST(INFO/ICMT/
//! IART)/data chunk layout from SPEC_FULL.md §6.
//!
//! Ported from `examples/original_source/backstage/inc/wavFile.h` and
//! `src/wavFile.c`. No WAV crate in the retrieval pack (`hound`, seen in
//! `agentflow-ai-heycat`/`poodle64-thoth`) supports writing custom
//! LIST/INFO/ICMT/IART chunks, so the header is built and written by hand
//! with plain little-endian byte writes, matching the pack's own precedent
//! of hand-rolling exact binary layouts where no crate fits (see DESIGN.md).

use crate::time::{format_utc_offset, CalendarTime};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

const RIFF_ID_LENGTH: usize = 4;
const LENGTH_OF_ARTIST: usize = 32;
const LENGTH_OF_COMMENT: usize = 384;
const BYTES_PER_SAMPLE: u32 = 2;

const HEADER_SIZE: usize = 4 + 4 // riff chunk
    + RIFF_ID_LENGTH            // "WAVE"
    + 4 + 4                     // fmt chunk
    + 16                        // wavFormat_t
    + 4 + 4                     // list chunk
    + RIFF_ID_LENGTH            // "INFO"
    + (4 + 4 + LENGTH_OF_COMMENT) // icmt_t
    + (4 + 4 + LENGTH_OF_ARTIST);  // iart_t
// followed by a "data" chunk header (4+4) immediately before sample bytes.

const DATA_CHUNK_HEADER_OFFSET: usize = HEADER_SIZE;
const ARTIST_TEXT: &str = "AudioMoth Live";

fn write_chunk_id(buf: &mut Vec<u8>, id: &[u8; 4]) {
    buf.extend_from_slice(id);
}

fn write_fixed_str(buf: &mut Vec<u8>, s: &str, len: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(len);
    buf.extend_from_slice(&bytes[..n]);
    buf.resize(buf.len() + (len - n), 0u8);
}

/// Builds the full fixed-size header for `number_of_samples` mono 16-bit
/// samples at `sample_rate`, with the ICMT/IART chunks carrying the time-
/// and device-tagged comment.
pub fn build_header(
    sample_rate: u32,
    number_of_samples: u32,
    comment: &str,
) -> Vec<u8> {
    let data_size = number_of_samples * BYTES_PER_SAMPLE;
    let mut h = Vec::with_capacity(HEADER_SIZE + 8);

    // RIFF chunk: size = total file size - 8.
    let list_size: u32 = (RIFF_ID_LENGTH
        + (8 + LENGTH_OF_COMMENT)
        + (8 + LENGTH_OF_ARTIST)) as u32;
    let riff_size = (HEADER_SIZE + 8 + data_size as usize - 8) as u32;

    write_chunk_id(&mut h, b"RIFF");
    h.extend_from_slice(&riff_size.to_le_bytes());
    write_fixed_str(&mut h, "WAVE", RIFF_ID_LENGTH);

    write_chunk_id(&mut h, b"fmt ");
    h.extend_from_slice(&16u32.to_le_bytes());
    h.extend_from_slice(&1u16.to_le_bytes()); // PCM
    h.extend_from_slice(&1u16.to_le_bytes()); // mono
    h.extend_from_slice(&sample_rate.to_le_bytes());
    h.extend_from_slice(&(sample_rate * BYTES_PER_SAMPLE).to_le_bytes());
    h.extend_from_slice(&(BYTES_PER_SAMPLE as u16).to_le_bytes());
    h.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    write_chunk_id(&mut h, b"LIST");
    h.extend_from_slice(&list_size.to_le_bytes());
    write_fixed_str(&mut h, "INFO", RIFF_ID_LENGTH);

    write_chunk_id(&mut h, b"ICMT");
    h.extend_from_slice(&(LENGTH_OF_COMMENT as u32).to_le_bytes());
    write_fixed_str(&mut h, comment, LENGTH_OF_COMMENT);

    write_chunk_id(&mut h, b"IART");
    h.extend_from_slice(&(LENGTH_OF_ARTIST as u32).to_le_bytes());
    write_fixed_str(&mut h, ARTIST_TEXT, LENGTH_OF_ARTIST);

    write_chunk_id(&mut h, b"data");
    h.extend_from_slice(&data_size.to_le_bytes());

    debug_assert_eq!(h.len(), HEADER_SIZE + 8);
    h
}

/// Builds the ICMT comment string:
/// `Recorded at HH:MM:SS[.mmm] DD/MM/YYYY (UTC±H[:MM]) by AudioMoth Live using <device>.`
pub fn format_comment(cal: &CalendarTime, milliseconds: i32, offset_seconds: i32, device: &str) -> String {
    let time_part = if milliseconds >= 0 {
        format!(
            "{:02}:{:02}:{:02}.{:03}",
            cal.hour, cal.minute, cal.second, milliseconds
        )
    } else {
        format!("{:02}:{:02}:{:02}", cal.hour, cal.minute, cal.second)
    };
    format!(
        "Recorded at {} {:02}/{:02}/{} ({}) by AudioMoth Live using {}.",
        time_part,
        cal.day,
        cal.month,
        cal.year,
        format_utc_offset(offset_seconds),
        device
    )
}

/// Builds the filename `YYYYMMDD_HHMMSS[_mmm].WAV` under `destination`.
pub fn build_filename(destination: &Path, cal: &CalendarTime, milliseconds: i32) -> std::path::PathBuf {
    let stem = if milliseconds >= 0 {
        format!(
            "{:04}{:02}{:02}_{:02}{:02}{:02}_{:03}",
            cal.year, cal.month, cal.day, cal.hour, cal.minute, cal.second, milliseconds
        )
    } else {
        format!(
            "{:04}{:02}{:02}_{:02}{:02}{:02}",
            cal.year, cal.month, cal.day, cal.hour, cal.minute, cal.second
        )
    };
    destination.join(format!("{stem}.WAV"))
}

/// Writes a new WAV file made of two (possibly empty) sample segments,
/// matching `WavFile_writeFile`'s two-buffer signature used to splice a
/// ring-wrapped read without an intermediate copy.
pub fn write_file(
    path: &Path,
    sample_rate: u32,
    segment1: &[i16],
    segment2: &[i16],
    comment: &str,
) -> io::Result<()> {
    let total_samples = (segment1.len() + segment2.len()) as u32;
    let header = build_header(sample_rate, total_samples, comment);
    let mut file = File::create(path)?;
    file.write_all(&header)?;
    write_samples(&mut file, segment1)?;
    write_samples(&mut file, segment2)?;
    Ok(())
}

/// Appends two sample segments to an existing WAV file, then patches the
/// `data` chunk size and `RIFF` chunk size in place, matching
/// `WavFile_appendFile`.
pub fn append_file(path: &Path, segment1: &[i16], segment2: &[i16]) -> io::Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let added_samples = (segment1.len() + segment2.len()) as u32;
    let added_bytes = added_samples * BYTES_PER_SAMPLE;

    file.seek(SeekFrom::End(0))?;
    write_samples(&mut file, segment1)?;
    write_samples(&mut file, segment2)?;

    let mut data_size_buf = [0u8; 4];
    file.seek(SeekFrom::Start((DATA_CHUNK_HEADER_OFFSET + 4) as u64))?;
    file.read_exact(&mut data_size_buf)?;
    let new_data_size = u32::from_le_bytes(data_size_buf) + added_bytes;
    file.seek(SeekFrom::Start((DATA_CHUNK_HEADER_OFFSET + 4) as u64))?;
    file.write_all(&new_data_size.to_le_bytes())?;

    let mut riff_size_buf = [0u8; 4];
    file.seek(SeekFrom::Start(4))?;
    file.read_exact(&mut riff_size_buf)?;
    let new_riff_size = u32::from_le_bytes(riff_size_buf) + added_bytes;
    file.seek(SeekFrom::Start(4))?;
    file.write_all(&new_riff_size.to_le_bytes())?;

    Ok(())
}

/// Reads a mono 16-bit PCM WAV file back, skipping whatever chunks precede
/// `data` (so it tolerates both the LIST/INFO layout this module writes and
/// plain third-party WAV assets used as simulation input). Returns the
/// declared sample rate and the raw samples.
pub fn read_file(path: &Path) -> io::Result<(u32, Vec<i16>)> {
    let mut file = File::open(path)?;
    let mut riff_header = [0u8; 12];
    file.read_exact(&mut riff_header)?;
    if &riff_header[0..4] != b"RIFF" || &riff_header[8..12] != b"WAVE" {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "not a RIFF/WAVE file"));
    }

    let mut sample_rate = 0u32;
    loop {
        let mut chunk_header = [0u8; 8];
        if file.read_exact(&mut chunk_header).is_err() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no data chunk found"));
        }
        let id = &chunk_header[0..4];
        let size = u32::from_le_bytes(chunk_header[4..8].try_into().unwrap()) as usize;

        if id == b"fmt " {
            let mut fmt = vec![0u8; size];
            file.read_exact(&mut fmt)?;
            sample_rate = u32::from_le_bytes(fmt[4..8].try_into().unwrap());
        } else if id == b"data" {
            let mut raw = vec![0u8; size];
            file.read_exact(&mut raw)?;
            let samples: Vec<i16> = raw
                .chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]))
                .collect();
            return Ok((sample_rate, samples));
        } else {
            file.seek(SeekFrom::Current(size as i64))?;
        }
        if size % 2 == 1 {
            file.seek(SeekFrom::Current(1))?;
        }
    }
}

fn write_samples(file: &mut File, samples: &[i16]) -> io::Result<()> {
    let mut buf = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        buf.extend_from_slice(&s.to_le_bytes());
    }
    file.write_all(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::CalendarTime;
    use test_dir::TempDir;

    mod test_dir {
        use std::path::PathBuf;

        pub struct TempDir(PathBuf);

        impl TempDir {
            pub fn new() -> Self {
                let mut dir = std::env::temp_dir();
                dir.push(format!("backstage-wav-test-{}", std::process::id()));
                let _ = std::fs::create_dir_all(&dir);
                TempDir(dir)
            }

            pub fn path(&self) -> &std::path::Path {
                &self.0
            }
        }

        impl Drop for TempDir {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.0);
            }
        }
    }

    fn sample_cal() -> CalendarTime {
        CalendarTime {
            year: 2024,
            month: 3,
            day: 15,
            hour: 10,
            minute: 0,
            second: 45,
        }
    }

    #[test]
    fn header_has_expected_riff_and_data_sizes() {
        let header = build_header(48_000, 100, "test comment");
        assert_eq!(&header[0..4], b"RIFF");
        let riff_size = u32::from_le_bytes(header[4..8].try_into().unwrap());
        assert_eq!(riff_size as usize, header.len() - 8 + 200);
        let data_size = u32::from_le_bytes(
            header[DATA_CHUNK_HEADER_OFFSET + 4..DATA_CHUNK_HEADER_OFFSET + 8]
                .try_into()
                .unwrap(),
        );
        assert_eq!(data_size, 200);
    }

    #[test]
    fn comment_format_matches_literal_pattern() {
        let cal = sample_cal();
        let comment = format_comment(&cal, 500, 3600, "AudioMoth 384 kHz");
        assert_eq!(
            comment,
            "Recorded at 10:00:45.500 15/03/2024 (UTC+1) by AudioMoth Live using AudioMoth 384 kHz."
        );
    }

    #[test]
    fn filename_omits_milliseconds_when_negative() {
        let cal = sample_cal();
        let dest = Path::new("/tmp");
        let name = build_filename(dest, &cal, -1);
        assert_eq!(name, Path::new("/tmp/20240315_100045.WAV"));
        let name_ms = build_filename(dest, &cal, 250);
        assert_eq!(name_ms, Path::new("/tmp/20240315_100045_250.WAV"));
    }

    #[test]
    fn write_then_append_patches_sizes_correctly() {
        let dir = TempDir::new();
        let path = dir.path().join("test.WAV");
        write_file(&path, 48_000, &[1, 2, 3], &[], "c").unwrap();
        append_file(&path, &[4, 5], &[]).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let data_size = u32::from_le_bytes(
            bytes[DATA_CHUNK_HEADER_OFFSET + 4..DATA_CHUNK_HEADER_OFFSET + 8]
                .try_into()
                .unwrap(),
        );
        assert_eq!(data_size, 10); // 5 samples * 2 bytes
        assert_eq!(bytes.len(), HEADER_SIZE + 8 + 10);
    }

    #[test]
    fn read_file_round_trips_written_samples() {
        let dir = TempDir::new();
        let path = dir.path().join("roundtrip.WAV");
        write_file(&path, 44_100, &[100, -200, 300], &[400], "c").unwrap();
        let (rate, samples) = read_file(&path).unwrap();
        assert_eq!(rate, 44_100);
        assert_eq!(samples, vec![100, -200, 300, 400]);
    }

    #[test]
    fn write_file_splices_two_segments_in_order() {
        let dir = TempDir::new();
        let path = dir.path().join("wrap.WAV");
        write_file(&path, 48_000, &[1, 2], &[3, 4], "c").unwrap();
        let bytes = std::fs::read(&path).unwrap();
        let data_start = HEADER_SIZE + 8;
        let samples: Vec<i16> = bytes[data_start..]
            .chunks(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(samples, vec![1, 2, 3, 4]);
    }
}
