//! Streaming PCM file writer
//!
//! Produces a RIFF/WAVE file whose two size fields are only known once the
//! stream ends: the header is written up front with zero placeholders and
//! patched at close time. A file that never received payload keeps the
//! placeholders, which parsers accept as an empty container.

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Fixed header size: RIFF chunk header, fmt sub-chunk, data sub-chunk
/// header.
pub const WAVE_HEADER_SIZE: u64 = 12 + 24 + 8;

/// Byte offset of the container-level size field.
const RIFF_SIZE_OFFSET: u64 = 4;
/// Byte offset of the data-chunk size field.
const DATA_SIZE_OFFSET: u64 = WAVE_HEADER_SIZE - 4;

pub struct WaveWriter {
    file: Option<File>,
    path: Option<PathBuf>,
}

impl WaveWriter {
    pub fn new() -> WaveWriter {
        WaveWriter { file: None, path: None }
    }

    /// Create `path` and write the header template. An already open file is
    /// closed (and finalized) first.
    pub fn open(
        &mut self,
        path: &Path,
        channels: u16,
        sample_rate: u32,
        bits_per_sample: u16,
    ) -> io::Result<()> {
        if self.file.is_some() {
            self.close()?;
        }

        let mut file = File::create(path)?;

        let block_align = (channels as u32 * bits_per_sample as u32 / 8) as u16;
        let byte_rate = sample_rate * block_align as u32;

        let mut header = Vec::with_capacity(WAVE_HEADER_SIZE as usize);
        header.extend_from_slice(b"RIFF");
        header.extend_from_slice(&0u32.to_le_bytes()); // total size - 8, patched on close
        header.extend_from_slice(b"WAVE");
        header.extend_from_slice(b"fmt ");
        header.extend_from_slice(&16u32.to_le_bytes());
        header.extend_from_slice(&1u16.to_le_bytes()); // PCM
        header.extend_from_slice(&channels.to_le_bytes());
        header.extend_from_slice(&sample_rate.to_le_bytes());
        header.extend_from_slice(&byte_rate.to_le_bytes());
        header.extend_from_slice(&block_align.to_le_bytes());
        header.extend_from_slice(&bits_per_sample.to_le_bytes());
        header.extend_from_slice(b"data");
        header.extend_from_slice(&0u32.to_le_bytes()); // payload size, patched on close

        file.write_all(&header)?;

        self.file = Some(file);
        self.path = Some(path.to_path_buf());

        log::info!(
            "Recording PCM to {} ({} ch, {} Hz, {} bits)",
            path.display(),
            channels,
            sample_rate,
            bits_per_sample
        );
        Ok(())
    }

    /// Append raw PCM bytes.
    ///
    /// Returns the byte count actually written, which may be short on a
    /// partial write; 0 when the writer is closed or `data` is empty; -1
    /// on an I/O error.
    pub fn write(&mut self, data: &[u8]) -> i64 {
        let Some(file) = self.file.as_mut() else {
            return 0;
        };
        if data.is_empty() {
            return 0;
        }

        match file.write(data) {
            Ok(written) => written as i64,
            Err(e) => {
                log::error!("PCM write failed: {}", e);
                -1
            }
        }
    }

    /// Finalize and close the file. Idempotent.
    ///
    /// When payload was written, the two size fields are patched to the
    /// final values; an empty file keeps the zero placeholders.
    pub fn close(&mut self) -> io::Result<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        let path = self.path.take();

        let size = file.seek(SeekFrom::End(0))?;
        if size > WAVE_HEADER_SIZE {
            file.seek(SeekFrom::Start(RIFF_SIZE_OFFSET))?;
            file.write_all(&((size - 8) as u32).to_le_bytes())?;
            file.seek(SeekFrom::Start(DATA_SIZE_OFFSET))?;
            file.write_all(&((size - WAVE_HEADER_SIZE) as u32).to_le_bytes())?;
        }
        file.sync_all()?;

        if let Some(path) = path {
            log::info!("Closed PCM recording {} ({} bytes)", path.display(), size);
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for WaveWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("Failed to finalize PCM recording: {}", e);
        }
    }
}
