//! Uncompressed SER video files, as written by most planetary capture tools.

use crate::datasource::{ColorFormatId, FrameSource};
use crate::framesink::FrameSink;
use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use memmap::Mmap;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::PathBuf;

pub const SER_FILE_ID: &str = "LUCAM-RECORDER";
pub const HEADER_SIZE: usize = 178;
const FRAME_COUNT_OFFSET: u64 = 38;

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn read_i64(buf: &[u8], offset: usize) -> i64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[offset..offset + 8]);
    i64::from_le_bytes(b)
}

fn read_string(buf: &[u8], offset: usize, len: usize) -> String {
    String::from_utf8_lossy(&buf[offset..offset + len])
        .trim_end_matches(char::from(0))
        .trim()
        .to_string()
}

pub struct SerFile {
    pub source_file: String,
    map: Mmap,
    pub file_id: String,
    pub lu_id: i32,
    pub color_id: ColorFormatId,
    pub little_endian: i32,
    pub image_width: usize,
    pub image_height: usize,
    pub pixel_depth: usize,
    pub frame_count: usize,
    pub observer: String,
    pub instrument: String,
    pub telescope: String,
    pub date_time: i64,
    pub date_time_utc: i64,
    position: usize,
}

impl SerFile {
    pub fn load_ser(file_path: &str) -> Result<SerFile> {
        let file = File::open(file_path)?;
        // Safety: the file is opened read only and not expected to change while mapped
        let map = unsafe { Mmap::map(&file)? };

        if map.len() < HEADER_SIZE {
            return Err(anyhow!(
                "{} is too short to be a SER file ({} bytes)",
                file_path,
                map.len()
            ));
        }

        let ser = SerFile {
            source_file: file_path.to_string(),
            file_id: read_string(&map, 0, 14),
            lu_id: read_i32(&map, 14),
            color_id: ColorFormatId::from_i32(read_i32(&map, 18))?,
            little_endian: read_i32(&map, 22),
            image_width: read_i32(&map, 26).max(0) as usize,
            image_height: read_i32(&map, 30).max(0) as usize,
            pixel_depth: read_i32(&map, 34).max(0) as usize,
            frame_count: read_i32(&map, 38).max(0) as usize,
            observer: read_string(&map, 42, 40),
            instrument: read_string(&map, 82, 40),
            telescope: read_string(&map, 122, 40),
            date_time: read_i64(&map, 162),
            date_time_utc: read_i64(&map, 170),
            map,
            position: 0,
        };
        ser.validate()?;
        Ok(ser)
    }

    fn bytes_per_sample(&self) -> usize {
        if self.pixel_depth <= 8 {
            1
        } else {
            2
        }
    }

    /// Bytes per frame, or an error when the header sizes overflow.
    pub fn frame_size_bytes(&self) -> Result<usize> {
        self.image_width
            .checked_mul(self.image_height)
            .and_then(|v| v.checked_mul(self.color_id.num_planes()))
            .and_then(|v| v.checked_mul(self.bytes_per_sample()))
            .ok_or_else(|| {
                anyhow!(
                    "SER frame size {}x{} is too large",
                    self.image_width,
                    self.image_height
                )
            })
    }

    pub fn validate(&self) -> Result<()> {
        if self.file_id != SER_FILE_ID {
            return Err(anyhow!("Invalid SER file id: '{}'", self.file_id));
        }
        if self.image_width == 0 || self.image_height == 0 {
            return Err(anyhow!(
                "Invalid SER frame size: {}x{}",
                self.image_width,
                self.image_height
            ));
        }
        if self.pixel_depth == 0 || self.pixel_depth > 16 {
            return Err(anyhow!("Unsupported pixel depth: {}", self.pixel_depth));
        }
        let expected = self
            .frame_size_bytes()?
            .checked_mul(self.frame_count)
            .and_then(|v| v.checked_add(HEADER_SIZE))
            .ok_or_else(|| anyhow!("SER frame count {} is too large", self.frame_count))?;
        if self.map.len() < expected {
            warn!(
                "SER file {} is truncated: {} bytes, expected at least {}",
                self.source_file,
                self.map.len(),
                expected
            );
        }
        Ok(())
    }

    fn sample(&self, data: &[u8], index: usize) -> u8 {
        if self.bytes_per_sample() == 1 {
            data[index]
        } else {
            let v = u16::from_le_bytes([data[index * 2], data[index * 2 + 1]]);
            (v >> (self.pixel_depth - 8)).min(255) as u8
        }
    }

    /// Frame `frame_num` as 8-bit RGB. Bayer data is not demosaiced and comes back as gray.
    pub fn get_frame(&self, frame_num: usize) -> Result<RgbImage> {
        if frame_num >= self.frame_count {
            return Err(anyhow!(
                "Frame {} out of range, file has {} frames",
                frame_num,
                self.frame_count
            ));
        }

        let size = self.frame_size_bytes()?;
        let data = frame_num
            .checked_mul(size)
            .and_then(|v| v.checked_add(HEADER_SIZE))
            .and_then(|start| start.checked_add(size).map(|end| start..end))
            .and_then(|range| self.map.get(range))
            .ok_or_else(|| anyhow!("Frame {} extends past the end of the file", frame_num))?;

        let w = self.image_width;
        let planes = self.color_id.num_planes();
        Ok(RgbImage::from_fn(
            self.image_width as u32,
            self.image_height as u32,
            |x, y| {
                let i = (y as usize * w + x as usize) * planes;
                match self.color_id {
                    ColorFormatId::Rgb => Rgb([
                        self.sample(data, i),
                        self.sample(data, i + 1),
                        self.sample(data, i + 2),
                    ]),
                    ColorFormatId::Bgr => Rgb([
                        self.sample(data, i + 2),
                        self.sample(data, i + 1),
                        self.sample(data, i),
                    ]),
                    _ => {
                        let v = self.sample(data, i);
                        Rgb([v, v, v])
                    }
                }
            },
        ))
    }

    pub fn print_header_details(&self) {
        println!("Source File: {}", self.source_file);
        println!("File ID: {}", self.file_id);
        println!("Camera Series ID: {}", self.lu_id);
        println!("Color ID: {:?}", self.color_id);
        println!("Little Endian: {}", self.little_endian);
        println!("Image Width: {}", self.image_width);
        println!("Image Height: {}", self.image_height);
        println!("Pixel Depth: {}", self.pixel_depth);
        println!("Frame Count: {}", self.frame_count);
        println!("Observer: {}", self.observer);
        println!("Instrument: {}", self.instrument);
        println!("Telescope: {}", self.telescope);
        println!("Date/Time: {}", self.date_time);
        println!("Date/Time (UTC): {}", self.date_time_utc);
    }
}

impl FrameSource for SerFile {
    fn frame_dimensions(&self) -> Option<(u32, u32)> {
        Some((self.image_width as u32, self.image_height as u32))
    }

    fn frame_count(&self) -> Option<usize> {
        Some(self.frame_count)
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.position >= self.frame_count {
            return Ok(None);
        }
        let frame = self.get_frame(self.position);
        self.position += 1;
        frame.map(Some)
    }
}

/// Writes 8-bit RGB SER video. The frame count in the header is filled in by `finish`.
pub struct SerWriter {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    size: (u32, u32),
    frames_written: usize,
}

impl SerWriter {
    pub fn new(file_path: &str) -> Self {
        SerWriter {
            path: PathBuf::from(file_path),
            writer: None,
            size: (0, 0),
            frames_written: 0,
        }
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    fn header(width: u32, height: u32) -> Vec<u8> {
        let mut h = Vec::with_capacity(HEADER_SIZE);
        h.extend_from_slice(SER_FILE_ID.as_bytes());
        h.extend_from_slice(&0i32.to_le_bytes());
        h.extend_from_slice(&(ColorFormatId::Rgb as i32).to_le_bytes());
        h.extend_from_slice(&0i32.to_le_bytes());
        h.extend_from_slice(&(width as i32).to_le_bytes());
        h.extend_from_slice(&(height as i32).to_le_bytes());
        h.extend_from_slice(&8i32.to_le_bytes());
        h.extend_from_slice(&0i32.to_le_bytes());
        h.resize(HEADER_SIZE, 0);
        h
    }
}

impl FrameSink for SerWriter {
    fn open(&mut self, width: u32, height: u32, fps: f64) -> Result<()> {
        // SER has no frame rate field
        info!(
            "Writing {}x{} SER video to {} (nominal {} fps)",
            width,
            height,
            self.path.display(),
            fps
        );
        let mut writer = BufWriter::new(File::create(&self.path)?);
        writer.write_all(&SerWriter::header(width, height))?;
        self.writer = Some(writer);
        self.size = (width, height);
        Ok(())
    }

    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != self.size {
            return Err(anyhow!(
                "Frame size {:?} does not match output size {:?}",
                frame.dimensions(),
                self.size
            ));
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("Frame written before sink was opened"))?;
        writer.write_all(frame.as_raw())?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.seek(SeekFrom::Start(FRAME_COUNT_OFFSET))?;
            writer.write_all(&(self.frames_written as i32).to_le_bytes())?;
            writer.flush()?;
        }
        Ok(())
    }
}
