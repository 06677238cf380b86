use crate::datasource::FrameSource;
use crate::framesink::FrameSink;
use anyhow::{anyhow, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Frames stored as individual image files, played back in the given order.
pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    position: usize,
}

impl ImageSequenceSource {
    pub fn from_files(files: &[String]) -> Self {
        ImageSequenceSource {
            files: files.iter().map(PathBuf::from).collect(),
            position: 0,
        }
    }

    /// Every image file in `dir`, sorted by file name.
    pub fn from_directory(dir: &str) -> Result<Self> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_image_file(p))
            .collect();
        files.sort();
        info!("Found {} image frames in {}", files.len(), dir);

        Ok(ImageSequenceSource {
            files,
            position: 0,
        })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

impl FrameSource for ImageSequenceSource {
    fn frame_dimensions(&self) -> Option<(u32, u32)> {
        self.files
            .first()
            .and_then(|f| image::image_dimensions(f).ok())
    }

    fn frame_count(&self) -> Option<usize> {
        Some(self.files.len())
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if let Some(path) = self.files.get(self.position) {
            self.position += 1;
            let img = image::open(path)
                .map_err(|e| anyhow!("Failed to decode {}: {}", path.display(), e))?;
            Ok(Some(img.to_rgb8()))
        } else {
            Ok(None)
        }
    }
}

/// Writes frames as `frame_000000.png`, `frame_000001.png`, ... into a directory
/// that is only created when the sink is opened.
pub struct ImageSequenceSink {
    output_dir: PathBuf,
    frames_written: usize,
    size: Option<(u32, u32)>,
}

impl ImageSequenceSink {
    pub fn new(output_dir: &str) -> Self {
        ImageSequenceSink {
            output_dir: PathBuf::from(output_dir),
            frames_written: 0,
            size: None,
        }
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    pub fn frame_path(&self, index: usize) -> PathBuf {
        self.output_dir.join(format!("frame_{:06}.png", index))
    }
}

impl FrameSink for ImageSequenceSink {
    fn open(&mut self, width: u32, height: u32, fps: f64) -> Result<()> {
        info!(
            "Writing {}x{} frames at {} fps to {}",
            width,
            height,
            fps,
            self.output_dir.display()
        );
        std::fs::create_dir_all(&self.output_dir)?;
        self.size = Some((width, height));
        Ok(())
    }

    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        match self.size {
            None => Err(anyhow!("Frame written before sink was opened")),
            Some(size) if size != frame.dimensions() => Err(anyhow!(
                "Frame size {:?} does not match output size {:?}",
                frame.dimensions(),
                size
            )),
            Some(_) => {
                frame.save(self.frame_path(self.frames_written))?;
                self.frames_written += 1;
                Ok(())
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        info!("Wrote {} frames", self.frames_written);
        Ok(())
    }
}
