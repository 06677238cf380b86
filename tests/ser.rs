use anyhow::Result;
use image::{Rgb, RgbImage};
use roiflow::context::MeasureParameters;
use roiflow::datasource::{ColorFormatId, FrameSource, MemorySource};
use roiflow::framesink::FrameSink;
use roiflow::pipeline::MotionPipeline;
use roiflow::ser::{SerFile, SerWriter, HEADER_SIZE};

fn gradient(width: u32, height: u32, offset: u8) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x as u8).wrapping_add(offset),
            y as u8,
            (x + y) as u8 / 2,
        ])
    })
}

#[test]
fn test_ser_write_then_read() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("out.ser");
    let path = path.to_str().unwrap();

    let frames = vec![gradient(32, 24, 0), gradient(32, 24, 7), gradient(32, 24, 50)];
    let mut writer = SerWriter::new(path);
    writer.open(32, 24, 30.0)?;
    for f in frames.iter() {
        writer.write_frame(f)?;
    }
    writer.finish()?;
    assert_eq!(writer.frames_written(), 3);

    let mut ser = SerFile::load_ser(path)?;
    assert_eq!(ser.color_id, ColorFormatId::Rgb);
    assert_eq!(ser.image_width, 32);
    assert_eq!(ser.image_height, 24);
    assert_eq!(ser.pixel_depth, 8);
    assert_eq!(ser.frame_count, 3);
    assert_eq!(ser.frame_dimensions(), Some((32, 24)));

    for expected in frames.iter() {
        let frame = ser.next_frame()?.unwrap();
        assert_eq!(&frame, expected);
    }
    assert!(ser.next_frame()?.is_none());
    assert!(ser.get_frame(3).is_err());
    Ok(())
}

#[test]
fn test_ser_writer_rejects_wrong_size() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("out.ser");
    let mut writer = SerWriter::new(path.to_str().unwrap());
    writer.open(32, 24, 30.0)?;
    assert!(writer.write_frame(&gradient(16, 16, 0)).is_err());
    Ok(())
}

#[test]
fn test_ser_writer_creates_nothing_before_open() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("never.ser");
    let mut writer = SerWriter::new(path.to_str().unwrap());
    assert!(writer.write_frame(&gradient(4, 4, 0)).is_err());
    assert!(!path.exists());
    Ok(())
}

#[test]
fn test_short_file_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("short.ser");
    std::fs::write(&path, vec![0u8; HEADER_SIZE / 2])?;
    assert!(SerFile::load_ser(path.to_str().unwrap()).is_err());
    Ok(())
}

#[test]
fn test_bad_file_id_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("bad.ser");
    let mut bytes = vec![0u8; HEADER_SIZE];
    bytes[..14].copy_from_slice(b"NOT-A-SER-FILE");
    std::fs::write(&path, bytes)?;
    assert!(SerFile::load_ser(path.to_str().unwrap()).is_err());
    Ok(())
}

fn ser_header(color: i32, width: i32, height: i32, depth: i32, frames: i32) -> Vec<u8> {
    let mut bytes = vec![0u8; HEADER_SIZE];
    bytes[..14].copy_from_slice(b"LUCAM-RECORDER");
    [(18, color), (26, width), (30, height), (34, depth), (38, frames)]
        .iter()
        .for_each(|(offset, v)| bytes[*offset..*offset + 4].copy_from_slice(&v.to_le_bytes()));
    bytes
}

#[test]
fn test_oversized_frame_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("huge.ser");
    std::fs::write(&path, ser_header(100, i32::MAX, i32::MAX, 16, 1))?;
    assert!(SerFile::load_ser(path.to_str().unwrap()).is_err());
    Ok(())
}

#[test]
fn test_oversized_frame_count_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("many.ser");
    std::fs::write(&path, ser_header(100, 65536, 65536, 16, i32::MAX))?;
    assert!(SerFile::load_ser(path.to_str().unwrap()).is_err());
    Ok(())
}

#[test]
fn test_frame_past_end_of_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("truncated.ser");
    let mut bytes = ser_header(0, 8, 8, 8, 2);
    bytes.extend_from_slice(&[7u8; 64]);
    std::fs::write(&path, bytes)?;

    let ser = SerFile::load_ser(path.to_str().unwrap())?;
    assert_eq!(ser.frame_size_bytes()?, 64);
    assert_eq!(ser.get_frame(0)?.get_pixel(3, 3), &Rgb([7, 7, 7]));
    assert!(ser.get_frame(1).is_err());
    Ok(())
}

#[test]
fn test_measure_ser_to_ser() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.ser");
    let output = dir.path().join("annotated.ser");

    let mut writer = SerWriter::new(input.to_str().unwrap());
    writer.open(640, 480, 30.0)?;
    for _ in 0..4 {
        writer.write_frame(&RgbImage::from_pixel(640, 480, Rgb([40, 40, 40])))?;
    }
    writer.finish()?;

    let mut source = SerFile::load_ser(input.to_str().unwrap())?;
    let mut sink = SerWriter::new(output.to_str().unwrap());
    let report = MotionPipeline::new(&MeasureParameters::default())?.run(
        &mut source,
        &mut sink,
        |_| {},
    )?;
    assert_eq!(report.frame_count, 3);
    assert_eq!(report.total_distance, 0.0);

    let annotated = SerFile::load_ser(output.to_str().unwrap())?;
    assert_eq!(annotated.frame_count, 3);
    assert_eq!((annotated.image_width, annotated.image_height), (640, 480));
    // ROI outline drawn in blue at its top-left corner
    assert_eq!(annotated.get_frame(0)?.get_pixel(200, 200), &Rgb([0, 0, 255]));
    Ok(())
}

#[test]
fn test_missing_output_never_created_for_empty_input() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("annotated.ser");
    let mut sink = SerWriter::new(output.to_str().unwrap());
    let result = MotionPipeline::new(&MeasureParameters::default())?.run(
        &mut MemorySource::new(vec![]),
        &mut sink,
        |_| {},
    );
    assert!(result.is_err());
    assert!(!output.exists());
    Ok(())
}
