use image::GrayImage;
use imageproc::contrast::equalize_histogram;
use imageproc::filter::box_filter;

pub const DEFAULT_KERNEL_SIZE: u32 = 5;

/// Global histogram equalization followed by a `kernel_size` x `kernel_size` mean filter.
/// The input is left untouched.
pub fn preprocess_frame(frame: &GrayImage, kernel_size: u32) -> GrayImage {
    let equalized = equalize_histogram(frame);
    smooth(&equalized, kernel_size)
}

pub fn smooth(frame: &GrayImage, kernel_size: u32) -> GrayImage {
    let radius = kernel_size / 2;
    if radius == 0 {
        return frame.clone();
    }
    box_filter(frame, radius, radius)
}
