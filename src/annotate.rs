use crate::frame::{FlowField, MagnitudeField, Roi};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;
use itertools::iproduct;

pub const ARROW_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const ROI_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const LINE_THICKNESS: u32 = 2;
pub const TIP_LENGTH: f32 = 0.05;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ArrowOptions {
    pub stride: usize,
    pub max_length: f32,
    pub min_magnitude: f32,
}

impl Default for ArrowOptions {
    fn default() -> Self {
        ArrowOptions {
            stride: 10,
            max_length: 5.0,
            min_magnitude: 1.0,
        }
    }
}

/// One flow arrow in full-frame pixel coordinates.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Arrow {
    pub start: (i32, i32),
    pub end: (i32, i32),
}

impl Arrow {
    pub fn length(&self) -> f32 {
        let dx = (self.end.0 - self.start.0) as f32;
        let dy = (self.end.1 - self.start.1) as f32;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Arrows for every grid sample in the ROI whose magnitude exceeds the minimum.
/// Each arrow follows the flow direction and is at most `max_length` long.
pub fn plan_arrows(
    flow: &FlowField,
    roi: &Roi,
    magnitude: &MagnitudeField,
    opts: &ArrowOptions,
) -> Vec<Arrow> {
    let stride = opts.stride.max(1);

    iproduct!(
        (0..flow.height).step_by(stride),
        (0..flow.width).step_by(stride)
    )
    .filter_map(|(y, x)| {
        let mag = magnitude.get(x, y);
        if mag <= opts.min_magnitude {
            return None;
        }

        let [dx, dy] = flow.get(x, y);
        let length = mag.min(opts.max_length);
        let sx = roi.x as i32 + x as i32;
        let sy = roi.y as i32 + y as i32;

        // offsets truncate toward the start point so the arrow never grows past `length`
        Some(Arrow {
            start: (sx, sy),
            end: (
                sx + (length * dx / mag).trunc() as i32,
                sy + (length * dy / mag).trunc() as i32,
            ),
        })
    })
    .collect()
}

fn draw_thick_line(canvas: &mut RgbImage, a: (i32, i32), b: (i32, i32), color: Rgb<u8>) {
    let horizontal = (b.0 - a.0).abs() >= (b.1 - a.1).abs();
    (0..LINE_THICKNESS as i32).for_each(|t| {
        let (ox, oy) = if horizontal { (0, t) } else { (t, 0) };
        draw_line_segment_mut(
            canvas,
            ((a.0 + ox) as f32, (a.1 + oy) as f32),
            ((b.0 + ox) as f32, (b.1 + oy) as f32),
            color,
        );
    });
}

pub fn draw_arrow(canvas: &mut RgbImage, arrow: &Arrow, color: Rgb<u8>) {
    draw_thick_line(canvas, arrow.start, arrow.end, color);

    let tip_size = arrow.length() as f64 * TIP_LENGTH as f64;
    let angle = ((arrow.start.1 - arrow.end.1) as f64).atan2((arrow.start.0 - arrow.end.0) as f64);
    [std::f64::consts::FRAC_PI_4, -std::f64::consts::FRAC_PI_4]
        .iter()
        .for_each(|barb| {
            let p = (
                (arrow.end.0 as f64 + tip_size * (angle + barb).cos()).round() as i32,
                (arrow.end.1 as f64 + tip_size * (angle + barb).sin()).round() as i32,
            );
            draw_thick_line(canvas, p, arrow.end, color);
        });
}

pub fn draw_roi(canvas: &mut RgbImage, roi: &Roi, color: Rgb<u8>) {
    let (x0, y0) = (roi.x as i32, roi.y as i32);
    let (x1, y1) = (x0 + roi.width as i32, y0 + roi.height as i32);
    draw_thick_line(canvas, (x0, y0), (x1, y0), color);
    draw_thick_line(canvas, (x0, y1), (x1, y1), color);
    draw_thick_line(canvas, (x0, y0), (x0, y1), color);
    draw_thick_line(canvas, (x1, y0), (x1, y1), color);
}

/// Copy of `frame` with the ROI outline and the sampled flow arrows drawn on it.
pub fn annotate_frame(
    frame: &RgbImage,
    flow: &FlowField,
    roi: &Roi,
    magnitude: &MagnitudeField,
    opts: &ArrowOptions,
) -> RgbImage {
    let mut out = frame.clone();
    plan_arrows(flow, roi, magnitude, opts)
        .iter()
        .for_each(|arrow| draw_arrow(&mut out, arrow, ARROW_COLOR));
    draw_roi(&mut out, roi, ROI_COLOR);
    out
}
