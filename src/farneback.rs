//! Dense optical flow by two-frame polynomial expansion (Farneback), estimated
//! coarse-to-fine over a Gaussian pyramid.
//!
//! Each pixel neighbourhood is approximated by a quadratic polynomial. The
//! displacement between two frames is recovered from how the polynomial
//! coefficients change, averaged over a square window and iterated a fixed
//! number of times per pyramid level.

use crate::context::FlowParameters;
use crate::error::{MotionError, MotionResult};
use crate::flow::FlowEstimator;
use crate::frame::{FlowField, Roi};
use image::GrayImage;
use rayon::prelude::*;

/// Levels smaller than this on either side are not used.
const MIN_LEVEL_SIZE: f64 = 32.0;

/// Pixels closer than this to the border get their normal equations damped.
const BORDER: usize = 5;
const BORDER_WEIGHTS: [f32; BORDER] = [0.14, 0.14, 0.4472, 0.4472, 0.4472];

/// Regulariser added to the determinant of each 2x2 solve
const DET_EPSILON: f64 = 1e-3;

/// Interleaved multi-channel f32 raster.
#[derive(Debug, Clone)]
pub struct Plane {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl Plane {
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Plane {
            width,
            height,
            channels,
            data: vec![0.0; width * height * channels],
        }
    }

    pub fn from_gray(image: &GrayImage) -> Self {
        Plane {
            width: image.width() as usize,
            height: image.height() as usize,
            channels: 1,
            data: image.as_raw().iter().map(|v| *v as f32).collect(),
        }
    }

    fn row(&self, y: usize) -> &[f32] {
        let stride = self.width * self.channels;
        &self.data[y * stride..(y + 1) * stride]
    }

    fn scale_mut(&mut self, s: f32) {
        self.data.iter_mut().for_each(|v| *v *= s);
    }
}

fn round_half_even(v: f64) -> i64 {
    let r = v.round();
    if (v - v.trunc()).abs() == 0.5 && r as i64 % 2 != 0 {
        (r - v.signum()) as i64
    } else {
        r as i64
    }
}

fn reflect_101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let mut i = i;
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * n - 2 - i;
        } else {
            return i as usize;
        }
    }
}

/// 1D Gaussian kernel. With a non-positive sigma the small fixed binomial
/// kernels are used for sizes up to 7, otherwise sigma is derived from the size.
pub fn gaussian_kernel(ksize: usize, sigma: f64) -> Vec<f32> {
    if sigma <= 0.0 {
        match ksize {
            1 => return vec![1.0],
            3 => return vec![0.25, 0.5, 0.25],
            5 => return vec![0.0625, 0.25, 0.375, 0.25, 0.0625],
            7 => {
                return vec![
                    0.03125, 0.109375, 0.21875, 0.28125, 0.21875, 0.109375, 0.03125,
                ]
            }
            _ => {}
        }
    }

    let sigma = if sigma > 0.0 {
        sigma
    } else {
        ((ksize as f64 - 1.0) * 0.5 - 1.0) * 0.3 + 0.8
    };
    let scale2x = -0.5 / (sigma * sigma);
    let center = (ksize as f64 - 1.0) * 0.5;

    let k: Vec<f64> = (0..ksize)
        .map(|i| {
            let x = i as f64 - center;
            (scale2x * x * x).exp()
        })
        .collect();
    let sum: f64 = k.iter().sum();
    k.iter().map(|v| (v / sum) as f32).collect()
}

/// Separable Gaussian blur of a single channel plane with reflect-101 borders.
pub fn gaussian_blur(src: &Plane, ksize: usize, sigma: f64) -> Plane {
    let kernel = gaussian_kernel(ksize, sigma);
    let half = (ksize / 2) as isize;
    let (w, h) = (src.width, src.height);

    let mut tmp = Plane::new(w, h, 1);
    tmp.data
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, trow)| {
            let srow = src.row(y);
            for (x, out) in trow.iter_mut().enumerate() {
                *out = kernel
                    .iter()
                    .enumerate()
                    .map(|(i, k)| k * srow[reflect_101(x as isize + i as isize - half, w)])
                    .sum();
            }
        });

    let mut dst = Plane::new(w, h, 1);
    dst.data
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, drow)| {
            for (x, out) in drow.iter_mut().enumerate() {
                *out = kernel
                    .iter()
                    .enumerate()
                    .map(|(i, k)| {
                        k * tmp.data[reflect_101(y as isize + i as isize - half, h) * w + x]
                    })
                    .sum();
            }
        });
    dst
}

fn linear_taps(dst_i: usize, scale: f64, src_len: usize) -> (usize, usize, f32) {
    let f = ((dst_i as f64 + 0.5) * scale - 0.5) as f32;
    let mut s = f.floor() as isize;
    let mut frac = f - s as f32;
    if s < 0 {
        s = 0;
        frac = 0.0;
    }
    if s as usize >= src_len - 1 {
        s = src_len as isize - 1;
        frac = 0.0;
    }
    let s = s as usize;
    (s, (s + 1).min(src_len - 1), frac)
}

/// Bilinear resampling with pixel-center alignment.
pub fn resize_bilinear(src: &Plane, width: usize, height: usize) -> Plane {
    if width == src.width && height == src.height {
        return src.clone();
    }

    let cn = src.channels;
    let sx = src.width as f64 / width as f64;
    let sy = src.height as f64 / height as f64;
    let xtaps: Vec<(usize, usize, f32)> = (0..width)
        .map(|x| linear_taps(x, sx, src.width))
        .collect();

    let mut dst = Plane::new(width, height, cn);
    dst.data
        .par_chunks_mut(width * cn)
        .enumerate()
        .for_each(|(y, drow)| {
            let (y0, y1, fy) = linear_taps(y, sy, src.height);
            let r0 = src.row(y0);
            let r1 = src.row(y1);
            xtaps.iter().enumerate().for_each(|(x, (x0, x1, fx))| {
                for c in 0..cn {
                    let top = r0[x0 * cn + c] * (1.0 - fx) + r0[x1 * cn + c] * fx;
                    let bottom = r1[x0 * cn + c] * (1.0 - fx) + r1[x1 * cn + c] * fx;
                    drow[x * cn + c] = top * (1.0 - fy) + bottom * fy;
                }
            });
        });
    dst
}

/// Gaussian applicability and the inverse-covariance terms needed to turn
/// weighted moments into polynomial coefficients.
struct PolyKernel {
    g: Vec<f32>,
    xg: Vec<f32>,
    xxg: Vec<f32>,
    ig11: f32,
    ig03: f32,
    ig33: f32,
    ig55: f32,
}

impl PolyKernel {
    fn new(n: usize, sigma: f64) -> Self {
        let sigma = if sigma < f32::EPSILON as f64 {
            n as f64 * 0.3
        } else {
            sigma
        };

        let gd: Vec<f64> = (0..=2 * n)
            .map(|i| {
                let x = i as f64 - n as f64;
                (-x * x / (2.0 * sigma * sigma)).exp()
            })
            .collect();
        let s: f64 = gd.iter().sum();
        let g: Vec<f32> = gd.iter().map(|v| (v / s) as f32).collect();

        // Moments of the separable weight over the (2n+1)^2 neighbourhood, with the
        // basis ordered as 1, x, y, x^2, y^2, xy.
        let (mut g00, mut g11, mut g33, mut g55) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
        for y in 0..=2 * n {
            for x in 0..=2 * n {
                let fx = x as f64 - n as f64;
                let fy = y as f64 - n as f64;
                let w = g[y] as f64 * g[x] as f64;
                g00 += w;
                g11 += w * fx * fx;
                g33 += w * fx * fx * fx * fx;
                g55 += w * fx * fx * fy * fy;
            }
        }

        // The (1, x^2, y^2) block is [[g00, g11, g11], [g11, g33, g55], [g11, g55, g33]];
        // x, y and xy are decoupled.
        let (a, b, c, d) = (g00, g11, g33, g55);
        let det = a * (c * c - d * d) - b * (b * c - b * d) + b * (b * d - c * b);
        let inv01 = -(b * c - b * d) / det;
        let inv11 = (a * c - b * b) / det;

        let mut xg = Vec::with_capacity(2 * n + 1);
        let mut xxg = Vec::with_capacity(2 * n + 1);
        for (i, gv) in g.iter().enumerate() {
            let x = i as f32 - n as f32;
            xg.push(x * gv);
            xxg.push(x * x * gv);
        }

        PolyKernel {
            g,
            xg,
            xxg,
            ig11: (1.0 / b) as f32,
            ig03: inv01 as f32,
            ig33: inv11 as f32,
            ig55: (1.0 / d) as f32,
        }
    }
}

/// Per-pixel quadratic fit. Output channels are `(b_y, b_x, a_yy, a_xx, a_xy)`.
pub fn polynomial_expansion(src: &Plane, n: usize, sigma: f64) -> Plane {
    let k = PolyKernel::new(n, sigma);
    let (w, h) = (src.width, src.height);
    let mut dst = Plane::new(w, h, 5);

    dst.data
        .par_chunks_mut(w * 5)
        .enumerate()
        .for_each(|(y, drow)| {
            // Vertical pass: weighted sums of the 0th, 1st and 2nd moments in y.
            let mut row = vec![[0.0f32; 3]; w];
            let center = src.row(y);
            row.iter_mut()
                .zip(center.iter())
                .for_each(|(r, v)| *r = [v * k.g[n], 0.0, 0.0]);

            for i in 1..=n {
                let (g0, xg0, xxg0) = (k.g[n + i], k.xg[n + i], k.xxg[n + i]);
                let above = src.row(y.saturating_sub(i));
                let below = src.row((y + i).min(h - 1));
                for x in 0..w {
                    let p = above[x] + below[x];
                    row[x][0] += g0 * p;
                    row[x][1] += xg0 * (below[x] - above[x]);
                    row[x][2] += xxg0 * p;
                }
            }

            // Horizontal pass with replicated borders.
            for x in 0..w {
                let g0 = k.g[n];
                let mut b1 = row[x][0] * g0;
                let mut b2 = 0.0;
                let mut b3 = row[x][1] * g0;
                let mut b4 = 0.0;
                let mut b5 = row[x][2] * g0;
                let mut b6 = 0.0;

                for i in 1..=n {
                    let r = row[(x + i).min(w - 1)];
                    let l = row[x.saturating_sub(i)];
                    let (g0, xg0, xxg0) = (k.g[n + i], k.xg[n + i], k.xxg[n + i]);

                    let tg = r[0] + l[0];
                    b1 += tg * g0;
                    b4 += tg * xxg0;
                    b2 += (r[0] - l[0]) * xg0;
                    b3 += (r[1] + l[1]) * g0;
                    b6 += (r[1] - l[1]) * xg0;
                    b5 += (r[2] + l[2]) * g0;
                }

                let out = &mut drow[x * 5..x * 5 + 5];
                out[0] = b3 * k.ig11;
                out[1] = b2 * k.ig11;
                out[2] = b1 * k.ig03 + b5 * k.ig33;
                out[3] = b1 * k.ig03 + b4 * k.ig33;
                out[4] = b6 * k.ig55;
            }
        });
    dst
}

fn border_scale(x: usize, y: usize, width: usize, height: usize) -> f32 {
    let mut scale = 1.0;
    if x < BORDER {
        scale *= BORDER_WEIGHTS[x];
    }
    if x + BORDER >= width {
        scale *= BORDER_WEIGHTS[width - x - 1];
    }
    if y < BORDER {
        scale *= BORDER_WEIGHTS[y];
    }
    if y + BORDER >= height {
        scale *= BORDER_WEIGHTS[height - y - 1];
    }
    scale
}

/// Builds the per-pixel normal equations `(g_yy, g_xy, g_xx, h_y, h_x)` from the
/// expansions of both frames, sampling the second frame at the current flow.
fn update_matrices(r0: &Plane, r1: &Plane, flow: &Plane, m: &mut Plane) {
    let (w, h) = (r0.width, r0.height);

    m.data
        .par_chunks_mut(w * 5)
        .enumerate()
        .for_each(|(y, mrow)| {
            let frow = flow.row(y);
            let r0row = r0.row(y);

            for x in 0..w {
                let dx = frow[x * 2];
                let dy = frow[x * 2 + 1];
                let fx = x as f32 + dx;
                let fy = y as f32 + dy;
                let r0p = &r0row[x * 5..x * 5 + 5];

                // the last row and column still sample, with the far neighbour clamped
                let inside = fx >= 0.0 && fx <= (w - 1) as f32 && fy >= 0.0 && fy <= (h - 1) as f32;
                let (r2, r3, r4, r5, r6) = if inside {
                    let (x1, y1) = (fx.floor() as usize, fy.floor() as usize);
                    let (x2, y2) = ((x1 + 1).min(w - 1), (y1 + 1).min(h - 1));
                    let (fx, fy) = (fx - x1 as f32, fy - y1 as f32);
                    let a00 = (1.0 - fx) * (1.0 - fy);
                    let a01 = fx * (1.0 - fy);
                    let a10 = (1.0 - fx) * fy;
                    let a11 = fx * fy;
                    let (top, bottom) = (r1.row(y1), r1.row(y2));
                    let sample = |c: usize| {
                        a00 * top[x1 * 5 + c]
                            + a01 * top[x2 * 5 + c]
                            + a10 * bottom[x1 * 5 + c]
                            + a11 * bottom[x2 * 5 + c]
                    };
                    (
                        sample(0),
                        sample(1),
                        (r0p[2] + sample(2)) * 0.5,
                        (r0p[3] + sample(3)) * 0.5,
                        (r0p[4] + sample(4)) * 0.25,
                    )
                } else {
                    (0.0, 0.0, r0p[2], r0p[3], r0p[4] * 0.5)
                };

                let mut r2 = (r0p[0] - r2) * 0.5;
                let mut r3 = (r0p[1] - r3) * 0.5;
                r2 += r4 * dy + r6 * dx;
                r3 += r6 * dy + r5 * dx;

                let (mut r4, mut r5, mut r6) = (r4, r5, r6);
                if x < BORDER || x + BORDER >= w || y < BORDER || y + BORDER >= h {
                    let s = border_scale(x, y, w, h);
                    r2 *= s;
                    r3 *= s;
                    r4 *= s;
                    r5 *= s;
                    r6 *= s;
                }

                let out = &mut mrow[x * 5..x * 5 + 5];
                out[0] = r4 * r4 + r6 * r6;
                out[1] = (r4 + r5) * r6;
                out[2] = r5 * r5 + r6 * r6;
                out[3] = r4 * r2 + r6 * r3;
                out[4] = r6 * r2 + r5 * r3;
            }
        });
}

/// Box-averages the normal equations over `win_size` and solves each 2x2 system
/// for the new flow.
fn update_flow_blur(m: &Plane, flow: &mut Plane, win_size: usize) {
    let (w, h) = (m.width, m.height);
    let half = win_size / 2;
    let scale = 1.0 / (win_size * win_size) as f64;

    // vertical box sums, replicated borders
    let mut vsum = vec![0.0f64; w * h * 5];
    vsum.par_chunks_mut(w * 5)
        .enumerate()
        .for_each(|(y, vrow)| {
            for dy in 0..=2 * half {
                let sy = (y + dy).saturating_sub(half).min(h - 1);
                m.row(sy)
                    .iter()
                    .zip(vrow.iter_mut())
                    .for_each(|(s, v)| *v += *s as f64);
            }
        });

    flow.data
        .par_chunks_mut(w * 2)
        .enumerate()
        .for_each(|(y, frow)| {
            let vrow = &vsum[y * w * 5..(y + 1) * w * 5];
            for x in 0..w {
                let mut hs = [0.0f64; 5];
                for dx in 0..=2 * half {
                    let sx = (x + dx).saturating_sub(half).min(w - 1);
                    for c in 0..5 {
                        hs[c] += vrow[sx * 5 + c];
                    }
                }

                let g11 = hs[0] * scale;
                let g12 = hs[1] * scale;
                let g22 = hs[2] * scale;
                let h1 = hs[3] * scale;
                let h2 = hs[4] * scale;

                let idet = 1.0 / (g11 * g22 - g12 * g12 + DET_EPSILON);
                frow[x * 2] = ((g11 * h2 - g12 * h1) * idet) as f32;
                frow[x * 2 + 1] = ((g22 * h1 - g12 * h2) * idet) as f32;
            }
        });
}

/// Number of usable coarse levels for an image of this size.
pub fn usable_levels(width: usize, height: usize, params: &FlowParameters) -> usize {
    let mut scale = 1.0;
    let mut levels = 0;
    for k in 0..params.levels {
        scale *= params.pyr_scale;
        if (width as f64) * scale < MIN_LEVEL_SIZE || (height as f64) * scale < MIN_LEVEL_SIZE {
            break;
        }
        levels = k + 1;
    }
    levels
}

/// Two-channel `(dx, dy)` flow from `prev` to `next`.
pub fn calc_flow(prev: &Plane, next: &Plane, params: &FlowParameters) -> Plane {
    let levels = usable_levels(prev.width, prev.height, params);
    let mut prev_flow: Option<Plane> = None;

    for k in (0..=levels).rev() {
        let scale = (0..k).fold(1.0, |s, _| s * params.pyr_scale);
        let sigma = (1.0 / scale - 1.0) * 0.5;
        let smooth_sz = ((round_half_even(sigma * 5.0) | 1) as usize).max(3);
        let width = round_half_even(prev.width as f64 * scale) as usize;
        let height = round_half_even(prev.height as f64 * scale) as usize;

        let mut flow = match &prev_flow {
            Some(pf) => {
                let mut f = resize_bilinear(pf, width, height);
                f.scale_mut((1.0 / params.pyr_scale) as f32);
                f
            }
            None => Plane::new(width, height, 2),
        };

        let expand = |img: &Plane| {
            let blurred = gaussian_blur(img, smooth_sz, sigma);
            let level = resize_bilinear(&blurred, width, height);
            polynomial_expansion(&level, params.poly_n, params.poly_sigma)
        };
        let r0 = expand(prev);
        let r1 = expand(next);

        let mut m = Plane::new(width, height, 5);
        update_matrices(&r0, &r1, &flow, &mut m);
        for i in 0..params.iterations {
            update_flow_blur(&m, &mut flow, params.win_size);
            if i + 1 < params.iterations {
                update_matrices(&r0, &r1, &flow, &mut m);
            }
        }

        prev_flow = Some(flow);
    }

    prev_flow.unwrap_or_else(|| Plane::new(prev.width, prev.height, 2))
}

/// Dense flow estimator with fixed parameters, evaluated on the ROI crop only.
#[derive(Debug, Clone, Copy, Default)]
pub struct Farneback {
    pub params: FlowParameters,
}

impl Farneback {
    pub fn new(params: FlowParameters) -> Self {
        Farneback { params }
    }
}

impl FlowEstimator for Farneback {
    fn estimate(&self, previous: &GrayImage, current: &GrayImage, roi: &Roi) -> MotionResult<FlowField> {
        if previous.dimensions() != current.dimensions() {
            return Err(MotionError::FrameMismatch {
                width: previous.width(),
                height: previous.height(),
                found_width: current.width(),
                found_height: current.height(),
            });
        }
        roi.validate(previous.width(), previous.height())?;

        let prev = Plane::from_gray(&roi.crop(previous));
        let next = Plane::from_gray(&roi.crop(current));
        let flow = calc_flow(&prev, &next, &self.params);

        FlowField::from_vec(
            flow.width,
            flow.height,
            flow.data.chunks_exact(2).map(|c| [c[0], c[1]]).collect(),
        )
    }
}
