use std::path::Path;

use image::{Rgb, RgbImage};

use crate::Result;

const WIDTH: u32 = 1200;
const HEIGHT: u32 = 400;
const MARGIN: u32 = 20;
const DASH: u32 = 12;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([0, 0, 0]);
const CURVE: Rgb<u8> = Rgb([31, 119, 180]);
const THRESHOLD: Rgb<u8> = Rgb([214, 39, 40]);

// Maps values to image coordinates inside the margins.
struct Canvas {
    img: RgbImage,
    n: usize,
    max: f64,
}

impl Canvas {
    fn new(n: usize, max: f64) -> Self {
        Self {
            img: RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND),
            n,
            max,
        }
    }

    fn x(&self, idx: usize) -> i64 {
        let span = (WIDTH - 2 * MARGIN) as f64;
        let t = if self.n > 1 {
            idx as f64 / (self.n - 1) as f64
        } else {
            0.0
        };
        (MARGIN as f64 + t * span).round() as i64
    }

    fn y(&self, value: f64) -> i64 {
        let span = (HEIGHT - 2 * MARGIN) as f64;
        let t = if self.max > 0.0 {
            (value / self.max).clamp(0.0, 1.0)
        } else {
            0.0
        };
        ((HEIGHT - MARGIN) as f64 - t * span).round() as i64
    }

    fn put(&mut self, x: i64, y: i64, color: Rgb<u8>) {
        if x >= 0 && y >= 0 && (x as u32) < WIDTH && (y as u32) < HEIGHT {
            self.img.put_pixel(x as u32, y as u32, color);
        }
    }

    // Bresenham.
    fn line(&mut self, (x0, y0): (i64, i64), (x1, y1): (i64, i64), color: Rgb<u8>) {
        let (dx, dy) = ((x1 - x0).abs(), -(y1 - y0).abs());
        let (sx, sy) = (if x0 < x1 { 1 } else { -1 }, if y0 < y1 { 1 } else { -1 });
        let (mut x, mut y, mut err) = (x0, y0, dx + dy);
        loop {
            self.put(x, y, color);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }
}

/// Renders the per-frame ratio curve with a dashed threshold line and writes it to
/// `path`. The image format follows the file extension.
pub(crate) fn render_ratios(ratios: &[f64], threshold: f64, path: &Path) -> Result<()> {
    let max = ratios
        .iter()
        .copied()
        .filter(|r| r.is_finite())
        .fold(threshold, f64::max)
        * 1.05;
    let mut canvas = Canvas::new(ratios.len(), max);

    let (left, right) = (MARGIN as i64, (WIDTH - MARGIN) as i64);
    let (top, bottom) = (MARGIN as i64, (HEIGHT - MARGIN) as i64);
    canvas.line((left, bottom), (right, bottom), AXIS);
    canvas.line((left, top), (left, bottom), AXIS);

    let points: Vec<(i64, i64)> = ratios
        .iter()
        .enumerate()
        .map(|(i, &r)| (canvas.x(i), canvas.y(r)))
        .collect();
    match points.as_slice() {
        [single] => canvas.put(single.0, single.1, CURVE),
        _ => {
            for pair in points.windows(2) {
                canvas.line(pair[0], pair[1], CURVE);
            }
        }
    }

    let y = canvas.y(threshold);
    let mut x = left;
    while x < right {
        let end = (x + DASH as i64).min(right);
        canvas.line((x, y), (end, y), THRESHOLD);
        x += 2 * DASH as i64;
    }

    canvas.img.save(path)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_render_ratios() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratios.png");
        let ratios: Vec<f64> = (0..100).map(|i| (i % 5) as f64 * 10.0).collect();
        render_ratios(&ratios, 20.0, &path).unwrap();

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (WIDTH, HEIGHT));

        // Threshold line starts with a dash at the left margin.
        let canvas = Canvas::new(ratios.len(), 40.0 * 1.05);
        let y = canvas.y(20.0) as u32;
        assert_eq!(*img.get_pixel(MARGIN + 1, y), THRESHOLD);
    }

    #[test]
    fn test_render_to_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("ratios.png");
        assert!(render_ratios(&[1.0, 2.0], 20.0, &path).is_err());
    }
}
