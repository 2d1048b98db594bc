use std::io;
use std::path::Path;

use ndarray::Array2;
use plotters::prelude::*;

use super::{MidSlices, Volume};

/// Gap between panels in the comparison image, in pixels.
const PANEL_GAP: u32 = 4;

/// Input and reconstruction mid-planes side by side.
///
/// Rows are the X, Y and Z planes; the left column is the input volume and the
/// right column its reconstruction.
#[derive(Debug, Clone)]
pub struct SliceComparison {
    pub input: MidSlices,
    pub reconstruction: MidSlices,
}

impl SliceComparison {
    pub fn new(input: &Volume, reconstruction: &Volume) -> Self {
        Self {
            input: input.mid_slices(),
            reconstruction: reconstruction.mid_slices(),
        }
    }

    /// All six planes tagged `input_Z`, ..., `recon_X`.
    pub fn named_planes(&self) -> Vec<(String, &Array2<f32>)> {
        let mut planes = Vec::with_capacity(6);
        for (prefix, slices) in [("input", &self.input), ("recon", &self.reconstruction)] {
            for (axis, plane) in slices.planes() {
                planes.push((format!("{prefix}_{axis}"), plane));
            }
        }
        planes
    }

    /// Renders the 3x2 grayscale grid. Each panel is scaled to its own
    /// min/max, like an auto-ranged image display.
    pub fn to_png<P: AsRef<Path>>(&self, path: P, scale: u32) -> io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let scale = scale.max(1);
        let rows = [
            (&self.input.x, &self.reconstruction.x),
            (&self.input.y, &self.reconstruction.y),
            (&self.input.z, &self.reconstruction.z),
        ];
        let panel_w = rows
            .iter()
            .map(|(plane, _)| plane.ncols() as u32 * scale)
            .max()
            .unwrap_or(1);
        let row_heights: Vec<u32> = rows
            .iter()
            .map(|(plane, _)| plane.nrows() as u32 * scale)
            .collect();
        let width = panel_w * 2 + PANEL_GAP * 3;
        let height = row_heights.iter().sum::<u32>() + PANEL_GAP * (rows.len() as u32 + 1);

        let backend = BitMapBackend::new(path, (width, height));
        let drawing_area = backend.into_drawing_area();
        drawing_area
            .fill(&RGBColor(0, 0, 0))
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;

        let mut top = PANEL_GAP;
        for ((input, recon), row_height) in rows.iter().zip(row_heights.iter()) {
            let mut left = PANEL_GAP;
            for plane in [*input, *recon] {
                draw_plane(&drawing_area, plane, (left, top), scale)?;
                left += panel_w + PANEL_GAP;
            }
            top += row_height + PANEL_GAP;
        }

        drawing_area
            .present()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))
    }
}

fn draw_plane<DB: DrawingBackend>(
    area: &DrawingArea<DB, plotters::coord::Shift>,
    plane: &Array2<f32>,
    origin: (u32, u32),
    scale: u32,
) -> io::Result<()> {
    let (min, max) = plane
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = if max > min { max - min } else { 1.0 };

    for ((row, col), &value) in plane.indexed_iter() {
        let shade = gray_level((value - min) / range);
        let x0 = (origin.0 + col as u32 * scale) as i32;
        let y0 = (origin.1 + row as u32 * scale) as i32;
        let block = Rectangle::new(
            [(x0, y0), (x0 + scale as i32 - 1, y0 + scale as i32 - 1)],
            RGBColor(shade, shade, shade).filled(),
        );
        area.draw(&block)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;
    }
    Ok(())
}

fn gray_level(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn test_named_planes_cover_both_volumes() {
        let input = Volume::zeros((4, 4, 4));
        let recon = Volume::from_array(Array4::from_elem((1, 4, 4, 4), 0.5)).expect("volume");
        let comparison = SliceComparison::new(&input, &recon);
        let names: Vec<_> = comparison
            .named_planes()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(
            names,
            ["input_Z", "input_Y", "input_X", "recon_Z", "recon_Y", "recon_X"]
        );
    }

    #[test]
    fn test_gray_level_clamps() {
        assert_eq!(gray_level(-0.5), 0);
        assert_eq!(gray_level(0.5), 128);
        assert_eq!(gray_level(2.0), 255);
    }

    #[test]
    fn test_png_written() {
        let input = Volume::zeros((4, 6, 8));
        let comparison = SliceComparison::new(&input, &input);
        let mut path = std::env::temp_dir();
        path.push(format!("cinebrain_slices_{}.png", uuid::Uuid::new_v4()));
        comparison.to_png(&path, 2).expect("render");
        let written = std::fs::metadata(&path).expect("file exists").len();
        std::fs::remove_file(&path).ok();
        assert!(written > 0);
    }
}
