//! Chart figures: inline SVG, PNG export and image loading for display.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ChartError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Bar,
    Line,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Figure {
    pub kind: ChartKind,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub points: Vec<(String, f64)>,
}

const SVG_WIDTH: f64 = 640.0;
const SVG_HEIGHT: f64 = 400.0;
const MARGIN_LEFT: f64 = 70.0;
const MARGIN_RIGHT: f64 = 20.0;
const MARGIN_TOP: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 90.0;

const PNG_WIDTH: u32 = 800;
const PNG_HEIGHT: u32 = 500;
const PNG_MARGIN: u32 = 40;

const BAR_COLOR: Rgb<u8> = Rgb([31, 119, 180]);
const AXIS_COLOR: Rgb<u8> = Rgb([60, 60, 60]);
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

impl Figure {
    /// Upper bound of the value axis; never zero so scaling stays finite.
    fn y_max(&self) -> f64 {
        let max = self.points.iter().map(|(_, v)| *v).fold(0.0_f64, f64::max);
        if max > 0.0 {
            max
        } else {
            1.0
        }
    }

    /// Self-contained SVG document for inline display.
    pub fn to_svg(&self) -> String {
        let plot_w = SVG_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
        let plot_h = SVG_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
        let baseline = MARGIN_TOP + plot_h;
        let y_max = self.y_max();
        let n = self.points.len().max(1) as f64;
        let slot = plot_w / n;

        let mut svg = String::new();
        let _ = write!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" class="chart" viewBox="0 0 {w} {h}" width="{w}" height="{h}" role="img">"#,
            w = SVG_WIDTH,
            h = SVG_HEIGHT
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="24" text-anchor="middle" font-size="16" font-weight="bold">{}</text>"#,
            SVG_WIDTH / 2.0,
            escape_xml(&self.title)
        );
        let _ = write!(
            svg,
            r##"<line x1="{l}" y1="{t}" x2="{l}" y2="{b}" stroke="#3c3c3c"/><line x1="{l}" y1="{b}" x2="{r}" y2="{b}" stroke="#3c3c3c"/>"##,
            l = MARGIN_LEFT,
            t = MARGIN_TOP,
            b = baseline,
            r = SVG_WIDTH - MARGIN_RIGHT
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="end" font-size="11">{}</text><text x="{}" y="{}" text-anchor="end" font-size="11">0</text>"#,
            MARGIN_LEFT - 6.0,
            MARGIN_TOP + 4.0,
            format_value(y_max),
            MARGIN_LEFT - 6.0,
            baseline
        );

        let mut line_points = Vec::with_capacity(self.points.len());
        for (i, (label, value)) in self.points.iter().enumerate() {
            let height = (value.max(0.0) / y_max) * plot_h;
            let x = MARGIN_LEFT + slot * i as f64;
            let center = x + slot / 2.0;
            match self.kind {
                ChartKind::Bar => {
                    let _ = write!(
                        svg,
                        r##"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="#1f77b4"><title>{}: {}</title></rect>"##,
                        x + slot * 0.1,
                        baseline - height,
                        slot * 0.8,
                        height,
                        escape_xml(label),
                        format_value(*value)
                    );
                }
                ChartKind::Line => {
                    line_points.push(format!("{:.1},{:.1}", center, baseline - height));
                    let _ = write!(
                        svg,
                        r##"<circle cx="{:.1}" cy="{:.1}" r="3" fill="#1f77b4"><title>{}: {}</title></circle>"##,
                        center,
                        baseline - height,
                        escape_xml(label),
                        format_value(*value)
                    );
                }
            }
            let _ = write!(
                svg,
                r#"<text x="{c:.1}" y="{y:.1}" font-size="10" text-anchor="end" transform="rotate(-40 {c:.1} {y:.1})">{label}</text>"#,
                c = center,
                y = baseline + 14.0,
                label = escape_xml(label)
            );
        }
        if !line_points.is_empty() {
            let _ = write!(
                svg,
                r##"<polyline points="{}" fill="none" stroke="#1f77b4" stroke-width="2"/>"##,
                line_points.join(" ")
            );
        }

        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="middle" font-size="12">{}</text>"#,
            MARGIN_LEFT + plot_w / 2.0,
            SVG_HEIGHT - 8.0,
            escape_xml(&self.x_label)
        );
        let _ = write!(
            svg,
            r#"<text x="16" y="{y}" text-anchor="middle" font-size="12" transform="rotate(-90 16 {y})">{}</text>"#,
            escape_xml(&self.y_label),
            y = MARGIN_TOP + plot_h / 2.0
        );
        svg.push_str("</svg>");
        svg
    }

    /// Rasterizes the figure and writes it as PNG, creating parent directories.
    pub fn save_png(&self, path: &Path) -> Result<(), ChartError> {
        if self.points.is_empty() {
            return Err(ChartError::NoPoints);
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ChartError::Io { path: parent.to_path_buf(), source })?;
        }

        let mut img = RgbImage::from_pixel(PNG_WIDTH, PNG_HEIGHT, BACKGROUND);
        let left = PNG_MARGIN;
        let right = PNG_WIDTH - PNG_MARGIN;
        let top = PNG_MARGIN;
        let bottom = PNG_HEIGHT - PNG_MARGIN;
        let plot_h = f64::from(bottom - top);
        let slot = f64::from(right - left) / self.points.len() as f64;
        let y_max = self.y_max();

        let y_of = |value: f64| -> f32 { (f64::from(bottom) - (value.max(0.0) / y_max) * plot_h) as f32 };

        let mut previous: Option<(f32, f32)> = None;
        for (i, (_, value)) in self.points.iter().enumerate() {
            let x0 = f64::from(left) + slot * i as f64;
            let y = y_of(*value);
            match self.kind {
                ChartKind::Bar => {
                    let start = (x0 + slot * 0.1).round() as i32;
                    let width = ((slot * 0.8).round() as u32).max(1);
                    let top_y = y.round() as i32;
                    let height = (bottom as i32 - top_y).max(1) as u32;
                    draw_filled_rect_mut(&mut img, Rect::at(start, top_y).of_size(width, height), BAR_COLOR);
                }
                ChartKind::Line => {
                    let x = (x0 + slot / 2.0) as f32;
                    if let Some(from) = previous {
                        draw_line_segment_mut(&mut img, from, (x, y), BAR_COLOR);
                    }
                    draw_filled_rect_mut(&mut img, Rect::at(x as i32 - 2, y as i32 - 2).of_size(5, 5), BAR_COLOR);
                    previous = Some((x, y));
                }
            }
        }
        let (left, top, right, bottom) = (left as f32, top as f32, right as f32, bottom as f32);
        draw_line_segment_mut(&mut img, (left, top), (left, bottom), AXIS_COLOR);
        draw_line_segment_mut(&mut img, (left, bottom), (right, bottom), AXIS_COLOR);

        img.save_with_format(path, ImageFormat::Png)?;
        debug!(path = %path.display(), "Saved chart image");
        Ok(())
    }

    /// Plain-text bars for terminal output.
    pub fn to_text(&self) -> String {
        const WIDTH: f64 = 40.0;
        let y_max = self.y_max();
        let label_width = self.points.iter().map(|(l, _)| l.chars().count()).max().unwrap_or(0);
        let mut out = format!("{}\n", self.title);
        for (label, value) in &self.points {
            let bar = "#".repeat(((value.max(0.0) / y_max) * WIDTH).round() as usize);
            let _ = writeln!(out, "{:<width$} | {} {}", label, bar, format_value(*value), width = label_width);
        }
        out
    }
}

/// Reads and decodes a chart image, returning it as a `data:` URI.
pub fn load_image_data_uri(path: &Path) -> Result<String, ChartError> {
    if !path.exists() {
        return Err(ChartError::NotFound(path.to_path_buf()));
    }
    let bytes = fs::read(path).map_err(|source| ChartError::Io { path: path.to_path_buf(), source })?;
    let format = image::guess_format(&bytes)?;
    // Decode fully so a corrupt file is reported instead of shown broken.
    image::load_from_memory_with_format(&bytes, format)?;
    let mime = match format {
        ImageFormat::Jpeg => "image/jpeg",
        _ => "image/png",
    };
    Ok(format!("data:{};base64,{}", mime, base64::engine::general_purpose::STANDARD.encode(&bytes)))
}

/// Deletes an exported chart once its bytes have been inlined. A file that is already gone is fine.
pub fn remove_export(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed exported chart"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove exported chart"),
    }
}

/// True for the image extensions charts are exported with.
pub fn is_image_path(path: &Path) -> bool {
    let name = path.to_string_lossy();
    name.ends_with(".png") || name.ends_with(".jpg")
}

pub fn chart_file_name(stamp: u128) -> PathBuf {
    PathBuf::from(format!("chart_{}.png", stamp))
}

/// Whole numbers print without decimals, others with two.
pub fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
