//! Per-item phase writers.
//!
//! Synchronous file work, invoked from the runner inside `spawn_blocking`.
//! Each phase writes into its own subdirectory of the job's working
//! directory; the runner creates the subdirectories up front.

use std::fs;
use std::path::Path;

use image::{Rgba, RgbaImage};
use serde_json::json;

use annolab_core::error::{CoreError, CoreResult};
use annolab_core::export::ExportPhase;
use annolab_core::types::{DbId, JobId};

use crate::source::ExportItem;

/// Outline color for rendered annotation overlays.
const OUTLINE_COLOR: Rgba<u8> = Rgba([255, 64, 64, 255]);

/// Write one item for a per-item phase.
///
/// `WriteDocumentation` is not per-item and is handled by
/// [`write_documentation`] instead.
pub fn write_item(phase: ExportPhase, workdir: &Path, item: &ExportItem) -> CoreResult<()> {
    match phase {
        ExportPhase::CopyOriginals => copy_original(workdir, item),
        ExportPhase::RenderVisualizations => render_visualization(workdir, item),
        ExportPhase::EmitAnnotations => emit_annotations(workdir, item),
        ExportPhase::ComputeMetrics => write_metrics(workdir, item),
        ExportPhase::WriteDocumentation => Err(CoreError::Internal(
            "documentation phase has no per-item writer".to_string(),
        )),
    }
}

/// Copy the original encoded bytes into `originals/`.
fn copy_original(workdir: &Path, item: &ExportItem) -> CoreResult<()> {
    let path = workdir
        .join(ExportPhase::CopyOriginals.subdir())
        .join(format!("{}.png", item.name));
    fs::write(&path, &item.image_bytes)
        .map_err(|e| CoreError::Internal(format!("failed to copy {}: {e}", item.name)))
}

/// Render polygon outlines over the image into `visualizations/`.
fn render_visualization(workdir: &Path, item: &ExportItem) -> CoreResult<()> {
    let decoded = image::load_from_memory(&item.image_bytes)
        .map_err(|e| CoreError::Internal(format!("failed to decode {}: {e}", item.name)))?;
    let mut canvas = decoded.to_rgba8();

    for polygon in &item.polygons {
        draw_outline(&mut canvas, &polygon.points);
    }

    let path = workdir
        .join(ExportPhase::RenderVisualizations.subdir())
        .join(format!("{}.png", item.name));
    canvas
        .save(&path)
        .map_err(|e| CoreError::Internal(format!("failed to render {}: {e}", item.name)))
}

/// Emit the item's polygons as JSON into `annotations/`.
fn emit_annotations(workdir: &Path, item: &ExportItem) -> CoreResult<()> {
    let payload = json!({
        "image_id": item.image_id,
        "polygons": item.polygons.iter().map(|polygon| {
            json!({
                "points": polygon.points,
                "confidence": polygon.confidence,
                "area": polygon.area(),
            })
        }).collect::<Vec<_>>(),
    });

    let path = workdir
        .join(ExportPhase::EmitAnnotations.subdir())
        .join(format!("{}.json", item.name));
    write_json(&path, &payload, &item.name)
}

/// Compute per-image polygon metrics into `metrics/`.
fn write_metrics(workdir: &Path, item: &ExportItem) -> CoreResult<()> {
    let total_area: f64 = item.polygons.iter().map(|polygon| polygon.area()).sum();
    let mean_confidence = if item.polygons.is_empty() {
        0.0
    } else {
        item.polygons
            .iter()
            .map(|polygon| polygon.confidence as f64)
            .sum::<f64>()
            / item.polygons.len() as f64
    };

    let payload = json!({
        "image_id": item.image_id,
        "polygon_count": item.polygons.len(),
        "total_area": total_area,
        "mean_confidence": mean_confidence,
    });

    let path = workdir
        .join(ExportPhase::ComputeMetrics.subdir())
        .join(format!("{}.json", item.name));
    write_json(&path, &payload, &item.name)
}

/// Write the export manifest at the working-directory root.
///
/// Single-item phase: runs once per job.
pub fn write_documentation(
    workdir: &Path,
    job_id: JobId,
    project_id: DbId,
    enabled_phases: &[ExportPhase],
    item_count: usize,
) -> CoreResult<()> {
    let phase_list = enabled_phases
        .iter()
        .map(|phase| format!("- {}", phase.as_str()))
        .collect::<Vec<_>>()
        .join("\n");

    let contents = format!(
        "# Export {job_id}\n\n\
         Project: {project_id}\n\
         Images: {item_count}\n\n\
         ## Contents\n\n{phase_list}\n",
    );

    fs::write(workdir.join("README.md"), contents)
        .map_err(|e| CoreError::Internal(format!("failed to write manifest: {e}")))
}

fn write_json(path: &Path, payload: &serde_json::Value, name: &str) -> CoreResult<()> {
    let bytes = serde_json::to_vec_pretty(payload)
        .map_err(|e| CoreError::Internal(format!("failed to serialize {name}: {e}")))?;
    fs::write(path, bytes)
        .map_err(|e| CoreError::Internal(format!("failed to write {name}: {e}")))
}

/// Plot a closed polygon outline onto the canvas.
fn draw_outline(canvas: &mut RgbaImage, points: &[[f32; 2]]) {
    if points.len() < 2 {
        return;
    }
    for i in 0..points.len() {
        let a = points[i];
        let b = points[(i + 1) % points.len()];
        draw_line(canvas, a, b);
    }
}

/// Plot a line segment by uniform stepping. Out-of-bounds pixels are skipped.
fn draw_line(canvas: &mut RgbaImage, a: [f32; 2], b: [f32; 2]) {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    let steps = dx.abs().max(dy.abs()).ceil().max(1.0) as u32;

    for step in 0..=steps {
        let t = step as f32 / steps as f32;
        let x = a[0] + dx * t;
        let y = a[1] + dy * t;
        if x >= 0.0 && y >= 0.0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
            canvas.put_pixel(x as u32, y as u32, OUTLINE_COLOR);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
