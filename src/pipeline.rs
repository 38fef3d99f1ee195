//! Derivative pipeline: one staged folder batch in, three derivative kinds
//! out, originals gone.
//!
//! For every staged image:
//!
//! 1. **Pre-normalize** — images over the configured bounding box are shrunk
//!    (aspect preserved, no cropping) onto an opaque white canvas of exactly
//!    that box, purely to bound the memory and compute cost of matting.
//! 2. **Background removal** — the [`Matting`] collaborator turns the image
//!    into an alpha-matted cutout. Failures are isolated per image.
//! 3. **Full-size cutout** — saved as PNG at the batch root under the
//!    original base name.
//! 4. **Thumbnail** — fit-and-pad into the thumbnail box (default 400×270)
//!    with transparent fill, under the thumbnail sub-directory.
//! 5. **Icon (first-wins)** — the first image processed per folder per run
//!    also produces a square icon (default 500×500); the folder is then
//!    marked in the [`RunContext`] and no further icon is written.
//!
//! After all images, every original source file at the batch root is
//! deleted — generated derivatives and the sub-directories are never
//! touched. Re-running on the same folder is therefore harmless: there are
//! no originals left to process.
//!
//! ## Output layout
//!
//! ```text
//! staging/W004-HB/
//! ├── W004-HB-01.png       # full-size cutout (original W004-HB-01.jpg deleted)
//! ├── images/
//! │   └── W004-HB-01.png   # 400×270 padded thumbnail
//! └── PNG/
//!     └── W004-HB-01.png   # 500×500 padded icon, first image only
//! ```

use crate::imaging::{
    self, ImagingError, TRANSPARENT, fit_and_pad, load_from_bytes, pre_normalize,
};
use crate::matting::Matting;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("imaging error: {0}")]
    Imaging(#[from] ImagingError),
}

/// Canvas sizes, fill targets, and output sub-locations.
///
/// One configuration struct instead of one pipeline per variant: every
/// historical rewrite of this pipeline differed only in these values.
#[derive(Debug, Clone)]
pub struct DerivativeConfig {
    /// Pre-normalization bounding box for matting inputs.
    pub pre_box: (u32, u32),
    /// Thumbnail canvas. Deliberately non-square.
    pub thumbnail_box: (u32, u32),
    /// Icon canvas.
    pub icon_box: (u32, u32),
    /// Sub-directory for thumbnails.
    pub thumbnail_dir: String,
    /// Sub-directory for the per-folder icon.
    pub icon_dir: String,
    /// Extensions (lowercase, no dot) recognized as source images, both for
    /// selection and for cleanup.
    pub source_extensions: Vec<String>,
}

impl Default for DerivativeConfig {
    fn default() -> Self {
        Self {
            pre_box: (6000, 4000),
            thumbnail_box: (400, 270),
            icon_box: (500, 500),
            thumbnail_dir: "images".to_string(),
            icon_dir: "PNG".to_string(),
            source_extensions: vec!["jpg".into(), "jpeg".into(), "png".into()],
        }
    }
}

/// Per-run pipeline state: which folders already got their icon.
///
/// Passed explicitly so the first-wins policy is scoped to a run, not to
/// the process, and resets by construction.
#[derive(Debug, Default)]
pub struct RunContext {
    iconified: HashSet<PathBuf>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn icon_pending(&self, folder: &Path) -> bool {
        !self.iconified.contains(folder)
    }

    fn mark_iconified(&mut self, folder: &Path) {
        self.iconified.insert(folder.to_path_buf());
    }
}

/// What processing one folder batch produced.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub failed: usize,
    pub icon_written: bool,
    pub originals_deleted: usize,
}

/// Run the derivative pipeline over one folder batch.
///
/// Per-image failures (decode, matting, save) are logged and counted, never
/// propagated; only failing to read the directory itself is an error.
pub fn process_folder(
    matting: &impl Matting,
    folder: &Path,
    config: &DerivativeConfig,
    ctx: &mut RunContext,
) -> Result<BatchReport, PipelineError> {
    let mut report = BatchReport::default();
    let sources = source_images(folder, &config.source_extensions)?;
    if sources.is_empty() {
        return Ok(report);
    }
    info!(folder = %folder.display(), images = sources.len(), "processing folder batch");

    // Output names at the batch root; cleanup must not delete these.
    let mut generated: HashSet<String> = HashSet::new();

    for source in &sources {
        match process_image(matting, folder, source, config, ctx) {
            Ok(outcome) => {
                generated.insert(outcome.root_output_name);
                report.processed += 1;
                report.icon_written |= outcome.icon_written;
            }
            Err(err) => {
                warn!(path = %source.display(), error = %err, "image skipped");
                report.failed += 1;
            }
        }
    }

    report.originals_deleted =
        cleanup_originals(folder, &config.source_extensions, &generated)?;
    Ok(report)
}

/// Walk a local tree and process every directory that holds source images,
/// skipping derivative sub-directories. Used by the standalone `process`
/// command; the sync loop calls [`process_folder`] directly per batch.
pub fn process_tree(
    matting: &impl Matting,
    root: &Path,
    config: &DerivativeConfig,
    ctx: &mut RunContext,
) -> Result<Vec<(PathBuf, BatchReport)>, PipelineError> {
    let mut reports = Vec::new();
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            !(e.file_type().is_dir()
                && (name == config.thumbnail_dir || name == config.icon_dir))
        })
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_dir() {
            continue;
        }
        let dir = entry.path();
        let report = process_folder(matting, dir, config, ctx)?;
        if report.processed > 0 || report.failed > 0 {
            reports.push((dir.to_path_buf(), report));
        }
    }
    Ok(reports)
}

struct ImageOutcome {
    root_output_name: String,
    icon_written: bool,
}

#[derive(Error, Debug)]
enum ImageError {
    #[error("{0}")]
    Imaging(#[from] ImagingError),
    #[error("background removal failed: {0}")]
    Matting(#[from] crate::matting::MattingError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("source file has no valid stem")]
    BadName,
}

fn process_image(
    matting: &impl Matting,
    folder: &Path,
    source: &Path,
    config: &DerivativeConfig,
    ctx: &mut RunContext,
) -> Result<ImageOutcome, ImageError> {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or(ImageError::BadName)?;
    debug!(path = %source.display(), "matting");

    let bytes = std::fs::read(source)?;
    let normalized = pre_normalize(load_from_bytes(&bytes)?, config.pre_box);
    let matting_input = imaging::encode_png(&normalized)?;

    let cutout_bytes = matting.remove_background(&matting_input)?;
    let cutout = load_from_bytes(&cutout_bytes)?;

    // Full-size cutout at the batch root, original base name.
    let root_output_name = format!("{stem}.png");
    imaging::save_png(&cutout.to_rgba8(), &folder.join(&root_output_name))?;

    // Thumbnail, transparent padding.
    let thumbnail = fit_and_pad(&cutout, config.thumbnail_box, TRANSPARENT);
    imaging::save_png(
        &thumbnail,
        &folder.join(&config.thumbnail_dir).join(format!("{stem}.png")),
    )?;

    // Icon: first image per folder per run only.
    let mut icon_written = false;
    if ctx.icon_pending(folder) {
        let icon = fit_and_pad(&cutout, config.icon_box, TRANSPARENT);
        imaging::save_png(
            &icon,
            &folder.join(&config.icon_dir).join(format!("{stem}.png")),
        )?;
        ctx.mark_iconified(folder);
        icon_written = true;
    }

    Ok(ImageOutcome {
        root_output_name,
        icon_written,
    })
}

/// Source images directly under `folder`, sorted by name for deterministic
/// processing order (and therefore a deterministic icon pick).
fn source_images(folder: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, PipelineError> {
    let mut images: Vec<PathBuf> = std::fs::read_dir(folder)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_extension(p, extensions))
        .collect();
    images.sort();
    Ok(images)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .is_some_and(|ext| extensions.iter().any(|allowed| *allowed == ext))
}

/// Delete original source files at the batch root. Generated derivatives
/// (tracked by name) and sub-directories survive. Per-file errors are
/// logged and skipped.
fn cleanup_originals(
    folder: &Path,
    extensions: &[String],
    generated: &HashSet<String>,
) -> Result<usize, PipelineError> {
    let mut deleted = 0;
    for entry in std::fs::read_dir(folder)?.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() || !has_extension(&path, extensions) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if generated.contains(&name) {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "original deleted");
                deleted += 1;
            }
            Err(err) => warn!(path = %path.display(), error = %err, "delete failed"),
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matting::{Matting, MattingError};
    use image::{DynamicImage, Rgba, RgbaImage};
    use tempfile::TempDir;

    /// Matting double: decodes, adds an alpha channel with one transparent
    /// corner pixel, re-encodes as PNG.
    struct FakeMatting;

    impl Matting for FakeMatting {
        fn remove_background(&self, image: &[u8]) -> Result<Vec<u8>, MattingError> {
            let mut rgba = image::load_from_memory(image).unwrap().to_rgba8();
            rgba.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
            let mut buf = std::io::Cursor::new(Vec::new());
            DynamicImage::ImageRgba8(rgba)
                .write_to(&mut buf, image::ImageFormat::Png)
                .unwrap();
            Ok(buf.into_inner())
        }
    }

    /// Matting double that always fails, for isolation tests.
    struct BrokenMatting;

    impl Matting for BrokenMatting {
        fn remove_background(&self, _image: &[u8]) -> Result<Vec<u8>, MattingError> {
            Err(MattingError::Service {
                status: 500,
                message: "model crashed".into(),
            })
        }
    }

    fn write_jpeg(path: &Path, width: u32, height: u32) {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 30, 30, 255]));
        DynamicImage::ImageRgba8(img)
            .to_rgb8()
            .save_with_format(path, image::ImageFormat::Jpeg)
            .unwrap();
    }

    fn small_config() -> DerivativeConfig {
        DerivativeConfig {
            pre_box: (600, 400),
            thumbnail_box: (40, 27),
            icon_box: (50, 50),
            ..DerivativeConfig::default()
        }
    }

    fn dimensions_of(path: &Path) -> (u32, u32) {
        image::image_dimensions(path).unwrap()
    }

    #[test]
    fn round_trip_produces_full_set_and_removes_originals() {
        let tmp = TempDir::new().unwrap();
        let folder = tmp.path().join("W004-HB");
        std::fs::create_dir_all(&folder).unwrap();
        for name in ["W004-HB-01.jpg", "W004-HB-02.jpg", "W004-HB-03.jpg"] {
            write_jpeg(&folder.join(name), 80, 60);
        }

        let mut ctx = RunContext::new();
        let report = process_folder(&FakeMatting, &folder, &small_config(), &mut ctx).unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(report.failed, 0);
        assert!(report.icon_written);
        assert_eq!(report.originals_deleted, 3);

        // Full-size cutouts at the root, originals gone.
        for stem in ["W004-HB-01", "W004-HB-02", "W004-HB-03"] {
            assert!(folder.join(format!("{stem}.png")).exists());
            assert!(!folder.join(format!("{stem}.jpg")).exists());
            assert!(folder.join("images").join(format!("{stem}.png")).exists());
        }

        // Exactly one icon, from the first image in sorted order.
        let icons: Vec<_> = std::fs::read_dir(folder.join("PNG"))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(icons.len(), 1);
        assert_eq!(icons[0].file_name().to_string_lossy(), "W004-HB-01.png");
    }

    #[test]
    fn derivative_canvases_have_exact_box_dimensions() {
        let tmp = TempDir::new().unwrap();
        let folder = tmp.path().join("A-1");
        std::fs::create_dir_all(&folder).unwrap();
        write_jpeg(&folder.join("a-01.jpg"), 120, 40);

        let mut ctx = RunContext::new();
        process_folder(&FakeMatting, &folder, &small_config(), &mut ctx).unwrap();

        assert_eq!(dimensions_of(&folder.join("images/a-01.png")), (40, 27));
        assert_eq!(dimensions_of(&folder.join("PNG/a-01.png")), (50, 50));
        // Full-size cutout keeps the (non-normalized) source dimensions.
        assert_eq!(dimensions_of(&folder.join("a-01.png")), (120, 40));
    }

    #[test]
    fn icon_is_first_wins_across_repeated_calls_in_one_run() {
        let tmp = TempDir::new().unwrap();
        let folder = tmp.path().join("A-1");
        std::fs::create_dir_all(&folder).unwrap();
        write_jpeg(&folder.join("a-01.jpg"), 60, 60);

        let mut ctx = RunContext::new();
        let first = process_folder(&FakeMatting, &folder, &small_config(), &mut ctx).unwrap();
        assert!(first.icon_written);

        // A later batch for the same folder in the same run gets no icon.
        write_jpeg(&folder.join("a-02.jpg"), 60, 60);
        let second = process_folder(&FakeMatting, &folder, &small_config(), &mut ctx).unwrap();
        assert_eq!(second.processed, 1);
        assert!(!second.icon_written);

        let icons: Vec<_> = std::fs::read_dir(folder.join("PNG")).unwrap().collect();
        assert_eq!(icons.len(), 1);
    }

    #[test]
    fn separate_folders_each_get_an_icon() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = RunContext::new();
        for name in ["A-1", "B-2"] {
            let folder = tmp.path().join(name);
            std::fs::create_dir_all(&folder).unwrap();
            write_jpeg(&folder.join("x-01.jpg"), 30, 30);
            let report =
                process_folder(&FakeMatting, &folder, &small_config(), &mut ctx).unwrap();
            assert!(report.icon_written, "{name} should get an icon");
        }
    }

    #[test]
    fn matting_failure_is_isolated_and_originals_still_cleaned() {
        let tmp = TempDir::new().unwrap();
        let folder = tmp.path().join("A-1");
        std::fs::create_dir_all(&folder).unwrap();
        write_jpeg(&folder.join("a-01.jpg"), 30, 30);
        write_jpeg(&folder.join("a-02.jpg"), 30, 30);

        let mut ctx = RunContext::new();
        let report =
            process_folder(&BrokenMatting, &folder, &small_config(), &mut ctx).unwrap();

        assert_eq!(report.processed, 0);
        assert_eq!(report.failed, 2);
        assert!(!report.icon_written);
        // Originals are swept regardless of per-image failures.
        assert_eq!(report.originals_deleted, 2);
        assert!(!folder.join("a-01.jpg").exists());
    }

    #[test]
    fn undecodable_file_is_isolated() {
        let tmp = TempDir::new().unwrap();
        let folder = tmp.path().join("A-1");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("corrupt.jpg"), b"not a jpeg").unwrap();
        write_jpeg(&folder.join("good.jpg"), 30, 30);

        let mut ctx = RunContext::new();
        let report = process_folder(&FakeMatting, &folder, &small_config(), &mut ctx).unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 1);
        assert!(folder.join("good.png").exists());
    }

    #[test]
    fn png_source_replaced_in_place_not_deleted() {
        let tmp = TempDir::new().unwrap();
        let folder = tmp.path().join("A-1");
        std::fs::create_dir_all(&folder).unwrap();
        let img = RgbaImage::from_pixel(30, 30, Rgba([10, 20, 30, 255]));
        img.save_with_format(folder.join("a-01.png"), image::ImageFormat::Png)
            .unwrap();

        let mut ctx = RunContext::new();
        let report = process_folder(&FakeMatting, &folder, &small_config(), &mut ctx).unwrap();

        assert_eq!(report.processed, 1);
        // The root PNG is now the cutout (same name), so nothing to delete.
        assert_eq!(report.originals_deleted, 0);
        assert!(folder.join("a-01.png").exists());
    }

    #[test]
    fn empty_folder_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let folder = tmp.path().join("Empty-1");
        std::fs::create_dir_all(&folder).unwrap();

        let mut ctx = RunContext::new();
        let report = process_folder(&FakeMatting, &folder, &small_config(), &mut ctx).unwrap();
        assert_eq!(report, BatchReport::default());
    }

    #[test]
    fn process_tree_skips_derivative_subdirectories() {
        let tmp = TempDir::new().unwrap();
        let folder = tmp.path().join("A-1");
        std::fs::create_dir_all(&folder).unwrap();
        write_jpeg(&folder.join("a-01.jpg"), 30, 30);

        let mut ctx = RunContext::new();
        let config = small_config();
        let first = process_tree(&FakeMatting, tmp.path(), &config, &mut ctx).unwrap();
        assert_eq!(first.len(), 1);

        // Second pass revisits the batch root (the cutout is itself a PNG
        // source) but must not descend into images/ or PNG/ — doing so
        // would spawn nested images/images trees from the thumbnails.
        let mut ctx = RunContext::new();
        let second = process_tree(&FakeMatting, tmp.path(), &config, &mut ctx).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].0, folder);
        assert!(!folder.join("images/images").exists());
        assert!(!folder.join("PNG/images").exists());
    }
}
