use crate::config::ThumbnailConfig;
use crate::error::AppError;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageOutputFormat};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailOutcome {
    Resized { width: u32, height: u32 },
    /// The original was copied byte for byte.
    Copied,
}

/// Produces the bounded display copy of an upload. Blocking; run it off the async executor.
#[derive(Debug, Clone)]
pub struct ThumbnailDeriver {
    config: ThumbnailConfig,
}

impl ThumbnailDeriver {
    pub fn new(config: ThumbnailConfig) -> Self {
        Self { config }
    }

    /// Write the derived image for `original` to `target`.
    ///
    /// On `Ok` the target always exists. Formats listed in `skip_extensions`, and any
    /// resize failure, fall back to copying the original.
    pub fn derive(
        &self,
        original: &Path,
        target: &Path,
        extension: &str,
    ) -> Result<ThumbnailOutcome, AppError> {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        if self.config.skip_extensions.contains(&ext) {
            log::debug!("Skipping resize for .{} file {:?}, copying original", ext, original);
            return copy_original(original, target);
        }

        match self.resize(original, target) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                log::warn!(
                    "Thumbnail generation failed for {:?}: {}. Falling back to a copy of the original",
                    original,
                    e
                );
                if target.exists() {
                    if let Err(e) = std::fs::remove_file(target) {
                        log::warn!("Could not remove partial thumbnail {:?}: {}", target, e);
                    }
                }
                copy_original(original, target)
            }
        }
    }

    fn resize(&self, original: &Path, target: &Path) -> Result<ThumbnailOutcome, AppError> {
        log::trace!("Opening image for thumbnail generation: {:?}", original);
        let image = image::io::Reader::open(original)?
            .with_guessed_format()?
            .decode()?;

        let (width, height) = image.dimensions();
        let image = if width > self.config.max_width || height > self.config.max_height {
            image.thumbnail(self.config.max_width, self.config.max_height)
        } else {
            image
        };

        let format = ImageFormat::from_path(target)?;
        let (image, output) = match format {
            ImageFormat::Jpeg => (
                DynamicImage::ImageRgb8(image.to_rgb8()),
                ImageOutputFormat::Jpeg(self.config.quality.clamp(1, 100)),
            ),
            other => (image, ImageOutputFormat::from(other)),
        };

        let mut writer = BufWriter::new(File::create(target)?);
        image.write_to(&mut writer, output)?;
        writer.flush()?;

        let (width, height) = image.dimensions();
        log::debug!("Thumbnail saved to {:?} ({}x{})", target, width, height);
        Ok(ThumbnailOutcome::Resized { width, height })
    }
}

fn copy_original(original: &Path, target: &Path) -> Result<ThumbnailOutcome, AppError> {
    std::fs::copy(original, target)?;
    Ok(ThumbnailOutcome::Copied)
}
