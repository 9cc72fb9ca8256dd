//! Frame decoding and raster output through the `image` crate.

use crate::RiverError;
use image::{DynamicImage, ImageReader, Luma};
use river_core::GrayImageView;
use river_piv::{Frame, FrameError, FrameSource, RegionMask};
use std::fs;
use std::path::{Path, PathBuf};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// File extensions picked up by [`ImageDirectory::open`].
pub const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

/// Borrow an `image::GrayImage` as a `river-core` view.
pub fn gray_view(img: &::image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Convert a decoded image into an 8-bit gray or RGB frame.
pub fn frame_from_image(img: &DynamicImage, grayscale: bool) -> Frame {
    let (width, height) = (img.width() as usize, img.height() as usize);
    if grayscale {
        Frame {
            width,
            height,
            channels: 1,
            data: img.to_luma8().into_raw(),
        }
    } else {
        Frame {
            width,
            height,
            channels: 3,
            data: img.to_rgb8().into_raw(),
        }
    }
}

fn image_error(path: &Path, source: ::image::ImageError) -> RiverError {
    RiverError::Image {
        path: path.display().to_string(),
        source,
    }
}

/// Decode an image file, guessing the format from its content.
pub fn open_image(path: impl AsRef<Path>) -> Result<DynamicImage, RiverError> {
    let path = path.as_ref();
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| image_error(path, e))
}

pub fn load_frame(path: impl AsRef<Path>, grayscale: bool) -> Result<Frame, RiverError> {
    Ok(frame_from_image(&open_image(path)?, grayscale))
}

fn has_frame_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            FRAME_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// Frames stored as individual image files, decoded on demand.
#[derive(Clone, Debug)]
pub struct ImageDirectory {
    paths: Vec<PathBuf>,
    grayscale: bool,
}

impl ImageDirectory {
    /// Every image file in `dir`, ordered by file name.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
    pub fn open(dir: impl AsRef<Path>, grayscale: bool) -> Result<Self, RiverError> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.is_file() && has_frame_extension(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        log::info!(
            "found {} frames in {}",
            paths.len(),
            dir.as_ref().display()
        );
        Ok(Self::from_paths(paths, grayscale))
    }

    /// Frames in the given order.
    pub fn from_paths(paths: Vec<PathBuf>, grayscale: bool) -> Self {
        Self { paths, grayscale }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// `(width, height)` of the first frame, read from its header.
    pub fn frame_size(&self) -> Result<(usize, usize), RiverError> {
        let first = self
            .paths
            .first()
            .ok_or_else(|| RiverError::InvalidInput("frame directory is empty".into()))?;
        let (w, h) = ::image::image_dimensions(first).map_err(|e| image_error(first, e))?;
        Ok((w as usize, h as usize))
    }
}

impl FrameSource for ImageDirectory {
    fn len(&self) -> usize {
        self.paths.len()
    }

    fn frame(&self, index: usize) -> Result<Frame, FrameError> {
        let path = self.paths.get(index).ok_or(FrameError::OutOfRange {
            index,
            len: self.paths.len(),
        })?;
        load_frame(path, self.grayscale).map_err(|e| FrameError::Decode {
            index,
            reason: e.to_string(),
        })
    }
}

fn ensure_parent(path: &Path) -> Result<(), RiverError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Write a mask as a black/white PNG (255 inside).
pub fn save_mask_png(mask: &RegionMask, path: impl AsRef<Path>) -> Result<(), RiverError> {
    let path = path.as_ref();
    let img = ::image::GrayImage::from_fn(mask.width() as u32, mask.height() as u32, |x, y| {
        Luma([if mask.contains(x as usize, y as usize) { 255 } else { 0 }])
    });
    ensure_parent(path)?;
    img.save(path).map_err(|e| image_error(path, e))
}

/// Write a `river-core` grayscale raster, e.g. an orthophoto.
pub fn save_gray_png(img: &river_core::GrayImage, path: impl AsRef<Path>) -> Result<(), RiverError> {
    let path = path.as_ref();
    let buf = ::image::GrayImage::from_raw(img.width as u32, img.height as u32, img.data.clone())
        .ok_or_else(|| {
            RiverError::InvalidInput(format!(
                "raster buffer does not match {}x{}",
                img.width, img.height
            ))
        })?;
    ensure_parent(path)?;
    buf.save(path).map_err(|e| image_error(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, w: u32, h: u32, value: u8) {
        ::image::GrayImage::from_pixel(w, h, Luma([value]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn directory_lists_images_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("frame_002.png"), 8, 6, 20);
        write_png(&dir.path().join("frame_001.png"), 8, 6, 10);
        fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let frames = ImageDirectory::open(dir.path(), true).unwrap();
        assert_eq!(FrameSource::len(&frames), 2);
        assert_eq!(frames.frame_size().unwrap(), (8, 6));

        let first = frames.frame(0).unwrap();
        assert_eq!((first.width, first.height, first.channels), (8, 6, 1));
        assert!(first.data.iter().all(|&v| v == 10));
        assert!(matches!(
            frames.frame(2),
            Err(FrameError::OutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn color_frames_keep_three_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        write_png(&path, 4, 4, 7);
        let frame = load_frame(&path, false).unwrap();
        assert_eq!(frame.channels, 3);
        assert_eq!(frame.data.len(), 4 * 4 * 3);
    }

    #[test]
    fn undecodable_file_becomes_frame_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        fs::write(&path, b"not a png").unwrap();
        let frames = ImageDirectory::from_paths(vec![path], true);
        assert!(matches!(
            frames.frame(0),
            Err(FrameError::Decode { index: 0, .. })
        ));
    }

    #[test]
    fn mask_png_marks_inside_white() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/mask.png");
        let mask = RegionMask::from_fn(5, 4, |x, _| x >= 2);
        save_mask_png(&mask, &path).unwrap();
        let img = open_image(&path).unwrap().to_luma8();
        assert_eq!(img.dimensions(), (5, 4));
        assert_eq!(img.get_pixel(1, 0)[0], 0);
        assert_eq!(img.get_pixel(3, 3)[0], 255);
    }
}
