//! Demo video composition.
//!
//! Frames are panels laid side by side, each under a black caption band, and
//! are appended to an animated GIF.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::{
    codecs::gif::{GifEncoder, Repeat},
    imageops::{self, FilterType},
    Delay, DynamicImage, Frame, GrayImage, Rgb, RgbImage,
};
use med_core::{Error, ImageDimensions, PixelMap, Result};
use tracing::{debug, info};

use crate::font;

const CAPTION_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const MAX_CAPTION_SCALE: u32 = 3;
/// GIF quantization speed (1 slowest/best .. 30 fastest)
const GIF_SPEED: i32 = 10;

/// Geometry of a composed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub panel: ImageDimensions,
    pub panels: u32,
    pub label_height: u32,
}

impl FrameLayout {
    pub fn new(panel: ImageDimensions, panels: u32, label_height: u32) -> Self {
        Self {
            panel,
            panels,
            label_height,
        }
    }

    /// `(panel_w * panels) x (panel_h + label_height)`
    pub fn frame_size(&self) -> ImageDimensions {
        ImageDimensions::new(
            self.panel.width * self.panels,
            self.panel.height + self.label_height,
        )
    }

    /// Layout of `panels` panels that fills a frame of `frame` size.
    pub fn fitting(frame: ImageDimensions, panels: u32, label_height: u32) -> Self {
        let panels = panels.max(1);
        Self::new(
            ImageDimensions::new(
                frame.width / panels,
                frame.height.saturating_sub(label_height),
            ),
            panels,
            label_height,
        )
    }
}

fn caption_scale(caption: &str, label_height: u32, panel_width: u32) -> u32 {
    let mut scale = (label_height / (font::GLYPH_HEIGHT * 2)).clamp(1, MAX_CAPTION_SCALE);
    while scale > 1 && font::text_width(caption, scale) > panel_width {
        scale -= 1;
    }
    scale
}

/// Composes captioned panels into one frame.
pub fn compose_frame(
    panels: &[(&DynamicImage, &str)],
    panel: ImageDimensions,
    label_height: u32,
) -> Result<RgbImage> {
    if panels.is_empty() {
        return Err(Error::processing("compose", "no panels to compose"));
    }
    if panel.width == 0 || panel.height == 0 {
        return Err(Error::processing("compose", format!("panel size {panel} has a zero side")));
    }

    let layout = FrameLayout::new(panel, panels.len() as u32, label_height);
    let size = layout.frame_size();
    let mut frame = RgbImage::new(size.width, size.height);

    for (i, (image, caption)) in panels.iter().enumerate() {
        let left = i as u32 * panel.width;
        let resized = image
            .resize_exact(panel.width, panel.height, FilterType::Nearest)
            .to_rgb8();
        imageops::replace(&mut frame, &resized, left as i64, label_height as i64);

        let scale = caption_scale(caption, label_height, panel.width);
        let text_x = left as i64 + (panel.width as i64 - font::text_width(caption, scale) as i64) / 2;
        let text_y = (label_height as i64 - font::text_height(scale) as i64) / 2;
        font::draw_text(&mut frame, caption, text_x, text_y, scale, CAPTION_COLOR);
    }

    Ok(frame)
}

/// Grayscale image of a binary pixel map
pub fn pixel_map_image(map: &PixelMap) -> Result<DynamicImage> {
    GrayImage::from_raw(map.width, map.height, map.data.clone())
        .map(DynamicImage::ImageLuma8)
        .ok_or_else(|| Error::processing("compose", "pixel map buffer does not match its size"))
}

/// Animated GIF sink for demo frames
///
/// A closed writer accepts frames and discards them. Dropping the writer
/// writes the GIF trailer and releases the file, also after an error.
pub struct DemoWriter {
    encoder: Option<GifEncoder<BufWriter<File>>>,
    /// Second handle to the output file, synced by [`DemoWriter::finish`]
    file: Option<File>,
    frame_size: ImageDimensions,
    delay: Delay,
    path: Option<PathBuf>,
    frames_written: usize,
}

impl DemoWriter {
    /// Opens `path` for writing frames of `frame_size` at `fps`.
    pub fn create(path: &Path, frame_size: ImageDimensions, fps: u32) -> Result<Self> {
        if fps == 0 {
            return Err(Error::config("video", "fps must be positive"));
        }

        let file = File::create(path).map_err(|e| Error::write(path, e))?;
        let sync_handle = file.try_clone().map_err(|e| Error::write(path, e))?;
        let mut encoder = GifEncoder::new_with_speed(BufWriter::new(file), GIF_SPEED);
        encoder
            .set_repeat(Repeat::Infinite)
            .map_err(|e| Error::write(path, e))?;

        info!("Writing demo video to {} ({frame_size} @ {fps} fps)", path.display());
        Ok(Self {
            encoder: Some(encoder),
            file: Some(sync_handle),
            frame_size,
            delay: Delay::from_numer_denom_ms(1000, fps),
            path: Some(path.to_path_buf()),
            frames_written: 0,
        })
    }

    /// A writer that is not open
    pub fn closed(frame_size: ImageDimensions) -> Self {
        Self {
            encoder: None,
            file: None,
            frame_size,
            delay: Delay::from_numer_denom_ms(1000, 1),
            path: None,
            frames_written: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.encoder.is_some()
    }

    pub fn frame_size(&self) -> ImageDimensions {
        self.frame_size
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    /// Appends `frame` once.
    pub fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let Some(encoder) = self.encoder.as_mut() else {
            return Ok(());
        };

        let size = ImageDimensions::new(frame.width(), frame.height());
        if size != self.frame_size {
            return Err(Error::processing(
                "video",
                format!("frame is {size}, writer expects {}", self.frame_size),
            ));
        }

        let rgba = DynamicImage::ImageRgb8(frame.clone()).to_rgba8();
        encoder
            .encode_frame(Frame::from_parts(rgba, 0, 0, self.delay))
            .map_err(|e| Error::processing("video", e.to_string()))?;
        self.frames_written += 1;
        Ok(())
    }

    /// Appends `frame` `hold` times.
    pub fn write_held(&mut self, frame: &RgbImage, hold: u32) -> Result<()> {
        for _ in 0..hold {
            self.write_frame(frame)?;
        }
        Ok(())
    }

    /// Closes the file and syncs it to disk. Returns the number of frames written.
    ///
    /// The encoder writes the GIF trailer when dropped and cannot report a
    /// failure there; a failing disk still surfaces through the final sync.
    pub fn finish(mut self) -> Result<usize> {
        drop(self.encoder.take());
        if let (Some(file), Some(path)) = (self.file.take(), &self.path) {
            file.sync_all().map_err(|e| Error::write(path, e))?;
            debug!("Closed demo video {} after {} frames", path.display(), self.frames_written);
        }
        Ok(self.frames_written)
    }
}

/// Writes an Original | Ground Truth | Prediction frame `hold` times.
pub fn write_segmentation_frame(
    writer: &mut DemoWriter,
    original: &DynamicImage,
    ground_truth: &PixelMap,
    prediction: &PixelMap,
    label_height: u32,
    hold: u32,
) -> Result<()> {
    if !writer.is_open() {
        return Ok(());
    }

    let layout = FrameLayout::fitting(writer.frame_size(), 3, label_height);
    let gt = pixel_map_image(ground_truth)?;
    let pred = pixel_map_image(prediction)?;
    let frame = compose_frame(
        &[
            (original, "Original"),
            (&gt, "Ground Truth"),
            (&pred, "Prediction"),
        ],
        layout.panel,
        label_height,
    )?;
    writer.write_held(&frame, hold)
}

/// Writes a single captioned panel `hold` times.
pub fn write_classification_frame(
    writer: &mut DemoWriter,
    original: &DynamicImage,
    caption: &str,
    label_height: u32,
    hold: u32,
) -> Result<()> {
    if !writer.is_open() {
        return Ok(());
    }

    let layout = FrameLayout::fitting(writer.frame_size(), 1, label_height);
    let frame = compose_frame(&[(original, caption)], layout.panel, label_height)?;
    writer.write_held(&frame, hold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{AnimationDecoder, ImageBuffer, Luma};
    use tempfile::TempDir;

    fn gray(width: u32, height: u32, value: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(ImageBuffer::from_pixel(width, height, Luma([value])))
    }

    fn count_gif_frames(path: &Path) -> usize {
        let file = std::io::BufReader::new(File::open(path).unwrap());
        let decoder = image::codecs::gif::GifDecoder::new(file).unwrap();
        decoder.into_frames().count()
    }

    #[test]
    fn test_frame_size() {
        let layout = FrameLayout::new(ImageDimensions::square(64), 3, 20);
        assert_eq!(layout.frame_size(), ImageDimensions::new(192, 84));
        assert_eq!(FrameLayout::fitting(ImageDimensions::new(192, 84), 3, 20), layout);
    }

    #[test]
    fn test_compose_places_panels_below_band() {
        let panel = ImageDimensions::square(16);
        let left = gray(8, 8, 200);
        let right = gray(30, 10, 90);
        let frame = compose_frame(&[(&left, ""), (&right, "")], panel, 10).unwrap();

        assert_eq!(frame.dimensions(), (32, 26));
        assert_eq!(frame.get_pixel(5, 5), &Rgb([0, 0, 0]));
        assert_eq!(frame.get_pixel(0, 10), &Rgb([200, 200, 200]));
        assert_eq!(frame.get_pixel(31, 25), &Rgb([90, 90, 90]));
    }

    #[test]
    fn test_caption_is_drawn_in_band() {
        let panel = ImageDimensions::new(60, 10);
        let image = gray(4, 4, 0);
        let frame = compose_frame(&[(&image, "Pred")], panel, 20).unwrap();

        let band_lit = (0..20)
            .flat_map(|y| (0..60).map(move |x| (x, y)))
            .filter(|&(x, y)| frame.get_pixel(x, y) == &CAPTION_COLOR)
            .count();
        assert!(band_lit > 0);
    }

    #[test]
    fn test_compose_rejects_empty_input() {
        assert!(compose_frame(&[], ImageDimensions::square(4), 4).is_err());
    }

    #[test]
    fn test_segmentation_frames_are_held() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("demo.gif");
        let layout = FrameLayout::new(ImageDimensions::square(8), 3, 14);
        let mut writer = DemoWriter::create(&path, layout.frame_size(), 2).unwrap();

        let original = gray(8, 8, 128);
        let mask = PixelMap::new(2, 2, vec![255, 0, 0, 255]);
        write_segmentation_frame(&mut writer, &original, &mask, &mask, 14, 2).unwrap();
        write_segmentation_frame(&mut writer, &original, &mask, &mask, 14, 2).unwrap();
        assert_eq!(writer.finish().unwrap(), 4);

        assert_eq!(count_gif_frames(&path), 4);
    }

    #[test]
    fn test_closed_writer_discards_frames() {
        let mut writer = DemoWriter::closed(ImageDimensions::new(8, 20));
        let image = gray(8, 8, 10);
        write_classification_frame(&mut writer, &image, "True: a | Pred: b", 12, 3).unwrap();
        assert!(!writer.is_open());
        assert_eq!(writer.finish().unwrap(), 0);
    }

    #[test]
    fn test_mismatched_frame_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            DemoWriter::create(&dir.path().join("demo.gif"), ImageDimensions::square(8), 1)
                .unwrap();
        let err = writer.write_frame(&RgbImage::new(4, 4)).unwrap_err();
        assert!(matches!(err, Error::DataProcessing { .. }));
        assert_eq!(writer.frames_written(), 0);
    }

    #[test]
    fn test_file_is_released_after_failed_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("demo.gif");
        let layout = FrameLayout::new(ImageDimensions::square(8), 1, 14);

        let result = (|| -> Result<()> {
            let mut writer = DemoWriter::create(&path, layout.frame_size(), 2)?;
            write_classification_frame(&mut writer, &gray(8, 8, 60), "True: a | Pred: a", 14, 1)?;
            writer.write_held(&RgbImage::new(3, 3), 2)?;
            writer.finish().map(|_| ())
        })();
        assert!(matches!(result, Err(Error::DataProcessing { .. })));

        // the partial GIF is complete and the path can be reopened for writing
        assert_eq!(count_gif_frames(&path), 1);
        let writer = DemoWriter::create(&path, layout.frame_size(), 2).unwrap();
        assert_eq!(writer.finish().unwrap(), 0);
    }

    #[test]
    fn test_create_in_missing_directory_fails() {
        let err = DemoWriter::create(
            Path::new("/nonexistent/dir/demo.gif"),
            ImageDimensions::square(8),
            1,
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            Error::FileIo {
                access: med_core::Access::Write,
                ..
            }
        ));
    }
}
