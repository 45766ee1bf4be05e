// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 单张图片输入: 解码一次, 产出一帧后关闭

use tracing::debug;

use super::{CaptureError, CaptureHandle, Frame, ImageInput};

pub struct ImageCapture {
    frame: Option<Frame>,
    open: bool,
}

impl ImageCapture {
    pub fn open(input: &ImageInput) -> Result<Self, CaptureError> {
        let image = match input {
            ImageInput::Path(path) => image::open(path)?,
            ImageInput::Bytes(bytes) => image::load_from_memory(bytes)?,
        };
        let frame = Frame::from_rgb_image(&image.to_rgb8());
        debug!("🖼️ 图片已解码: {}x{}", frame.width, frame.height);
        Ok(Self {
            frame: Some(frame),
            open: true,
        })
    }
}

impl CaptureHandle for ImageCapture {
    fn is_open(&self) -> bool {
        self.open
    }

    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
        let frame = self.frame.take();
        if frame.is_none() {
            self.open = false;
        }
        Ok(frame)
    }

    fn release(&mut self) {
        self.frame = None;
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(w, h, image::Rgb([200, 100, 50]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_single_frame_then_end() {
        let mut cap = ImageCapture::open(&ImageInput::Bytes(png_bytes(64, 48))).unwrap();
        assert!(cap.is_open());
        let frame = cap.read().unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));
        assert_eq!(&frame.data[..3], &[50, 100, 200]);
        assert!(cap.read().unwrap().is_none());
        assert!(!cap.is_open());
    }

    #[test]
    fn test_garbage_bytes_fail() {
        assert!(ImageCapture::open(&ImageInput::Bytes(vec![1, 2, 3])).is_err());
    }

    #[test]
    fn test_missing_file_fails() {
        let res = ImageCapture::open(&ImageInput::Path("does/not/exist.jpg".into()));
        assert!(res.is_err());
    }
}
