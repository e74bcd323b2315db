use crate::decoder::DecodedImage;
use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::{Array4, ArrayView4};
use std::borrow::Cow;

/// Final resize policy: bicubic, stretched to fit.
const RESIZE_FILTER: FilterType = FilterType::CatmullRom;
const DOWNSAMPLE_FILTER: FilterType = FilterType::Triangle;

/// A normalized `[1, H, W, 3]` batch with values in `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor(Array4<f32>);

impl ImageTensor {
    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.0.view()
    }

    pub fn as_slice(&self) -> Option<&[f32]> {
        self.0.as_slice()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    width: u32,
    height: u32,
    max_source_edge: u32,
}

impl Preprocessor {
    pub fn new((width, height): (u32, u32), max_source_edge: u32) -> Self {
        Self {
            width,
            height,
            max_source_edge,
        }
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn prepare(&self, image: &DecodedImage) -> ImageTensor {
        let source = self.downsample(image.as_rgb());
        let resized = imageops::resize(&*source, self.width, self.height, RESIZE_FILTER);

        let (width, height) = (self.width as usize, self.height as usize);
        let mut input = Array4::<f32>::zeros((1, height, width, 3));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            let (x, y) = (x as usize, y as usize);
            input[[0, y, x, 0]] = (r as f32) / 255.;
            input[[0, y, x, 1]] = (g as f32) / 255.;
            input[[0, y, x, 2]] = (b as f32) / 255.;
        }

        ImageTensor(input)
    }

    /// Caps the longest edge so very large uploads don't pay for a full-size bicubic pass.
    fn downsample<'a>(&self, image: &'a RgbImage) -> Cow<'a, RgbImage> {
        let longest = image.width().max(image.height());
        let cap = self.max_source_edge.max(self.width).max(self.height);
        if self.max_source_edge == 0 || longest <= cap {
            return Cow::Borrowed(image);
        }

        let scale = cap as f64 / longest as f64;
        let width = ((image.width() as f64 * scale).round() as u32).max(1);
        let height = ((image.height() as f64 * scale).round() as u32).max(1);
        tracing::debug!(
            "Downsampling {}x{} source to {}x{} before resize",
            image.width(),
            image.height(),
            width,
            height
        );
        Cow::Owned(imageops::resize(image, width, height, DOWNSAMPLE_FILTER))
    }
}
