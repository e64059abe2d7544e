//! Shared helpers for integration tests: stub backends and image fixtures

#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::Array4;
use rmbg_server::{
    BackendConfig, BackgroundRemovalPipeline, BgRemovalError, InferenceBackend, MaskPolicy,
    Result, SharedBackend,
};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Saliency produced by [`StubBackend`]
#[derive(Debug, Clone, Copy)]
pub enum Saliency {
    /// Same value everywhere
    Constant(f32),
    /// 1.0 on the left half, 0.0 on the right half
    LeftHalf,
}

/// Stand-in for a real model, with call accounting
#[derive(Debug)]
pub struct StubBackend {
    size: usize,
    saliency: Saliency,
    delay: Option<Duration>,
    panic_once: AtomicBool,
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
}

impl StubBackend {
    pub fn new(size: usize, saliency: Saliency) -> Self {
        Self {
            size,
            saliency,
            delay: None,
            panic_once: AtomicBool::new(false),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Panic inside the first `infer` call
    pub fn panicking_once(self) -> Self {
        self.panic_once.store(true, Ordering::SeqCst);
        self
    }
}

impl InferenceBackend for StubBackend {
    fn initialize(&mut self, _config: &BackendConfig) -> Result<Option<Duration>> {
        Ok(None)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        if input.dim() != self.input_shape() {
            return Err(BgRemovalError::inference(format!(
                "unexpected input {:?}",
                input.shape()
            )));
        }
        if self.panic_once.swap(false, Ordering::SeqCst) {
            panic!("stub backend panic");
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let size = self.size;
        Ok(match self.saliency {
            Saliency::Constant(value) => Array4::from_elem((1, 1, size, size), value),
            Saliency::LeftHalf => {
                Array4::from_shape_fn((1, 1, size, size), |(_, _, _, x)| {
                    if x < size / 2 {
                        1.0
                    } else {
                        0.0
                    }
                })
            },
        })
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        (1, 3, self.size, self.size)
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        (1, 1, self.size, self.size)
    }

    fn name(&self) -> &'static str {
        "stub"
    }

    fn is_initialized(&self) -> bool {
        true
    }
}

pub fn pipeline_with(backend: StubBackend, policy: MaskPolicy) -> BackgroundRemovalPipeline {
    let shared = SharedBackend::new(Box::new(backend)).unwrap();
    BackgroundRemovalPipeline::new(shared, policy).unwrap()
}

pub fn pipeline(saliency: Saliency) -> BackgroundRemovalPipeline {
    pipeline_with(StubBackend::new(64, saliency), MaskPolicy::Clamp)
}

pub fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = Vec::new();
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut Cursor::new(&mut buffer), format)
        .unwrap();
    buffer
}

pub fn solid(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb(color))
}
