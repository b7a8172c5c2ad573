use crate::frame::Frame;
use crate::pipeline::ProcessorAlgo;
use crate::video::tiles::Fragment;
use image::{GrayImage, Luma};
use imageproc::contrast::{otsu_level, threshold};
use imageproc::distance_transform::Norm;
use imageproc::morphology::open;
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::warn;

/// Configuration for [`HighlightObjectsAlgo`].
///
/// The frame is compared against `background`; the coarse pass keeps faint,
/// large objects and the hysteresis pass keeps distinct, small ones.
#[derive(Debug, Clone)]
pub struct HighlightObjectsPack {
    /// Background image, same shape as the (cropped, grayscaled) frames
    pub background: Frame,
    /// Coarse binary threshold; -1 selects Otsu's method per frame
    pub threshold: i32,
    /// Hysteresis low threshold
    pub threshold_lo: u8,
    /// Hysteresis high threshold
    pub threshold_hi: u8,
    /// Minimum object area (pixels) kept by the coarse pass
    pub min_size_threshold: u32,
    /// Minimum object area (pixels) kept by the hysteresis pass
    pub min_size_hyst: u32,
    /// Radius of the square structuring element used for opening
    pub kernel_radius: u8,
}

/// Background subtraction + dual-threshold object highlighting.
///
/// One binary mask out per frame in:
/// 1. `D = |frame - background|`
/// 2. coarse pass: binary threshold, morphological open, remove components
///    smaller than `min_size_threshold`, fill enclosed holes
/// 3. hysteresis pass: keep low-threshold components seeded by at least one
///    high-threshold pixel, open, remove components smaller than
///    `min_size_hyst`, fill enclosed holes
/// 4. output = coarse OR hysteresis
pub struct HighlightObjectsAlgo {
    pack: HighlightObjectsPack,
    background: GrayImage,
    pending: VecDeque<Frame>,
}

impl HighlightObjectsAlgo {
    fn highlight(&self, frame: &GrayImage) -> GrayImage {
        let diff = absolute_difference(&self.background, frame);

        // coarse pass: faint, large objects
        let coarse_threshold = if self.pack.threshold < 0 {
            otsu_level(&diff)
        } else {
            self.pack.threshold as u8
        };
        let mut coarse = threshold(&diff, coarse_threshold);
        coarse = open(&coarse, Norm::LInf, self.pack.kernel_radius);
        remove_small_objects(&mut coarse, self.pack.min_size_threshold);
        fill_holes(&mut coarse);

        // hysteresis pass: distinct, small objects
        let mut hysteresis =
            hysteresis_threshold(&diff, self.pack.threshold_lo, self.pack.threshold_hi);
        hysteresis = open(&hysteresis, Norm::LInf, self.pack.kernel_radius);
        remove_small_objects(&mut hysteresis, self.pack.min_size_hyst);
        fill_holes(&mut hysteresis);

        // merge the passes
        let mut merged = coarse;
        for (out, hyst) in merged.iter_mut().zip(hysteresis.iter()) {
            *out |= hyst;
        }
        merged
    }
}

impl ProcessorAlgo for HighlightObjectsAlgo {
    type Token = Fragment;
    type Result = Frame;
    type Pack = HighlightObjectsPack;

    fn new(pack: HighlightObjectsPack) -> Self {
        let background = pack
            .background
            .to_luma()
            .into_gray()
            .expect("luma conversion always yields one channel");

        Self {
            pack,
            background,
            pending: VecDeque::new(),
        }
    }

    fn insert(&mut self, fragment: Fragment) {
        if fragment.image.is_empty() {
            return;
        }

        if fragment.image.dimensions() != self.background.dimensions() {
            warn!(
                "Dropping {}x{} frame that does not match the {}x{} background",
                fragment.image.width(),
                fragment.image.height(),
                self.background.width(),
                self.background.height()
            );
            return;
        }

        let gray = match fragment.image.to_luma().into_gray() {
            Ok(gray) => gray,
            Err(e) => {
                warn!("Frame conversion for highlighting failed: {}", e);
                return;
            }
        };

        let mask = self.highlight(&gray);
        self.pending.push_back(Frame::from_gray(mask));
    }

    fn try_get_result(&mut self) -> Option<Frame> {
        self.pending.pop_front()
    }

    fn notify_no_more_tokens(&mut self) {}

    fn has_results(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Element-wise |a - b|
fn absolute_difference(a: &GrayImage, b: &GrayImage) -> GrayImage {
    let mut diff = GrayImage::new(a.width(), a.height());
    for ((out, pa), pb) in diff.iter_mut().zip(a.iter()).zip(b.iter()) {
        *out = pa.abs_diff(*pb);
    }
    diff
}

/// Zero out connected components with fewer than `min_size` pixels.
fn remove_small_objects(mask: &mut GrayImage, min_size: u32) {
    if min_size <= 1 {
        return;
    }

    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));

    let mut areas: HashMap<u32, u32> = HashMap::new();
    for label in labels.iter() {
        if *label > 0 {
            *areas.entry(*label).or_insert(0) += 1;
        }
    }

    for (pixel, label) in mask.iter_mut().zip(labels.iter()) {
        if *label > 0 && areas[label] < min_size {
            *pixel = 0;
        }
    }
}

/// Fill enclosed holes: any background region not connected to the corner
/// seed becomes foreground (flood fill from the corner, invert, OR).
fn fill_holes(mask: &mut GrayImage) {
    if mask.width() == 0 || mask.height() == 0 {
        return;
    }

    // label the background regions; the region holding the corner seed is
    // true background, every other one is an enclosed hole
    let mut inverted = mask.clone();
    for pixel in inverted.iter_mut() {
        *pixel = if *pixel == 0 { 255 } else { 0 };
    }

    let labels = connected_components(&inverted, Connectivity::Four, Luma([0u8]));
    let seed_label = labels.get_pixel(0, 0)[0];

    for (pixel, label) in mask.iter_mut().zip(labels.iter()) {
        if *label > 0 && *label != seed_label {
            *pixel = 255;
        }
    }
}

/// Keep every low-threshold component that contains at least one
/// high-threshold pixel (the fixed-range flood fill of the classic
/// hysteresis construction).
fn hysteresis_threshold(diff: &GrayImage, threshold_lo: u8, threshold_hi: u8) -> GrayImage {
    let lo = threshold(diff, threshold_lo);
    let hi = threshold(diff, threshold_hi);

    let labels = connected_components(&lo, Connectivity::Eight, Luma([0u8]));

    let mut seeded: HashSet<u32> = HashSet::new();
    for (label, hi_pixel) in labels.iter().zip(hi.iter()) {
        if *label > 0 && *hi_pixel > 0 {
            seeded.insert(*label);
        }
    }

    let mut out = GrayImage::new(diff.width(), diff.height());
    for (pixel, label) in out.iter_mut().zip(labels.iter()) {
        if *label > 0 && seeded.contains(label) {
            *pixel = 255;
        }
    }
    out
}
