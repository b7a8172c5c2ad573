use crate::pipeline::ProcessorAlgo;
use crate::video::tiles::Fragment;
use tracing::trace;

/// Saturating histogram bin counter.
///
/// The counter width bounds how many frames can be counted per bin before
/// saturation; the driver picks the narrowest width that fits the frame
/// count, because the histogram table costs 256 x elements x sizeof(counter)
/// bytes per processing unit.
pub trait HistogramCounter: Copy + Default + Send + 'static {
    /// Largest value the counter can hold
    const LIMIT: u64;

    fn saturating_increment(&mut self);

    fn count(self) -> u64;
}

impl HistogramCounter for u8 {
    const LIMIT: u64 = u8::MAX as u64;

    fn saturating_increment(&mut self) {
        *self = self.saturating_add(1);
    }

    fn count(self) -> u64 {
        self as u64
    }
}

impl HistogramCounter for u16 {
    const LIMIT: u64 = u16::MAX as u64;

    fn saturating_increment(&mut self) {
        *self = self.saturating_add(1);
    }

    fn count(self) -> u64 {
        self as u64
    }
}

impl HistogramCounter for u32 {
    const LIMIT: u64 = u32::MAX as u64;

    fn saturating_increment(&mut self) {
        *self = self.saturating_add(1);
    }

    fn count(self) -> u64 {
        self as u64
    }
}

const VALUE_BINS: usize = 256;

/// Element-wise median over a sequence of identically-shaped fragments.
///
/// Maintains a 256-bin histogram per flattened element and increments the
/// bin of each incoming pixel value, saturating at the counter limit. The
/// median image is computed once, after `notify_no_more_tokens`; when bins
/// saturated, a backtracking pass re-centers the median on the values that
/// were actually counted.
pub struct HistogramMedianAlgo<C: HistogramCounter> {
    /// histograms[value][element]
    histograms: Vec<Vec<C>>,
    frames_processed: u64,
    /// geometry of the first fragment, reused for the result
    template: Option<Fragment>,
    result: Option<Fragment>,
}

impl<C: HistogramCounter> HistogramMedianAlgo<C> {
    fn consume_pixels(&mut self, pixels: &[u8]) {
        if self.frames_processed == 0 {
            self.histograms = vec![vec![C::default(); pixels.len()]; VALUE_BINS];
        }

        let elements = self.histograms[0].len();
        if pixels.len() != elements {
            trace!(
                "Skipping fragment with {} elements (expected {})",
                pixels.len(),
                elements
            );
            return;
        }

        for (element, &value) in pixels.iter().enumerate() {
            self.histograms[value as usize][element].saturating_increment();
        }
    }

    /// Collect the median of every element's histogram.
    fn median_pixels(&self) -> Vec<u8> {
        let elements = self.histograms[0].len();
        let expected_total = self.frames_processed;
        let mut medians = vec![0u8; elements];

        for (element, median) in medians.iter_mut().enumerate() {
            let mut accumulator: u64 = 0;
            let mut halfway: usize = VALUE_BINS - 1;

            // first bin index whose cumulative count crosses the halfway mark
            for bin in 0..VALUE_BINS {
                accumulator += self.histograms[bin][element].count();

                if halfway == VALUE_BINS - 1 && accumulator > expected_total / 2 {
                    halfway = bin;
                }
            }

            // a saturated bin truncated the input; backtrack using the total
            // that was actually observed as the new denominator
            if accumulator != expected_total {
                let observed_total = accumulator;

                let mut bin = halfway;
                loop {
                    accumulator -= self.histograms[bin][element].count();

                    // stop on the bin just above the observed halfway mark
                    if accumulator < observed_total / 2 || bin == 0 {
                        break;
                    }

                    bin -= 1;
                }
                halfway = bin;
            }

            *median = halfway as u8;
        }

        medians
    }
}

impl<C: HistogramCounter> ProcessorAlgo for HistogramMedianAlgo<C> {
    type Token = Fragment;
    type Result = Fragment;
    type Pack = ();

    fn new(_pack: ()) -> Self {
        Self {
            histograms: Vec::new(),
            frames_processed: 0,
            template: None,
            result: None,
        }
    }

    fn insert(&mut self, fragment: Fragment) {
        if fragment.image.is_empty() {
            return;
        }

        if self.template.is_none() {
            self.template = Some(Fragment {
                image: fragment.image.clone(),
                outer: fragment.outer,
                inner: fragment.inner,
            });
        }

        self.consume_pixels(fragment.image.data());
        self.frames_processed += 1;
    }

    fn try_get_result(&mut self) -> Option<Fragment> {
        self.result.take()
    }

    fn notify_no_more_tokens(&mut self) {
        let Some(template) = self.template.take() else {
            // no frames arrived; there is no result
            self.frames_processed = 0;
            return;
        };

        let medians = self.median_pixels();

        let mut image = template.image;
        image.data_mut().copy_from_slice(&medians);

        self.result = Some(Fragment {
            image,
            outer: template.outer,
            inner: template.inner,
        });

        self.frames_processed = 0;
        self.histograms = Vec::new();
    }

    fn has_results(&self) -> bool {
        self.result.is_some()
    }
}
