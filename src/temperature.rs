use std::collections::VecDeque;

use crate::ec::{EcLayout, RegisterError, SharedIo};

pub const DEFAULT_SMOOTHING_WINDOW: usize = 5;

// Read the CPU and GPU thermal zones of the embedded controller
pub struct TemperatureSampler {
    io: SharedIo,
    cpu_offset: u64,
    gpu_offset: u64,
}

impl TemperatureSampler {
    pub fn new(io: SharedIo, layout: &EcLayout) -> Self {
        Self {
            io,
            cpu_offset: layout.cpu_temp_offset,
            gpu_offset: layout.gpu_temp_offset,
        }
    }

    // Return the hottest of the two zones in °C.
    // Either zone running hot has to drive the fans
    pub fn sample_temperature(&self) -> Result<u8, RegisterError> {
        let cpu = self.io.read_byte(self.cpu_offset)?;
        let gpu = self.io.read_byte(self.gpu_offset)?;

        Ok(cpu.max(gpu))
    }
}

// Moving average over the last `capacity` samples
#[derive(Debug, Clone)]
pub struct SmoothingFilter {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SmoothingFilter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);

        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    // Push a new sample and return the mean of the current window.
    // While the window is filling the mean covers the samples seen so far
    pub fn push(&mut self, sample: f64) -> f64 {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);

        self.mean()
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.;
        }

        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Default for SmoothingFilter {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING_WINDOW)
    }
}
