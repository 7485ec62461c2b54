use cm_core::ReceptorId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeEvent {
    pub deliver_step: u64,
    pub receptor: ReceptorId,
    pub weight: f64,
}

/// Ring of per-step buckets covering `current_step ..= current_step + horizon`.
#[derive(Debug, Clone)]
pub struct SpikeRingBuffer {
    buckets: Vec<Vec<SpikeEvent>>,
    horizon_steps: u32,
}

impl SpikeRingBuffer {
    pub fn new(horizon_steps: u32) -> Self {
        let len = horizon_steps as usize + 1;
        Self {
            buckets: vec![Vec::new(); len],
            horizon_steps,
        }
    }

    pub fn horizon_steps(&self) -> u32 {
        self.horizon_steps
    }

    /// Caller guarantees `deliver_step` lies inside the horizon.
    pub fn push(&mut self, event: SpikeEvent) {
        let bucket = self.bucket(event.deliver_step);
        self.buckets[bucket].push(event);
    }

    /// Sums the weights due at `step` into `weights`, indexed by receptor.
    pub fn accumulate(&self, step: u64, weights: &mut [f64]) {
        for event in &self.buckets[self.bucket(step)] {
            if event.deliver_step != step {
                continue;
            }
            if let Some(slot) = weights.get_mut(event.receptor.index()) {
                *slot += event.weight;
            }
        }
    }

    pub fn clear_step(&mut self, step: u64) {
        let bucket = self.bucket(step);
        self.buckets[bucket].retain(|event| event.deliver_step != step);
    }

    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
    }

    pub fn pending(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    fn bucket(&self, step: u64) -> usize {
        (step % self.buckets.len() as u64) as usize
    }
}
