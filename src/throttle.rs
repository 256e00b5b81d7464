use crate::params::ParameterKey;

const FNV_OFFSET: u32 = 0x811C_9DC5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Warm-up throttle: immediately after (re)boot the full parameter set would
/// flood the broker, so only a fraction of keys is eligible at first. The
/// fraction rises step-wise on a fixed timer until full coverage, then stays
/// there for the rest of the process lifetime.
///
/// Selection is a stable hash of the key, so the same subset of parameters
/// is favored consistently within a throttle window instead of thrashing
/// which parameters are visible.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleController {
    steps: u8,
    step_ms: u64,
    start_ms: u64,
    started: bool,
}

impl ThrottleController {
    pub fn new(steps: u8, step_ms: u64) -> Self {
        Self {
            steps: steps.max(1),
            step_ms: step_ms.max(1),
            start_ms: 0,
            started: false,
        }
    }

    /// Arm the ramp. Before this, coverage stays at the initial fraction.
    pub fn start(&mut self, now_ms: u64) {
        self.start_ms = now_ms;
        self.started = true;
    }

    /// Number of covered steps in `1..=steps`.
    fn covered_steps(&self, now_ms: u64) -> u8 {
        if !self.started {
            return 1;
        }
        let elapsed = now_ms.saturating_sub(self.start_ms);
        let advanced = (elapsed / self.step_ms).min(u64::from(self.steps) - 1) as u8;
        1 + advanced
    }

    /// Current coverage fraction in (0, 1].
    pub fn coverage(&self, now_ms: u64) -> f32 {
        f32::from(self.covered_steps(now_ms)) / f32::from(self.steps)
    }

    pub fn is_saturated(&self, now_ms: u64) -> bool {
        self.covered_steps(now_ms) == self.steps
    }

    /// Deterministic pseudo-selection: a key is eligible once its stable
    /// bucket falls inside the covered span.
    pub fn admit(&self, key: &ParameterKey, now_ms: u64) -> bool {
        self.bucket(key) < self.covered_steps(now_ms)
    }

    fn bucket(&self, key: &ParameterKey) -> u8 {
        (key_hash(key) % u32::from(self.steps)) as u8
    }
}

/// FNV-1a over the key fields; stable across runs so throttle selection
/// survives restarts identically.
fn key_hash(key: &ParameterKey) -> u32 {
    let bytes = [
        key.category as u8,
        key.source,
        (key.index >> 8) as u8,
        key.index as u8,
    ];
    let mut hash = FNV_OFFSET;
    for byte in bytes {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
