use rand::rngs::OsRng;
use rand::Rng;
use std::time::Duration;

/// Source of the simulated assembly duration
pub trait BuildDelay: Send + Sync {
    fn next_delay(&self) -> Duration;
}

pub const MIN_BUILD_SECS: u64 = 1;
pub const MAX_BUILD_SECS: u64 = 10;

/// Whole seconds drawn uniformly from [1, 10] using the OS CSPRNG
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomBuildDelay;

impl BuildDelay for RandomBuildDelay {
    fn next_delay(&self) -> Duration {
        Duration::from_secs(OsRng.gen_range(MIN_BUILD_SECS..=MAX_BUILD_SECS))
    }
}

/// Always the same delay; for tests and demos
#[derive(Debug, Clone, Copy)]
pub struct FixedBuildDelay(pub Duration);

impl BuildDelay for FixedBuildDelay {
    fn next_delay(&self) -> Duration {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_delay_stays_in_bounds() {
        let delay = RandomBuildDelay;
        for _ in 0..1_000 {
            let secs = delay.next_delay().as_secs();
            assert!((MIN_BUILD_SECS..=MAX_BUILD_SECS).contains(&secs));
        }
    }
}
