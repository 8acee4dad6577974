// Minimal PRNG (no external crates).
//
// This is NOT cryptographically secure.
// It drives field noise only. One generator is owned by each `Graph` and
// seeded once at build time, so a run is reproducible for a fixed step order.

#[derive(Debug, Clone)]
pub struct Prng {
    state: u64,
    // Second Box-Muller sample, handed out on the next call.
    spare_normal: Option<f64>,
}

impl Prng {
    pub fn new(seed: u64) -> Self {
        // Avoid a zero state.
        let seed = if seed == 0 { 0x9E3779B97F4A7C15 } else { seed };
        Self {
            state: seed,
            spare_normal: None,
        }
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    #[inline]
    fn next_f64_01(&mut self) -> f64 {
        // 53 random mantissa bits -> [0,1).
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Sample from a normal distribution with mean 0 and the given standard deviation.
    pub fn next_normal(&mut self, std_dev: f64) -> f64 {
        if let Some(z) = self.spare_normal.take() {
            return z * std_dev;
        }

        // Box-Muller; u1 must stay away from 0 for the log.
        let mut u1 = self.next_f64_01();
        while u1 <= f64::MIN_POSITIVE {
            u1 = self.next_f64_01();
        }
        let u2 = self.next_f64_01();

        let radius = (-2.0 * u1.ln()).sqrt();
        let angle = 2.0 * core::f64::consts::PI * u2;
        self.spare_normal = Some(radius * angle.sin());
        radius * angle.cos() * std_dev
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = Prng::new(7);
        let mut b = Prng::new(7);
        for _ in 0..100 {
            assert_eq!(a.next_normal(1.0), b.next_normal(1.0));
        }
    }

    #[test]
    fn normal_samples_have_plausible_moments() {
        let mut rng = Prng::new(42);
        let n = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| rng.next_normal(2.0)).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;

        assert!(mean.abs() < 0.1, "mean = {mean}");
        assert!((var.sqrt() - 2.0).abs() < 0.1, "std = {}", var.sqrt());
    }

    #[test]
    fn unit_samples_stay_in_range() {
        let mut rng = Prng::new(0);
        for _ in 0..1000 {
            let x = rng.next_f64_01();
            assert!((0.0..1.0).contains(&x));
        }
    }
}
