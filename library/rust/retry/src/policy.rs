use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// compute_delay は attempt 回目（0 始まり）の失敗後に待機する時間を返す。
    /// ジッター有効時は ±10% の範囲でばらつかせる。
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        let delay_ms = if self.jitter {
            let jitter_range = capped * 0.1;
            capped - jitter_range + (rand::random::<f64>() * jitter_range * 2.0)
        } else {
            capped
        };
        Duration::from_millis(delay_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_delay_exponential_without_jitter() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_jitter(false);

        assert_eq!(config.compute_delay(0), Duration::from_millis(100));
        assert_eq!(config.compute_delay(1), Duration::from_millis(200));
        assert_eq!(config.compute_delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_compute_delay_capped_by_max_delay() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(3))
            .with_jitter(false);

        assert_eq!(config.compute_delay(6), Duration::from_secs(3));
    }

    #[test]
    fn test_compute_delay_jitter_within_ten_percent() {
        let config = RetryConfig::new(3)
            .with_initial_delay(Duration::from_millis(1000))
            .with_jitter(true);

        for _ in 0..50 {
            let delay = config.compute_delay(0).as_millis();
            assert!((900..=1100).contains(&delay), "delay out of range: {delay}");
        }
    }

    #[test]
    fn test_new_never_allows_zero_attempts() {
        assert_eq!(RetryConfig::new(0).max_attempts, 1);
    }
}
