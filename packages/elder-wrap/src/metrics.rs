//! Prometheus metrics (lock-free atomics).

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    // --- Traffic ---
    pub relay_requests: AtomicU64,
    pub submit_total: AtomicU64,
    pub submit_success: AtomicU64,
    pub submit_error: AtomicU64,
    pub verification_rejected: AtomicU64,
    pub confirmation_timeouts: AtomicU64,

    // --- Forwarding ---
    pub forward_total: AtomicU64,
    pub forward_error: AtomicU64,

    // --- Submission latency (μs, max updated via CAS) ---
    pub submit_duration_us_sum: AtomicU64,
    pub submit_duration_us_max: AtomicU64,

    // --- Chains ---
    pub chain_rpc_errors: AtomicU64,
}

impl Metrics {
    const fn new() -> Self {
        Self {
            relay_requests: AtomicU64::new(0),
            submit_total: AtomicU64::new(0),
            submit_success: AtomicU64::new(0),
            submit_error: AtomicU64::new(0),
            verification_rejected: AtomicU64::new(0),
            confirmation_timeouts: AtomicU64::new(0),
            forward_total: AtomicU64::new(0),
            forward_error: AtomicU64::new(0),
            submit_duration_us_sum: AtomicU64::new(0),
            submit_duration_us_max: AtomicU64::new(0),
            chain_rpc_errors: AtomicU64::new(0),
        }
    }

    pub fn record_submit_duration(&self, start: Instant) {
        let us = start.elapsed().as_micros() as u64;
        self.submit_duration_us_sum.fetch_add(us, Ordering::Relaxed);
        self.submit_duration_us_max.fetch_max(us, Ordering::Relaxed);
    }

    /// Tally a failed submit by stage.
    pub fn record_submit_error(&self, err: &crate::Error) {
        self.submit_error.fetch_add(1, Ordering::Relaxed);
        if err.is_verification() {
            self.verification_rejected.fetch_add(1, Ordering::Relaxed);
        }
        if matches!(err, crate::Error::ConfirmationTimeout { .. }) {
            self.confirmation_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Render in Prometheus text exposition format. Resets the max gauge.
    pub fn render(&self, identities: usize, in_flight: u32) -> String {
        let dur_sum_s = self.submit_duration_us_sum.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let dur_max_s =
            self.submit_duration_us_max.swap(0, Ordering::Relaxed) as f64 / 1_000_000.0;

        let counters: [(&str, &str, &AtomicU64); 9] = [
            ("relay_requests_total", "Inbound relay calls.", &self.relay_requests),
            ("submit_total", "eth_sendRawTransaction calls.", &self.submit_total),
            ("submit_success_total", "Submissions confirmed on the router chain.", &self.submit_success),
            ("submit_error_total", "Failed submissions (any stage).", &self.submit_error),
            ("verification_rejected_total", "Submissions rejected during verification.", &self.verification_rejected),
            ("confirmation_timeouts_total", "Broadcasts not observed on chain in time.", &self.confirmation_timeouts),
            ("forward_total", "Calls forwarded to a rollapp RPC.", &self.forward_total),
            ("forward_error_total", "Forwarding failures.", &self.forward_error),
            ("chain_rpc_errors_total", "Rollapp and router chain query errors.", &self.chain_rpc_errors),
        ];

        let mut out = String::with_capacity(2048);
        for (name, help, value) in counters {
            let _ = write!(
                out,
                "# HELP elder_wrap_{name} {help}\n# TYPE elder_wrap_{name} counter\nelder_wrap_{name} {}\n",
                value.load(Ordering::Relaxed)
            );
        }
        let _ = write!(
            out,
            "\
# HELP elder_wrap_submit_duration_seconds_sum Total submission time (seconds).\n\
# TYPE elder_wrap_submit_duration_seconds_sum counter\n\
elder_wrap_submit_duration_seconds_sum {dur_sum_s:.6}\n\
# HELP elder_wrap_submit_duration_seconds_max Max submission time since last scrape (seconds).\n\
# TYPE elder_wrap_submit_duration_seconds_max gauge\n\
elder_wrap_submit_duration_seconds_max {dur_max_s:.6}\n\
# HELP elder_wrap_identities Managed signing identities with a submission lock.\n\
# TYPE elder_wrap_identities gauge\n\
elder_wrap_identities {identities}\n\
# HELP elder_wrap_submissions_in_flight Submissions waiting for or holding a lock.\n\
# TYPE elder_wrap_submissions_in_flight gauge\n\
elder_wrap_submissions_in_flight {in_flight}\n"
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_all_series() {
        let m = Metrics::new();
        m.submit_total.fetch_add(3, Ordering::Relaxed);
        m.record_submit_error(&crate::Error::NonceMismatch {
            expected: 1,
            got: 2,
        });
        let text = m.render(2, 1);
        assert!(text.contains("elder_wrap_submit_total 3\n"));
        assert!(text.contains("elder_wrap_submit_error_total 1\n"));
        assert!(text.contains("elder_wrap_verification_rejected_total 1\n"));
        assert!(text.contains("elder_wrap_identities 2\n"));
        assert!(text.contains("elder_wrap_submissions_in_flight 1\n"));
    }

    #[test]
    fn test_max_duration_resets_on_scrape() {
        let m = Metrics::new();
        m.submit_duration_us_max.store(1_500_000, Ordering::Relaxed);
        assert!(m.render(0, 0).contains("elder_wrap_submit_duration_seconds_max 1.500000"));
        assert!(m.render(0, 0).contains("elder_wrap_submit_duration_seconds_max 0.000000"));
    }
}
