use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    sandbox_created_total: AtomicU64,
    sandbox_reused_total: AtomicU64,
    sandbox_pooled_total: AtomicU64,
    sandbox_destroyed_total: AtomicU64,
    verification_failed_total: AtomicU64,
    render_submitted_total: AtomicU64,
    render_started_total: AtomicU64,
    render_succeeded_total: AtomicU64,
    render_failed_total: AtomicU64,
    render_timed_out_total: AtomicU64,
    render_queue_depth: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sandbox_created(&self) {
        self.sandbox_created_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sandbox_reused(&self) {
        self.sandbox_reused_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sandbox_pooled(&self) {
        self.sandbox_pooled_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sandbox_destroyed(&self) {
        self.sandbox_destroyed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn verification_failed(&self) {
        self.verification_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render_submitted(&self) {
        self.render_submitted_total.fetch_add(1, Ordering::Relaxed);
        self.render_queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render_started(&self) {
        self.render_started_total.fetch_add(1, Ordering::Relaxed);
        self.decrement_queue_depth();
    }

    pub fn render_succeeded(&self) {
        self.render_succeeded_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render_failed(&self) {
        self.render_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render_timed_out(&self) {
        self.render_timed_out_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render_prometheus(&self) -> String {
        let counters = [
            ("sandbox_created_total", "counter", &self.sandbox_created_total),
            ("sandbox_reused_total", "counter", &self.sandbox_reused_total),
            ("sandbox_pooled_total", "counter", &self.sandbox_pooled_total),
            ("sandbox_destroyed_total", "counter", &self.sandbox_destroyed_total),
            (
                "sandbox_verification_failed_total",
                "counter",
                &self.verification_failed_total,
            ),
            ("render_submitted_total", "counter", &self.render_submitted_total),
            ("render_started_total", "counter", &self.render_started_total),
            ("render_succeeded_total", "counter", &self.render_succeeded_total),
            ("render_failed_total", "counter", &self.render_failed_total),
            ("render_timed_out_total", "counter", &self.render_timed_out_total),
            ("render_queue_depth", "gauge", &self.render_queue_depth),
        ];

        let mut out = String::new();
        for (name, kind, value) in counters {
            out.push_str(&format!(
                "# TYPE {name} {kind}\n{name} {}\n",
                value.load(Ordering::Relaxed)
            ));
        }
        out
    }

    fn decrement_queue_depth(&self) {
        let mut current = self.render_queue_depth.load(Ordering::Relaxed);
        while current > 0 {
            match self.render_queue_depth.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}
