#![allow(unused)]
use std::cell::RefCell;
use std::time::Duration;

/// Wall-clock spent in each solver callback, collected with the `timing` feature.
#[derive(Default, Clone)]
pub struct TimingStats {
    pub residual_times: Vec<Duration>,
    pub preconditioner_times: Vec<Duration>,
    pub linear_solve_times: Vec<Duration>,
    pub total_time: Duration,
}

fn total_and_avg_ms(times: &[Duration]) -> (f64, f64) {
    let total: Duration = times.iter().sum();
    let ms = total.as_secs_f64() * 1000.0;
    let avg = if times.is_empty() {
        0.0
    } else {
        ms / times.len() as f64
    };
    (ms, avg)
}

impl TimingStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "timing")]
    pub fn print_summary(&self) {
        if self.residual_times.is_empty() {
            return;
        }

        let (res_ms, res_avg) = total_and_avg_ms(&self.residual_times);
        let (pc_ms, pc_avg) = total_and_avg_ms(&self.preconditioner_times);
        let (lin_ms, lin_avg) = total_and_avg_ms(&self.linear_solve_times);
        let accounted = Duration::from_secs_f64((res_ms + pc_ms + lin_ms) / 1000.0);
        let overhead = self.total_time.saturating_sub(accounted);

        println!("\n{}", "=".repeat(60));
        println!("{:^60}", "TIME INTEGRATION TIMING SUMMARY");
        println!("{}", "=".repeat(60));
        println!(
            "Total time:                    {:.3}s",
            self.total_time.as_secs_f64()
        );
        println!("{}", "-".repeat(60));
        println!("Component breakdown:");
        println!(
            "  Residual evaluation:       {:>9.3}ms  (avg: {:>9.3}ms)",
            res_ms, res_avg
        );
        println!(
            "  Preconditioner update:     {:>9.3}ms  (avg: {:>9.3}ms)",
            pc_ms, pc_avg
        );
        println!(
            "  Linear solve:              {:>9.3}ms  (avg: {:>9.3}ms)",
            lin_ms, lin_avg
        );
        println!("{}", "=".repeat(60));
        println!(
            "Overhead/Other:                {:>9.3}ms",
            overhead.as_secs_f64() * 1000.0
        );
        println!(
            "Calls:                         {} residual, {} precon, {} lin.solve\n",
            self.residual_times.len(),
            self.preconditioner_times.len(),
            self.linear_solve_times.len()
        );
    }

    #[cfg(not(feature = "timing"))]
    pub fn print_summary(&self) {}
}

#[cfg(feature = "timing")]
thread_local! {
    static TIMING_STATS: RefCell<TimingStats> = RefCell::new(TimingStats::new());
}

#[cfg(feature = "timing")]
pub fn reset_timing() {
    TIMING_STATS.with(|stats| {
        *stats.borrow_mut() = TimingStats::new();
    });
}

#[cfg(not(feature = "timing"))]
pub fn reset_timing() {}

#[cfg(feature = "timing")]
fn record<F, R>(f: F, slot: fn(&mut TimingStats) -> &mut Vec<Duration>) -> R
where
    F: FnOnce() -> R,
{
    let start = std::time::Instant::now();
    let result = f();
    let elapsed = start.elapsed();
    TIMING_STATS.with(|stats| {
        slot(&mut stats.borrow_mut()).push(elapsed);
    });
    result
}

#[cfg(feature = "timing")]
pub fn record_residual<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    record(f, |s| &mut s.residual_times)
}

#[cfg(not(feature = "timing"))]
pub fn record_residual<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

#[cfg(feature = "timing")]
pub fn record_preconditioner<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    record(f, |s| &mut s.preconditioner_times)
}

#[cfg(not(feature = "timing"))]
pub fn record_preconditioner<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

#[cfg(feature = "timing")]
pub fn record_linear_solve<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    record(f, |s| &mut s.linear_solve_times)
}

#[cfg(not(feature = "timing"))]
pub fn record_linear_solve<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

#[cfg(feature = "timing")]
pub fn finalize_timing(total_time: Duration) -> TimingStats {
    TIMING_STATS.with(|stats| {
        let mut s = stats.borrow_mut();
        s.total_time = total_time;
        s.clone()
    })
}

#[cfg(not(feature = "timing"))]
pub fn finalize_timing(_total_time: Duration) -> TimingStats {
    TimingStats::new()
}

#[cfg(feature = "timing")]
pub fn finalize_and_print(total_time: Duration) {
    let stats = finalize_timing(total_time);
    stats.print_summary();
}

#[cfg(not(feature = "timing"))]
pub fn finalize_and_print(_total_time: Duration) {}
