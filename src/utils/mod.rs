use std::time::Instant;
use tracing::info;

/// Logs how long a CLI command ran once it goes out of scope.
pub struct CommandTimer {
    command: &'static str,
    detail: String,
    started: Instant,
}

impl CommandTimer {
    pub fn start(command: &'static str, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        info!(command, %detail, "started");
        Self {
            command,
            detail,
            started: Instant::now(),
        }
    }
}

impl Drop for CommandTimer {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        info!(
            command = self.command,
            detail = %self.detail,
            elapsed_ms = elapsed.as_millis() as u64,
            "finished in {:.2?}",
            elapsed
        );
    }
}

/// Record count grouped in thousands: 36525 → "36,525".
pub fn fmt_count(n: u64) -> String {
    let digits = n.to_string();
    let lead = digits.len() % 3;
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.char_indices() {
        if i > 0 && (i + 3 - lead) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Min / mean / max of a series of temperatures, `None` when empty.
pub fn summarize(values: &[f64]) -> Option<(f64, f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some((min, mean, max))
}

/// "-7.9°C", or "—" when there is nothing to show.
pub fn fmt_temp(t: Option<f64>) -> String {
    t.map(|t| format!("{:.1}°C", t)).unwrap_or_else(|| "—".into())
}
