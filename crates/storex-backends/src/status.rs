//! Status-to-number convention shared by all backends.

/// Textual statuses that are reported as healthy.
const HEALTHY_STATUSES: &[&str] = &["normal", "healthy", "active", "ok", "online", "up"];

/// Maps a textual backend status to a gauge value: `1.0` for healthy statuses
/// (compared case-insensitively, ignoring surrounding whitespace), `0.0` for anything else.
pub fn status_value(status: &str) -> f64 {
    let status = status.trim();
    let is_healthy = HEALTHY_STATUSES
        .iter()
        .any(|healthy| status.eq_ignore_ascii_case(healthy));
    if is_healthy {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_statuses() {
        for status in ["normal", "Healthy", "ACTIVE", "ok", " online ", "up"] {
            assert_eq!(status_value(status), 1.0, "{status}");
        }
        for status in ["", "down", "unhealthy", "error", "degraded", "normally"] {
            assert_eq!(status_value(status), 0.0, "{status}");
        }
    }
}
