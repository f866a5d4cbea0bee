// src/app/health/eval.rs

use super::types::{HealthOutcome, PressureVerdict, Snapshot, Thresholds};

/// Evaluate the latest snapshot and health outcome into a verdict.
///
/// Order is fixed and stops at the first hit:
/// delay -> heap -> rss -> health check -> utilization.
/// Every comparison is strictly greater; a value equal to its bound is allowed.
pub fn evaluate_pressure(
    snap: &Snapshot,
    health: &HealthOutcome,
    thresholds: &Thresholds,
) -> PressureVerdict {
    // ----------------------------
    // Scheduler delay
    // ----------------------------
    // `+inf` (empty histogram window) compares greater than any bound.
    if let Some(max) = thresholds.max_event_loop_delay_ms {
        if snap.event_loop_delay_ms > max {
            return PressureVerdict::EventLoopDelay(snap.event_loop_delay_ms);
        }
    }

    // ----------------------------
    // Memory
    // ----------------------------
    if let Some(max) = thresholds.max_heap_used_bytes {
        if snap.heap_used_bytes > max {
            return PressureVerdict::HeapUsedBytes(snap.heap_used_bytes);
        }
    }

    if let Some(max) = thresholds.max_rss_bytes {
        if snap.rss_bytes > max {
            return PressureVerdict::RssBytes(snap.rss_bytes);
        }
    }

    // ----------------------------
    // External health check
    // ----------------------------
    if !health.healthy {
        return PressureVerdict::HealthCheck;
    }

    // ----------------------------
    // Utilization (only when measurable)
    // ----------------------------
    if let (Some(max), Some(elu)) = (
        thresholds.max_event_loop_utilization,
        snap.event_loop_utilized,
    ) {
        if elu > max {
            return PressureVerdict::EventLoopUtilization(elu);
        }
    }

    PressureVerdict::None
}
