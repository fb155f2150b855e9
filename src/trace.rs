use std::{fmt::Write, time::Duration};

/// Sub-phase timings captured while executing a single request.
///
/// On a reused connection the DNS, TCP and TLS phases did not happen and stay
/// at zero; `conn_time` is then the time it took to check the connection out
/// of the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Trace {
    pub dns_lookup: Duration,
    /// Time to obtain a usable connection, fresh or pooled.
    pub conn_time: Duration,
    pub tcp_conn_time: Duration,
    pub tls_handshake: Duration,
    /// Request dispatched until the response head arrived.
    pub server_time: Duration,
    /// Response head until the body was fully read.
    pub response_time: Duration,
    pub total_time: Duration,
    pub is_conn_reused: bool,
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Renders a duration in its canonical text form: `0s`, `12ns`, `1.2µs`,
/// `500ms`, `1.5s`, `1m2.5s`, `1h0m0s`.
///
/// Sub-second values use the largest unit that keeps the integer part
/// non-zero. From one second up the value is split into hours, minutes and
/// fractional seconds, with trailing zeros in the fraction dropped.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }

    if nanos < NANOS_PER_SEC {
        let (unit, scale) = match nanos {
            n if n < 1_000 => ("ns", 1),
            n if n < 1_000_000 => ("µs", 1_000),
            _ => ("ms", 1_000_000),
        };
        return format!("{}{unit}", decimal(nanos, scale));
    }

    let secs = nanos / NANOS_PER_SEC;
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let rest = (secs % 60) * NANOS_PER_SEC + nanos % NANOS_PER_SEC;

    let mut out = String::new();
    if hours > 0 {
        let _ = write!(out, "{hours}h");
    }
    if hours > 0 || minutes > 0 {
        let _ = write!(out, "{minutes}m");
    }
    let _ = write!(out, "{}s", decimal(rest, NANOS_PER_SEC));
    out
}

/// `value / scale` as a decimal string without trailing fractional zeros.
fn decimal(value: u128, scale: u128) -> String {
    let whole = value / scale;
    let frac = value % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let width = scale.ilog10() as usize;
    let digits = format!("{frac:0width$}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}
