//! Parsing for Kubernetes resource quantities ("500m", "4", "16Gi", "1e3").
//! Lenient by design: a quantity that does not parse contributes zero rather
//! than failing a watch handler.

/// Split a quantity into its numeric part and suffix. An 'e'/'E' followed by
/// a digit (or sign) is scientific notation, not a suffix.
fn split_suffix(q: &str) -> (&str, &str) {
    for (i, c) in q.char_indices() {
        if c.is_ascii_alphabetic() {
            let exponent = (c == 'e' || c == 'E')
                && i > 0
                && q[i + c.len_utf8()..]
                    .chars()
                    .next()
                    .map(|n| n.is_ascii_digit() || n == '+' || n == '-')
                    .unwrap_or(false);
            if !exponent {
                return (&q[..i], &q[i..]);
            }
        }
    }
    (q, "")
}

fn multiplier(suffix: &str) -> Option<f64> {
    Some(match suffix {
        "" => 1.0,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => (1u64 << 20) as f64,
        "Gi" => (1u64 << 30) as f64,
        "Ti" => (1u64 << 40) as f64,
        "Pi" => (1u64 << 50) as f64,
        "Ei" => (1u64 << 60) as f64,
        _ => return None,
    })
}

fn parse_base(q: &str) -> Option<f64> {
    let (num, suffix) = split_suffix(q.trim());
    let value: f64 = num.parse().ok()?;
    Some(value * multiplier(suffix)?)
}

/// CPU quantity → millicores, rounded up.
pub fn parse_millicores(q: &str) -> Option<i64> {
    parse_base(q).map(|v| (v * 1000.0).ceil() as i64)
}

/// Byte quantity → kibibytes, rounded up (1025 bytes is 2Ki).
pub fn parse_kibibytes(q: &str) -> Option<i64> {
    parse_base(q).map(|v| (v / 1024.0).ceil() as i64)
}

/// Plain count (GPUs).
pub fn parse_count(q: &str) -> Option<i64> {
    parse_base(q).map(|v| v.ceil() as i64)
}
