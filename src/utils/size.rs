/// Convert a shorthand size string ("256M", "1g", "512k", "100") to bytes.
///
/// The leading run of decimal digits is the number; a trailing `g`, `m` or `k`
/// (any case) scales it. Anything else is read as plain bytes, and a string with
/// no leading digits is zero.
pub fn parse_byte_size(value: &str) -> u64 {
    let value = value.trim();

    let digits = value
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0u64, |acc, d| {
            acc.saturating_mul(10).saturating_add(u64::from(d - b'0'))
        });

    let multiplier = match value.chars().last().map(|c| c.to_ascii_lowercase()) {
        Some('g') => 1024 * 1024 * 1024,
        Some('m') => 1024 * 1024,
        Some('k') => 1024,
        _ => 1,
    };

    digits.saturating_mul(multiplier)
}
