//! Alignment arithmetic for container layouts.

/// Greatest common divisor.
pub const fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Least common multiple. Returns 0 if either input is 0.
pub const fn lcm(a: u64, b: u64) -> u64 {
    if a == 0 || b == 0 {
        return 0;
    }
    a / gcd(a, b) * b
}

/// Round `value` up to the next multiple of `alignment`.
///
/// Returns `None` on overflow or if `alignment` is 0.
pub fn align_up(value: u64, alignment: u64) -> Option<u64> {
    if alignment == 0 {
        return None;
    }
    let rem = value % alignment;
    if rem == 0 {
        Some(value)
    } else {
        value.checked_add(alignment - rem)
    }
}

/// Number of zero bytes needed to bring `value` to a multiple of `alignment`.
pub fn padding_for(value: u64, alignment: u64) -> u64 {
    align_up(value, alignment).map_or(0, |aligned| aligned - value)
}

/// Check whether `value` is a multiple of `alignment`.
#[inline]
pub fn is_aligned(value: u64, alignment: u64) -> bool {
    alignment != 0 && value % alignment == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lcm() {
        assert_eq!(lcm(4, 16), 16);
        assert_eq!(lcm(4, 12), 12);
        assert_eq!(lcm(4, 6), 12);
        assert_eq!(lcm(8, 12), 24);
        assert_eq!(lcm(0, 4), 0);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), Some(0));
        assert_eq!(align_up(13, 4), Some(16));
        assert_eq!(align_up(24, 12), Some(24));
        assert_eq!(align_up(5, 0), None);
        assert_eq!(align_up(u64::MAX, 8), None);
    }

    #[test]
    fn test_padding_for() {
        assert_eq!(padding_for(13, 4), 3);
        assert_eq!(padding_for(16, 4), 0);
        assert!(is_aligned(48, 16));
        assert!(!is_aligned(50, 16));
    }
}
