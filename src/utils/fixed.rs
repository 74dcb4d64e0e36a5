//! Q16.16 fixed-point numbers.
//!
//! Every power, threshold and ratio in the modem is computed in this format
//! so that detection behaves the same on every host. Samples are full-scale
//! `i32` PCM and map to `[-1.0, 1.0)`.

use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// Number of fractional bits
pub const FRAC_BITS: u32 = 16;

/// Largest integer part a [`Fixed`] holds. Sums of full-scale samples must
/// stay below it.
pub const MAX_INT: i32 = i16::MAX as i32;

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fixed(i32);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);
    pub const ONE: Fixed = Fixed(1 << FRAC_BITS);

    pub const fn from_raw(raw: i32) -> Self {
        Fixed(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn from_int(value: i32) -> Self {
        Fixed(value << FRAC_BITS)
    }

    /// Rounds to the nearest representable value, saturating at the bounds.
    pub fn from_f64(value: f64) -> Self {
        Fixed((value * (1i64 << FRAC_BITS) as f64).round() as i32)
    }

    /// Full-scale PCM sample to `[-1.0, 1.0)`.
    pub const fn from_sample(sample: i32) -> Self {
        Fixed(sample >> (31 - FRAC_BITS))
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / (1i64 << FRAC_BITS) as f64
    }

    pub fn abs(self) -> Self {
        Fixed(self.0.saturating_abs())
    }

    pub fn clamp(self, lo: Fixed, hi: Fixed) -> Self {
        Fixed(self.0.clamp(lo.0, hi.0))
    }

    /// `a * (1 - t) + b * t`
    pub fn lerp(a: Fixed, b: Fixed, t: Fixed) -> Self {
        a * (Fixed::ONE - t) + b * t
    }
}

impl Add for Fixed {
    type Output = Fixed;
    fn add(self, rhs: Fixed) -> Fixed {
        Fixed(self.0.wrapping_add(rhs.0))
    }
}

impl AddAssign for Fixed {
    fn add_assign(&mut self, rhs: Fixed) {
        *self = *self + rhs;
    }
}

impl Sub for Fixed {
    type Output = Fixed;
    fn sub(self, rhs: Fixed) -> Fixed {
        Fixed(self.0.wrapping_sub(rhs.0))
    }
}

impl SubAssign for Fixed {
    fn sub_assign(&mut self, rhs: Fixed) {
        *self = *self - rhs;
    }
}

impl Neg for Fixed {
    type Output = Fixed;
    fn neg(self) -> Fixed {
        Fixed(self.0.wrapping_neg())
    }
}

impl Mul for Fixed {
    type Output = Fixed;
    fn mul(self, rhs: Fixed) -> Fixed {
        Fixed(((self.0 as i64 * rhs.0 as i64) >> FRAC_BITS) as i32)
    }
}

/// Panics on a zero divisor, like integer division.
impl Div for Fixed {
    type Output = Fixed;
    fn div(self, rhs: Fixed) -> Fixed {
        Fixed((((self.0 as i64) << FRAC_BITS) / rhs.0 as i64) as i32)
    }
}

impl fmt::Debug for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fixed({:.5})", self.to_f64())
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.to_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_f64_rounds() {
        assert_eq!(Fixed::from_f64(1.0), Fixed::ONE);
        assert_eq!(Fixed::from_f64(0.5).raw(), 1 << 15);
        assert_eq!(Fixed::from_f64(-0.25).raw(), -(1 << 14));
        // 1.5 ulp rounds up to 2
        let ulp = 1.0 / 65536.0;
        assert_eq!(Fixed::from_f64(1.5 * ulp).raw(), 2);
    }

    #[test]
    fn test_mul_div() {
        let a = Fixed::from_f64(1.5);
        let b = Fixed::from_f64(-2.0);
        assert_eq!(a * b, Fixed::from_f64(-3.0));
        assert_eq!(Fixed::from_f64(-3.0) / b, a);
        assert_eq!(Fixed::from_int(7) / Fixed::from_int(2), Fixed::from_f64(3.5));
    }

    #[test]
    fn test_from_sample() {
        assert_eq!(Fixed::from_sample(0), Fixed::ZERO);
        assert_eq!(Fixed::from_sample(i32::MIN), -Fixed::ONE);
        let max = Fixed::from_sample(i32::MAX);
        assert!(Fixed::ONE - max <= Fixed::from_raw(1));
    }

    #[test]
    fn test_lerp() {
        let a = Fixed::from_f64(-1.0);
        let b = Fixed::from_f64(1.0);
        assert_eq!(Fixed::lerp(a, b, Fixed::ZERO), a);
        assert_eq!(Fixed::lerp(a, b, Fixed::ONE), b);
        assert_eq!(Fixed::lerp(a, b, Fixed::from_f64(0.5)), Fixed::ZERO);
        assert_eq!(
            Fixed::lerp(a, b, Fixed::from_f64(0.75)),
            Fixed::from_f64(0.5)
        );
    }

    #[test]
    fn test_ordering_and_clamp() {
        assert!(Fixed::from_f64(-0.1) < Fixed::ZERO);
        assert_eq!(
            Fixed::from_int(3).clamp(-Fixed::ONE, Fixed::ONE),
            Fixed::ONE
        );
        assert_eq!(Fixed::from_f64(-0.5).abs(), Fixed::from_f64(0.5));
    }
}
