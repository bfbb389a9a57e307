//! 32 bit fixed point number with 8 bits of fractional precision.

#![allow(clippy::cast_precision_loss)]

/// A signed 24.8 fixed point number, the wire representation of
/// fractional coordinates.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Fixed(pub(crate) i32);

impl Fixed {
    /// The raw 24.8 representation.
    #[must_use]
    pub const fn into_raw(self) -> i32 {
        self.0
    }

    /// Builds a `Fixed` from its raw 24.8 representation.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Returns the absolute value.
    #[must_use]
    pub const fn abs(self) -> Self {
        Self(self.0.abs())
    }
}

impl std::fmt::Display for Fixed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", f64::from(*self))
    }
}

impl<T: num_traits::AsPrimitive<f64>> From<T> for Fixed {
    fn from(value: T) -> Self {
        Self((value.as_() * 256.0).round() as i32)
    }
}

impl From<Fixed> for f64 {
    fn from(value: Fixed) -> Self {
        f64::from(value.0) / 256.0
    }
}

impl From<Fixed> for f32 {
    fn from(value: Fixed) -> Self {
        value.0 as f32 / 256.0
    }
}

impl From<Fixed> for i32 {
    fn from(value: Fixed) -> Self {
        value.0 / 256
    }
}

impl std::ops::Add for Fixed {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Fixed {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl std::ops::Neg for Fixed {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::Fixed;

    #[test]
    fn integer_conversions() {
        let fix = Fixed::from(54);
        assert_eq!(fix.into_raw(), 54 * 256);
        assert_eq!(i32::from(fix), 54);
        assert_eq!(i32::from(Fixed::from(-23)), -23);
    }

    #[test]
    fn float_conversions() {
        let fix = Fixed::from(20.456);
        assert!((f64::from(fix) - 20.456).abs() < 0.01);
        assert!((f32::from(fix) - 20.456_f32).abs() < 0.01);
    }

    #[test]
    fn arithmetic() {
        let a = Fixed::from(12.5);
        let b = Fixed::from(7.5);
        assert_eq!(f64::from(a + b), 20.0);
        assert_eq!(f64::from(a - b), 5.0);
        assert_eq!(f64::from(-a), -12.5);
        assert_eq!((-a).abs(), a);
    }
}
