use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

/// A 128-bit decimal value stored in normalized mantissa/exponent form.
///
/// The value represented is `mantissa * 10^exponent`. Trailing zeros are
/// stripped from the mantissa on construction so that equal values have equal
/// representations, which makes the derived semantics of [PartialEq] usable
/// for hashing and grouping.
///
/// The engine never encodes raw BSON, so only ordering and arithmetic
/// semantics are observable; the IEEE 754-2008 interchange encoding is not
/// implemented.
#[derive(Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
pub struct Decimal128 {
    mantissa: i128,
    exponent: i32,
}

impl Decimal128 {
    /// Creates a decimal from a mantissa and a power-of-ten exponent.
    pub fn new(mantissa: i128, exponent: i32) -> Self {
        let mut decimal = Decimal128 { mantissa, exponent };
        decimal.normalize();
        decimal
    }

    pub const ZERO: Decimal128 = Decimal128 {
        mantissa: 0,
        exponent: 0,
    };

    pub fn mantissa(&self) -> i128 {
        self.mantissa
    }

    pub fn exponent(&self) -> i32 {
        self.exponent
    }

    fn normalize(&mut self) {
        if self.mantissa == 0 {
            self.exponent = 0;
            return;
        }
        while self.mantissa % 10 == 0 {
            self.mantissa /= 10;
            self.exponent += 1;
        }
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa == 0
    }

    pub fn is_negative(&self) -> bool {
        self.mantissa < 0
    }

    /// Converts to the nearest `f64`. Lossy for mantissas wider than 53 bits.
    pub fn to_f64(&self) -> f64 {
        self.mantissa as f64 * 10f64.powi(self.exponent)
    }

    /// Returns the exact `i64` value if the decimal is integral and in range.
    pub fn to_i64(&self) -> Option<i64> {
        let mut mantissa = self.mantissa;
        let mut exponent = self.exponent;
        while exponent > 0 {
            mantissa = mantissa.checked_mul(10)?;
            exponent -= 1;
        }
        while exponent < 0 {
            if mantissa % 10 != 0 {
                return None;
            }
            mantissa /= 10;
            exponent += 1;
        }
        i64::try_from(mantissa).ok()
    }

    pub fn from_i64(value: i64) -> Self {
        Decimal128::new(value as i128, 0)
    }

    /// Converts from an `f64` by way of its shortest decimal representation.
    pub fn from_f64(value: f64) -> DolomiteResult<Self> {
        if !value.is_finite() {
            log::error!("Cannot represent non-finite value {} as decimal", value);
            return Err(DolomiteError::new(
                &format!("Cannot represent non-finite value {} as decimal", value),
                ErrorKind::BadValue,
            ));
        }
        format!("{}", value).parse()
    }

    fn align(&self, other: &Decimal128) -> Option<(i128, i128, i32)> {
        let mut a = self.mantissa;
        let mut b = other.mantissa;
        let mut exp_a = self.exponent;
        let mut exp_b = other.exponent;
        while exp_a > exp_b {
            a = a.checked_mul(10)?;
            exp_a -= 1;
        }
        while exp_b > exp_a {
            b = b.checked_mul(10)?;
            exp_b -= 1;
        }
        Some((a, b, exp_a))
    }

    pub fn checked_add(&self, other: &Decimal128) -> Option<Decimal128> {
        let (a, b, exponent) = self.align(other)?;
        Some(Decimal128::new(a.checked_add(b)?, exponent))
    }

    pub fn checked_sub(&self, other: &Decimal128) -> Option<Decimal128> {
        let (a, b, exponent) = self.align(other)?;
        Some(Decimal128::new(a.checked_sub(b)?, exponent))
    }

    pub fn checked_mul(&self, other: &Decimal128) -> Option<Decimal128> {
        Some(Decimal128::new(
            self.mantissa.checked_mul(other.mantissa)?,
            self.exponent.checked_add(other.exponent)?,
        ))
    }
}

impl FromStr for Decimal128 {
    type Err = DolomiteError;

    fn from_str(input: &str) -> DolomiteResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(DolomiteError::new(
                "Empty string cannot be parsed as decimal",
                ErrorKind::BadValue,
            ));
        }

        // split off a decimal exponent if present
        let (number, extra_exponent) = match trimmed.find(['e', 'E']) {
            Some(pos) => {
                let exponent: i32 = trimmed[pos + 1..].parse().map_err(|_| {
                    DolomiteError::new(
                        &format!("Failed to parse '{}' as decimal", input),
                        ErrorKind::BadValue,
                    )
                })?;
                (&trimmed[..pos], exponent)
            }
            None => (trimmed, 0),
        };

        let (integral, fraction) = match number.find('.') {
            Some(pos) => (&number[..pos], &number[pos + 1..]),
            None => (number, ""),
        };

        let digits = format!("{}{}", integral, fraction);
        let mantissa: i128 = digits.parse().map_err(|_| {
            DolomiteError::new(
                &format!("Failed to parse '{}' as decimal", input),
                ErrorKind::BadValue,
            )
        })?;

        let exponent = extra_exponent
            .checked_sub(fraction.len() as i32)
            .ok_or_else(|| {
                DolomiteError::new(
                    &format!("Exponent out of range in '{}'", input),
                    ErrorKind::BadValue,
                )
            })?;

        Ok(Decimal128::new(mantissa, exponent))
    }
}

impl PartialOrd for Decimal128 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal128 {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.mantissa.signum() != other.mantissa.signum() {
            return self.mantissa.signum().cmp(&other.mantissa.signum());
        }
        match self.align(other) {
            Some((a, b, _)) => a.cmp(&b),
            // alignment overflowed i128; magnitudes are far apart, so the
            // f64 approximation is exact enough to order them
            None => self
                .to_f64()
                .partial_cmp(&other.to_f64())
                .unwrap_or(Ordering::Equal),
        }
    }
}

impl Display for Decimal128 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.exponent >= 0 {
            write!(f, "{}{}", self.mantissa, "0".repeat(self.exponent as usize))
        } else {
            let digits = self.mantissa.unsigned_abs().to_string();
            let sign = if self.mantissa < 0 { "-" } else { "" };
            let scale = (-self.exponent) as usize;
            if digits.len() > scale {
                let split = digits.len() - scale;
                write!(f, "{}{}.{}", sign, &digits[..split], &digits[split..])
            } else {
                write!(f, "{}0.{}{}", sign, "0".repeat(scale - digits.len()), digits)
            }
        }
    }
}

impl Debug for Decimal128 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Decimal128({})", self)
    }
}
