//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Centavos?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In floating point:                                                     │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  Splitting a table bill:                                                │
//! │    R$ 100,00 / 3 = R$ 33,33 (×3 = R$ 99,99)  → Lost R$ 0,01!           │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Centavos                                         │
//! │    split_evenly(3) = [3334, 3333, 3333]                                 │
//! │    The leftover centavo is assigned explicitly, never lost              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use caixa_core::money::Money;
//!
//! let price = Money::from_cents(1250); // R$ 12,50
//! let total = price * 2 + Money::from_cents(500);
//! assert_eq!(total.cents(), 3000);
//!
//! // Operator input is parsed, never converted from floats
//! let typed = Money::parse("R$ 1.234,56").unwrap();
//! assert_eq!(typed.cents(), 123_456);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in centavos (the smallest BRL unit).
///
/// ## Design Decisions
/// - **i64 (signed)**: intermediate results (change, variance) can be negative
/// - **Single field tuple struct**: serializes as a bare integer
/// - **Checked variants**: settlement math uses `checked_add`/`checked_sub`
///   so an overflow surfaces as `CoreError::Arithmetic` instead of wrapping
///
/// ## Where Money Flows
/// ```text
/// LineItem.unit_price ──► LineItem.line_total ──► Order.subtotal
///                                                      │
///                         discount / surcharge ────────┤
///                                                      ▼
///                                                Order.total
///                                                      │
///   Payment.amount ──► Settlement.total_collected ─────┤
///                                                      ▼
///                                              Order.outstanding
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

/// Default settlement tolerance: R$ 0,10.
///
/// A remaining balance at or below this value settles the order.
pub const DEFAULT_TOLERANCE: Money = Money::from_cents(10);

impl Money {
    /// Creates a Money value from centavos.
    ///
    /// ## Example
    /// ```rust
    /// use caixa_core::money::Money;
    ///
    /// let price = Money::from_cents(1099); // R$ 10,99
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from reais and centavos.
    ///
    /// For negative amounts, only the major unit should be negative:
    /// `from_major_minor(-5, 50)` is -R$ 5,50.
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Returns the value in centavos.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the whole reais portion.
    #[inline]
    pub const fn reais(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the centavos portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Clamps negative values to zero.
    ///
    /// ## Example
    /// ```rust
    /// use caixa_core::money::Money;
    ///
    /// assert_eq!(Money::from_cents(-30).non_negative(), Money::zero());
    /// assert_eq!(Money::from_cents(30).non_negative().cents(), 30);
    /// ```
    #[inline]
    pub const fn non_negative(self) -> Self {
        if self.0 < 0 {
            Money(0)
        } else {
            self
        }
    }

    /// Adds two values, failing with `CoreError::Arithmetic` on overflow.
    pub fn checked_add(self, other: Money) -> CoreResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| CoreError::Arithmetic(format!("overflow adding {} to {}", other, self)))
    }

    /// Subtracts two values, failing with `CoreError::Arithmetic` on overflow.
    pub fn checked_sub(self, other: Money) -> CoreResult<Money> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or_else(|| {
                CoreError::Arithmetic(format!("overflow subtracting {} from {}", other, self))
            })
    }

    /// Multiplies by a quantity, failing with `CoreError::Arithmetic` on overflow.
    pub fn checked_mul(self, qty: i64) -> CoreResult<Money> {
        self.0
            .checked_mul(qty)
            .map(Money)
            .ok_or_else(|| CoreError::Arithmetic(format!("overflow multiplying {} by {}", self, qty)))
    }

    /// Sums an iterator of values with overflow checking.
    pub fn checked_sum<I>(values: I) -> CoreResult<Money>
    where
        I: IntoIterator<Item = Money>,
    {
        values
            .into_iter()
            .try_fold(Money::zero(), |acc, value| acc.checked_add(value))
    }

    /// Multiplies money by a quantity.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Prices a weighed item: `price_per_kg × grams / 1000`, rounded half-up.
    ///
    /// ## Example
    /// ```rust
    /// use caixa_core::money::Money;
    ///
    /// // Self-service buffet at R$ 69,90/kg, plate of 455 g
    /// let plate = Money::price_by_weight(Money::from_cents(6990), 455);
    /// // 6990 × 455 / 1000 = 3180.45 → 3180
    /// assert_eq!(plate.cents(), 3180);
    /// ```
    pub fn price_by_weight(price_per_kg: Money, grams: u32) -> Money {
        // i128 keeps the intermediate product from overflowing
        let raw = price_per_kg.0 as i128 * grams as i128;
        let rounded = if raw >= 0 {
            (raw + 500) / 1000
        } else {
            (raw - 500) / 1000
        };
        Money(rounded as i64)
    }

    /// Splits a non-negative amount into `parts` shares that sum exactly to
    /// the original. Leftover centavos go to the first shares.
    ///
    /// ## Example
    /// ```rust
    /// use caixa_core::money::Money;
    ///
    /// let shares = Money::from_cents(10000).split_evenly(3);
    /// let cents: Vec<i64> = shares.iter().map(|m| m.cents()).collect();
    /// assert_eq!(cents, vec![3334, 3333, 3333]);
    /// ```
    pub fn split_evenly(&self, parts: usize) -> Vec<Money> {
        if parts == 0 {
            return Vec::new();
        }
        let total = self.0.max(0);
        let n = parts as i64;
        let base = total / n;
        let leftover = (total % n) as usize;

        (0..parts)
            .map(|i| {
                if i < leftover {
                    Money(base + 1)
                } else {
                    Money(base)
                }
            })
            .collect()
    }

    /// Parses operator input such as `"12,50"`, `"12.5"`, `"R$ 1.234,56"`.
    ///
    /// ## Rules
    /// - An optional `R$` prefix and surrounding whitespace are ignored
    /// - The last `,` or `.` followed by one or two digits is the decimal
    ///   separator; every other `,` or `.` is a thousands separator
    /// - A leading `-` yields a negative value
    ///
    /// ## Errors
    /// - Empty input: `ValidationError::Required`
    /// - Non-numeric input or overflow: `CoreError::Arithmetic`
    pub fn parse(input: &str) -> CoreResult<Money> {
        let trimmed = input.trim();
        let (negative, unsigned) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest.trim()),
            None => (false, trimmed),
        };
        let body = unsigned.strip_prefix("R$").unwrap_or(unsigned).trim();

        if body.is_empty() {
            return Err(ValidationError::Required {
                field: "amount".to_string(),
            }
            .into());
        }

        let (int_part, frac_part) = match body.rfind([',', '.']) {
            Some(pos) if body.len() - pos - 1 <= 2 => (&body[..pos], &body[pos + 1..]),
            _ => (body, ""),
        };

        let int_digits: String = int_part
            .chars()
            .filter(|c| !matches!(c, '.' | ',' | ' '))
            .collect();

        let not_a_number = || CoreError::Arithmetic(format!("'{}' is not a monetary amount", input));

        if int_digits.is_empty() && frac_part.is_empty() {
            return Err(not_a_number());
        }
        if !int_digits.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return Err(not_a_number());
        }

        let reais: i64 = if int_digits.is_empty() {
            0
        } else {
            int_digits.parse().map_err(|_| not_a_number())?
        };
        let centavos: i64 = match frac_part.len() {
            0 => 0,
            1 => frac_part.parse::<i64>().map_err(|_| not_a_number())? * 10,
            _ => frac_part.parse().map_err(|_| not_a_number())?,
        };

        let cents = reais
            .checked_mul(100)
            .and_then(|c| c.checked_add(centavos))
            .ok_or_else(not_a_number)?;

        Ok(Money(if negative { -cents } else { cents }))
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Formats as Brazilian currency: `R$ 1.234,56`, `-R$ 5,50`.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let digits = self.reais().abs().to_string();

        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push('.');
            }
            grouped.push(ch);
        }

        write!(f, "{}R$ {},{:02}", sign, grouped, self.cents_part())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
