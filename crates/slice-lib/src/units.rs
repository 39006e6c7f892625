//! Resource quantity conversions and the usage hysteresis rule
//!
//! Usage moves through exactly one pipeline:
//!
//! - raw: parsed metrics-API samples, CPU in nano-cores, memory in kibibytes
//! - stored: what the slice status holds, CPU in milli-cores, memory in mebibytes
//! - comparison: stored values re-expressed in nano-cores and kibibytes
//!
//! Both the previously stored total and the freshly measured total go through
//! `stored` before they are compared, so the hysteresis test never compares
//! values of different precision.

use std::iter::Sum;
use std::ops::{Add, AddAssign};

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::error::{Error, Result};
use crate::models::{ContainerUsage, ResourceUsage};

pub const NANOCORES_PER_MILLICORE: u64 = 1_000_000;
pub const KIB_PER_MIB: u64 = 1024;

/// Relative change, in whole percent, tolerated before usage is republished
pub const HYSTERESIS_PERCENT: i64 = 5;

const NANOCORES_PER_CORE_EXP10: i32 = 9;

/// Usage in source units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawUsage {
    pub cpu_nanocores: u64,
    pub memory_kib: u64,
}

impl RawUsage {
    pub fn new(cpu_nanocores: u64, memory_kib: u64) -> Self {
        Self {
            cpu_nanocores,
            memory_kib,
        }
    }

    pub fn from_quantities(cpu: &Quantity, memory: &Quantity) -> Result<Self> {
        Ok(Self {
            cpu_nanocores: cpu_nanocores(cpu)?,
            memory_kib: memory_kib(memory)?,
        })
    }

    pub fn is_zero(&self) -> bool {
        self.cpu_nanocores == 0 && self.memory_kib == 0
    }

    /// Truncating conversion to storage units
    pub fn stored(&self) -> StoredUsage {
        StoredUsage {
            cpu_millicores: self.cpu_nanocores / NANOCORES_PER_MILLICORE,
            memory_mib: self.memory_kib / KIB_PER_MIB,
        }
    }
}

impl Add for RawUsage {
    type Output = RawUsage;

    fn add(self, rhs: RawUsage) -> RawUsage {
        RawUsage {
            cpu_nanocores: self.cpu_nanocores.saturating_add(rhs.cpu_nanocores),
            memory_kib: self.memory_kib.saturating_add(rhs.memory_kib),
        }
    }
}

impl AddAssign for RawUsage {
    fn add_assign(&mut self, rhs: RawUsage) {
        *self = *self + rhs;
    }
}

impl Sum for RawUsage {
    fn sum<I: Iterator<Item = RawUsage>>(iter: I) -> Self {
        iter.fold(RawUsage::default(), Add::add)
    }
}

/// Usage in the units persisted on the slice status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoredUsage {
    pub cpu_millicores: u64,
    pub memory_mib: u64,
}

impl StoredUsage {
    /// Read a persisted usage back through the same pipeline as fresh samples
    pub fn from_resource_usage(usage: &ResourceUsage) -> Result<Self> {
        Ok(RawUsage::from_quantities(&usage.cpu, &usage.memory)?.stored())
    }

    pub fn to_resource_usage(&self) -> ResourceUsage {
        ResourceUsage {
            cpu: Quantity(format!("{}m", self.cpu_millicores)),
            memory: Quantity(format!("{}Mi", self.memory_mib)),
        }
    }

    pub fn comparison(&self) -> ComparisonUsage {
        ComparisonUsage {
            cpu_nanocores: widen(self.cpu_millicores) * widen(NANOCORES_PER_MILLICORE),
            memory_kib: widen(self.memory_mib) * widen(KIB_PER_MIB),
        }
    }
}

/// Stored usage expressed in nano-cores and kibibytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComparisonUsage {
    pub cpu_nanocores: i128,
    pub memory_kib: i128,
}

fn widen(value: u64) -> i128 {
    i128::from(value)
}

/// Integer percentage change from `previous` to `current`, truncated toward
/// zero. `None` when `previous` is zero.
pub fn percentage_diff(previous: i128, current: i128) -> Option<i128> {
    if previous == 0 {
        return None;
    }
    Some(((current - previous) * 100) / previous)
}

fn beyond_threshold(previous: i128, current: i128) -> bool {
    let limit = i128::from(HYSTERESIS_PERCENT);
    match percentage_diff(previous, current) {
        Some(diff) => diff < -limit || diff > limit,
        None => false,
    }
}

/// Whether `current` differs enough from `previous` to be republished.
///
/// Idle-to-active transitions are checked before any ratio is taken.
pub fn exceeds_hysteresis(previous: &StoredUsage, current: &RawUsage) -> bool {
    let prev = previous.comparison();
    let cur = current.stored().comparison();

    if prev.memory_kib == 0 && cur.memory_kib != 0 {
        return true;
    }
    if prev.cpu_nanocores == 0 && cur.cpu_nanocores != 0 {
        return true;
    }

    beyond_threshold(prev.memory_kib, cur.memory_kib)
        || beyond_threshold(prev.cpu_nanocores, cur.cpu_nanocores)
}

/// Sum container samples into one raw total
pub fn aggregate(containers: &[ContainerUsage]) -> Result<RawUsage> {
    containers
        .iter()
        .map(|c| RawUsage::from_quantities(&c.cpu, &c.memory))
        .sum()
}

/// Parse a CPU quantity into nano-cores (truncating)
pub fn cpu_nanocores(quantity: &Quantity) -> Result<u64> {
    ParsedQuantity::parse(&quantity.0)?.scaled(NANOCORES_PER_CORE_EXP10, 0)
}

/// Parse a memory quantity into kibibytes (truncating)
pub fn memory_kib(quantity: &Quantity) -> Result<u64> {
    ParsedQuantity::parse(&quantity.0)?.scaled(0, 1)
}

/// A non-negative quantity as `mantissa * 10^exp10 * 1024^exp1024`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ParsedQuantity<'a> {
    source: &'a str,
    mantissa: u128,
    exp10: i32,
    exp1024: u32,
}

impl<'a> ParsedQuantity<'a> {
    fn parse(source: &'a str) -> Result<Self> {
        let trimmed = source.trim();
        if trimmed.starts_with('-') {
            return Err(Error::quantity(source, "negative usage"));
        }
        let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);

        let split = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(split);

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if fraction.contains('.') {
            return Err(Error::quantity(source, "more than one decimal point"));
        }
        if whole.is_empty() && fraction.is_empty() {
            return Err(Error::quantity(source, "missing number"));
        }

        let digits = format!("{whole}{fraction}");
        let mantissa: u128 = digits
            .parse()
            .map_err(|_| Error::quantity(source, "number out of range"))?;
        let mut exp10 = -(fraction.len() as i32);
        let mut exp1024 = 0;

        match suffix {
            "" => {}
            "n" => exp10 -= 9,
            "u" => exp10 -= 6,
            "m" => exp10 -= 3,
            "k" => exp10 += 3,
            "M" => exp10 += 6,
            "G" => exp10 += 9,
            "T" => exp10 += 12,
            "P" => exp10 += 15,
            "E" => exp10 += 18,
            "Ki" => exp1024 = 1,
            "Mi" => exp1024 = 2,
            "Gi" => exp1024 = 3,
            "Ti" => exp1024 = 4,
            "Pi" => exp1024 = 5,
            "Ei" => exp1024 = 6,
            s if s.starts_with('e') || s.starts_with('E') => {
                let exponent: i32 = s[1..]
                    .parse()
                    .map_err(|_| Error::quantity(source, "malformed exponent"))?;
                exp10 += exponent;
            }
            other => {
                return Err(Error::quantity(
                    source,
                    format!("unknown suffix {other:?}"),
                ))
            }
        }

        Ok(Self {
            source,
            mantissa,
            exp10,
            exp1024,
        })
    }

    /// Value multiplied by `10^extra_exp10` and divided by `1024^divide_1024`
    fn scaled(&self, extra_exp10: i32, divide_1024: u32) -> Result<u64> {
        let overflow = || Error::quantity(self.source, "value out of range");

        let exp10 = self.exp10 + extra_exp10;
        let mut numerator = self.mantissa;
        let mut denominator: u128 = 1;

        let pow10 = 10u128
            .checked_pow(exp10.unsigned_abs())
            .ok_or_else(overflow)?;
        if exp10 >= 0 {
            numerator = numerator.checked_mul(pow10).ok_or_else(overflow)?;
        } else {
            denominator = pow10;
        }

        let net1024 = self.exp1024 as i32 - divide_1024 as i32;
        let pow1024 = 1024u128
            .checked_pow(net1024.unsigned_abs())
            .ok_or_else(overflow)?;
        if net1024 >= 0 {
            numerator = numerator.checked_mul(pow1024).ok_or_else(overflow)?;
        } else {
            denominator = denominator.checked_mul(pow1024).ok_or_else(overflow)?;
        }

        u64::try_from(numerator / denominator).map_err(|_| overflow())
    }
}
