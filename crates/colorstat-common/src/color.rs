//! RGB color filter value
//!
//! The host filters queries on a three-component color value. Its canonical
//! text form `"(r,g,b)"` is what ends up in the tag of a statistics key, so
//! callers render a [`Color`] with `to_string()` before recording usage.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A very small RGB color
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Euclidean distance between two colors in RGB space
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        let dr = f64::from(self.r) - f64::from(other.r);
        let dg = f64::from(self.g) - f64::from(other.g);
        let db = f64::from(self.b) - f64::from(other.b);
        (dr * dr + dg * dg + db * db).sqrt()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.r, self.g, self.b)
    }
}

impl FromStr for Color {
    type Err = Error;

    /// Parse `"(r,g,b)"`; errors name the byte position that failed
    fn from_str(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.first() != Some(&b'(') {
            return Err(Error::invalid_color("expected '(' at position 0"));
        }

        let mut pos = 1;
        let mut components = [0u8; 3];
        for (idx, component) in components.iter_mut().enumerate() {
            let (value, end) = parse_component(bytes, pos, idx + 1)?;
            *component = value;

            let expected = if idx == 2 { b')' } else { b',' };
            if bytes.get(end) != Some(&expected) {
                return Err(Error::invalid_color(format!(
                    "expected '{}' at position {}",
                    char::from(expected),
                    end
                )));
            }
            pos = end + 1;
        }

        if pos != bytes.len() {
            return Err(Error::invalid_color(format!(
                "unexpected character at position {pos}"
            )));
        }

        let [r, g, b] = components;
        Ok(Self { r, g, b })
    }
}

/// Parse a decimal component starting at `start`, returning it and the
/// position of the first byte after its digits
fn parse_component(bytes: &[u8], start: usize, number: usize) -> Result<(u8, usize)> {
    let digits = bytes[start..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 {
        return Err(Error::invalid_color(format!(
            "expected number at position {number}"
        )));
    }

    let end = start + digits;
    let value = bytes[start..end]
        .iter()
        .try_fold(0u32, |acc, &b| {
            let acc = acc * 10 + u32::from(b - b'0');
            (acc <= u32::from(u8::MAX)).then_some(acc)
        })
        .and_then(|v| u8::try_from(v).ok())
        .ok_or_else(|| {
            Error::invalid_color(format!("component out of range at position {start}"))
        })?;

    Ok((value, end))
}
