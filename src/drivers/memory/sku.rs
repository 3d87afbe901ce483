//! Memory kit part numbers.
//!
//! A part number reads `CM<line><size>GX<gen>M<modules><rev><speed>C<latency>`,
//! for example `CMH32GX5M2B5600C36`.

use std::fmt;

use crate::error::ProtocolError;

/// Product line, the letter after `CM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    VengeanceRgbPro,
    VengeanceRgbRt,
    VengeanceRgb,
    DominatorPlatinumRgb,
    VengeanceRgbRs,
}

impl Line {
    pub fn from_letter(letter: char) -> Option<Self> {
        Some(match letter {
            'W' => Line::VengeanceRgbPro,
            'G' => Line::VengeanceRgbRt,
            'H' => Line::VengeanceRgb,
            'T' => Line::DominatorPlatinumRgb,
            'N' => Line::VengeanceRgbRs,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Line::VengeanceRgbPro => "VENGEANCE RGB PRO",
            Line::VengeanceRgbRt => "VENGEANCE RGB RT",
            Line::VengeanceRgb => "VENGEANCE RGB",
            Line::DominatorPlatinumRgb => "DOMINATOR PLATINUM RGB",
            Line::VengeanceRgbRs => "VENGEANCE RGB RS",
        }
    }

    pub fn leds(self) -> u16 {
        match self {
            Line::DominatorPlatinumRgb => 12,
            Line::VengeanceRgbRs => 6,
            _ => 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sku {
    pub part: String,
    pub line: Line,
    pub size_gb: u16,
    pub generation: u8,
    pub modules: u8,
    pub speed: u16,
    pub latency: u8,
}

impl fmt::Display for Sku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}GB DDR{} {} MT/s CL{}",
            self.line.name(),
            self.size_gb,
            self.generation,
            self.speed,
            self.latency
        )
    }
}

/// Cursor over the part number.
struct Reader<'a> {
    rest: &'a str,
}

impl<'a> Reader<'a> {
    fn expect(&mut self, c: char) -> Option<()> {
        self.rest = self.rest.strip_prefix(c)?;
        Some(())
    }

    fn letter(&mut self) -> Option<char> {
        let c = self.rest.chars().next().filter(char::is_ascii_alphabetic)?;
        self.rest = &self.rest[1..];
        Some(c)
    }

    fn number<T: std::str::FromStr>(&mut self) -> Option<T> {
        let end = self
            .rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.rest.len());
        let (digits, rest) = self.rest.split_at(end);
        self.rest = rest;
        digits.parse().ok()
    }
}

impl Sku {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let part = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());
        let bad = || ProtocolError::Malformed(format!("memory part number '{part}'"));
        if !part.starts_with('C') {
            return Err(bad());
        }
        let mut r = Reader { rest: part };
        let parsed = (|| {
            r.expect('C')?;
            r.expect('M')?;
            let line = Line::from_letter(r.letter()?)?;
            let size_gb = r.number()?;
            r.expect('G')?;
            r.expect('X')?;
            let generation = r.number()?;
            r.expect('M')?;
            let modules = r.number()?;
            while r.rest.starts_with(|c: char| c.is_ascii_alphabetic()) {
                r.letter()?;
            }
            let speed = r.number()?;
            r.expect('C')?;
            let latency = r.number()?;
            Some(Sku {
                part: part.to_string(),
                line,
                size_gb,
                generation,
                modules,
                speed,
                latency,
            })
        })();
        parsed.ok_or_else(bad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ddr5_vengeance_rgb() {
        let sku = Sku::parse("CMH32GX5M2B5600C36").unwrap();
        assert_eq!(sku.line, Line::VengeanceRgb);
        assert_eq!(sku.size_gb, 32);
        assert_eq!(sku.generation, 5);
        assert_eq!(sku.modules, 2);
        assert_eq!(sku.speed, 5600);
        assert_eq!(sku.latency, 36);
        assert_eq!(sku.line.leds(), 10);
    }

    #[test]
    fn ddr4_pro_with_padding() {
        let sku = Sku::parse("CMW16GX4M2C3200C16\0\0 ").unwrap();
        assert_eq!(sku.line, Line::VengeanceRgbPro);
        assert_eq!(sku.part, "CMW16GX4M2C3200C16");
        assert_eq!(sku.to_string(), "VENGEANCE RGB PRO 16GB DDR4 3200 MT/s CL16");
    }

    #[test]
    fn foreign_and_broken_parts_are_rejected() {
        assert!(Sku::parse("F4-3200C16D-16GTZR").is_err());
        assert!(Sku::parse("CMZ16GX4M2C3200C16").is_err());
        assert!(Sku::parse("CMW16GX4").is_err());
        assert!(Sku::parse("").is_err());
    }
}
