//! RPM epoch/version/release labels and their ordering.
//!
//! `compare` follows rpm's `labelCompare`: epoch first (numerically, missing
//! epoch is 0), then `rpmvercmp` on version, then on release.
//!
//! `rpmvercmp` splits both strings into maximal runs of ASCII digits or ASCII
//! letters, skipping every other character. Runs are compared pairwise:
//! numeric runs numerically, alphabetic runs lexically, and a numeric run is
//! newer than an alphabetic one. `~` sorts before anything, including the end
//! of the string, and `^` sorts after the end of the string but before any
//! further run.
//!
//! `Evr` deliberately has no `Ord` impl: `1.0` and `1.00` compare equal while
//! being different strings.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ReleaseError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Evr {
    pub epoch: u64,
    pub version: String,
    pub release: String,
}

impl Evr {
    pub fn new(epoch: u64, version: impl Into<String>, release: impl Into<String>) -> Self {
        Self {
            epoch,
            version: version.into(),
            release: release.into(),
        }
    }

    /// Build from the raw `%{epoch}`, `%{version}` and `%{release}` values an
    /// rpm query prints. An unset epoch prints as `(none)`.
    pub fn from_parts(epoch: &str, version: &str, release: &str) -> Result<Self> {
        Ok(Self::new(parse_epoch(epoch)?, version.trim(), release.trim()))
    }

    /// Parse `[epoch:]version[-release]`.
    pub fn parse(label: &str) -> Result<Self> {
        let label = label.trim();
        if label.is_empty() {
            return Err(ReleaseError::InvalidEvr(label.to_string()));
        }
        let (epoch, rest) = match label.split_once(':') {
            Some((e, rest)) => (parse_epoch(e)?, rest),
            None => (0, label),
        };
        let (version, release) = match rest.rsplit_once('-') {
            Some((v, r)) => (v, r),
            None => (rest, ""),
        };
        if version.is_empty() {
            return Err(ReleaseError::InvalidEvr(label.to_string()));
        }
        Ok(Self::new(epoch, version, release))
    }

    /// True when `self` sorts strictly after `other`.
    pub fn is_newer_than(&self, other: &Evr) -> bool {
        compare(self, other) == Ordering::Greater
    }
}

impl fmt::Display for Evr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        f.write_str(&self.version)?;
        if !self.release.is_empty() {
            write!(f, "-{}", self.release)?;
        }
        Ok(())
    }
}

fn parse_epoch(raw: &str) -> Result<u64> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "(none)" {
        return Ok(0);
    }
    raw.parse()
        .map_err(|_| ReleaseError::InvalidEvr(format!("epoch '{raw}'")))
}

/// Compare two labels under rpm `labelCompare` rules.
pub fn compare(a: &Evr, b: &Evr) -> Ordering {
    a.epoch
        .cmp(&b.epoch)
        .then_with(|| rpmvercmp(&a.version, &b.version))
        .then_with(|| rpmvercmp(&a.release, &b.release))
}

/// rpm's segment-wise version string comparison.
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let mut one = a.as_bytes();
    let mut two = b.as_bytes();

    while !one.is_empty() || !two.is_empty() {
        one = skip_separators(one);
        two = skip_separators(two);

        // Tilde sorts before everything else.
        if one.first() == Some(&b'~') || two.first() == Some(&b'~') {
            if one.first() != Some(&b'~') {
                return Ordering::Greater;
            }
            if two.first() != Some(&b'~') {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        // Caret sorts after end of string, before any further segment.
        if one.first() == Some(&b'^') || two.first() == Some(&b'^') {
            if one.is_empty() {
                return Ordering::Less;
            }
            if two.is_empty() {
                return Ordering::Greater;
            }
            if one.first() != Some(&b'^') {
                return Ordering::Greater;
            }
            if two.first() != Some(&b'^') {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        if one.is_empty() || two.is_empty() {
            break;
        }

        let numeric = one[0].is_ascii_digit();
        let (seg1, rest1) = take_segment(one, numeric);
        let (seg2, rest2) = take_segment(two, numeric);
        one = rest1;
        two = rest2;

        // Segments of different kinds: numeric is newer.
        if seg2.is_empty() {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let ord = if numeric {
            let s1 = strip_leading_zeros(seg1);
            let s2 = strip_leading_zeros(seg2);
            s1.len().cmp(&s2.len()).then_with(|| s1.cmp(s2))
        } else {
            seg1.cmp(seg2)
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    match (one.is_empty(), two.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        _ => Ordering::Greater,
    }
}

fn skip_separators(s: &[u8]) -> &[u8] {
    let n = s
        .iter()
        .take_while(|&&c| !c.is_ascii_alphanumeric() && c != b'~' && c != b'^')
        .count();
    &s[n..]
}

fn take_segment(s: &[u8], numeric: bool) -> (&[u8], &[u8]) {
    let n = s
        .iter()
        .take_while(|c| {
            if numeric {
                c.is_ascii_digit()
            } else {
                c.is_ascii_alphabetic()
            }
        })
        .count();
    s.split_at(n)
}

fn strip_leading_zeros(s: &[u8]) -> &[u8] {
    let n = s.iter().take_while(|&&c| c == b'0').count();
    &s[n..]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use Ordering::{Equal, Greater, Less};

    #[test]
    fn label_compare_examples() {
        assert_eq!(
            compare(&Evr::new(0, "1.2.3", "1"), &Evr::new(0, "1.2.2", "1")),
            Greater
        );
        assert_eq!(
            compare(&Evr::new(0, "1.2.3~rc1", "1"), &Evr::new(0, "1.2.3", "1")),
            Less
        );
    }

    #[test]
    fn epoch_dominates() {
        assert_eq!(
            compare(&Evr::new(1, "1.0", "1"), &Evr::new(0, "9.9", "9")),
            Greater
        );
        assert_eq!(
            compare(&Evr::new(0, "9.9", "9"), &Evr::new(1, "1.0", "1")),
            Less
        );
    }

    #[test]
    fn release_breaks_version_ties() {
        assert_eq!(
            compare(&Evr::new(0, "2.0.0", "2.el8"), &Evr::new(0, "2.0.0", "1.el8")),
            Greater
        );
        assert_eq!(
            compare(&Evr::new(0, "2.0.0", "1"), &Evr::new(0, "2.0.0", "1")),
            Equal
        );
    }

    #[test]
    fn rpmvercmp_table() {
        // Cases from rpm's own test suite.
        let cases = [
            ("1.0", "1.0", Equal),
            ("1.0", "2.0", Less),
            ("2.0.1", "2.0", Greater),
            ("2.0.1a", "2.0.1", Greater),
            ("5.5p1", "5.5p2", Less),
            ("5.6p1", "5.5p10", Greater),
            ("10xyz", "10.1xyz", Less),
            ("xyz10.1", "xyz10", Greater),
            ("a", "1", Less),
            ("1", "a", Greater),
            ("10", "9", Greater),
            ("010", "10", Equal),
            ("1.0010", "1.9", Greater),
            ("1.05", "1.5", Equal),
            ("1_0", "1.0", Equal),
            ("1++", "1_", Equal),
            ("1.0~rc1", "1.0", Less),
            ("1.0~rc1", "1.0~rc2", Less),
            ("1.0~rc1~git123", "1.0~rc1", Less),
            ("1.0^", "1.0", Greater),
            ("1.0^git1", "1.0", Greater),
            ("1.0^git1", "1.01", Less),
            ("1.0^git1~pre", "1.0^git1", Less),
            ("1.0~rc1^git1", "1.0~rc1", Greater),
            ("1.0~rc1^git1", "1.0", Less),
        ];
        for (a, b, want) in cases {
            assert_eq!(rpmvercmp(a, b), want, "rpmvercmp({a:?}, {b:?})");
            assert_eq!(rpmvercmp(b, a), want.reverse(), "rpmvercmp({b:?}, {a:?})");
        }
    }

    #[test]
    fn parse_labels() {
        assert_eq!(Evr::parse("1:2.0-3").unwrap(), Evr::new(1, "2.0", "3"));
        assert_eq!(Evr::parse("2.0-3.el8").unwrap(), Evr::new(0, "2.0", "3.el8"));
        assert_eq!(Evr::parse("2.0").unwrap(), Evr::new(0, "2.0", ""));
        assert!(Evr::parse("").is_err());
        assert!(Evr::parse("x:1.0-1").is_err());
    }

    #[test]
    fn from_parts_treats_unset_epoch_as_zero() {
        let evr = Evr::from_parts("(none)", "1.2.3", "1.el8").unwrap();
        assert_eq!(evr, Evr::new(0, "1.2.3", "1.el8"));
        assert_eq!(evr.to_string(), "1.2.3-1.el8");
        assert_eq!(Evr::new(2, "1.0", "1").to_string(), "2:1.0-1");
    }

    #[test]
    fn is_newer_requires_strict_advance() {
        let old = Evr::new(0, "1.2.3", "1");
        assert!(!old.is_newer_than(&old));
        assert!(Evr::new(0, "1.2.4", "1").is_newer_than(&old));
        assert!(!Evr::new(0, "1.2.4~rc1", "1").is_newer_than(&Evr::new(0, "1.2.4", "1")));
    }
}
