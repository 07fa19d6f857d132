//! Tolerant comparison of release version strings.
//!
//! Versions are compared segment by segment after stripping one leading
//! `v`. Each dot-separated segment is read as a leading integer followed by
//! an optional suffix (`3-beta` is `3` + `-beta`). Integers compare
//! numerically; equal integers fall back to a plain string comparison of the
//! suffixes. Missing trailing segments count as `0`, and segments without a
//! leading digit also count as `0`.
//!
//! This is not semver precedence: `1.0.0-beta` sorts *after* `1.0.0`
//! because an empty suffix is the smallest string.

use std::cmp::Ordering;

/// Strip surrounding whitespace and a single leading `v` from a release tag.
#[must_use]
pub fn normalize_tag(tag: &str) -> &str {
    let trimmed = tag.trim();
    trimmed.strip_prefix('v').unwrap_or(trimmed)
}

/// Compare two version strings. Never fails; malformed input compares as
/// zeros.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left: Vec<Segment<'_>> = normalize_tag(a).split('.').map(Segment::parse).collect();
    let right: Vec<Segment<'_>> = normalize_tag(b).split('.').map(Segment::parse).collect();

    let len = left.len().max(right.len());
    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(Segment::ZERO);
        let r = right.get(i).copied().unwrap_or(Segment::ZERO);
        match l.cmp(&r) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

/// Whether `latest` is strictly greater than `current`.
#[must_use]
pub fn is_newer_version(latest: &str, current: &str) -> bool {
    compare_versions(latest, current) == Ordering::Greater
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Segment<'a> {
    number: u64,
    suffix: &'a str,
}

impl<'a> Segment<'a> {
    const ZERO: Segment<'static> = Segment {
        number: 0,
        suffix: "",
    };

    fn parse(raw: &'a str) -> Self {
        let digits_end = raw
            .char_indices()
            .find(|(_, ch)| !ch.is_ascii_digit())
            .map_or(raw.len(), |(idx, _)| idx);

        if digits_end == 0 {
            return Segment::ZERO;
        }

        // Overlong digit runs saturate instead of failing.
        let number = raw[..digits_end].parse::<u64>().unwrap_or(u64::MAX);
        Segment {
            number,
            suffix: &raw[digits_end..],
        }
    }
}
