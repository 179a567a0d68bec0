//! JSON-pointer-like object id paths ("/a/3/b").

use crate::error::DmStatus;

/// One segment of a [`Path`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    Index(u32),
    /// The `-` append sentinel.
    End,
}

/// `kEnd` — the sentinel index produced by the `-` segment.
pub const K_END: u32 = u32::MAX;

/// An ordered, parsed oid. Immutable except for `pop`/`pop_back`.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Path {
    segments: Vec<Segment>,
}

impl Path {
    /// Parse `/a/3/-/b` into segments.
    ///
    /// Fails `INVALID_ARGUMENT` on empty input, a missing leading slash, or
    /// an empty token between slashes.
    pub fn parse(s: &str) -> Result<Self, DmStatus> {
        if s.is_empty() {
            return Err(DmStatus::invalid_argument("Path cannot be empty"));
        }
        if !s.starts_with('/') {
            return Err(DmStatus::invalid_argument(format!(
                "Path '{s}' must start with '/'"
            )));
        }
        let mut segments = Vec::new();
        for token in s[1..].split('/') {
            if token.is_empty() {
                return Err(DmStatus::invalid_argument(format!(
                    "Path '{s}' contains an empty segment"
                )));
            }
            segments.push(if token == "-" {
                Segment::End
            } else if let Ok(n) = token.parse::<u32>() {
                Segment::Index(n)
            } else {
                Segment::Field(token.to_string())
            });
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn first(&self) -> Option<&Segment> {
        self.segments.first()
    }

    /// All but the first segment, as a sub-path usable for recursive walks.
    pub fn rest(&self) -> Path {
        Path {
            segments: self.segments.iter().skip(1).cloned().collect(),
        }
    }

    pub fn back_is_index(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Index(_)) | Some(Segment::End))
    }

    /// Returns `K_END` for the `-` sentinel, otherwise the numeric index.
    pub fn back_as_index(&self) -> Option<u32> {
        match self.segments.last() {
            Some(Segment::Index(n)) => Some(*n),
            Some(Segment::End) => Some(K_END),
            _ => None,
        }
    }

    /// Remove and discard the last segment.
    pub fn pop_back(&mut self) {
        self.segments.pop();
    }

    /// Remove and return the first segment (used while walking down the tree).
    pub fn pop_front(&mut self) -> Option<Segment> {
        if self.segments.is_empty() {
            None
        } else {
            Some(self.segments.remove(0))
        }
    }

    /// Reconstruct the canonical `/a/3/b` form.
    pub fn fqoid(&self) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            out.push('/');
            match seg {
                Segment::Field(s) => out.push_str(s),
                Segment::Index(n) => out.push_str(&n.to_string()),
                Segment::End => out.push('-'),
            }
        }
        out
    }

    /// True if `self` is a prefix of `other` or they are equal (§4.4 overlap rule).
    pub fn is_prefix_of_or_eq(&self, other: &Path) -> bool {
        if self.segments.len() > other.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(other.segments.iter())
            .all(|(a, b)| a == b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_fqoid() {
        for s in ["/a", "/a/3/b", "/a/-", "/x/0/y/12"] {
            let p = Path::parse(s).unwrap();
            assert_eq!(p.fqoid(), s);
        }
    }

    #[test]
    fn rejects_empty_input() {
        assert!(Path::parse("").is_err());
    }

    #[test]
    fn rejects_missing_leading_slash() {
        assert!(Path::parse("a/b").is_err());
    }

    #[test]
    fn rejects_empty_segment() {
        assert!(Path::parse("/a//b").is_err());
    }

    #[test]
    fn append_sentinel_detection() {
        let p = Path::parse("/arrayParam/-").unwrap();
        assert!(p.back_is_index());
        assert_eq!(p.back_as_index(), Some(K_END));
    }

    #[test]
    fn numeric_segment_is_index() {
        let p = Path::parse("/a/3").unwrap();
        assert!(p.back_is_index());
        assert_eq!(p.back_as_index(), Some(3));
    }

    #[test]
    fn prefix_detection() {
        let a = Path::parse("/a/b").unwrap();
        let b = Path::parse("/a/b/c").unwrap();
        let c = Path::parse("/a/x").unwrap();
        assert!(a.is_prefix_of_or_eq(&b));
        assert!(a.is_prefix_of_or_eq(&a));
        assert!(!a.is_prefix_of_or_eq(&c));
        assert!(!b.is_prefix_of_or_eq(&a));
    }

    #[test]
    fn pop_front_walks_segments() {
        let mut p = Path::parse("/a/3/b").unwrap();
        assert_eq!(p.pop_front(), Some(Segment::Field("a".into())));
        assert_eq!(p.pop_front(), Some(Segment::Index(3)));
        assert_eq!(p.pop_front(), Some(Segment::Field("b".into())));
        assert_eq!(p.pop_front(), None);
    }
}
