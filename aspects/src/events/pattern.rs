use super::EventError;

/// A dotted glob matched against event types segment by segment.
///
/// `*` as a segment matches any single segment; a trailing `*` matches one
/// or more remaining segments (so `user.*` matches `user.created.v2` but not
/// `user` itself). The bare pattern `*` matches every event type, and the
/// empty pattern matches only the empty type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Segment {
    Literal(String),
    Wildcard,
}

impl Pattern {
    /// Parses a pattern, rejecting empty segments and segments that mix `*`
    /// with other characters.
    pub fn parse(raw: &str) -> Result<Self, EventError> {
        let mut segments = Vec::new();

        if !raw.is_empty() && raw != "*" {
            for segment in raw.split('.') {
                match segment {
                    "" => return Err(EventError::InvalidPattern(raw.to_owned())),
                    "*" => segments.push(Segment::Wildcard),
                    literal if literal.contains('*') => {
                        return Err(EventError::InvalidPattern(raw.to_owned()));
                    }
                    literal => segments.push(Segment::Literal(literal.to_owned())),
                }
            }
        }

        Ok(Self {
            raw: raw.to_owned(),
            segments,
        })
    }

    /// The pattern as originally written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns a copy of this pattern with a dotted prefix prepended, as
    /// used by namespaced bus views.
    pub(super) fn prefixed(&self, prefix: &str) -> Self {
        let raw = if self.raw.is_empty() {
            prefix.to_owned()
        } else {
            format!("{prefix}.{}", self.raw)
        };

        // The prefix is a literal segment path; re-parsing cannot fail for
        // inputs that already passed validation.
        Self::parse(&raw).expect("prefixed pattern stays valid")
    }

    /// Whether the pattern matches the given event type.
    pub fn matches(&self, event_type: &str) -> bool {
        if self.raw == "*" {
            return true;
        }

        if self.raw.is_empty() {
            return event_type.is_empty();
        }

        if event_type.is_empty() {
            return false;
        }

        let type_segments: Vec<&str> = event_type.split('.').collect();
        let last = self.segments.len() - 1;

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Wildcard if i == last => {
                    // Trailing wildcard: at least one segment must remain.
                    return type_segments.len() > i;
                }
                Segment::Wildcard => {
                    if type_segments.len() <= i {
                        return false;
                    }
                }
                Segment::Literal(literal) => match type_segments.get(i) {
                    Some(s) if *s == literal => {}
                    _ => return false,
                },
            }
        }

        type_segments.len() == self.segments.len()
    }
}
