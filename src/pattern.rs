//! Identifier patterns: literal and glob matching for listener filters.
//!
//! Listeners filter events by entity identifier, domain, and service name.
//! Each filter field accepts literals or glob patterns where `*` matches any
//! run of characters. Glob translation is explicit segment matching, never
//! general regex, so worst-case matching cost stays bounded by the pattern
//! and text lengths.

use serde_json::Value;

use crate::accessor::Accessor;
use crate::event::Event;

/// A compiled identifier pattern.
///
/// Compiled once at subscribe time; matching is allocation-free.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobPattern {
    raw: String,
    kind: PatternKind,
}

#[derive(Debug, Clone, PartialEq)]
enum PatternKind {
    /// No wildcard present; exact comparison.
    Literal,
    /// The pattern is entirely wildcards; matches anything.
    Any,
    /// Mixed literal segments separated by wildcards.
    Glob {
        segments: Vec<String>,
        anchored_start: bool,
        anchored_end: bool,
    },
}

impl GlobPattern {
    /// Compile a pattern string.
    pub fn new(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let kind = if !raw.contains('*') {
            PatternKind::Literal
        } else {
            let segments: Vec<String> = raw
                .split('*')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if segments.is_empty() {
                PatternKind::Any
            } else {
                PatternKind::Glob {
                    anchored_start: !raw.starts_with('*'),
                    anchored_end: !raw.ends_with('*'),
                    segments,
                }
            }
        };
        Self { raw, kind }
    }

    /// The original pattern string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether this pattern contains a wildcard.
    pub fn is_wildcard(&self) -> bool {
        !matches!(self.kind, PatternKind::Literal)
    }

    /// Test `text` against the pattern.
    pub fn is_match(&self, text: &str) -> bool {
        match &self.kind {
            PatternKind::Literal => self.raw == text,
            PatternKind::Any => true,
            PatternKind::Glob {
                segments,
                anchored_start,
                anchored_end,
            } => {
                let mut rest = text;
                let last = segments.len() - 1;
                for (i, segment) in segments.iter().enumerate() {
                    if i == 0 && *anchored_start {
                        match rest.strip_prefix(segment.as_str()) {
                            Some(after) => rest = after,
                            None => return false,
                        }
                        if i == last {
                            // "seg*" form: prefix consumed, tail is free.
                            return !*anchored_end || rest.is_empty();
                        }
                    } else if i == last && *anchored_end {
                        return rest.ends_with(segment.as_str());
                    } else {
                        match rest.find(segment.as_str()) {
                            Some(pos) => rest = &rest[pos + segment.len()..],
                            None => return false,
                        }
                    }
                }
                true
            }
        }
    }
}

impl From<&str> for GlobPattern {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for GlobPattern {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// An identifier filter for one listener.
///
/// Each field holds alternatives (OR within a field); non-empty fields must
/// all match (AND across fields). An empty filter matches every event
/// delivered on the listener's topic.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    entity_id: Vec<GlobPattern>,
    domain: Vec<GlobPattern>,
    service: Vec<GlobPattern>,
}

impl EntityFilter {
    /// A filter that matches every event.
    pub fn any() -> Self {
        Self::default()
    }

    /// Add an entity-identifier pattern alternative.
    pub fn entity(mut self, pattern: impl Into<GlobPattern>) -> Self {
        self.entity_id.push(pattern.into());
        self
    }

    /// Add a domain pattern alternative.
    pub fn domain(mut self, pattern: impl Into<GlobPattern>) -> Self {
        self.domain.push(pattern.into());
        self
    }

    /// Add a service-name pattern alternative.
    pub fn service(mut self, pattern: impl Into<GlobPattern>) -> Self {
        self.service.push(pattern.into());
        self
    }

    /// Whether this filter matches everything.
    pub fn is_empty(&self) -> bool {
        self.entity_id.is_empty() && self.domain.is_empty() && self.service.is_empty()
    }

    /// Test an event against the filter.
    ///
    /// A field with patterns requires the corresponding identifier to be
    /// present on the event; a missing identifier never matches.
    pub fn matches(&self, event: &Event) -> bool {
        field_matches(&self.entity_id, &Accessor::EntityId, event)
            && field_matches(&self.domain, &Accessor::Domain, event)
            && field_matches(&self.service, &Accessor::Service, event)
    }
}

fn field_matches(patterns: &[GlobPattern], accessor: &Accessor, event: &Event) -> bool {
    if patterns.is_empty() {
        return true;
    }
    let Some(Value::String(text)) = accessor.read(event) else {
        return false;
    };
    patterns.iter().any(|p| p.is_match(&text))
}
