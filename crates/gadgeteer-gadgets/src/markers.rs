//! Marker pair framing gadget blocks in the model's text stream

pub const DEFAULT_START_MARKER: &str = "<<<GADGET_START>>>";
pub const DEFAULT_END_MARKER: &str = "<<<GADGET_END>>>";

/// Start/end delimiters. Each marker is immediately followed by
/// `Name:InvocationId` on the same line. Matching is exact and
/// case-sensitive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Markers {
    pub start: String,
    pub end: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            start: DEFAULT_START_MARKER.to_string(),
            end: DEFAULT_END_MARKER.to_string(),
        }
    }
}

impl Markers {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Full start-marker header line for a call.
    pub fn start_header(&self, name: &str, invocation_id: &str) -> String {
        format!("{}{}:{}", self.start, name, invocation_id)
    }

    /// Full end-marker header line for a call.
    pub fn end_header(&self, name: &str, invocation_id: &str) -> String {
        format!("{}{}:{}", self.end, name, invocation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_markers() {
        let m = Markers::default();
        assert_eq!(m.start, "<<<GADGET_START>>>");
        assert_eq!(m.end, "<<<GADGET_END>>>");
        assert_eq!(m.start_header("Echo", "1"), "<<<GADGET_START>>>Echo:1");
        assert_eq!(m.end_header("Echo", "1"), "<<<GADGET_END>>>Echo:1");
    }
}
