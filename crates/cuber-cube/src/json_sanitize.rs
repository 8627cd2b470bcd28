//! Chat providers routinely wrap their JSON payload in prose ("Here is the graph:
//! {...}"). Both GraphExtract and Memify's edge-refinement pass ask the model for a
//! single JSON object and then strip everything outside its outermost braces before
//! parsing.

/// Slice out the substring from the first `{` to the last `}`, inclusive.
pub fn extract_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_prose_around_the_json_object() {
        let raw = "Here is the extracted graph: {\"nodes\":[]} — let me know if you need more.";
        assert_eq!(extract_object(raw), Some("{\"nodes\":[]}"));
    }

    #[test]
    fn returns_none_when_no_braces_present() {
        assert_eq!(extract_object("no json here"), None);
    }

    #[test]
    fn returns_none_when_braces_are_reversed() {
        assert_eq!(extract_object("} {"), None);
    }
}
