//! Counter path formatting.

/// Instance key used for objects without an instance dimension.
pub const NO_INSTANCE: &str = "------";

/// Instance selector matching every instance of an object.
pub const ALL_INSTANCES: &str = "*";

/// Aggregate pseudo-instance reported by most multi-instance objects.
pub const TOTAL_INSTANCE: &str = "_Total";

/// Builds the native path for one (object, instance, counter) triple.
///
/// `\Object\Counter` when `instance` is [`NO_INSTANCE`], `\Object(Instance)\Counter`
/// otherwise. Malformed paths are reported by the native API when the counter
/// is added, not here.
pub fn format_counter_path(object: &str, instance: &str, counter: &str) -> String {
    if instance == NO_INSTANCE {
        format!("\\{}\\{}", object, counter)
    } else {
        format!("\\{}({})\\{}", object, instance, counter)
    }
}

/// Splits a path produced by [`format_counter_path`] back into its parts.
///
/// Instance names may themselves contain parentheses (`svchost(1)`), so the
/// instance runs from the first `(` to the last `)` before the counter.
pub(crate) fn parse_counter_path(path: &str) -> Option<(String, String, String)> {
    let rest = path.strip_prefix('\\')?;
    let sep = rest.rfind('\\')?;
    let (head, counter) = (&rest[..sep], &rest[sep + 1..]);
    if head.is_empty() || counter.is_empty() {
        return None;
    }

    match (head.find('('), head.ends_with(')')) {
        (Some(open), true) => {
            let object = &head[..open];
            let instance = &head[open + 1..head.len() - 1];
            if object.is_empty() {
                return None;
            }
            Some((object.to_string(), instance.to_string(), counter.to_string()))
        }
        (None, false) => Some((
            head.to_string(),
            NO_INSTANCE.to_string(),
            counter.to_string(),
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_without_instance() {
        assert_eq!(
            format_counter_path("Memory", NO_INSTANCE, "Available Bytes"),
            "\\Memory\\Available Bytes"
        );
    }

    #[test]
    fn test_format_with_instance() {
        assert_eq!(
            format_counter_path("Processor Information", "0,1", "% User Time"),
            "\\Processor Information(0,1)\\% User Time"
        );
        assert_eq!(
            format_counter_path("PhysicalDisk", ALL_INSTANCES, "Disk Reads/sec"),
            "\\PhysicalDisk(*)\\Disk Reads/sec"
        );
    }

    #[test]
    fn test_parse_roundtrip_nested_parens() {
        let path = format_counter_path("Process", "svchost(2)", "% Processor Time");
        let (object, instance, counter) = parse_counter_path(&path).unwrap();
        assert_eq!(object, "Process");
        assert_eq!(instance, "svchost(2)");
        assert_eq!(counter, "% Processor Time");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_counter_path("Memory\\Available Bytes").is_none());
        assert!(parse_counter_path("\\Memory\\").is_none());
        assert!(parse_counter_path("\\(x)\\Counter").is_none());
        assert!(parse_counter_path("\\Memory(x\\Counter").is_none());
    }
}
