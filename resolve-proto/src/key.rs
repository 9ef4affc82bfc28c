//! Query keys (spec §3: "the 3-tuple (name, type, class)").

use std::fmt;

use hickory_proto::rr::{DNSClass, Name, RecordType};

/// A `(name, type, class)` lookup key. `Name`'s own `Eq`/`Hash` are already
/// case-insensitive while preserving the original label case for output, so
/// this type only needs to bundle the three fields together.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub name: Name,
    pub record_type: RecordType,
    pub dns_class: DNSClass,
}

impl QueryKey {
    pub fn new(name: Name, record_type: RecordType, dns_class: DNSClass) -> Self {
        Self {
            name,
            record_type,
            dns_class,
        }
    }

    pub fn in_class(name: Name, record_type: RecordType) -> Self {
        Self::new(name, record_type, DNSClass::IN)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.dns_class, self.record_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::str::FromStr;

    #[test]
    fn distinct_keys_hash_independently() {
        let a = QueryKey::in_class(Name::from_str("example.test.").unwrap(), RecordType::A);
        let b = QueryKey::in_class(Name::from_str("example.test.").unwrap(), RecordType::AAAA);
        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(!set.contains(&b));
        set.insert(b);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn case_insensitive_but_displays_original_case() {
        // `Name::from_ascii` preserves case (unlike `FromStr`/`from_utf8`,
        // which apply IDNA normalization and lowercase); wire-decoded names
        // likewise keep their on-the-wire case.
        let a = QueryKey::in_class(Name::from_ascii("Example.Test.").unwrap(), RecordType::A);
        let b = QueryKey::in_class(Name::from_ascii("example.test.").unwrap(), RecordType::A);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "Example.Test. IN A");
    }
}
