use graft_rules::Rule;
use graft_unit::Marker;
use sha2::{Digest, Sha256};

/// Marker carried by every guard a rule inserts: the first eight bytes of
/// the SHA-256 of the rule's canonical text.
pub fn marker_for(rule: &Rule) -> Marker {
    let digest = Sha256::digest(rule.to_string().as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

#[cfg(test)]
mod tests {
    use graft_rules::parse_rule;

    use super::*;

    #[test]
    fn equal_rules_share_a_marker() {
        let a = parse_rule("demo.A::f@ingress::stack").unwrap();
        let b = parse_rule("demo.A::f@INGRESS::STACK").unwrap();
        let c = parse_rule("demo.A::f@EGRESS::STACK").unwrap();
        assert_eq!(marker_for(&a), marker_for(&b));
        assert_ne!(marker_for(&a), marker_for(&c));
    }
}
