//! Canonicalizes a Prometheus text-exposition payload into the
//! `"name1,type1;name2,type2;..."` string compared against the
//! `io.auto-tagged.metrics-info` annotation (spec.md §4.2).

/// Parse `# TYPE <name> <kind>` lines out of a text-exposition payload and
/// render them as a canonical, order-preserving string.
///
/// Unlike the payload's own wire format (opaque to the rest of this crate,
/// per spec.md §1), this one parser is allowed to know the shape of a
/// Prometheus exposition, because the shape-annotation feedback is the only
/// place the crate looks *inside* a scraped payload.
pub fn canonical_shape(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    let mut pairs = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("# TYPE ") else {
            continue;
        };
        let mut parts = rest.splitn(2, char::is_whitespace);
        let (Some(name), Some(kind)) = (parts.next(), parts.next()) else {
            continue;
        };
        pairs.push(format!("{},{}", name, kind.trim()));
    }
    pairs.join(";")
}
