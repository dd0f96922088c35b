use crate::crd::route::Route;
use std::collections::HashSet;

/// Validate a Route's traffic block
///
/// Checks what the CRD schema cannot express, so the traffic allocator can
/// treat its input as well formed.
///
/// # Validation Rules
/// - Each `percent` must be 0-100
/// - Each `revisionName` must be non-empty
/// - Tags must be DNS labels and unique within the route
/// - Percents must add up to 100 when any target is listed
pub fn validate_route(route: &Route) -> Result<(), String> {
    let traffic = &route.spec.traffic;
    let mut tags = HashSet::new();
    let mut total = 0;

    for (i, target) in traffic.iter().enumerate() {
        if !(0..=100).contains(&target.percent) {
            return Err(format!(
                "traffic[{}].percent must be 0-100, got {}",
                i, target.percent
            ));
        }

        if target.revision_name.is_empty() {
            return Err(format!("traffic[{}].revisionName cannot be empty", i));
        }

        if let Some(tag) = &target.tag {
            if !is_dns_label(tag) {
                return Err(format!(
                    "traffic[{}].tag must be a DNS label, got {:?}",
                    i, tag
                ));
            }
            if !tags.insert(tag.as_str()) {
                return Err(format!("traffic[{}].tag {:?} is used more than once", i, tag));
            }
        }

        total += target.percent;
    }

    if !traffic.is_empty() && total != 100 {
        return Err(format!("traffic percents must sum to 100, got {}", total));
    }

    Ok(())
}

/// RFC 1123 label: lowercase alphanumerics and '-', at most 63 characters,
/// starting and ending with an alphanumeric
pub fn is_dns_label(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.is_empty() || bytes.len() > 63 {
        return false;
    }

    let edge_ok = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !bytes.first().is_some_and(edge_ok) || !bytes.last().is_some_and(edge_ok) {
        return false;
    }

    bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}
