//! Arithmetic over Kubernetes resource quantities.
//!
//! Quota bookkeeping only ever deals in integral quantities: reference
//! counts, and byte limits written with an SI or binary suffix. The parser
//! covers exactly that subset and rejects anything else.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

pub type ResourceList = BTreeMap<String, Quantity>;

static QUANTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?<value>[+-]?[0-9]+)(?<suffix>k|M|G|T|P|E|Ki|Mi|Gi|Ti|Pi|Ei)?$")
        .expect("invalid quantity regex")
});

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QuantityError {
    #[error("unparseable quantity {0:?}")]
    Invalid(String),

    #[error("quantity {0:?} overflows")]
    Overflow(String),
}

/// Parses a quantity into a plain integer value.
pub fn parse_quantity(quantity: &Quantity) -> Result<i64, QuantityError> {
    let captures = QUANTITY_RE
        .captures(quantity.0.trim())
        .ok_or_else(|| QuantityError::Invalid(quantity.0.clone()))?;

    let value: i64 = captures["value"]
        .parse()
        .map_err(|_| QuantityError::Overflow(quantity.0.clone()))?;

    let multiplier: i64 = match captures.name("suffix").map(|m| m.as_str()) {
        None => 1,
        Some("k") => 1_000,
        Some("M") => 1_000_000,
        Some("G") => 1_000_000_000,
        Some("T") => 1_000_000_000_000,
        Some("P") => 1_000_000_000_000_000,
        Some("E") => 1_000_000_000_000_000_000,
        Some("Ki") => 1 << 10,
        Some("Mi") => 1 << 20,
        Some("Gi") => 1 << 30,
        Some("Ti") => 1 << 40,
        Some("Pi") => 1 << 50,
        Some("Ei") => 1 << 60,
        Some(_) => unreachable!("suffix constrained by regex"),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| QuantityError::Overflow(quantity.0.clone()))
}

/// Renders an integer as a quantity.
pub fn quantity(value: i64) -> Quantity {
    Quantity(value.to_string())
}

/// Returns a resource list with every given resource set to zero.
pub fn zeroed(names: &[&str]) -> ResourceList {
    names
        .iter()
        .map(|name| (name.to_string(), quantity(0)))
        .collect()
}

/// Returns the resource names present in the list.
pub fn resource_names(list: &ResourceList) -> Vec<String> {
    list.keys().cloned().collect()
}

/// Projects the list onto the given resource names.
pub fn mask(list: &ResourceList, names: &[String]) -> ResourceList {
    list.iter()
        .filter(|(name, _)| names.iter().any(|n| n == *name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Sums two resource lists; resources missing from one side count as zero.
pub fn add(a: &ResourceList, b: &ResourceList) -> Result<ResourceList, QuantityError> {
    let mut result = ResourceList::new();
    for name in a.keys().chain(b.keys()) {
        if result.contains_key(name) {
            continue;
        }
        let left = a.get(name).map(parse_quantity).transpose()?.unwrap_or(0);
        let right = b.get(name).map(parse_quantity).transpose()?.unwrap_or(0);
        result.insert(name.clone(), quantity(left + right));
    }
    Ok(result)
}

/// Subtracts `b` from `a`; resources missing from one side count as zero.
pub fn subtract(a: &ResourceList, b: &ResourceList) -> Result<ResourceList, QuantityError> {
    let mut result = ResourceList::new();
    for name in a.keys().chain(b.keys()) {
        if result.contains_key(name) {
            continue;
        }
        let left = a.get(name).map(parse_quantity).transpose()?.unwrap_or(0);
        let right = b.get(name).map(parse_quantity).transpose()?.unwrap_or(0);
        result.insert(name.clone(), quantity(left - right));
    }
    Ok(result)
}

/// Compares `a` against `b` over the resources both lists declare. Returns
/// whether every shared resource of `a` fits within `b`, plus the names of
/// the resources that do not.
pub fn less_than_or_equal(
    a: &ResourceList,
    b: &ResourceList,
) -> Result<(bool, Vec<String>), QuantityError> {
    let mut exceeded = Vec::new();
    for (name, value) in a {
        let Some(other) = b.get(name) else { continue };
        if parse_quantity(other)? < parse_quantity(value)? {
            exceeded.push(name.clone());
        }
    }
    Ok((exceeded.is_empty(), exceeded))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[(&str, &str)]) -> ResourceList {
        entries
            .iter()
            .map(|(name, value)| (name.to_string(), Quantity(value.to_string())))
            .collect()
    }

    #[test]
    fn test_parse_quantity_suffixes() {
        for (raw, expected) in [
            ("0", 0),
            ("10", 10),
            ("-3", -3),
            ("2k", 2_000),
            ("100Mi", 100 << 20),
            ("1Gi", 1 << 30),
        ] {
            assert_eq!(
                parse_quantity(&Quantity(raw.to_string())),
                Ok(expected),
                "unexpected value for {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_parse_quantity_rejects_unsupported_forms() {
        for raw in ["", "1.5", "10ki", "many", "9223372036854775807Gi"] {
            assert!(
                parse_quantity(&Quantity(raw.to_string())).is_err(),
                "quantity {:?} should not parse",
                raw
            );
        }
    }

    #[test]
    fn test_add_and_subtract_union_resources() {
        let a = list(&[("imagequota.io/imagestreamimages", "1")]);
        let b = list(&[
            ("imagequota.io/imagestreamimages", "9"),
            ("imagequota.io/imagestreamtags", "4"),
        ]);

        let sum = add(&a, &b).expect("addition should work");
        assert_eq!(sum, list(&[
            ("imagequota.io/imagestreamimages", "10"),
            ("imagequota.io/imagestreamtags", "4"),
        ]));

        let difference = subtract(&sum, &b).expect("subtraction should work");
        assert_eq!(difference, list(&[
            ("imagequota.io/imagestreamimages", "1"),
            ("imagequota.io/imagestreamtags", "0"),
        ]));
    }

    #[test]
    fn test_mask_projects_onto_names() {
        let full = list(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let masked = mask(&full, &["a".to_string(), "c".to_string(), "d".to_string()]);
        assert_eq!(masked, list(&[("a", "1"), ("c", "3")]));
    }

    #[test]
    fn test_less_than_or_equal_reports_exceeded_resources() {
        let used = list(&[("images", "11"), ("tags", "2"), ("untracked", "100")]);
        let hard = list(&[("images", "10"), ("tags", "5")]);

        let (allowed, exceeded) = less_than_or_equal(&used, &hard).expect("comparison");
        assert!(!allowed);
        assert_eq!(exceeded, vec!["images".to_string()]);

        let (allowed, exceeded) =
            less_than_or_equal(&list(&[("images", "10")]), &hard).expect("comparison");
        assert!(allowed);
        assert!(exceeded.is_empty());
    }
}
