// File: src/normalize.rs

use std::borrow::Cow;

type Transform = for<'a> fn(&'a str) -> Cow<'a, str>;

/// Per-field value rewrites applied before a value is aggregated.
const TRANSFORMS: &[(&str, Transform)] = &[("response_bytes_clf", clf_bytes)];

/// Rewrites `value` according to the transform registered for `field`.
/// Fields without a transform pass through untouched. Never fails.
pub fn normalize<'a>(field: &str, value: &'a str) -> Cow<'a, str> {
    TRANSFORMS
        .iter()
        .find(|(name, _)| *name == field)
        .map_or(Cow::Borrowed(value), |(_, transform)| transform(value))
}

/// CLF writes `-` instead of `0` when no body was sent.
fn clf_bytes(value: &str) -> Cow<'_, str> {
    if value == "-" {
        Cow::Borrowed("0")
    } else {
        Cow::Borrowed(value)
    }
}
