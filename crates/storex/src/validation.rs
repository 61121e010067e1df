//! Validation logic for metric, label and collector names.

const fn is_valid_start_name_char(ch: u8) -> bool {
    ch == b'_' || ch.is_ascii_alphabetic()
}

const fn is_valid_name_char(ch: u8) -> bool {
    ch == b'_' || ch.is_ascii_alphanumeric()
}

/// Checks that `name` matches `[A-Za-z_][A-Za-z0-9_]*`.
///
/// # Errors
///
/// Returns a description of the first violated rule.
pub const fn validate_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("name cannot be empty");
    }

    let name_bytes = name.as_bytes();
    let mut idx = 0;
    while idx < name.len() {
        if name_bytes[idx] > 127 {
            return Err("name contains non-ASCII chars");
        }
        if idx == 0 && !is_valid_start_name_char(name_bytes[idx]) {
            return Err("name starts with disallowed char (allowed chars: [_A-Za-z])");
        } else if !is_valid_name_char(name_bytes[idx]) {
            return Err("name contains disallowed char (allowed chars: [_A-Za-z0-9])");
        }
        idx += 1;
    }
    Ok(())
}

/// Checks that a label name is valid. Names starting with `__` are reserved by Prometheus.
///
/// # Errors
///
/// Returns a description of the first violated rule.
pub const fn validate_label_name(name: &str) -> Result<(), &'static str> {
    let name_bytes = name.as_bytes();
    if name_bytes.len() >= 2 && name_bytes[0] == b'_' && name_bytes[1] == b'_' {
        return Err("label names starting with `__` are reserved");
    }
    validate_name(name)
}

/// Checks that a metric name is valid.
///
/// # Panics
///
/// Panics if the name is invalid.
#[track_caller]
pub const fn assert_metric_name(name: &str) {
    if let Err(err) = validate_name(name) {
        panic!("{}", err);
    }
}

/// Checks that all label names are valid.
///
/// # Panics
///
/// Panics if any of the names is invalid.
#[track_caller]
pub fn assert_label_names(names: &[&str]) {
    for name in names {
        if let Err(err) = validate_label_name(name) {
            panic!("invalid label name `{name}`: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validating_names() {
        let valid_names = ["test", "_private", "snake_case", "l33t_c0d3", "pool_raidLvl"];
        for name in valid_names {
            validate_name(name).unwrap();
        }

        validate_name("").unwrap_err();
        validate_name("нет").unwrap_err();
        validate_name("t!st").unwrap_err();
        validate_name("1est").unwrap_err();
        validate_name("dashed-name").unwrap_err();
    }

    #[test]
    fn validating_label_names() {
        validate_label_name("collector").unwrap();
        validate_label_name("_private").unwrap();
        let err = validate_label_name("__name__").unwrap_err();
        assert!(err.contains("reserved"), "{err}");
    }

    #[test]
    #[should_panic(expected = "invalid label name `node ip`")]
    fn asserting_label_names() {
        assert_label_names(&["node_name", "node ip"]);
    }
}
