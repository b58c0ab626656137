use std::collections::HashMap;

/// Resolves a timezone name to its UTC offset in seconds.
pub trait TimezoneLookup: Send + Sync {
    fn offset_seconds(&self, name: &str) -> Option<i32>;
}

/// Fixed table of named offsets. Also understands `UTC`, `UTC+HH:MM` and
/// `UTC-HH:MM` literals without a table entry.
#[derive(Debug, Clone, Default)]
pub struct StaticTimezoneLookup {
    table: HashMap<String, i32>,
}

impl StaticTimezoneLookup {
    pub fn new(table: HashMap<String, i32>) -> Self {
        Self { table }
    }

    pub fn with_zone(mut self, name: impl Into<String>, offset_seconds: i32) -> Self {
        self.table.insert(name.into(), offset_seconds);
        self
    }
}

impl TimezoneLookup for StaticTimezoneLookup {
    fn offset_seconds(&self, name: &str) -> Option<i32> {
        self.table
            .get(name)
            .copied()
            .or_else(|| parse_utc_literal(name))
    }
}

fn parse_utc_literal(name: &str) -> Option<i32> {
    let rest = name.trim().strip_prefix("UTC")?;
    if rest.is_empty() {
        return Some(0);
    }

    let (sign, rest) = match rest.as_bytes().first()? {
        b'+' => (1, &rest[1..]),
        b'-' => (-1, &rest[1..]),
        _ => return None,
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((hours, minutes)) => (hours.parse::<i32>().ok()?, minutes.parse::<i32>().ok()?),
        None => (rest.parse::<i32>().ok()?, 0),
    };
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    Some(sign * (hours * 3_600 + minutes * 60))
}
