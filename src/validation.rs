//! Small checks shared by the form handlers. Each returns a message suitable
//! for showing to the user.

/// Trims `value` and requires it to be non-empty.
pub fn required<'a>(label: &str, value: &'a str) -> Result<&'a str, String> {
    match value.trim() {
        "" => Err(format!("{label} is required.")),
        trimmed => Ok(trimmed),
    }
}

pub fn max_chars(label: &str, value: &str, max: usize) -> Result<(), String> {
    match value.chars().count() <= max {
        true => Ok(()),
        false => Err(format!("{label} must be at most {max} characters.")),
    }
}

/// Largest team an event may allow. The registration forms render one input
/// per member.
pub const MAX_TEAM_SIZE: i64 = 50;

/// Team sizes are whole numbers in `1..=MAX_TEAM_SIZE`.
pub fn parse_team_size(value: &str) -> Result<i64, String> {
    match value.trim().parse::<i64>() {
        Ok(n) if (1..=MAX_TEAM_SIZE).contains(&n) => Ok(n),
        Ok(n) if n < 1 => Err("Team size must be at least 1.".to_string()),
        Ok(_) => Err(format!("Team size must be at most {MAX_TEAM_SIZE}.")),
        Err(_) => Err("Team size must be a whole number.".to_string()),
    }
}

/// Drops blank entries and trims the rest.
pub fn clean_roster(members: &[String]) -> Vec<String> {
    members
        .iter()
        .map(|m| m.trim())
        .filter(|m| !m.is_empty())
        .map(ToString::to_string)
        .collect()
}
