// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::DecodeError;

/// Validate a topic name used in a PUBLISH: non-empty, no wildcard
/// characters, no embedded NUL.
///
/// # Errors
/// Returns [`DecodeError::InvalidTopic`] if any of the above is violated.
pub fn validate_topic_name(topic: &str) -> Result<(), DecodeError> {
    if topic.is_empty() || topic.contains(['+', '#', '\0']) {
        return Err(DecodeError::InvalidTopic);
    }
    Ok(())
}

/// Validate a topic filter used in a SUBSCRIBE/UNSUBSCRIBE: non-empty, and
/// `+`/`#` only appear as whole path levels, with `#` only as the final
/// level [MQTT-4.7.1-2] [MQTT-4.7.1-3].
///
/// # Errors
/// Returns [`DecodeError::InvalidTopic`] if the filter is malformed.
pub fn validate_topic_filter(filter: &str) -> Result<(), DecodeError> {
    if filter.is_empty() || filter.contains('\0') {
        return Err(DecodeError::InvalidTopic);
    }
    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        match *level {
            "#" => {
                if i != levels.len() - 1 {
                    return Err(DecodeError::InvalidTopic);
                }
            }
            "+" => {}
            other if other.contains('+') || other.contains('#') => {
                return Err(DecodeError::InvalidTopic);
            }
            _ => {}
        }
    }
    Ok(())
}

/// Does `filter` match the published `topic`, per the wildcard rules of
/// MQTT-4.7.1? Both arguments are assumed already validated.
#[must_use]
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let topic_levels: Vec<&str> = topic.split('/').collect();
    let filter_levels: Vec<&str> = filter.split('/').collect();
    matches_levels(&topic_levels, &filter_levels)
}

fn matches_levels(topic: &[&str], filter: &[&str]) -> bool {
    match (topic.first(), filter.first()) {
        (_, Some(&"#")) => true,
        (Some(_), Some(&"+")) => matches_levels(&topic[1..], &filter[1..]),
        (Some(t), Some(f)) => t == f && matches_levels(&topic[1..], &filter[1..]),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_filters() {
        assert!(validate_topic_filter("a/b/c").is_ok());
        assert!(validate_topic_filter("a/+/c").is_ok());
        assert!(validate_topic_filter("a/b/#").is_ok());
    }

    #[test]
    fn rejects_misplaced_wildcards() {
        assert!(validate_topic_filter("a/#/c").is_err());
        assert!(validate_topic_filter("a/b+").is_err());
        assert!(validate_topic_filter("").is_err());
    }

    #[test]
    fn matches_multi_level_wildcard() {
        assert!(topic_matches_filter("a/b/c", "a/#"));
        assert!(topic_matches_filter("a", "a/#"));
        assert!(!topic_matches_filter("a/b", "a/+/c"));
    }

    #[test]
    fn dollar_topics_are_hidden_from_bare_wildcards() {
        assert!(!topic_matches_filter("$SYS/uptime", "#"));
        assert!(topic_matches_filter("$SYS/uptime", "$SYS/#"));
    }
}
