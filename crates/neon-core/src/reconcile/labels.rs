//! Container label keys understood by the reconciler

pub const COMPOSE_PROJECT: &str = "com.docker.compose.project";
pub const COMPOSE_SERVICE: &str = "com.docker.compose.service";
/// `svc:condition,svc:condition,...`
pub const COMPOSE_DEPENDS_ON: &str = "com.docker.compose.depends_on";

pub const NEON_TYPE: &str = "neon.type";
pub const NEON_NAME: &str = "neon.name";
pub const NEON_DESCRIPTION: &str = "neon.description";
pub const NEON_DEPENDS_ON: &str = "neon.depends_on";
pub const NEON_DEPENDS_ON_OPTIONAL: &str = "neon.depends_on.optional";

/// Split a comma-separated list, dropping blank entries
pub fn parse_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Service names from a compose depends_on label, conditions stripped
pub fn parse_compose_depends_on(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .filter_map(|entry| entry.split(':').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list(Some("db, cache,,  ")), vec!["db", "cache"]);
        assert!(parse_list(Some("")).is_empty());
        assert!(parse_list(None).is_empty());
    }

    #[test]
    fn test_compose_depends_on_drops_conditions() {
        assert_eq!(
            parse_compose_depends_on(Some("db:service_healthy:false,cache:service_started")),
            vec!["db", "cache"]
        );
        assert_eq!(parse_compose_depends_on(Some("queue")), vec!["queue"]);
        assert!(parse_compose_depends_on(Some(":service_started")).is_empty());
    }
}
