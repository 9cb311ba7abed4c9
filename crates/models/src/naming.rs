use crate::OrchestratorError;

const MAX_NAME_LEN: usize = 128;

/// Container and service names double as runtime container names and image
/// repositories, so they must satisfy both.
pub fn validate_name(name: &str) -> Result<(), OrchestratorError> {
    if name.is_empty() {
        return Err(OrchestratorError::validation("name is required"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(OrchestratorError::validation(format!(
            "name is longer than {MAX_NAME_LEN} characters"
        )));
    }
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    let rest_ok = chars.all(|c| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.' || c == '-'
    });
    if !first_ok || !rest_ok {
        return Err(OrchestratorError::validation(format!(
            "invalid name '{name}': use lowercase letters, digits, '_', '.' or '-', starting with a letter or digit"
        )));
    }
    Ok(())
}

/// True when the final path segment carries an explicit tag or the reference is
/// pinned by digest. A registry port (`host:5000/img`) is not a tag.
pub fn has_tag(image: &str) -> bool {
    if image.contains('@') {
        return true;
    }
    let last = image.rsplit('/').next().unwrap_or(image);
    last.contains(':')
}

/// Appends `:latest` to untagged references.
pub fn normalize_image_ref(image: &str) -> Result<String, OrchestratorError> {
    let image = image.trim();
    if image.is_empty() {
        return Err(OrchestratorError::validation("image is required"));
    }
    if image.chars().any(char::is_whitespace) {
        return Err(OrchestratorError::validation(format!(
            "invalid image reference '{image}'"
        )));
    }
    if has_tag(image) {
        Ok(image.to_string())
    } else {
        Ok(format!("{image}:latest"))
    }
}

/// `registry:5000/team/svc1:v2` -> `svc1`.
pub fn container_name_from_image(image: &str) -> Result<String, OrchestratorError> {
    let without_digest = image.split('@').next().unwrap_or(image);
    let last = without_digest.rsplit('/').next().unwrap_or(without_digest);
    let repo = last.split(':').next().unwrap_or(last);
    let name = repo.to_ascii_lowercase();
    validate_name(&name)?;
    Ok(name)
}

/// Tag produced by a build of `service_name`.
pub fn build_tag(service_name: &str) -> String {
    format!("{service_name}:latest")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_runtime_rules() {
        assert!(validate_name("svc1").is_ok());
        assert!(validate_name("my-svc_2.v").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name("Upper").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name("../escape").is_err());
        assert!(validate_name(&"a".repeat(129)).is_err());
    }

    #[test]
    fn untagged_refs_get_latest() {
        assert_eq!(normalize_image_ref("nginx").unwrap(), "nginx:latest");
        assert_eq!(normalize_image_ref("nginx:1.25").unwrap(), "nginx:1.25");
        assert_eq!(
            normalize_image_ref("localhost:5000/team/app").unwrap(),
            "localhost:5000/team/app:latest"
        );
        assert_eq!(
            normalize_image_ref("app@sha256:abcd").unwrap(),
            "app@sha256:abcd"
        );
        assert!(normalize_image_ref("  ").is_err());
    }

    #[test]
    fn container_name_is_last_repository_segment() {
        assert_eq!(container_name_from_image("svc1:latest").unwrap(), "svc1");
        assert_eq!(container_name_from_image("library/nginx").unwrap(), "nginx");
        assert_eq!(
            container_name_from_image("localhost:5000/team/App:v2").unwrap(),
            "app"
        );
    }
}
