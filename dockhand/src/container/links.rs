//! Legacy container links: `name:alias` parsing and the environment
//! injected into the linking container.

use dockhand_shared::errors::{DockhandError, DockhandResult};

/// Split `name[:alias]`; the alias defaults to the target name.
pub(crate) fn parse_link(spec: &str) -> DockhandResult<(String, String)> {
    let (name, alias) = match spec.split_once(':') {
        Some((name, alias)) => (name, alias),
        None => (spec, spec),
    };
    let name = name.trim_start_matches('/');
    let alias = alias.trim_start_matches('/');
    if name.is_empty() || alias.is_empty() || alias.contains(':') {
        return Err(DockhandError::InvalidParameter(format!(
            "invalid link format: {}",
            spec
        )));
    }
    Ok((name.to_string(), alias.to_string()))
}

/// Environment describing a linked container to the parent.
///
/// `parent` is the linking container's name and `alias` the link alias.
pub(crate) fn link_env(parent: &str, alias: &str, child_env: &[String]) -> Vec<String> {
    let prefix = alias.replace('-', "_").to_uppercase();
    let mut env = vec![format!("{}_NAME=/{}/{}", prefix, parent, alias)];

    for entry in child_env {
        let Some((key, value)) = entry.split_once('=') else {
            continue;
        };
        if matches!(key, "HOME" | "PATH") {
            continue;
        }
        env.push(format!("{}_ENV_{}={}", prefix, key, value));
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_link() {
        assert_eq!(
            parse_link("db:database").unwrap(),
            ("db".to_string(), "database".to_string())
        );
        assert_eq!(parse_link("/db").unwrap(), ("db".to_string(), "db".to_string()));
        assert!(parse_link(":alias").is_err());
        assert!(parse_link("db:").is_err());
    }

    #[test]
    fn test_link_env() {
        let env = link_env(
            "web",
            "my-db",
            &[
                "PATH=/bin".into(),
                "POSTGRES_USER=app".into(),
                "NOVALUE".into(),
            ],
        );
        assert_eq!(
            env,
            vec![
                "MY_DB_NAME=/web/my-db".to_string(),
                "MY_DB_ENV_POSTGRES_USER=app".to_string(),
            ]
        );
    }
}
