//! Configuration loading from disk.

use std::path::Path;

use crate::config::schema::AppConfig;
use crate::error::FrameworkError;

/// Load an application config from a TOML file.
pub fn load_config(path: &Path) -> Result<AppConfig, FrameworkError> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|err| {
        FrameworkError::Config(format!("{}: {err}", path.display()))
    })
}

/// A parsed route declaration line.
#[derive(Debug, PartialEq)]
pub struct RouteLine {
    /// The registration DSL part (`"GET home: /"`).
    pub dsl: String,
    /// Registered handler name.
    pub handler: String,
    pub ttl: u64,
    pub kbps: u64,
}

/// Parse `"GET home: / -> hello | 30 8"` into its parts.
pub fn parse_route_line(line: &str) -> Result<RouteLine, FrameworkError> {
    let (dsl, rest) = line
        .split_once("->")
        .ok_or_else(|| FrameworkError::Config(format!("route without handler: {line}")))?;
    let (handler, options) = match rest.split_once('|') {
        Some((handler, options)) => (handler.trim(), options.trim()),
        None => (rest.trim(), ""),
    };
    if handler.is_empty() {
        return Err(FrameworkError::Config(format!(
            "route without handler: {line}"
        )));
    }
    let mut numbers = options.split_whitespace().map(|n| {
        n.parse::<u64>()
            .map_err(|_| FrameworkError::Config(format!("bad route option in: {line}")))
    });
    let ttl = numbers.next().transpose()?.unwrap_or(0);
    let kbps = numbers.next().transpose()?.unwrap_or(0);
    Ok(RouteLine {
        dsl: dsl.trim().to_string(),
        handler: handler.to_string(),
        ttl,
        kbps,
    })
}

/// Parse `"GET /old -> /new"` into the DSL part and the redirect target.
pub fn parse_redirect_line(line: &str) -> Result<(String, String), FrameworkError> {
    let (dsl, target) = line.split_once("->").ok_or_else(|| {
        FrameworkError::Config(format!("redirect without target: {line}"))
    })?;
    let target = target.trim();
    if target.is_empty() {
        return Err(FrameworkError::Config(format!(
            "redirect without target: {line}"
        )));
    }
    Ok((dsl.trim().to_string(), target.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_line_with_options() {
        let line = parse_route_line("GET|HEAD home: / -> hello | 30 8").unwrap();
        assert_eq!(line.dsl, "GET|HEAD home: /");
        assert_eq!(line.handler, "hello");
        assert_eq!(line.ttl, 30);
        assert_eq!(line.kbps, 8);
    }

    #[test]
    fn route_line_defaults() {
        let line = parse_route_line("POST /submit -> save").unwrap();
        assert_eq!(line.ttl, 0);
        assert_eq!(line.kbps, 0);
    }

    #[test]
    fn bad_lines_are_config_errors() {
        assert!(parse_route_line("GET /x").is_err());
        assert!(parse_route_line("GET /x -> h | many").is_err());
        assert!(parse_redirect_line("GET /x").is_err());
    }

    #[test]
    fn config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.toml");
        std::fs::write(
            &file,
            r#"
[globals]
DEBUG = 2
CORS = { origin = "*" }

routes = ["GET home: / -> hello"]
redirects = ["GET /legacy -> /"]
"#,
        )
        .unwrap();
        let config = load_config(&file).unwrap();
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.redirects.len(), 1);
        assert_eq!(
            config.globals.get("DEBUG"),
            Some(&toml::Value::Integer(2))
        );
    }
}
