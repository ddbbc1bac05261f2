//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, poll interval > 0)
//! - Check that TLS material is fully specified
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::ServerConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a parsed configuration, collecting every violation.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.host.trim().is_empty() {
        errors.push(ValidationError::new("listener.host", "must not be empty"));
    }
    if config.listener.backlog == 0 {
        errors.push(ValidationError::new("listener.backlog", "must be greater than 0"));
    }
    if config.listener.adhoc_tls && config.listener.tls.is_some() {
        errors.push(ValidationError::new(
            "listener.adhoc_tls",
            "cannot be combined with listener.tls",
        ));
    }
    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.trim().is_empty() {
            errors.push(ValidationError::new("listener.tls.cert_path", "must not be empty"));
        }
        if tls.key_path.trim().is_empty() {
            errors.push(ValidationError::new("listener.tls.key_path", "must not be empty"));
        }
    }

    // A request line needs at least "GET / HTTP/1.1".
    if config.limits.max_line_length < 16 {
        errors.push(ValidationError::new(
            "limits.max_line_length",
            "must be at least 16 bytes",
        ));
    }
    if config.limits.max_headers == 0 {
        errors.push(ValidationError::new("limits.max_headers", "must be greater than 0"));
    }

    if config.timeouts.poll_interval_ms == 0 {
        errors.push(ValidationError::new(
            "timeouts.poll_interval_ms",
            "must be greater than 0",
        ));
    }
    if config.timeouts.idle_secs == 0 {
        errors.push(ValidationError::new("timeouts.idle_secs", "must be greater than 0"));
    }

    if config.server.server_software.contains(['\r', '\n']) {
        errors.push(ValidationError::new(
            "server.server_software",
            "must not contain line breaks",
        ));
    }

    if tracing_subscriber::EnvFilter::try_new(&config.observability.log_level).is_err() {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("invalid filter '{}'", config.observability.log_level),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TlsConfig;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn ephemeral_port_is_allowed() {
        let mut config = ServerConfig::default();
        config.listener.port = 0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn adhoc_and_file_tls_are_exclusive() {
        let mut config = ServerConfig::default();
        config.listener.adhoc_tls = true;
        assert!(validate_config(&config).is_ok());

        config.listener.tls = Some(TlsConfig {
            cert_path: "cert.pem".into(),
            key_path: "key.pem".into(),
        });
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "listener.adhoc_tls");
    }

    #[test]
    fn reports_every_violation() {
        let mut config = ServerConfig::default();
        config.limits.max_headers = 0;
        config.limits.max_line_length = 4;
        config.timeouts.poll_interval_ms = 0;
        config.listener.tls = Some(TlsConfig {
            cert_path: String::new(),
            key_path: "key.pem".into(),
        });

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.tls.cert_path",
                "limits.max_line_length",
                "limits.max_headers",
                "timeouts.poll_interval_ms",
            ]
        );
    }

    #[test]
    fn rejects_header_injection_in_server_software() {
        let mut config = ServerConfig::default();
        config.server.server_software = "evil\r\nX-Injected: 1".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "server.server_software");
    }
}
