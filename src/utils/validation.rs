use anyhow::{Result, anyhow};

/// S3 object keys are limited to 1024 bytes of UTF-8
pub const MAX_OBJECT_NAME_LEN: usize = 1024;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validates an object name received from a client before it is used as a storage key
pub fn validate_object_name(name: &str) -> Result<&str> {
    if name.is_empty() {
        return Err(anyhow!(ValidationError {
            code: "INVALID_NAME",
            message: "Name cannot be empty".to_string(),
        }));
    }

    if name.len() > MAX_OBJECT_NAME_LEN {
        return Err(anyhow!(ValidationError {
            code: "NAME_TOO_LONG",
            message: format!(
                "Name is {} bytes, maximum is {}",
                name.len(),
                MAX_OBJECT_NAME_LEN
            ),
        }));
    }

    if name.chars().any(char::is_control) {
        return Err(anyhow!(ValidationError {
            code: "INVALID_NAME",
            message: "Name contains control characters".to_string(),
        }));
    }

    // Check for path traversal attempts
    if name.starts_with('/') || name.split(['/', '\\']).any(|segment| segment == "..") {
        tracing::warn!("Path traversal attempt detected: {}", name);
        return Err(anyhow!(ValidationError {
            code: "PATH_TRAVERSAL",
            message: "Name must be a relative path without '..' segments".to_string(),
        }));
    }

    Ok(name)
}
