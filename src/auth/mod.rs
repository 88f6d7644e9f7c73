use axum::http::HeaderMap;


/// Header carrying the principal (ClickUp team/user id) a request acts for
pub const PRINCIPAL_HEADER: &str = "x-team-id";

/// Extract the principal id from the `X-Team-Id` header
///
/// Surrounding whitespace is trimmed. Returns the id if present and non-empty.
pub fn extract_principal(headers: &HeaderMap) -> Result<String, PrincipalError> {
    let value = headers
        .get(PRINCIPAL_HEADER)
        .ok_or(PrincipalError::Missing)?
        .to_str()
        .map_err(|_| PrincipalError::InvalidFormat)?;

    let principal = value.trim();
    if principal.is_empty() {
        return Err(PrincipalError::Empty);
    }

    Ok(principal.to_string())
}

/// Principal header extraction errors
#[derive(Debug, PartialEq, Clone)]
pub enum PrincipalError {
    /// Header not present
    Missing,
    /// Header value is not visible ASCII
    InvalidFormat,
    /// Header value is empty
    Empty,
}

impl std::fmt::Display for PrincipalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrincipalError::Missing => write!(f, "Missing or invalid teamId"),
            PrincipalError::InvalidFormat => write!(f, "Invalid X-Team-Id header format"),
            PrincipalError::Empty => write!(f, "X-Team-Id header is empty"),
        }
    }
}

impl std::error::Error for PrincipalError {}
