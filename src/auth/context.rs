use super::Claims;
use uuid::Uuid;

/// Authenticated user context extracted from a verified JWT
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// User ID (from JWT sub claim)
    pub user_id: Uuid,

    /// Compared against the invitation address when a forwarder accepts
    pub email: Option<String>,
}

impl AuthContext {
    pub fn from_claims(claims: &Claims) -> Result<Self, &'static str> {
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| "Invalid user ID in token")?;

        Ok(Self {
            user_id,
            email: claims.email.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(sub: &str) -> Claims {
        Claims {
            sub: sub.to_string(),
            aud: "authenticated".to_string(),
            iss: "https://auth.example.com".to_string(),
            iat: 0,
            exp: 0,
            nbf: None,
            email: Some("ops@example.com".to_string()),
            role: None,
        }
    }

    #[test]
    fn subject_must_be_a_uuid() {
        assert!(AuthContext::from_claims(&claims("not-a-uuid")).is_err());

        let id = Uuid::new_v4();
        let ctx = AuthContext::from_claims(&claims(&id.to_string())).unwrap();
        assert_eq!(ctx.user_id, id);
        assert_eq!(ctx.email.as_deref(), Some("ops@example.com"));
    }
}
