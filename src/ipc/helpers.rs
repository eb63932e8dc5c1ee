use super::error::err;
use super::types::Request;
use serde_json::json;

/// Role claim from the portal's auth layer. Token verification happens in the
/// front-end; the daemon only enforces what the verified claim allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Actor {
    pub role: Role,
    pub id: String,
}

/// Reads `params.actor` ({role, id}). Absent or malformed claims are
/// `unauthorized`; the caller never reaches a handler body without one.
pub fn actor(req: &Request) -> Result<Actor, serde_json::Value> {
    let Some(claim) = req.params.get("actor") else {
        return Err(err(&req.id, "unauthorized", "missing actor claim", None));
    };
    let role = match claim.get("role").and_then(|v| v.as_str()) {
        Some("admin") => Role::Admin,
        Some("teacher") => Role::Teacher,
        Some("student") => Role::Student,
        _ => {
            return Err(err(
                &req.id,
                "unauthorized",
                "actor role must be one of: admin, teacher, student",
                None,
            ))
        }
    };
    let Some(id) = claim
        .get("id")
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
    else {
        return Err(err(&req.id, "unauthorized", "missing actor id", None));
    };
    Ok(Actor {
        role,
        id: id.to_string(),
    })
}

/// Like [`actor`], but also rejects callers whose role differs.
pub fn require_role(req: &Request, role: Role) -> Result<Actor, serde_json::Value> {
    let a = actor(req)?;
    if a.role != role {
        return Err(err(
            &req.id,
            "forbidden",
            format!("requires {} role", role.as_str()),
            Some(json!({ "role": a.role.as_str() })),
        ));
    }
    Ok(a)
}

pub fn param_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// A handler failure that has not been attached to a request id yet. Lets
/// row-level helpers report errors without knowing which request (or which
/// upload row) they are serving.
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}
