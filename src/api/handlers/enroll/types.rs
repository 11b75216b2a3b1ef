//! Request/response types for enrollment endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::enroll::models::AccountRecord;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct StartRequest {
    /// `student` or `college_admin`.
    pub role: String,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub password: String,
}

/// Issued after every accepted step; the client echoes it on the next one.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    pub token: String,
    pub step: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct CollegeRequest {
    pub college_id: Option<String>,
    pub college_name: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ProfileRequest {
    pub title: String,
    pub department: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct TokenConfigRequest {
    #[serde(default)]
    pub skip: bool,
    pub token_name: Option<String>,
    pub token_symbol: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResendResponse {
    pub ok: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct VerifyRequest {
    pub email_code: Option<String>,
    pub phone_code: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyResponse {
    pub access_token: String,
    pub account: AccountRecord,
}

/// Per-channel failure messages for a refused verify submission.
#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct VerifyErrors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_code: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyErrorsResponse {
    pub errors: VerifyErrors,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct FieldErrorBody {
    pub field: String,
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorsResponse {
    pub errors: Vec<FieldErrorBody>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionStatusResponse {
    pub token: String,
    pub step: String,
    pub flow: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn start_request_round_trips() -> Result<()> {
        let request = StartRequest {
            role: "student".to_string(),
            full_name: "Ada Lovelace".to_string(),
            email: "a@x.edu".to_string(),
            phone: "+15550100".to_string(),
            password: "hunter2hunter2".to_string(),
        };
        let value = serde_json::to_value(&request)?;
        let decoded: StartRequest = serde_json::from_value(value)?;
        assert_eq!(decoded.email, "a@x.edu");
        Ok(())
    }

    #[test]
    fn token_config_skip_defaults_to_false() -> Result<()> {
        let decoded: TokenConfigRequest = serde_json::from_str("{}")?;
        assert!(!decoded.skip);
        let decoded: TokenConfigRequest = serde_json::from_str(r#"{"skip": true}"#)?;
        assert!(decoded.skip);
        Ok(())
    }

    #[test]
    fn verify_errors_skip_empty_channels() -> Result<()> {
        let response = VerifyErrorsResponse {
            errors: VerifyErrors {
                email_code: None,
                phone_code: Some("Invalid code".to_string()),
            },
        };
        let value = serde_json::to_value(&response)?;
        assert!(value["errors"].get("email_code").is_none());
        assert_eq!(value["errors"]["phone_code"], "Invalid code");
        Ok(())
    }
}
