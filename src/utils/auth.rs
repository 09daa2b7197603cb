use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // user_id
    pub exp: usize,
    pub jti: String,
}

/// Grants `sub` a single project's compile output for a short time
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutputTokenClaims {
    pub sub: String,
    pub aud: String,
    pub project_id: String,
    pub exp: usize,
}

/// Lifetime of an output-file download token
pub const OUTPUT_TOKEN_TTL_SECS: i64 = 60;

/// `aud` claim carried only by output-file download tokens
pub const OUTPUT_TOKEN_AUDIENCE: &str = "compile-output";

fn expires_in(duration: Duration) -> usize {
    (Utc::now() + duration).timestamp() as usize
}

pub fn create_jwt(user_id: &str, secret: &str) -> Result<String> {
    let claims = Claims {
        sub: user_id.to_owned(),
        exp: expires_in(Duration::hours(24)),
        jti: uuid::Uuid::new_v4().to_string(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?;

    Ok(token)
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

pub fn create_output_token(user_id: &str, project_id: &str, secret: &str) -> Result<String> {
    let claims = OutputTokenClaims {
        sub: user_id.to_owned(),
        aud: OUTPUT_TOKEN_AUDIENCE.to_owned(),
        project_id: project_id.to_owned(),
        exp: expires_in(Duration::seconds(OUTPUT_TOKEN_TTL_SECS)),
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?)
}

pub fn validate_output_token(token: &str, secret: &str) -> Result<OutputTokenClaims> {
    let mut validation = Validation::default();
    validation.set_audience(&[OUTPUT_TOKEN_AUDIENCE]);
    validation.set_required_spec_claims(&["exp", "aud"]);

    let token_data = decode::<OutputTokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &validation,
    )?;
    Ok(token_data.claims)
}
