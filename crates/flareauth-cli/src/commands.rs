use anyhow::{Context, Result};
use flareauth::AuthFacade;
use serde_json::json;

use crate::cli::{CreateSessionCookieArgs, SignInArgs, TokenArgs};
use crate::output::print_json;

pub async fn sign_in(auth: &AuthFacade, args: &SignInArgs) -> Result<()> {
    let result = auth
        .sign_in_with_email_and_password(&args.email, &args.password)
        .await
        .with_context(|| format!("sign-in failed for {}", args.email))?;
    print_json(&result)
}

pub async fn lookup(auth: &AuthFacade, args: &TokenArgs) -> Result<()> {
    let user = auth
        .lookup_user(&args.token)
        .await
        .context("user lookup failed")?;
    print_json(&user)
}

pub async fn verify_id_token(auth: &AuthFacade, args: &TokenArgs) -> Result<()> {
    let claims = auth
        .verify_id_token(&args.token)
        .await
        .context("ID token rejected")?;
    print_json(&claims)
}

pub async fn verify_session_cookie(auth: &AuthFacade, args: &TokenArgs) -> Result<()> {
    let claims = auth
        .verify_session_cookie(&args.token)
        .await
        .context("session cookie rejected")?;
    print_json(&claims)
}

pub async fn create_session_cookie(auth: &AuthFacade, args: &CreateSessionCookieArgs) -> Result<()> {
    let cookie = auth
        .create_session_cookie(&args.id_token, args.expires_in)
        .await
        .context("session cookie creation failed")?;
    print_json(&json!({
        "sessionCookie": cookie,
        "expiresIn": args.expires_in.as_secs(),
    }))
}

pub async fn access_token(auth: &AuthFacade) -> Result<()> {
    let credential = auth
        .access_token()
        .await
        .context("service credential unavailable")?;
    print_json(&credential)
}
