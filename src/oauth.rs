use std::{fmt::Display, future::Future, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;
use tower::retry::backoff::{Backoff, ExponentialBackoff, ExponentialBackoffMaker, MakeBackoff};
use tower::retry::{Policy, Retry};
use tower::util::rng::HasherRng;
use tower::ServiceExt;

use crate::config::OAuthClient;
use crate::db_helpers::{SocialProfile, SocialProvider};

pub const OAUTH_TIMEOUT: Duration = Duration::from_secs(30);
const OAUTH_ATTEMPTS: usize = 3;
const BACKOFF_MIN: Duration = Duration::from_millis(500);
const BACKOFF_MAX: Duration = Duration::from_secs(4);

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_USER_URL: &str = "https://api.github.com/user";
const GITHUB_EMAILS_URL: &str = "https://api.github.com/user/emails";

pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(OAUTH_TIMEOUT)
        .user_agent(concat!("rockfeed/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

/// Retries a failed provider call with exponential back-off until the
/// attempts run out.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    backoff: ExponentialBackoff,
    retries_left: usize,
}

impl RetryPolicy {
    /// `attempts` counts the first call too.
    pub fn new(attempts: usize, min: Duration, max: Duration) -> Result<Self> {
        let backoff = ExponentialBackoffMaker::new(min, max, 0.5, HasherRng::new())
            .context("Invalid OAuth back-off")?
            .make_backoff();
        Ok(RetryPolicy {
            backoff,
            retries_left: attempts.saturating_sub(1),
        })
    }

    fn oauth() -> Result<Self> {
        Self::new(OAUTH_ATTEMPTS, BACKOFF_MIN, BACKOFF_MAX)
    }
}

impl<Req: Clone, Res, E: Display> Policy<Req, Res, E> for RetryPolicy {
    type Future = <ExponentialBackoff as Backoff>::Future;

    fn retry(&mut self, _: &mut Req, result: &mut std::result::Result<Res, E>) -> Option<Self::Future> {
        match result {
            Ok(_) => None,
            Err(_) if self.retries_left == 0 => None,
            Err(e) => {
                self.retries_left -= 1;
                tracing::warn!(retries_left = self.retries_left, "OAuth request failed: {:#}", e);
                Some(self.backoff.next_backoff())
            }
        }
    }

    fn clone_request(&mut self, req: &Req) -> Option<Req> {
        Some(req.clone())
    }
}

/// Runs `op` as a service behind a [`Retry`] layer driven by `policy`.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, op: F) -> Result<T>
where
    F: Fn() -> Fut + Clone,
    Fut: Future<Output = Result<T>>,
{
    let service = tower::service_fn(move |()| op());
    Retry::new(policy, service).oneshot(()).await
}

#[derive(Deserialize)]
struct AccessToken {
    access_token: String,
}

#[derive(Deserialize)]
struct GoogleUser {
    id: String,
    email: String,
    name: Option<String>,
    picture: Option<String>,
}

#[derive(Deserialize)]
struct GithubUser {
    id: i64,
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

/// Exchanges an authorization `code` for the provider's view of the user.
pub async fn fetch_profile(
    http: &reqwest::Client,
    provider: SocialProvider,
    client: &OAuthClient,
    code: &str,
) -> Result<SocialProfile> {
    match provider {
        SocialProvider::Google => fetch_google_profile(http, client, code).await,
        SocialProvider::Github => fetch_github_profile(http, client, code).await,
    }
}

async fn fetch_google_profile(
    http: &reqwest::Client,
    client: &OAuthClient,
    code: &str,
) -> Result<SocialProfile> {
    let token: AccessToken = with_retry(RetryPolicy::oauth()?, || async move {
        let response = http
            .post(GOOGLE_TOKEN_URL)
            .json(&serde_json::json!({
                "code": code,
                "client_id": client.client_id,
                "client_secret": client.client_secret,
                "redirect_uri": client.redirect_uri,
                "grant_type": "authorization_code",
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    })
    .await
    .context("Google token exchange failed")?;
    let access_token = token.access_token.as_str();

    let user: GoogleUser = with_retry(RetryPolicy::oauth()?, || async move {
        let response = http
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    })
    .await
    .context("Google profile request failed")?;

    Ok(SocialProfile {
        provider: SocialProvider::Google,
        provider_id: user.id,
        name: user.name.unwrap_or_else(|| user.email.clone()),
        email: user.email,
        avatar_url: user.picture,
    })
}

async fn fetch_github_profile(
    http: &reqwest::Client,
    client: &OAuthClient,
    code: &str,
) -> Result<SocialProfile> {
    let token: AccessToken = with_retry(RetryPolicy::oauth()?, || async move {
        let response = http
            .post(GITHUB_TOKEN_URL)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&serde_json::json!({
                "client_id": client.client_id,
                "client_secret": client.client_secret,
                "code": code,
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    })
    .await
    .context("GitHub token exchange failed")?;
    let access_token = token.access_token.as_str();

    let user: GithubUser = with_retry(RetryPolicy::oauth()?, || async move {
        let response = http
            .get(GITHUB_USER_URL)
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    })
    .await
    .context("GitHub profile request failed")?;

    // The profile e-mail is empty when the user keeps it private.
    let email = match user.email {
        Some(email) => email,
        None => {
            let emails: Vec<GithubEmail> = with_retry(RetryPolicy::oauth()?, || async move {
                let response = http
                    .get(GITHUB_EMAILS_URL)
                    .bearer_auth(access_token)
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(response.json().await?)
            })
            .await
            .context("GitHub e-mail request failed")?;
            emails
                .into_iter()
                .find(|e| e.primary && e.verified)
                .map(|e| e.email)
                .context("GitHub account has no verified primary e-mail")?
        }
    };

    Ok(SocialProfile {
        provider: SocialProvider::Github,
        provider_id: user.id.to_string(),
        name: user.name.unwrap_or(user.login),
        email,
        avatar_url: user.avatar_url,
    })
}
