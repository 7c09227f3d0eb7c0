//! Thin REST facade over the platform's HTTP API.
//!
//! Every request carries the mandatory `Content-Type`, `Authorization` and
//! `User-Agent` headers. Responses surface as status plus body; there is no
//! retry logic and no rate-limit bookkeeping here, the caller decides.

mod error;
pub mod routing;

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use tracing::{debug, instrument};

pub use self::error::Error as HttpError;
use self::error::Result;
use self::routing::Route;
use crate::constants;
use crate::model::id::{ApplicationId, ChannelId, GuildId, InteractionId, UserId};
use crate::model::interaction::InteractionResponse;
use crate::model::message::CreateMessage;
use crate::model::voice::VoiceState;

/// A raw response: HTTP status and the unparsed body.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub body: Bytes,
}

impl Response {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(Into::into)
    }
}

pub struct Http {
    client: Client,
    base_url: String,
    token: String,
}

impl Http {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn headers(&self, extra: Option<HeaderMap>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=UTF-8"),
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bot {}", self.token))
                .unwrap_or_else(|_| HeaderValue::from_static("Bot")),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static(constants::USER_AGENT));

        if let Some(extra) = extra {
            headers.extend(extra);
        }

        headers
    }

    /// Performs one request against `base_url + route`.
    #[instrument(skip(self, body, extra_headers))]
    async fn request<T: Serialize>(
        &self,
        method: Method,
        route: Route<'_>,
        body: Option<&T>,
        extra_headers: Option<HeaderMap>,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let url = format!("{}{}", self.base_url, route);

        let mut request = self
            .client
            .request(method, url.as_str())
            .headers(self.headers(extra_headers));

        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        debug!(%url, %status, "rest response");

        Ok(Response { status, body })
    }

    /// `GET` a route.
    pub async fn get(
        &self,
        route: Route<'_>,
        extra_headers: Option<HeaderMap>,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        self.request::<()>(Method::GET, route, None, extra_headers, timeout).await
    }

    /// `POST` a JSON body to a route.
    pub async fn post<T: Serialize>(
        &self,
        route: Route<'_>,
        body: Option<&T>,
        extra_headers: Option<HeaderMap>,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        self.request(Method::POST, route, body, extra_headers, timeout).await
    }

    /// `PUT` a JSON body to a route.
    pub async fn put<T: Serialize>(
        &self,
        route: Route<'_>,
        body: Option<&T>,
        extra_headers: Option<HeaderMap>,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        self.request(Method::PUT, route, body, extra_headers, timeout).await
    }

    /// `PATCH` a JSON body on a route.
    pub async fn patch<T: Serialize>(
        &self,
        route: Route<'_>,
        body: Option<&T>,
        extra_headers: Option<HeaderMap>,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        self.request(Method::PATCH, route, body, extra_headers, timeout).await
    }

    /// `DELETE` a route.
    pub async fn delete(
        &self,
        route: Route<'_>,
        extra_headers: Option<HeaderMap>,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        self.request::<()>(Method::DELETE, route, None, extra_headers, timeout).await
    }

    /// `GET /guilds/{guild_id}/voice-states/{user_id}`
    ///
    /// Returns `Ok(None)` on 404: the user is in no voice channel.
    pub async fn get_user_voice_state(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<VoiceState>> {
        let response = self
            .get(Route::GuildVoiceState { guild_id, user_id }, None, None)
            .await?;

        match response.status {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response.json().map(Some),
            status => Err(HttpError::UnexpectedStatus(status)),
        }
    }

    /// `GET /guilds/{guild_id}/voice-states/@me`
    pub async fn get_current_user_voice_state(
        &self,
        guild_id: GuildId,
    ) -> Result<Option<VoiceState>> {
        let response = self
            .get(Route::GuildVoiceStateMe { guild_id }, None, None)
            .await?;

        match response.status {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response.json().map(Some),
            status => Err(HttpError::UnexpectedStatus(status)),
        }
    }

    /// `POST /interactions/{interaction_id}/{token}/callback`
    ///
    /// Capped at 3 seconds: a callback that misses the interaction window is
    /// worthless anyway.
    pub async fn create_interaction_response(
        &self,
        interaction_id: InteractionId,
        token: &str,
        response: &InteractionResponse,
        with_response: bool,
    ) -> Result<Response> {
        self.post(
            Route::InteractionCallback {
                interaction_id,
                token,
                with_response,
            },
            Some(response),
            None,
            Some(constants::INTERACTION_CALLBACK_TIMEOUT),
        )
        .await
    }

    /// `POST /channels/{channel_id}/messages`
    pub async fn create_message(
        &self,
        channel_id: ChannelId,
        message: &CreateMessage,
    ) -> Result<Response> {
        self.post(Route::ChannelMessages { channel_id }, Some(message), None, None).await
    }

    /// `DELETE /webhooks/{application_id}/{token}/messages/@original`
    pub async fn delete_original_interaction_response(
        &self,
        application_id: ApplicationId,
        token: &str,
    ) -> Result<Response> {
        self.delete(
            Route::WebhookOriginalMessage {
                application_id,
                token,
            },
            None,
            None,
        )
        .await
    }
}

impl std::fmt::Debug for Http {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http").field("base_url", &self.base_url).finish_non_exhaustive()
    }
}
