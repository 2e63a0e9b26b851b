//! REST collaborator.
//!
//! The gateway core needs only a handful of endpoints, reached through the [`RestApi`] trait so
//! tests and embedders can substitute their own implementation. [`DiscordRestApi`] is the default:
//! requests travel through an mpsc channel to a single [`DiscordHttpClient`] processor which sends
//! them with `reqwest` and answers on a oneshot channel.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response as HttpResponse, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc::{self, Receiver as MpscReceiver, Sender as MpscSender};
use tokio::sync::oneshot::{self, Sender as OneshotSender};
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::gateway_structs::GetGatewayResponse;
use crate::{BASE_API_URL, DISCORD_API_VERSION};

/// Shortened Alias for Mpsc channel sender for a [`DiscordHttpClientRequest`]
pub type DiscordHttpClientReqSender = MpscSender<DiscordHttpClientRequest>;

/// The endpoints the gateway core depends on.
#[async_trait]
pub trait RestApi: Send + Sync {
    /// The gateway url to connect to.
    async fn get_gateway(&self) -> Result<GetGatewayResponse, GatewayError>;

    async fn get_user(&self, user_id: &str) -> Result<Value, GatewayError>;

    async fn get_channel_message(&self, channel_id: &str, message_id: &str) -> Result<Value, GatewayError>;

    async fn get_guild_member(&self, guild_id: &str, user_id: &str) -> Result<Value, GatewayError>;
}

/// The reqwest client used by the request processor.
pub struct DiscordHttpClient {

    // reqwest HTTP client used for requests on the Discord api.
    pub client: Client,

    // The base url to be built upon when requesting.
    pub base_url: Url,

}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscordHttpReqType {
    /// The url of the gateway.
    GetGateway,
    GetUser { user_id: String },
    GetChannelMessage { channel_id: String, message_id: String },
    GetGuildMember { guild_id: String, user_id: String },
}

#[derive(Debug)]
/// Represents a request to the DiscordHttpClient channel.
pub struct DiscordHttpClientRequest {

    /// The type of request which serves as what to request from the api
    pub request: DiscordHttpRequest,

    /// The oneshot channel where the response for this request should be sent to.
    pub response_sender: OneshotSender<Result<HttpResponse>>,

}

#[derive(Debug)]
/// Represents a request to the Discord Api
pub struct DiscordHttpRequest {

    /// The type of request which serves as what to request from the api
    pub request_type: DiscordHttpReqType,

    /// The method to use for the request
    pub method: Method,

    /// A map of extra headers to add upon the default ones.
    pub headers: HeaderMap,

}

impl DiscordHttpRequest {

    /// Constructs a new [`DiscordHttpRequest`]
    pub fn new(request_type: DiscordHttpReqType, method: Method) -> Self {
        Self {
            request_type,
            method,
            headers: HeaderMap::new()
        }
    }

    /// A GET request, which is all the gateway core issues.
    pub fn get(request_type: DiscordHttpReqType) -> Self {
        Self::new(request_type, Method::GET)
    }

    /// Sends this request through the processor and deserializes the response body.
    pub async fn request<T: DeserializeOwned>(self, http_client_sender: &DiscordHttpClientReqSender) -> Result<T> {
        let path = self.get_request_path();
        send_discord_http_request(self, http_client_sender)
            .await?
            .json::<T>()
            .await
            .with_context(|| format!("Failed to deserialize the response of {path}"))
    }

    /// Adds a header to the [`HeaderMap`] of the request.
    pub fn add_header(&mut self, header_key: &'static str, header_value: &str) -> Result<(), InvalidHeaderValue> {

        // Convert &str value into HeaderValue
        let header_value = HeaderValue::from_str(header_value)?;

        // Append new header to existing map
        self.headers
            .append(header_key, header_value);

        Ok(())
    }

    /// The path of the endpoint relative to the versioned base url.
    pub fn get_request_path(&self) -> String {
        match &self.request_type {
            DiscordHttpReqType::GetGateway => "gateway".to_owned(),
            DiscordHttpReqType::GetUser { user_id } => format!("users/{user_id}"),
            DiscordHttpReqType::GetChannelMessage { channel_id, message_id } => {
                format!("channels/{channel_id}/messages/{message_id}")
            }
            DiscordHttpReqType::GetGuildMember { guild_id, user_id } => format!("guilds/{guild_id}/members/{user_id}"),
        }
    }
}

impl DiscordHttpClient {

    pub fn new(base_url: &str, version: u32, token: &str) -> Result<Self> {

        // Default headers required for utilising discord api.
        let mut default_headers = HeaderMap::new();

        // Every request made by the bot is authorized with its token.
        let authorization_header_value = HeaderValue::from_str(&format!("Bot {token}"))
            .context("Failed to create default authorization header for Http Requests, perhaps token inputted is not ASCII?")?;
        default_headers.append("Authorization", authorization_header_value);

        // Create the reqwest client utilised for https requests to discords api.
        let client = Client::builder()
            .default_headers(default_headers)
            .build()
            .context("Failed to create the reqwest client with default headers")?;

        // Create the base_uri utilised for all requests once here.
        let url = Url::from_str(&format!("{base_url}/v{version}/"))
            .context("Failed to combine the base url with the api version")?;

        Ok(Self {
            client,
            base_url: url,
        })
    }

    /// Sets up a request through [`DiscordHttpClient`]
    /// The [`Method`], [Path][`Url`] and [Headers][`HeaderMap`] are retrieved through a [`DiscordHttpRequest`]
    pub fn request(&self, request: DiscordHttpRequest) -> Result<RequestBuilder> {

        // Constructs the full URL utilised for this request
        let url_address = self.base_url.join(&request.get_request_path())
            .context("Failed to join base_url with Request path")?;

        Ok(self.client.request(request.method, url_address)
            .headers(request.headers))
    }

    /// Processor for inbound [`DiscordHttpClientRequest`]s.
    /// Requests are started in arrival order, `time_offset` apart; their responses are awaited concurrently.
    pub async fn handle_channel_inbound_requests(self, mut receiver: MpscReceiver<DiscordHttpClientRequest>, time_offset: Duration) {

        while let Some(request) = receiver.recv().await {

            // Errors are sent back, the sender may already have given up which is fine.
            let request_builder = match self.request(request.request).context("Failed to create Request Builder") {
                Ok(builder) => builder,
                Err(error) => {
                    let _ = request.response_sender.send(Err(error));
                    continue
                },
            };

            tokio::spawn(async move {
                let response = request_builder.send()
                    .await
                    .context("Failed to send request to Discord Api")
                    .and_then(check_status);

                if let Err(error) = &response {
                    warn!(error = %format!("{error:#}"), "rest request failed");
                }
                let _ = request.response_sender.send(response);
            });

            if !time_offset.is_zero() {
                tokio::time::sleep(time_offset).await;
            }
        }

        debug!("rest request channel closed, stopping the processor");
    }
}

/// Turns error statuses into errors, with a hint for the one caused by a bad token.
fn check_status(response: HttpResponse) -> Result<HttpResponse> {
    let status = response.status();
    match response.error_for_status() {
        Ok(response) => Ok(response),
        Err(error) if status == reqwest::StatusCode::UNAUTHORIZED => {
            Err(anyhow::Error::new(error).context("Unauthorized most likely due to Invalid Token Passed"))
        }
        Err(error) => Err(anyhow::Error::new(error).context(format!("Discord Api responded with {status}"))),
    }
}

/// Sends a [`DiscordHttpRequest`] through the [`DiscordHttpClient`] request processing channel.
pub async fn send_discord_http_request(request: DiscordHttpRequest, http_client_sender: &DiscordHttpClientReqSender) -> Result<HttpResponse> {

    // Create the channel to recieve the response from the DiscordHttpClient channel.
    let (response_sender, response_receiver) = oneshot::channel();

    let client_request = DiscordHttpClientRequest {
        response_sender,
        request,
    };

    http_client_sender.send(client_request)
        .await
        .map_err(|_| anyhow::Error::msg("The rest request processor has stopped"))?;

    response_receiver.await
        .context("The rest request processor dropped the request")?
}

/// [`RestApi`] backed by a spawned [`DiscordHttpClient`] processor.
#[derive(Clone)]
pub struct DiscordRestApi {
    requests: DiscordHttpClientReqSender,
}

impl DiscordRestApi {
    /// Spawns the request processor, must be called within a tokio runtime.
    pub fn spawn(token: Arc<str>, time_offset: Duration) -> Result<Self> {
        let http_client = DiscordHttpClient::new(BASE_API_URL, DISCORD_API_VERSION, &token)?;
        let (requests, receiver) = mpsc::channel(50);

        tokio::spawn(async move {
            http_client.handle_channel_inbound_requests(receiver, time_offset).await
        });

        Ok(Self { requests })
    }

    async fn get<T: DeserializeOwned>(&self, request_type: DiscordHttpReqType) -> Result<T, GatewayError> {
        DiscordHttpRequest::get(request_type)
            .request(&self.requests)
            .await
            .map_err(|error| GatewayError::Rest(format!("{error:#}")))
    }
}

#[async_trait]
impl RestApi for DiscordRestApi {
    async fn get_gateway(&self) -> Result<GetGatewayResponse, GatewayError> {
        self.get(DiscordHttpReqType::GetGateway).await
    }

    async fn get_user(&self, user_id: &str) -> Result<Value, GatewayError> {
        self.get(DiscordHttpReqType::GetUser { user_id: user_id.to_owned() }).await
    }

    async fn get_channel_message(&self, channel_id: &str, message_id: &str) -> Result<Value, GatewayError> {
        self.get(DiscordHttpReqType::GetChannelMessage {
            channel_id: channel_id.to_owned(),
            message_id: message_id.to_owned(),
        }).await
    }

    async fn get_guild_member(&self, guild_id: &str, user_id: &str) -> Result<Value, GatewayError> {
        self.get(DiscordHttpReqType::GetGuildMember {
            guild_id: guild_id.to_owned(),
            user_id: user_id.to_owned(),
        }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_paths() {
        let message = DiscordHttpRequest::get(DiscordHttpReqType::GetChannelMessage {
            channel_id: "1".into(),
            message_id: "2".into(),
        });
        assert_eq!(message.get_request_path(), "channels/1/messages/2");
        assert_eq!(DiscordHttpRequest::get(DiscordHttpReqType::GetGateway).get_request_path(), "gateway");
        let user = DiscordHttpRequest::get(DiscordHttpReqType::GetUser { user_id: "3".into() });
        assert_eq!(user.get_request_path(), "users/3");
    }

    #[test]
    fn requests_are_built_on_the_versioned_base_url() {
        let client = DiscordHttpClient::new(BASE_API_URL, DISCORD_API_VERSION, "token").unwrap();
        let mut request = DiscordHttpRequest::get(DiscordHttpReqType::GetGuildMember {
            guild_id: "10".into(),
            user_id: "20".into(),
        });
        request.add_header("X-Audit-Log-Reason", "testing").unwrap();

        let request = client.request(request).unwrap().build().unwrap();
        assert_eq!(request.url().as_str(), "https://discordapp.com/api/v6/guilds/10/members/20");
        assert_eq!(request.headers()["X-Audit-Log-Reason"], "testing");
    }

    #[test]
    fn tokens_must_fit_in_a_header() {
        assert!(DiscordHttpClient::new(BASE_API_URL, DISCORD_API_VERSION, "bad\ntoken").is_err());
    }

    #[tokio::test]
    async fn a_stopped_processor_is_an_error() {
        let (sender, receiver) = mpsc::channel(1);
        drop(receiver);
        let result = send_discord_http_request(DiscordHttpRequest::get(DiscordHttpReqType::GetGateway), &sender).await;
        assert!(result.is_err());
    }
}
