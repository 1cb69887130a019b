//! Token-endpoint client for authorization-code and refresh-token exchanges.
//!
//! Exchanges go over the same [`ApiTransport`] as every dispatched call; the
//! endpoint only owns credential presentation (basic vs. post client auth),
//! form encoding, and response classification.

// crates.io
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
// self
use crate::{
	_prelude::*,
	error::TransportError,
	http::{ApiTransport, HttpMethod, TransportRequest},
};

/// How client credentials are presented to the token endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientAuthMethod {
	/// `Authorization: Basic base64(client_id:client_secret)`.
	#[default]
	SecretBasic,
	/// `client_id` and `client_secret` in the form body.
	SecretPost,
	/// Public client; only `client_id` in the form body.
	None,
}

/// Successful token-endpoint response, normalized.
#[derive(Clone, Debug)]
pub struct TokenGrant {
	/// Issued access token.
	pub access_token: String,
	/// Issued refresh token, when the provider rotates or repeats one.
	pub refresh_token: Option<String>,
	/// Token scheme, `Bearer` unless the provider says otherwise.
	pub token_type: String,
	/// Reported lifetime.
	pub expires_in: Duration,
}

/// Failures produced by token-endpoint exchanges.
#[derive(Debug, ThisError)]
pub enum TokenEndpointError {
	/// Provider rejected the grant with an OAuth error payload.
	#[error("Token endpoint rejected the grant ({status}): {code}: {description}.")]
	Rejected {
		/// OAuth error code, e.g. `invalid_grant`.
		code: String,
		/// Provider-supplied description, empty when omitted.
		description: String,
		/// HTTP status of the rejection.
		status: u16,
	},
	/// Token endpoint responded with JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	Parse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code of the response.
		status: u16,
	},
	/// Token endpoint could not be reached.
	#[error("Token endpoint could not be reached.")]
	Transport(#[from] TransportError),
	/// Token endpoint omitted a usable `expires_in`.
	#[error("Token endpoint response is missing a positive expires_in.")]
	NonPositiveExpiresIn,
}
impl TokenEndpointError {
	/// Whether the provider reported `invalid_grant`, i.e. the secret is dead
	/// and retrying can never succeed.
	pub fn is_invalid_grant(&self) -> bool {
		matches!(self, Self::Rejected { code, .. } if code == "invalid_grant")
	}

	/// HTTP status associated with the failure, when one was received.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Rejected { status, .. } | Self::Parse { status, .. } => Some(*status),
			Self::Transport(_) | Self::NonPositiveExpiresIn => None,
		}
	}
}

#[derive(Deserialize)]
struct WireTokenResponse {
	access_token: String,
	refresh_token: Option<String>,
	token_type: Option<String>,
	expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct WireErrorResponse {
	error: Option<String>,
	error_description: Option<String>,
}

/// Client for a single OAuth token endpoint.
pub struct TokenEndpoint<T>
where
	T: ?Sized + ApiTransport,
{
	url: Url,
	client_id: String,
	client_secret: Option<String>,
	auth_method: ClientAuthMethod,
	transport: Arc<T>,
}
impl<T> TokenEndpoint<T>
where
	T: ?Sized + ApiTransport,
{
	/// Creates an endpoint client for a public client (no secret).
	pub fn new(url: Url, client_id: impl Into<String>, transport: impl Into<Arc<T>>) -> Self {
		Self {
			url,
			client_id: client_id.into(),
			client_secret: None,
			auth_method: ClientAuthMethod::default(),
			transport: transport.into(),
		}
	}

	/// Attaches a confidential client secret.
	pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(secret.into());

		self
	}

	/// Overrides how credentials are presented.
	pub fn with_auth_method(mut self, method: ClientAuthMethod) -> Self {
		self.auth_method = method;

		self
	}

	/// Redeems an authorization code for tokens.
	pub async fn exchange_authorization_code(
		&self,
		code: &str,
		redirect_uri: &Url,
	) -> Result<TokenGrant, TokenEndpointError> {
		self.request_token(&[
			("grant_type", "authorization_code"),
			("code", code),
			("redirect_uri", redirect_uri.as_str()),
		])
		.await
	}

	/// Mints a new access token from a refresh token.
	pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, TokenEndpointError> {
		self.request_token(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
			.await
	}

	async fn request_token(
		&self,
		params: &[(&str, &str)],
	) -> Result<TokenGrant, TokenEndpointError> {
		let body = {
			let mut form = url::form_urlencoded::Serializer::new(String::new());

			for (key, value) in params {
				form.append_pair(key, value);
			}
			match self.auth_method {
				ClientAuthMethod::SecretBasic => {
					form.append_pair("client_id", &self.client_id);
				},
				ClientAuthMethod::SecretPost => {
					form.append_pair("client_id", &self.client_id);

					if let Some(secret) = &self.client_secret {
						form.append_pair("client_secret", secret);
					}
				},
				ClientAuthMethod::None => {
					form.append_pair("client_id", &self.client_id);
				},
			}

			form.finish().into_bytes()
		};

		let mut request = TransportRequest::new(HttpMethod::Post, self.url.clone())
			.with_header("content-type", "application/x-www-form-urlencoded")
			.with_header("accept", "application/json")
			.with_body(body);

		if self.auth_method == ClientAuthMethod::SecretBasic
			&& let Some(secret) = &self.client_secret
		{
			let credentials = BASE64.encode(format!("{}:{secret}", self.client_id));

			request = request.with_header("authorization", format!("Basic {credentials}"));
		}

		let response = self.transport.send(request).await?;

		if !response.is_success() {
			return Err(Self::classify_rejection(response.status, &response.body));
		}

		let mut deserializer = serde_json::Deserializer::from_slice(&response.body);
		let wire: WireTokenResponse = serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|source| TokenEndpointError::Parse { source, status: response.status })?;
		let expires_in = match wire.expires_in {
			Some(secs) if secs > 0 => Duration::seconds(secs),
			_ => return Err(TokenEndpointError::NonPositiveExpiresIn),
		};

		Ok(TokenGrant {
			access_token: wire.access_token,
			refresh_token: wire.refresh_token,
			token_type: wire.token_type.unwrap_or_else(|| "Bearer".into()),
			expires_in,
		})
	}

	fn classify_rejection(status: u16, body: &[u8]) -> TokenEndpointError {
		let (code, description) = match serde_json::from_slice::<WireErrorResponse>(body) {
			Ok(wire) => (
				wire.error.unwrap_or_else(|| "unknown_error".into()),
				wire.error_description.unwrap_or_default(),
			),
			Err(_) =>
				("unknown_error".into(), String::from_utf8_lossy(body).trim().to_owned()),
		};

		TokenEndpointError::Rejected { code, description, status }
	}
}
impl<T> Debug for TokenEndpoint<T>
where
	T: ?Sized + ApiTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenEndpoint")
			.field("url", &self.url.as_str())
			.field("client_id", &self.client_id)
			.field("client_secret_set", &self.client_secret.is_some())
			.field("auth_method", &self.auth_method)
			.finish()
	}
}
