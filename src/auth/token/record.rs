//! The current token record, its lifecycle helpers, and builder.

// self
use crate::{_prelude::*, auth::token::secret::TokenSecret};

/// Lifecycle status of the current token relative to the safety margin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
	/// Token is valid well clear of the safety margin.
	Active,
	/// Token is still valid but inside the safety margin; refresh before use.
	Expiring,
	/// Token exceeded its expiry instant.
	Expired,
}

/// Errors produced by [`TokenRecordBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum TokenRecordBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when no positive lifetime was configured.
	#[error("A positive expires_in lifetime is required.")]
	MissingLifetime,
}

/// The single current token record.
///
/// There is at most one logical record at a time; [`expires_at`](Self::expires_at)
/// is always derived from `issued_at + expires_in` and never set independently.
/// Replacement happens only through the manager's `set_tokens` path.
#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct TokenRecord {
	/// Access token secret; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Refresh token secret, if the provider issued one.
	pub refresh_token: Option<TokenSecret>,
	/// Token scheme reported at issuance, `Bearer` unless the provider says otherwise.
	pub token_type: String,
	/// Lifetime reported at issuance.
	pub expires_in: Duration,
	/// Issuance instant recorded from the provider response.
	pub issued_at: OffsetDateTime,
	/// Expiry instant derived from `issued_at + expires_in`.
	pub expires_at: OffsetDateTime,
	/// Instant this record was first written.
	pub created_at: OffsetDateTime,
	/// Instant this record was last replaced.
	pub updated_at: OffsetDateTime,
}
impl TokenRecord {
	/// Returns a builder for constructing records with a derived expiry.
	pub fn builder() -> TokenRecordBuilder {
		TokenRecordBuilder::default()
	}

	/// Computes the lifecycle status at a given instant with the provided margin.
	pub fn status_at(&self, instant: OffsetDateTime, margin: Duration) -> TokenStatus {
		if instant >= self.expires_at {
			return TokenStatus::Expired;
		}
		if self.expires_at - instant <= margin {
			return TokenStatus::Expiring;
		}

		TokenStatus::Active
	}

	/// Returns `true` when the record can be served without a refresh.
	pub fn is_fresh_at(&self, instant: OffsetDateTime, margin: Duration) -> bool {
		matches!(self.status_at(instant, margin), TokenStatus::Active)
	}

	/// Returns `true` if the record has expired outright at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant, Duration::ZERO), TokenStatus::Expired)
	}

	/// Remaining lifetime at the provided instant; negative once expired.
	pub fn remaining_at(&self, instant: OffsetDateTime) -> Duration {
		self.expires_at - instant
	}
}
impl Debug for TokenRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenRecord")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("token_type", &self.token_type)
			.field("expires_in", &self.expires_in)
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.field("created_at", &self.created_at)
			.field("updated_at", &self.updated_at)
			.finish()
	}
}

/// Builder for [`TokenRecord`].
///
/// The expiry instant cannot be set directly; it is always recomputed from the
/// issuance instant plus the provided lifetime.
#[derive(Clone, Debug, Default)]
pub struct TokenRecordBuilder {
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	token_type: Option<String>,
	expires_in: Option<Duration>,
	issued_at: Option<OffsetDateTime>,
	created_at: Option<OffsetDateTime>,
}
impl TokenRecordBuilder {
	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Optionally provides the refresh token value.
	pub fn maybe_refresh_token(mut self, token: Option<String>) -> Self {
		self.refresh_token = token.map(TokenSecret::new);

		self
	}

	/// Overrides the token scheme (defaults to `Bearer`).
	pub fn token_type(mut self, token_type: impl Into<String>) -> Self {
		self.token_type = Some(token_type.into());

		self
	}

	/// Sets the reported lifetime used to derive the expiry instant.
	pub fn expires_in(mut self, lifetime: Duration) -> Self {
		self.expires_in = Some(lifetime);

		self
	}

	/// Sets the issuance instant.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Preserves an original creation instant across full replacements.
	pub fn created_at(mut self, instant: OffsetDateTime) -> Self {
		self.created_at = Some(instant);

		self
	}

	/// Consumes the builder and produces a [`TokenRecord`].
	pub fn build(self) -> Result<TokenRecord, TokenRecordBuilderError> {
		let access_token = self.access_token.ok_or(TokenRecordBuilderError::MissingAccessToken)?;
		let expires_in = match self.expires_in {
			Some(lifetime) if lifetime.is_positive() => lifetime,
			_ => return Err(TokenRecordBuilderError::MissingLifetime),
		};
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let created_at = self.created_at.unwrap_or(issued_at);

		Ok(TokenRecord {
			access_token,
			refresh_token: self.refresh_token,
			token_type: self.token_type.unwrap_or_else(|| "Bearer".into()),
			expires_in,
			issued_at,
			expires_at: issued_at + expires_in,
			created_at,
			updated_at: issued_at,
		})
	}
}
