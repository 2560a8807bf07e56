use aide::operation::OperationInput;
use async_trait::async_trait;
use axum::{
	body::{Bytes, HttpBody},
	extract::{multipart::MultipartError, FromRequest, Multipart},
	http::{Request, StatusCode},
	BoxError,
};

use crate::errors::HTTPError;

/// Name of the multipart field holding the image.
pub const FIELD_NAME: &str = "file";

/// An image uploaded as the `file` field of a multipart form.
#[derive(Debug)]
pub struct ImageUpload {
	pub bytes: Bytes,
	pub content_type: String,
	pub file_name: Option<String>,
}

#[async_trait]
impl<S, B> FromRequest<S, B> for ImageUpload
where
	B: HttpBody + Send + 'static,
	B::Data: Into<Bytes>,
	B::Error: Into<BoxError>,
	S: Send + Sync,
{
	type Rejection = HTTPError;

	async fn from_request(req: Request<B>, state: &S) -> Result<Self, Self::Rejection> {
		let mut multipart = Multipart::from_request(req, state)
			.await
			.map_err(|e| HTTPError::new(&e.body_text()))?;

		while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
			if field.name() != Some(FIELD_NAME) {
				continue;
			}

			let content_type = field.content_type().unwrap_or_default().to_string();
			if !content_type.starts_with("image/") {
				tracing::debug!("Rejecting upload with content type {content_type:?}");
				return Err(HTTPError::new("File must be an image").with_status(StatusCode::BAD_REQUEST));
			}

			let file_name = field.file_name().map(ToString::to_string);
			let bytes = field.bytes().await.map_err(multipart_error)?;

			tracing::debug!(
				"Received {} byte {content_type} upload{}",
				bytes.len(),
				file_name.as_ref().map_or(String::new(), |name| format!(" named {name}")),
			);

			return Ok(Self {
				bytes,
				content_type,
				file_name,
			});
		}

		Err(HTTPError::new("Missing multipart field: file"))
	}
}

impl OperationInput for ImageUpload {}

fn multipart_error(e: MultipartError) -> HTTPError {
	if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
		return HTTPError::new("Upload exceeds the maximum allowed size").with_status(StatusCode::PAYLOAD_TOO_LARGE);
	}

	HTTPError::new(&format!("Invalid multipart body: {}", e.body_text()))
}
