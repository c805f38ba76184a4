//! Captioning port used by the visual memory pipeline.

use std::future::Future;
use std::pin::Pin;

use engram_types::error::CaptionError;

/// An external model that turns a screenshot into a short caption.
pub trait Captioner: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Caption `image_base64` (raw base64 or a `data:` URL) following `prompt`.
    fn caption(
        &self,
        image_base64: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> impl Future<Output = Result<String, CaptionError>> + Send;
}

/// Object-safe version of [`Captioner`].
pub trait CaptionerDyn: Send + Sync {
    fn name(&self) -> &str;

    fn caption_boxed<'a>(
        &'a self,
        image_base64: &'a str,
        prompt: &'a str,
        max_tokens: u32,
    ) -> Pin<Box<dyn Future<Output = Result<String, CaptionError>> + Send + 'a>>;
}

impl<T: Captioner> CaptionerDyn for T {
    fn name(&self) -> &str {
        Captioner::name(self)
    }

    fn caption_boxed<'a>(
        &'a self,
        image_base64: &'a str,
        prompt: &'a str,
        max_tokens: u32,
    ) -> Pin<Box<dyn Future<Output = Result<String, CaptionError>> + Send + 'a>> {
        Box::pin(self.caption(image_base64, prompt, max_tokens))
    }
}

/// Type-erased [`Captioner`].
pub struct BoxCaptioner {
    inner: Box<dyn CaptionerDyn + Send + Sync>,
}

impl BoxCaptioner {
    pub fn new<T: Captioner + 'static>(captioner: T) -> Self {
        Self {
            inner: Box::new(captioner),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn caption(
        &self,
        image_base64: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, CaptionError> {
        self.inner.caption_boxed(image_base64, prompt, max_tokens).await
    }
}

impl std::fmt::Debug for BoxCaptioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxCaptioner")
            .field("name", &self.inner.name())
            .finish()
    }
}
