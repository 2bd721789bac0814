//! Caption engines.
//!
//! [`CaptionEngine`] is the seam between the pipeline and whatever model turns
//! a frame into a sentence. Engines are constructed explicitly and handed to
//! the [`VideoCaptioner`](crate::VideoCaptioner); nothing is loaded lazily
//! behind a global.
//!
//! [`CaptionBackend`] names the supported model families. With the `remote`
//! feature, [`RemoteCaptionEngine`] talks to an HTTP caption server hosting
//! the backend's model.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::configuration::InferenceConfig;
use crate::error::ScenecapError;

/// Supported captioning model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptionBackend {
    /// ViT encoder with a GPT-2 decoder.
    VitGpt2,
    /// BLIP-2 with an OPT-2.7b language model.
    #[default]
    Blip2,
    /// LLaVA 1.5, prompted with a question about the image.
    Llava,
}

impl CaptionBackend {
    /// All backends, in declaration order.
    pub const ALL: [CaptionBackend; 3] = [
        CaptionBackend::VitGpt2,
        CaptionBackend::Blip2,
        CaptionBackend::Llava,
    ];

    /// Hugging Face model id used when the configuration does not override it.
    pub fn default_model(self) -> &'static str {
        match self {
            CaptionBackend::VitGpt2 => "nlpconnect/vit-gpt2-image-captioning",
            CaptionBackend::Blip2 => "Salesforce/blip2-opt-2.7b",
            CaptionBackend::Llava => "llava-hf/llava-1.5-7b-hf",
        }
    }

    /// Instruction prompt, for backends that need one.
    pub fn prompt(self) -> Option<&'static str> {
        match self {
            CaptionBackend::Llava => Some("USER: <image>\nWhat are these?\nASSISTANT:"),
            CaptionBackend::VitGpt2 | CaptionBackend::Blip2 => None,
        }
    }

    /// Generation length limit sent with each request.
    pub fn max_new_tokens(self) -> u32 {
        match self {
            CaptionBackend::Llava => 200,
            CaptionBackend::VitGpt2 | CaptionBackend::Blip2 => 50,
        }
    }

    /// Configuration name of the backend.
    pub fn as_str(self) -> &'static str {
        match self {
            CaptionBackend::VitGpt2 => "vit_gpt2",
            CaptionBackend::Blip2 => "blip2",
            CaptionBackend::Llava => "llava",
        }
    }
}

impl Display for CaptionBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptionBackend {
    type Err = ScenecapError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let normalized = text.trim().to_ascii_lowercase().replace('-', "_");
        CaptionBackend::ALL
            .into_iter()
            .find(|backend| backend.as_str() == normalized)
            .ok_or_else(|| {
                ScenecapError::InvalidConfiguration(format!("unknown caption backend {text:?}"))
            })
    }
}

/// Turns an image into a caption.
pub trait CaptionEngine: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Prepare the engine. Must be called before [`caption`](Self::caption).
    fn load(&mut self) -> Result<(), ScenecapError>;

    /// Whether [`load`](Self::load) has succeeded.
    fn is_loaded(&self) -> bool;

    /// Caption one image.
    ///
    /// # Errors
    ///
    /// [`ScenecapError::EngineNotLoaded`] before `load`, otherwise
    /// [`ScenecapError::InferenceError`].
    fn caption(&self, image: &RgbImage) -> Result<String, ScenecapError>;
}

impl<E: CaptionEngine + ?Sized> CaptionEngine for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn load(&mut self) -> Result<(), ScenecapError> {
        (**self).load()
    }

    fn is_loaded(&self) -> bool {
        (**self).is_loaded()
    }

    fn caption(&self, image: &RgbImage) -> Result<String, ScenecapError> {
        (**self).caption(image)
    }
}

/// Strip a prompt the model echoed back, keeping only the answer.
#[cfg(feature = "remote")]
fn clean_caption(raw: &str, prompt: Option<&str>) -> String {
    let answer = match prompt.and_then(|_| raw.rfind("ASSISTANT:")) {
        Some(position) => &raw[position + "ASSISTANT:".len()..],
        None => raw,
    };
    answer.trim().to_string()
}

/// Build the engine described by `config`.
///
/// # Errors
///
/// [`ScenecapError::InvalidConfiguration`] if no endpoint is configured or
/// the crate was built without the `remote` feature.
pub fn build_engine(config: &InferenceConfig) -> Result<Box<dyn CaptionEngine>, ScenecapError> {
    #[cfg(feature = "remote")]
    {
        Ok(Box::new(RemoteCaptionEngine::from_config(config)?))
    }

    #[cfg(not(feature = "remote"))]
    {
        Err(ScenecapError::InvalidConfiguration(format!(
            "no caption engine available for {}: built without the `remote` feature",
            config.backend
        )))
    }
}


#[cfg(feature = "remote")]
pub use remote::RemoteCaptionEngine;

#[cfg(feature = "remote")]
mod remote {
    use std::io::Cursor;
    use std::time::Duration;

    use base64::{Engine, prelude::BASE64_STANDARD};
    use image::{ImageFormat, RgbImage};
    use reqwest::blocking::Client;
    use serde::{Deserialize, Serialize};

    use super::{CaptionBackend, CaptionEngine, clean_caption};
    use crate::configuration::InferenceConfig;
    use crate::error::ScenecapError;

    #[derive(Serialize)]
    struct CaptionRequest<'a> {
        model: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt: Option<&'a str>,
        max_new_tokens: u32,
        image: String,
    }

    #[derive(Deserialize)]
    struct CaptionResponse {
        caption: String,
    }

    /// Captions frames through an HTTP caption server.
    ///
    /// Each call posts `{"model", "prompt"?, "max_new_tokens", "image"}` with
    /// the frame as a base64 PNG and expects `{"caption": "..."}` back.
    ///
    /// ```no_run
    /// use image::RgbImage;
    /// use scenecap::{CaptionBackend, CaptionEngine, RemoteCaptionEngine};
    ///
    /// let mut engine = RemoteCaptionEngine::new(CaptionBackend::Blip2, "http://localhost:8000/caption");
    /// engine.load()?;
    /// let caption = engine.caption(&RgbImage::new(224, 224))?;
    /// # Ok::<(), scenecap::ScenecapError>(())
    /// ```
    #[derive(Debug)]
    pub struct RemoteCaptionEngine {
        backend: CaptionBackend,
        model: String,
        endpoint: String,
        timeout: Duration,
        name: String,
        client: Option<Client>,
    }

    impl RemoteCaptionEngine {
        /// Engine for `backend`'s default model at `endpoint`.
        pub fn new(backend: CaptionBackend, endpoint: impl Into<String>) -> Self {
            Self {
                backend,
                model: backend.default_model().to_string(),
                endpoint: endpoint.into(),
                timeout: Duration::from_secs(120),
                name: format!("remote-{backend}"),
                client: None,
            }
        }

        /// Engine described by an [`InferenceConfig`].
        pub fn from_config(config: &InferenceConfig) -> Result<Self, ScenecapError> {
            let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                ScenecapError::InvalidConfiguration(
                    "inference.endpoint is required for the remote caption engine".to_string(),
                )
            })?;
            Ok(Self::new(config.backend, endpoint)
                .with_model(config.model_id())
                .with_timeout(Duration::from_secs(config.timeout_secs)))
        }

        /// Override the model id.
        #[must_use]
        pub fn with_model(mut self, model: impl Into<String>) -> Self {
            self.model = model.into();
            self
        }

        /// Per-request timeout.
        #[must_use]
        pub fn with_timeout(mut self, timeout: Duration) -> Self {
            self.timeout = timeout;
            self
        }

        /// The backend this engine speaks for.
        pub fn backend(&self) -> CaptionBackend {
            self.backend
        }

        /// The model id sent with each request.
        pub fn model(&self) -> &str {
            &self.model
        }
    }

    impl CaptionEngine for RemoteCaptionEngine {
        fn name(&self) -> &str {
            &self.name
        }

        fn load(&mut self) -> Result<(), ScenecapError> {
            if self.client.is_some() {
                return Ok(());
            }
            let client = Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|error| ScenecapError::InferenceError(error.to_string()))?;
            log::info!("Caption engine {} ready ({} at {})", self.name, self.model, self.endpoint);
            self.client = Some(client);
            Ok(())
        }

        fn is_loaded(&self) -> bool {
            self.client.is_some()
        }

        fn caption(&self, image: &RgbImage) -> Result<String, ScenecapError> {
            let client = self
                .client
                .as_ref()
                .ok_or_else(|| ScenecapError::EngineNotLoaded(self.name.clone()))?;

            let mut png = Vec::new();
            image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

            let prompt = self.backend.prompt();
            let request = CaptionRequest {
                model: &self.model,
                prompt,
                max_new_tokens: self.backend.max_new_tokens(),
                image: BASE64_STANDARD.encode(png),
            };

            let response: CaptionResponse = client
                .post(&self.endpoint)
                .json(&request)
                .send()
                .and_then(|response| response.error_for_status())
                .and_then(|response| response.json())
                .map_err(|error| ScenecapError::InferenceError(error.to_string()))?;

            let caption = clean_caption(&response.caption, prompt);
            log::debug!("{} captioned {}x{} frame: {caption:?}", self.name, image.width(), image.height());
            Ok(caption)
        }
    }
}
