//! Interfaces of the external inference and image collaborators.
//!
//! The models and codecs themselves live outside this workspace; the
//! orchestrator only sees these traits.

use std::sync::Arc;

use folio_workflow::{ImageRef, LineDescription, ModelRef, SegmentationResult, TextDirection};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InferenceError {
    #[error("model could not be loaded: {0}")]
    Model(String),
    #[error("image could not be read: {0}")]
    Image(String),
    #[error("inference failed: {0}")]
    Failed(String),
}

/// Options for one segmentation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationRequest {
    /// Compute device, e.g. `cpu` or `cuda:0`.
    pub device: String,
    /// Model handle; `None` selects the collaborator's built-in default.
    pub model: Option<String>,
    pub text_direction: Option<TextDirection>,
}

pub trait Segmenter: Send + Sync {
    fn segment(
        &self,
        image: &ImageRef,
        request: &SegmentationRequest,
    ) -> Result<SegmentationResult, InferenceError>;
}

pub trait Recognizer: Send + Sync {
    /// Text prediction for one line.
    fn recognize(
        &self,
        image: &ImageRef,
        model: &ModelRef,
        line: &LineDescription,
    ) -> Result<String, InferenceError>;
}

/// Image codec work run by the conversion jobs.
pub trait ImageProcessor: Send + Sync {
    /// Normalize the stored image to the working format, in place.
    fn convert(&self, image: &ImageRef) -> Result<(), InferenceError>;

    fn compress(&self, image: &ImageRef) -> Result<(), InferenceError>;

    fn thumbnails(&self, image: &ImageRef) -> Result<(), InferenceError>;
}

/// Processor for deployments where images are stored ready to use.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughImages;

impl ImageProcessor for PassthroughImages {
    fn convert(&self, _image: &ImageRef) -> Result<(), InferenceError> {
        Ok(())
    }

    fn compress(&self, _image: &ImageRef) -> Result<(), InferenceError> {
        Ok(())
    }

    fn thumbnails(&self, _image: &ImageRef) -> Result<(), InferenceError> {
        Ok(())
    }
}

/// The collaborators a workflow runs jobs with.
#[derive(Clone)]
pub struct Collaborators {
    pub segmenter: Arc<dyn Segmenter>,
    pub recognizer: Arc<dyn Recognizer>,
    pub images: Arc<dyn ImageProcessor>,
}

impl Collaborators {
    pub fn new(segmenter: Arc<dyn Segmenter>, recognizer: Arc<dyn Recognizer>) -> Self {
        Self {
            segmenter,
            recognizer,
            images: Arc::new(PassthroughImages),
        }
    }

    pub fn with_images(mut self, images: Arc<dyn ImageProcessor>) -> Self {
        self.images = images;
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
