use std::{path::PathBuf, sync::Arc};

use crate::{gateway::CompletionGateway, metrics::AppMetrics};

/// Decoded image size accepted on the vision route unless configured otherwise.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<CompletionGateway>,
    pub metrics: Arc<AppMetrics>,
    pub static_dir: Arc<PathBuf>,
    pub max_image_bytes: usize,
}

impl AppState {
    pub fn new(gateway: CompletionGateway, static_dir: PathBuf) -> Self {
        Self {
            gateway: Arc::new(gateway),
            metrics: Arc::new(AppMetrics::new()),
            static_dir: Arc::new(static_dir),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }

    pub fn with_max_image_bytes(mut self, max_image_bytes: usize) -> Self {
        self.max_image_bytes = max_image_bytes;
        self
    }

    /// Request body limit for the vision route: the base64 text of the
    /// largest accepted image plus room for the prompt and JSON framing.
    pub fn vision_body_limit(&self) -> usize {
        self.max_image_bytes.div_ceil(3) * 4 + VISION_ENVELOPE_BYTES
    }
}

const VISION_ENVELOPE_BYTES: usize = 64 * 1024;
