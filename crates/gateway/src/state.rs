use crate::registry::SubscriberRegistry;
use crate::stream::StreamProcessor;
use std::sync::Arc;
use std::time::Duration;
use vision::DetectorHandle;

/// Settings the HTTP layer needs beyond the processor itself.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub service_name: String,
    pub channel_url: String,
    pub subscriber_queue: usize,
    pub send_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            service_name: "AI Detection Gateway".to_string(),
            channel_url: "ws://localhost:8000/stream/ws".to_string(),
            subscriber_queue: 8,
            send_timeout: Duration::from_secs(2),
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<StreamProcessor>,
    pub detector: DetectorHandle,
    pub settings: Arc<ApiSettings>,
}

impl AppState {
    pub fn new(processor: Arc<StreamProcessor>, settings: ApiSettings) -> Self {
        Self {
            detector: processor.detector().clone(),
            processor,
            settings: Arc::new(settings),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        self.processor.registry()
    }
}
